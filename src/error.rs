//! Error taxonomy.
//!
//! Three families, matching where a failure can happen:
//!
//! - compile time: [`CompileError`] (and the [`CodegenError`] / [`ResolveError`]
//!   it wraps). Fatal for the unit being compiled, never partially compiled.
//! - validation time, expected: [`ErrorRecord`]s collected into an
//!   [`Outcome`](crate::Outcome) or wrapped in a [`ValidationError`].
//! - validation time, fatal: [`RuntimeError`], always propagated.
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ————————————————————————————————————————————————————————————————————————————
// ERROR RECORDS
// ————————————————————————————————————————————————————————————————————————————

/// One failed check against one instance location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// JSON Pointer (or JS property path, see `jsPropertySyntax`) into the instance.
    pub instance_path: String,
    /// `#`-prefixed JSON Pointer into the schema, ending at the keyword.
    pub schema_path: String,
    pub keyword: String,
    pub params: IndexMap<String, Value>,
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = if self.instance_path.is_empty() { "data" } else { &self.instance_path };
        write!(f, "{at} {}", self.message)
    }
}

/// Render a list of records the way a log line wants them.
pub fn errors_text(errors: &[ErrorRecord]) -> String {
    if errors.is_empty() {
        return "No errors".to_string();
    }
    errors.iter().map(ErrorRecord::to_string).collect::<Vec<_>>().join(", ")
}

/// The instance did not conform. Carries every collected record in order.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation failed: {}", errors_text(.errors))]
pub struct ValidationError {
    pub errors: Vec<ErrorRecord>,
}

// ————————————————————————————————————————————————————————————————————————————
// COMPILE TIME
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("prefix `{prefix}` is not allowed in this scope")]
    RestrictedPrefix { prefix: String },

    #[error("unbalanced block: expected to close {expected}, found {found}")]
    UnbalancedBlock { expected: &'static str, found: &'static str },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("schema with key or id \"{0}\" already exists")]
    DuplicateId(String),

    #[error("reference \"{reference}\" resolves to different schemas with the same id")]
    AmbiguousReference { reference: String },

    #[error("can't resolve reference {reference} from id {base}")]
    Unresolved { reference: String, base: String },

    #[error("invalid URI \"{uri}\": {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("invalid JSON pointer \"{0}\"")]
    InvalidPointer(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("schema at {path} must be an object or boolean")]
    InvalidSchema { path: String },

    #[error("strict mode: unknown keyword \"{keyword}\" at {path}")]
    UnknownKeyword { keyword: String, path: String },

    #[error("strict mode: {message} at {path}")]
    Ignored { message: String, path: String },

    #[error("unknown format \"{format}\" at {path}")]
    UnknownFormat { format: String, path: String },

    #[error("keyword \"{keyword}\" at {path} requires keyword \"{missing}\"")]
    MissingDependency { keyword: String, missing: String, path: String },

    #[error("keyword \"{keyword}\" at {path}: value must be {expected}")]
    InvalidKeywordValue { keyword: String, path: String, expected: String },

    #[error("$data pointer \"{pointer}\": {reason}")]
    DataPointer { pointer: String, reason: String },

    #[error("keyword \"{keyword}\" cannot be inserted before \"{before}\": {reason}")]
    RuleGroupInsertion { keyword: String, before: String, reason: String },

    #[error("invalid regular expression \"{pattern}\": {reason}")]
    Regex { pattern: String, reason: String },

    #[error("async schema referenced from sync schema at {path}")]
    AsyncFromSync { path: String },

    #[error("no schema with key or ref \"{0}\"")]
    MissingSchema(String),

    #[error("keyword \"{0}\" is already defined")]
    KeywordExists(String),
}

impl CompileError {
    pub(crate) fn invalid_value(keyword: &str, path: &str, expected: impl Into<String>) -> Self {
        CompileError::InvalidKeywordValue {
            keyword: keyword.to_string(),
            path: path.to_string(),
            expected: expected.into(),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RUN TIME
// ————————————————————————————————————————————————————————————————————————————

/// A failure that is not a validation result: a custom keyword or format
/// callback failed, or the compiled program itself is inconsistent.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("keyword \"{keyword}\" failed: {message}")]
    Keyword { keyword: String, message: String },

    #[error("format \"{format}\" failed: {message}")]
    Format { format: String, message: String },

    #[error("async schema must be validated with `validate_async`")]
    AsyncInSyncContext,

    #[error("validator for \"{0}\" was never materialized")]
    Unmaterialized(String),

    #[error("internal: {0}")]
    Internal(String),
}

/// Outcome of an async validation that did not succeed.
#[derive(Debug, Clone, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_serialize_in_wire_shape() {
        let mut params = IndexMap::new();
        params.insert("missingProperty".to_string(), json!("id"));
        let rec = ErrorRecord {
            instance_path: String::new(),
            schema_path: "#/required".into(),
            keyword: "required".into(),
            params,
            message: "must have required property 'id'".into(),
        };
        let wire = serde_json::to_value(&rec).unwrap();
        assert_eq!(wire["instancePath"], json!(""));
        assert_eq!(wire["schemaPath"], json!("#/required"));
        assert_eq!(wire["params"]["missingProperty"], json!("id"));
        assert_eq!(errors_text(&[rec]), "data must have required property 'id'");
    }
}
