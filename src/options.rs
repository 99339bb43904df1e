//! Compiler options.
//!
//! Deserializable from the same camelCase JSON shape the CLI's `--config`
//! file uses; every field is optional.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::path_de;

// ————————————————————————————————————————————————————————————————————————————
// OPTIONS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Collect every error instead of stopping at the first one.
    pub all_errors: bool,
    pub strict: StrictMode,
    pub coerce_types: CoerceTypes,
    /// Forbid coercion even when `coerceTypes` asks for it.
    pub strict_type_coercion: bool,
    /// Accept `type` arrays with more than one non-null type in strict mode.
    pub allow_union_types: bool,
    pub inline_refs: InlineRefs,
    /// Optimizer rounds.
    pub optimize: u32,
    /// Resolve `{"$data": pointer}` keyword values against the instance.
    #[serde(alias = "$data")]
    pub data: bool,
    /// Track evaluated properties and items for `unevaluated*`.
    pub unevaluated: bool,
    /// Forced draft; otherwise detected from the root `$schema`.
    pub draft: Option<Draft>,
    /// Render instance paths as `.a[0]` instead of `/a/0`.
    pub js_property_syntax: bool,
    pub validate_formats: bool,
    /// Include human-readable messages in error records.
    pub messages: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            all_errors: false,
            strict: StrictMode::Log,
            coerce_types: CoerceTypes::Off,
            strict_type_coercion: false,
            allow_union_types: false,
            inline_refs: InlineRefs::Flat,
            optimize: 1,
            data: false,
            unevaluated: true,
            draft: None,
            js_property_syntax: false,
            validate_formats: true,
            messages: true,
        }
    }
}

impl Options {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Options> {
        path_de::from_file(path)
    }

    /// Coercion that actually applies, after `strictTypeCoercion`.
    pub fn effective_coercion(&self) -> CoerceTypes {
        if self.strict_type_coercion { CoerceTypes::Off } else { self.coerce_types }
    }
}

// ---- strict ---- //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Flag", into = "Flag")]
pub enum StrictMode {
    Off,
    Log,
    Error,
}

// ---- coercion ---- //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Flag", into = "Flag")]
pub enum CoerceTypes {
    Off,
    /// Scalars only.
    Scalar,
    /// Scalars, plus wrapping into and unwrapping from one-item arrays.
    Array,
}

impl CoerceTypes {
    pub fn is_on(self) -> bool {
        self != CoerceTypes::Off
    }
}

// ---- inlining ---- //

/// When a `$ref` target is emitted in place instead of called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Flag", into = "Flag")]
pub enum InlineRefs {
    Never,
    /// Targets containing no `$ref` of their own.
    Flat,
    /// Targets whose keyword count stays within the limit.
    Limit(u32),
}

// ---- draft ---- //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Draft {
    #[serde(rename = "draft7", alias = "draft-07")]
    Draft7,
    #[serde(rename = "2020-12", alias = "draft2020-12")]
    Draft2020,
}

impl Draft {
    /// Detect from a `$schema` URI.
    pub fn from_meta_schema(uri: &str) -> Option<Draft> {
        if uri.contains("2020-12") {
            Some(Draft::Draft2020)
        } else if uri.contains("draft-07") {
            Some(Draft::Draft7)
        } else {
            None
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// WIRE REPRESENTATION
// ————————————————————————————————————————————————————————————————————————————

/// `true`, `false`, a word or a number: the loose shapes these options accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Num(u32),
    Word(String),
}

impl TryFrom<Flag> for StrictMode {
    type Error = String;

    fn try_from(flag: Flag) -> Result<Self, String> {
        match flag {
            Flag::Bool(true) => Ok(StrictMode::Error),
            Flag::Bool(false) => Ok(StrictMode::Off),
            Flag::Word(w) if w == "log" => Ok(StrictMode::Log),
            Flag::Word(w) if w == "off" => Ok(StrictMode::Off),
            Flag::Word(w) if w == "error" => Ok(StrictMode::Error),
            other => Err(format!("expected a boolean or \"log\", found {other:?}")),
        }
    }
}

impl From<StrictMode> for Flag {
    fn from(mode: StrictMode) -> Flag {
        match mode {
            StrictMode::Off => Flag::Bool(false),
            StrictMode::Log => Flag::Word("log".into()),
            StrictMode::Error => Flag::Bool(true),
        }
    }
}

impl TryFrom<Flag> for CoerceTypes {
    type Error = String;

    fn try_from(flag: Flag) -> Result<Self, String> {
        match flag {
            Flag::Bool(false) => Ok(CoerceTypes::Off),
            Flag::Bool(true) => Ok(CoerceTypes::Scalar),
            Flag::Word(w) if w == "array" => Ok(CoerceTypes::Array),
            other => Err(format!("expected a boolean or \"array\", found {other:?}")),
        }
    }
}

impl From<CoerceTypes> for Flag {
    fn from(c: CoerceTypes) -> Flag {
        match c {
            CoerceTypes::Off => Flag::Bool(false),
            CoerceTypes::Scalar => Flag::Bool(true),
            CoerceTypes::Array => Flag::Word("array".into()),
        }
    }
}

impl TryFrom<Flag> for InlineRefs {
    type Error = String;

    fn try_from(flag: Flag) -> Result<Self, String> {
        match flag {
            Flag::Bool(true) => Ok(InlineRefs::Flat),
            Flag::Bool(false) => Ok(InlineRefs::Never),
            Flag::Num(n) => Ok(InlineRefs::Limit(n)),
            other => Err(format!("expected a boolean or a number, found {other:?}")),
        }
    }
}

impl From<InlineRefs> for Flag {
    fn from(i: InlineRefs) -> Flag {
        match i {
            InlineRefs::Never => Flag::Bool(false),
            InlineRefs::Flat => Flag::Bool(true),
            InlineRefs::Limit(n) => Flag::Num(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_shapes_deserialize() {
        let opts: Options = serde_json::from_str(
            r#"{"allErrors": true, "strict": false, "coerceTypes": "array", "inlineRefs": 8, "draft": "2020-12"}"#,
        )
        .unwrap();
        assert!(opts.all_errors);
        assert_eq!(opts.strict, StrictMode::Off);
        assert_eq!(opts.coerce_types, CoerceTypes::Array);
        assert_eq!(opts.inline_refs, InlineRefs::Limit(8));
        assert_eq!(opts.draft, Some(Draft::Draft2020));
        assert!(opts.messages);
    }

    #[test]
    fn strict_type_coercion_wins() {
        let opts = Options { coerce_types: CoerceTypes::Scalar, strict_type_coercion: true, ..Options::default() };
        assert_eq!(opts.effective_coercion(), CoerceTypes::Off);
    }

    #[test]
    fn bad_values_report_their_path() {
        let err = path_de::from_str_with_path::<Options>(r#"{"coerceTypes": "sometimes"}"#).unwrap_err();
        assert!(err.contains("coerceTypes"), "{err}");
    }

    #[test]
    fn drafts_detected_from_meta_schema() {
        assert_eq!(
            Draft::from_meta_schema("https://json-schema.org/draft/2020-12/schema"),
            Some(Draft::Draft2020)
        );
        assert_eq!(Draft::from_meta_schema("http://json-schema.org/draft-07/schema#"), Some(Draft::Draft7));
        assert_eq!(Draft::from_meta_schema("urn:other"), None);
    }
}
