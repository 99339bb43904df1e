//! `format` and the format comparison keywords (`formatMaximum`,
//! `formatMinimum`, `formatExclusiveMaximum`, `formatExclusiveMinimum`).
use std::sync::Arc;

use serde_json::Value;

use crate::codegen::Captured;
use crate::compile::{KeywordCx, KwError};
use crate::error::CompileError;
use crate::format::FormatDef;
use crate::ir::{BinOp, Expr, bin};
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

pub(crate) fn definitions() -> Vec<KeywordDefinition> {
    let limit = |keyword: &'static str, fails: BinOp, comparison: &'static str| {
        KeywordDefinition::code(&[keyword], move |cx| format_limit(cx, fails, comparison))
            .schema_type(TypeSet::STRING)
            .depends_on("format")
            .data()
    };
    vec![
        KeywordDefinition::code(&["format"], format).schema_type(TypeSet::STRING),
        limit("formatMaximum", BinOp::Gt, "<="),
        limit("formatMinimum", BinOp::Lt, ">="),
        limit("formatExclusiveMaximum", BinOp::Ge, "<"),
        limit("formatExclusiveMinimum", BinOp::Le, ">"),
    ]
}

/// The definition of the sibling `format`, or `None` when unknown and
/// strictness lets that pass.
fn lookup(cx: &KeywordCx<'_, '_>, name: &str) -> Result<Option<Arc<FormatDef>>, CompileError> {
    if let Some(def) = cx.c.formats.get(name) {
        return Ok(Some(def.clone()));
    }
    cx.c.strict(CompileError::UnknownFormat { format: name.to_string(), path: cx.schema_path() })?;
    Ok(None)
}

fn format(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    if !cx.c.opts.validate_formats {
        return Ok(());
    }
    let Value::String(name) = cx.schema() else { return Err(cx.invalid_value("a string")) };
    let Some(def) = lookup(cx, name)? else { return Ok(()) };
    let check = cx.capture("formats", Captured::Format(def), Some(name))?;
    let err = KwError::new(format!("must match format \"{name}\"")).param("format", Expr::str(name.as_str()));
    cx.pass(Expr::Invoke(check, vec![cx.data()]), err)
}

fn format_limit(cx: &mut KeywordCx<'_, '_>, fails: BinOp, comparison: &str) -> Result<(), CompileError> {
    if !cx.c.opts.validate_formats {
        return Ok(());
    }
    let Some(Value::String(name)) = cx.sibling("format") else { return Err(cx.invalid_value("used with a string \"format\"")) };
    let Some(def) = lookup(cx, name)? else { return Ok(()) };
    if !def.is_comparable() {
        return Err(cx.invalid_value(&format!("used with a format that defines a comparison, \"{name}\" does not")));
    }
    let compare = cx.capture("compare", Captured::FormatCompare(def), Some(name))?;
    let limit = cx.schema_code();
    let message = if cx.is_data() {
        KwError::new(vec![Expr::str(format!("must be {comparison} ")), limit.clone()])
    } else {
        KwError::new(format!("must be {comparison} {}", cx.schema()))
    };
    let err = message.param("comparison", Expr::str(comparison)).param("limit", limit.clone());
    // incomparable values compare as undefined, which fails every relation
    let ordering = Expr::Invoke(compare, vec![cx.data(), limit]);
    cx.fail(bin(fails, ordering, Expr::num(0)), err)
}

#[cfg(test)]
mod tests {
    use crate::{Options, SchemaRegistry, StrictMode};
    use serde_json::json;

    #[test]
    fn builtin_formats_check_strings_only() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"format": "date"})).unwrap();
        assert!(v.is_valid(&json!("2020-02-29")).unwrap());
        assert!(v.is_valid(&json!(7)).unwrap());
        let out = v.validate(&json!("2021-02-29")).unwrap();
        assert_eq!(out.errors[0].message, "must match format \"date\"");
        assert_eq!(out.errors[0].params["format"], json!("date"));
    }

    #[test]
    fn unknown_formats_follow_strictness() {
        let mut lax = SchemaRegistry::new();
        assert!(lax.compile(json!({"format": "shoe-size"})).unwrap().is_valid(&json!("x")).unwrap());
        let mut strict = SchemaRegistry::with_options(Options { strict: StrictMode::Error, ..Options::default() });
        assert!(strict.compile(json!({"format": "shoe-size"})).is_err());
    }

    #[test]
    fn format_limits_compare_within_the_format() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"format": "date", "formatMaximum": "2020-12-31"})).unwrap();
        assert!(v.is_valid(&json!("2020-06-01")).unwrap());
        assert!(!v.is_valid(&json!("not a date")).unwrap());
        let out = v.validate(&json!("2021-01-01")).unwrap();
        let err = out.errors.iter().find(|e| e.keyword == "formatMaximum").unwrap();
        assert_eq!(err.message, "must be <= \"2020-12-31\"");
        assert_eq!(err.params["comparison"], json!("<="));

        let v = reg.compile(json!({"format": "date", "formatExclusiveMinimum": "2020-01-01"})).unwrap();
        assert!(!v.is_valid(&json!("2020-01-01")).unwrap());
        assert!(v.is_valid(&json!("2020-01-02")).unwrap());
    }

    #[test]
    fn format_limits_need_their_format() {
        let mut reg = SchemaRegistry::new();
        assert!(reg.compile(json!({"formatMaximum": "2020-01-01"})).is_err());
        assert!(reg.compile(json!({"format": "email", "formatMaximum": "a@b.c"})).is_err());
    }
}
