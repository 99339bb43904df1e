//! String keywords.
use serde_json::Value;

use crate::compile::{KeywordCx, KwError};
use crate::error::CompileError;
use crate::ir::{BinOp, Builtin, Expr, bin};
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

pub(crate) fn definitions() -> Vec<KeywordDefinition> {
    let length = |keyword: &'static str, fails: BinOp, comparison: &'static str| {
        KeywordDefinition::code(&[keyword], move |cx| length_limit(cx, fails, comparison))
            .types(TypeSet::STRING)
            .schema_type(TypeSet::NUMBER)
            .data()
    };
    vec![
        length("maxLength", BinOp::Gt, "more"),
        length("minLength", BinOp::Lt, "fewer"),
        KeywordDefinition::code(&["pattern"], pattern).types(TypeSet::STRING).schema_type(TypeSet::STRING),
    ]
}

/// Length in characters, not bytes or UTF-16 units.
fn length_limit(cx: &mut KeywordCx<'_, '_>, fails: BinOp, comparison: &str) -> Result<(), CompileError> {
    let limit = cx.schema_code();
    let err = KwError::new(vec![
        Expr::str(format!("must NOT have {comparison} than ")),
        limit.clone(),
        Expr::str(" characters"),
    ])
    .param("limit", limit.clone());
    cx.fail(bin(fails, Expr::call(Builtin::Len, vec![cx.data()]), limit), err)
}

fn pattern(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::String(source) = cx.schema() else { return Err(cx.invalid_value("a string")) };
    let re = cx.pattern(source)?;
    let err = KwError::new(format!("must match pattern \"{source}\"")).param("pattern", Expr::str(source.as_str()));
    cx.pass(Expr::Invoke(re, vec![cx.data()]), err)
}

#[cfg(test)]
mod tests {
    use crate::SchemaRegistry;
    use serde_json::json;

    #[test]
    fn lengths_count_characters() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"maxLength": 2})).unwrap();
        assert!(v.is_valid(&json!("日本")).unwrap());
        let out = v.validate(&json!("abc")).unwrap();
        assert_eq!(out.errors[0].message, "must NOT have more than 2 characters");
        assert_eq!(out.errors[0].params["limit"], json!(2));
    }

    #[test]
    fn patterns_are_unanchored() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"pattern": "b+"})).unwrap();
        assert!(v.is_valid(&json!("abbbc")).unwrap());
        let out = v.validate(&json!("ac")).unwrap();
        assert_eq!(out.errors[0].message, "must match pattern \"b+\"");
        assert!(reg.compile(json!({"pattern": "(unclosed"})).is_err());
    }
}
