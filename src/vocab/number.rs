//! Numeric keywords.
use serde_json::Value;

use crate::compile::{KeywordCx, KwError};
use crate::error::CompileError;
use crate::ir::{BinOp, Builtin, Expr, bin};
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

pub(crate) fn definitions() -> Vec<KeywordDefinition> {
    let limit = |keyword: &'static str, fails: BinOp, comparison: &'static str| {
        KeywordDefinition::code(&[keyword], move |cx| number_limit(cx, fails, comparison))
            .types(TypeSet::NUMBER)
            .schema_type(TypeSet::NUMBER)
            .data()
    };
    vec![
        limit("maximum", BinOp::Gt, "<="),
        limit("minimum", BinOp::Lt, ">="),
        limit("exclusiveMaximum", BinOp::Ge, "<"),
        limit("exclusiveMinimum", BinOp::Le, ">"),
        KeywordDefinition::code(&["multipleOf"], multiple_of)
            .types(TypeSet::NUMBER)
            .schema_type(TypeSet::NUMBER)
            .data(),
    ]
}

fn number_limit(cx: &mut KeywordCx<'_, '_>, fails: BinOp, comparison: &str) -> Result<(), CompileError> {
    let limit = cx.schema_code();
    let err = KwError::new(vec![Expr::str(format!("must be {comparison} ")), limit.clone()])
        .param("comparison", Expr::str(comparison))
        .param("limit", limit.clone());
    cx.fail(bin(fails, cx.data(), limit), err)
}

fn multiple_of(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    if let Value::Number(n) = cx.schema() {
        if n.as_f64().is_none_or(|d| d <= 0.0) {
            return Err(cx.invalid_value("a number greater than 0"));
        }
    }
    let divisor = cx.schema_code();
    let err = KwError::new(vec![Expr::str("must be multiple of "), divisor.clone()]).param("multipleOf", divisor.clone());
    cx.pass(Expr::call(Builtin::MultipleOf, vec![cx.data(), divisor]), err)
}

#[cfg(test)]
mod tests {
    use crate::SchemaRegistry;
    use serde_json::json;

    #[test]
    fn limits_report_comparison_and_limit() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"maximum": 10, "exclusiveMinimum": 0})).unwrap();
        assert!(v.is_valid(&json!(10)).unwrap());
        assert!(v.is_valid(&json!("not a number")).unwrap());
        let out = v.validate(&json!(11)).unwrap();
        assert_eq!(out.errors[0].message, "must be <= 10");
        assert_eq!(out.errors[0].params["comparison"], json!("<="));
        assert_eq!(out.errors[0].params["limit"], json!(10));
        assert_eq!(out.errors[0].schema_path, "#/maximum");
        assert_eq!(v.validate(&json!(0)).unwrap().errors[0].keyword, "exclusiveMinimum");
    }

    #[test]
    fn multiple_of_handles_fractions() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"multipleOf": 0.01})).unwrap();
        assert!(v.is_valid(&json!(19.99)).unwrap());
        assert!(!v.is_valid(&json!(0.005)).unwrap());
        assert!(reg.compile(json!({"multipleOf": 0})).is_err());
    }
}
