//! Array keywords.
use std::collections::BTreeSet;

use serde_json::Value;

use crate::compile::{Evaluated, Items, KeywordCx, KwError, PathSeg, Props, Sub};
use crate::error::CompileError;
use crate::ir::{BinOp, Builtin, Expr, and, bin, not};
use crate::options::Draft;
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

pub(crate) fn definitions() -> Vec<KeywordDefinition> {
    let count = |keyword: &'static str, fails: BinOp, comparison: &'static str| {
        KeywordDefinition::code(&[keyword], move |cx| item_count(cx, fails, comparison))
            .types(TypeSet::ARRAY)
            .schema_type(TypeSet::NUMBER)
            .data()
    };
    let schema = TypeSet::OBJECT | TypeSet::BOOLEAN;
    vec![
        count("maxItems", BinOp::Gt, "more"),
        count("minItems", BinOp::Lt, "fewer"),
        KeywordDefinition::code(&["uniqueItems"], unique_items)
            .types(TypeSet::ARRAY)
            .schema_type(TypeSet::BOOLEAN)
            .data(),
        KeywordDefinition::code(&["prefixItems"], prefix_items).types(TypeSet::ARRAY).schema_type(TypeSet::ARRAY),
        KeywordDefinition::code(&["items"], items).types(TypeSet::ARRAY).schema_type(schema | TypeSet::ARRAY),
        KeywordDefinition::code(&["additionalItems"], additional_items).types(TypeSet::ARRAY).schema_type(schema),
        KeywordDefinition::code(&["contains"], contains).types(TypeSet::ARRAY).schema_type(schema),
    ]
}

fn len(cx: &KeywordCx<'_, '_>) -> Expr {
    Expr::call(Builtin::Len, vec![cx.data()])
}

fn item_count(cx: &mut KeywordCx<'_, '_>, fails: BinOp, comparison: &str) -> Result<(), CompileError> {
    let limit = cx.schema_code();
    let err = KwError::new(vec![
        Expr::str(format!("must NOT have {comparison} than ")),
        limit.clone(),
        Expr::str(" items"),
    ])
    .param("limit", limit.clone());
    cx.fail(bin(fails, len(cx), limit), err)
}

fn unique_items(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let found = if cx.is_data() {
        and(cx.schema_code(), Expr::call(Builtin::Duplicates, vec![cx.data()]))
    } else if cx.schema() == &Value::Bool(true) {
        Expr::call(Builtin::Duplicates, vec![cx.data()])
    } else {
        return Ok(());
    };
    let dup = cx.g.const_("dup", found)?;
    let i = Expr::from(&dup).prop(Expr::num(0));
    let j = Expr::from(&dup).prop(Expr::num(1));
    let err = KwError::new(vec![
        Expr::str("must NOT have duplicate items (items ## "),
        j.clone(),
        Expr::str(" and "),
        i.clone(),
        Expr::str(" are identical)"),
    ])
    .param("i", i)
    .param("j", j);
    cx.fail(Expr::from(&dup), err)
}

// ---- items ---- //

fn evaluated_items(items: Items) -> Evaluated {
    Evaluated { props: Props::Static(BTreeSet::new()), items }
}

/// Each schema checks the item at its index, when there is one.
fn tuple(cx: &mut KeywordCx<'_, '_>, schemas: &[Value]) -> Result<(), CompileError> {
    cx.merge_evaluated(evaluated_items(Items::Count(schemas.len())))?;
    let checked: Vec<(usize, &Value)> = schemas.iter().enumerate().filter(|(_, s)| !cx.always_valid(s)).collect();
    if checked.is_empty() {
        return Ok(());
    }
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    for (index, schema) in checked {
        cx.g.if_(bin(BinOp::Gt, len(cx), Expr::num(index as f64)));
        cx.subschema(Sub::at(schema, format!("/{index}")).prop(PathSeg::Index(index)), &valid)?;
        cx.g.end_if()?;
        cx.ok(Expr::from(&valid));
    }
    Ok(())
}

/// `schema` checks every item from index `start` on.
fn rest(cx: &mut KeywordCx<'_, '_>, schema: &Value, start: usize) -> Result<(), CompileError> {
    if !cx.always_valid(schema) {
        let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
        let i = cx.g.for_range("i", Expr::num(start as f64), len(cx))?;
        cx.subschema(Sub::at(schema, "").prop(PathSeg::DynIndex(i)), &valid)?;
        if !cx.all_errors() {
            cx.g.if_(not(Expr::from(&valid)));
            cx.g.break_();
            cx.g.end_if()?;
        }
        cx.g.end_for()?;
        cx.ok(Expr::from(&valid));
    }
    cx.merge_evaluated(evaluated_items(Items::All))
}

fn prefix_items(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::Array(schemas) = cx.schema() else { return Err(cx.invalid_value("an array of schemas")) };
    tuple(cx, schemas)
}

fn items(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    match (cx.schema(), cx.draft()) {
        (Value::Array(_), Draft::Draft2020) => Err(cx.invalid_value("a schema (use prefixItems for tuples)")),
        (Value::Array(schemas), Draft::Draft7) => tuple(cx, schemas),
        (schema, draft) => {
            let start = match (draft, cx.sibling("prefixItems")) {
                (Draft::Draft2020, Some(Value::Array(prefix))) => prefix.len(),
                _ => 0,
            };
            rest(cx, schema, start)
        }
    }
}

fn additional_items(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Some(Value::Array(tuple)) = cx.sibling("items") else {
        tracing::debug!(path = %cx.schema_path(), "additionalItems is ignored when items is not an array of schemas");
        return Ok(());
    };
    let n = tuple.len();
    let schema = cx.schema();
    if schema == &Value::Bool(false) {
        let err = KwError::new(format!("must NOT have more than {n} items")).param("limit", Expr::num(n as f64));
        cx.fail(bin(BinOp::Gt, len(cx), Expr::num(n as f64)), err)?;
        return cx.merge_evaluated(evaluated_items(Items::All));
    }
    rest(cx, schema, n)
}

// ---- contains ---- //

fn contains_bound(cx: &KeywordCx<'_, '_>, keyword: &str) -> Result<Option<u64>, CompileError> {
    if cx.draft() == Draft::Draft7 {
        return Ok(None);
    }
    match cx.sibling(keyword) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| CompileError::invalid_value(keyword, &cx.it.schema_path, "a non-negative integer")),
    }
}

fn contains(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let min = contains_bound(cx, "minContains")?.unwrap_or(1);
    let max = contains_bound(cx, "maxContains")?;
    let err = match max {
        None => KwError::new(format!("must contain at least {min} valid item(s)"))
            .param("minContains", Expr::num(min as f64)),
        Some(max) => KwError::new(format!("must contain at least {min} and no more than {max} valid item(s)"))
            .param("minContains", Expr::num(min as f64))
            .param("maxContains", Expr::num(max as f64)),
    };
    if let Some(max) = max {
        if max < min {
            return Err(cx.invalid_value("used with maxContains >= minContains"));
        }
    }
    let within = |count: Expr| {
        let above_min = bin(BinOp::Ge, count.clone(), Expr::num(min as f64));
        match max {
            Some(max) => and(above_min, bin(BinOp::Le, count, Expr::num(max as f64))),
            None => above_min,
        }
    };

    let schema = cx.schema();
    if cx.always_valid(schema) {
        return cx.pass(within(len(cx)), err);
    }
    if min == 0 && max.is_none() {
        return Ok(());
    }
    let errs = cx.errors_mark()?;
    let count = cx.g.let_("count", Some(Expr::num(0)))?;
    let valid = cx.g.let_("valid", Some(Expr::FALSE))?;
    let i = cx.g.for_range("i", Expr::num(0), len(cx))?;
    cx.subschema(Sub::at(schema, "").prop(PathSeg::DynIndex(i)).composite(), &valid)?;
    cx.g.if_(Expr::from(&valid));
    cx.g.assign(&count, bin(BinOp::Add, &count, Expr::num(1)));
    match max {
        None => {
            cx.g.if_(bin(BinOp::Ge, &count, Expr::num(min as f64)));
            cx.g.break_();
            cx.g.end_if()?;
        }
        Some(max) => {
            cx.g.if_(bin(BinOp::Gt, &count, Expr::num(max as f64)));
            cx.g.break_();
            cx.g.end_if()?;
        }
    }
    cx.g.end_if()?;
    cx.g.end_for()?;
    cx.g.assign(&valid, within(Expr::from(&count)));
    cx.result(Expr::from(&valid), err, Some(&errs))
}

#[cfg(test)]
mod tests {
    use crate::{Options, SchemaRegistry};
    use serde_json::json;

    #[test]
    fn item_counts() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"minItems": 1, "maxItems": 2})).unwrap();
        assert!(v.is_valid(&json!([1])).unwrap());
        assert!(v.is_valid(&json!("not an array")).unwrap());
        assert_eq!(v.validate(&json!([])).unwrap().errors[0].message, "must NOT have fewer than 1 items");
        assert_eq!(v.validate(&json!([1, 2, 3])).unwrap().errors[0].params["limit"], json!(2));
    }

    #[test]
    fn unique_items_names_the_pair() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"uniqueItems": true})).unwrap();
        assert!(v.is_valid(&json!([1, "1", {"a": 1}, {"a": 2}])).unwrap());
        let out = v.validate(&json!([1, 2, 1.0])).unwrap();
        assert_eq!(out.errors[0].message, "must NOT have duplicate items (items ## 2 and 0 are identical)");
        assert_eq!(out.errors[0].params["i"], json!(0));
        assert_eq!(out.errors[0].params["j"], json!(2));
        assert!(reg.compile(json!({"uniqueItems": false})).unwrap().is_valid(&json!([1, 1])).unwrap());
    }

    #[test]
    fn draft7_tuples_and_additional_items() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(json!({"items": [{"type": "number"}, {"type": "string"}], "additionalItems": false}))
            .unwrap();
        assert!(v.is_valid(&json!([1])).unwrap());
        assert!(v.is_valid(&json!([1, "a"])).unwrap());
        let out = v.validate(&json!([1, 2])).unwrap();
        assert_eq!(out.errors[0].instance_path, "/1");
        assert_eq!(out.errors[0].schema_path, "#/items/1/type");
        let out = v.validate(&json!([1, "a", 3])).unwrap();
        assert_eq!(out.errors[0].message, "must NOT have more than 2 items");
    }

    #[test]
    fn items_schema_checks_every_item() {
        let mut reg = SchemaRegistry::with_options(Options { all_errors: true, ..Options::default() });
        let v = reg.compile(json!({"items": {"type": "integer"}})).unwrap();
        let out = v.validate(&json!([1, "a", 2, null])).unwrap();
        let paths: Vec<_> = out.errors.iter().map(|e| e.instance_path.as_str()).collect();
        assert_eq!(paths, ["/1", "/3"]);
    }

    #[test]
    fn draft2020_prefix_items() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "prefixItems": [{"type": "string"}],
                "items": {"type": "number"}
            }))
            .unwrap();
        assert!(v.is_valid(&json!(["a", 1, 2])).unwrap());
        let out = v.validate(&json!(["a", 1, "b"])).unwrap();
        assert_eq!(out.errors[0].instance_path, "/2");
        assert_eq!(out.errors[0].schema_path, "#/items/type");
        assert!(
            reg.compile(json!({"$schema": "https://json-schema.org/draft/2020-12/schema", "items": [true]}))
                .is_err()
        );
    }

    #[test]
    fn contains_discards_item_errors_on_success() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"contains": {"type": "string"}})).unwrap();
        let out = v.validate(&json!([1, "a"])).unwrap();
        assert!(out.valid);
        assert!(out.errors.is_empty());
        let out = v.validate(&json!([1, 2])).unwrap();
        let last = out.errors.last().unwrap();
        assert_eq!(last.keyword, "contains");
        assert_eq!(last.message, "must contain at least 1 valid item(s)");
    }

    #[test]
    fn min_and_max_contains() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "contains": {"const": 1},
                "minContains": 2,
                "maxContains": 3
            }))
            .unwrap();
        assert!(!v.is_valid(&json!([1, 2])).unwrap());
        assert!(v.is_valid(&json!([1, 1, 2])).unwrap());
        assert!(!v.is_valid(&json!([1, 1, 1, 1])).unwrap());
        let out = v.validate(&json!([])).unwrap();
        assert_eq!(out.errors[0].message, "must contain at least 2 and no more than 3 valid item(s)");
        let params: Vec<_> = out.errors[0].params.keys().map(String::as_str).collect();
        assert_eq!(params, ["minContains", "maxContains"]);
    }
}
