//! `unevaluatedProperties` and `unevaluatedItems`. They run last, once every
//! other keyword of the schema has had its say about what it evaluated.
use serde_json::Value;

use crate::compile::{Items, KeywordCx, KwError, PathSeg, Props, Sub};
use crate::error::CompileError;
use crate::ir::{BinOp, Builtin, Expr, Name, bin, eq, not};
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

pub(crate) fn definitions() -> Vec<KeywordDefinition> {
    let schema = TypeSet::OBJECT | TypeSet::BOOLEAN;
    vec![
        KeywordDefinition::code(&["unevaluatedProperties"], unevaluated_properties).schema_type(schema).post(),
        KeywordDefinition::code(&["unevaluatedItems"], unevaluated_items).schema_type(schema).post(),
    ]
}

/// Open an `if` on the data type unless it is already known.
fn guard_type(cx: &mut KeywordCx<'_, '_>, types: TypeSet) -> bool {
    let known = cx.data_types();
    if !known.is_empty() && known.types().all(|t| types.admits(t)) {
        return false;
    }
    let check = Expr::call(Builtin::TypeIs(types), vec![cx.data()]);
    cx.g.if_(check);
    true
}

fn require_tracking(cx: &KeywordCx<'_, '_>) -> Result<(), CompileError> {
    if cx.tracks_evaluated() {
        Ok(())
    } else {
        Err(cx.invalid_value("used with the unevaluated option enabled"))
    }
}

fn break_unless_valid(cx: &mut KeywordCx<'_, '_>, valid: &Name) -> Result<(), CompileError> {
    if !cx.all_errors() {
        cx.g.if_(not(Expr::from(valid)));
        cx.g.break_();
        cx.g.end_if()?;
    }
    Ok(())
}

fn unevaluated_properties(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    require_tracking(cx)?;
    let schema = cx.schema();
    let props = cx.props().clone();
    if props == Props::All || cx.always_valid(schema) {
        cx.set_props(Props::All);
        return Ok(());
    }
    let errs = cx.errors_mark()?;
    let guarded = guard_type(cx, TypeSet::OBJECT);
    let key = cx.g.for_keys("key", cx.data())?;
    let unevaluated = !props.is_empty();
    if unevaluated {
        cx.g.if_(not(Expr::call(Builtin::IsEvaluated, vec![props.expr(), Expr::from(&key)])));
    }
    if schema == &Value::Bool(false) {
        let err = KwError::new("must NOT have unevaluated properties").param("unevaluatedProperty", Expr::from(&key));
        cx.error(err)?;
        if !cx.all_errors() {
            cx.g.break_();
        }
    } else {
        let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
        cx.subschema(Sub::at(schema, "").prop(PathSeg::DynKey(key.clone())), &valid)?;
        break_unless_valid(cx, &valid)?;
    }
    if unevaluated {
        cx.g.end_if()?;
    }
    cx.g.end_for()?;
    if guarded {
        cx.g.end_if()?;
    }
    cx.set_props(Props::All);
    cx.ok(eq(&errs, crate::compile::context::error_count()));
    Ok(())
}

fn unevaluated_items(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    require_tracking(cx)?;
    let schema = cx.schema();
    let start = match cx.items() {
        Items::All => return Ok(()),
        Items::Count(n) => Expr::num(*n as f64),
        // `true` once everything is evaluated, which no index is below
        Items::Dynamic(var) => Expr::from(var),
    };
    if cx.always_valid(schema) {
        cx.set_items(Items::All);
        return Ok(());
    }
    let errs = cx.errors_mark()?;
    let guarded = guard_type(cx, TypeSet::ARRAY);
    let len = Expr::call(Builtin::Len, vec![cx.data()]);
    if schema == &Value::Bool(false) {
        let err = KwError::new(vec![Expr::str("must NOT have more than "), start.clone(), Expr::str(" items")])
            .param("limit", start.clone());
        cx.g.if_(bin(BinOp::Gt, len, start));
        cx.error(err)?;
        cx.g.end_if()?;
    } else {
        let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
        let i = cx.g.for_range("i", start, len)?;
        cx.subschema(Sub::at(schema, "").prop(PathSeg::DynIndex(i)), &valid)?;
        break_unless_valid(cx, &valid)?;
        cx.g.end_for()?;
    }
    if guarded {
        cx.g.end_if()?;
    }
    cx.set_items(Items::All);
    cx.ok(eq(&errs, crate::compile::context::error_count()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Options, SchemaRegistry};
    use serde_json::{Value, json};

    fn draft2020(schema: Value) -> Value {
        let mut schema = schema;
        schema["$schema"] = json!("https://json-schema.org/draft/2020-12/schema");
        schema
    }

    #[test]
    fn static_properties_are_known_at_compile_time() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(draft2020(json!({
                "properties": {"a": true},
                "allOf": [{"properties": {"b": true}}],
                "unevaluatedProperties": false
            })))
            .unwrap();
        assert!(v.is_valid(&json!({"a": 1, "b": 2})).unwrap());
        let out = v.validate(&json!({"a": 1, "c": 3})).unwrap();
        assert_eq!(out.errors[0].message, "must NOT have unevaluated properties");
        assert_eq!(out.errors[0].params["unevaluatedProperty"], json!("c"));
    }

    #[test]
    fn only_passing_branches_count() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(draft2020(json!({
                "anyOf": [
                    {"properties": {"a": {"type": "string"}}, "required": ["a"]},
                    {"properties": {"b": {"type": "string"}}, "required": ["b"]}
                ],
                "unevaluatedProperties": false
            })))
            .unwrap();
        assert!(v.is_valid(&json!({"a": "x"})).unwrap());
        assert!(v.is_valid(&json!({"a": "x", "b": "y"})).unwrap());
        assert!(!v.is_valid(&json!({"a": "x", "b": 1})).unwrap());
    }

    #[test]
    fn if_then_else_evaluations() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(draft2020(json!({
                "if": {"properties": {"kind": {"const": "a"}}, "required": ["kind"]},
                "then": {"properties": {"a": true}},
                "else": {"properties": {"b": true}},
                "unevaluatedProperties": false
            })))
            .unwrap();
        assert!(v.is_valid(&json!({"kind": "a", "a": 1})).unwrap());
        assert!(!v.is_valid(&json!({"kind": "a", "b": 1})).unwrap());
        assert!(v.is_valid(&json!({"b": 1})).unwrap());
    }

    #[test]
    fn pattern_properties_are_tracked_at_runtime() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(draft2020(json!({
                "properties": {"id": true},
                "patternProperties": {"^x-": true},
                "unevaluatedProperties": {"type": "number"}
            })))
            .unwrap();
        assert!(v.is_valid(&json!({"id": "s", "x-a": "s", "n": 1})).unwrap());
        let out = v.validate(&json!({"id": "s", "n": "1"})).unwrap();
        assert_eq!(out.errors[0].instance_path, "/n");
        assert_eq!(out.errors[0].schema_path, "#/unevaluatedProperties/type");
    }

    #[test]
    fn evaluations_flow_through_refs() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(draft2020(json!({
                "$defs": {"base": {"properties": {"a": true}}},
                "$ref": "#/$defs/base",
                "properties": {"b": true},
                "unevaluatedProperties": false
            })))
            .unwrap();
        assert!(v.is_valid(&json!({"a": 1, "b": 2})).unwrap());
        assert!(!v.is_valid(&json!({"a": 1, "c": 2})).unwrap());
    }

    #[test]
    fn unevaluated_items_after_prefix() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(draft2020(json!({"prefixItems": [{"type": "string"}], "unevaluatedItems": false})))
            .unwrap();
        assert!(v.is_valid(&json!(["a"])).unwrap());
        let out = v.validate(&json!(["a", 1])).unwrap();
        assert_eq!(out.errors[0].message, "must NOT have more than 1 items");

        let v = reg.compile(draft2020(json!({"unevaluatedItems": {"type": "number"}}))).unwrap();
        assert!(v.is_valid(&json!([1, 2])).unwrap());
        assert_eq!(v.validate(&json!([1, "b"])).unwrap().errors[0].instance_path, "/1");
    }

    #[test]
    fn tracking_can_be_switched_off() {
        let mut reg = SchemaRegistry::with_options(Options { unevaluated: false, ..Options::default() });
        assert!(reg.compile(json!({"unevaluatedProperties": false})).is_err());
    }
}
