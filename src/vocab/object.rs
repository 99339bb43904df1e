//! Object keywords.
use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::compile::{Evaluated, Items, KeywordCx, KwError, PathSeg, Props, Sub};
use crate::error::CompileError;
use crate::ir::{BinOp, Builtin, Expr, and, bin, eq, is_undef, not, or_all};
use crate::resolve::escape_pointer;
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

/// With more declared properties than this, `additionalProperties` looks keys
/// up in the `properties` object instead of comparing them one by one.
const LOOKUP_PROPERTIES: usize = 8;

pub(crate) fn definitions() -> Vec<KeywordDefinition> {
    let count = |keyword: &'static str, fails: BinOp, comparison: &'static str| {
        KeywordDefinition::code(&[keyword], move |cx| property_count(cx, fails, comparison))
            .types(TypeSet::OBJECT)
            .schema_type(TypeSet::NUMBER)
            .data()
    };
    let object = |keyword: &'static str, f: fn(&mut KeywordCx<'_, '_>) -> Result<(), CompileError>| {
        KeywordDefinition::code(&[keyword], f).types(TypeSet::OBJECT)
    };
    vec![
        count("maxProperties", BinOp::Gt, "more"),
        count("minProperties", BinOp::Lt, "fewer"),
        object("required", required).schema_type(TypeSet::ARRAY),
        object("dependentRequired", dependent_required).schema_type(TypeSet::OBJECT),
        object("dependencies", dependencies).schema_type(TypeSet::OBJECT),
        object("dependentSchemas", dependent_schemas).schema_type(TypeSet::OBJECT),
        object("propertyNames", property_names).schema_type(TypeSet::OBJECT | TypeSet::BOOLEAN),
        object("additionalProperties", additional_properties).schema_type(TypeSet::OBJECT | TypeSet::BOOLEAN),
        object("properties", properties).schema_type(TypeSet::OBJECT),
        object("patternProperties", pattern_properties).schema_type(TypeSet::OBJECT),
    ]
}

fn property_count(cx: &mut KeywordCx<'_, '_>, fails: BinOp, comparison: &str) -> Result<(), CompileError> {
    let limit = cx.schema_code();
    let err = KwError::new(vec![
        Expr::str(format!("must NOT have {comparison} than ")),
        limit.clone(),
        Expr::str(" properties"),
    ])
    .param("limit", limit.clone());
    cx.fail(bin(fails, Expr::call(Builtin::Len, vec![cx.data()]), limit), err)
}

fn property(cx: &KeywordCx<'_, '_>, name: &str) -> Expr {
    cx.data().prop(Expr::str(name))
}

fn strings<'v>(cx: &KeywordCx<'_, '_>, values: &'v [Value]) -> Result<Vec<&'v str>, CompileError> {
    values.iter().map(|v| v.as_str().ok_or_else(|| cx.invalid_value("an array of strings"))).collect()
}

// ---- required / dependencies ---- //

fn required(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::Array(names) = cx.schema() else { return Err(cx.invalid_value("an array")) };
    for name in strings(cx, names)? {
        let err = KwError::new(format!("must have required property '{name}'")).param("missingProperty", Expr::str(name));
        let missing = is_undef(property(cx, name));
        cx.fail(missing, err)?;
    }
    Ok(())
}

fn dependent_required(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::Object(deps) = cx.schema() else { return Err(cx.invalid_value("an object")) };
    for value in deps.values() {
        if !value.is_array() {
            return Err(cx.invalid_value("an object of string arrays"));
        }
    }
    property_deps(cx, deps)
}

/// Draft-07 `dependencies`: arrays are property dependencies, everything
/// else a schema dependency.
fn dependencies(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::Object(deps) = cx.schema() else { return Err(cx.invalid_value("an object")) };
    property_deps(cx, deps)?;
    schema_deps(cx, deps)
}

fn dependent_schemas(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::Object(deps) = cx.schema() else { return Err(cx.invalid_value("an object")) };
    schema_deps(cx, deps)
}

fn property_deps(cx: &mut KeywordCx<'_, '_>, deps: &Map<String, Value>) -> Result<(), CompileError> {
    for (prop, value) in deps {
        let Value::Array(names) = value else { continue };
        let names = strings(cx, names)?;
        if names.is_empty() {
            continue;
        }
        let noun = if names.len() == 1 { "property" } else { "properties" };
        let list = names.join(", ");
        let present = not(is_undef(property(cx, prop)));
        for name in &names {
            let err = KwError::new(format!("must have {noun} {list} when property {prop} is present"))
                .param("property", Expr::str(prop.as_str()))
                .param("missingProperty", Expr::str(*name))
                .param("depsCount", Expr::num(names.len() as f64))
                .param("deps", Expr::str(list.as_str()));
            let missing = and(present.clone(), is_undef(property(cx, name)));
            cx.fail(missing, err)?;
        }
    }
    Ok(())
}

fn schema_deps(cx: &mut KeywordCx<'_, '_>, deps: &Map<String, Value>) -> Result<(), CompileError> {
    for (prop, schema) in deps {
        if !(schema.is_object() || schema.is_boolean()) || cx.always_valid(schema) {
            continue;
        }
        let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
        let applied = cx.g.let_("valid", Some(Expr::FALSE))?;
        cx.g.if_(not(is_undef(property(cx, prop))));
        let ev = cx.subschema(Sub::at(schema, format!("/{}", escape_pointer(prop))), &valid)?;
        cx.g.assign(&applied, Expr::from(&valid));
        cx.g.end_if()?;
        cx.merge_valid_evaluated(ev, &applied)?;
        cx.ok(Expr::from(&valid));
    }
    Ok(())
}

// ---- property names ---- //

fn property_names(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let schema = cx.schema();
    if cx.always_valid(schema) {
        return Ok(());
    }
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    let key = cx.g.for_keys("key", cx.data())?;
    let sub = Sub::at(schema, "").value(Expr::from(&key), PathSeg::DynKey(key.clone()), TypeSet::STRING).composite();
    cx.subschema(sub, &valid)?;
    cx.g.if_(not(Expr::from(&valid)));
    cx.error(KwError::new("property name must be valid").param("propertyName", Expr::from(&key)))?;
    if !cx.all_errors() {
        cx.g.break_();
    }
    cx.g.end_if()?;
    cx.g.end_for()?;
    cx.ok(Expr::from(&valid));
    Ok(())
}

// ---- properties ---- //

fn properties(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::Object(schemas) = cx.schema() else { return Err(cx.invalid_value("an object")) };
    if cx.tracks_evaluated() && !schemas.is_empty() {
        let keys: BTreeSet<String> = schemas.keys().cloned().collect();
        cx.merge_evaluated(Evaluated { props: Props::Static(keys), items: Items::Count(0) })?;
    }
    let checked: Vec<(&String, &Value)> = schemas.iter().filter(|(_, s)| !cx.always_valid(s)).collect();
    if checked.is_empty() {
        return Ok(());
    }
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    for (name, schema) in checked {
        cx.g.if_(not(is_undef(property(cx, name))));
        let sub = Sub::at(schema, format!("/{}", escape_pointer(name))).prop(PathSeg::Key(name.clone()));
        cx.subschema(sub, &valid)?;
        cx.g.end_if()?;
        cx.ok(Expr::from(&valid));
    }
    Ok(())
}

fn pattern_properties(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::Object(schemas) = cx.schema() else { return Err(cx.invalid_value("an object")) };
    let track = cx.tracks_evaluated() && cx.props() != &Props::All;
    let all_trivial = schemas.values().all(|s| cx.always_valid(s));
    if schemas.is_empty() || (all_trivial && !track) {
        return Ok(());
    }
    if track {
        cx.dynamic_props()?;
    }
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    for (source, schema) in schemas {
        let re = cx.pattern(source)?;
        let trivial = cx.always_valid(schema);
        let key = cx.g.for_keys("key", cx.data())?;
        cx.g.if_(Expr::Invoke(re, vec![Expr::from(&key)]));
        if !trivial {
            let sub = Sub::at(schema, format!("/{}", escape_pointer(source))).prop(PathSeg::DynKey(key.clone()));
            cx.subschema(sub, &valid)?;
        }
        if track {
            cx.mark_prop(Expr::from(&key))?;
        } else if !trivial && !cx.all_errors() {
            cx.g.if_(not(Expr::from(&valid)));
            cx.g.break_();
            cx.g.end_if()?;
        }
        cx.g.end_if()?;
        cx.g.end_for()?;
        cx.ok(Expr::from(&valid));
    }
    Ok(())
}

fn additional_properties(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let schema = cx.schema();
    let errs = cx.errors_mark()?;
    let trivial = cx.always_valid(schema);
    if !trivial {
        let declared: Vec<&String> = match cx.sibling("properties") {
            Some(Value::Object(props)) => props.keys().collect(),
            _ => Vec::new(),
        };
        let patterns: Vec<&String> = match cx.sibling("patternProperties") {
            Some(Value::Object(pats)) => pats.keys().collect(),
            _ => Vec::new(),
        };
        let key = cx.g.for_keys("key", cx.data())?;
        let mut known = Vec::new();
        if declared.len() > LOOKUP_PROPERTIES {
            let props = cx.sibling("properties").map(Expr::json).unwrap_or(Expr::UNDEF);
            known.push(Expr::call(Builtin::HasProp, vec![props, Expr::from(&key)]));
        } else {
            known.extend(declared.iter().map(|p| eq(&key, Expr::str(p.as_str()))));
        }
        for source in patterns {
            let re = cx.pattern(source)?;
            known.push(Expr::Invoke(re, vec![Expr::from(&key)]));
        }
        let guarded = !known.is_empty();
        if guarded {
            cx.g.if_(not(or_all(known)));
        }
        additional_property(cx, schema, &key)?;
        if guarded {
            cx.g.end_if()?;
        }
        cx.g.end_for()?;
        cx.ok(eq(&errs, crate::compile::context::error_count()));
    }
    cx.merge_evaluated(Evaluated { props: Props::All, items: Items::Count(0) })?;
    Ok(())
}

fn additional_property(cx: &mut KeywordCx<'_, '_>, schema: &Value, key: &crate::ir::Name) -> Result<(), CompileError> {
    if schema == &Value::Bool(false) {
        let err = KwError::new("must NOT have additional properties").param("additionalProperty", Expr::from(key));
        cx.error(err)?;
        if !cx.all_errors() {
            cx.g.break_();
        }
        return Ok(());
    }
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    cx.subschema(Sub::at(schema, "").prop(PathSeg::DynKey(key.clone())), &valid)?;
    if !cx.all_errors() {
        cx.g.if_(not(Expr::from(&valid)));
        cx.g.break_();
        cx.g.end_if()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Options, SchemaRegistry};
    use serde_json::json;

    #[test]
    fn required_reports_the_first_missing_property() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"type": "object", "required": ["a", "b"]})).unwrap();
        let out = v.validate(&json!({})).unwrap();
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "must have required property 'a'");
        assert_eq!(out.errors[0].params["missingProperty"], json!("a"));

        let mut all = SchemaRegistry::with_options(Options { all_errors: true, ..Options::default() });
        let v = all.compile(json!({"type": "object", "required": ["a", "b"]})).unwrap();
        assert_eq!(v.validate(&json!({})).unwrap().errors.len(), 2);
    }

    #[test]
    fn property_dependencies() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"dependencies": {"card": ["billing", "zip"]}})).unwrap();
        assert!(v.is_valid(&json!({"name": "x"})).unwrap());
        let out = v.validate(&json!({"card": 1, "billing": 2})).unwrap();
        assert_eq!(out.errors[0].message, "must have properties billing, zip when property card is present");
        assert_eq!(out.errors[0].params["missingProperty"], json!("zip"));
        assert_eq!(out.errors[0].params["depsCount"], json!(2));
    }

    #[test]
    fn schema_dependencies() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"dependentSchemas": {"a": {"required": ["b"]}}})).unwrap();
        assert!(v.is_valid(&json!({"c": 1})).unwrap());
        assert!(!v.is_valid(&json!({"a": 1})).unwrap());
        assert!(v.is_valid(&json!({"a": 1, "b": 2})).unwrap());
    }

    #[test]
    fn additional_properties_false_names_the_property() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(json!({
                "properties": {"a": {"type": "number"}},
                "patternProperties": {"^x-": true},
                "additionalProperties": false
            }))
            .unwrap();
        assert!(v.is_valid(&json!({"a": 1, "x-tag": "t"})).unwrap());
        let out = v.validate(&json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(out.errors[0].keyword, "additionalProperties");
        assert_eq!(out.errors[0].params["additionalProperty"], json!("b"));
        assert_eq!(out.errors[0].instance_path, "");
    }

    #[test]
    fn additional_property_schemas_see_the_property() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"additionalProperties": {"type": "string"}})).unwrap();
        let out = v.validate(&json!({"a": "x", "b/c": 1})).unwrap();
        assert_eq!(out.errors[0].instance_path, "/b~1c");
        assert_eq!(out.errors[0].schema_path, "#/additionalProperties/type");
    }

    #[test]
    fn property_names_keep_the_inner_error() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"propertyNames": {"maxLength": 3}})).unwrap();
        assert!(v.is_valid(&json!({"abc": 1})).unwrap());
        let out = v.validate(&json!({"abcd": 1})).unwrap();
        assert_eq!(out.errors.len(), 2);
        assert_eq!(out.errors[0].keyword, "maxLength");
        assert_eq!(out.errors[1].message, "property name must be valid");
        assert_eq!(out.errors[1].params["propertyName"], json!("abcd"));
    }

    #[test]
    fn pattern_properties_apply_to_matching_keys() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"patternProperties": {"^n_": {"type": "number"}}})).unwrap();
        assert!(v.is_valid(&json!({"n_a": 1, "s": "x"})).unwrap());
        let out = v.validate(&json!({"n_a": "1"})).unwrap();
        assert_eq!(out.errors[0].instance_path, "/n_a");
        assert_eq!(out.errors[0].schema_path, "#/patternProperties/^n_/type");
    }

    #[test]
    fn min_and_max_properties() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"minProperties": 1, "maxProperties": 2})).unwrap();
        assert!(v.is_valid(&json!({"a": 1})).unwrap());
        assert_eq!(v.validate(&json!({})).unwrap().errors[0].message, "must NOT have fewer than 1 properties");
        assert_eq!(v.validate(&json!({"a": 1, "b": 2, "c": 3})).unwrap().errors[0].keyword, "maxProperties");
    }
}
