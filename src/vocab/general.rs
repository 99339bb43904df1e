//! Type-independent keywords: `$ref`, `const`, `enum`.
use serde_json::Value;

use crate::compile::{Evaluated, Items, KeywordCx, KwError, Props, Sub};
use crate::error::{CompileError, ResolveError};
use crate::ir::{Builtin, Expr, Name, not, or_all};
use crate::resolve::inlineable;
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

/// Enums longer than this are checked in a loop over the captured array.
const LOOP_ENUM: usize = 8;

pub(crate) fn definitions() -> Vec<KeywordDefinition> {
    vec![
        KeywordDefinition::code(&["$ref"], reference).schema_type(TypeSet::STRING),
        KeywordDefinition::code(&["const"], constant).data(),
        KeywordDefinition::code(&["enum"], enumeration).schema_type(TypeSet::ARRAY).data(),
    ]
}

// ---- $ref ---- //

fn reference(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let Value::String(reference) = cx.schema() else { return Err(cx.invalid_value("a string")) };
    let base = cx.it.base.clone();
    let target = cx.c.resolver.resolve(&base, reference)?;
    let (doc, draft) = cx.c.resolver.schema_at(&target).ok_or_else(|| ResolveError::Unresolved {
        reference: reference.clone(),
        base: base.to_string(),
    })?;
    let Some(schema) = doc.pointer(&target.pointer) else {
        return Err(ResolveError::InvalidPointer(target.pointer.clone()).into());
    };
    let is_async = schema.get("$async").and_then(Value::as_bool).unwrap_or(false);

    if !is_async && inlineable(schema, cx.c.opts.inline_refs) {
        tracing::trace!(reference = %reference, "inlining $ref");
        let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
        let sub = Sub::at(schema, "").located(reference.clone(), target.base.clone(), draft);
        let ev = cx.subschema(sub, &valid)?;
        cx.merge_evaluated(ev)?;
        cx.ok(Expr::from(&valid));
        return Ok(());
    }

    let callee = cx.c.unit(&target)?;
    if callee.is_async && !cx.unit.is_async {
        return Err(CompileError::AsyncFromSync { path: cx.schema_path() });
    }
    let call = Expr::Invoke(callee.name.clone(), cx.it.call_args());
    let evaluated = cx.c.static_evaluated(&callee);
    if callee.is_async {
        let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
        cx.g.try_();
        cx.g.expr(Expr::Await(Box::new(call)));
        merge_callee(cx, evaluated)?;
        let e = cx.g.catch_("e")?;
        cx.g.expr(Expr::call(Builtin::AppendThrownErrors, vec![Expr::from(&e)]));
        cx.g.assign(&valid, Expr::FALSE);
        cx.g.end_try()?;
        cx.ok(Expr::from(&valid));
        return Ok(());
    }
    let valid = cx.g.const_("valid", call)?;
    cx.g.if_(not(Expr::from(&valid)));
    cx.g.expr(Expr::call(Builtin::AppendCalleeErrors, Vec::new()));
    crate::compile::context::fail_exit(cx.g, cx.it, cx.unit);
    cx.g.else_()?;
    merge_callee(cx, evaluated)?;
    if cx.all_errors() {
        cx.g.end_if()?;
    }
    Ok(())
}

/// Merge what the unit just called evaluated: statically when it is known
/// at compile time, else from what the call left behind.
fn merge_callee(cx: &mut KeywordCx<'_, '_>, evaluated: Option<Evaluated>) -> Result<(), CompileError> {
    if !cx.tracks_evaluated() {
        return Ok(());
    }
    let ev = match evaluated {
        Some(ev) => ev,
        None => {
            let props: Name = cx.g.const_("props", Expr::call(Builtin::CalleeProps, Vec::new()))?;
            let items: Name = cx.g.const_("items", Expr::call(Builtin::CalleeItems, Vec::new()))?;
            Evaluated { props: Props::Dynamic(props), items: Items::Dynamic(items) }
        }
    };
    cx.merge_evaluated(ev)
}

// ---- const / enum ---- //

fn constant(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let cond = Expr::call(Builtin::Equal, vec![cx.data(), cx.schema_code()]);
    let err = KwError::new("must be equal to constant").param("allowedValue", cx.schema_code());
    cx.pass(cond, err)
}

fn enumeration(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let err = KwError::new("must be equal to one of the allowed values").param("allowedValues", cx.schema_code());
    let values = match cx.schema() {
        _ if cx.is_data() => None,
        Value::Array(values) if values.is_empty() => return Err(cx.invalid_value("a non-empty array")),
        Value::Array(values) => Some(values),
        _ => return Err(cx.invalid_value("an array")),
    };
    match values {
        Some(values) if values.len() <= LOOP_ENUM => {
            let data = cx.data();
            let cond = or_all(values.iter().map(|v| Expr::call(Builtin::Equal, vec![data.clone(), Expr::json(v)])));
            cx.pass(cond, err)
        }
        _ => {
            let valid = cx.g.let_("valid", Some(Expr::FALSE))?;
            let item = cx.g.for_values("item", cx.schema_code())?;
            cx.g.if_(Expr::call(Builtin::Equal, vec![cx.data(), Expr::from(&item)]));
            cx.g.assign(&valid, Expr::TRUE);
            cx.g.break_();
            cx.g.end_if()?;
            cx.g.end_for()?;
            cx.pass(Expr::from(&valid), err)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Options, SchemaRegistry};
    use serde_json::json;

    #[test]
    fn enum_and_const() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"enum": [1, "a", null]})).unwrap();
        assert!(v.is_valid(&json!(1.0)).unwrap());
        assert!(v.is_valid(&json!(null)).unwrap());
        let out = v.validate(&json!("b")).unwrap();
        assert_eq!(out.errors[0].keyword, "enum");
        assert_eq!(out.errors[0].params["allowedValues"], json!([1, "a", null]));

        let v = reg.compile(json!({"const": {"a": [1]}})).unwrap();
        assert!(v.is_valid(&json!({"a": [1]})).unwrap());
        assert_eq!(v.validate(&json!({"a": [2]})).unwrap().errors[0].message, "must be equal to constant");
    }

    #[test]
    fn long_enums_loop() {
        let mut reg = SchemaRegistry::new();
        let values: Vec<_> = (0..20).collect();
        let v = reg.compile(json!({"enum": values})).unwrap();
        assert!(v.is_valid(&json!(19)).unwrap());
        assert!(!v.is_valid(&json!(20)).unwrap());
    }

    #[test]
    fn refs_inline_or_call() {
        let schema = json!({
            "definitions": {"name": {"type": "string", "minLength": 1}},
            "properties": {"a": {"$ref": "#/definitions/name"}}
        });
        let mut reg = SchemaRegistry::new();
        let inlined = reg.compile(schema.clone()).unwrap();
        assert!(!inlined.source().contains("validate1"));
        let out = inlined.validate(&json!({"a": ""})).unwrap();
        assert_eq!(out.errors[0].schema_path, "#/definitions/name/minLength");
        assert_eq!(out.errors[0].instance_path, "/a");

        let mut reg = SchemaRegistry::with_options(Options {
            inline_refs: crate::options::InlineRefs::Never,
            ..Options::default()
        });
        let called = reg.compile(schema).unwrap();
        assert!(called.source().contains("appendCalleeErrors"));
        let out = called.validate(&json!({"a": ""})).unwrap();
        assert_eq!(out.errors[0].schema_path, "#/definitions/name/minLength");
        assert_eq!(out.errors[0].instance_path, "/a");
    }

    #[test]
    fn unresolvable_refs_fail_to_compile() {
        let mut reg = SchemaRegistry::new();
        assert!(reg.compile(json!({"$ref": "#/definitions/missing"})).is_err());
    }
}
