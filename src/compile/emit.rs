//! Emission of one schema object: keyword checks, the up-front type check
//! (with coercion), then each rule group in vocabulary order.
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::codegen::{Captured, CodeGen};
use crate::compile::context::{CxState, KeywordCx, KwError, SchemaCx, Sub, error_count, report};
use crate::compile::{Compiler, UnitInfo, data};
use crate::error::CompileError;
use crate::ir::{Builtin, Expr, eq, is_undef, not};
use crate::options::{CoerceTypes, Draft};
use crate::resolve::escape_pointer;
use crate::types::{JsonType, TypeSet};
use crate::vocab::{AsyncValidateFn, KeywordDefinition, KeywordKind, MacroFn, ValidateFn, Vocabulary};

/// Types a mismatching value may be coerced to.
const COERCIBLE: &[JsonType] = &[JsonType::String, JsonType::Number, JsonType::Integer, JsonType::Boolean, JsonType::Null];

pub(crate) fn schema(
    c: &mut Compiler,
    g: &mut CodeGen,
    unit: &UnitInfo,
    it: &SchemaCx<'_>,
    st: &mut CxState,
) -> Result<(), CompileError> {
    let map = match it.schema {
        Value::Bool(true) => return Ok(()),
        Value::Bool(false) => {
            let record = it.error_record("false schema", &it.schema_path, Vec::new(), Expr::str("boolean schema is false"));
            report(g, it, unit, record);
            return Ok(());
        }
        Value::Object(map) => map,
        _ => return Err(CompileError::InvalidSchema { path: it.schema_path.clone() }),
    };
    if map.is_empty() {
        return Ok(());
    }
    let vocab = c.vocab.clone();
    check_keywords(c, &vocab, it, map)?;

    if it.draft == Draft::Draft7 {
        if let Some(def) = map.contains_key("$ref").then(|| vocab.get("$ref")).flatten() {
            let ignored = map
                .keys()
                .any(|k| k != "$ref" && vocab.get(k).is_some_and(|d| !matches!(d.kind, KeywordKind::Annotation)));
            if ignored {
                tracing::warn!(path = %it.schema_path, "$ref: keywords ignored in schema at path");
            }
            let def = def.clone();
            return keyword(c, g, unit, it, st, "$ref", &def, map);
        }
    }

    let types = declared_types(c, it, map)?;
    let depth = g.depth();
    if !types.is_empty() {
        check_type(c, g, unit, it, st, types, map)?;
    }
    for group in vocab.groups() {
        if let Some(group_types) = group.types {
            if !types.is_empty() && !types.overlaps(group_types) {
                continue;
            }
        }
        let rules: Vec<_> = group.rules.iter().filter(|r| map.contains_key(&r.keyword)).collect();
        if rules.is_empty() {
            continue;
        }
        let group_depth = g.depth();
        if let Some(group_types) = group.types {
            let known = !st.data_types.is_empty() && st.data_types.types().all(|t| group_types.admits(t));
            if !known {
                g.if_(Expr::call(Builtin::TypeIs(group_types), vec![Expr::from(&it.data)]));
            }
        }
        for (ix, rule) in rules.iter().enumerate() {
            // a discarded subschema stops at its first error
            if ix > 0 && it.composite && !it.all_errors {
                g.if_(eq(error_count(), it.errs.clone()));
            }
            keyword(c, g, unit, it, st, &rule.keyword, &rule.def, map)?;
        }
        g.close_ifs_to(group_depth)?;
        if it.composite && !it.all_errors {
            g.if_(eq(error_count(), it.errs.clone()));
        }
    }
    g.close_ifs_to(depth)?;
    Ok(())
}

// ---- schema checks ---- //

fn check_keywords(c: &Compiler, vocab: &Vocabulary, it: &SchemaCx<'_>, map: &Map<String, Value>) -> Result<(), CompileError> {
    for (kw, value) in map {
        let Some(def) = vocab.get(kw) else {
            c.strict(CompileError::UnknownKeyword { keyword: kw.clone(), path: it.schema_path.clone() })?;
            continue;
        };
        if let Some(expected) = def.schema_type {
            let is_data = c.opts.data && def.data && data::data_ref(value).is_some();
            if !is_data && !expected.matches(value) {
                return Err(CompileError::invalid_value(kw, &it.schema_path, expected.to_string()));
            }
        }
        for dep in &def.depends_on {
            if !map.contains_key(dep) {
                return Err(CompileError::MissingDependency {
                    keyword: kw.clone(),
                    missing: dep.clone(),
                    path: it.schema_path.clone(),
                });
            }
        }
    }
    Ok(())
}

fn declared_types(c: &Compiler, it: &SchemaCx<'_>, map: &Map<String, Value>) -> Result<TypeSet, CompileError> {
    let Some(value) = map.get("type") else { return Ok(TypeSet::empty()) };
    let types = TypeSet::from_schema(value)
        .ok_or_else(|| CompileError::invalid_value("type", &it.schema_path, "a type name or an array of type names"))?;
    if value.is_array() && !c.opts.allow_union_types && (types - TypeSet::NULL).types().count() > 1 {
        c.strict(CompileError::invalid_value("type", &it.schema_path, "a single type (use allowUnionTypes)"))?;
    }
    Ok(types)
}

// ---- type check and coercion ---- //

fn check_type(
    c: &Compiler,
    g: &mut CodeGen,
    unit: &UnitInfo,
    it: &SchemaCx<'_>,
    st: &mut CxState,
    types: TypeSet,
    map: &Map<String, Value>,
) -> Result<(), CompileError> {
    let raw = map.get("type").cloned().unwrap_or(Value::Null);
    let names = match &raw {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(","),
        Value::String(s) => s.clone(),
        _ => types.to_string(),
    };
    let record = it.error_record(
        "type",
        &format!("{}/type", it.schema_path),
        vec![(Arc::from("type"), Expr::json(&raw))],
        Expr::str(format!("must be {names}")),
    );
    let coercion = c.opts.effective_coercion();
    let targets: Vec<JsonType> = types
        .types()
        .filter(|t| COERCIBLE.contains(t) || (*t == JsonType::Array && coercion == CoerceTypes::Array))
        .filter(|_| coercion.is_on())
        .collect();

    let data = Expr::from(&it.data);
    g.if_(not(Expr::call(Builtin::TypeIs(types), vec![data.clone()])));
    if targets.is_empty() {
        report(g, it, unit, record);
    } else {
        let coerced = g.let_("coerced", Some(Expr::UNDEF))?;
        let array = coercion == CoerceTypes::Array;
        for to in targets {
            g.if_(is_undef(&coerced));
            g.assign(&coerced, Expr::call(Builtin::Coerce { to, array }, vec![data.clone()]));
            g.end_if()?;
        }
        g.if_(is_undef(&coerced));
        report(g, it, unit, record);
        g.else_()?;
        g.assign(&it.data, Expr::from(&coerced));
        g.end_if()?;
    }
    g.end_if()?;

    if !it.all_errors {
        st.data_types = types;
        if it.composite {
            g.if_(eq(error_count(), it.errs.clone()));
        }
    }
    Ok(())
}

// ---- keywords ---- //

#[allow(clippy::too_many_arguments)]
fn keyword<'s>(
    c: &mut Compiler,
    g: &mut CodeGen,
    unit: &UnitInfo,
    it: &SchemaCx<'s>,
    st: &mut CxState,
    keyword: &str,
    def: &Arc<KeywordDefinition>,
    map: &'s Map<String, Value>,
) -> Result<(), CompileError> {
    let Some(value) = map.get(keyword) else { return Ok(()) };
    let depth = g.depth();
    let data_ref = if c.opts.data && def.data { data::data_ref(value) } else { None };
    let (schema_code, is_data) = match data_ref {
        Some(pointer) => {
            let resolved = data::pointer_expr(it, pointer)?;
            let v = g.const_("vSchema", resolved)?;
            g.if_(is_undef(&v));
            if let Some(expected) = def.schema_type {
                g.else_if(not(Expr::call(Builtin::TypeIs(expected), vec![Expr::from(&v)])))?;
                let record = it.error_record(
                    keyword,
                    &format!("{}/{}", it.schema_path, escape_pointer(keyword)),
                    Vec::new(),
                    Expr::str(format!("\"{keyword}\" keyword must be {expected} ($data)")),
                );
                report(g, it, unit, record);
            }
            g.else_()?;
            (Expr::from(&v), true)
        }
        None => (Expr::json(value), false),
    };

    let mut cx = KeywordCx {
        c: &mut *c,
        g: &mut *g,
        unit,
        it,
        st: &mut *st,
        keyword,
        def: &**def,
        schema: value,
        schema_code,
        is_data,
        parent: map,
    };
    match &def.kind {
        KeywordKind::Code(f) => f(&mut cx)?,
        KeywordKind::Macro(f) => expand(&mut cx, f)?,
        KeywordKind::Validate(f) => validate(&mut cx, f)?,
        KeywordKind::AsyncValidate(f) => validate_async(&mut cx, f)?,
        KeywordKind::Annotation => {}
    }
    g.close_ifs_to(depth)?;
    Ok(())
}

/// The error a user keyword reports: its template, or the generic message.
fn user_error(cx: &KeywordCx<'_, '_>) -> KwError {
    match &cx.def.error {
        Some(template) => template
            .params(cx.schema)
            .iter()
            .fold(KwError::new(template.message(cx.schema)), |err, (k, v)| err.param(k, Expr::json(v))),
        None => KwError::new(format!("must pass \"{}\" keyword validation", cx.keyword)),
    }
}

fn expand(cx: &mut KeywordCx<'_, '_>, f: &MacroFn) -> Result<(), CompileError> {
    let expanded = f(cx.schema, cx.parent)?;
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    let ev = cx.subschema(Sub::at(&expanded, "").composite(), &valid)?;
    cx.merge_valid_evaluated(ev, &valid)?;
    let err = user_error(cx);
    cx.pass(Expr::from(&valid), err)
}

fn validate(cx: &mut KeywordCx<'_, '_>, f: &ValidateFn) -> Result<(), CompileError> {
    let func = cx.capture("keyword", Captured::Keyword { keyword: Arc::from(cx.keyword), func: f.clone() }, None)?;
    let args = vec![cx.schema_code(), cx.data(), cx.instance_path(), cx.root_data()];
    let valid = cx.g.const_("valid", Expr::Invoke(func, args))?;
    let err = user_error(cx);
    cx.pass(Expr::from(&valid), err)
}

fn validate_async(cx: &mut KeywordCx<'_, '_>, f: &AsyncValidateFn) -> Result<(), CompileError> {
    if !cx.unit.is_async {
        return Err(CompileError::AsyncFromSync { path: cx.schema_path() });
    }
    let func = cx.capture("keyword", Captured::AsyncKeyword { keyword: Arc::from(cx.keyword), func: f.clone() }, None)?;
    let call = Expr::Invoke(func, vec![cx.schema_code(), cx.data()]);
    let valid = cx.g.const_("valid", Expr::Await(Box::new(call)))?;
    let err = user_error(cx);
    cx.pass(Expr::from(&valid), err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Options, StrictMode};
    use serde_json::json;

    fn source(schema: Value, opts: Options) -> Result<String, CompileError> {
        let mut c = Compiler::new(opts);
        let url = c.resolver.add_document(schema, None, Draft::Draft7)?;
        let target = c.resolver.resolve(&url, "#")?;
        Ok(c.compile(&target)?.source.clone())
    }

    #[test]
    fn typed_groups_are_guarded_unless_the_type_is_known() {
        let untyped = source(json!({"maxLength": 2}), Options::default()).unwrap();
        assert!(untyped.contains("isType<string>"), "{untyped}");
        let typed = source(json!({"type": "string", "maxLength": 2}), Options::default()).unwrap();
        assert_eq!(typed.matches("isType<string>").count(), 1, "{typed}");
    }

    #[test]
    fn groups_for_other_types_are_skipped() {
        let src = source(json!({"type": "string", "minimum": 3}), Options::default()).unwrap();
        assert!(!src.contains("isType<integer,number>"), "{src}");
        assert!(!src.contains("< 3"), "{src}");
    }

    #[test]
    fn unknown_keywords_follow_strictness() {
        let lax = Options { strict: StrictMode::Log, ..Options::default() };
        assert!(source(json!({"foo": 1}), lax).is_ok());
        let strict = Options { strict: StrictMode::Error, ..Options::default() };
        assert!(matches!(source(json!({"foo": 1}), strict), Err(CompileError::UnknownKeyword { .. })));
    }

    #[test]
    fn keyword_values_are_type_checked() {
        let err = source(json!({"maxLength": "3"}), Options::default()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidKeywordValue { ref keyword, .. } if keyword == "maxLength"));
        assert!(matches!(source(json!("nope"), Options::default()), Err(CompileError::InvalidSchema { .. })));
    }

    #[test]
    fn coercion_assigns_the_coerced_value() {
        let opts = Options { coerce_types: CoerceTypes::Scalar, ..Options::default() };
        let src = source(json!({"type": "number"}), opts).unwrap();
        assert!(src.contains("coerce<number>"), "{src}");
    }

    #[test]
    fn composite_subschemas_stop_at_the_first_failing_keyword() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut reg = crate::SchemaRegistry::new();
        reg.add_keyword(
            KeywordDefinition::validate("counted", move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
            .types(TypeSet::NUMBER),
        )
        .unwrap();
        let v = reg.compile(json!({"anyOf": [{"minimum": 5, "counted": true}, true]})).unwrap();
        assert!(v.is_valid(&json!(1)).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(v.is_valid(&json!(7)).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn union_types_need_permission_in_strict_mode() {
        let strict = Options { strict: StrictMode::Error, ..Options::default() };
        assert!(source(json!({"type": ["string", "null"]}), strict.clone()).is_ok());
        assert!(source(json!({"type": ["string", "number"]}), strict.clone()).is_err());
        let allowed = Options { allow_union_types: true, ..strict };
        assert!(source(json!({"type": ["string", "number"]}), allowed).is_ok());
    }
}
