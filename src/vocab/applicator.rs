//! Applicators that combine subschemas over the same instance: `allOf`,
//! `anyOf`, `oneOf`, `not` and `if`/`then`/`else`. They run in the post
//! group, after every type-specific keyword.
use serde_json::Value;

use crate::compile::{Evaluated, Items, KeywordCx, KwError, Props, Sub};
use crate::error::CompileError;
use crate::ir::{Expr, Name, and, not, or};
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

pub(crate) fn definitions() -> Vec<KeywordDefinition> {
    let schema = TypeSet::OBJECT | TypeSet::BOOLEAN;
    vec![
        KeywordDefinition::code(&["allOf"], all_of).schema_type(TypeSet::ARRAY).post(),
        KeywordDefinition::code(&["anyOf"], any_of).schema_type(TypeSet::ARRAY).post(),
        KeywordDefinition::code(&["oneOf"], one_of).schema_type(TypeSet::ARRAY).post(),
        KeywordDefinition::code(&["not"], negation).schema_type(schema).post(),
        KeywordDefinition::code(&["if"], if_then_else).schema_type(schema).post(),
    ]
}

fn schemas<'s>(cx: &KeywordCx<'_, 's>) -> Result<&'s [Value], CompileError> {
    match cx.schema() {
        Value::Array(list) if !list.is_empty() => Ok(list),
        _ => Err(cx.invalid_value("a non-empty array of schemas")),
    }
}

/// Whether merging what branches evaluated can still change anything.
fn merging(cx: &KeywordCx<'_, '_>) -> bool {
    cx.tracks_evaluated() && !(cx.props() == &Props::All && cx.items() == &Items::All)
}

fn all_of(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let list = schemas(cx)?;
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    for (i, schema) in list.iter().enumerate() {
        if cx.always_valid(schema) {
            continue;
        }
        let ev = cx.subschema(Sub::at(schema, format!("/{i}")), &valid)?;
        cx.merge_evaluated(ev)?;
        cx.ok(Expr::from(&valid));
    }
    Ok(())
}

fn any_of(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let list = schemas(cx)?;
    if !merging(cx) && list.iter().any(|s| cx.always_valid(s)) {
        return Ok(());
    }
    let merge = merging(cx);
    let errs = cx.errors_mark()?;
    let valid = cx.g.let_("valid", Some(Expr::FALSE))?;
    let flags = branch_flags(cx, list.len())?;
    let depth = cx.g.depth();
    let mut evaluated = Vec::with_capacity(list.len());
    for (i, schema) in list.iter().enumerate() {
        let ev = cx.subschema(Sub::at(schema, format!("/{i}")).composite(), &flags[i])?;
        cx.g.assign(&valid, or(Expr::from(&valid), Expr::from(&flags[i])));
        evaluated.push(ev);
        // stop at the first passing branch unless evaluation needs them all
        if !merge {
            cx.g.if_(not(Expr::from(&valid)));
        }
    }
    cx.g.close_ifs_to(depth)?;
    for (ev, flag) in evaluated.into_iter().zip(&flags) {
        cx.merge_valid_evaluated(ev, flag)?;
    }
    cx.result(Expr::from(&valid), KwError::new("must match a schema in anyOf"), Some(&errs))
}

fn one_of(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let list = schemas(cx)?;
    let errs = cx.errors_mark()?;
    let valid = cx.g.let_("valid", Some(Expr::FALSE))?;
    let passing = cx.g.let_("passing", Some(Expr::NULL))?;
    let flags = branch_flags(cx, list.len())?;
    let depth = cx.g.depth();
    let mut evaluated = Vec::with_capacity(list.len());
    for (i, schema) in list.iter().enumerate() {
        let flag = &flags[i];
        if cx.always_valid(schema) {
            cx.g.assign(flag, Expr::TRUE);
            evaluated.push(Evaluated::default());
        } else {
            evaluated.push(cx.subschema(Sub::at(schema, format!("/{i}")).composite(), flag)?);
        }
        if i > 0 {
            // a second passing branch settles it; the rest are skipped
            cx.g.if_(and(Expr::from(flag), Expr::from(&valid)));
            cx.g.assign(&valid, Expr::FALSE);
            cx.g.assign(&passing, Expr::Array(vec![Expr::from(&passing), Expr::num(i as f64)]));
            cx.g.else_()?;
        }
        cx.g.if_(Expr::from(flag));
        cx.g.assign(&valid, Expr::TRUE);
        cx.g.assign(&passing, Expr::num(i as f64));
        cx.g.end_if()?;
    }
    cx.g.close_ifs_to(depth)?;
    for (ev, flag) in evaluated.into_iter().zip(&flags) {
        cx.merge_valid_evaluated(ev, flag)?;
    }
    let err = KwError::new("must match exactly one schema in oneOf").param("passingSchemas", Expr::from(&passing));
    cx.result(Expr::from(&valid), err, Some(&errs))
}

/// One `false` flag per branch, declared where the keyword starts so that
/// merges after the branches see them whichever ran.
fn branch_flags(cx: &mut KeywordCx<'_, '_>, n: usize) -> Result<Vec<Name>, CompileError> {
    let mut flags = Vec::with_capacity(n);
    for _ in 0..n {
        flags.push(cx.g.let_("valid", Some(Expr::FALSE))?);
    }
    Ok(flags)
}

fn negation(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let err = KwError::new("must NOT be valid");
    let schema = cx.schema();
    if cx.always_valid(schema) {
        return cx.error(err);
    }
    let errs = cx.errors_mark()?;
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    cx.subschema(Sub::at(schema, "").composite().fail_fast(), &valid)?;
    cx.result(not(Expr::from(&valid)), err, Some(&errs))
}

// ---- if / then / else ---- //

fn clause<'s>(cx: &KeywordCx<'_, 's>, keyword: &str) -> Option<&'s Value> {
    cx.sibling(keyword).filter(|s| !cx.always_valid(s))
}

fn if_then_else(cx: &mut KeywordCx<'_, '_>) -> Result<(), CompileError> {
    let then_schema = clause(cx, "then");
    let else_schema = clause(cx, "else");
    if then_schema.is_none() && else_schema.is_none() {
        return cx.c.strict(CompileError::Ignored {
            message: "\"if\" without \"then\" and \"else\" is ignored".into(),
            path: cx.schema_path(),
        });
    }
    let valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    let if_valid = cx.g.let_("valid", Some(Expr::TRUE))?;
    let then_valid = cx.g.let_("valid", Some(Expr::FALSE))?;
    let else_valid = cx.g.let_("valid", Some(Expr::FALSE))?;
    let if_clause = match (then_schema, else_schema) {
        (Some(_), Some(_)) => Some(cx.g.let_("ifClause", Some(Expr::UNDEF))?),
        _ => None,
    };

    let errs = cx.errors_mark()?;
    let if_ev = cx.subschema(Sub::at(cx.schema(), "").composite().fail_fast(), &if_valid)?;
    cx.reset(&errs);

    let mut then_ev = Evaluated::default();
    let mut else_ev = Evaluated::default();
    match (then_schema, else_schema) {
        (Some(then_s), Some(else_s)) => {
            cx.g.if_(Expr::from(&if_valid));
            then_ev = branch(cx, then_s, "then", &then_valid, &valid, if_clause.as_ref())?;
            cx.g.else_()?;
            else_ev = branch(cx, else_s, "else", &else_valid, &valid, if_clause.as_ref())?;
            cx.g.end_if()?;
        }
        (Some(then_s), None) => {
            cx.g.if_(Expr::from(&if_valid));
            then_ev = branch(cx, then_s, "then", &then_valid, &valid, None)?;
            cx.g.end_if()?;
        }
        (None, Some(else_s)) => {
            cx.g.if_(not(Expr::from(&if_valid)));
            else_ev = branch(cx, else_s, "else", &else_valid, &valid, None)?;
            cx.g.end_if()?;
        }
        (None, None) => {}
    }
    cx.merge_valid_evaluated(if_ev, &if_valid)?;
    cx.merge_valid_evaluated(then_ev, &then_valid)?;
    cx.merge_valid_evaluated(else_ev, &else_valid)?;

    let err = match (&if_clause, then_schema) {
        (Some(name), _) => KwError::new(vec![Expr::str("must match \""), Expr::from(name), Expr::str("\" schema")])
            .param("failingKeyword", Expr::from(name)),
        (None, Some(_)) => KwError::new("must match \"then\" schema").param("failingKeyword", Expr::str("then")),
        (None, None) => KwError::new("must match \"else\" schema").param("failingKeyword", Expr::str("else")),
    };
    cx.pass(Expr::from(&valid), err)
}

fn branch(
    cx: &mut KeywordCx<'_, '_>,
    schema: &Value,
    keyword: &str,
    flag: &Name,
    valid: &Name,
    if_clause: Option<&Name>,
) -> Result<Evaluated, CompileError> {
    let ev = cx.subschema(Sub::at(schema, "").keyword(keyword), flag)?;
    cx.g.assign(valid, Expr::from(flag));
    if let Some(name) = if_clause {
        cx.g.assign(name, Expr::str(keyword));
    }
    Ok(ev)
}

#[cfg(test)]
mod tests {
    use crate::{Options, SchemaRegistry, StrictMode};
    use serde_json::json;

    #[test]
    fn all_of_reports_the_failing_branch() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"allOf": [{"type": "number"}, {"minimum": 3}]})).unwrap();
        assert!(v.is_valid(&json!(4)).unwrap());
        let out = v.validate(&json!(2)).unwrap();
        assert_eq!(out.errors[0].schema_path, "#/allOf/1/minimum");
    }

    #[test]
    fn any_of_keeps_branch_errors_only_on_failure() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"anyOf": [{"type": "string"}, {"type": "number"}]})).unwrap();
        let out = v.validate(&json!(1)).unwrap();
        assert!(out.valid && out.errors.is_empty());
        let out = v.validate(&json!(null)).unwrap();
        let keywords: Vec<_> = out.errors.iter().map(|e| e.keyword.as_str()).collect();
        assert_eq!(keywords, ["type", "type", "anyOf"]);
        assert_eq!(out.errors[2].message, "must match a schema in anyOf");
    }

    #[test]
    fn one_of_reports_passing_schemas() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"oneOf": [{"type": "integer"}, {"minimum": 2}, {"maximum": 0}]})).unwrap();
        assert!(v.is_valid(&json!(1)).unwrap());
        assert!(v.is_valid(&json!(2.5)).unwrap());
        let out = v.validate(&json!(3)).unwrap();
        let last = out.errors.last().unwrap();
        assert_eq!(last.message, "must match exactly one schema in oneOf");
        assert_eq!(last.params["passingSchemas"], json!([0, 1]));
        let out = v.validate(&json!(1.5)).unwrap();
        assert_eq!(out.errors.last().unwrap().params["passingSchemas"], json!(null));
    }

    #[test]
    fn not_inverts() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(json!({"not": {"type": "string"}})).unwrap();
        assert!(v.validate(&json!(1)).unwrap().errors.is_empty());
        let out = v.validate(&json!("s")).unwrap();
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "must NOT be valid");
        assert!(!reg.compile(json!({"not": {}})).unwrap().is_valid(&json!(1)).unwrap());
    }

    #[test]
    fn if_picks_a_branch() {
        let mut reg = SchemaRegistry::with_options(Options { all_errors: true, ..Options::default() });
        let v = reg
            .compile(json!({
                "if": {"properties": {"kind": {"const": "a"}}},
                "then": {"required": ["a"]},
                "else": {"required": ["b"]}
            }))
            .unwrap();
        assert!(v.is_valid(&json!({"kind": "a", "a": 1})).unwrap());
        assert!(v.is_valid(&json!({"kind": "z", "b": 1})).unwrap());
        let out = v.validate(&json!({"kind": "a"})).unwrap();
        assert_eq!(out.errors[0].schema_path, "#/then/required");
        assert_eq!(out.errors[1].message, "must match \"then\" schema");
        assert_eq!(out.errors[1].params["failingKeyword"], json!("then"));
        let out = v.validate(&json!({"kind": "z"})).unwrap();
        assert_eq!(out.errors[1].params["failingKeyword"], json!("else"));
    }

    #[test]
    fn bare_if_is_ignored_unless_strict() {
        let mut reg = SchemaRegistry::new();
        assert!(reg.compile(json!({"if": {"type": "string"}})).unwrap().is_valid(&json!(1)).unwrap());
        let mut strict = SchemaRegistry::with_options(Options { strict: StrictMode::Error, ..Options::default() });
        assert!(strict.compile(json!({"if": {"type": "string"}})).is_err());
    }
}
