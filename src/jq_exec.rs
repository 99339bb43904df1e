//! jq pre-processing of input documents, via jaq.
use anyhow::{Result, anyhow};
use jaq_core::{Compiler, Ctx, RcIter, compile::Undefined, load};
use jaq_json::Val;
use serde_json::Value;

/// Run `filter_src` over `input`; every output becomes its own document.
pub fn run_jaq(filter_src: &str, input: &Value) -> Result<Vec<Value>> {
    let loader = load::Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = load::Arena::default();
    let program = load::File { code: filter_src, path: () };

    let modules = loader.load(&arena, program).map_err(parse_error)?;

    let filter = Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(undefined_error)?;

    let inputs = RcIter::new(core::iter::empty());
    let outputs = filter.run((Ctx::new([], &inputs), Val::from(input.clone())));

    let mut out = Vec::new();
    for item in outputs {
        let val = item.map_err(|e| anyhow!("{e:?}"))?;
        // Val renders as JSON text
        out.push(serde_json::from_str(&val.to_string())?);
    }
    Ok(out)
}

fn parse_error(errs: Vec<(load::File<&str, ()>, load::Error<&str>)>) -> anyhow::Error {
    let details: Vec<String> = errs.into_iter().map(|(_, err)| format!("{err:?}")).collect();
    anyhow!("invalid jq filter: {}", details.join("; "))
}

fn undefined_error(errs: Vec<(load::File<&str, ()>, Vec<(&str, Undefined)>)>) -> anyhow::Error {
    let names: Vec<String> = errs
        .into_iter()
        .flat_map(|(_, list)| list)
        .map(|(name, undef)| format!("`{name}` ({undef:?})"))
        .collect();
    anyhow!("jq filter uses undefined {}", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_yield_documents() {
        let out = run_jaq(".items[] | select(.ok)", &json!({"items": [{"ok": true, "n": 1}, {"ok": false}]})).unwrap();
        assert_eq!(out, vec![json!({"ok": true, "n": 1})]);
    }

    #[test]
    fn filter_errors_name_the_problem() {
        let err = run_jaq(".[", &json!(null)).unwrap_err();
        assert!(err.to_string().starts_with("invalid jq filter"), "{err}");
        let err = run_jaq("nosuchfn(1)", &json!(null)).unwrap_err();
        assert!(err.to_string().contains("`nosuchfn`"), "{err}");
    }
}
