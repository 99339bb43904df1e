//! `$data` references: keyword values read from the instance.
//!
//! `""` is the root, `/a/b` an absolute pointer from the root, `N/a/b` a
//! pointer from the data `N` levels up and `N#` the property name or index
//! that leads to it.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::compile::context::{PathSeg, SchemaCx};
use crate::error::CompileError;
use crate::ir::Expr;

static JSON_POINTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/(?:[^~]|~0|~1)*$").unwrap());
static RELATIVE_JSON_POINTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)(#|/(?:[^~]|~0|~1)*)?$").unwrap());

/// The pointer string of a `{"$data": "..."}` keyword value.
pub fn data_ref(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get("$data")?.as_str(),
        _ => None,
    }
}

/// Runtime expression for a `$data` pointer evaluated at `it`.
pub fn pointer_expr(it: &SchemaCx<'_>, pointer: &str) -> Result<Expr, CompileError> {
    let invalid = |reason: String| CompileError::DataPointer { pointer: pointer.to_string(), reason };
    if pointer.is_empty() {
        return Ok(Expr::from(&it.root_data));
    }
    let (base, path) = if pointer.starts_with('/') {
        if !JSON_POINTER.is_match(pointer) {
            return Err(invalid("invalid JSON pointer".into()));
        }
        (Expr::from(&it.root_data), pointer)
    } else {
        let caps = RELATIVE_JSON_POINTER.captures(pointer).ok_or_else(|| invalid("invalid JSON pointer".into()))?;
        let up: usize = caps[1].parse().map_err(|_| invalid("level out of range".into()))?;
        let path = caps.get(2).map_or("", |m| m.as_str());
        let level = it.data_level;
        if path == "#" {
            if up >= level {
                return Err(invalid(format!("cannot access property/index {up} levels up, current level is {level}")));
            }
            return Ok(match &it.data_path[level - up - 1] {
                PathSeg::Key(k) => Expr::str(k.as_str()),
                PathSeg::Index(i) => Expr::num(*i as f64),
                PathSeg::DynKey(n) | PathSeg::DynIndex(n) => Expr::from(n),
            });
        }
        if up > level {
            return Err(invalid(format!("cannot access data {up} levels up, current level is {level}")));
        }
        (Expr::from(&it.data_names[level - up]), path)
    };
    Ok(path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .fold(base, |acc, segment| acc.prop(Expr::str(segment))))
}
