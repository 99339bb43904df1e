//! Runtime helpers behind [`Builtin`](crate::ir::Builtin) calls that don't
//! touch interpreter state.
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{ErrorRecord, RuntimeError};
use crate::exec::value::{duplicates, json_equal, num_json, prop_keys, Val, View};
use crate::types::JsonType;

pub fn len(v: &Val<'_>) -> Val<'static> {
    match v.view() {
        View::Str(s) => Val::Num(s.chars().count() as f64),
        View::Compound(Value::Array(items)) => Val::Num(items.len() as f64),
        View::Compound(Value::Object(map)) => Val::Num(map.len() as f64),
        _ => Val::Undef,
    }
}

pub fn equal(a: &Val<'_>, b: &Val<'_>) -> bool {
    match (a.view(), b.view()) {
        (View::Compound(x), View::Compound(y)) => json_equal(x, y),
        (View::Compound(_), _) | (_, View::Compound(_)) => false,
        (View::Num(x), View::Num(y)) => x == y,
        (View::Str(x), View::Str(y)) => x == y,
        (View::Bool(x), View::Bool(y)) => x == y,
        (View::Null, View::Null) | (View::Undef, View::Undef) => true,
        _ => false,
    }
}

pub fn has_prop(obj: &Val<'_>, key: &Val<'_>) -> bool {
    match (obj.as_json(), key.as_str()) {
        (Some(Value::Object(map)), Some(k)) => map.contains_key(k),
        _ => false,
    }
}

pub fn multiple_of(x: &Val<'_>, divisor: &Val<'_>) -> bool {
    let (Some(x), Some(d)) = (x.as_f64(), divisor.as_f64()) else { return true };
    if d == 0.0 {
        return false;
    }
    let q = x / d;
    q.is_finite() && (q - q.round()).abs() <= 1e-9 * q.abs().max(1.0)
}

pub fn find_duplicates(v: &Val<'_>) -> Val<'static> {
    match v.as_json() {
        Some(Value::Array(items)) => match duplicates(items) {
            Some((i, j)) => Val::Owned(Arc::new(Value::Array(vec![Value::from(i), Value::from(j)]))),
            None => Val::Null,
        },
        _ => Val::Null,
    }
}

pub fn pointer_segment(key: &Val<'_>) -> String {
    match key.view() {
        View::Str(s) => s.replace('~', "~0").replace('/', "~1"),
        _ => key.display(),
    }
}

pub fn js_property(key: &Val<'_>) -> String {
    match key.view() {
        View::Num(_) => format!("[{}]", key.display()),
        View::Str(s) if is_identifier(s) => format!(".{s}"),
        View::Str(s) => format!("[{}]", Value::from(s)),
        _ => format!("[{}]", key.display()),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// ---- coercion ---- //

/// `v` coerced to `to`, or undefined. With `array`, a single-item array is
/// unwrapped first and scalars coerce to one-item arrays.
pub fn coerce<'d>(v: &Val<'d>, to: JsonType, array: bool) -> Val<'d> {
    if array {
        if to == JsonType::Array {
            return match v.json_type() {
                None | Some(JsonType::Array) | Some(JsonType::Object) => Val::Undef,
                Some(_) => Val::Owned(Arc::new(Value::Array(vec![v.to_json()]))),
            };
        }
        if let Some(Value::Array(items)) = v.as_json() {
            if items.len() == 1 {
                let inner = v.prop(&Val::Num(0.0));
                if inner.json_type().is_some_and(|t| to.flag().admits(t)) {
                    return inner;
                }
                return coerce(&inner, to, false);
            }
        }
    }
    match (to, v.view()) {
        (JsonType::String, View::Num(n)) => Val::str(num_json(n).to_string()),
        (JsonType::String, View::Bool(b)) => Val::str(b.to_string()),
        (JsonType::String, View::Null) => Val::str(""),
        (JsonType::Number, View::Str(s)) => parse_number(s).map(Val::Num).unwrap_or(Val::Undef),
        (JsonType::Integer, View::Str(s)) => match parse_number(s) {
            Some(n) if n.fract() == 0.0 => Val::Num(n),
            _ => Val::Undef,
        },
        (JsonType::Number | JsonType::Integer, View::Bool(b)) => Val::Num(if b { 1.0 } else { 0.0 }),
        (JsonType::Number | JsonType::Integer, View::Null) => Val::Num(0.0),
        (JsonType::Boolean, View::Str("false")) | (JsonType::Boolean, View::Null) => Val::Bool(false),
        (JsonType::Boolean, View::Num(n)) if n == 0.0 => Val::Bool(false),
        (JsonType::Boolean, View::Str("true")) => Val::Bool(true),
        (JsonType::Boolean, View::Num(n)) if n == 1.0 => Val::Bool(true),
        (JsonType::Null, View::Str("")) | (JsonType::Null, View::Bool(false)) => Val::Null,
        (JsonType::Null, View::Num(n)) if n == 0.0 => Val::Null,
        _ => Val::Undef,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() || t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    t.parse::<f64>().ok().filter(|n| n.is_finite())
}

// ---- evaluated tracking ---- //

pub fn merge_props(a: &Val<'_>, b: &Val<'_>) -> Val<'static> {
    if matches!(a.view(), View::Bool(true)) || matches!(b.view(), View::Bool(true)) {
        return Val::Bool(true);
    }
    let mut keys = Map::new();
    prop_keys(a, &mut keys);
    prop_keys(b, &mut keys);
    Val::Owned(Arc::new(Value::Object(keys)))
}

pub fn merge_items(a: &Val<'_>, b: &Val<'_>) -> Val<'static> {
    if matches!(a.view(), View::Bool(true)) || matches!(b.view(), View::Bool(true)) {
        return Val::Bool(true);
    }
    Val::Num(a.as_f64().unwrap_or(0.0).max(b.as_f64().unwrap_or(0.0)))
}

pub fn is_evaluated(props: &Val<'_>, key: &Val<'_>) -> bool {
    match (props.view(), key.as_str()) {
        (View::Bool(true), _) => true,
        (View::Compound(Value::Object(map)), Some(k)) => map.contains_key(k),
        _ => false,
    }
}

// ---- error records ---- //

pub fn record(v: &Val<'_>) -> Result<ErrorRecord, RuntimeError> {
    let Some(Value::Object(map)) = v.as_json() else {
        return Err(RuntimeError::Internal(format!("error record must be an object, got {}", v.display())));
    };
    let text = |key: &str| map.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let params = match map.get("params") {
        Some(Value::Object(params)) => params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Default::default(),
    };
    Ok(ErrorRecord {
        instance_path: text("instancePath"),
        schema_path: text("schemaPath"),
        keyword: text("keyword"),
        params,
        message: text("message"),
    })
}
