//! Runtime values.
//!
//! Instance data is borrowed for the whole call (`Data`); everything the
//! generated code builds itself (error records, coerced values, evaluated
//! sets) is owned.
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use serde_json::{Map, Value};

use crate::error::ErrorRecord;
use crate::types::JsonType;

#[derive(Debug, Clone)]
pub enum Val<'d> {
    Undef,
    Null,
    Bool(bool),
    Num(f64),
    Str(Cow<'d, str>),
    Text(Arc<str>),
    Data(&'d Value),
    Owned(Arc<Value>),
    /// A thrown `ValidationError`.
    Errors(Arc<Vec<ErrorRecord>>),
}

/// Borrowed shape of a [`Val`], for comparisons.
#[derive(Debug, Clone, Copy)]
pub enum View<'v> {
    Undef,
    Null,
    Bool(bool),
    Num(f64),
    Str(&'v str),
    Compound(&'v Value),
    Errors,
}

impl<'d> Val<'d> {
    pub fn str(s: impl Into<String>) -> Val<'d> {
        Val::Str(Cow::Owned(s.into()))
    }

    /// Lift an owned JSON value, keeping scalars unboxed.
    pub fn from_json(v: Value) -> Val<'d> {
        match v {
            Value::Null => Val::Null,
            Value::Bool(b) => Val::Bool(b),
            Value::Number(n) => n.as_f64().map(Val::Num).unwrap_or(Val::Null),
            Value::String(s) => Val::Str(Cow::Owned(s)),
            other => Val::Owned(Arc::new(other)),
        }
    }

    pub fn view(&self) -> View<'_> {
        match self {
            Val::Undef => View::Undef,
            Val::Null => View::Null,
            Val::Bool(b) => View::Bool(*b),
            Val::Num(n) => View::Num(*n),
            Val::Str(s) => View::Str(s),
            Val::Text(s) => View::Str(s),
            Val::Data(v) => view_json(v),
            Val::Owned(v) => view_json(v),
            Val::Errors(_) => View::Errors,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.view() {
            View::Num(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.view() {
            View::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Val::Data(v) => Some(v),
            Val::Owned(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Val::Undef)
    }

    /// JavaScript truthiness.
    pub fn truthy(&self) -> bool {
        match self.view() {
            View::Undef | View::Null => false,
            View::Bool(b) => b,
            View::Num(n) => n != 0.0 && !n.is_nan(),
            View::Str(s) => !s.is_empty(),
            View::Compound(_) | View::Errors => true,
        }
    }

    pub fn json_type(&self) -> Option<JsonType> {
        match self.view() {
            View::Undef => None,
            View::Null => Some(JsonType::Null),
            View::Bool(_) => Some(JsonType::Boolean),
            View::Num(n) if n.is_finite() && n.fract() == 0.0 => Some(JsonType::Integer),
            View::Num(_) => Some(JsonType::Number),
            View::Str(_) => Some(JsonType::String),
            View::Compound(v) => Some(JsonType::of(v)),
            View::Errors => Some(JsonType::Object),
        }
    }

    /// Owned JSON rendering. `undefined` becomes `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Val::Undef | Val::Null => Value::Null,
            Val::Bool(b) => Value::Bool(*b),
            Val::Num(n) => num_json(*n),
            Val::Str(s) => Value::String(s.to_string()),
            Val::Text(s) => Value::String(s.to_string()),
            Val::Data(v) => (*v).clone(),
            Val::Owned(v) => (**v).clone(),
            Val::Errors(errs) => serde_json::to_value(&**errs).unwrap_or(Value::Null),
        }
    }

    /// String form used by concatenation.
    pub fn display(&self) -> String {
        match self.view() {
            View::Undef => "undefined".to_string(),
            View::Null => "null".to_string(),
            View::Bool(b) => b.to_string(),
            View::Num(n) => num_json(n).to_string(),
            View::Str(s) => s.to_string(),
            View::Compound(v) => v.to_string(),
            View::Errors => "ValidationError".to_string(),
        }
    }

    /// `self[key]`, undefined when absent.
    pub fn prop(&self, key: &Val<'_>) -> Val<'d> {
        match self {
            Val::Data(v) => match child(v, key) {
                Some(c) => Val::Data(c),
                None => Val::Undef,
            },
            Val::Owned(v) => match child(v, key) {
                Some(c) => Val::from_json(c.clone()),
                None => Val::Undef,
            },
            _ => Val::Undef,
        }
    }
}

fn view_json(v: &Value) -> View<'_> {
    match v {
        Value::Null => View::Null,
        Value::Bool(b) => View::Bool(*b),
        Value::Number(n) => n.as_f64().map(View::Num).unwrap_or(View::Null),
        Value::String(s) => View::Str(s),
        other => View::Compound(other),
    }
}

fn child<'v>(v: &'v Value, key: &Val<'_>) -> Option<&'v Value> {
    match (v, key.view()) {
        (Value::Object(map), View::Str(k)) => map.get(k),
        (Value::Array(items), View::Num(i)) if i >= 0.0 && i.fract() == 0.0 => items.get(i as usize),
        _ => None,
    }
}

/// JSON number with integer preference: `3.0` renders as `3`.
pub fn num_json(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

// ---- equality ---- //

/// `===` on primitives; structural on compound values.
pub fn strict_eq(a: &Val<'_>, b: &Val<'_>) -> bool {
    match (a.view(), b.view()) {
        (View::Undef, View::Undef) | (View::Null, View::Null) => true,
        (View::Bool(x), View::Bool(y)) => x == y,
        (View::Num(x), View::Num(y)) => x == y,
        (View::Str(x), View::Str(y)) => x == y,
        (View::Compound(x), View::Compound(y)) => json_equal(x, y),
        _ => false,
    }
}

/// Deep JSON equality where `1` equals `1.0`.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len() && xs.iter().all(|(k, x)| ys.get(k).is_some_and(|y| json_equal(x, y)))
        }
        _ => a == b,
    }
}

#[derive(Hash, PartialEq, Eq)]
enum ScalarKey<'v> {
    Null,
    Bool(bool),
    Num(OrderedFloat<f64>),
    Str(&'v str),
}

fn scalar_key(v: &Value) -> Option<ScalarKey<'_>> {
    Some(match v {
        Value::Null => ScalarKey::Null,
        Value::Bool(b) => ScalarKey::Bool(*b),
        Value::Number(n) => ScalarKey::Num(OrderedFloat(n.as_f64()?)),
        Value::String(s) => ScalarKey::Str(s),
        _ => return None,
    })
}

/// `(i, j)` with `i < j`: the last item `i` that reappears later, and the
/// last index `j` it reappears at.
pub fn duplicates(items: &[Value]) -> Option<(usize, usize)> {
    let all_scalar = items.iter().all(|v| scalar_key(v).is_some());
    if all_scalar {
        let mut seen: HashSet<ScalarKey<'_>> = HashSet::with_capacity(items.len());
        let mut dup = false;
        for v in items {
            if let Some(k) = scalar_key(v) {
                dup |= !seen.insert(k);
            }
        }
        if !dup {
            return None;
        }
    }
    for i in (0..items.len()).rev() {
        for j in (i + 1..items.len()).rev() {
            if json_equal(&items[i], &items[j]) {
                return Some((i, j));
            }
        }
    }
    None
}

/// Keys of an evaluated-properties value (`undefined`, a key, or a set).
pub fn prop_keys(v: &Val<'_>, out: &mut Map<String, Value>) {
    match v.view() {
        View::Str(k) => {
            out.insert(k.to_string(), Value::Bool(true));
        }
        View::Compound(Value::Object(map)) => {
            for k in map.keys() {
                out.insert(k.clone(), Value::Bool(true));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_and_floats_compare_equal() {
        assert!(json_equal(&json!([1, {"a": 2}]), &json!([1.0, {"a": 2.0}])));
        assert!(!json_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(strict_eq(&Val::Num(3.0), &Val::Data(&json!(3))));
        assert!(!strict_eq(&Val::Undef, &Val::Null));
    }

    #[test]
    fn duplicates_report_the_last_pair() {
        assert_eq!(duplicates(&[json!(1), json!(2), json!(1.0)]), Some((0, 2)));
        assert_eq!(duplicates(&[json!(1), json!(2), json!(2), json!(1)]), Some((1, 2)));
        assert_eq!(duplicates(&[json!({"a": 1}), json!({"a": 1})]), Some((0, 1)));
        assert_eq!(duplicates(&[json!("a"), json!(1), json!(null)]), None);
    }

    #[test]
    fn property_access_borrows_instance_data() {
        let data = json!({"a": [10, 20]});
        let root = Val::Data(&data);
        let arr = root.prop(&Val::str("a"));
        assert!(matches!(arr.prop(&Val::Num(1.0)), Val::Data(v) if *v == json!(20)));
        assert!(arr.prop(&Val::Num(5.0)).is_undef());
        assert!(root.prop(&Val::Num(0.0)).is_undef());
    }

    #[test]
    fn numbers_prefer_integers_when_rendered() {
        assert_eq!(num_json(3.0), json!(3));
        assert_eq!(Val::Num(2.5).display(), "2.5");
        assert_eq!(Val::Num(4.0).display(), "4");
    }
}
