//! JSON instance types and sets of them.
//!
//! `integer` is a refinement of `number`: every set that contains `INTEGER`
//! is satisfied by an integral number, and `NUMBER` admits integers too.
use std::fmt;

use bitflags::bitflags;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    pub const ALL: [JsonType; 7] = [
        JsonType::Null,
        JsonType::Boolean,
        JsonType::Integer,
        JsonType::Number,
        JsonType::String,
        JsonType::Array,
        JsonType::Object,
    ];

    pub fn parse(s: &str) -> Option<JsonType> {
        Some(match s {
            "null" => JsonType::Null,
            "boolean" => JsonType::Boolean,
            "integer" => JsonType::Integer,
            "number" => JsonType::Number,
            "string" => JsonType::String,
            "array" => JsonType::Array,
            "object" => JsonType::Object,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    /// The most specific type of a concrete value.
    pub fn of(value: &Value) -> JsonType {
        match value {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0) {
                    JsonType::Integer
                } else {
                    JsonType::Number
                }
            }
            Value::String(_) => JsonType::String,
            Value::Array(_) => JsonType::Array,
            Value::Object(_) => JsonType::Object,
        }
    }

    pub fn flag(self) -> TypeSet {
        match self {
            JsonType::Null => TypeSet::NULL,
            JsonType::Boolean => TypeSet::BOOLEAN,
            JsonType::Integer => TypeSet::INTEGER,
            JsonType::Number => TypeSet::NUMBER,
            JsonType::String => TypeSet::STRING,
            JsonType::Array => TypeSet::ARRAY,
            JsonType::Object => TypeSet::OBJECT,
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeSet: u8 {
        const NULL    = 1 << 0;
        const BOOLEAN = 1 << 1;
        const INTEGER = 1 << 2;
        const NUMBER  = 1 << 3;
        const STRING  = 1 << 4;
        const ARRAY   = 1 << 5;
        const OBJECT  = 1 << 6;
    }
}

impl TypeSet {
    /// Parse the value of a `type` keyword (a name or an array of names).
    pub fn from_schema(value: &Value) -> Option<TypeSet> {
        match value {
            Value::String(s) => JsonType::parse(s).map(JsonType::flag),
            Value::Array(items) => {
                let mut set = TypeSet::empty();
                for item in items {
                    set |= JsonType::parse(item.as_str()?)?.flag();
                }
                Some(set)
            }
            _ => None,
        }
    }

    pub fn types(self) -> impl Iterator<Item = JsonType> {
        JsonType::ALL.into_iter().filter(move |t| self.contains(t.flag()))
    }

    /// Whether a value of type `ty` is admitted by this set.
    pub fn admits(self, ty: JsonType) -> bool {
        match ty {
            JsonType::Integer => self.intersects(TypeSet::INTEGER | TypeSet::NUMBER),
            other => self.contains(other.flag()),
        }
    }

    /// Whether a value could satisfy both sets.
    pub fn overlaps(self, other: TypeSet) -> bool {
        self.intersects(other)
            || (self.contains(TypeSet::NUMBER) && other.contains(TypeSet::INTEGER))
            || (self.contains(TypeSet::INTEGER) && other.contains(TypeSet::NUMBER))
    }

    pub fn matches(self, value: &Value) -> bool {
        self.admits(JsonType::of(value))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.types().map(JsonType::as_str).collect()
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_is_admitted_by_number() {
        let set = TypeSet::from_schema(&json!("number")).unwrap();
        assert!(set.matches(&json!(3)));
        assert!(set.matches(&json!(3.5)));
        let ints = TypeSet::from_schema(&json!(["integer", "null"])).unwrap();
        assert!(ints.matches(&json!(2.0)));
        assert!(!ints.matches(&json!(2.5)));
        assert!(ints.matches(&json!(null)));
    }

    #[test]
    fn unknown_type_names_are_rejected() {
        assert!(TypeSet::from_schema(&json!("any")).is_none());
        assert!(TypeSet::from_schema(&json!(["string", 3])).is_none());
    }
}
