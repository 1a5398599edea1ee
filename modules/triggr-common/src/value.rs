//! Document value tree. Documents carry arbitrary JSON-like data; internally
//! it is this tagged tree, not `serde_json::Value`, so integer width and
//! decimal handling stay explicit.
//!
//! Serialization rule: integers within the 53-bit range render as JSON
//! numbers; anything wider renders as a decimal string so no client-side
//! float ever corrupts a chain value.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Largest integer magnitude representable exactly in a JSON number (2^53 - 1).
const JSON_SAFE_INT: i128 = (1_i128 << 53) - 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i128),
    Dec(String),
    Str(String),
    Arr(Vec<Value>),
    Obj(BTreeMap<String, Value>),
}

impl Value {
    pub fn obj(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self::Obj(entries.into_iter().collect())
    }

    pub fn as_obj(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Obj(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Kind name used in type-mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Dec(_) => "decimal",
            Self::Str(_) => "string",
            Self::Arr(_) => "array",
            Self::Obj(_) => "object",
        }
    }

    /// Shallow merge: for two objects, keys of `other` overwrite keys of
    /// `self`; any other combination replaces `self` wholesale.
    pub fn merge_shallow(&mut self, other: Value) {
        match (self, other) {
            (Value::Obj(base), Value::Obj(patch)) => {
                for (k, v) in patch {
                    base.insert(k, v);
                }
            }
            (slot, other) => *slot = other,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(v) => {
                if v.unsigned_abs() <= JSON_SAFE_INT as u128 {
                    serde_json::Value::Number((*v as i64).into())
                } else {
                    serde_json::Value::String(v.to_string())
                }
            }
            Self::Dec(s) => serde_json::Value::String(s.clone()),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Arr(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Obj(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Self::Int(v.into())
                } else if let Some(v) = n.as_u64() {
                    Self::Int(v.into())
                } else {
                    Self::Dec(n.to_string())
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::Arr(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Obj(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self::from_json(serde_json::Value::deserialize(
            deserializer,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_ints_stay_numbers() {
        assert_eq!(Value::Int(42).to_json(), serde_json::json!(42));
        assert_eq!(Value::Int(-7).to_json(), serde_json::json!(-7));
    }

    #[test]
    fn wide_ints_become_decimal_strings() {
        let v = Value::Int(u64::MAX as i128);
        assert_eq!(v.to_json(), serde_json::json!(u64::MAX.to_string()));
    }

    #[test]
    fn object_serialization_is_key_ordered() {
        let v = Value::obj([
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Int(1)),
        ]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn shallow_merge_overwrites_top_level_keys_only() {
        let mut base = Value::obj([
            (
                "nested".to_string(),
                Value::obj([("keep".to_string(), Value::Bool(true))]),
            ),
            ("score".to_string(), Value::Int(1)),
        ]);
        base.merge_shallow(Value::obj([
            ("score".to_string(), Value::Int(2)),
            ("extra".to_string(), Value::Str("x".into())),
        ]));

        let map = base.as_obj().unwrap();
        assert_eq!(map["score"], Value::Int(2));
        assert_eq!(map["extra"], Value::Str("x".into()));
        // Untouched keys survive a shallow merge.
        assert!(map["nested"].as_obj().unwrap().contains_key("keep"));
    }

    #[test]
    fn json_roundtrip_preserves_small_values() {
        let v = Value::obj([
            ("n".to_string(), Value::Int(5)),
            ("s".to_string(), Value::Str("hi".into())),
            ("b".to_string(), Value::Bool(false)),
        ]);
        let encoded = serde_json::to_string(&v).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(v, decoded);
    }
}
