//! Contract descriptor (`contracts.json`) parsing.
//!
//! The descriptor is an ink!-style metadata file. We walk `spec.events` and
//! the `types` table once at upload time and resolve every event argument to
//! a supported scalar type. Anything the type walker cannot resolve becomes
//! `Opaque` and decodes to a raw hex string at runtime, never an error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use triggr_common::{Result, TriggrError};

/// Scalar types the event decoder supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    U8,
    U16,
    U32,
    U64,
    U128,
    I8,
    I16,
    I32,
    I64,
    I128,
    Bool,
    /// Fixed-length byte array, rendered as hex.
    BytesFixed(u32),
    /// Length-prefixed byte string: UTF-8 when valid, hex otherwise.
    Bytes,
    /// 32-byte account id, rendered as hex.
    Account,
    /// Unresolvable field; the raw remainder of the payload as hex.
    Opaque,
}

/// One event declaration from the descriptor, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDecl {
    pub name: String,
    pub fields: Vec<(String, ScalarType)>,
}

/// The parts of the descriptor the node keeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDescriptor {
    pub contract_name: String,
    pub contract_hash: String,
    pub events: Vec<EventDecl>,
}

/// Parse and validate an uploaded descriptor. Required top-level keys:
/// `source` (with `hash`), `contract` (with `name`), `spec`, `types`,
/// `version`. Everything else is ignored.
pub fn parse_descriptor(raw: &serde_json::Value) -> Result<ContractDescriptor> {
    let root = raw
        .as_object()
        .ok_or_else(|| TriggrError::validation("descriptor must be a JSON object"))?;

    for key in ["source", "contract", "spec", "types", "version"] {
        if !root.contains_key(key) {
            return Err(TriggrError::validation(format!(
                "descriptor missing required key {key:?}"
            )));
        }
    }

    let contract_hash = raw
        .pointer("/source/hash")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TriggrError::validation("descriptor source.hash must be a string"))?
        .to_string();

    let contract_name = raw
        .pointer("/contract/name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TriggrError::validation("descriptor contract.name must be a string"))?
        .to_string();

    let types = raw
        .get("types")
        .and_then(|v| v.as_array())
        .ok_or_else(|| TriggrError::validation("descriptor types must be an array"))?;
    let table = TypeTable::build(types);

    let events_json = match raw.pointer("/spec/events") {
        Some(serde_json::Value::Array(events)) => events.as_slice(),
        Some(_) => return Err(TriggrError::validation("spec.events must be an array")),
        None => &[],
    };

    let mut events = Vec::with_capacity(events_json.len());
    for (index, event) in events_json.iter().enumerate() {
        let name = label_of(event).ok_or_else(|| {
            TriggrError::validation(format!("event #{index} has no label"))
        })?;
        if events.iter().any(|e: &EventDecl| e.name == name) {
            return Err(TriggrError::validation(format!(
                "duplicate event {name:?} in descriptor"
            )));
        }

        let args = event
            .get("args")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);

        let mut fields = Vec::with_capacity(args.len());
        for (arg_index, arg) in args.iter().enumerate() {
            let field_name = label_of(arg).ok_or_else(|| {
                TriggrError::validation(format!(
                    "event {name:?} arg #{arg_index} has no label"
                ))
            })?;
            let scalar = arg
                .pointer("/type/type")
                .and_then(|v| v.as_u64())
                .map(|id| table.resolve(id))
                .unwrap_or(ScalarType::Opaque);
            fields.push((field_name, scalar));
        }

        events.push(EventDecl { name, fields });
    }

    Ok(ContractDescriptor {
        contract_name,
        contract_hash,
        events,
    })
}

fn label_of(node: &serde_json::Value) -> Option<String> {
    node.get("label")
        .or_else(|| node.get("name"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Resolved view of the descriptor's `types` array.
struct TypeTable {
    defs: HashMap<u64, serde_json::Value>,
}

impl TypeTable {
    fn build(types: &[serde_json::Value]) -> Self {
        let mut defs = HashMap::new();
        for entry in types {
            if let Some(id) = entry.get("id").and_then(|v| v.as_u64()) {
                if let Some(ty) = entry.get("type") {
                    defs.insert(id, ty.clone());
                }
            }
        }
        Self { defs }
    }

    fn resolve(&self, id: u64) -> ScalarType {
        self.resolve_depth(id, 0)
    }

    /// Depth-bounded so a malformed self-referential table terminates.
    fn resolve_depth(&self, id: u64, depth: u8) -> ScalarType {
        if depth > 8 {
            return ScalarType::Opaque;
        }
        let Some(ty) = self.defs.get(&id) else {
            return ScalarType::Opaque;
        };

        if path_is_account(ty) {
            return ScalarType::Account;
        }

        if let Some(primitive) = ty.pointer("/def/primitive").and_then(|v| v.as_str()) {
            return match primitive {
                "u8" => ScalarType::U8,
                "u16" => ScalarType::U16,
                "u32" => ScalarType::U32,
                "u64" => ScalarType::U64,
                "u128" => ScalarType::U128,
                "i8" => ScalarType::I8,
                "i16" => ScalarType::I16,
                "i32" => ScalarType::I32,
                "i64" => ScalarType::I64,
                "i128" => ScalarType::I128,
                "bool" => ScalarType::Bool,
                "str" => ScalarType::Bytes,
                _ => ScalarType::Opaque,
            };
        }

        if let Some(array) = ty.pointer("/def/array") {
            let len = array.get("len").and_then(|v| v.as_u64());
            let elem = array
                .get("type")
                .and_then(|v| v.as_u64())
                .map(|e| self.resolve_depth(e, depth + 1));
            return match (len, elem) {
                (Some(len), Some(ScalarType::U8)) => ScalarType::BytesFixed(len as u32),
                _ => ScalarType::Opaque,
            };
        }

        if let Some(seq) = ty.pointer("/def/sequence") {
            let elem = seq
                .get("type")
                .and_then(|v| v.as_u64())
                .map(|e| self.resolve_depth(e, depth + 1));
            return match elem {
                Some(ScalarType::U8) => ScalarType::Bytes,
                _ => ScalarType::Opaque,
            };
        }

        // Single-field composites (newtypes) unwrap to their inner type;
        // AccountId was already caught by path above.
        if let Some(fields) = ty.pointer("/def/composite/fields").and_then(|v| v.as_array()) {
            if let [field] = fields.as_slice() {
                if let Some(inner) = field.get("type").and_then(|v| v.as_u64()) {
                    return self.resolve_depth(inner, depth + 1);
                }
            }
        }

        ScalarType::Opaque
    }
}

fn path_is_account(ty: &serde_json::Value) -> bool {
    ty.get("path")
        .and_then(|v| v.as_array())
        .and_then(|segments| segments.last())
        .and_then(|v| v.as_str())
        .map(|last| last == "AccountId" || last == "AccountId32")
        .unwrap_or(false)
}
