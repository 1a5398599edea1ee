//! SCALE decoding of contract event payloads.
//!
//! Payload layout: one dispatch-index byte selecting the event declaration,
//! then the event's fields in declaration order: little-endian integers of
//! the declared width, compact-length-prefixed byte strings, fixed arrays
//! with no prefix. Opaque fields swallow the remainder of the payload as
//! hex; complex types never hard-fail the decode.

use std::collections::BTreeMap;

use parity_scale_codec::Decode;

use triggr_common::{Result, TriggrError, Value};
use triggr_registry::{EventDecl, ScalarType};

/// Decode one emitted event against a project's schema. Returns the event
/// name and its decoded fields.
pub fn decode_event_payload(
    schema: &[EventDecl],
    payload: &[u8],
) -> Result<(String, BTreeMap<String, Value>)> {
    let (&index, mut input) = payload
        .split_first()
        .ok_or_else(|| TriggrError::Chain("empty event payload".into()))?;

    let decl = schema.get(index as usize).ok_or_else(|| {
        TriggrError::Chain(format!(
            "event dispatch index {index} out of range (schema has {} events)",
            schema.len()
        ))
    })?;

    let mut fields = BTreeMap::new();
    for (name, scalar) in &decl.fields {
        let value = decode_scalar(*scalar, &mut input).map_err(|e| {
            TriggrError::Chain(format!("field {} of {}: {e}", name, decl.name))
        })?;
        fields.insert(name.clone(), value);
    }

    Ok((decl.name.clone(), fields))
}

fn decode_scalar(scalar: ScalarType, input: &mut &[u8]) -> Result<Value> {
    let value = match scalar {
        ScalarType::U8 => Value::Int(decode_prim::<u8>(input)?.into()),
        ScalarType::U16 => Value::Int(decode_prim::<u16>(input)?.into()),
        ScalarType::U32 => Value::Int(decode_prim::<u32>(input)?.into()),
        ScalarType::U64 => Value::Int(decode_prim::<u64>(input)?.into()),
        ScalarType::U128 => {
            let v = decode_prim::<u128>(input)?;
            match i128::try_from(v) {
                Ok(v) => Value::Int(v),
                // Beyond i128: keep the exact digits as a decimal string.
                Err(_) => Value::Dec(v.to_string()),
            }
        }
        ScalarType::I8 => Value::Int(decode_prim::<i8>(input)?.into()),
        ScalarType::I16 => Value::Int(decode_prim::<i16>(input)?.into()),
        ScalarType::I32 => Value::Int(decode_prim::<i32>(input)?.into()),
        ScalarType::I64 => Value::Int(decode_prim::<i64>(input)?.into()),
        ScalarType::I128 => Value::Int(decode_prim::<i128>(input)?),
        ScalarType::Bool => Value::Bool(decode_prim::<bool>(input)?),
        ScalarType::BytesFixed(len) => {
            let bytes = take(input, len as usize)?;
            Value::Str(hex_str(bytes))
        }
        ScalarType::Bytes => {
            let bytes = decode_prim::<Vec<u8>>(input)?;
            match String::from_utf8(bytes.clone()) {
                Ok(text) => Value::Str(text),
                Err(_) => Value::Str(hex_str(&bytes)),
            }
        }
        ScalarType::Account => {
            let bytes = take(input, 32)?;
            Value::Str(hex_str(bytes))
        }
        ScalarType::Opaque => {
            let rest = std::mem::take(input);
            Value::Str(hex_str(rest))
        }
    };
    Ok(value)
}

fn decode_prim<T: Decode>(input: &mut &[u8]) -> Result<T> {
    T::decode(input).map_err(|e| TriggrError::Chain(e.to_string()))
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(TriggrError::Chain(format!(
            "unexpected end of payload: wanted {len} bytes, have {}",
            input.len()
        )));
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

fn hex_str(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_scale_codec::Encode;

    fn schema() -> Vec<EventDecl> {
        vec![
            EventDecl {
                name: "ValueChanged".into(),
                fields: vec![
                    ("value".into(), ScalarType::U64),
                    ("active".into(), ScalarType::Bool),
                ],
            },
            EventDecl {
                name: "Transferred".into(),
                fields: vec![
                    ("from".into(), ScalarType::Account),
                    ("amount".into(), ScalarType::U128),
                    ("memo".into(), ScalarType::Bytes),
                ],
            },
            EventDecl {
                name: "Raw".into(),
                fields: vec![("inner".into(), ScalarType::Opaque)],
            },
        ]
    }

    #[test]
    fn decodes_integers_and_bools() {
        let mut payload = vec![0u8];
        payload.extend(42u64.encode());
        payload.extend(true.encode());

        let (name, fields) = decode_event_payload(&schema(), &payload).unwrap();
        assert_eq!(name, "ValueChanged");
        assert_eq!(fields["value"], Value::Int(42));
        assert_eq!(fields["active"], Value::Bool(true));
    }

    #[test]
    fn decodes_accounts_amounts_and_utf8_memo() {
        let mut payload = vec![1u8];
        payload.extend([7u8; 32]);
        payload.extend(1_000_000u128.encode());
        payload.extend(b"hello".to_vec().encode());

        let (name, fields) = decode_event_payload(&schema(), &payload).unwrap();
        assert_eq!(name, "Transferred");
        assert_eq!(
            fields["from"],
            Value::Str(format!("0x{}", "07".repeat(32)))
        );
        assert_eq!(fields["amount"], Value::Int(1_000_000));
        assert_eq!(fields["memo"], Value::Str("hello".into()));
    }

    #[test]
    fn non_utf8_bytes_render_as_hex() {
        let mut payload = vec![1u8];
        payload.extend([0u8; 32]);
        payload.extend(5u128.encode());
        payload.extend(vec![0xff, 0xfe].encode());

        let (_, fields) = decode_event_payload(&schema(), &payload).unwrap();
        assert_eq!(fields["memo"], Value::Str("0xfffe".into()));
    }

    #[test]
    fn opaque_swallows_remainder_as_hex() {
        let payload = vec![2u8, 0xde, 0xad, 0xbe, 0xef];
        let (name, fields) = decode_event_payload(&schema(), &payload).unwrap();
        assert_eq!(name, "Raw");
        assert_eq!(fields["inner"], Value::Str("0xdeadbeef".into()));
    }

    #[test]
    fn out_of_range_dispatch_index_errors() {
        let err = decode_event_payload(&schema(), &[9u8, 0, 0]).unwrap_err();
        assert!(matches!(err, TriggrError::Chain(_)));
        assert!(err.to_string().contains("dispatch index 9"));
    }

    #[test]
    fn truncated_payload_errors_with_field_context() {
        let payload = vec![0u8, 1, 2];
        let err = decode_event_payload(&schema(), &payload).unwrap_err();
        assert!(err.to_string().contains("field value of ValueChanged"));
    }

    #[test]
    fn u128_beyond_i128_keeps_exact_digits() {
        let huge = u128::MAX;
        let mut payload = vec![1u8];
        payload.extend([0u8; 32]);
        payload.extend(huge.encode());
        payload.extend(Vec::<u8>::new().encode());

        let (_, fields) = decode_event_payload(&schema(), &payload).unwrap();
        assert_eq!(fields["amount"], Value::Dec(huge.to_string()));
    }
}
