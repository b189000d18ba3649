//! JSON payload conversion.
//!
//! Payloads are usually authored as JSON by hand: `{ "Burn": 0 }`,
//! `{ "Mint": "" }`, `{ "name": "My NFT Token", "symbol": "NFT" }`. This module
//! turns such a document into a `Value` by walking it against the schema,
//! and renders decoded values back into JSON for display.
//!
//! Conventions:
//!   - variants: single-key object `{ "Arm": payload }`, or a bare string for
//!     arms without a payload; arm names match case-insensitively
//!   - composite fields: exact name, or the camelCase spelling of a snake_case field
//!   - integers: JSON numbers, or decimal strings for values beyond 64 bits
//!   - bytes: `0x`-prefixed hex strings or arrays of numbers
//!   - optionals and unit: `null` is absent / unit

use serde_json::{Map, Number, Value as Json};

use crate::codec::EncodeError;
use crate::schema::{Primitive, TypeDef, TypeSchema, VariantArm};
use crate::value::Value;

const MAX_DEPTH: usize = crate::codec::MAX_DEPTH;

/// Convert a JSON document into a `Value` shaped for `type_name`.
pub fn from_json(schema: &TypeSchema, type_name: &str, json: &Json) -> Result<Value, EncodeError> {
    convert(schema, type_name, json, 0)
}

fn invalid(ty: &str, json: &Json) -> EncodeError {
    let reason = match json {
        Json::Null => "null".to_owned(),
        Json::Bool(_) => "a JSON bool".to_owned(),
        Json::Number(n) => format!("the number {n}"),
        Json::String(s) => format!("the string {s:?}"),
        Json::Array(_) => "a JSON array".to_owned(),
        Json::Object(_) => "a JSON object".to_owned(),
    };
    EncodeError::InvalidLiteral {
        ty: ty.to_owned(),
        reason,
    }
}

fn convert(schema: &TypeSchema, ty: &str, json: &Json, depth: usize) -> Result<Value, EncodeError> {
    if depth > MAX_DEPTH {
        return Err(EncodeError::TooDeep(MAX_DEPTH));
    }
    let def = schema
        .get(ty)
        .ok_or_else(|| EncodeError::UnknownType(ty.to_owned()))?;

    match def {
        TypeDef::Primitive(prim) => convert_primitive(ty, *prim, json),

        TypeDef::Composite(fields) => {
            let Json::Object(obj) = json else {
                return Err(invalid(ty, json));
            };
            let mut out = std::collections::BTreeMap::new();
            for field in fields {
                let v = lookup_field(obj, &field.name).ok_or_else(|| EncodeError::MissingField {
                    ty: ty.to_owned(),
                    field: field.name.clone(),
                })?;
                out.insert(field.name.clone(), convert(schema, &field.ty, v, depth + 1)?);
            }
            Ok(Value::Composite(out))
        }

        TypeDef::Variant(arms) => {
            let (key, payload) = match json {
                Json::String(s) => (s.as_str(), None),
                Json::Object(obj) if obj.len() == 1 => {
                    let (k, v) = obj.iter().next().ok_or_else(|| invalid(ty, json))?;
                    (k.as_str(), Some(v))
                }
                _ => return Err(invalid(ty, json)),
            };
            let arm = find_arm(arms, key).ok_or_else(|| EncodeError::UnknownVariant {
                ty: ty.to_owned(),
                arm: key.to_owned(),
            })?;
            let payload = match (&arm.payload, payload) {
                (Some(payload_ty), Some(v)) => {
                    Some(Box::new(convert(schema, payload_ty, v, depth + 1)?))
                }
                (None, None) => None,
                // `{ "Mint": "" }` and `{ "Mint": null }` both name a bare arm.
                (None, Some(v)) if is_empty_literal(v) => None,
                (expected, _) => {
                    return Err(EncodeError::VariantPayload {
                        ty: ty.to_owned(),
                        arm: arm.name.clone(),
                        expects_payload: expected.is_some(),
                    })
                }
            };
            Ok(Value::Variant {
                name: arm.name.clone(),
                payload,
            })
        }

        TypeDef::Sequence(elem) => {
            let Json::Array(items) = json else {
                return Err(invalid(ty, json));
            };
            items
                .iter()
                .map(|item| convert(schema, elem, item, depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence)
        }

        TypeDef::Optional(inner) => match json {
            Json::Null => Ok(Value::Optional(None)),
            other => Ok(Value::some(convert(schema, inner, other, depth + 1)?)),
        },
    }
}

fn is_empty_literal(json: &Json) -> bool {
    match json {
        Json::Null => true,
        Json::String(s) => s.is_empty(),
        Json::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn find_arm<'a>(arms: &'a [VariantArm], key: &str) -> Option<&'a VariantArm> {
    arms.iter()
        .find(|a| a.name == key)
        .or_else(|| arms.iter().find(|a| a.name.eq_ignore_ascii_case(key)))
}

fn lookup_field<'a>(obj: &'a Map<String, Json>, name: &str) -> Option<&'a Json> {
    obj.get(name).or_else(|| obj.get(&camel_case(name)))
}

/// `token_id` → `tokenId`.
fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn convert_primitive(ty: &str, prim: Primitive, json: &Json) -> Result<Value, EncodeError> {
    if prim.int_width().is_some() {
        return parse_int(ty, prim.is_signed(), json);
    }
    match (prim, json) {
        (Primitive::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (Primitive::Text, Json::String(s)) => Ok(Value::Text(s.clone())),
        (Primitive::Bytes | Primitive::FixedBytes(_), _) => parse_bytes(ty, json).map(Value::Bytes),
        (Primitive::Unit, v) if is_empty_literal(v) => Ok(Value::Unit),
        (_, other) => Err(invalid(ty, other)),
    }
}

fn parse_int(ty: &str, signed: bool, json: &Json) -> Result<Value, EncodeError> {
    let value = match json {
        Json::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::UInt(u128::from(u))
            } else if let Some(i) = n.as_i64() {
                Value::Int(i128::from(i))
            } else {
                return Err(invalid(ty, json));
            }
        }
        Json::String(s) => {
            if let Ok(u) = s.parse::<u128>() {
                Value::UInt(u)
            } else if let Ok(i) = s.parse::<i128>() {
                Value::Int(i)
            } else {
                return Err(invalid(ty, json));
            }
        }
        _ => return Err(invalid(ty, json)),
    };
    // Normalise so that decode(encode(v)) compares equal to the converted value.
    Ok(match (signed, value) {
        (true, Value::UInt(u)) => match i128::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::UInt(u),
        },
        (false, Value::Int(i)) => match u128::try_from(i) {
            Ok(u) => Value::UInt(u),
            Err(_) => Value::Int(i),
        },
        (_, v) => v,
    })
}

fn parse_bytes(ty: &str, json: &Json) -> Result<Vec<u8>, EncodeError> {
    match json {
        Json::String(s) => {
            let raw = s.strip_prefix("0x").unwrap_or(s);
            hex::decode(raw).map_err(|_| invalid(ty, json))
        }
        Json::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| invalid(ty, item))
            })
            .collect(),
        _ => Err(invalid(ty, json)),
    }
}

/// Render a decoded value as JSON, in the same conventions `from_json` reads.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Unit => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::UInt(u) => match u64::try_from(*u) {
            Ok(small) => Json::Number(Number::from(small)),
            Err(_) => Json::String(u.to_string()),
        },
        Value::Int(i) => match i64::try_from(*i) {
            Ok(small) => Json::Number(Number::from(small)),
            Err(_) => Json::String(i.to_string()),
        },
        Value::Bytes(b) => Json::String(format!("0x{}", hex::encode(b))),
        Value::Text(s) => Json::String(s.clone()),
        Value::Composite(fields) => Json::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
        Value::Variant { name, payload } => match payload {
            None => Json::String(name.clone()),
            Some(p) => {
                let mut obj = Map::new();
                obj.insert(name.clone(), to_json(p));
                Json::Object(obj)
            }
        },
        Value::Sequence(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Optional(None) => Json::Null,
        Value::Optional(Some(inner)) => to_json(inner),
    }
}
