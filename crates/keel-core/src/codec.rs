//! Schema-driven codec. Pure: no I/O, no logging, no global state.
//!
//! `encode` walks a `Value` against a named schema type and emits the wire
//! layout documented in `wire`; `decode` is its exact inverse. Encoding is
//! deterministic, so the same `(schema, type, value)` always yields the same
//! bytes, which gas estimation and transaction identity both depend on.

use bytes::Bytes;

use crate::schema::{Primitive, SchemaId, TypeDef, TypeSchema};
use crate::value::Value;
use crate::wire::{Reader, WireError, Writer, BOOL_FALSE, BOOL_TRUE, OPTION_NONE, OPTION_SOME};

/// Nesting limit for both directions. Bounds recursion on recursive type
/// graphs and on hostile input.
pub const MAX_DEPTH: usize = 64;

/// Upper bound on the element count of a sequence whose element type has
/// zero wire size, where the input length cannot bound it.
pub const MAX_ZERO_SIZED_ELEMENTS: usize = 1 << 16;

/// Name used by `EncodedPayload::empty`.
pub const EMPTY_PAYLOAD_TYPE: &str = "()";

// ── Encoded payload ───────────────────────────────────────────────────────────

/// Bytes produced by `encode`, tagged with the schema and type that produced
/// them. Only the codec constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    schema_id: SchemaId,
    type_name: String,
    bytes: Bytes,
}

impl EncodedPayload {
    /// Zero-length payload, for entry points that declare no input type.
    pub fn empty(schema: &TypeSchema) -> Self {
        Self {
            schema_id: schema.id(),
            type_name: EMPTY_PAYLOAD_TYPE.to_owned(),
            bytes: Bytes::new(),
        }
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Encode `value` as the schema type `type_name`.
pub fn encode(
    schema: &TypeSchema,
    type_name: &str,
    value: &Value,
) -> Result<EncodedPayload, EncodeError> {
    let mut w = Writer::new();
    encode_node(schema, type_name, value, &mut w, 0)?;
    Ok(EncodedPayload {
        schema_id: schema.id(),
        type_name: type_name.to_owned(),
        bytes: Bytes::from(w.into_bytes()),
    })
}

fn mismatch(ty: &str, expected: &'static str, found: &Value) -> EncodeError {
    EncodeError::TypeMismatch {
        ty: ty.to_owned(),
        expected,
        found: found.kind(),
    }
}

fn encode_node(
    schema: &TypeSchema,
    ty: &str,
    value: &Value,
    w: &mut Writer,
    depth: usize,
) -> Result<(), EncodeError> {
    if depth > MAX_DEPTH {
        return Err(EncodeError::TooDeep(MAX_DEPTH));
    }
    let def = schema
        .get(ty)
        .ok_or_else(|| EncodeError::UnknownType(ty.to_owned()))?;

    match def {
        TypeDef::Primitive(prim) => encode_primitive(ty, *prim, value, w),

        TypeDef::Composite(fields) => {
            let Value::Composite(map) = value else {
                return Err(mismatch(ty, "composite", value));
            };
            // Extra fields in `map` are ignored.
            for field in fields {
                let v = map.get(&field.name).ok_or_else(|| EncodeError::MissingField {
                    ty: ty.to_owned(),
                    field: field.name.clone(),
                })?;
                encode_node(schema, &field.ty, v, w, depth + 1)?;
            }
            Ok(())
        }

        TypeDef::Variant(arms) => {
            let Value::Variant { name, payload } = value else {
                return Err(mismatch(ty, "variant", value));
            };
            let arm = arms
                .iter()
                .find(|a| &a.name == name)
                .ok_or_else(|| EncodeError::UnknownVariant {
                    ty: ty.to_owned(),
                    arm: name.clone(),
                })?;
            w.put_u8(arm.tag);
            match (&arm.payload, payload) {
                (Some(payload_ty), Some(v)) => encode_node(schema, payload_ty, v, w, depth + 1),
                (None, None) => Ok(()),
                (expected, _) => Err(EncodeError::VariantPayload {
                    ty: ty.to_owned(),
                    arm: arm.name.clone(),
                    expects_payload: expected.is_some(),
                }),
            }
        }

        TypeDef::Sequence(elem) => {
            let Value::Sequence(items) = value else {
                return Err(mismatch(ty, "sequence", value));
            };
            w.put_compact(items.len() as u64);
            for item in items {
                encode_node(schema, elem, item, w, depth + 1)?;
            }
            Ok(())
        }

        TypeDef::Optional(inner) => {
            let Value::Optional(opt) = value else {
                return Err(mismatch(ty, "optional", value));
            };
            match opt {
                None => w.put_u8(OPTION_NONE),
                Some(v) => {
                    w.put_u8(OPTION_SOME);
                    encode_node(schema, inner, v, w, depth + 1)?;
                }
            }
            Ok(())
        }
    }
}

fn encode_primitive(
    ty: &str,
    prim: Primitive,
    value: &Value,
    w: &mut Writer,
) -> Result<(), EncodeError> {
    if let Some(width) = prim.int_width() {
        let le = if prim.is_signed() {
            let v = match value {
                Value::Int(v) => *v,
                Value::UInt(v) => i128::try_from(*v).map_err(|_| out_of_range(ty, value))?,
                other => return Err(mismatch(ty, "integer", other)),
            };
            let bits = (width * 8) as u32;
            if bits < 128 {
                let max = (1i128 << (bits - 1)) - 1;
                let min = -(1i128 << (bits - 1));
                if v < min || v > max {
                    return Err(out_of_range(ty, value));
                }
            }
            v.to_le_bytes()
        } else {
            let v = match value {
                Value::UInt(v) => *v,
                Value::Int(v) => u128::try_from(*v).map_err(|_| out_of_range(ty, value))?,
                other => return Err(mismatch(ty, "integer", other)),
            };
            let bits = (width * 8) as u32;
            if bits < 128 && v >> bits != 0 {
                return Err(out_of_range(ty, value));
            }
            v.to_le_bytes()
        };
        w.put_slice(&le[..width]);
        return Ok(());
    }

    match (prim, value) {
        (Primitive::Bool, Value::Bool(b)) => {
            w.put_u8(if *b { BOOL_TRUE } else { BOOL_FALSE });
            Ok(())
        }
        (Primitive::Bytes, Value::Bytes(b)) => {
            w.put_prefixed(b);
            Ok(())
        }
        (Primitive::Text, Value::Text(s)) => {
            w.put_str(s);
            Ok(())
        }
        (Primitive::FixedBytes(n), Value::Bytes(b)) => {
            if b.len() != n {
                return Err(EncodeError::LengthMismatch {
                    ty: ty.to_owned(),
                    expected: n,
                    found: b.len(),
                });
            }
            w.put_slice(b);
            Ok(())
        }
        (Primitive::Unit, Value::Unit) => Ok(()),
        (Primitive::Bool, other) => Err(mismatch(ty, "bool", other)),
        (Primitive::Bytes | Primitive::FixedBytes(_), other) => Err(mismatch(ty, "bytes", other)),
        (Primitive::Text, other) => Err(mismatch(ty, "text", other)),
        (_, other) => Err(mismatch(ty, "unit", other)),
    }
}

fn out_of_range(ty: &str, value: &Value) -> EncodeError {
    let shown = match value {
        Value::UInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        other => other.kind().to_owned(),
    };
    EncodeError::OutOfRange {
        ty: ty.to_owned(),
        value: shown,
    }
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decode `bytes` as the schema type `type_name`. The whole input must be
/// consumed.
pub fn decode(schema: &TypeSchema, type_name: &str, bytes: &[u8]) -> Result<Value, DecodeError> {
    if !schema.contains(type_name) {
        return Err(DecodeError::UnknownType(type_name.to_owned()));
    }
    let mut r = Reader::new(bytes);
    let value = decode_node(schema, type_name, &mut r, 0)?;
    if !r.is_empty() {
        return Err(DecodeError::TrailingBytes(r.remaining()));
    }
    Ok(value)
}

/// Decode a payload produced by `encode`, refusing payloads produced under a
/// different schema.
pub fn decode_payload(schema: &TypeSchema, payload: &EncodedPayload) -> Result<Value, DecodeError> {
    if payload.schema_id != schema.id() {
        return Err(DecodeError::SchemaMismatch {
            expected: schema.id(),
            found: payload.schema_id,
        });
    }
    if payload.type_name == EMPTY_PAYLOAD_TYPE && schema.get(EMPTY_PAYLOAD_TYPE).is_none() {
        return match payload.bytes.len() {
            0 => Ok(Value::Unit),
            n => Err(DecodeError::TrailingBytes(n)),
        };
    }
    decode(schema, &payload.type_name, &payload.bytes)
}

fn decode_node(
    schema: &TypeSchema,
    ty: &str,
    r: &mut Reader<'_>,
    depth: usize,
) -> Result<Value, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::TooDeep(MAX_DEPTH));
    }
    let def = schema
        .get(ty)
        .ok_or_else(|| DecodeError::UnknownType(ty.to_owned()))?;

    match def {
        TypeDef::Primitive(prim) => decode_primitive(*prim, r),

        TypeDef::Composite(fields) => {
            let mut map = std::collections::BTreeMap::new();
            for field in fields {
                let v = decode_node(schema, &field.ty, r, depth + 1)?;
                map.insert(field.name.clone(), v);
            }
            Ok(Value::Composite(map))
        }

        TypeDef::Variant(arms) => {
            let tag = r.u8()?;
            let arm = arms
                .iter()
                .find(|a| a.tag == tag)
                .ok_or_else(|| DecodeError::InvalidDiscriminant {
                    ty: ty.to_owned(),
                    tag,
                })?;
            let payload = match &arm.payload {
                Some(payload_ty) => Some(Box::new(decode_node(schema, payload_ty, r, depth + 1)?)),
                None => None,
            };
            Ok(Value::Variant {
                name: arm.name.clone(),
                payload,
            })
        }

        TypeDef::Sequence(elem) => {
            let len = r.length()?;
            let min = min_size(schema, elem, 0);
            if min == 0 {
                if len > MAX_ZERO_SIZED_ELEMENTS {
                    return Err(DecodeError::LengthLimit(len));
                }
            } else if len > r.remaining() / min {
                return Err(DecodeError::Truncated {
                    needed: len.saturating_mul(min),
                    remaining: r.remaining(),
                });
            }
            let mut items = Vec::with_capacity(len.min(r.remaining()));
            for _ in 0..len {
                items.push(decode_node(schema, elem, r, depth + 1)?);
            }
            Ok(Value::Sequence(items))
        }

        TypeDef::Optional(inner) => match r.u8()? {
            OPTION_NONE => Ok(Value::Optional(None)),
            OPTION_SOME => Ok(Value::Optional(Some(Box::new(decode_node(
                schema,
                inner,
                r,
                depth + 1,
            )?)))),
            other => Err(DecodeError::InvalidOptionFlag(other)),
        },
    }
}

fn decode_primitive(prim: Primitive, r: &mut Reader<'_>) -> Result<Value, DecodeError> {
    if let Some(width) = prim.int_width() {
        let raw = r.take(width)?;
        let negative = prim.is_signed() && raw[width - 1] & 0x80 != 0;
        let mut le = if negative { [0xffu8; 16] } else { [0u8; 16] };
        le[..width].copy_from_slice(raw);
        return Ok(if prim.is_signed() {
            Value::Int(i128::from_le_bytes(le))
        } else {
            Value::UInt(u128::from_le_bytes(le))
        });
    }

    let value = match prim {
        Primitive::Bool => match r.u8()? {
            BOOL_FALSE => Value::Bool(false),
            BOOL_TRUE => Value::Bool(true),
            other => return Err(DecodeError::InvalidBool(other)),
        },
        Primitive::Bytes => Value::Bytes(r.prefixed()?.to_vec()),
        Primitive::Text => Value::Text(r.string()?),
        Primitive::FixedBytes(n) => Value::Bytes(r.take(n)?.to_vec()),
        Primitive::Unit => Value::Unit,
        // integer widths handled above
        _ => unreachable!("integer primitive without width"),
    };
    Ok(value)
}

/// Smallest possible wire size of `ty`. Cycles through composites count as
/// zero past the depth limit, which only makes the bound more permissive.
fn min_size(schema: &TypeSchema, ty: &str, depth: usize) -> usize {
    if depth > MAX_DEPTH {
        return 0;
    }
    match schema.get(ty) {
        None => 0,
        Some(TypeDef::Primitive(p)) => match p {
            Primitive::Bool => 1,
            Primitive::Bytes | Primitive::Text => 1,
            Primitive::FixedBytes(n) => *n,
            Primitive::Unit => 0,
            other => other.int_width().unwrap_or(0),
        },
        Some(TypeDef::Composite(fields)) => fields
            .iter()
            .map(|f| min_size(schema, &f.ty, depth + 1))
            .fold(0usize, usize::saturating_add),
        Some(TypeDef::Variant(_)) | Some(TypeDef::Sequence(_)) | Some(TypeDef::Optional(_)) => 1,
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("type `{0}` is not declared in the schema")]
    UnknownType(String),

    #[error("`{ty}` requires field `{field}`")]
    MissingField { ty: String, field: String },

    #[error("`{ty}` has no variant `{arm}`")]
    UnknownVariant { ty: String, arm: String },

    #[error("variant `{ty}::{arm}` payload does not match its declaration (expects payload: {expects_payload})")]
    VariantPayload {
        ty: String,
        arm: String,
        expects_payload: bool,
    },

    #[error("`{ty}` expects {expected}, got {found}")]
    TypeMismatch {
        ty: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("value {value} does not fit `{ty}`")]
    OutOfRange { ty: String, value: String },

    #[error("`{ty}` expects exactly {expected} bytes, got {found}")]
    LengthMismatch {
        ty: String,
        expected: usize,
        found: usize,
    },

    #[error("`{ty}` cannot be built from {reason}")]
    InvalidLiteral { ty: String, reason: String },

    #[error("value nesting exceeds {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("type `{0}` is not declared in the schema")]
    UnknownType(String),

    #[error("payload was encoded under schema {found}, not {expected}")]
    SchemaMismatch { expected: SchemaId, found: SchemaId },

    #[error("truncated input: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("`{ty}` has no variant with tag {tag}")]
    InvalidDiscriminant { ty: String, tag: u8 },

    #[error("invalid bool byte 0x{0:02x}")]
    InvalidBool(u8),

    #[error("invalid option flag 0x{0:02x}")]
    InvalidOptionFlag(u8),

    #[error("text is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid length prefix: {0}")]
    InvalidLength(String),

    #[error("sequence of {0} zero-sized elements exceeds the limit")]
    LengthLimit(usize),

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    #[error("payload nesting exceeds {0} levels")]
    TooDeep(usize),
}

impl From<WireError> for DecodeError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Truncated { needed, remaining } => DecodeError::Truncated { needed, remaining },
            WireError::InvalidUtf8 => DecodeError::InvalidUtf8,
            other => DecodeError::InvalidLength(other.to_string()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
