//! Type schema: the closed type graph a program declares in its metadata.
//!
//! A schema is loaded once per program and never mutated. Every type
//! reference inside it, including the entry-point declarations, resolves to
//! a type declared in the same schema; `load` refuses anything else.
//!
//! Metadata blob layout (all strings are compact-prefixed UTF-8):
//!
//!   magic "KMTA" | version u8 | title
//!   io:    6 × optional type name (init in/out, handle in/out, state in/out)
//!   types: compact count, then per type: name, kind u8, body
//!
//! Kinds: 0 primitive, 1 composite, 2 variant, 3 sequence, 4 optional.
//! See `Primitive::code` for primitive numbering.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::wire::{Reader, WireError, Writer};

// ── Constants ─────────────────────────────────────────────────────────────────

pub const METADATA_MAGIC: &[u8; 4] = b"KMTA";
pub const METADATA_VERSION: u8 = 0x01;

const KIND_PRIMITIVE: u8 = 0;
const KIND_COMPOSITE: u8 = 1;
const KIND_VARIANT: u8 = 2;
const KIND_SEQUENCE: u8 = 3;
const KIND_OPTIONAL: u8 = 4;

// ── Type definitions ──────────────────────────────────────────────────────────

/// Leaf types with a fixed wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
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
    /// Compact length + raw bytes.
    Bytes,
    /// Compact length + UTF-8.
    Text,
    /// Exactly N raw bytes (actor ids, hashes).
    FixedBytes(usize),
    /// Zero bytes on the wire.
    Unit,
}

impl Primitive {
    fn code(&self) -> u8 {
        match self {
            Self::Bool => 0,
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 3,
            Self::U64 => 4,
            Self::U128 => 5,
            Self::I8 => 6,
            Self::I16 => 7,
            Self::I32 => 8,
            Self::I64 => 9,
            Self::I128 => 10,
            Self::Bytes => 11,
            Self::Text => 12,
            Self::FixedBytes(_) => 13,
            Self::Unit => 14,
        }
    }

    /// Byte width for fixed-width integers, `None` for everything else.
    pub fn int_width(&self) -> Option<usize> {
        match self {
            Self::U8 | Self::I8 => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 => Some(4),
            Self::U64 | Self::I64 => Some(8),
            Self::U128 | Self::I128 => Some(16),
            _ => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::I128
        )
    }

    /// Canonical name, used by `SchemaBuilder::with_std_primitives`.
    pub fn name(&self) -> String {
        match self {
            Self::Bool => "bool".into(),
            Self::U8 => "u8".into(),
            Self::U16 => "u16".into(),
            Self::U32 => "u32".into(),
            Self::U64 => "u64".into(),
            Self::U128 => "u128".into(),
            Self::I8 => "i8".into(),
            Self::I16 => "i16".into(),
            Self::I32 => "i32".into(),
            Self::I64 => "i64".into(),
            Self::I128 => "i128".into(),
            Self::Bytes => "bytes".into(),
            Self::Text => "text".into(),
            Self::FixedBytes(n) => format!("[u8;{n}]"),
            Self::Unit => "()".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: String,
}

/// One arm of a tagged union. `payload` is `None` for bare arms like `Mint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantArm {
    pub name: String,
    pub tag: u8,
    pub payload: Option<String>,
}

impl VariantArm {
    pub fn new(name: impl Into<String>, tag: u8, payload: Option<&str>) -> Self {
        Self {
            name: name.into(),
            tag,
            payload: payload.map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDef {
    Primitive(Primitive),
    Composite(Vec<Field>),
    Variant(Vec<VariantArm>),
    Sequence(String),
    Optional(String),
}

impl TypeDef {
    /// Every type name this definition points at.
    fn references(&self) -> Vec<&str> {
        match self {
            Self::Primitive(_) => Vec::new(),
            Self::Composite(fields) => fields.iter().map(|f| f.ty.as_str()).collect(),
            Self::Variant(arms) => arms.iter().filter_map(|a| a.payload.as_deref()).collect(),
            Self::Sequence(elem) => vec![elem.as_str()],
            Self::Optional(inner) => vec![inner.as_str()],
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Primitive(_) => "primitive",
            Self::Composite(_) => "composite",
            Self::Variant(_) => "variant",
            Self::Sequence(_) => "sequence",
            Self::Optional(_) => "optional",
        }
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Which program entry point a payload is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    Init,
    Handle,
    State,
}

/// Declared input/output type per entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoTypes {
    pub init_input: Option<String>,
    pub init_output: Option<String>,
    pub handle_input: Option<String>,
    pub handle_output: Option<String>,
    pub state_input: Option<String>,
    pub state_output: Option<String>,
}

impl IoTypes {
    pub fn input(&self, entry: EntryPoint) -> Option<&str> {
        match entry {
            EntryPoint::Init => self.init_input.as_deref(),
            EntryPoint::Handle => self.handle_input.as_deref(),
            EntryPoint::State => self.state_input.as_deref(),
        }
    }

    pub fn output(&self, entry: EntryPoint) -> Option<&str> {
        match entry {
            EntryPoint::Init => self.init_output.as_deref(),
            EntryPoint::Handle => self.handle_output.as_deref(),
            EntryPoint::State => self.state_output.as_deref(),
        }
    }

    fn slots(&self) -> [(&'static str, &Option<String>); 6] {
        [
            ("init_input", &self.init_input),
            ("init_output", &self.init_output),
            ("handle_input", &self.handle_input),
            ("handle_output", &self.handle_output),
            ("state_input", &self.state_input),
            ("state_output", &self.state_output),
        ]
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// BLAKE3 hash of a schema's canonical metadata bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(pub [u8; 32]);

impl SchemaId {
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaId(0x{})", self.short())
    }
}

/// Immutable, closed mapping from type name to definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSchema {
    title: String,
    io: IoTypes,
    types: BTreeMap<String, TypeDef>,
    id: SchemaId,
}

impl TypeSchema {
    /// Parse a metadata blob into a validated schema.
    pub fn load(raw: &[u8]) -> Result<Self, SchemaError> {
        let mut r = Reader::new(raw);

        let magic = r.take(4)?;
        if magic != METADATA_MAGIC {
            return Err(SchemaError::Malformed(format!(
                "bad magic 0x{}",
                hex::encode(magic)
            )));
        }
        let version = r.u8()?;
        if version != METADATA_VERSION {
            return Err(SchemaError::Malformed(format!(
                "unsupported metadata version {version}"
            )));
        }

        let title = r.string()?;
        let io = IoTypes {
            init_input: read_opt_name(&mut r)?,
            init_output: read_opt_name(&mut r)?,
            handle_input: read_opt_name(&mut r)?,
            handle_output: read_opt_name(&mut r)?,
            state_input: read_opt_name(&mut r)?,
            state_output: read_opt_name(&mut r)?,
        };

        let count = r.length()?;
        let mut types = Vec::new();
        for _ in 0..count {
            let name = r.string()?;
            let def = read_type_def(&mut r)?;
            types.push((name, def));
        }

        if !r.is_empty() {
            return Err(SchemaError::Malformed(format!(
                "{} trailing bytes after type table",
                r.remaining()
            )));
        }

        Self::from_parts(title, io, types)
    }

    /// Validate and seal a schema. Shared by `load` and `SchemaBuilder`.
    fn from_parts(
        title: String,
        io: IoTypes,
        entries: Vec<(String, TypeDef)>,
    ) -> Result<Self, SchemaError> {
        let mut types = BTreeMap::new();
        for (name, def) in entries {
            check_def(&name, &def)?;
            if types.insert(name.clone(), def).is_some() {
                return Err(SchemaError::DuplicateType(name));
            }
        }

        for (name, def) in &types {
            for target in def.references() {
                if !types.contains_key(target) {
                    return Err(SchemaError::UnresolvedReference {
                        from: name.clone(),
                        missing: target.to_owned(),
                    });
                }
            }
        }
        for (slot, declared) in io.slots() {
            if let Some(target) = declared {
                if !types.contains_key(target) {
                    return Err(SchemaError::UnresolvedReference {
                        from: format!("<{slot}>"),
                        missing: target.clone(),
                    });
                }
            }
        }

        let mut schema = Self {
            title,
            io,
            types,
            id: SchemaId([0; 32]),
        };
        schema.id = SchemaId(*blake3::hash(&schema.to_bytes()).as_bytes());
        Ok(schema)
    }

    /// Canonical metadata blob. Types are written in name order, so two
    /// schemas with the same content always produce the same bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_slice(METADATA_MAGIC);
        w.put_u8(METADATA_VERSION);
        w.put_str(&self.title);
        for (_, declared) in self.io.slots() {
            write_opt_name(&mut w, declared.as_deref());
        }
        w.put_compact(self.types.len() as u64);
        for (name, def) in &self.types {
            w.put_str(name);
            write_type_def(&mut w, def);
        }
        w.into_bytes()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn io(&self) -> &IoTypes {
        &self.io
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn check_def(name: &str, def: &TypeDef) -> Result<(), SchemaError> {
    match def {
        TypeDef::Composite(fields) => {
            let mut seen = HashSet::new();
            for f in fields {
                if !seen.insert(f.name.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        ty: name.to_owned(),
                        field: f.name.clone(),
                    });
                }
            }
        }
        TypeDef::Variant(arms) => {
            let mut tags = HashSet::new();
            let mut names = HashSet::new();
            for arm in arms {
                if !tags.insert(arm.tag) {
                    return Err(SchemaError::DuplicateTag {
                        ty: name.to_owned(),
                        tag: arm.tag,
                    });
                }
                if !names.insert(arm.name.as_str()) {
                    return Err(SchemaError::DuplicateArm {
                        ty: name.to_owned(),
                        arm: arm.name.clone(),
                    });
                }
            }
        }
        _ => {}
    }
    Ok(())
}

// ── Blob reading / writing ────────────────────────────────────────────────────

fn read_opt_name(r: &mut Reader<'_>) -> Result<Option<String>, SchemaError> {
    match r.u8()? {
        0 => Ok(None),
        1 => Ok(Some(r.string()?)),
        other => Err(SchemaError::Malformed(format!(
            "invalid presence flag 0x{other:02x}"
        ))),
    }
}

fn write_opt_name(w: &mut Writer, name: Option<&str>) {
    match name {
        None => w.put_u8(0),
        Some(n) => {
            w.put_u8(1);
            w.put_str(n);
        }
    }
}

fn read_primitive(r: &mut Reader<'_>) -> Result<Primitive, SchemaError> {
    let prim = match r.u8()? {
        0 => Primitive::Bool,
        1 => Primitive::U8,
        2 => Primitive::U16,
        3 => Primitive::U32,
        4 => Primitive::U64,
        5 => Primitive::U128,
        6 => Primitive::I8,
        7 => Primitive::I16,
        8 => Primitive::I32,
        9 => Primitive::I64,
        10 => Primitive::I128,
        11 => Primitive::Bytes,
        12 => Primitive::Text,
        13 => Primitive::FixedBytes(r.length()?),
        14 => Primitive::Unit,
        other => {
            return Err(SchemaError::Malformed(format!(
                "unknown primitive code {other}"
            )))
        }
    };
    Ok(prim)
}

fn read_type_def(r: &mut Reader<'_>) -> Result<TypeDef, SchemaError> {
    let def = match r.u8()? {
        KIND_PRIMITIVE => TypeDef::Primitive(read_primitive(r)?),
        KIND_COMPOSITE => {
            let n = r.length()?;
            let mut fields = Vec::new();
            for _ in 0..n {
                let name = r.string()?;
                let ty = r.string()?;
                fields.push(Field { name, ty });
            }
            TypeDef::Composite(fields)
        }
        KIND_VARIANT => {
            let n = r.length()?;
            let mut arms = Vec::new();
            for _ in 0..n {
                let name = r.string()?;
                let tag = r.u8()?;
                let payload = read_opt_name(r)?;
                arms.push(VariantArm { name, tag, payload });
            }
            TypeDef::Variant(arms)
        }
        KIND_SEQUENCE => TypeDef::Sequence(r.string()?),
        KIND_OPTIONAL => TypeDef::Optional(r.string()?),
        other => {
            return Err(SchemaError::Malformed(format!(
                "unknown type kind {other}"
            )))
        }
    };
    Ok(def)
}

fn write_type_def(w: &mut Writer, def: &TypeDef) {
    match def {
        TypeDef::Primitive(p) => {
            w.put_u8(KIND_PRIMITIVE);
            w.put_u8(p.code());
            if let Primitive::FixedBytes(n) = p {
                w.put_compact(*n as u64);
            }
        }
        TypeDef::Composite(fields) => {
            w.put_u8(KIND_COMPOSITE);
            w.put_compact(fields.len() as u64);
            for f in fields {
                w.put_str(&f.name);
                w.put_str(&f.ty);
            }
        }
        TypeDef::Variant(arms) => {
            w.put_u8(KIND_VARIANT);
            w.put_compact(arms.len() as u64);
            for arm in arms {
                w.put_str(&arm.name);
                w.put_u8(arm.tag);
                write_opt_name(w, arm.payload.as_deref());
            }
        }
        TypeDef::Sequence(elem) => {
            w.put_u8(KIND_SEQUENCE);
            w.put_str(elem);
        }
        TypeDef::Optional(inner) => {
            w.put_u8(KIND_OPTIONAL);
            w.put_str(inner);
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Assembles a schema in code. `build` applies the same validation as `load`.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    title: String,
    io: IoTypes,
    types: Vec<(String, TypeDef)>,
}

impl SchemaBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Declare `bool`, the integer types, `bytes`, `text` and `()` under
    /// their canonical names.
    pub fn with_std_primitives(mut self) -> Self {
        use Primitive::*;
        for p in [
            Bool, U8, U16, U32, U64, U128, I8, I16, I32, I64, I128, Bytes, Text, Unit,
        ] {
            self.types.push((p.name(), TypeDef::Primitive(p)));
        }
        self
    }

    pub fn primitive(mut self, name: impl Into<String>, prim: Primitive) -> Self {
        self.types.push((name.into(), TypeDef::Primitive(prim)));
        self
    }

    pub fn composite<N, T>(mut self, name: impl Into<String>, fields: impl IntoIterator<Item = (N, T)>) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(n, t)| Field {
                name: n.into(),
                ty: t.into(),
            })
            .collect();
        self.types.push((name.into(), TypeDef::Composite(fields)));
        self
    }

    pub fn variant(mut self, name: impl Into<String>, arms: impl IntoIterator<Item = VariantArm>) -> Self {
        self.types
            .push((name.into(), TypeDef::Variant(arms.into_iter().collect())));
        self
    }

    pub fn sequence(mut self, name: impl Into<String>, elem: impl Into<String>) -> Self {
        self.types.push((name.into(), TypeDef::Sequence(elem.into())));
        self
    }

    pub fn optional(mut self, name: impl Into<String>, inner: impl Into<String>) -> Self {
        self.types.push((name.into(), TypeDef::Optional(inner.into())));
        self
    }

    pub fn init(mut self, input: Option<&str>, output: Option<&str>) -> Self {
        self.io.init_input = input.map(str::to_owned);
        self.io.init_output = output.map(str::to_owned);
        self
    }

    pub fn handle(mut self, input: Option<&str>, output: Option<&str>) -> Self {
        self.io.handle_input = input.map(str::to_owned);
        self.io.handle_output = output.map(str::to_owned);
        self
    }

    pub fn state(mut self, input: Option<&str>, output: Option<&str>) -> Self {
        self.io.state_input = input.map(str::to_owned);
        self.io.state_output = output.map(str::to_owned);
        self
    }

    pub fn build(self) -> Result<TypeSchema, SchemaError> {
        TypeSchema::from_parts(self.title, self.io, self.types)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed metadata: {0}")]
    Malformed(String),

    #[error("`{from}` references undeclared type `{missing}`")]
    UnresolvedReference { from: String, missing: String },

    #[error("type `{0}` declared twice")]
    DuplicateType(String),

    #[error("composite `{ty}` declares field `{field}` twice")]
    DuplicateField { ty: String, field: String },

    #[error("variant `{ty}` reuses tag {tag}")]
    DuplicateTag { ty: String, tag: u8 },

    #[error("variant `{ty}` declares arm `{arm}` twice")]
    DuplicateArm { ty: String, arm: String },
}

impl From<WireError> for SchemaError {
    fn from(e: WireError) -> Self {
        SchemaError::Malformed(e.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
