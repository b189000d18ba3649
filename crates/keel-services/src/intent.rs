//! Transaction intents and their canonical signing bytes.
//!
//! Signing-bytes layout (all via `keel_core::wire`):
//!
//! ```text
//!   domain    "keel/tx/v1"            raw, 10 bytes
//!   signer    ActorId                 32 bytes
//!   kind      u8                      0 = deploy wasm, 1 = deploy stored, 2 = message
//!   body      deploy wasm:   code (compact-prefixed), salt (compact-prefixed)
//!             deploy stored: code id (32), salt (compact-prefixed)
//!             message:       destination (32)
//!   payload   compact-prefixed bytes
//!   gas       u64 LE
//!   value     u128 LE
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use keel_core::wire::Writer;
use keel_core::{ActorId, CodeId, EncodedPayload, EntryPoint, ProgramId, SchemaId, TypeSchema};

use crate::gas::GasAmount;
use crate::transport::Signer;

const SIGNING_DOMAIN: &[u8] = b"keel/tx/v1";

const KIND_DEPLOY_WASM: u8 = 0x00;
const KIND_DEPLOY_STORED: u8 = 0x01;
const KIND_MESSAGE: u8 = 0x02;

/// Program code for a deployment: uploaded inline or already stored on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeSource {
    Wasm(Bytes),
    Stored(CodeId),
}

impl CodeSource {
    pub fn code_id(&self) -> CodeId {
        match self {
            CodeSource::Wasm(code) => CodeId::generate(code),
            CodeSource::Stored(id) => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentKind {
    Deploy { code: CodeSource, salt: Bytes },
    Message { destination: ProgramId },
}

impl IntentKind {
    pub fn entry_point(&self) -> EntryPoint {
        match self {
            IntentKind::Deploy { .. } => EntryPoint::Init,
            IntentKind::Message { .. } => EntryPoint::Handle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    #[error("gas limit must be greater than zero")]
    ZeroGasLimit,
    #[error("gas limit was not set")]
    MissingGasLimit,
    #[error("payload was encoded under schema {found}, not {expected}")]
    SchemaMismatch { expected: SchemaId, found: SchemaId },
    #[error("only deployments register a schema")]
    SchemaOnMessage,
}

/// A transaction ready to be signed and submitted. Built once, consumed by
/// the submitter.
pub struct TransactionIntent {
    kind: IntentKind,
    payload: EncodedPayload,
    gas_limit: GasAmount,
    value: u128,
    signer: Arc<dyn Signer>,
    schema: Option<Arc<TypeSchema>>,
}

impl TransactionIntent {
    pub fn deploy(
        code: CodeSource,
        salt: impl Into<Bytes>,
        payload: EncodedPayload,
        signer: Arc<dyn Signer>,
    ) -> IntentBuilder {
        IntentBuilder::new(
            IntentKind::Deploy {
                code,
                salt: salt.into(),
            },
            payload,
            signer,
        )
    }

    pub fn message(destination: ProgramId, payload: EncodedPayload, signer: Arc<dyn Signer>) -> IntentBuilder {
        IntentBuilder::new(IntentKind::Message { destination }, payload, signer)
    }

    pub fn kind(&self) -> &IntentKind {
        &self.kind
    }

    pub fn payload(&self) -> &EncodedPayload {
        &self.payload
    }

    pub fn gas_limit(&self) -> GasAmount {
        self.gas_limit
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    pub fn entry_point(&self) -> EntryPoint {
        self.kind.entry_point()
    }

    /// Schema to register for the deployed program once the node accepts it.
    pub fn schema(&self) -> Option<&Arc<TypeSchema>> {
        self.schema.as_ref()
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        signing_bytes(
            &self.signer.account(),
            &self.kind,
            self.payload.bytes(),
            self.gas_limit.get(),
            self.value,
        )
    }
}

impl fmt::Debug for TransactionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionIntent")
            .field("kind", &self.kind)
            .field("payload_type", &self.payload.type_name())
            .field("payload_len", &self.payload.len())
            .field("gas_limit", &self.gas_limit)
            .field("value", &self.value)
            .field("signer", &self.signer.account())
            .field("schema", &self.schema.as_ref().map(|s| s.id()))
            .finish()
    }
}

pub struct IntentBuilder {
    kind: IntentKind,
    payload: EncodedPayload,
    gas_limit: Option<GasAmount>,
    value: u128,
    signer: Arc<dyn Signer>,
    schema: Option<Arc<TypeSchema>>,
}

impl IntentBuilder {
    fn new(kind: IntentKind, payload: EncodedPayload, signer: Arc<dyn Signer>) -> Self {
        Self {
            kind,
            payload,
            gas_limit: None,
            value: 0,
            signer,
            schema: None,
        }
    }

    pub fn gas_limit(mut self, gas: impl Into<GasAmount>) -> Self {
        self.gas_limit = Some(gas.into());
        self
    }

    pub fn value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }

    /// Register `schema` for the new program as soon as the deployment is
    /// accepted, so its first events already decode.
    pub fn schema(mut self, schema: Arc<TypeSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn build(self) -> Result<TransactionIntent, IntentError> {
        let gas_limit = self.gas_limit.ok_or(IntentError::MissingGasLimit)?;
        if gas_limit.get() == 0 {
            return Err(IntentError::ZeroGasLimit);
        }
        if let Some(schema) = &self.schema {
            if matches!(self.kind, IntentKind::Message { .. }) {
                return Err(IntentError::SchemaOnMessage);
            }
            if schema.id() != self.payload.schema_id() {
                return Err(IntentError::SchemaMismatch {
                    expected: schema.id(),
                    found: self.payload.schema_id(),
                });
            }
        }
        Ok(TransactionIntent {
            kind: self.kind,
            payload: self.payload,
            gas_limit,
            value: self.value,
            signer: self.signer,
            schema: self.schema,
        })
    }
}

/// Canonical bytes a signer commits to. Layout in the module docs.
pub fn signing_bytes(
    signer: &ActorId,
    kind: &IntentKind,
    payload: &[u8],
    gas_limit: u64,
    value: u128,
) -> Vec<u8> {
    let mut w = Writer::with_capacity(SIGNING_DOMAIN.len() + 32 + 1 + 32 + payload.len() + 32);
    w.put_slice(SIGNING_DOMAIN);
    w.put_slice(signer.as_bytes());
    match kind {
        IntentKind::Deploy {
            code: CodeSource::Wasm(code),
            salt,
        } => {
            w.put_u8(KIND_DEPLOY_WASM);
            w.put_prefixed(code);
            w.put_prefixed(salt);
        }
        IntentKind::Deploy {
            code: CodeSource::Stored(id),
            salt,
        } => {
            w.put_u8(KIND_DEPLOY_STORED);
            w.put_slice(id.as_bytes());
            w.put_prefixed(salt);
        }
        IntentKind::Message { destination } => {
            w.put_u8(KIND_MESSAGE);
            w.put_slice(destination.as_bytes());
        }
    }
    w.put_prefixed(payload);
    w.put_u64(gas_limit);
    w.put_u128(value);
    w.into_bytes()
}
