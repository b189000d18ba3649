//! `ProgramClient`: the composed deploy / send / read / subscribe surface.
//!
//! Built explicitly from a transport and a config; holds no global state.
//! Every mutating call runs encode → estimate → margin and clamp → submit.

use std::sync::Arc;

use bytes::Bytes;
use keel_core::config::KeelConfig;
use keel_core::{
    encode, EncodeError, EncodedPayload, EntryPoint, ProgramId, TypeSchema, Value,
};

use crate::gas::{EstimationError, GasAmount, GasEstimator, GasTarget};
use crate::intent::{CodeSource, IntentError, TransactionIntent};
use crate::registry::SchemaRegistry;
use crate::state::{StateReadError, StateReader};
use crate::submitter::{SubmitError, Submitter, TransactionReceipt};
use crate::subscription::{EventStream, Subscription};
use crate::tracker::SubmissionTracker;
use crate::transport::{EventFilter, Signer, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("{entry:?} takes no input, but a payload was given")]
    UnexpectedPayload { entry: EntryPoint },

    #[error("{entry:?} declares input `{ty}`, but no payload was given")]
    MissingPayload { entry: EntryPoint, ty: String },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Estimation(#[from] EstimationError),

    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    StateRead(#[from] StateReadError),

    #[error(transparent)]
    Subscribe(#[from] TransportError),
}

pub struct ProgramClient {
    config: KeelConfig,
    registry: SchemaRegistry,
    estimator: GasEstimator,
    submitter: Submitter,
    reader: StateReader,
    events: EventStream,
}

impl ProgramClient {
    pub fn new(transport: Arc<dyn Transport>, config: KeelConfig) -> Self {
        let registry = SchemaRegistry::new();
        let tracker = SubmissionTracker::new();
        Self {
            estimator: GasEstimator::new(transport.clone()),
            submitter: Submitter::new(transport.clone(), tracker.clone(), registry.clone()),
            reader: StateReader::new(transport.clone()),
            events: EventStream::new(transport, registry.clone(), tracker, config.events.buffer_capacity),
            registry,
            config,
        }
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn estimator(&self) -> &GasEstimator {
        &self.estimator
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn reader(&self) -> &StateReader {
        &self.reader
    }

    /// Deploy a program. Its schema is registered for event decoding as soon
    /// as the node accepts the deployment.
    ///
    /// `init` must be given exactly when the schema declares an init input.
    pub async fn deploy(
        &self,
        signer: Arc<dyn Signer>,
        code: CodeSource,
        salt: impl Into<Bytes>,
        schema: Arc<TypeSchema>,
        init: Option<&Value>,
        value: u128,
    ) -> Result<TransactionReceipt, ClientError> {
        let payload = entry_payload(&schema, EntryPoint::Init, init)?;
        let gas = self
            .gas_for(
                signer.as_ref(),
                GasTarget::Init { code: code.clone() },
                &payload,
                value,
                &schema,
            )
            .await?;

        let intent = TransactionIntent::deploy(code, salt, payload, signer)
            .gas_limit(gas)
            .value(value)
            .schema(schema)
            .build()?;
        Ok(self.submitter.submit(intent).await?)
    }

    /// Send a message encoded as the schema's declared handle input.
    pub async fn send(
        &self,
        signer: Arc<dyn Signer>,
        program: ProgramId,
        schema: &TypeSchema,
        payload: Option<&Value>,
        value: u128,
    ) -> Result<TransactionReceipt, ClientError> {
        let payload = entry_payload(schema, EntryPoint::Handle, payload)?;
        self.send_payload(signer, program, schema, payload, value).await
    }

    /// Send a message encoded as an arbitrary schema type.
    pub async fn send_as(
        &self,
        signer: Arc<dyn Signer>,
        program: ProgramId,
        schema: &TypeSchema,
        type_name: &str,
        payload: &Value,
        value: u128,
    ) -> Result<TransactionReceipt, ClientError> {
        let payload = encode(schema, type_name, payload)?;
        self.send_payload(signer, program, schema, payload, value).await
    }

    async fn send_payload(
        &self,
        signer: Arc<dyn Signer>,
        program: ProgramId,
        schema: &TypeSchema,
        payload: EncodedPayload,
        value: u128,
    ) -> Result<TransactionReceipt, ClientError> {
        let gas = self
            .gas_for(signer.as_ref(), GasTarget::Handle { program }, &payload, value, schema)
            .await?;
        let intent = TransactionIntent::message(program, payload, signer)
            .gas_limit(gas)
            .value(value)
            .build()?;
        Ok(self.submitter.submit(intent).await?)
    }

    /// Query state with the schema's declared state input and output types.
    pub async fn read_state(
        &self,
        program: ProgramId,
        schema: &TypeSchema,
        query: Option<&Value>,
    ) -> Result<Value, ClientError> {
        match (schema.io().state_input.as_deref(), query) {
            (Some(ty), Some(q)) => Ok(self.reader.read_state(program, schema, ty, q).await?),
            (None, None) => Ok(self.reader.read_full_state(program, schema).await?),
            (Some(ty), None) => Err(ClientError::MissingPayload {
                entry: EntryPoint::State,
                ty: ty.to_owned(),
            }),
            (None, Some(_)) => Err(ClientError::UnexpectedPayload {
                entry: EntryPoint::State,
            }),
        }
    }

    pub async fn subscribe(&self, filter: EventFilter) -> Result<Subscription, ClientError> {
        Ok(self.events.subscribe(filter).await?)
    }

    async fn gas_for(
        &self,
        signer: &dyn Signer,
        target: GasTarget,
        payload: &EncodedPayload,
        value: u128,
        schema: &TypeSchema,
    ) -> Result<GasAmount, ClientError> {
        let minimum = self
            .estimator
            .estimate(signer.account(), target, payload, value, schema)
            .await?;
        let gas = minimum
            .with_margin(self.config.gas.margin_percent)
            .clamp(self.config.gas.max_limit);
        if gas < minimum {
            tracing::warn!(%minimum, %gas, "configured gas clamp is below the estimate");
        }
        Ok(gas)
    }
}

/// Encode `value` as `entry`'s declared input, or produce the empty payload
/// for entry points that declare none.
fn entry_payload(
    schema: &TypeSchema,
    entry: EntryPoint,
    value: Option<&Value>,
) -> Result<EncodedPayload, ClientError> {
    match (schema.io().input(entry), value) {
        (Some(ty), Some(v)) => Ok(encode(schema, ty, v)?),
        (None, None) => Ok(EncodedPayload::empty(schema)),
        (Some(ty), None) => Err(ClientError::MissingPayload {
            entry,
            ty: ty.to_owned(),
        }),
        (None, Some(_)) => Err(ClientError::UnexpectedPayload { entry }),
    }
}
