//! Read-only queries against a program's persisted state.

use std::sync::Arc;

use bytes::Bytes;
use keel_core::{decode, encode, DecodeError, EncodeError, ProgramId, TypeSchema, Value};

use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateReadError {
    #[error("program {0} not found")]
    ProgramNotFound(ProgramId),

    #[error("schema declares no state output type")]
    NoStateOutput,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for StateReadError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ProgramNotFound(id) => StateReadError::ProgramNotFound(id),
            other => StateReadError::Transport(other),
        }
    }
}

#[derive(Clone)]
pub struct StateReader {
    transport: Arc<dyn Transport>,
}

impl StateReader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Encode `query` as `query_type`, query the program, decode the answer
    /// with the schema's declared state output type.
    pub async fn read_state(
        &self,
        program: ProgramId,
        schema: &TypeSchema,
        query_type: &str,
        query: &Value,
    ) -> Result<Value, StateReadError> {
        let output = schema.io().state_output.as_deref().ok_or(StateReadError::NoStateOutput)?;
        self.read_state_with_output(program, schema, query_type, query, output)
            .await
    }

    /// As `read_state`, decoding the answer as `output_type`.
    pub async fn read_state_with_output(
        &self,
        program: ProgramId,
        schema: &TypeSchema,
        query_type: &str,
        query: &Value,
        output_type: &str,
    ) -> Result<Value, StateReadError> {
        let payload = encode(schema, query_type, query)?;
        self.query(program, schema, payload.into_bytes(), output_type)
            .await
    }

    /// Whole state, for programs whose state entry point takes no input.
    pub async fn read_full_state(
        &self,
        program: ProgramId,
        schema: &TypeSchema,
    ) -> Result<Value, StateReadError> {
        let output = schema.io().state_output.as_deref().ok_or(StateReadError::NoStateOutput)?;
        self.query(program, schema, Bytes::new(), output).await
    }

    async fn query(
        &self,
        program: ProgramId,
        schema: &TypeSchema,
        payload: Bytes,
        output_type: &str,
    ) -> Result<Value, StateReadError> {
        let query_len = payload.len();
        let raw = self.transport.query_state(program, payload).await?;
        tracing::debug!(
            program = %program.short(),
            query_len,
            reply_len = raw.len(),
            output_type,
            "state read"
        );
        Ok(decode(schema, output_type, &raw)?)
    }
}
