//! Gas estimation via chain simulation.

use std::fmt;
use std::sync::Arc;

use keel_core::{ActorId, EncodedPayload, ProgramId, SchemaId, TypeSchema};

use crate::intent::CodeSource;
use crate::transport::{Simulation, SimulationRequest, SimulationTarget, Transport, TransportError};

/// Gas units. Plain `u64` on the wire; arithmetic here saturates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GasAmount(u64);

impl GasAmount {
    pub const fn new(units: u64) -> Self {
        Self(units)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Add `percent`% on top, rounding up. Saturates at `u64::MAX`.
    pub fn with_margin(self, percent: u32) -> Self {
        let base = self.0 as u128;
        let extra = (base * percent as u128).div_ceil(100);
        Self(u64::try_from(base + extra).unwrap_or(u64::MAX))
    }

    /// Cap at `max`. A `max` of zero means no cap.
    pub fn clamp(self, max: u64) -> Self {
        if max == 0 {
            self
        } else {
            Self(self.0.min(max))
        }
    }
}

impl From<u64> for GasAmount {
    fn from(units: u64) -> Self {
        Self(units)
    }
}

impl fmt::Display for GasAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What is being simulated.
#[derive(Debug, Clone)]
pub enum GasTarget {
    Init { code: CodeSource },
    Handle { program: ProgramId },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EstimationError {
    #[error("payload was encoded under schema {found}, estimator was given {expected}")]
    SchemaMismatch { expected: SchemaId, found: SchemaId },

    #[error("simulation reverted: {reason}")]
    SimulationReverted { reason: String },

    #[error("program {0} not found")]
    ProgramNotFound(ProgramId),

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for EstimationError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ProgramNotFound(id) => EstimationError::ProgramNotFound(id),
            other => EstimationError::Transport(other),
        }
    }
}

/// Asks the chain for the minimum gas an init or handle call needs.
/// Never submits anything.
#[derive(Clone)]
pub struct GasEstimator {
    transport: Arc<dyn Transport>,
}

impl GasEstimator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Minimum gas reported by a dry run. Apply margin and clamp separately.
    pub async fn estimate(
        &self,
        origin: ActorId,
        target: GasTarget,
        payload: &EncodedPayload,
        value: u128,
        schema: &TypeSchema,
    ) -> Result<GasAmount, EstimationError> {
        if payload.schema_id() != schema.id() {
            return Err(EstimationError::SchemaMismatch {
                expected: schema.id(),
                found: payload.schema_id(),
            });
        }

        let target = match target {
            GasTarget::Init { code } => SimulationTarget::Init { code },
            GasTarget::Handle { program } => SimulationTarget::Handle { program },
        };
        let request = SimulationRequest {
            origin,
            target,
            payload: payload.bytes().clone(),
            value,
        };

        match self.transport.simulate(request).await? {
            Simulation::Completed { min_limit, burned } => {
                tracing::debug!(
                    payload_type = payload.type_name(),
                    min_limit,
                    burned,
                    "gas estimated"
                );
                Ok(GasAmount(min_limit))
            }
            Simulation::Reverted { reason } => {
                tracing::debug!(payload_type = payload.type_name(), %reason, "simulation reverted");
                Err(EstimationError::SimulationReverted { reason })
            }
        }
    }
}
