//! Transaction submitter.
//!
//! Drives one intent through `Built → Signed → Submitted → Included | Rejected`.
//! `Submitted` means the node accepted the transaction into its pool.
//! Each intent is submitted exactly once; nothing here retries.

use std::fmt;
use std::sync::Arc;

use keel_core::{BlockHash, MessageId, ProgramId};

use crate::intent::{IntentKind, TransactionIntent};
use crate::registry::SchemaRegistry;
use crate::tracker::SubmissionTracker;
use crate::transport::{
    ExecutionOutcome, InclusionStatus, SignError, SignedTransaction, Transport, TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Built,
    Signed,
    Submitted,
    Included,
    Rejected,
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionState::Built => "built",
            SubmissionState::Signed => "signed",
            SubmissionState::Submitted => "submitted",
            SubmissionState::Included => "included",
            SubmissionState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful submission. Created once the chain acknowledges
/// inclusion; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub message_id: MessageId,
    /// Set for deployments.
    pub program_id: Option<ProgramId>,
    pub block: BlockHash,
    pub status: InclusionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("signing failed: {0}")]
    SigningFailed(#[source] SignError),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Terminal. `message_id` is set when the chain assigned one before
    /// execution failed.
    #[error("rejected: {reason}")]
    Rejected {
        message_id: Option<MessageId>,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl SubmitError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, SubmitError::Rejected { .. })
    }
}

impl From<TransportError> for SubmitError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable(reason) => SubmitError::TransportUnavailable(reason),
            TransportError::Rejected(reason) => SubmitError::Rejected {
                message_id: None,
                reason,
            },
            TransportError::ProgramNotFound(id) => SubmitError::Rejected {
                message_id: None,
                reason: format!("program {id} not found"),
            },
            other => SubmitError::Transport(other),
        }
    }
}

#[derive(Clone)]
pub struct Submitter {
    transport: Arc<dyn Transport>,
    tracker: SubmissionTracker,
    registry: SchemaRegistry,
}

impl Submitter {
    pub fn new(transport: Arc<dyn Transport>, tracker: SubmissionTracker, registry: SchemaRegistry) -> Self {
        Self {
            transport,
            tracker,
            registry,
        }
    }

    pub fn tracker(&self) -> &SubmissionTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub async fn submit(&self, intent: TransactionIntent) -> Result<TransactionReceipt, SubmitError> {
        self.submit_watched(intent, |_| {}).await
    }

    /// Like `submit`, reporting each state the intent enters to `on_state`.
    ///
    /// `Submitted` is reported once the node has accepted the transaction.
    /// The tracker entry and any deployment schema are in place from that
    /// point, before the transaction can emit events.
    pub async fn submit_watched(
        &self,
        intent: TransactionIntent,
        mut on_state: impl FnMut(SubmissionState) + Send,
    ) -> Result<TransactionReceipt, SubmitError> {
        let entry = intent.entry_point();
        let destination = match intent.kind() {
            IntentKind::Message { destination } => Some(*destination),
            IntentKind::Deploy { .. } => None,
        };
        let schema = intent.schema().cloned();
        on_state(SubmissionState::Built);

        // ── Built → Signed ──
        let signer = intent.signer().account();
        let signature = match intent.signer().sign(&intent.signing_bytes()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::warn!(signer = %signer.short(), error = %e, "signing failed");
                return Err(SubmitError::SigningFailed(e));
            }
        };
        on_state(SubmissionState::Signed);

        let gas_limit = intent.gas_limit().get();
        let tx = SignedTransaction {
            signer,
            kind: intent.kind().clone(),
            payload: intent.payload().bytes().clone(),
            gas_limit,
            value: intent.value(),
            signature,
        };
        drop(intent);

        // ── Signed → Submitted ──
        let accepted = match self.transport.submit(tx).await {
            Ok(accepted) => accepted,
            Err(e) => return Err(refused(e, &mut on_state)),
        };
        let program = accepted.program_id.or(destination);
        if let Some(program) = program {
            self.tracker.record(accepted.message_id, program, entry);
        }
        let registered = match (accepted.program_id, schema) {
            (Some(program), Some(schema)) => {
                self.registry.register(program, schema);
                Some(program)
            }
            _ => None,
        };
        on_state(SubmissionState::Submitted);
        tracing::info!(
            message = %accepted.message_id.short(),
            signer = %signer.short(),
            entry = ?entry,
            program = ?program.map(|p| p.short()),
            gas_limit,
            "transaction submitted"
        );

        // ── Submitted → Included | Rejected ──
        let inclusion = match self.transport.await_inclusion(accepted.message_id).await {
            Ok(inclusion) => inclusion,
            Err(e) => {
                let err = refused(e, &mut on_state);
                // An unavailable node may still include it; keep the schema.
                if err.is_rejection() {
                    self.unregister(registered);
                }
                return Err(err);
            }
        };

        match inclusion.outcome {
            ExecutionOutcome::Success => {
                on_state(SubmissionState::Included);
                tracing::info!(
                    message = %inclusion.message_id.short(),
                    program = ?program.map(|p| p.short()),
                    block = %inclusion.block.short(),
                    "transaction included"
                );
                Ok(TransactionReceipt {
                    message_id: inclusion.message_id,
                    program_id: inclusion.program_id,
                    block: inclusion.block,
                    status: inclusion.status,
                })
            }
            ExecutionOutcome::Failed { reason } => {
                self.unregister(registered);
                on_state(SubmissionState::Rejected);
                tracing::info!(
                    message = %inclusion.message_id.short(),
                    %reason,
                    "transaction rejected"
                );
                Err(SubmitError::Rejected {
                    message_id: Some(inclusion.message_id),
                    reason,
                })
            }
        }
    }

    /// Drop the schema of a deployment that did not produce a program.
    fn unregister(&self, program: Option<ProgramId>) {
        if let Some(program) = program {
            self.registry.remove(&program);
        }
    }
}

fn refused(e: TransportError, on_state: &mut impl FnMut(SubmissionState)) -> SubmitError {
    let err = SubmitError::from(e);
    if err.is_rejection() {
        on_state(SubmissionState::Rejected);
        tracing::info!(error = %err, "transaction rejected by node");
    } else {
        tracing::warn!(error = %err, "submission did not complete");
    }
    err
}
