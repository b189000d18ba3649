//! Collaborator seam: the RPC channel and the signer.
//!
//! Every chain interaction in Keel goes through these two traits. Real
//! implementations (WebSocket RPC, keyring) live outside this crate; the
//! services here only depend on the contracts below.
//!
//! Transport implementations must report connection loss as
//! `TransportError::Unavailable` and never fold it into an on-chain failure.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use keel_core::{ActorId, BlockHash, MessageId, ProgramId};

use crate::intent::{signing_bytes, IntentKind};

// ── Signer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Bytes);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Produces signatures for one account. Opaque beyond this contract.
pub trait Signer: Send + Sync {
    fn account(&self) -> ActorId;

    fn sign(&self, message: &[u8]) -> Result<Signature, SignError>;
}

// ── Submission ────────────────────────────────────────────────────────────────

/// A signed intent as handed to the transport.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub signer: ActorId,
    pub kind: IntentKind,
    pub payload: Bytes,
    pub gas_limit: u64,
    pub value: u128,
    pub signature: Signature,
}

impl SignedTransaction {
    /// The exact bytes `signature` covers.
    pub fn signing_bytes(&self) -> Vec<u8> {
        signing_bytes(
            &self.signer,
            &self.kind,
            &self.payload,
            self.gas_limit,
            self.value,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionStatus {
    InBlock,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failed { reason: String },
}

/// The node took the transaction into its pool. Execution has not started,
/// so anything keyed by these ids can be set up before the first event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub message_id: MessageId,
    /// Set for deployments.
    pub program_id: Option<ProgramId>,
}

/// The chain's acknowledgement that a transaction landed in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    pub message_id: MessageId,
    /// Set for deployments.
    pub program_id: Option<ProgramId>,
    pub block: BlockHash,
    pub status: InclusionStatus,
    pub outcome: ExecutionOutcome,
}

// ── Simulation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SimulationTarget {
    Init { code: crate::intent::CodeSource },
    Handle { program: ProgramId },
}

#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub origin: ActorId,
    pub target: SimulationTarget,
    pub payload: Bytes,
    pub value: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Simulation {
    Completed { min_limit: u64, burned: u64 },
    Reverted { reason: String },
}

// ── Event log ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCategory {
    /// Messages sent by programs to users, including replies.
    MessageLog,
    /// Program initialization and exit.
    Lifecycle,
}

/// Reply correlation carried by a log entry: the message being answered and
/// the runtime's numeric status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReply {
    pub to: MessageId,
    pub code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub id: MessageId,
    pub source: ProgramId,
    pub destination: ActorId,
    pub payload: Bytes,
    pub value: u128,
    pub reply: Option<RawReply>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramLifecycle {
    Initialized,
    InitFailed { reason: String },
    Exited { inheritor: ActorId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProgramEvent {
    pub program: ProgramId,
    pub init_message: MessageId,
    pub origin: ActorId,
    pub change: ProgramLifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Log(RawLog),
    Program(RawProgramEvent),
}

impl RawEvent {
    /// The program that emitted or is described by this event.
    pub fn program(&self) -> ProgramId {
        match self {
            RawEvent::Log(log) => log.source,
            RawEvent::Program(ev) => ev.program,
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            RawEvent::Log(_) => EventCategory::MessageLog,
            RawEvent::Program(_) => EventCategory::Lifecycle,
        }
    }
}

/// Selects events by emitting program and category. Empty sets match all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub programs: BTreeSet<ProgramId>,
    pub categories: BTreeSet<EventCategory>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn program(mut self, id: ProgramId) -> Self {
        self.programs.insert(id);
        self
    }

    pub fn category(mut self, category: EventCategory) -> Self {
        self.categories.insert(category);
        self
    }

    pub fn matches(&self, event: &RawEvent) -> bool {
        (self.programs.is_empty() || self.programs.contains(&event.program()))
            && (self.categories.is_empty() || self.categories.contains(&event.category()))
    }
}

/// Push stream of raw log records. Dropping it releases the registration.
pub type RawEventStream = BoxStream<'static, Result<RawEvent, TransportError>>;

// ── Transport ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection lost or never established. Safe for the caller to retry
    /// reads; resubmission is the caller's decision.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("program {0} not found")]
    ProgramNotFound(ProgramId),

    /// The node refused the transaction before execution (bad signature,
    /// insufficient balance, invalid code).
    #[error("rejected by node: {0}")]
    Rejected(String),

    /// The node answered with something the transport could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Connected RPC channel to a chain node.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a signed transaction to the node. Returns once it is accepted,
    /// before it executes; pool-level refusals are `Rejected`.
    async fn submit(&self, tx: SignedTransaction) -> Result<Accepted, TransportError>;

    /// Wait until an accepted transaction is included. Events it causes are
    /// published on the log no earlier than this call.
    async fn await_inclusion(&self, message: MessageId) -> Result<Inclusion, TransportError>;

    /// Read-only query against a program's persisted state.
    async fn query_state(&self, program: ProgramId, payload: Bytes) -> Result<Bytes, TransportError>;

    /// Non-mutating dry run of an init or handle call.
    async fn simulate(&self, request: SimulationRequest) -> Result<Simulation, TransportError>;

    /// Open a live registration on the event log.
    async fn subscribe_log(&self, filter: &EventFilter) -> Result<RawEventStream, TransportError>;
}
