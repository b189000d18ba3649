//! In-process chain and signers for tests. Enabled by the `testing` feature.
//!
//! `MockChain` executes programs as plain closures over payload bytes, assigns
//! ids deterministically with BLAKE3 and publishes the resulting events on an
//! in-memory log. It implements `Transport`, so every service can run against
//! it unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use keel_core::{ActorId, BlockHash, CodeId, MessageId, ProgramId};
use tokio::sync::broadcast;

use crate::intent::{CodeSource, IntentKind};
use crate::transport::{
    Accepted, EventFilter, ExecutionOutcome, Inclusion, InclusionStatus, ProgramLifecycle, RawEvent,
    RawEventStream, RawLog, RawProgramEvent, RawReply, SignError, Signature, SignedTransaction,
    Signer, Simulation, SimulationRequest, SimulationTarget, Transport, TransportError,
};

pub type Handler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync>;

const DEFAULT_GAS: u64 = 1_000;
const LOG_CAPACITY: usize = 1024;

/// Reply code the mock runtime uses for failed executions.
pub const ERROR_REPLY_CODE: i32 = 1;

// ── Program behaviour ─────────────────────────────────────────────────────────

/// How a mock program answers its three entry points. Unset handlers accept
/// anything and answer with an empty payload.
#[derive(Clone)]
pub struct ProgramBehaviour {
    init: Option<Handler>,
    handle: Option<Handler>,
    dry_run: Option<Handler>,
    state: Option<Handler>,
    gas: u64,
}

impl ProgramBehaviour {
    pub fn accepting() -> Self {
        Self {
            init: None,
            handle: None,
            dry_run: None,
            state: None,
            gas: DEFAULT_GAS,
        }
    }

    /// Minimum gas every call to this program needs.
    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = gas;
        self
    }

    pub fn init(mut self, f: impl Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static) -> Self {
        self.init = Some(Arc::new(f));
        self
    }

    pub fn handle(mut self, f: impl Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static) -> Self {
        self.handle = Some(Arc::new(f));
        self
    }

    /// Handler for simulated handle calls. Stateful programs set this so a
    /// dry run leaves their state untouched; defaults to the handle handler.
    pub fn dry_run(mut self, f: impl Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static) -> Self {
        self.dry_run = Some(Arc::new(f));
        self
    }

    pub fn state(mut self, f: impl Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static) -> Self {
        self.state = Some(Arc::new(f));
        self
    }

    fn run(handler: &Option<Handler>, payload: &[u8]) -> Result<Vec<u8>, String> {
        match handler {
            Some(f) => f(payload),
            None => Ok(Vec::new()),
        }
    }
}

impl Default for ProgramBehaviour {
    fn default() -> Self {
        Self::accepting()
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    codes: HashMap<CodeId, ProgramBehaviour>,
    programs: HashMap<ProgramId, ProgramBehaviour>,
    submitted: Vec<SignedTransaction>,
    pending: HashMap<MessageId, Pending>,
    nonce: u64,
    installed: u64,
    disconnected: bool,
    submit_attempts: usize,
    simulations: usize,
    queries: usize,
}

/// Accepted but not yet executed.
struct Pending {
    tx: SignedTransaction,
    block: BlockHash,
    program: Option<ProgramId>,
}

pub struct MockChain {
    state: Mutex<ChainState>,
    log: broadcast::Sender<Result<RawEvent, TransportError>>,
    active: Arc<AtomicUsize>,
}

impl MockChain {
    pub fn new() -> Self {
        let (log, _) = broadcast::channel(LOG_CAPACITY);
        Self {
            state: Mutex::new(ChainState::default()),
            log,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        // A panicking handler poisons the lock; the state itself stays usable.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make `code` deployable with the given behaviour. Returns its code id.
    pub fn upload_code(&self, code: &[u8], behaviour: ProgramBehaviour) -> CodeId {
        let id = CodeId::generate(code);
        self.lock().codes.insert(id, behaviour);
        id
    }

    /// Place a running program on chain without a deployment.
    pub fn install_program(&self, behaviour: ProgramBehaviour) -> ProgramId {
        let mut state = self.lock();
        state.installed += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"keel-mock/installed");
        hasher.update(&state.installed.to_le_bytes());
        let id = ProgramId::new(*hasher.finalize().as_bytes());
        state.programs.insert(id, behaviour);
        id
    }

    pub fn has_program(&self, id: &ProgramId) -> bool {
        self.lock().programs.contains_key(id)
    }

    /// Publish an event on the log as if the runtime produced it.
    pub fn emit(&self, event: RawEvent) {
        let _ = self.log.send(Ok(event));
    }

    /// Fail every open log registration with `error`.
    pub fn fail_log(&self, error: TransportError) {
        let _ = self.log.send(Err(error));
    }

    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    pub fn reconnect(&self) {
        self.lock().disconnected = false;
    }

    /// Transactions accepted for execution, in order.
    pub fn submitted(&self) -> Vec<SignedTransaction> {
        self.lock().submitted.clone()
    }

    /// Calls to `submit`, including ones refused for connectivity.
    pub fn submit_attempts(&self) -> usize {
        self.lock().submit_attempts
    }

    pub fn simulations(&self) -> usize {
        self.lock().simulations
    }

    pub fn queries(&self) -> usize {
        self.lock().queries
    }

    /// Log registrations currently held open by subscribers.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn ensure_connected(state: &ChainState) -> Result<(), TransportError> {
        if state.disconnected {
            Err(TransportError::Unavailable("mock chain disconnected".into()))
        } else {
            Ok(())
        }
    }

    fn code_behaviour(state: &ChainState, code: &CodeSource) -> Result<ProgramBehaviour, TransportError> {
        let id = code.code_id();
        match (state.codes.get(&id), code) {
            (Some(b), _) => Ok(b.clone()),
            (None, CodeSource::Wasm(_)) => Ok(ProgramBehaviour::default()),
            (None, CodeSource::Stored(_)) => Err(TransportError::Rejected(format!("code {id} not found"))),
        }
    }

    fn deploy(
        &self,
        tx: &SignedTransaction,
        code: &CodeSource,
        program: ProgramId,
        message_id: MessageId,
        block: BlockHash,
    ) -> Result<Inclusion, TransportError> {
        let behaviour = Self::code_behaviour(&self.lock(), code)?;

        let result = if tx.gas_limit < behaviour.gas {
            Err(format!("gas limit {} below required {}", tx.gas_limit, behaviour.gas))
        } else {
            ProgramBehaviour::run(&behaviour.init, &tx.payload)
        };

        let outcome = match result {
            Ok(reply) => {
                self.lock().programs.insert(program, behaviour);
                self.emit(RawEvent::Program(RawProgramEvent {
                    program,
                    init_message: message_id,
                    origin: tx.signer,
                    change: ProgramLifecycle::Initialized,
                }));
                self.emit_reply(program, tx.signer, message_id, 0, reply);
                ExecutionOutcome::Success
            }
            Err(reason) => {
                self.emit(RawEvent::Program(RawProgramEvent {
                    program,
                    init_message: message_id,
                    origin: tx.signer,
                    change: ProgramLifecycle::InitFailed {
                        reason: reason.clone(),
                    },
                }));
                self.emit_reply(program, tx.signer, message_id, ERROR_REPLY_CODE, reason.clone().into_bytes());
                ExecutionOutcome::Failed { reason }
            }
        };

        Ok(Inclusion {
            message_id,
            program_id: Some(program),
            block,
            status: InclusionStatus::InBlock,
            outcome,
        })
    }

    fn message(
        &self,
        tx: &SignedTransaction,
        destination: ProgramId,
        message_id: MessageId,
        block: BlockHash,
    ) -> Result<Inclusion, TransportError> {
        let behaviour = self
            .lock()
            .programs
            .get(&destination)
            .cloned()
            .ok_or(TransportError::ProgramNotFound(destination))?;

        let result = if tx.gas_limit < behaviour.gas {
            Err(format!("gas limit {} below required {}", tx.gas_limit, behaviour.gas))
        } else {
            ProgramBehaviour::run(&behaviour.handle, &tx.payload)
        };

        let outcome = match result {
            Ok(reply) => {
                self.emit_reply(destination, tx.signer, message_id, 0, reply);
                ExecutionOutcome::Success
            }
            Err(reason) => {
                self.emit_reply(destination, tx.signer, message_id, ERROR_REPLY_CODE, reason.clone().into_bytes());
                ExecutionOutcome::Failed { reason }
            }
        };

        Ok(Inclusion {
            message_id,
            program_id: None,
            block,
            status: InclusionStatus::InBlock,
            outcome,
        })
    }

    fn emit_reply(&self, source: ProgramId, to_user: ActorId, answering: MessageId, code: i32, payload: Vec<u8>) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"keel-mock/reply");
        hasher.update(answering.as_bytes());
        self.emit(RawEvent::Log(RawLog {
            id: MessageId::new(*hasher.finalize().as_bytes()),
            source,
            destination: to_user,
            payload: Bytes::from(payload),
            value: 0,
            reply: Some(RawReply { to: answering, code }),
        }));
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

fn program_id(code: &CodeId, salt: &[u8]) -> ProgramId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"keel-mock/program");
    hasher.update(code.as_bytes());
    hasher.update(salt);
    ProgramId::new(*hasher.finalize().as_bytes())
}

struct RegistrationGuard(Arc<AtomicUsize>);

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockChain {
    async fn submit(&self, tx: SignedTransaction) -> Result<Accepted, TransportError> {
        let mut state = self.lock();
        state.submit_attempts += 1;
        Self::ensure_connected(&state)?;
        if tx.signature.0.is_empty() {
            return Err(TransportError::Rejected("missing signature".into()));
        }

        let program = match &tx.kind {
            IntentKind::Deploy { code, salt } => {
                Self::code_behaviour(&state, code)?;
                let program = program_id(&code.code_id(), salt);
                let queued = state.pending.values().any(|p| p.program == Some(program));
                if queued || state.programs.contains_key(&program) {
                    return Err(TransportError::Rejected(format!("program {program} already exists")));
                }
                Some(program)
            }
            IntentKind::Message { destination } => {
                if !state.programs.contains_key(destination) {
                    return Err(TransportError::ProgramNotFound(*destination));
                }
                None
            }
        };

        state.nonce += 1;
        state.submitted.push(tx.clone());

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"keel-mock/message");
        hasher.update(tx.signer.as_bytes());
        hasher.update(&state.nonce.to_le_bytes());
        let message_id = MessageId::new(*hasher.finalize().as_bytes());

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"keel-mock/block");
        hasher.update(&state.nonce.to_le_bytes());
        let block = BlockHash::new(*hasher.finalize().as_bytes());

        state.pending.insert(message_id, Pending { tx, block, program });
        Ok(Accepted {
            message_id,
            program_id: program,
        })
    }

    async fn await_inclusion(&self, message: MessageId) -> Result<Inclusion, TransportError> {
        let pending = {
            let mut state = self.lock();
            Self::ensure_connected(&state)?;
            state
                .pending
                .remove(&message)
                .ok_or_else(|| TransportError::Protocol(format!("message {message} was never accepted")))?
        };

        // Execution happens here, so every event follows the acceptance.
        match (&pending.tx.kind, pending.program) {
            (IntentKind::Deploy { code, .. }, Some(program)) => {
                self.deploy(&pending.tx, code, program, message, pending.block)
            }
            (IntentKind::Message { destination }, _) => {
                self.message(&pending.tx, *destination, message, pending.block)
            }
            (IntentKind::Deploy { .. }, None) => {
                Err(TransportError::Protocol("deployment without program id".into()))
            }
        }
    }

    async fn query_state(&self, program: ProgramId, payload: Bytes) -> Result<Bytes, TransportError> {
        let behaviour = {
            let mut state = self.lock();
            state.queries += 1;
            Self::ensure_connected(&state)?;
            state
                .programs
                .get(&program)
                .cloned()
                .ok_or(TransportError::ProgramNotFound(program))?
        };
        ProgramBehaviour::run(&behaviour.state, &payload)
            .map(Bytes::from)
            .map_err(TransportError::Protocol)
    }

    async fn simulate(&self, request: SimulationRequest) -> Result<Simulation, TransportError> {
        let (behaviour, is_init) = {
            let mut state = self.lock();
            state.simulations += 1;
            Self::ensure_connected(&state)?;
            match &request.target {
                SimulationTarget::Init { code } => (Self::code_behaviour(&state, code)?, true),
                SimulationTarget::Handle { program } => (
                    state
                        .programs
                        .get(program)
                        .cloned()
                        .ok_or(TransportError::ProgramNotFound(*program))?,
                    false,
                ),
            }
        };

        let handler = match (is_init, &behaviour.dry_run) {
            (true, _) => &behaviour.init,
            (false, Some(_)) => &behaviour.dry_run,
            (false, None) => &behaviour.handle,
        };
        Ok(match ProgramBehaviour::run(handler, &request.payload) {
            Ok(_) => Simulation::Completed {
                min_limit: behaviour.gas,
                burned: behaviour.gas,
            },
            Err(reason) => Simulation::Reverted { reason },
        })
    }

    async fn subscribe_log(&self, _filter: &EventFilter) -> Result<RawEventStream, TransportError> {
        Self::ensure_connected(&self.lock())?;
        let rx = self.log.subscribe();
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = RegistrationGuard(self.active.clone());

        let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            let item = match rx.recv().await {
                Ok(item) => item,
                // Overflow is reported, never skipped.
                Err(broadcast::error::RecvError::Lagged(n)) => Err(TransportError::Protocol(format!(
                    "mock log overflowed, {n} events lost"
                ))),
                Err(broadcast::error::RecvError::Closed) => return None,
            };
            Some((item, (rx, guard)))
        });
        Ok(stream.boxed())
    }
}

// ── Signers ───────────────────────────────────────────────────────────────────

/// Deterministic signer: BLAKE3 keyed hash under a secret derived from `seed`.
pub struct MockSigner {
    secret: [u8; 32],
    account: ActorId,
}

impl MockSigner {
    pub fn new(seed: u8) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"keel-mock/signer");
        hasher.update(&[seed]);
        let secret = *hasher.finalize().as_bytes();
        let account = ActorId::new(*blake3::hash(&secret).as_bytes());
        Self { secret, account }
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        blake3::keyed_hash(&self.secret, message).as_bytes()[..] == signature.0[..]
    }
}

impl Signer for MockSigner {
    fn account(&self) -> ActorId {
        self.account
    }

    fn sign(&self, message: &[u8]) -> Result<Signature, SignError> {
        let mac = blake3::keyed_hash(&self.secret, message);
        Ok(Signature(Bytes::copy_from_slice(mac.as_bytes())))
    }
}

/// A signer whose keyring is locked.
pub struct FailingSigner;

impl Signer for FailingSigner {
    fn account(&self) -> ActorId {
        ActorId::new([0xFF; 32])
    }

    fn sign(&self, _message: &[u8]) -> Result<Signature, SignError> {
        Err(SignError::InvalidCredential("keyring locked".into()))
    }
}
