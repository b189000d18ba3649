//! Typed notifications and the per-event decoder.

use bytes::Bytes;
use keel_core::{decode, ActorId, DecodeError, EntryPoint, MessageId, ProgramId, Value};

use crate::registry::SchemaRegistry;
use crate::tracker::SubmissionTracker;
use crate::transport::{ProgramLifecycle, RawEvent, RawLog, RawProgramEvent};

/// Success/failure of a reply. Zero is success; any other code is failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Success,
    Failure(i32),
}

impl ReplyStatus {
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            ReplyStatus::Success
        } else {
            ReplyStatus::Failure(code)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReplyStatus::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyInfo {
    /// The message this log entry answers.
    pub to: MessageId,
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Decoded { type_name: String, value: Value },
    /// No schema registered, no output type declared, or a failure reply.
    Raw(Bytes),
    /// A schema applied but the bytes did not match it.
    Undecodable { raw: Bytes, error: DecodeError },
}

impl Payload {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Payload::Decoded { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn raw(&self) -> Option<&Bytes> {
        match self {
            Payload::Raw(raw) | Payload::Undecodable { raw, .. } => Some(raw),
            Payload::Decoded { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNotification {
    pub id: MessageId,
    pub source: ProgramId,
    pub destination: ActorId,
    pub value: u128,
    pub reply: Option<ReplyInfo>,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleNotification {
    pub program: ProgramId,
    pub init_message: MessageId,
    pub origin: ActorId,
    pub change: ProgramLifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Log(LogNotification),
    Lifecycle(LifecycleNotification),
    /// `missed` events were dropped because the consumer fell behind.
    Lagged { missed: u64 },
}

/// Turns raw log records into notifications using the registered schemas.
#[derive(Clone)]
pub struct EventDecoder {
    registry: SchemaRegistry,
    tracker: SubmissionTracker,
}

impl EventDecoder {
    pub fn new(registry: SchemaRegistry, tracker: SubmissionTracker) -> Self {
        Self { registry, tracker }
    }

    pub fn decode(&self, raw: RawEvent) -> Notification {
        match raw {
            RawEvent::Log(log) => Notification::Log(self.decode_log(log)),
            RawEvent::Program(ev) => Notification::Lifecycle(lifecycle(ev)),
        }
    }

    fn decode_log(&self, log: RawLog) -> LogNotification {
        let reply = log.reply.map(|r| ReplyInfo {
            to: r.to,
            status: ReplyStatus::from_code(r.code),
        });
        let payload = self.decode_payload(&log, reply);
        LogNotification {
            id: log.id,
            source: log.source,
            destination: log.destination,
            value: log.value,
            reply,
            payload,
        }
    }

    fn decode_payload(&self, log: &RawLog, reply: Option<ReplyInfo>) -> Payload {
        // Failure replies carry the runtime's error text, not a declared type.
        if reply.is_some_and(|r| !r.status.is_success()) {
            return Payload::Raw(log.payload.clone());
        }
        let Some(schema) = self.registry.get(&log.source) else {
            return Payload::Raw(log.payload.clone());
        };

        let entry = reply
            .and_then(|r| self.tracker.entry_of(&r.to))
            .filter(|e| *e == EntryPoint::Init)
            .unwrap_or(EntryPoint::Handle);
        let Some(type_name) = schema.io().output(entry) else {
            return Payload::Raw(log.payload.clone());
        };

        match decode(&schema, type_name, &log.payload) {
            Ok(value) => Payload::Decoded {
                type_name: type_name.to_owned(),
                value,
            },
            Err(error) => {
                tracing::warn!(
                    program = %log.source.short(),
                    message = %log.id.short(),
                    type_name,
                    %error,
                    "event payload did not match declared type"
                );
                Payload::Undecodable {
                    raw: log.payload.clone(),
                    error,
                }
            }
        }
    }
}

fn lifecycle(ev: RawProgramEvent) -> LifecycleNotification {
    LifecycleNotification {
        program: ev.program,
        init_message: ev.init_message,
        origin: ev.origin,
        change: ev.change,
    }
}
