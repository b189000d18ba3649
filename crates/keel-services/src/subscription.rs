//! Event subscription stream.
//!
//! One pump task per subscription reads the transport's raw log, filters,
//! decodes and pushes into a bounded buffer with `try_send`. The pump never
//! waits on the consumer: when the buffer is full the event is dropped and
//! counted, and the consumer sees `Notification::Lagged { missed }` before the
//! next event that fits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::events::{EventDecoder, Notification};
use crate::registry::SchemaRegistry;
use crate::tracker::SubmissionTracker;
use crate::transport::{EventFilter, RawEventStream, Transport, TransportError};

pub type SubscriptionItem = Result<Notification, TransportError>;

/// Opens subscriptions against one transport.
#[derive(Clone)]
pub struct EventStream {
    transport: Arc<dyn Transport>,
    decoder: EventDecoder,
    buffer_capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl EventStream {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: SchemaRegistry,
        tracker: SubmissionTracker,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            transport,
            decoder: EventDecoder::new(registry, tracker),
            buffer_capacity: buffer_capacity.max(1),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn subscribe(&self, filter: EventFilter) -> Result<Subscription, TransportError> {
        let source = self.transport.subscribe_log(&filter).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(self.buffer_capacity);
        let (signal, signal_rx) = watch::channel(false);
        let cancel = CancelHandle {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
            signal: Arc::new(signal),
        };

        tracing::info!(
            subscription = id,
            programs = filter.programs.len(),
            capacity = self.buffer_capacity,
            "subscription opened"
        );

        let pump = EventPump {
            id,
            source,
            filter,
            decoder: self.decoder.clone(),
            tx,
            cancel: signal_rx.clone(),
            missed: 0,
            delivered: 0,
            dropped: 0,
        };
        let handle = tokio::spawn(pump.run());

        Ok(Subscription {
            rx,
            cancel,
            signal_rx,
            pump: Some(handle),
            ended: false,
        })
    }
}

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Cancels a subscription from anywhere. Idempotent.
#[derive(Clone)]
pub struct CancelHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
    signal: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.signal.send_replace(true);
            tracing::info!(subscription = self.id, "subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ── Subscription ──────────────────────────────────────────────────────────────

/// Live handle on a stream of notifications. Dropping it cancels.
pub struct Subscription {
    rx: mpsc::Receiver<SubscriptionItem>,
    cancel: CancelHandle,
    signal_rx: watch::Receiver<bool>,
    pump: Option<JoinHandle<()>>,
    ended: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.cancel.id
    }

    /// Next notification in chain order. `None` once cancelled or once the
    /// source has ended. A transport failure is yielded once as `Err`, after
    /// which the stream is ended.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        if self.ended || self.cancel.is_cancelled() {
            return None;
        }

        let item = tokio::select! {
            biased;
            _ = self.signal_rx.changed() => None,
            item = self.rx.recv() => item,
        };

        if self.cancel.is_cancelled() {
            return None;
        }
        match item {
            None => {
                self.ended = true;
                None
            }
            Some(Err(e)) => {
                self.ended = true;
                Some(Err(e))
            }
            Some(ok) => Some(ok),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel and wait until the pump has released the transport registration.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                tracing::warn!(subscription = self.cancel.id, error = %e, "event pump panicked");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Pump ──────────────────────────────────────────────────────────────────────

struct EventPump {
    id: u64,
    source: RawEventStream,
    filter: EventFilter,
    decoder: EventDecoder,
    tx: mpsc::Sender<SubscriptionItem>,
    cancel: watch::Receiver<bool>,
    /// Dropped since the last lag marker was delivered.
    missed: u64,
    delivered: u64,
    dropped: u64,
}

impl EventPump {
    async fn run(mut self) {
        loop {
            if *self.cancel.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = self.cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                next = self.source.next() => match next {
                    None => {
                        tracing::info!(subscription = self.id, "event source ended");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(subscription = self.id, error = %e, "event source failed");
                        self.deliver_final(Err(e)).await;
                        break;
                    }
                    Some(Ok(raw)) => {
                        if !self.filter.matches(&raw) {
                            continue;
                        }
                        let notification = self.decoder.decode(raw);
                        if !self.offer(notification) {
                            tracing::debug!(subscription = self.id, "consumer gone");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(
            subscription = self.id,
            delivered = self.delivered,
            dropped = self.dropped,
            "subscription closed"
        );
        // `self.source` drops here, releasing the transport registration.
    }

    /// Non-blocking hand-off. Returns false once the consumer is gone.
    fn offer(&mut self, notification: Notification) -> bool {
        if self.missed > 0 {
            match self.tx.try_send(Ok(Notification::Lagged { missed: self.missed })) {
                Ok(()) => self.missed = 0,
                Err(TrySendError::Full(_)) => {
                    self.drop_one();
                    return true;
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }

        match self.tx.try_send(Ok(notification)) {
            Ok(()) => {
                self.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.drop_one();
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn drop_one(&mut self) {
        if self.missed == 0 {
            tracing::warn!(subscription = self.id, "consumer lagging, dropping events");
        }
        self.missed += 1;
        self.dropped += 1;
    }

    /// Terminal items must arrive, so these wait for buffer space (or cancel).
    async fn deliver_final(&mut self, item: SubscriptionItem) {
        let missed = std::mem::take(&mut self.missed);
        let tx = &self.tx;
        let cancel = &mut self.cancel;
        tokio::select! {
            biased;
            _ = cancel.changed() => {}
            _ = async {
                if missed > 0 {
                    let _ = tx.send(Ok(Notification::Lagged { missed })).await;
                }
                let _ = tx.send(item).await;
            } => {}
        }
    }
}
