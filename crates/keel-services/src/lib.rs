//! keel-services: chain-facing services built on keel-core.
//! Gas estimation, submission, event subscriptions and state reads, all
//! behind the `Transport` and `Signer` seams.

pub mod client;
pub mod events;
pub mod gas;
pub mod intent;
pub mod registry;
pub mod state;
pub mod submitter;
pub mod subscription;
pub mod tracker;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ClientError, ProgramClient};
pub use events::{Notification, Payload, ReplyStatus};
pub use gas::{EstimationError, GasAmount, GasEstimator, GasTarget};
pub use intent::{CodeSource, TransactionIntent};
pub use registry::SchemaRegistry;
pub use state::{StateReadError, StateReader};
pub use submitter::{SubmissionState, SubmitError, Submitter, TransactionReceipt};
pub use subscription::{EventStream, Subscription};
pub use tracker::SubmissionTracker;
pub use transport::{EventFilter, Signer, Transport, TransportError};
