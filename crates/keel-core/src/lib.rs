//! keel-core: type schema, wire codec, identities and configuration.
//! Pure data; no I/O beyond config loading. All other Keel crates depend on this one.

pub mod codec;
pub mod config;
pub mod ids;
pub mod json;
pub mod schema;
pub mod value;
pub mod wire;

pub use codec::{decode, decode_payload, encode, DecodeError, EncodeError, EncodedPayload};
pub use ids::{ActorId, BlockHash, CodeId, MessageId, ProgramId};
pub use schema::{EntryPoint, SchemaError, SchemaId, TypeSchema};
pub use value::Value;
