//! Keel integration test harness.
//!
//! Tests drive the full client stack (codec, estimator, submitter, event
//! stream, state reader) against the in-process mock chain from
//! `keel_services::testing`. No node is needed:
//!
//!   cargo test --test integration
//!
//! RUST_LOG=keel_services=debug shows the service logs.

mod config;
mod events;
mod flows;
mod state;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use keel_core::config::KeelConfig;
use keel_core::schema::{Primitive, SchemaBuilder, VariantArm};
use keel_core::{decode, encode, ActorId, ProgramId, TypeSchema, Value};
use keel_services::testing::{MockChain, MockSigner, ProgramBehaviour};
use keel_services::{CodeSource, Notification, ProgramClient, Subscription, TransactionReceipt};

// ── Fixtures ──────────────────────────────────────────────────────────────────

pub const NFT_CODE: &[u8] = b"\0asm\x01\0\0\0keel-nft";

/// Minimum gas every call into the mock NFT contract needs.
pub const NFT_GAS: u64 = 2_500;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The NFT collection's metadata: init takes `InitConfig`, handle takes
/// `Action` and answers with `Event`, state maps `StateQuery` to `StateReply`.
pub fn nft_schema() -> Arc<TypeSchema> {
    let schema = SchemaBuilder::new("NFT")
        .with_std_primitives()
        .primitive("ActorId", Primitive::FixedBytes(32))
        .optional("OptionActorId", "ActorId")
        .composite("InitConfig", [("name", "text"), ("symbol", "text")])
        .composite("TransferArgs", [("from", "ActorId"), ("to", "ActorId"), ("id", "u32")])
        .variant(
            "Action",
            [
                VariantArm::new("Mint", 0, None),
                VariantArm::new("Burn", 1, Some("u32")),
                VariantArm::new("Transfer", 2, Some("TransferArgs")),
            ],
        )
        .variant(
            "Event",
            [
                VariantArm::new("Minted", 0, Some("u32")),
                VariantArm::new("Burned", 1, Some("u32")),
                VariantArm::new("Transferred", 2, Some("TransferArgs")),
            ],
        )
        .variant(
            "StateQuery",
            [
                VariantArm::new("Name", 0, None),
                VariantArm::new("TotalSupply", 1, None),
                VariantArm::new("OwnerOf", 2, Some("u32")),
            ],
        )
        .variant(
            "StateReply",
            [
                VariantArm::new("Name", 0, Some("text")),
                VariantArm::new("TotalSupply", 1, Some("u64")),
                VariantArm::new("Owner", 2, Some("OptionActorId")),
            ],
        )
        .init(Some("InitConfig"), Some("InitConfig"))
        .handle(Some("Action"), Some("Event"))
        .state(Some("StateQuery"), Some("StateReply"))
        .build();
    match schema {
        Ok(s) => Arc::new(s),
        Err(e) => panic!("NFT fixture schema is invalid: {e}"),
    }
}

pub fn init_config() -> Value {
    Value::composite([
        ("name", Value::text("My NFT Token")),
        ("symbol", Value::text("NFT")),
    ])
}

pub fn actor(b: u8) -> Value {
    Value::Bytes(vec![b; 32])
}

/// The collection account newly minted tokens belong to.
pub fn collection() -> Value {
    Value::Bytes(vec![0; 32])
}

// ── Mock NFT contract ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Collection {
    name: String,
    owners: BTreeMap<u32, ActorId>,
    next_id: u32,
}

impl Collection {
    fn apply(&mut self, action: &Value) -> Result<Value, String> {
        match action.as_variant() {
            Some(("Mint", None)) => {
                let id = self.next_id;
                self.next_id += 1;
                self.owners.insert(id, ActorId::default());
                Ok(Value::variant("Minted", Value::uint(id)))
            }
            Some(("Burn", Some(id))) => {
                let id = token(Some(id))?;
                self.owners
                    .remove(&id)
                    .ok_or_else(|| format!("token {id} does not exist"))?;
                Ok(Value::variant("Burned", Value::uint(id)))
            }
            Some(("Transfer", Some(args))) => {
                let id = token(args.field("id"))?;
                let from = account(args.field("from"))?;
                let to = account(args.field("to"))?;
                match self.owners.get(&id) {
                    Some(owner) if *owner == from => {
                        self.owners.insert(id, to);
                        Ok(Value::variant("Transferred", args.clone()))
                    }
                    Some(_) => Err("not owner".into()),
                    None => Err(format!("token {id} does not exist")),
                }
            }
            _ => Err("unsupported action".into()),
        }
    }

    fn query(&self, query: &Value) -> Result<Value, String> {
        match query.as_variant() {
            Some(("Name", None)) => Ok(Value::variant("Name", Value::text(self.name.clone()))),
            Some(("TotalSupply", None)) => Ok(Value::variant(
                "TotalSupply",
                Value::uint(self.owners.len() as u64),
            )),
            Some(("OwnerOf", Some(id))) => {
                let owner = match self.owners.get(&token(Some(id))?) {
                    Some(owner) => Value::some(Value::Bytes(owner.as_bytes().to_vec())),
                    None => Value::none(),
                };
                Ok(Value::variant("Owner", owner))
            }
            _ => Err("unsupported query".into()),
        }
    }
}

fn token(v: Option<&Value>) -> Result<u32, String> {
    v.and_then(Value::as_uint)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| "bad token id".to_string())
}

fn account(v: Option<&Value>) -> Result<ActorId, String> {
    match v {
        Some(Value::Bytes(b)) => <[u8; 32]>::try_from(b.as_slice())
            .map(ActorId::new)
            .map_err(|_| "bad actor id".to_string()),
        _ => Err("bad actor id".into()),
    }
}

fn answer(schema: &TypeSchema, ty: &str, value: &Value) -> Result<Vec<u8>, String> {
    encode(schema, ty, value)
        .map(|p| p.into_bytes().to_vec())
        .map_err(|e| e.to_string())
}

/// An NFT contract that speaks `schema` on every entry point.
pub fn nft_contract(schema: Arc<TypeSchema>) -> ProgramBehaviour {
    let store = Arc::new(Mutex::new(Collection::default()));

    let (init_schema, init_store) = (schema.clone(), store.clone());
    let (handle_schema, handle_store) = (schema.clone(), store.clone());
    let (dry_schema, dry_store) = (schema.clone(), store.clone());
    let (state_schema, state_store) = (schema, store);

    ProgramBehaviour::accepting()
        .gas(NFT_GAS)
        .init(move |payload| {
            let config = decode(&init_schema, "InitConfig", payload).map_err(|e| e.to_string())?;
            let name = config.field("name").and_then(Value::as_text).unwrap_or_default();
            init_store.lock().map_err(|e| e.to_string())?.name = name.to_owned();
            answer(&init_schema, "InitConfig", &config)
        })
        .handle(move |payload| {
            let action = decode(&handle_schema, "Action", payload).map_err(|e| e.to_string())?;
            let event = handle_store.lock().map_err(|e| e.to_string())?.apply(&action)?;
            answer(&handle_schema, "Event", &event)
        })
        .dry_run(move |payload| {
            let action = decode(&dry_schema, "Action", payload).map_err(|e| e.to_string())?;
            let mut scratch = dry_store.lock().map_err(|e| e.to_string())?.clone();
            let event = scratch.apply(&action)?;
            answer(&dry_schema, "Event", &event)
        })
        .state(move |payload| {
            let query = decode(&state_schema, "StateQuery", payload).map_err(|e| e.to_string())?;
            let reply = state_store.lock().map_err(|e| e.to_string())?.query(&query)?;
            answer(&state_schema, "StateReply", &reply)
        })
}

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub client: ProgramClient,
    pub schema: Arc<TypeSchema>,
    pub alice: Arc<MockSigner>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(KeelConfig::default())
    }

    /// A fresh chain with the NFT code uploaded.
    pub fn with_config(config: KeelConfig) -> Self {
        init_tracing();
        let chain = Arc::new(MockChain::new());
        let schema = nft_schema();
        chain.upload_code(NFT_CODE, nft_contract(schema.clone()));
        Self {
            client: ProgramClient::new(chain.clone(), config),
            chain,
            schema,
            alice: Arc::new(MockSigner::new(0xA1)),
        }
    }

    pub async fn deploy_nft(&self) -> Result<ProgramId> {
        let receipt = self
            .client
            .deploy(
                self.alice.clone(),
                CodeSource::Wasm(Bytes::from_static(NFT_CODE)),
                Bytes::new(),
                self.schema.clone(),
                Some(&init_config()),
                0,
            )
            .await?;
        receipt.program_id.context("deployment receipt without program id")
    }

    pub async fn act(&self, program: ProgramId, action: Value) -> Result<TransactionReceipt> {
        Ok(self
            .client
            .send(self.alice.clone(), program, &self.schema, Some(&action), 0)
            .await?)
    }
}

/// Next notification, failing the test after two seconds of silence.
pub async fn next_event(sub: &mut Subscription) -> Result<Notification> {
    match tokio::time::timeout(Duration::from_secs(2), sub.next()).await {
        Ok(Some(Ok(n))) => Ok(n),
        Ok(Some(Err(e))) => bail!("transport error on subscription: {e}"),
        Ok(None) => bail!("subscription ended"),
        Err(_) => bail!("timed out waiting for an event"),
    }
}

/// True if nothing arrives within `ms`.
pub async fn stays_quiet(sub: &mut Subscription, ms: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(ms), sub.next())
        .await
        .is_err()
}
