//! # trust-store
//!
//! Persistent identity bookkeeping for the proxy: its own key pair and id,
//! the peers it trusts (identity providers and wallets), their pinned public
//! keys, the relations between them, and the fail2ban side-store.
//!
//! Everything is layered over the [`KvStore`] driver trait so the same code
//! runs against Redis in production and the in-memory driver in tests.

mod component;
mod error;
mod fail2ban;
mod identity;
mod kv;
mod memory;
mod redis_store;
mod store;

pub use component::{
    load_component, ComponentError, ComponentIdentity, COMPONENT_IDENTIFICATOR_ID,
    COMPONENT_REAL_ID,
};
pub use error::StorageError;
pub use fail2ban::{BanEvent, BanStore};
pub use identity::{Identificator, IdentificatorKind};
pub use kv::KvStore;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::TrustStore;

/// Namespace for per-wallet authorized-service lists (JSON arrays of
/// host regexes), written by the sync daemons with the token TTL.
pub const SERVICES: &str = "SERVICES";

/// Namespace for currently-active tokens, keyed `walletId/token`.
pub const TOKENS: &str = "TOKENS";
