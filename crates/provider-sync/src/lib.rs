//! # provider-sync
//!
//! Everything the proxy says to identity providers: the enrollment handshake
//! that establishes trust, the periodic wallet/service and active-token
//! synchronization, and the fail2ban reporter.
//!
//! All outbound traffic is a signed envelope POSTed to the provider (the
//! enrollment bootstrap is the one GET); responses come back wrapped and are
//! decrypted and verified against the pinned (or, mid-enrollment,
//! temporary) provider key.

mod client;
mod daemons;
mod enroll;
mod error;
mod snapshot;

use std::sync::Arc;
use std::time::Duration;

use trust_store::{ComponentIdentity, KvStore, TrustStore};

pub use client::ProviderClient;
pub use daemons::{run_fail2ban_daemon, run_tokens_daemon, run_wallets_daemon};
pub use enroll::{
    add_identity_provider, confirm_identity_provider, list_identity_providers, CONFIRMED_BODY,
};
pub use error::SyncError;
pub use snapshot::{
    fetch_active_tokens, fetch_wallets_and_services, flatten_tokens, flatten_wallets,
    ActiveTokens, WalletsAndServices,
};

/// TTL on synchronized wallet services and active tokens; stale entries
/// fall out of the store between ticks if a provider stops reporting them.
pub const TOKEN_TTL: Duration = Duration::from_secs(300);

/// Shared handles for every provider-facing operation.
#[derive(Clone)]
pub struct SyncContext {
    pub identity: Arc<ComponentIdentity>,
    pub trust: TrustStore,
    pub data: Arc<dyn KvStore>,
}
