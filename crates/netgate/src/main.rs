mod admin;
mod cli;
mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gate::Gate;
use provider_sync::{ProviderClient, SyncContext};
use rule_engine::RuleSet;
use trust_store::{BanStore, TrustStore};

use crate::admin::AdminServer;
use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI args and load configuration.
    let cli = Cli::parse();
    let cfg = config::load(&cli.config_file)?;

    // 2. Init tracing with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(
        config_file = %cli.config_file.display(),
        http = %cfg.host.httpaddress,
        admin = %cfg.host.grpcaddress,
        "netgate starting"
    );

    // 3. Connect both storages.
    let data = cfg
        .datastorage
        .connect()
        .await
        .context("failed to initialize data storage")?;
    let fail2ban = cfg
        .fail2bandatastorage
        .connect()
        .await
        .context("failed to initialize fail2ban storage")?;

    // 4. Load (or create) the component identity.
    let trust = TrustStore::new(Arc::clone(&data));
    let identity = Arc::new(
        trust_store::load_component(&trust, &data)
            .await
            .context("failed to load component identity")?,
    );
    info!(id = %identity.id, "component identity loaded");

    // 5. Compile the routing rules.
    let rules = RuleSet::compile(&cfg.rules).context("invalid proxy rules")?;
    info!(hosts = rules.len(), "proxy rules compiled");

    let bans = BanStore::new(fail2ban, Duration::from_millis(cfg.fail2banttl));

    let sync_ctx = SyncContext {
        identity: Arc::clone(&identity),
        trust: trust.clone(),
        data: Arc::clone(&data),
    };

    // 6. Spawn the background daemons. Each loops forever; a failed tick is
    //    its own problem, never the process's.
    tokio::spawn(provider_sync::run_wallets_daemon(
        sync_ctx.clone(),
        ProviderClient::new(None).context("failed to build sync client")?,
    ));
    tokio::spawn(provider_sync::run_tokens_daemon(
        sync_ctx.clone(),
        ProviderClient::new(None).context("failed to build sync client")?,
    ));
    tokio::spawn(provider_sync::run_fail2ban_daemon(bans.clone()));

    // 7. Proxy listener.
    let gate = Gate::new(rules, trust, data, bans, cfg.tlsskipverify)?;
    let http_addr = config::normalize_addr(&cfg.host.httpaddress);
    let gate_task = tokio::spawn(async move { gate.run(&http_addr).await });

    // 8. Admin listener runs in the foreground; either listener failing
    //    takes the process down with a non-zero exit.
    let admin = AdminServer::new(sync_ctx)?;
    let admin_addr = config::normalize_addr(&cfg.host.grpcaddress);

    tokio::select! {
        result = gate_task => {
            result.context("proxy listener task panicked")??;
        }
        result = admin.run(&admin_addr) => {
            result?;
        }
    }

    Ok(())
}
