//! Process entry point.
//!
//! This binary only wires together the pieces the library crate
//! (`mattermost_bridge`) already provides: load config, initialise
//! logging, and start the background tasks. The Matrix-side appservice
//! machinery behind [`mattermost_bridge::BridgeFramework`] is an external
//! collaborator (see the crate docs) and is supplied by the embedding
//! application; this binary links in the in-memory fake under
//! `test-support` purely so the process has something to run standalone
//! for manual smoke testing.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use mattermost_bridge::api::{ApiServer, ApiState};
use mattermost_bridge::{Bootstrap, Config, DoublePuppetRegistry, PuppetRegistry};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error, shutting down");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> mattermost_bridge::Result<()> {
    let config = Config::load()?;
    tracing::info!(
        admin_api_addr = %config.admin_api_addr,
        backfill_enabled = config.backfill_enabled,
        "loaded configuration"
    );

    let framework = standalone_framework()?;

    let puppets = Arc::new(PuppetRegistry::new());
    let desired = mattermost_bridge::config::load_puppets_from_env(config.server_url.as_deref());
    let outcome = puppets.initial_load(desired).await;
    tracing::info!(added = outcome.added, total = outcome.total, "initial puppet load complete");

    let double_puppets = Arc::new(DoublePuppetRegistry::new());

    let bootstrap = Bootstrap::new(
        Arc::clone(&framework),
        Arc::clone(&puppets),
        Arc::clone(&double_puppets),
        config.bot_prefix.clone(),
        config.effective_typing_timeout_secs(),
        config.effective_backfill_max_count(),
    );
    if let Err(e) = bootstrap.auto_login().await {
        tracing::warn!(error = %e, "auto-login did not complete");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watcher_framework = Arc::clone(&framework);
    let watcher = tokio::spawn(mattermost_bridge::bootstrap::run_relay_watcher(watcher_framework, 0, shutdown_rx));

    let state = Arc::new(ApiState {
        puppets,
        double_puppets,
        framework,
        default_server_url: config.server_url.clone(),
    });
    let api = ApiServer::new(&config.admin_api_addr, state)?;
    let api_handle = api.map(ApiServer::spawn);

    tokio::signal::ctrl_c().await.map_err(mattermost_bridge::Error::Io)?;
    tracing::info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    let _ = watcher.await;
    if let Some(handle) = api_handle {
        handle.abort();
    }

    Ok(())
}

#[cfg(feature = "test-support")]
fn standalone_framework() -> mattermost_bridge::Result<Arc<dyn mattermost_bridge::BridgeFramework>> {
    Ok(Arc::new(mattermost_bridge::framework::testing::InMemoryFramework::new()))
}

#[cfg(not(feature = "test-support"))]
fn standalone_framework() -> mattermost_bridge::Result<Arc<dyn mattermost_bridge::BridgeFramework>> {
    Err(mattermost_bridge::Error::Config(
        "no BridgeFramework wired in; the embedding application must supply the Matrix-side \
         appservice implementation (build with the `test-support` feature for a standalone \
         in-memory smoke-test run)"
            .to_string(),
    ))
}
