//! Admin HTTP API (§4.J / §10.5): a small `axum` router exposing puppet
//! hot-reload and double-puppet registration to a trusted operator.

pub mod admin;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::double_puppet::DoublePuppetRegistry;
use crate::framework::BridgeFramework;
use crate::puppet::PuppetRegistry;
use crate::{Error, Result};

/// 1 MiB cap on `/api/reload-puppets` bodies (§4.J).
const RELOAD_BODY_LIMIT: usize = 1024 * 1024;
/// 64 KiB cap on `/api/double-puppet` bodies (§4.J).
const DOUBLE_PUPPET_BODY_LIMIT: usize = 64 * 1024;

/// Shared state for the admin API's handlers.
pub struct ApiState {
    pub puppets: Arc<PuppetRegistry>,
    pub double_puppets: Arc<DoublePuppetRegistry>,
    pub framework: Arc<dyn BridgeFramework>,
    /// Default remote server URL, used when an env-driven reload omits a
    /// per-puppet `_URL` override.
    pub default_server_url: Option<String>,
}

/// Build the admin router (§4.J, §10.5). Both routes accept only `POST`;
/// axum returns 405 automatically for any other method on a matched path.
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/api/reload-puppets",
            post(admin::reload_puppets).route_layer(DefaultBodyLimit::max(RELOAD_BODY_LIMIT)),
        )
        .route(
            "/api/double-puppet",
            post(admin::register_double_puppet).route_layer(DefaultBodyLimit::max(DOUBLE_PUPPET_BODY_LIMIT)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Owns the bound address for the admin API.
pub struct ApiServer {
    router: Router,
    addr: SocketAddr,
}

impl ApiServer {
    /// Build a server bound to `addr`. Returns `None` when `addr` is empty
    /// (the admin API is disabled, §6).
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` cannot be parsed as a socket address.
    pub fn new(addr: &str, state: Arc<ApiState>) -> Result<Option<Self>> {
        if addr.is_empty() {
            return Ok(None);
        }
        let parsed = parse_bind_addr(addr)?;
        Ok(Some(Self {
            router: router(state),
            addr: parsed,
        }))
    }

    /// Bind and serve, blocking until the process is torn down.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server exits
    /// with an error.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind admin API on {}: {e}", self.addr)))?;
        tracing::info!(addr = %self.addr, "admin API listening");
        axum::serve(listener, self.router)
            .await
            .map_err(|e| Error::Config(format!("admin API server error: {e}")))?;
        Ok(())
    }

    /// Spawn [`Self::run`] as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!(error = %e, "admin API server exited with an error");
            }
        })
    }
}

/// Parse a `host:port` or `:port` address (the latter binds all
/// interfaces, matching the teacher's `0.0.0.0:<port>`-style default).
fn parse_bind_addr(addr: &str) -> Result<SocketAddr> {
    let normalised = if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    };
    normalised
        .parse()
        .map_err(|e| Error::Config(format!("invalid admin API address {addr:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bind_addr_expands_bare_port() {
        let addr = parse_bind_addr(":29320").unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:29320");
    }

    #[test]
    fn parse_bind_addr_accepts_explicit_host() {
        let addr = parse_bind_addr("127.0.0.1:8080").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn parse_bind_addr_rejects_garbage() {
        assert!(parse_bind_addr("not-an-address").is_err());
    }
}
