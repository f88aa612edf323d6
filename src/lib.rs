//! mattermost-bridge — a bidirectional Matrix↔Mattermost chat bridge.
//!
//! This crate implements the bridge-side core of a Matrix bridge: it speaks
//! Mattermost's REST and websocket APIs on one side, and drives an
//! application-service-shaped [`framework::BridgeFramework`] trait on the
//! other. The framework boundary is intentionally abstract — the bridge
//! core never touches a homeserver directly — so it can be driven by a
//! real application-service bridge library in production and by the
//! in-memory fake in `framework::testing` under test.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Matrix side                         │
//! │            (via the `BridgeFramework` trait)             │
//! └───────────────────────────┬───────────────────────────────┘
//!                             │
//! ┌───────────────────────────▼───────────────────────────────┐
//! │                    mattermost-bridge                       │
//! │  outbound (Matrix→MM)   │   dispatcher (MM→Matrix)         │
//! │  puppet / double_puppet │   session (REST + websocket)     │
//! │  echo filter            │   bootstrap (auto-login, relay)  │
//! │  ids / emoji / format    │   admin API (puppet reload)     │
//! └───────────────────────────┬───────────────────────────────┘
//!                             │
//! ┌───────────────────────────▼───────────────────────────────┐
//! │                  Mattermost REST + websocket                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod double_puppet;
pub mod echo;
pub mod emoji;
pub mod error;
pub mod format;
pub mod framework;
pub mod ids;
pub mod outbound;
pub mod puppet;
pub mod remote;
pub mod session;

pub use bootstrap::Bootstrap;
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use double_puppet::DoublePuppetRegistry;
pub use error::{Error, Result};
pub use framework::{BridgeFramework, BridgeState};
pub use ids::{ChannelId, EmojiId, PostId, RemoteUserId};
pub use outbound::OutboundHandler;
pub use puppet::PuppetRegistry;
pub use session::ClientSession;
