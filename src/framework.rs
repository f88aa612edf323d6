//! The boundary to the external Matrix-side bridging framework.
//!
//! The framework (appservice registration, room/ghost/portal database,
//! Matrix API client, media store, outbound-to-Matrix queueing) is an
//! opaque third-party collaborator per §1 — this crate only ever calls the
//! small set of operations listed on [`BridgeFramework`]. Mirrors the
//! "opaque appservice handler" seam seen in the pack's bridge examples,
//! expressed as a Rust trait rather than copied structurally.

use async_trait::async_trait;

use crate::ids::{ChannelId, PostId, RemoteUserId};
use crate::remote::MessagePart;
use crate::Result;

/// An opaque handle to a framework-side Matrix `User` record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserHandle(pub String);

/// An opaque handle to a framework-side login (one per double-puppet or
/// real login).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoginHandle(pub String);

/// Who an inbound event should be attributed to on the Matrix side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// The double-puppet registry resolved an impersonation login for
    /// this remote author — the framework posts as the real Matrix user
    /// behind that login, rather than as a ghost.
    RealUser(LoginHandle),
    /// No double puppet; post as the remote user's ghost.
    Ghost(RemoteUserId),
}

/// A domain event, already echo-filtered, ready to be queued onto the
/// framework in receive order per portal (§5 Ordering).
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Message {
        post_id: PostId,
        text: String,
        formatted: Option<(String, String)>,
        /// Attachments carried by the post, in Mattermost's order (§3
        /// "Conversion result").
        files: Vec<MessagePart>,
        reply_to: Option<PostId>,
        timestamp_ms: i64,
    },
    Edit {
        post_id: PostId,
        text: String,
        formatted: Option<(String, String)>,
    },
    Delete {
        post_id: PostId,
    },
    ReactionAdd {
        post_id: PostId,
        emoji: String,
    },
    ReactionRemove {
        post_id: PostId,
        emoji: String,
    },
    Typing {
        timeout_secs: i64,
    },
    ReadReceipt,
}

/// One participant in a chat-resync, per §4.H "Chat-info construction".
#[derive(Debug, Clone)]
pub struct ChatMember {
    pub sender: RemoteUserId,
    pub power_level: Option<u8>,
}

/// The room-shape the framework should materialise for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomType {
    Dm,
    Group,
    Default,
}

/// Everything the framework needs to create or update a portal for one
/// remote channel.
#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub channel_id: ChannelId,
    pub room_type: RoomType,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub other_user_id: Option<RemoteUserId>,
    pub members: Vec<ChatMember>,
    pub members_is_full: bool,
    pub total_member_count: usize,
    pub last_post_at_ms: i64,
}

/// A persisted account-session record (§6 "Persistent state").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccountSessionRecord {
    pub server_url: String,
    pub token: String,
    pub remote_user_id: String,
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub double_puppet_only: bool,
}

/// The operations this crate's core invokes on the external bridging
/// framework. An opaque seam: every method here corresponds to exactly one
/// framework capability named in §1/§4.
#[async_trait]
pub trait BridgeFramework: Send + Sync {
    /// Queue a domain event onto the framework for delivery to Matrix, in
    /// receive order per portal.
    async fn queue_event(&self, portal: &ChannelId, sender: Sender, event: BridgeEvent) -> Result<()>;

    /// Resolve or create the framework-side `User` record for an MXID.
    async fn resolve_or_create_user(&self, mxid: &str) -> Result<UserHandle>;

    /// Look up an existing double-puppet (or full) login for a remote user.
    async fn find_login_for_remote_user(&self, remote_user_id: &RemoteUserId) -> Result<Option<LoginHandle>>;

    /// Create a lightweight double-puppet-only login for `user`, enrolled
    /// with the appservice's impersonation token.
    async fn enrol_double_puppet(&self, user: &UserHandle, remote_user_id: &RemoteUserId) -> Result<LoginHandle>;

    /// Set `login` as the relay identity for `portal`.
    async fn set_relay(&self, portal: &ChannelId, login: &LoginHandle) -> Result<()>;

    /// Whether `portal` already has a relay identity assigned.
    async fn portal_has_relay(&self, portal: &ChannelId) -> Result<bool>;

    /// Enumerate every bridged portal.
    async fn list_portals(&self) -> Result<Vec<ChannelId>>;

    /// Any login currently known to the framework database (used by the
    /// relay watcher to pick a fallback relay).
    async fn any_available_login(&self) -> Result<Option<LoginHandle>>;

    /// Persist an account-session record.
    async fn persist_session(&self, record: &AccountSessionRecord) -> Result<()>;

    /// Rehydrate all persisted account-session records at startup.
    async fn rehydrate_sessions(&self) -> Result<Vec<AccountSessionRecord>>;

    /// Queue a chat-resync for a channel, including whether it needs
    /// backfill (the framework compares `last_post_at_ms` against its own
    /// recorded latest-message timestamp).
    async fn queue_chat_resync(&self, info: ChatInfo) -> Result<()>;

    /// Publish a bridge-state transition for the session's owner.
    async fn publish_bridge_state(&self, owner_mxid: &str, state: BridgeState) -> Result<()>;

    /// Download the bytes behind a Matrix `mxc://` media reference. The
    /// actual media store is the framework's (§1 out-of-scope); this call
    /// is the seam the outbound handler uses to get bytes it can then
    /// upload to the remote side (§4.E "Send message").
    async fn download_media(&self, mxc_url: &str) -> Result<MediaBytes>;
}

/// Downloaded Matrix media, ready to forward to the remote upload
/// endpoint.
#[derive(Debug, Clone)]
pub struct MediaBytes {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

/// The bridge-state enum surfaced to users per §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    Connected,
    TransientDisconnect,
    BadCredentials { message: String },
    UnknownError { message: String },
}

#[cfg(any(test, feature = "test-support"))]
pub mod testing {
    //! An in-memory [`BridgeFramework`] fake, so Modules D/E/I are
    //! unit-testable without a live Matrix server (§10.4/§10.6).

    use super::{AccountSessionRecord, BridgeEvent, BridgeFramework, BridgeState, ChatInfo, LoginHandle, MediaBytes, Sender, UserHandle};
    use crate::ids::{ChannelId, RemoteUserId};
    use crate::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// One event recorded by [`InMemoryFramework::queue_event`].
    #[derive(Debug, Clone)]
    pub struct QueuedEvent {
        pub portal: ChannelId,
        pub sender: Sender,
        pub event: BridgeEvent,
    }

    /// An in-memory fake that records every call it receives.
    #[derive(Default)]
    pub struct InMemoryFramework {
        pub queued: Mutex<Vec<QueuedEvent>>,
        pub users: Mutex<std::collections::HashMap<String, UserHandle>>,
        pub logins: Mutex<std::collections::HashMap<RemoteUserId, LoginHandle>>,
        pub relays: Mutex<std::collections::HashMap<ChannelId, LoginHandle>>,
        pub portals: Mutex<Vec<ChannelId>>,
        pub sessions: Mutex<Vec<AccountSessionRecord>>,
        pub resyncs: Mutex<Vec<ChatInfo>>,
        pub states: Mutex<Vec<(String, BridgeState)>>,
    }

    impl InMemoryFramework {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a portal with no relay, as the framework would have it
        /// after initial channel sync.
        pub fn add_portal(&self, portal: ChannelId) {
            self.portals.lock().unwrap().push(portal);
        }

        #[must_use]
        pub fn queued_count(&self) -> usize {
            self.queued.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BridgeFramework for InMemoryFramework {
        async fn queue_event(&self, portal: &ChannelId, sender: Sender, event: BridgeEvent) -> Result<()> {
            self.queued.lock().unwrap().push(QueuedEvent {
                portal: portal.clone(),
                sender,
                event,
            });
            Ok(())
        }

        async fn resolve_or_create_user(&self, mxid: &str) -> Result<UserHandle> {
            let mut users = self.users.lock().unwrap();
            Ok(users
                .entry(mxid.to_string())
                .or_insert_with(|| UserHandle(mxid.to_string()))
                .clone())
        }

        async fn find_login_for_remote_user(&self, remote_user_id: &RemoteUserId) -> Result<Option<LoginHandle>> {
            Ok(self.logins.lock().unwrap().get(remote_user_id).cloned())
        }

        async fn enrol_double_puppet(&self, user: &UserHandle, remote_user_id: &RemoteUserId) -> Result<LoginHandle> {
            let login = LoginHandle(format!("dp-{}", user.0));
            self.logins.lock().unwrap().insert(remote_user_id.clone(), login.clone());
            Ok(login)
        }

        async fn set_relay(&self, portal: &ChannelId, login: &LoginHandle) -> Result<()> {
            self.relays.lock().unwrap().insert(portal.clone(), login.clone());
            Ok(())
        }

        async fn portal_has_relay(&self, portal: &ChannelId) -> Result<bool> {
            Ok(self.relays.lock().unwrap().contains_key(portal))
        }

        async fn list_portals(&self) -> Result<Vec<ChannelId>> {
            Ok(self.portals.lock().unwrap().clone())
        }

        async fn any_available_login(&self) -> Result<Option<LoginHandle>> {
            Ok(self.logins.lock().unwrap().values().next().cloned())
        }

        async fn persist_session(&self, record: &AccountSessionRecord) -> Result<()> {
            self.sessions.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn rehydrate_sessions(&self) -> Result<Vec<AccountSessionRecord>> {
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn queue_chat_resync(&self, info: ChatInfo) -> Result<()> {
            self.resyncs.lock().unwrap().push(info);
            Ok(())
        }

        async fn publish_bridge_state(&self, owner_mxid: &str, state: BridgeState) -> Result<()> {
            self.states.lock().unwrap().push((owner_mxid.to_string(), state));
            Ok(())
        }

        async fn download_media(&self, mxc_url: &str) -> Result<MediaBytes> {
            Ok(MediaBytes {
                data: format!("fake-bytes:{mxc_url}").into_bytes(),
                mime_type: "application/octet-stream".to_string(),
                filename: "file.bin".to_string(),
            })
        }
    }
}
