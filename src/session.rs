//! Client session (§4.H): one per account, owning the REST client, the
//! streaming connection, and the channel-sync/backfill algorithms.
//!
//! Mirrors the teacher's per-channel connection-lifecycle shape
//! (`channels/matrix.rs`'s `connect`/reconnect loop) generalised to this
//! bridge's single remote protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::dispatcher::Dispatcher;
use crate::framework::{AccountSessionRecord, BridgeFramework, BridgeState, ChatInfo, ChatMember, RoomType};
use crate::ids::{ChannelId, PostId, RemoteUserId};
use crate::remote::{self, ChannelType, RemoteChannel, RemotePost, RestClient, StreamHandle};
use crate::{Error, Result};

/// Hard cap the remote API imposes on a single page of posts.
const MAX_PAGE_SIZE: u32 = 200;

/// A backfill request, as the framework hands it to [`ClientSession::fetch_messages`].
#[derive(Debug, Clone)]
pub struct BackfillRequest {
    pub channel_id: ChannelId,
    pub anchor: Option<PostId>,
    pub forward: bool,
    pub count: i64,
}

/// One converted message in a [`BackfillResult`].
#[derive(Debug, Clone)]
pub struct BackfillMessage {
    pub post_id: PostId,
    pub remote_user_id: RemoteUserId,
    pub text: String,
    pub timestamp_ms: i64,
    pub reply_to: Option<PostId>,
    pub should_backfill_thread: bool,
}

/// The result of a backfill fetch (§4.H "Backfill").
#[derive(Debug, Clone)]
pub struct BackfillResult {
    pub messages: Vec<BackfillMessage>,
    pub has_more: bool,
    pub forward: bool,
    pub cursor: Option<PostId>,
}

/// Compute `(maxCount, perPage)` from the request and the operator's
/// configured cap, per §4.H step 1-2.
fn resolve_paging(requested_count: i64, configured_backfill_max_count: i64) -> (usize, u32) {
    let max_count = if requested_count > 0 {
        requested_count
    } else {
        configured_backfill_max_count.max(100)
    };
    let per_page = u32::try_from(max_count).unwrap_or(u32::MAX).min(MAX_PAGE_SIZE);
    (usize::try_from(max_count).unwrap_or(usize::MAX), per_page)
}

/// Turn a page of remote posts into a [`BackfillResult`], per §4.H steps
/// 4-8. Pure and independently testable from the network call that
/// produces `posts`.
fn build_backfill_result(mut posts: Vec<RemotePost>, max_count: usize, per_page: u32, forward: bool) -> BackfillResult {
    posts.sort_by_key(|p| p.create_at);
    let original_count = posts.len();
    posts.truncate(max_count);
    posts.retain(|p| !p.is_system_event());

    let cursor = if forward { None } else { posts.first().map(|p| PostId::encode(p.id.clone())) };

    let messages = posts
        .into_iter()
        .map(|p| {
            let reply_to = p.thread_root().map(|r| PostId::encode(r.to_string()));
            BackfillMessage {
                post_id: PostId::encode(p.id.clone()),
                remote_user_id: RemoteUserId::encode(p.user_id.clone()),
                text: p.message.clone(),
                timestamp_ms: p.create_at,
                should_backfill_thread: reply_to.is_some(),
                reply_to,
            }
        })
        .collect();

    BackfillResult {
        messages,
        has_more: original_count >= per_page as usize,
        forward,
        cursor,
    }
}

/// Build the [`ChatInfo`] the framework needs to create or update a
/// portal, per §4.H "Chat-info construction".
#[must_use]
pub fn build_chat_info(channel: &RemoteChannel, members: &[crate::remote::ChannelMember], session_remote_user_id: &RemoteUserId) -> ChatInfo {
    let chat_members: Vec<ChatMember> = members
        .iter()
        .map(|m| ChatMember {
            sender: RemoteUserId::encode(m.user_id.clone()),
            power_level: if m.scheme_admin { Some(50) } else { None },
        })
        .collect();

    let room_type = match channel.channel_type {
        ChannelType::Direct => RoomType::Dm,
        ChannelType::Group => RoomType::Group,
        ChannelType::Open | ChannelType::Private => RoomType::Default,
    };

    let other_user_id = if matches!(channel.channel_type, ChannelType::Direct) {
        members
            .iter()
            .map(|m| RemoteUserId::encode(m.user_id.clone()))
            .find(|id| id != session_remote_user_id)
    } else {
        None
    };

    let name = match channel.channel_type {
        ChannelType::Direct => None,
        ChannelType::Group => Some(channel.display_name.clone()).filter(|s| !s.is_empty()),
        ChannelType::Open | ChannelType::Private => {
            let display = &channel.display_name;
            Some(if display.is_empty() { channel.name.clone() } else { display.clone() })
        }
    };

    let topic = match channel.channel_type {
        ChannelType::Open | ChannelType::Private => Some(channel.header.clone()).filter(|s| !s.is_empty()),
        _ => None,
    };

    ChatInfo {
        channel_id: ChannelId::encode(channel.id.clone()),
        room_type,
        name,
        topic,
        other_user_id,
        total_member_count: chat_members.len(),
        members: chat_members,
        members_is_full: true,
        last_post_at_ms: channel.last_post_at,
    }
}

/// One account session: REST client, streaming handle, and the
/// once-guarded stop signal (§5 "Shared-resource discipline").
pub struct ClientSession {
    framework: Arc<dyn BridgeFramework>,
    dispatcher: Arc<Dispatcher>,
    client: RestClient,
    session_remote_user_id: RemoteUserId,
    owner_mxid: String,
    team_id: Mutex<Option<String>>,
    stream: Mutex<Option<StreamHandle>>,
    double_puppet_only: bool,
    backfill_max_count: i64,
    reconnecting: AtomicBool,
    /// Signals the running `run_reader` loop to stop instead of reconnecting.
    /// Reset to a fresh channel on every `connect()`.
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl ClientSession {
    #[must_use]
    pub fn new(
        framework: Arc<dyn BridgeFramework>,
        dispatcher: Arc<Dispatcher>,
        client: RestClient,
        session_remote_user_id: RemoteUserId,
        owner_mxid: String,
        double_puppet_only: bool,
        backfill_max_count: i64,
    ) -> Self {
        Self {
            framework,
            dispatcher,
            client,
            session_remote_user_id,
            owner_mxid,
            team_id: Mutex::new(None),
            stream: Mutex::new(None),
            double_puppet_only,
            backfill_max_count,
            reconnecting: AtomicBool::new(false),
            stop: Mutex::new(None),
        }
    }

    /// The session's REST client.
    #[must_use]
    pub fn client(&self) -> &RestClient {
        &self.client
    }

    /// The remote-user-ID this session authenticates as.
    #[must_use]
    pub fn remote_user_id(&self) -> &RemoteUserId {
        &self.session_remote_user_id
    }

    /// Run the connect sequence (§4.H "Connect sequence").
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.double_puppet_only {
            return Ok(());
        }

        if let Err(e) = self.client.identity().await {
            tracing::warn!(error = %e, mxid = %self.owner_mxid, "session token validation failed");
            self.framework
                .publish_bridge_state(&self.owner_mxid, BridgeState::BadCredentials { message: e.to_string() })
                .await?;
            return Ok(());
        }

        if self.team_id.lock().await.is_none() {
            if let Some(team) = self.client.first_team().await? {
                *self.team_id.lock().await = Some(team.id);
            }
        }

        let (handle, rx) = remote::connect(self.client.base_url(), self.client.token()).await?;
        *self.stream.lock().await = Some(handle);
        self.framework.publish_bridge_state(&self.owner_mxid, BridgeState::Connected).await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop.lock().await = Some(stop_tx);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_reader(rx, stop_rx).await });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.channel_sync_bootstrap().await {
                tracing::warn!(error = %e, "channel-sync bootstrap failed");
            }
        });

        Ok(())
    }

    /// Stop the streaming connection. Idempotent; safe from concurrent callers.
    pub async fn disconnect(&self) {
        if let Some(stop_tx) = self.stop.lock().await.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = self.stream.lock().await.take() {
            handle.disconnect();
        }
    }

    /// Reader loop: consume envelopes until the channel closes or a stop is
    /// requested (§4.H "connect sequence", §9 "close a shared channel to
    /// signal stop"). On an unrequested close, attempt one reconnect (§5
    /// "Reconnection policy"); on a requested stop, return without
    /// reconnecting.
    async fn run_reader(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<remote::Envelope>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        tracing::info!(mxid = %self.owner_mxid, "reader loop stopped");
                        return;
                    }
                }

                envelope = rx.recv() => {
                    match envelope {
                        Some(envelope) => {
                            if let Err(e) = self.dispatcher.dispatch(envelope).await {
                                tracing::warn!(error = %e, "dispatcher returned an error processing an envelope");
                            }
                        }
                        None => {
                            if *stop_rx.borrow() {
                                // Channel closed because of our own disconnect().
                                return;
                            }
                            if self.reconnecting.swap(true, Ordering::SeqCst) {
                                // A concurrent reconnect is already underway.
                                return;
                            }
                            tracing::info!(mxid = %self.owner_mxid, "stream disconnected, attempting reconnect");
                            let _ = self
                                .framework
                                .publish_bridge_state(&self.owner_mxid, BridgeState::TransientDisconnect)
                                .await;

                            match remote::connect(self.client.base_url(), self.client.token()).await {
                                Ok((handle, new_rx)) => {
                                    *self.stream.lock().await = Some(handle);
                                    let _ = self.framework.publish_bridge_state(&self.owner_mxid, BridgeState::Connected).await;
                                    self.reconnecting.store(false, Ordering::SeqCst);
                                    rx = new_rx;
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "reconnect failed, giving up");
                                    let _ = self
                                        .framework
                                        .publish_bridge_state(&self.owner_mxid, BridgeState::UnknownError { message: e.to_string() })
                                        .await;
                                    self.reconnecting.store(false, Ordering::SeqCst);
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Fetch team channels plus cross-team DMs, dedupe, and queue a
    /// `ChatResync` per channel (§4.H "Channel-sync bootstrap").
    async fn channel_sync_bootstrap(&self) -> Result<()> {
        let team_id = self.team_id.lock().await.clone();
        let mut channels: Vec<RemoteChannel> = Vec::new();

        if let Some(team_id) = team_id {
            channels.extend(self.client.channels_for_team(&team_id, self.session_remote_user_id.as_str()).await?);
        }
        channels.extend(self.client.direct_and_group_channels(self.session_remote_user_id.as_str()).await?);

        let mut seen = std::collections::HashSet::new();
        channels.retain(|c| seen.insert(c.id.clone()));

        for channel in channels {
            let members = match self.client.channel_members(&channel.id).await {
                Ok(members) => members,
                Err(e) => {
                    tracing::warn!(error = %e, channel_id = %channel.id, "failed to fetch channel members, skipping");
                    continue;
                }
            };
            let info = build_chat_info(&channel, &members, &self.session_remote_user_id);
            if let Err(e) = self.framework.queue_chat_resync(info).await {
                tracing::warn!(error = %e, channel_id = %channel.id, "failed to queue chat resync");
            }
        }

        Ok(())
    }

    /// Backfill algorithm (§4.H "Backfill (`FetchMessages`)").
    ///
    /// # Errors
    ///
    /// Returns an error if the remote post-fetch request fails.
    pub async fn fetch_messages(&self, request: BackfillRequest) -> Result<BackfillResult> {
        let (max_count, per_page) = resolve_paging(request.count, self.backfill_max_count);

        let posts = match (request.forward, &request.anchor) {
            (true, Some(anchor)) => self.client.posts_after(request.channel_id.as_str(), anchor.as_str(), per_page).await?,
            (_, Some(anchor)) => self.client.posts_before(request.channel_id.as_str(), anchor.as_str(), per_page).await?,
            (_, None) => self.client.latest_posts(request.channel_id.as_str(), per_page).await?,
        };

        Ok(build_backfill_result(posts, max_count, per_page, request.forward))
    }

    /// Persist this session's state to the framework database, per §6
    /// "Persistent state".
    pub async fn persist(&self, server_url: &str, token: &str, double_puppet_only: bool) -> Result<()> {
        let record = AccountSessionRecord {
            server_url: server_url.to_string(),
            token: token.to_string(),
            remote_user_id: self.session_remote_user_id.as_str().to_string(),
            team_id: self.team_id.lock().await.clone(),
            double_puppet_only,
        };
        self.framework.persist_session(&record).await
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("owner_mxid", &self.owner_mxid)
            .field("session_remote_user_id", &self.session_remote_user_id)
            .field("double_puppet_only", &self.double_puppet_only)
            .finish_non_exhaustive()
    }
}

/// Sentinel error returned by outbound operations on a session with no
/// valid token, per §7 "Not-logged-in".
#[must_use]
pub fn not_logged_in_error() -> Error {
    Error::NotLoggedIn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ChannelMember;

    fn post(id: &str, user: &str, create_at: i64, post_type: &str, root_id: &str) -> RemotePost {
        RemotePost {
            id: id.to_string(),
            channel_id: "ch1".to_string(),
            user_id: user.to_string(),
            message: format!("msg-{id}"),
            root_id: root_id.to_string(),
            file_ids: Vec::new(),
            post_type: post_type.to_string(),
            create_at,
            update_at: create_at,
            delete_at: 0,
            metadata: None,
        }
    }

    #[test]
    fn resolve_paging_uses_requested_count_when_positive() {
        let (max_count, per_page) = resolve_paging(50, 100);
        assert_eq!(max_count, 50);
        assert_eq!(per_page, 50);
    }

    #[test]
    fn resolve_paging_falls_back_to_configured_max_when_unrequested() {
        let (max_count, per_page) = resolve_paging(0, 250);
        assert_eq!(max_count, 250);
        assert_eq!(per_page, MAX_PAGE_SIZE);
    }

    #[test]
    fn resolve_paging_caps_per_page_at_200() {
        let (_, per_page) = resolve_paging(500, 100);
        assert_eq!(per_page, MAX_PAGE_SIZE);
    }

    #[test]
    fn backfill_sorts_ascending_and_drops_system_posts() {
        let posts = vec![
            post("p3", "u1", 3000, "default", ""),
            post("p2", "u1", 2000, "system_join_channel", ""),
            post("p1", "u1", 1000, "default", ""),
        ];
        let result = build_backfill_result(posts, 10, 10, false);
        let ids: Vec<&str> = result.messages.iter().map(|m| m.post_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[test]
    fn backfill_truncates_to_max_count_before_dropping_system_posts() {
        let posts = vec![post("p1", "u1", 1000, "default", ""), post("p2", "u1", 2000, "default", ""), post("p3", "u1", 3000, "default", "")];
        let result = build_backfill_result(posts, 2, 2, false);
        assert_eq!(result.messages.len(), 2);
        assert!(result.has_more);
    }

    #[test]
    fn backfill_marks_reply_and_thread_flag() {
        let posts = vec![post("p1", "u1", 1000, "default", "root1")];
        let result = build_backfill_result(posts, 10, 10, false);
        assert_eq!(result.messages[0].reply_to.as_ref().unwrap().as_str(), "root1");
        assert!(result.messages[0].should_backfill_thread);
    }

    #[test]
    fn backfill_cursor_is_oldest_post_when_backward() {
        let posts = vec![post("p2", "u1", 2000, "default", ""), post("p1", "u1", 1000, "default", "")];
        let result = build_backfill_result(posts, 10, 10, false);
        assert_eq!(result.cursor.unwrap().as_str(), "p1");
    }

    #[test]
    fn backfill_cursor_is_absent_when_forward() {
        let posts = vec![post("p1", "u1", 1000, "default", "")];
        let result = build_backfill_result(posts, 10, 10, true);
        assert!(result.cursor.is_none());
    }

    fn channel(channel_type: ChannelType, display_name: &str, name: &str, header: &str) -> RemoteChannel {
        RemoteChannel {
            id: "ch1".to_string(),
            channel_type,
            display_name: display_name.to_string(),
            name: name.to_string(),
            header: header.to_string(),
            last_post_at: 42,
        }
    }

    #[test]
    fn direct_channel_resolves_other_user_and_dm_room_type() {
        let session_id = RemoteUserId::encode("me");
        let members = vec![ChannelMember { user_id: "me".to_string(), scheme_admin: false }, ChannelMember { user_id: "them".to_string(), scheme_admin: false }];
        let info = build_chat_info(&channel(ChannelType::Direct, "", "dm-name", ""), &members, &session_id);
        assert_eq!(info.room_type, RoomType::Dm);
        assert_eq!(info.other_user_id.unwrap().as_str(), "them");
        assert!(info.name.is_none());
    }

    #[test]
    fn group_channel_uses_display_name() {
        let session_id = RemoteUserId::encode("me");
        let info = build_chat_info(&channel(ChannelType::Group, "Team Chat", "group-name", ""), &[], &session_id);
        assert_eq!(info.room_type, RoomType::Group);
        assert_eq!(info.name.as_deref(), Some("Team Chat"));
    }

    #[test]
    fn open_channel_falls_back_to_system_name_and_carries_topic() {
        let session_id = RemoteUserId::encode("me");
        let info = build_chat_info(&channel(ChannelType::Open, "", "town-square", "welcome"), &[], &session_id);
        assert_eq!(info.room_type, RoomType::Default);
        assert_eq!(info.name.as_deref(), Some("town-square"));
        assert_eq!(info.topic.as_deref(), Some("welcome"));
    }

    #[test]
    fn scheme_admin_member_gets_power_level_50() {
        let session_id = RemoteUserId::encode("me");
        let members = vec![ChannelMember { user_id: "admin".to_string(), scheme_admin: true }, ChannelMember { user_id: "plain".to_string(), scheme_admin: false }];
        let info = build_chat_info(&channel(ChannelType::Open, "", "n", ""), &members, &session_id);
        assert_eq!(info.members.iter().find(|m| m.sender.as_str() == "admin").unwrap().power_level, Some(50));
        assert_eq!(info.members.iter().find(|m| m.sender.as_str() == "plain").unwrap().power_level, None);
    }
}
