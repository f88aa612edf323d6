//! Event parser/dispatcher (§4.D).
//!
//! Consumes decoded stream envelopes, applies the echo filter, and wraps
//! the surviving events into the framework's queue. One dispatcher per
//! account session; envelopes from that session's stream are processed in
//! receive order, which the framework then queues in the same order per
//! portal (§5 Ordering).

use std::sync::Arc;

use crate::double_puppet::DoublePuppetRegistry;
use crate::echo::{EchoCandidate, EchoFilter};
use crate::format::markdown_to_html;
use crate::framework::{BridgeEvent, BridgeFramework, Sender};
use crate::ids::{ChannelId, PostId, RemoteUserId};
use crate::puppet::PuppetRegistry;
use crate::remote::{Envelope, Reaction, RemotePost};
use crate::Result;

/// Render a post's Mattermost-markdown body to the `(format, formatted_body)`
/// pair a [`BridgeEvent`] carries, per the architecture's inbound "format"
/// step (remote stream → dispatcher → echo filter → format → framework
/// queue). `None` when the body has no detected markdown.
fn render_formatted(message: &str) -> Option<(String, String)> {
    let rendered = markdown_to_html(message);
    rendered.format.zip(rendered.formatted_body)
}

/// Fallback typing timeout, mirroring [`crate::config::DEFAULT_TYPING_TIMEOUT_SECS`].
const DEFAULT_TYPING_TIMEOUT_SECS: i64 = crate::config::DEFAULT_TYPING_TIMEOUT_SECS;

/// Dispatches one account session's stream envelopes onto the framework.
pub struct Dispatcher {
    framework: Arc<dyn BridgeFramework>,
    puppets: Arc<PuppetRegistry>,
    double_puppets: Arc<DoublePuppetRegistry>,
    session_remote_user_id: RemoteUserId,
    bot_prefix: String,
    configured_typing_timeout_secs: i64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        framework: Arc<dyn BridgeFramework>,
        puppets: Arc<PuppetRegistry>,
        double_puppets: Arc<DoublePuppetRegistry>,
        session_remote_user_id: RemoteUserId,
        bot_prefix: String,
        configured_typing_timeout_secs: i64,
    ) -> Self {
        Self {
            framework,
            puppets,
            double_puppets,
            session_remote_user_id,
            bot_prefix,
            configured_typing_timeout_secs,
        }
    }

    fn effective_typing_timeout(&self) -> i64 {
        if self.configured_typing_timeout_secs > 0 {
            self.configured_typing_timeout_secs
        } else {
            DEFAULT_TYPING_TIMEOUT_SECS
        }
    }

    async fn resolve_sender(&self, author: &RemoteUserId) -> Sender {
        match self.double_puppets.get(author) {
            Some(login) => Sender::RealUser(login),
            None => Sender::Ghost(author.clone()),
        }
    }

    fn string_field<'a>(data: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a str> {
        data.get(key).and_then(serde_json::Value::as_str)
    }

    /// Process one envelope. Never returns an error for malformed or
    /// unrecognised input — those are logged and dropped per §7; the
    /// `Result` only surfaces genuine framework-boundary failures.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<()> {
        match envelope.event.as_str() {
            "posted" => self.handle_posted(envelope).await,
            "post_edited" => self.handle_post_edited(envelope).await,
            "post_deleted" => self.handle_post_deleted(envelope).await,
            "reaction_added" => self.handle_reaction(envelope, true).await,
            "reaction_removed" => self.handle_reaction(envelope, false).await,
            "typing" => self.handle_typing(envelope).await,
            "channel_viewed" => self.handle_channel_viewed(envelope).await,
            other => {
                tracing::debug!(event_type = other, "unrecognised stream event type, skipping");
                Ok(())
            }
        }
    }

    async fn handle_posted(&self, envelope: Envelope) -> Result<()> {
        let Some(raw) = Self::string_field(&envelope.data, "post") else {
            // A missing payload on a *new* post is a protocol-level bug,
            // not benign like on edits/deletes — log it as malformed.
            tracing::warn!("malformed 'posted' envelope: missing post payload");
            return Ok(());
        };
        let post: RemotePost = match serde_json::from_str(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "malformed 'posted' payload, dropping");
                return Ok(());
            }
        };
        let sender_name = Self::string_field(&envelope.data, "sender_name").unwrap_or_default();

        let author = RemoteUserId::encode(post.user_id.clone());
        let candidate = EchoCandidate {
            author_remote_user_id: &author,
            sender_username: sender_name,
            post_type: Some(post.post_type.as_str()),
        };
        let filter = EchoFilter::new(&self.session_remote_user_id, &self.bot_prefix);
        if filter.should_drop(&self.puppets, &candidate) {
            return Ok(());
        }

        let channel_id = ChannelId::encode(post.channel_id.clone());
        let sender = self.resolve_sender(&author).await;
        let event = BridgeEvent::Message {
            post_id: PostId::encode(post.id.clone()),
            formatted: render_formatted(&post.message),
            files: post.file_parts(),
            text: post.message.clone(),
            reply_to: post.thread_root().map(|r| PostId::encode(r.to_string())),
            timestamp_ms: post.create_at,
        };
        self.framework.queue_event(&channel_id, sender, event).await
    }

    async fn handle_post_edited(&self, envelope: Envelope) -> Result<()> {
        let Some(raw) = Self::string_field(&envelope.data, "post") else {
            // Benign on edits per §4.D step 1's asymmetry.
            return Ok(());
        };
        let post: RemotePost = match serde_json::from_str(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "malformed 'post_edited' payload, dropping");
                return Ok(());
            }
        };

        let author = RemoteUserId::encode(post.user_id.clone());
        let candidate = EchoCandidate {
            author_remote_user_id: &author,
            sender_username: Self::string_field(&envelope.data, "sender_name").unwrap_or_default(),
            post_type: Some(post.post_type.as_str()),
        };
        let filter = EchoFilter::new(&self.session_remote_user_id, &self.bot_prefix);
        if filter.should_drop(&self.puppets, &candidate) {
            return Ok(());
        }

        let channel_id = ChannelId::encode(post.channel_id.clone());
        let sender = self.resolve_sender(&author).await;
        let event = BridgeEvent::Edit {
            post_id: PostId::encode(post.id.clone()),
            formatted: render_formatted(&post.message),
            text: post.message.clone(),
        };
        self.framework.queue_event(&channel_id, sender, event).await
    }

    async fn handle_post_deleted(&self, envelope: Envelope) -> Result<()> {
        let Some(raw) = Self::string_field(&envelope.data, "post") else {
            return Ok(());
        };
        let post: RemotePost = match serde_json::from_str(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "malformed 'post_deleted' payload, dropping");
                return Ok(());
            }
        };

        let author = RemoteUserId::encode(post.user_id.clone());
        let candidate = EchoCandidate {
            author_remote_user_id: &author,
            sender_username: Self::string_field(&envelope.data, "sender_name").unwrap_or_default(),
            post_type: Some(post.post_type.as_str()),
        };
        let filter = EchoFilter::new(&self.session_remote_user_id, &self.bot_prefix);
        if filter.should_drop(&self.puppets, &candidate) {
            return Ok(());
        }

        let channel_id = ChannelId::encode(post.channel_id.clone());
        let sender = self.resolve_sender(&author).await;
        let event = BridgeEvent::Delete {
            post_id: PostId::encode(post.id.clone()),
        };
        self.framework.queue_event(&channel_id, sender, event).await
    }

    async fn handle_reaction(&self, envelope: Envelope, added: bool) -> Result<()> {
        let Some(raw) = Self::string_field(&envelope.data, "reaction") else {
            return Ok(());
        };
        let reaction: Reaction = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "malformed reaction payload, dropping");
                return Ok(());
            }
        };
        let Some(channel_id) = envelope.broadcast.channel_id.clone() else {
            tracing::warn!("reaction envelope missing broadcast channel_id, dropping");
            return Ok(());
        };

        let author = RemoteUserId::encode(reaction.user_id.clone());
        let candidate = EchoCandidate {
            author_remote_user_id: &author,
            sender_username: Self::string_field(&envelope.data, "sender_name").unwrap_or_default(),
            post_type: None,
        };
        let filter = EchoFilter::new(&self.session_remote_user_id, &self.bot_prefix);
        if filter.should_drop(&self.puppets, &candidate) {
            return Ok(());
        }

        let sender = self.resolve_sender(&author).await;
        let event = if added {
            BridgeEvent::ReactionAdd {
                post_id: PostId::encode(reaction.post_id.clone()),
                emoji: crate::emoji::name_to_emoji(&reaction.emoji_name),
            }
        } else {
            BridgeEvent::ReactionRemove {
                post_id: PostId::encode(reaction.post_id.clone()),
                emoji: crate::emoji::name_to_emoji(&reaction.emoji_name),
            }
        };
        self.framework.queue_event(&ChannelId::encode(channel_id), sender, event).await
    }

    async fn handle_typing(&self, envelope: Envelope) -> Result<()> {
        let Some(channel_id) = envelope.broadcast.channel_id.clone() else {
            return Ok(());
        };
        let Some(user_id) = Self::string_field(&envelope.data, "user_id") else {
            return Ok(());
        };
        let author = RemoteUserId::encode(user_id.to_string());
        let candidate = EchoCandidate {
            author_remote_user_id: &author,
            sender_username: "",
            post_type: None,
        };
        let filter = EchoFilter::new(&self.session_remote_user_id, &self.bot_prefix);
        if filter.should_drop(&self.puppets, &candidate) {
            return Ok(());
        }

        let sender = self.resolve_sender(&author).await;
        let event = BridgeEvent::Typing {
            timeout_secs: self.effective_typing_timeout(),
        };
        self.framework.queue_event(&ChannelId::encode(channel_id), sender, event).await
    }

    async fn handle_channel_viewed(&self, envelope: Envelope) -> Result<()> {
        let Some(channel_id) = Self::string_field(&envelope.data, "channel_id").map(str::to_string) else {
            return Ok(());
        };
        let event = BridgeEvent::ReadReceipt;
        // "Viewed" events carry no author field to filter on; they only
        // ever originate from the session's own account in practice, so
        // they're attributed to the relay/ghost path uniformly.
        let sender = Sender::Ghost(self.session_remote_user_id.clone());
        self.framework.queue_event(&ChannelId::encode(channel_id), sender, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::testing::InMemoryFramework;

    fn make_dispatcher(framework: Arc<InMemoryFramework>, session_id: &str) -> Dispatcher {
        Dispatcher::new(
            framework,
            Arc::new(PuppetRegistry::new()),
            Arc::new(DoublePuppetRegistry::new()),
            RemoteUserId::encode(session_id),
            String::new(),
            0,
        )
    }

    fn posted_envelope(user_id: &str, post_type: &str, sender_name: &str, msg: &str) -> Envelope {
        let post = serde_json::json!({
            "id": "p1",
            "channel_id": "ch1",
            "user_id": user_id,
            "message": msg,
            "type": post_type,
            "create_at": 1000,
        });
        let mut data = serde_json::Map::new();
        data.insert("post".to_string(), serde_json::Value::String(post.to_string()));
        data.insert("sender_name".to_string(), serde_json::Value::String(sender_name.to_string()));
        Envelope {
            event: "posted".to_string(),
            data,
            broadcast: crate::remote::Broadcast { channel_id: Some("ch1".to_string()) },
        }
    }

    #[tokio::test]
    async fn echo_layers_drop_all_five_and_sixth_is_delivered() {
        let framework = Arc::new(InMemoryFramework::new());
        let dispatcher = make_dispatcher(framework.clone(), "self-id");
        dispatcher.puppets.install_for_test(crate::puppet::PuppetClient {
            mxid: "@p:ex.com".to_string(),
            remote_user_id: RemoteUserId::encode("puppet-id"),
            username: "p".to_string(),
            client: crate::remote::RestClient::new("https://ex.com", "t"),
            server_url: "https://ex.com".to_string(),
        });

        let events = vec![
            posted_envelope("self-id", "default", "@someone", "a"),
            posted_envelope("other1", "system_join_channel", "@someone", "b"),
            posted_envelope("puppet-id", "default", "@someone", "c"),
            posted_envelope("other2", "default", "@mattermost-bridge", "d"),
            posted_envelope("other3", "default", "@mattermost_ghost", "e"),
        ];
        for e in events {
            dispatcher.dispatch(e).await.unwrap();
        }
        assert_eq!(framework.queued_count(), 0);

        dispatcher
            .dispatch(posted_envelope("other4", "default", "@alice", "hello"))
            .await
            .unwrap();
        assert_eq!(framework.queued_count(), 1);
    }

    #[tokio::test]
    async fn malformed_posted_payload_is_dropped_and_reader_continues() {
        let framework = Arc::new(InMemoryFramework::new());
        let dispatcher = make_dispatcher(framework.clone(), "self-id");

        let mut data = serde_json::Map::new();
        data.insert("post".to_string(), serde_json::Value::String("{bad json".to_string()));
        let envelope = Envelope {
            event: "posted".to_string(),
            data,
            broadcast: crate::remote::Broadcast { channel_id: Some("ch1".to_string()) },
        };
        dispatcher.dispatch(envelope).await.unwrap();
        assert_eq!(framework.queued_count(), 0);

        dispatcher
            .dispatch(posted_envelope("other", "default", "@alice", "next"))
            .await
            .unwrap();
        assert_eq!(framework.queued_count(), 1);
    }

    #[tokio::test]
    async fn posted_message_body_is_rendered_to_matrix_html() {
        let framework = Arc::new(InMemoryFramework::new());
        let dispatcher = make_dispatcher(framework.clone(), "self-id");
        dispatcher
            .dispatch(posted_envelope("other", "default", "@alice", "**bold**"))
            .await
            .unwrap();

        let queued = framework.queued.lock().unwrap();
        match &queued[0].event {
            BridgeEvent::Message { formatted, .. } => {
                let (format, html) = formatted.as_ref().expect("bold markdown should render");
                assert_eq!(format, "html");
                assert!(html.contains("<strong>bold</strong>"));
            }
            other => panic!("expected a Message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn posted_message_with_no_markdown_has_no_formatted_body() {
        let framework = Arc::new(InMemoryFramework::new());
        let dispatcher = make_dispatcher(framework.clone(), "self-id");
        dispatcher
            .dispatch(posted_envelope("other", "default", "@alice", "plain text"))
            .await
            .unwrap();

        let queued = framework.queued.lock().unwrap();
        match &queued[0].event {
            BridgeEvent::Message { formatted, .. } => assert!(formatted.is_none()),
            other => panic!("expected a Message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn posted_message_attachments_become_file_parts() {
        let framework = Arc::new(InMemoryFramework::new());
        let dispatcher = make_dispatcher(framework.clone(), "self-id");

        let post = serde_json::json!({
            "id": "p1",
            "channel_id": "ch1",
            "user_id": "other",
            "message": "look at this",
            "type": "default",
            "create_at": 1000,
            "file_ids": ["f1"],
            "metadata": {
                "files": [
                    {"id": "f1", "name": "cat.png", "mime_type": "image/png", "size": 1234}
                ]
            }
        });
        let mut data = serde_json::Map::new();
        data.insert("post".to_string(), serde_json::Value::String(post.to_string()));
        data.insert("sender_name".to_string(), serde_json::Value::String("@alice".to_string()));
        let envelope = Envelope {
            event: "posted".to_string(),
            data,
            broadcast: crate::remote::Broadcast { channel_id: Some("ch1".to_string()) },
        };
        dispatcher.dispatch(envelope).await.unwrap();

        let queued = framework.queued.lock().unwrap();
        match &queued[0].event {
            BridgeEvent::Message { files, .. } => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].filename, "cat.png");
                assert_eq!(files[0].mime_type, "image/png");
                assert_eq!(files[0].file_id, "f1");
            }
            other => panic!("expected a Message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecognised_event_type_is_skipped_without_error() {
        let framework = Arc::new(InMemoryFramework::new());
        let dispatcher = make_dispatcher(framework.clone(), "self-id");
        let envelope = Envelope {
            event: "status_change".to_string(),
            data: serde_json::Map::new(),
            broadcast: crate::remote::Broadcast::default(),
        };
        dispatcher.dispatch(envelope).await.unwrap();
        assert_eq!(framework.queued_count(), 0);
    }
}
