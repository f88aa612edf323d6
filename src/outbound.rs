//! Outbound handler (§4.E): Matrix-side intents → remote API calls.
//!
//! Implements the capability set the framework invokes on behalf of
//! Matrix users — send / edit / delete / react / unreact / read / type —
//! each independently callable, dispatch depending only on the content's
//! kind rather than which Matrix event triggered the call (§9 "Polymorphic
//! outbound handler").

use std::sync::Arc;

use crate::emoji::emoji_to_name;
use crate::format::markdown_to_html;
use crate::framework::BridgeFramework;
use crate::ids::{ChannelId, PostId, RemoteUserId};
use crate::puppet::PuppetRegistry;
use crate::remote::RestClient;
use crate::{Error, Result};

/// A Matrix `msgtype`-shaped piece of content to send. Unknown message
/// types are the caller's problem to reject before calling [`OutboundHandler::send_message`];
/// this enum only models the kinds §4.E recognises.
#[derive(Debug, Clone)]
pub enum MatrixContent {
    Text { body: String },
    Notice { body: String },
    Emote { body: String },
    Media { mxc_url: String, caption: Option<String> },
}

/// The three-path identity lookup's inputs (§4.E "Identity resolution").
#[derive(Debug, Clone, Copy)]
pub struct SenderContext<'a> {
    /// The framework's relay-metadata wrapper MXID, if the event carried
    /// one (path 1 — the normal case for non-logged-in Matrix users).
    pub original_sender_mxid: Option<&'a str>,
    /// The raw event's sender MXID (path 2 — framework passed it through
    /// unwrapped).
    pub raw_sender_mxid: &'a str,
}

/// A resolved remote identity: the REST client to act through and the
/// remote user ID the resulting action will be attributed to.
pub struct ResolvedIdentity {
    pub client: RestClient,
    pub remote_user_id: RemoteUserId,
}

/// Implements every Matrix → remote operation for one account session.
pub struct OutboundHandler {
    framework: Arc<dyn BridgeFramework>,
    puppets: Arc<PuppetRegistry>,
    relay_client: RestClient,
    relay_remote_user_id: RemoteUserId,
}

impl OutboundHandler {
    #[must_use]
    pub fn new(
        framework: Arc<dyn BridgeFramework>,
        puppets: Arc<PuppetRegistry>,
        relay_client: RestClient,
        relay_remote_user_id: RemoteUserId,
    ) -> Self {
        Self {
            framework,
            puppets,
            relay_client,
            relay_remote_user_id,
        }
    }

    /// The three-path identity lookup. Both map reads (path 1, path 2) are
    /// performed from the same registry snapshot so they're consistent
    /// with each other, per §4.E.
    #[must_use]
    pub fn resolve_identity(&self, ctx: SenderContext<'_>) -> ResolvedIdentity {
        if let Some(original) = ctx.original_sender_mxid {
            if let Some(puppet) = self.puppets.get(original) {
                return ResolvedIdentity {
                    client: puppet.client,
                    remote_user_id: puppet.remote_user_id,
                };
            }
        }
        if let Some(puppet) = self.puppets.get(ctx.raw_sender_mxid) {
            return ResolvedIdentity {
                client: puppet.client,
                remote_user_id: puppet.remote_user_id,
            };
        }
        ResolvedIdentity {
            client: self.relay_client.clone(),
            remote_user_id: self.relay_remote_user_id.clone(),
        }
    }

    /// Send a message. Returns the created post's remote ID and the
    /// identity's remote user ID.
    ///
    /// # Errors
    ///
    /// Returns an error for an unsupported content kind, a media download
    /// failure, or a remote API failure.
    pub async fn send_message(
        &self,
        channel_id: &ChannelId,
        content: MatrixContent,
        ctx: SenderContext<'_>,
        reply_to: Option<&PostId>,
    ) -> Result<(PostId, RemoteUserId)> {
        let identity = self.resolve_identity(ctx);
        let root_id = reply_to.map(PostId::as_str);

        let post = match content {
            MatrixContent::Text { body } | MatrixContent::Notice { body } => {
                identity.client.create_post(channel_id.as_str(), &body, root_id, &[]).await?
            }
            MatrixContent::Emote { body } => {
                let message = format!("/me {body}");
                identity.client.create_post(channel_id.as_str(), &message, root_id, &[]).await?
            }
            MatrixContent::Media { mxc_url, caption } => {
                let media = self.framework.download_media(&mxc_url).await?;
                let uploaded = identity
                    .client
                    .upload_file(channel_id.as_str(), &media.filename, &media.mime_type, media.data)
                    .await?;
                let message = match caption {
                    Some(text) if text != media.filename => text,
                    _ => String::new(),
                };
                identity
                    .client
                    .create_post(channel_id.as_str(), &message, root_id, std::slice::from_ref(&uploaded.id))
                    .await?
            }
        };

        Ok((PostId::encode(post.id), identity.remote_user_id))
    }

    /// Patch a post's text in place with the re-converted content.
    pub async fn edit(&self, ctx: SenderContext<'_>, post_id: &PostId, new_body: &str) -> Result<()> {
        let identity = self.resolve_identity(ctx);
        identity.client.update_post(post_id.as_str(), new_body).await?;
        Ok(())
    }

    /// Delete a post.
    pub async fn delete(&self, ctx: SenderContext<'_>, post_id: &PostId) -> Result<()> {
        let identity = self.resolve_identity(ctx);
        identity.client.delete_post(post_id.as_str()).await
    }

    /// Add a reaction, mapping the Matrix emoji key through the emoji
    /// codec first.
    pub async fn react(&self, ctx: SenderContext<'_>, post_id: &PostId, matrix_emoji_key: &str) -> Result<()> {
        let identity = self.resolve_identity(ctx);
        let name = emoji_to_name(matrix_emoji_key);
        identity
            .client
            .save_reaction(identity.remote_user_id.as_str(), post_id.as_str(), &name)
            .await
    }

    /// Remove a reaction.
    pub async fn unreact(&self, ctx: SenderContext<'_>, post_id: &PostId, matrix_emoji_key: &str) -> Result<()> {
        let identity = self.resolve_identity(ctx);
        let name = emoji_to_name(matrix_emoji_key);
        identity
            .client
            .delete_reaction(identity.remote_user_id.as_str(), post_id.as_str(), &name)
            .await
    }

    /// Mark the channel as viewed (read receipt) for the resolved identity.
    pub async fn read(&self, ctx: SenderContext<'_>, channel_id: &ChannelId) -> Result<()> {
        let identity = self.resolve_identity(ctx);
        identity.client.view_channel(identity.remote_user_id.as_str(), channel_id.as_str()).await
    }

    /// Publish a typing indicator. Per §4.E/§7, typing is best-effort: the
    /// caller is expected to log and swallow the error rather than
    /// propagate it.
    pub async fn typing(&self, ctx: SenderContext<'_>, channel_id: &ChannelId) -> Result<()> {
        let identity = self.resolve_identity(ctx);
        identity.client.publish_typing(channel_id.as_str(), None).await
    }

    /// Re-convert Matrix HTML to Mattermost markdown for an edit, using
    /// the crate's format transcoder.
    #[must_use]
    pub fn html_to_markdown_body(body: &str, html_body: Option<&str>) -> String {
        crate::format::html_to_markdown(body, html_body)
    }

    /// Render a markdown reply preview for debugging/tests; production
    /// callers use [`markdown_to_html`] directly on the framework's final
    /// content string. Kept as a thin named wrapper so call sites read
    /// like the other direction's.
    #[must_use]
    pub fn markdown_preview(input: &str) -> crate::format::RenderedMessage {
        markdown_to_html(input)
    }

    /// Reject an unrecognised Matrix `msgtype`.
    pub fn unsupported_msgtype(msgtype: &str) -> Error {
        Error::Malformed(format!("unsupported msgtype: {msgtype}"))
    }
}
