//! REST client for the remote (Mattermost) API.
//!
//! Follows the same "plain `reqwest::Client` + explicit endpoint methods"
//! shape as the teacher's `MatrixChannel`: one thin wrapper per call, each
//! mapping a non-2xx response into [`Error::Http`]-equivalent context via
//! [`Error::Channel`], rather than a generated client.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;

use crate::{Error, Result};

use super::types::{ChannelMember, FileInfo, Reaction, RemoteChannel, RemotePost, RemoteUser, Team};

/// An authenticated REST client bound to one account's server and bearer
/// token. Cheap to clone (the inner `reqwest::Client` and token are
/// reference-counted / small).
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl RestClient {
    /// Build a new client. Does not perform any network I/O.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: SecretString::from(token.into()),
        }
    }

    /// The server URL this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The bearer token this client authenticates with.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base_url)
    }

    fn ws_url(&self) -> String {
        let scheme_swapped = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{scheme_swapped}/api/v4/websocket")
    }

    /// The websocket URL for this client's server, scheme-swapped from the
    /// REST base URL per §4.H step 4.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        self.ws_url()
    }

    async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::BadCredentials(format!("{what}: {status} {body}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Channel(format!("{what}: {status} {body}")))
    }

    /// Validate the token and return the authenticated user. Maps 401/403
    /// to [`Error::BadCredentials`] per §7.
    pub async fn identity(&self) -> Result<RemoteUser> {
        let response = self
            .http
            .get(self.api_url("/users/me"))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| Error::Channel(format!("identity request failed: {e}")))?;
        let response = Self::check_status(response, "identity").await?;
        response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("identity response: {e}")))
    }

    /// Fetch the first team the authenticated user belongs to.
    pub async fn first_team(&self) -> Result<Option<Team>> {
        let response = self
            .http
            .get(self.api_url("/users/me/teams"))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| Error::Channel(format!("teams request failed: {e}")))?;
        let response = Self::check_status(response, "teams").await?;
        let teams: Vec<Team> = response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("teams response: {e}")))?;
        Ok(teams.into_iter().next())
    }

    /// Fetch all channels for a team that the user belongs to.
    pub async fn channels_for_team(&self, team_id: &str, user_id: &str) -> Result<Vec<RemoteChannel>> {
        let response = self
            .http
            .get(self.api_url(&format!(
                "/users/{}/teams/{}/channels",
                urlencoding::encode(user_id),
                urlencoding::encode(team_id)
            )))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| Error::Channel(format!("channels request failed: {e}")))?;
        let response = Self::check_status(response, "channels").await?;
        response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("channels response: {e}")))
    }

    /// Fetch cross-team direct and group-DM channels for the user.
    pub async fn direct_and_group_channels(&self, user_id: &str) -> Result<Vec<RemoteChannel>> {
        let response = self
            .http
            .get(self.api_url(&format!("/users/{}/channels", urlencoding::encode(user_id))))
            .query(&[("include_deleted", "false")])
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| Error::Channel(format!("dm channels request failed: {e}")))?;
        let response = Self::check_status(response, "dm channels").await?;
        let all: Vec<RemoteChannel> = response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("dm channels response: {e}")))?;
        Ok(all
            .into_iter()
            .filter(|c| matches!(c.channel_type, super::types::ChannelType::Direct | super::types::ChannelType::Group))
            .collect())
    }

    /// Fetch the member list for a channel.
    pub async fn channel_members(&self, channel_id: &str) -> Result<Vec<ChannelMember>> {
        let response = self
            .http
            .get(self.api_url(&format!("/channels/{}/members", urlencoding::encode(channel_id))))
            .query(&[("per_page", "200")])
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| Error::Channel(format!("channel members request failed: {e}")))?;
        let response = Self::check_status(response, "channel members").await?;
        response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("channel members response: {e}")))
    }

    /// Create a post.
    pub async fn create_post(&self, channel_id: &str, message: &str, root_id: Option<&str>, file_ids: &[String]) -> Result<RemotePost> {
        #[derive(Serialize)]
        struct Body<'a> {
            channel_id: &'a str,
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            root_id: Option<&'a str>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            file_ids: &'a [String],
        }

        let response = self
            .http
            .post(self.api_url("/posts"))
            .bearer_auth(self.token())
            .json(&Body {
                channel_id,
                message,
                root_id,
                file_ids,
            })
            .send()
            .await
            .map_err(|e| Error::Channel(format!("create post failed: {e}")))?;
        let response = Self::check_status(response, "create post").await?;
        response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("create post response: {e}")))
    }

    /// Patch a post's message in place.
    pub async fn update_post(&self, post_id: &str, message: &str) -> Result<RemotePost> {
        let response = self
            .http
            .put(self.api_url(&format!("/posts/{}/patch", urlencoding::encode(post_id))))
            .bearer_auth(self.token())
            .json(&json!({ "message": message }))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("update post failed: {e}")))?;
        let response = Self::check_status(response, "update post").await?;
        response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("update post response: {e}")))
    }

    /// Delete a post.
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.api_url(&format!("/posts/{}", urlencoding::encode(post_id))))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| Error::Channel(format!("delete post failed: {e}")))?;
        Self::check_status(response, "delete post").await?;
        Ok(())
    }

    /// Save (add) a reaction.
    pub async fn save_reaction(&self, user_id: &str, post_id: &str, emoji_name: &str) -> Result<()> {
        let response = self
            .http
            .post(self.api_url("/reactions"))
            .bearer_auth(self.token())
            .json(&Reaction {
                user_id: user_id.to_string(),
                post_id: post_id.to_string(),
                emoji_name: emoji_name.to_string(),
            })
            .send()
            .await
            .map_err(|e| Error::Channel(format!("save reaction failed: {e}")))?;
        Self::check_status(response, "save reaction").await?;
        Ok(())
    }

    /// Delete a reaction.
    pub async fn delete_reaction(&self, user_id: &str, post_id: &str, emoji_name: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.api_url(&format!(
                "/users/{}/posts/{}/reactions/{}",
                urlencoding::encode(user_id),
                urlencoding::encode(post_id),
                urlencoding::encode(emoji_name)
            )))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| Error::Channel(format!("delete reaction failed: {e}")))?;
        Self::check_status(response, "delete reaction").await?;
        Ok(())
    }

    /// Mark a channel as viewed (read receipt).
    pub async fn view_channel(&self, user_id: &str, channel_id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.api_url(&format!("/channels/members/{}/view", urlencoding::encode(user_id))))
            .bearer_auth(self.token())
            .json(&json!({ "channel_id": channel_id }))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("view channel failed: {e}")))?;
        Self::check_status(response, "view channel").await?;
        Ok(())
    }

    /// Publish a typing indicator. Best-effort: errors are returned to the
    /// caller, which (per §4.E) logs and swallows them.
    pub async fn publish_typing(&self, channel_id: &str, parent_id: Option<&str>) -> Result<()> {
        let response = self
            .http
            .post(self.api_url("/channels/typing"))
            .bearer_auth(self.token())
            .json(&json!({ "channel_id": channel_id, "parent_id": parent_id.unwrap_or("") }))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("typing publish failed: {e}")))?;
        Self::check_status(response, "typing publish").await?;
        Ok(())
    }

    /// Upload a file's bytes, returning the resulting file handle.
    pub async fn upload_file(&self, channel_id: &str, filename: &str, mime_type: &str, data: Vec<u8>) -> Result<FileInfo> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|e| Error::Channel(format!("invalid mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("channel_id", channel_id.to_string())
            .part("files", part);

        let response = self
            .http
            .post(self.api_url("/files"))
            .bearer_auth(self.token())
            .multipart(form)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("file upload failed: {e}")))?;
        let response = Self::check_status(response, "file upload").await?;

        #[derive(serde::Deserialize)]
        struct UploadResponse {
            file_infos: Vec<FileInfo>,
        }
        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("file upload response: {e}")))?;
        parsed
            .file_infos
            .into_iter()
            .next()
            .ok_or_else(|| Error::Malformed("file upload response had no file_infos".to_string()))
    }

    /// Posts strictly after `anchor`, oldest-first page semantics per the
    /// remote API (caller re-sorts regardless, per §4.H step 4).
    pub async fn posts_after(&self, channel_id: &str, anchor: &str, per_page: u32) -> Result<Vec<RemotePost>> {
        self.fetch_posts(channel_id, &[("after", anchor), ("per_page", &per_page.to_string())])
            .await
    }

    /// Posts strictly before `anchor`.
    pub async fn posts_before(&self, channel_id: &str, anchor: &str, per_page: u32) -> Result<Vec<RemotePost>> {
        self.fetch_posts(channel_id, &[("before", anchor), ("per_page", &per_page.to_string())])
            .await
    }

    /// The latest `per_page` posts in the channel.
    pub async fn latest_posts(&self, channel_id: &str, per_page: u32) -> Result<Vec<RemotePost>> {
        self.fetch_posts(channel_id, &[("per_page", &per_page.to_string())]).await
    }

    async fn fetch_posts(&self, channel_id: &str, query: &[(&str, &str)]) -> Result<Vec<RemotePost>> {
        let response = self
            .http
            .get(self.api_url(&format!("/channels/{}/posts", urlencoding::encode(channel_id))))
            .query(query)
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| Error::Channel(format!("fetch posts failed: {e}")))?;
        let response = Self::check_status(response, "fetch posts").await?;

        #[derive(serde::Deserialize)]
        struct PostsResponse {
            order: Vec<String>,
            posts: std::collections::HashMap<String, RemotePost>,
        }
        let mut parsed: PostsResponse = response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("fetch posts response: {e}")))?;
        Ok(parsed
            .order
            .into_iter()
            .filter_map(|id| parsed.posts.remove(&id))
            .collect())
    }
}
