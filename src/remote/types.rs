//! Wire-shaped domain types for the remote (Mattermost) API and the
//! conversion results the outbound/inbound paths hand to each other.
//!
//! These mirror the REST/stream JSON Mattermost actually sends, the same
//! way the teacher's `channels/matrix.rs` models Matrix's sync response
//! with plain `#[derive(Deserialize)]` structs rather than a generic JSON
//! tree.

use serde::{Deserialize, Serialize};

/// A remote post (message), as returned by the posts endpoints and the
/// `posted`/`post_edited` stream events.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemotePost {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub root_id: String,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(rename = "type", default)]
    pub post_type: String,
    pub create_at: i64,
    #[serde(default)]
    pub update_at: i64,
    #[serde(default)]
    pub delete_at: i64,
    /// Mattermost embeds file metadata for a post's attachments here rather
    /// than requiring a separate fetch per `file_ids` entry.
    #[serde(default)]
    pub metadata: Option<PostMetadata>,
}

/// The subset of a post's `metadata` object this crate cares about.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PostMetadata {
    #[serde(default)]
    pub files: Vec<FileInfo>,
}

impl RemotePost {
    /// The spec's post-type rule: empty or the literal `default` tag is a
    /// normal message; anything else is a system event.
    #[must_use]
    pub fn is_system_event(&self) -> bool {
        !self.post_type.is_empty() && self.post_type != "default"
    }

    /// Thread-root post ID, if this post is a reply.
    #[must_use]
    pub fn thread_root(&self) -> Option<&str> {
        if self.root_id.is_empty() {
            None
        } else {
            Some(&self.root_id)
        }
    }

    /// The post's attachments as ready-to-queue [`MessagePart`] entries, in
    /// the order Mattermost returned them.
    #[must_use]
    pub fn file_parts(&self) -> Vec<MessagePart> {
        self.metadata
            .as_ref()
            .map(|m| {
                m.files
                    .iter()
                    .map(|f| MessagePart {
                        kind: FileKind::from_mime(&f.mime_type),
                        mime_type: f.mime_type.clone(),
                        size: f.size,
                        filename: f.name.clone(),
                        file_id: f.id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Channel type, as Mattermost encodes it in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ChannelType {
    #[serde(rename = "D")]
    Direct,
    #[serde(rename = "G")]
    Group,
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "P")]
    Private,
}

/// A remote channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteChannel {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub display_name: String,
    pub name: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub last_post_at: i64,
}

/// A channel member, as returned by the channel-members endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelMember {
    pub user_id: String,
    #[serde(default)]
    pub scheme_admin: bool,
}

/// A remote user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// A team, as returned by `/users/me/teams`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

/// A reaction, as carried by `reaction_added`/`reaction_removed` events and
/// the save/delete reaction endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Reaction {
    pub user_id: String,
    pub post_id: String,
    pub emoji_name: String,
}

/// An uploaded file handle, as returned by the file-upload endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
}

/// A file attachment carried by a converted, ready-to-queue message.
#[derive(Debug, Clone)]
pub struct MessagePart {
    pub kind: FileKind,
    pub mime_type: String,
    pub size: u64,
    pub filename: String,
    pub file_id: String,
}

/// Broad file category, used to pick the Matrix `msgtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Other,
}

impl FileKind {
    /// Classify a MIME type into a broad file kind.
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else {
            Self::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_type_rules_classify_default_and_empty_as_normal() {
        let mut post = RemotePost {
            id: "p1".to_string(),
            channel_id: "ch1".to_string(),
            user_id: "u1".to_string(),
            message: "hi".to_string(),
            root_id: String::new(),
            file_ids: Vec::new(),
            post_type: String::new(),
            create_at: 0,
            update_at: 0,
            delete_at: 0,
            metadata: None,
        };
        assert!(!post.is_system_event());
        post.post_type = "default".to_string();
        assert!(!post.is_system_event());
        post.post_type = "system_join_channel".to_string();
        assert!(post.is_system_event());
    }

    #[test]
    fn file_parts_empty_without_metadata() {
        let post = RemotePost {
            id: "p1".to_string(),
            channel_id: "ch1".to_string(),
            user_id: "u1".to_string(),
            message: "hi".to_string(),
            root_id: String::new(),
            file_ids: vec!["f1".to_string()],
            post_type: String::new(),
            create_at: 0,
            update_at: 0,
            delete_at: 0,
            metadata: None,
        };
        assert!(post.file_parts().is_empty());
    }

    #[test]
    fn file_parts_classifies_mime_into_file_kind() {
        let post = RemotePost {
            id: "p1".to_string(),
            channel_id: "ch1".to_string(),
            user_id: "u1".to_string(),
            message: "hi".to_string(),
            root_id: String::new(),
            file_ids: vec!["f1".to_string()],
            post_type: String::new(),
            create_at: 0,
            update_at: 0,
            delete_at: 0,
            metadata: Some(PostMetadata {
                files: vec![FileInfo {
                    id: "f1".to_string(),
                    name: "clip.mp4".to_string(),
                    mime_type: "video/mp4".to_string(),
                    size: 42,
                }],
            }),
        };
        let parts = post.file_parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].kind, FileKind::Video);
        assert_eq!(parts[0].filename, "clip.mp4");
    }
}
