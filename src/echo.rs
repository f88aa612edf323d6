//! Echo-prevention filter (§4.C).
//!
//! A pure predicate over an inbound remote event's sender, evaluated as
//! five independent layers in a fixed order. Any layer matching drops the
//! event; none is redundant, and none short-circuits the others — an event
//! with an empty `sender_name` still gets evaluated against layers 4/5,
//! they simply never match it (§9 open question, resolved: yes).

use crate::config::{CANONICAL_BRIDGE_USERNAME, GHOST_USERNAME_PREFIX};
use crate::ids::RemoteUserId;
use crate::puppet::PuppetRegistry;

/// One inbound event's identifying fields, as needed by the filter. Covers
/// both posts (which carry a post-type tag) and reactions (which don't).
#[derive(Debug, Clone)]
pub struct EchoCandidate<'a> {
    pub author_remote_user_id: &'a RemoteUserId,
    pub sender_username: &'a str,
    /// `Some(tag)` for posts; `None` for reactions, where layer 2 is
    /// structurally inapplicable.
    pub post_type: Option<&'a str>,
}

/// A filter bound to one session's identity and config, so it can be
/// reused across every inbound event without re-threading state.
pub struct EchoFilter<'a> {
    session_remote_user_id: &'a RemoteUserId,
    bot_prefix: &'a str,
}

impl<'a> EchoFilter<'a> {
    /// Build a filter for the given session identity and configured extra
    /// bot-username prefix (empty disables layer 5's operator-configured
    /// half).
    #[must_use]
    pub const fn new(session_remote_user_id: &'a RemoteUserId, bot_prefix: &'a str) -> Self {
        Self {
            session_remote_user_id,
            bot_prefix,
        }
    }

    /// Evaluate all five layers in order; `true` means drop.
    #[must_use]
    pub fn should_drop(&self, puppets: &PuppetRegistry, candidate: &EchoCandidate<'_>) -> bool {
        // Layer 1: self-post.
        if candidate.author_remote_user_id == self.session_remote_user_id {
            return true;
        }

        // Layer 2: system event (posts only).
        if let Some(post_type) = candidate.post_type {
            if !post_type.is_empty() && post_type != "default" {
                return true;
            }
        }

        // Layer 3: puppet-authored.
        if puppets.contains_remote_user(candidate.author_remote_user_id) {
            return true;
        }

        let username = candidate.sender_username.strip_prefix('@').unwrap_or(candidate.sender_username);
        if !username.is_empty() {
            // Layer 4: canonical bridge identity.
            if username == CANONICAL_BRIDGE_USERNAME {
                return true;
            }

            // Layer 5: ghost/bot username prefix.
            if username.starts_with(GHOST_USERNAME_PREFIX) {
                return true;
            }
            if !self.bot_prefix.is_empty() && username.starts_with(self.bot_prefix) {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puppet::PuppetClient;
    use crate::remote::RestClient;

    fn registry_with(puppet_remote_id: &str) -> PuppetRegistry {
        let registry = PuppetRegistry::new();
        registry.install_for_test(PuppetClient {
            mxid: "@alice:ex.com".to_string(),
            remote_user_id: RemoteUserId::encode(puppet_remote_id),
            username: "alice-mm".to_string(),
            client: RestClient::new("https://chat.example.com", "tok"),
            server_url: "https://chat.example.com".to_string(),
        });
        registry
    }

    #[test]
    fn layer1_self_post_is_dropped() {
        let session = RemoteUserId::encode("self-id");
        let filter = EchoFilter::new(&session, "");
        let registry = PuppetRegistry::new();
        let candidate = EchoCandidate {
            author_remote_user_id: &session,
            sender_username: "@self",
            post_type: Some("default"),
        };
        assert!(filter.should_drop(&registry, &candidate));
    }

    #[test]
    fn layer2_system_event_is_dropped() {
        let session = RemoteUserId::encode("self-id");
        let other = RemoteUserId::encode("other-id");
        let filter = EchoFilter::new(&session, "");
        let registry = PuppetRegistry::new();
        let candidate = EchoCandidate {
            author_remote_user_id: &other,
            sender_username: "@anyone",
            post_type: Some("system_join_channel"),
        };
        assert!(filter.should_drop(&registry, &candidate));
    }

    #[test]
    fn layer3_puppet_authored_is_dropped() {
        let session = RemoteUserId::encode("self-id");
        let puppet_id = RemoteUserId::encode("alice-mm");
        let filter = EchoFilter::new(&session, "");
        let registry = registry_with("alice-mm");
        let candidate = EchoCandidate {
            author_remote_user_id: &puppet_id,
            sender_username: "@alice-mm",
            post_type: Some("default"),
        };
        assert!(filter.should_drop(&registry, &candidate));
    }

    #[test]
    fn layer4_canonical_bridge_username_is_dropped() {
        let session = RemoteUserId::encode("self-id");
        let other = RemoteUserId::encode("other-id");
        let filter = EchoFilter::new(&session, "");
        let registry = PuppetRegistry::new();
        let candidate = EchoCandidate {
            author_remote_user_id: &other,
            sender_username: &format!("@{CANONICAL_BRIDGE_USERNAME}"),
            post_type: Some("default"),
        };
        assert!(filter.should_drop(&registry, &candidate));
    }

    #[test]
    fn layer5_ghost_prefix_is_dropped() {
        let session = RemoteUserId::encode("self-id");
        let other = RemoteUserId::encode("other-id");
        let filter = EchoFilter::new(&session, "");
        let registry = PuppetRegistry::new();
        let candidate = EchoCandidate {
            author_remote_user_id: &other,
            sender_username: "@mattermost_ghost",
            post_type: Some("default"),
        };
        assert!(filter.should_drop(&registry, &candidate));
    }

    #[test]
    fn layer5_operator_bot_prefix_is_dropped() {
        let session = RemoteUserId::encode("self-id");
        let other = RemoteUserId::encode("other-id");
        let filter = EchoFilter::new(&session, "relaybot_");
        let registry = PuppetRegistry::new();
        let candidate = EchoCandidate {
            author_remote_user_id: &other,
            sender_username: "@relaybot_1",
            post_type: Some("default"),
        };
        assert!(filter.should_drop(&registry, &candidate));
    }

    #[test]
    fn ordinary_post_is_delivered() {
        let session = RemoteUserId::encode("self-id");
        let other = RemoteUserId::encode("other-id");
        let filter = EchoFilter::new(&session, "");
        let registry = PuppetRegistry::new();
        let candidate = EchoCandidate {
            author_remote_user_id: &other,
            sender_username: "@alice",
            post_type: Some("default"),
        };
        assert!(!filter.should_drop(&registry, &candidate));
    }

    #[test]
    fn reaction_has_no_post_type_but_other_layers_still_apply() {
        let session = RemoteUserId::encode("self-id");
        let filter = EchoFilter::new(&session, "");
        let registry = PuppetRegistry::new();
        let candidate = EchoCandidate {
            author_remote_user_id: &session,
            sender_username: "@self",
            post_type: None,
        };
        assert!(filter.should_drop(&registry, &candidate));
    }

    #[test]
    fn empty_sender_name_skips_layers_4_and_5_but_not_1_and_3() {
        let session = RemoteUserId::encode("self-id");
        let puppet_id = RemoteUserId::encode("alice-mm");
        let filter = EchoFilter::new(&session, "");
        let registry = registry_with("alice-mm");
        let candidate = EchoCandidate {
            author_remote_user_id: &puppet_id,
            sender_username: "",
            post_type: Some("default"),
        };
        assert!(filter.should_drop(&registry, &candidate));
    }
}
