//! Double-puppet registry (§4.G): remote-user-ID → framework login handle.
//!
//! Its own read-write lock, kept separate from the puppet registry's so
//! the two never need a fixed acquisition order (§5/§9).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::framework::{BridgeFramework, LoginHandle};
use crate::ids::RemoteUserId;
use crate::Result;

/// Sentinel token value the framework's double-puppet enrolment
/// recognises as "use the appservice token declared in config" (§4.G
/// step 3).
pub const APPSERVICE_TOKEN_SENTINEL: &str = "as_token";

/// Thread-safe remote-user-ID → login-handle map.
#[derive(Default)]
pub struct DoublePuppetRegistry {
    entries: RwLock<HashMap<RemoteUserId, LoginHandle>>,
}

impl DoublePuppetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the login handle for a remote user, if enrolled.
    #[must_use]
    pub fn get(&self, remote_user_id: &RemoteUserId) -> Option<LoginHandle> {
        self.entries.read().unwrap().get(remote_user_id).cloned()
    }

    /// Remove an entry (used when the owning puppet is dropped from a
    /// reload, §4.F step 2a).
    pub fn remove(&self, remote_user_id: &RemoteUserId) {
        self.entries.write().unwrap().remove(remote_user_id);
    }

    fn install(&self, remote_user_id: RemoteUserId, login: LoginHandle) {
        self.entries.write().unwrap().insert(remote_user_id, login);
    }

    /// Enrol `(remote_user_id, mxid)` as a double puppet (§4.G steps 1-4).
    ///
    /// Best-effort: every step's failure is reported to the caller, which
    /// (per §7) logs and continues rather than aborting the batch this
    /// call is part of.
    pub async fn enrol(&self, framework: &dyn BridgeFramework, remote_user_id: &RemoteUserId, mxid: &str) -> Result<()> {
        let user = framework.resolve_or_create_user(mxid).await?;

        let login = match framework.find_login_for_remote_user(remote_user_id).await? {
            Some(existing) => existing,
            None => framework.enrol_double_puppet(&user, remote_user_id).await?,
        };

        self.install(remote_user_id.clone(), login);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::testing::InMemoryFramework;

    #[tokio::test]
    async fn enrol_installs_mapping_reachable_from_remote_user_id() {
        let framework = InMemoryFramework::new();
        let registry = DoublePuppetRegistry::new();
        let remote_id = RemoteUserId::encode("alice-mm");

        registry.enrol(&framework, &remote_id, "@alice:ex.com").await.unwrap();

        assert!(registry.get(&remote_id).is_some());
    }

    #[tokio::test]
    async fn enrol_reuses_existing_login_for_same_remote_user() {
        let framework = InMemoryFramework::new();
        let registry = DoublePuppetRegistry::new();
        let remote_id = RemoteUserId::encode("alice-mm");

        registry.enrol(&framework, &remote_id, "@alice:ex.com").await.unwrap();
        let first = registry.get(&remote_id).unwrap();
        registry.enrol(&framework, &remote_id, "@alice:ex.com").await.unwrap();
        let second = registry.get(&remote_id).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn remove_purges_entry() {
        let registry = DoublePuppetRegistry::new();
        let remote_id = RemoteUserId::encode("alice-mm");
        registry.install(remote_id.clone(), LoginHandle("dp-alice".to_string()));
        assert!(registry.get(&remote_id).is_some());

        registry.remove(&remote_id);
        assert!(registry.get(&remote_id).is_none());
    }
}
