//! Puppet registry (§4.F): MXID → materialised remote-API client.
//!
//! A read-write lock guards the map. Reads (identity resolution, echo
//! filter membership tests) take the read lock; the reload algorithm takes
//! the write lock for its whole batch so readers never observe a
//! half-applied reload (§5 Shared-resource discipline).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::PuppetEntry;
use crate::ids::RemoteUserId;
use crate::remote::RestClient;
use crate::Result;

/// A materialised puppet entry: MXID, verified remote identity, and an
/// authenticated REST client holding the last-known token.
#[derive(Clone)]
pub struct PuppetClient {
    pub mxid: String,
    pub remote_user_id: RemoteUserId,
    pub username: String,
    pub client: RestClient,
    pub server_url: String,
}

/// Outcome of a [`PuppetRegistry::reload`] batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

/// Thread-safe MXID → puppet-client map.
#[derive(Default)]
pub struct PuppetRegistry {
    entries: RwLock<HashMap<String, PuppetClient>>,
}

impl PuppetRegistry {
    /// An empty registry. The initial load at process start can populate
    /// it directly before any other task runs, needing no locking (§4.F);
    /// everything after that goes through [`Self::reload`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the puppet client for an MXID, if one is registered.
    #[must_use]
    pub fn get(&self, mxid: &str) -> Option<PuppetClient> {
        self.entries.read().unwrap().get(mxid).cloned()
    }

    /// Whether any registered puppet's remote user ID matches. Used by the
    /// echo filter's layer 3 (constant-time-ish: a single hash lookup over
    /// a scan, since the map is keyed by MXID not remote ID and puppet
    /// counts are small).
    #[must_use]
    pub fn contains_remote_user(&self, remote_user_id: &RemoteUserId) -> bool {
        self.entries.read().unwrap().values().any(|p| &p.remote_user_id == remote_user_id)
    }

    /// Current registered count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All currently registered MXIDs.
    #[must_use]
    pub fn mxids(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    /// A `(mxid, remote_user_id)` snapshot of every registered puppet, used
    /// by callers that need to purge the double-puppet registry for
    /// whatever puppets a reload removes (§4.F step 2a) — the double-puppet
    /// registry is keyed by remote-user-ID, not MXID, so the mapping has to
    /// be captured before the reload drops it.
    #[must_use]
    pub fn entries_snapshot(&self) -> Vec<(String, RemoteUserId)> {
        self.entries.read().unwrap().iter().map(|(mxid, p)| (mxid.clone(), p.remote_user_id.clone())).collect()
    }

    /// Populate the registry from the initial, pre-concurrency load.
    /// Equivalent to `reload` but named separately to match §4.F's
    /// "needs no locking" carve-out; functionally identical since the
    /// `RwLock` is uncontended at that point anyway.
    pub async fn initial_load(&self, desired: Vec<PuppetEntry>) -> ReloadOutcome {
        self.reload(desired).await
    }

    /// The idempotent, write-lock-scoped reload algorithm (§4.F).
    ///
    /// Validates every new/changed token against the remote `identity`
    /// endpoint before installing it; a failed validation is logged and
    /// skipped without aborting the rest of the batch (§7 best-effort).
    pub async fn reload(&self, desired: Vec<PuppetEntry>) -> ReloadOutcome {
        let desired_by_mxid: HashMap<String, PuppetEntry> = desired.into_iter().map(|e| (e.mxid.clone(), e)).collect();

        // Validate outside the lock (network I/O), then apply the whole
        // batch atomically under one write-lock acquisition.
        let mut to_install: Vec<(String, Option<PuppetClient>)> = Vec::new();
        let existing_tokens: HashMap<String, String> = {
            let guard = self.entries.read().unwrap();
            guard.iter().map(|(mxid, p)| (mxid.clone(), p.client.token().to_string())).collect()
        };

        for (mxid, entry) in &desired_by_mxid {
            if existing_tokens.get(mxid) == Some(&entry.token) {
                // Unchanged token: keep the existing client, nothing to
                // validate or install.
                to_install.push((mxid.clone(), None));
                continue;
            }
            let server_url = entry.url.clone().unwrap_or_default();
            let client = RestClient::new(&server_url, &entry.token);
            match client.identity().await {
                Ok(user) => {
                    to_install.push((
                        mxid.clone(),
                        Some(PuppetClient {
                            mxid: mxid.clone(),
                            remote_user_id: RemoteUserId::encode(user.id),
                            username: user.username,
                            client,
                            server_url,
                        }),
                    ));
                }
                Err(e) => {
                    tracing::warn!(mxid = %mxid, slug = %entry.slug, error = %e, "puppet token validation failed, skipping");
                }
            }
        }

        let mut guard = self.entries.write().unwrap();
        let before: std::collections::HashSet<String> = guard.keys().cloned().collect();

        guard.retain(|mxid, _| desired_by_mxid.contains_key(mxid));
        let removed = before.len() - guard.len();

        let mut added = 0usize;
        for (mxid, maybe_client) in to_install {
            if let Some(client) = maybe_client {
                if !before.contains(&mxid) {
                    added += 1;
                } else {
                    // Validated a changed token for an already-present MXID:
                    // not a net add, but still an install.
                }
                guard.insert(mxid, client);
            }
        }

        ReloadOutcome {
            added,
            removed,
            total: guard.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn install_for_test(&self, client: PuppetClient) {
        self.entries.write().unwrap().insert(client.mxid.clone(), client);
    }
}

/// The MXIDs that a reload should remove also need purging from the
/// double-puppet registry per §4.F step 2a; callers (the admin API, the
/// environment-driven reload at startup) are expected to diff old vs new
/// `mxids()` and call [`crate::double_puppet::DoublePuppetRegistry::remove`]
/// for each removed puppet's remote user ID. This helper computes that
/// removed set without needing a second write-lock acquisition inside
/// `reload` itself (keeping the two registries' locks un-nested, per §9).
#[must_use]
pub fn removed_mxids(before: &[String], after_registry: &PuppetRegistry) -> Vec<String> {
    let after: std::collections::HashSet<String> = after_registry.mxids().into_iter().collect();
    before.iter().filter(|m| !after.contains(*m)).cloned().collect()
}
