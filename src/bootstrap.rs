//! Bootstrap / relay watcher (§4.I).
//!
//! Three independent concerns, each mirroring the teacher's background-task
//! shape (`daemon.rs`'s startup sequence, `relay.rs`'s periodic
//! reconciliation loop, generalised to this bridge's single invariant):
//! auto-login from the environment, the initial relay-assignment burst
//! that follows channel sync, and the steady-state watcher that keeps
//! "every portal has a relay" true indefinitely.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::AutoLoginConfig;
use crate::dispatcher::Dispatcher;
use crate::double_puppet::DoublePuppetRegistry;
use crate::framework::{AccountSessionRecord, BridgeFramework, BridgeState, LoginHandle};
use crate::ids::RemoteUserId;
use crate::puppet::PuppetRegistry;
use crate::remote::RestClient;
use crate::session::ClientSession;
use crate::Result;

/// Default relay-watcher tick interval.
const DEFAULT_WATCHER_INTERVAL_SECS: i64 = 60;
const INITIAL_RELAY_SETUP_DELAY: Duration = Duration::from_secs(15);
const INITIAL_RELAY_SETUP_RETRY_SPACING: Duration = Duration::from_secs(30);
const INITIAL_RELAY_SETUP_ATTEMPTS: u32 = 3;
const AUTO_LOGIN_STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Owns the pieces needed to run auto-login and spawn the relay tasks.
pub struct Bootstrap {
    framework: Arc<dyn BridgeFramework>,
    puppets: Arc<PuppetRegistry>,
    double_puppets: Arc<DoublePuppetRegistry>,
    bot_prefix: String,
    typing_timeout_secs: i64,
    backfill_max_count: i64,
}

impl Bootstrap {
    #[must_use]
    pub fn new(
        framework: Arc<dyn BridgeFramework>,
        puppets: Arc<PuppetRegistry>,
        double_puppets: Arc<DoublePuppetRegistry>,
        bot_prefix: String,
        typing_timeout_secs: i64,
        backfill_max_count: i64,
    ) -> Self {
        Self {
            framework,
            puppets,
            double_puppets,
            bot_prefix,
            typing_timeout_secs,
            backfill_max_count,
        }
    }

    /// Auto-login from the environment triple, if present and no session
    /// already exists (§4.I "Auto-login"). Returns the connected session,
    /// or `None` when the triple isn't configured or login failed.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the session record or the connect
    /// sequence's non-best-effort steps fail.
    pub async fn auto_login(&self) -> Result<Option<Arc<ClientSession>>> {
        let Some(auto) = AutoLoginConfig::from_env() else {
            return Ok(None);
        };

        tokio::time::sleep(AUTO_LOGIN_STARTUP_DELAY).await;

        let client = RestClient::new(&auto.server_url, &auto.token);
        let user = match client.identity().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, owner_mxid = %auto.owner_mxid, "auto-login token validation failed");
                self.framework
                    .publish_bridge_state(&auto.owner_mxid, BridgeState::BadCredentials { message: e.to_string() })
                    .await?;
                return Ok(None);
            }
        };
        let remote_user_id = RemoteUserId::encode(user.id);
        let team = client.first_team().await?;

        let record = AccountSessionRecord {
            server_url: auto.server_url.clone(),
            token: auto.token.clone(),
            remote_user_id: remote_user_id.as_str().to_string(),
            team_id: team.map(|t| t.id),
            double_puppet_only: false,
        };
        self.framework.persist_session(&record).await?;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.framework),
            Arc::clone(&self.puppets),
            Arc::clone(&self.double_puppets),
            remote_user_id.clone(),
            self.bot_prefix.clone(),
            self.typing_timeout_secs,
        ));

        let session = Arc::new(ClientSession::new(
            Arc::clone(&self.framework),
            dispatcher,
            client,
            remote_user_id.clone(),
            auto.owner_mxid.clone(),
            false,
            self.backfill_max_count,
        ));
        session.connect().await?;

        if let Err(e) = self.double_puppets.enrol(self.framework.as_ref(), &remote_user_id, &auto.owner_mxid).await {
            tracing::warn!(error = %e, owner_mxid = %auto.owner_mxid, "owner double-puppet enrolment failed");
        }

        if let Some(login) = self.double_puppets.get(&remote_user_id) {
            let framework = Arc::clone(&self.framework);
            tokio::spawn(async move {
                run_initial_relay_setup(framework, login).await;
            });
        }

        Ok(Some(session))
    }
}

/// Burst-assign the auto-login's relay identity to every portal lacking
/// one, right after channel sync has had a chance to create portals
/// (§4.I "Initial relay setup").
async fn run_initial_relay_setup(framework: Arc<dyn BridgeFramework>, login: LoginHandle) {
    tokio::time::sleep(INITIAL_RELAY_SETUP_DELAY).await;
    for attempt in 0..INITIAL_RELAY_SETUP_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(INITIAL_RELAY_SETUP_RETRY_SPACING).await;
        }
        assign_relay_to_unclaimed_portals(&framework, &login).await;
    }
}

/// One reconciliation pass: find every portal without a relay and assign
/// `login` to it. Logged, non-fatal per-portal (§4.I).
async fn assign_relay_to_unclaimed_portals(framework: &Arc<dyn BridgeFramework>, login: &LoginHandle) {
    let portals = match framework.list_portals().await {
        Ok(portals) => portals,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list portals");
            return;
        }
    };
    for portal in portals {
        match framework.portal_has_relay(&portal).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = framework.set_relay(&portal, login).await {
                    tracing::warn!(error = %e, portal = %portal, "failed to assign relay");
                }
            }
            Err(e) => tracing::warn!(error = %e, portal = %portal, "failed to check portal relay state"),
        }
    }
}

/// Steady-state watcher: every tick, assign any available login as relay
/// for portals still lacking one (§4.I "Watcher loop"). Exits cleanly when
/// `shutdown` is set to `true`.
pub async fn run_relay_watcher(framework: Arc<dyn BridgeFramework>, interval_secs: i64, mut shutdown: watch::Receiver<bool>) {
    let interval = if interval_secs > 0 {
        interval_secs
    } else {
        DEFAULT_WATCHER_INTERVAL_SECS
    };
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.try_into().unwrap_or(DEFAULT_WATCHER_INTERVAL_SECS as u64)));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("relay watcher shutting down");
                    break;
                }
            }
            _ = ticker.tick() => {
                reconcile_relays(&framework).await;
            }
        }
    }
}

/// One watcher tick: any available login fills in for portals lacking a
/// relay, per §4.I "Watcher loop".
async fn reconcile_relays(framework: &Arc<dyn BridgeFramework>) {
    let portals = match framework.list_portals().await {
        Ok(portals) => portals,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list portals during relay reconciliation");
            return;
        }
    };

    for portal in portals {
        match framework.portal_has_relay(&portal).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, portal = %portal, "failed to check portal relay state");
                continue;
            }
        }
        match framework.any_available_login().await {
            Ok(Some(login)) => {
                if let Err(e) = framework.set_relay(&portal, &login).await {
                    tracing::warn!(error = %e, portal = %portal, "failed to assign fallback relay");
                }
            }
            Ok(None) => tracing::debug!(portal = %portal, "no available login to relay this portal yet"),
            Err(e) => tracing::warn!(error = %e, "failed to look up an available login"),
        }
    }
}
