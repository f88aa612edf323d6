//! Shared test utilities for the bridge's integration tests.

use std::sync::Arc;

use mattermost_bridge::api::ApiState;
use mattermost_bridge::framework::testing::InMemoryFramework;
use mattermost_bridge::{DoublePuppetRegistry, PuppetRegistry};

/// Build an `ApiState` wired to a fresh [`InMemoryFramework`] and empty
/// registries, for exercising the admin router end-to-end.
#[must_use]
pub fn test_api_state() -> (Arc<ApiState>, Arc<InMemoryFramework>) {
    let framework = Arc::new(InMemoryFramework::new());
    let state = Arc::new(ApiState {
        puppets: Arc::new(PuppetRegistry::new()),
        double_puppets: Arc::new(DoublePuppetRegistry::new()),
        framework: framework.clone(),
        default_server_url: None,
    });
    (state, framework)
}
