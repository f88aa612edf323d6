//! Configuration for the Mattermost bridge
//!
//! Precedence per option: environment variable, then the TOML config file
//! (path from `BRIDGE_CONFIG`, default `./bridge.toml`), then a hardcoded
//! default. Every fallback is logged at `debug` so operators can see why a
//! value took the value it did.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::Result;
use crate::remote::RemoteUser;

/// Default admin API bind address.
pub const DEFAULT_ADMIN_API_ADDR: &str = ":29320";
/// Default backfill page cap when the operator hasn't configured one.
pub const DEFAULT_BACKFILL_MAX_COUNT: i64 = 100;
/// Default typing-indicator timeout in seconds.
pub const DEFAULT_TYPING_TIMEOUT_SECS: i64 = 5;
/// Canonical bridge username used by the echo filter's layer 4.
pub const CANONICAL_BRIDGE_USERNAME: &str = "mattermost-bridge";
/// Ghost username prefix used by the echo filter's layer 5.
pub const GHOST_USERNAME_PREFIX: &str = "mattermost_";

/// On-disk representation of the recognised config options. Every field is
/// optional here — the env-var/default fallback chain fills gaps in
/// [`Config::load`].
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_url: Option<String>,
    displayname_template: Option<String>,
    bot_prefix: Option<String>,
    admin_api_addr: Option<String>,
    backfill_enabled: Option<bool>,
    backfill_max_count: Option<i64>,
    typing_timeout: Option<i64>,
}

/// Host-independent bridge configuration, resolved from environment, file,
/// and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default remote base URL, used when a puppet/session has no override.
    pub server_url: Option<String>,
    /// Display-name render template. Available variables: `Username`,
    /// `Nickname`, `FirstName`, `LastName`.
    pub displayname_template: String,
    /// Extra echo-filter username prefix (layer 5). Empty disables it.
    pub bot_prefix: String,
    /// Admin API bind address; empty string disables the listener.
    pub admin_api_addr: String,
    /// Whether room backfill runs during channel sync.
    pub backfill_enabled: bool,
    /// Backfill page cap; values `<= 0` fall back to
    /// [`DEFAULT_BACKFILL_MAX_COUNT`].
    pub backfill_max_count: i64,
    /// Typing indicator timeout in seconds; values `<= 0` fall back to
    /// [`DEFAULT_TYPING_TIMEOUT_SECS`].
    pub typing_timeout: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: None,
            displayname_template: "{{.Username}}".to_string(),
            bot_prefix: String::new(),
            admin_api_addr: DEFAULT_ADMIN_API_ADDR.to_string(),
            backfill_enabled: true,
            backfill_max_count: DEFAULT_BACKFILL_MAX_COUNT,
            typing_timeout: DEFAULT_TYPING_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Resolve effective backfill page cap, applying the `<=0` fallback.
    #[must_use]
    pub fn effective_backfill_max_count(&self) -> i64 {
        if self.backfill_max_count > 0 {
            self.backfill_max_count
        } else {
            DEFAULT_BACKFILL_MAX_COUNT
        }
    }

    /// Resolve effective typing timeout, applying the `<=0` fallback.
    #[must_use]
    pub fn effective_typing_timeout_secs(&self) -> i64 {
        if self.typing_timeout > 0 {
            self.typing_timeout
        } else {
            DEFAULT_TYPING_TIMEOUT_SECS
        }
    }

    /// Load configuration from environment, TOML file, and defaults, in
    /// that precedence order per field.
    pub fn load() -> Result<Self> {
        let path = env::var("BRIDGE_CONFIG").unwrap_or_else(|_| "./bridge.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration, reading the TOML file at `path` if it exists.
    pub fn load_from(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            tracing::debug!(path = %path.display(), "no config file found, using env/defaults only");
            FileConfig::default()
        };

        let defaults = Config::default();

        let server_url = env::var("BRIDGE_SERVER_URL").ok().or(file.server_url).or(defaults.server_url);

        let displayname_template = resolve_string(
            "BRIDGE_DISPLAYNAME_TEMPLATE",
            file.displayname_template,
            defaults.displayname_template,
        );

        let bot_prefix = resolve_string("BRIDGE_BOT_PREFIX", file.bot_prefix, defaults.bot_prefix);

        let admin_api_addr = env::var("BRIDGE_API_ADDR")
            .ok()
            .or(file.admin_api_addr)
            .unwrap_or(defaults.admin_api_addr);

        let backfill_enabled = env::var("BRIDGE_BACKFILL_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.backfill_enabled)
            .unwrap_or(defaults.backfill_enabled);

        let backfill_max_count = env::var("BRIDGE_BACKFILL_MAX_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.backfill_max_count)
            .unwrap_or(defaults.backfill_max_count);

        let typing_timeout = env::var("BRIDGE_TYPING_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.typing_timeout)
            .unwrap_or(defaults.typing_timeout);

        Ok(Self {
            server_url,
            displayname_template,
            bot_prefix,
            admin_api_addr,
            backfill_enabled,
            backfill_max_count,
            typing_timeout,
        })
    }
}

fn resolve_string(env_var: &str, file_value: Option<String>, default: String) -> String {
    env::var(env_var).ok().or(file_value).unwrap_or_else(|| {
        tracing::debug!(env_var, "falling back to default config value");
        default
    })
}

static TEMPLATE_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").expect("static pattern is valid"));

/// Render `displayname_template` against a remote user's profile fields.
///
/// Recognises `{{.Username}}`, `{{.Nickname}}`, `{{.FirstName}}`, and
/// `{{.LastName}}`. The template is operator-supplied, so any unrecognised
/// variable falls back to the literal username rather than surfacing a
/// render error.
#[must_use]
pub fn render_display_name(template: &str, user: &RemoteUser) -> String {
    let mut unresolved = false;

    let rendered = TEMPLATE_VAR_RE.replace_all(template, |caps: &regex::Captures<'_>| {
        match &caps[1] {
            "Username" => user.username.clone(),
            "Nickname" => user.nickname.clone(),
            "FirstName" => user.first_name.clone(),
            "LastName" => user.last_name.clone(),
            other => {
                tracing::debug!(variable = other, "unrecognised displayname template variable");
                unresolved = true;
                String::new()
            }
        }
    });

    if unresolved {
        user.username.clone()
    } else {
        rendered.into_owned()
    }
}

/// One puppet entry's desired state, as loaded from the environment or
/// supplied via the admin reload API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PuppetEntry {
    /// Free-form diagnostic/env-var identifier.
    pub slug: String,
    /// Matrix MXID this puppet serves.
    pub mxid: String,
    /// Remote bearer token.
    pub token: String,
    /// Per-puppet server URL override.
    #[serde(default)]
    pub url: Option<String>,
}

/// Scan the process environment for `MATTERMOST_PUPPET_<SLUG>_MXID` /
/// `_TOKEN` / `_URL` triples and build the desired puppet list.
///
/// Entries missing `MXID` or `TOKEN` are omitted; `URL` is optional and
/// falls back to `default_server_url` when absent.
#[must_use]
pub fn load_puppets_from_env(default_server_url: Option<&str>) -> Vec<PuppetEntry> {
    load_puppets_from_env_iter(env::vars(), default_server_url)
}

fn load_puppets_from_env_iter(
    vars: impl Iterator<Item = (String, String)>,
    default_server_url: Option<&str>,
) -> Vec<PuppetEntry> {
    use std::collections::HashMap;

    const PREFIX: &str = "MATTERMOST_PUPPET_";

    let mut slugs: HashMap<String, (Option<String>, Option<String>, Option<String>)> = HashMap::new();

    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(PREFIX) else {
            continue;
        };
        let (slug, field) = match rest.rsplit_once('_') {
            Some((s, f)) => (s, f),
            None => continue,
        };
        let entry = slugs.entry(slug.to_string()).or_default();
        match field {
            "MXID" => entry.0 = Some(value),
            "TOKEN" => entry.1 = Some(value),
            "URL" => entry.2 = Some(value),
            _ => {}
        }
    }

    let mut out: Vec<PuppetEntry> = slugs
        .into_iter()
        .filter_map(|(slug, (mxid, token, url))| {
            let mxid = mxid?;
            let token = token?;
            Some(PuppetEntry {
                slug,
                mxid,
                token,
                url: url.or_else(|| default_server_url.map(str::to_string)),
            })
        })
        .collect();

    out.sort_by(|a, b| a.slug.cmp(&b.slug));
    out
}

/// Required bootstrap auto-login triple, read from the environment.
#[derive(Debug, Clone)]
pub struct AutoLoginConfig {
    /// `MATTERMOST_AUTO_SERVER_URL`
    pub server_url: String,
    /// `MATTERMOST_AUTO_TOKEN`
    pub token: String,
    /// `MATTERMOST_AUTO_OWNER_MXID`
    pub owner_mxid: String,
}

impl AutoLoginConfig {
    /// Read the auto-login triple from the environment. Returns `None`
    /// unless all three variables are set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let server_url = env::var("MATTERMOST_AUTO_SERVER_URL").ok()?;
        let token = env::var("MATTERMOST_AUTO_TOKEN").ok()?;
        let owner_mxid = env::var("MATTERMOST_AUTO_OWNER_MXID").ok()?;
        Some(Self {
            server_url,
            token,
            owner_mxid,
        })
    }
}

/// Resolve the path to the config file, honoring `BRIDGE_CONFIG`.
#[must_use]
pub fn config_path() -> PathBuf {
    env::var("BRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./bridge.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_admin_addr_has_default_port() {
        let config = Config::default();
        assert_eq!(config.admin_api_addr, ":29320");
    }

    #[test]
    fn backfill_max_count_falls_back_when_non_positive() {
        let mut config = Config::default();
        config.backfill_max_count = 0;
        assert_eq!(config.effective_backfill_max_count(), DEFAULT_BACKFILL_MAX_COUNT);

        config.backfill_max_count = -5;
        assert_eq!(config.effective_backfill_max_count(), DEFAULT_BACKFILL_MAX_COUNT);

        config.backfill_max_count = 250;
        assert_eq!(config.effective_backfill_max_count(), 250);
    }

    #[test]
    fn typing_timeout_falls_back_when_non_positive() {
        let mut config = Config::default();
        config.typing_timeout = 0;
        assert_eq!(config.effective_typing_timeout_secs(), DEFAULT_TYPING_TIMEOUT_SECS);

        config.typing_timeout = 20;
        assert_eq!(config.effective_typing_timeout_secs(), 20);
    }

    #[test]
    fn puppet_env_scan_requires_mxid_and_token() {
        let vars = vec![
            ("MATTERMOST_PUPPET_ALICE_MXID".to_string(), "@alice:example.com".to_string()),
            ("MATTERMOST_PUPPET_ALICE_TOKEN".to_string(), "tok-a".to_string()),
            // BOB is missing a token and should be omitted
            ("MATTERMOST_PUPPET_BOB_MXID".to_string(), "@bob:example.com".to_string()),
            ("UNRELATED_VAR".to_string(), "ignored".to_string()),
        ];

        let entries = load_puppets_from_env_iter(vars.into_iter(), Some("https://chat.example.com"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].slug, "ALICE");
        assert_eq!(entries[0].mxid, "@alice:example.com");
        assert_eq!(entries[0].token, "tok-a");
        assert_eq!(entries[0].url.as_deref(), Some("https://chat.example.com"));
    }

    #[test]
    fn puppet_env_scan_honors_per_puppet_url_override() {
        let vars = vec![
            ("MATTERMOST_PUPPET_X_MXID".to_string(), "@x:example.com".to_string()),
            ("MATTERMOST_PUPPET_X_TOKEN".to_string(), "tok-x".to_string()),
            ("MATTERMOST_PUPPET_X_URL".to_string(), "https://other.example.com".to_string()),
        ];

        let entries = load_puppets_from_env_iter(vars.into_iter(), Some("https://default.example.com"));
        assert_eq!(entries[0].url.as_deref(), Some("https://other.example.com"));
    }

    #[test]
    fn auto_login_requires_all_three_vars() {
        assert!(env::var("MATTERMOST_AUTO_SERVER_URL").is_err());
    }

    fn sample_user() -> RemoteUser {
        RemoteUser {
            id: "u1".to_string(),
            username: "jdoe".to_string(),
            nickname: "JD".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
        }
    }

    #[test]
    fn render_display_name_substitutes_all_recognised_variables() {
        let user = sample_user();
        let rendered = render_display_name("{{.FirstName}} {{.LastName}} ({{.Nickname}})", &user);
        assert_eq!(rendered, "Jane Doe (JD)");
    }

    #[test]
    fn render_display_name_default_template_is_username() {
        let user = sample_user();
        assert_eq!(render_display_name(&Config::default().displayname_template, &user), "jdoe");
    }

    #[test]
    fn render_display_name_falls_back_to_username_on_unknown_variable() {
        let user = sample_user();
        let rendered = render_display_name("{{.FirstName}} {{.MiddleName}}", &user);
        assert_eq!(rendered, "jdoe");
    }
}
