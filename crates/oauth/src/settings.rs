use std::path::PathBuf;

use secrecy::SecretString;

use crate::{config_dir::sfdup_config_dir, types::AuthConfig};

fn config_path() -> PathBuf {
    sfdup_config_dir().join("auth.json")
}

/// Load the org connection settings.
///
/// Priority:
/// 1. Environment variables (`SFDUP_AUTH_DOMAIN`, `SFDUP_CLIENT_ID`, ...)
/// 2. User config file (`~/.config/sfdup/auth.json`)
/// 3. Built-in defaults (redirect URI, scope)
///
/// Missing `auth_domain`/`client_id` are not an error here — the flow rejects
/// them before doing any work, so a misconfigured attempt leaves nothing
/// behind.
pub fn load_auth_config() -> AuthConfig {
    let mut config = std::fs::read_to_string(config_path())
        .ok()
        .and_then(|data| serde_json::from_str::<AuthConfig>(&data).ok())
        .unwrap_or_default();
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

fn apply_overrides(config: &mut AuthConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SFDUP_AUTH_DOMAIN") {
        config.auth_domain = v;
    }
    if let Some(v) = lookup("SFDUP_CLIENT_ID") {
        config.client_id = v;
    }
    if let Some(v) = lookup("SFDUP_REDIRECT_URI") {
        config.redirect_uri = v;
    }
    if let Some(v) = lookup("SFDUP_SCOPE") {
        config.scope = v;
    }
    if let Some(v) = lookup("SFDUP_CLIENT_SECRET")
        && !v.is_empty()
    {
        config.client_secret = Some(SecretString::new(v));
    }
    if let Some(v) = lookup("SFDUP_STATE_PASSTHROUGH") {
        config.state_passthrough = matches!(v.as_str(), "1" | "true" | "yes");
    }
}

/// The loopback port for the callback server (parsed from `redirect_uri`).
pub fn callback_port(config: &AuthConfig) -> u16 {
    url::Url::parse(&config.redirect_uri)
        .ok()
        .and_then(|u| u.port())
        .unwrap_or(1717)
}

/// The path component the callback server listens on.
pub fn callback_path(config: &AuthConfig) -> String {
    url::Url::parse(&config.redirect_uri)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| "/oauth/callback".to_string())
}
