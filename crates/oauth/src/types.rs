use {
    secrecy::SecretString,
    serde::{Deserialize, Serialize},
};

fn default_redirect_uri() -> String {
    "http://localhost:1717/oauth/callback".into()
}

fn default_scope() -> String {
    "api".into()
}

/// Connection settings for the org being authenticated against.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the authorization server, e.g. `https://x.my.salesforce.com`.
    #[serde(default)]
    pub auth_domain: String,

    /// Connected-app consumer key.
    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    #[serde(default = "default_scope")]
    pub scope: String,

    /// Optional secret for providers that insist on a confidential client.
    /// The flow is designed to work without one.
    #[serde(default)]
    pub client_secret: Option<SecretString>,

    /// Embed the verifier in the OAuth `state` parameter so the return leg
    /// can recover it with no local storage at all. The provider (and any
    /// proxy in front of it) observes the verifier, so this is off unless
    /// explicitly enabled.
    #[serde(default)]
    pub state_passthrough: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_domain: String::new(),
            client_id: String::new(),
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
            client_secret: None,
            state_passthrough: false,
        }
    }
}

/// PKCE S256 verifier/challenge pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// One in-flight authorization attempt, as persisted across the redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    pub verifier: String,
    pub challenge: String,
    /// Unix seconds at flow start; carriers with a bounded lifetime use this
    /// to refuse stale verifiers.
    pub created_at: u64,
}

/// The durable result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub instance_url: String,
    pub token: String,
}

/// Successful token-endpoint response. Providers attach extra fields
/// (`signature`, `id`, ...) which we do not retain.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    #[serde(default)]
    pub instance_url: Option<String>,

    #[serde(default)]
    pub token_type: String,

    #[serde(default)]
    pub scope: Option<String>,
}
