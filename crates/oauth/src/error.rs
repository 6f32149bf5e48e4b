use thiserror::Error;

/// Failures of the PKCE login flow.
///
/// `Config`, `NoCode`, `VerifierUnrecoverable` and `ChallengeMismatch` require
/// the operator to fix something and restart the flow. `Transport` is eligible
/// for the same manual retry as a provider rejection. A provider rejection
/// itself is not an error value — it is the resumable
/// [`CallbackOutcome::Rejected`](crate::flow::CallbackOutcome) state.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing required setting `{0}`; set it in auth.json or via SFDUP_* environment variables")]
    Config(&'static str),

    #[error("no flow-state carrier accepted the verifier; refusing to fall back to the state parameter (enable state_passthrough to override)")]
    FlowStateUnavailable,

    #[error("callback URL carries no authorization code")]
    NoCode,

    #[error("no PKCE verifier could be recovered from any carrier; restart the login flow")]
    VerifierUnrecoverable,

    #[error("recovered verifier does not match the stored challenge (computed {computed}…, stored {stored}…); restart the login flow")]
    ChallengeMismatch { computed: String, stored: String },

    #[error("token exchange failed: {0}")]
    Transport(String),

    #[error("failed to persist credential: {0}")]
    CredentialStore(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}
