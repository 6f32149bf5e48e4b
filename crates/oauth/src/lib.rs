pub mod authorize;
pub mod callback_server;
pub mod carriers;
mod config_dir;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod settings;
pub mod storage;
pub mod types;

pub use {
    authorize::build_authorize_url,
    callback_server::CallbackServer,
    carriers::{Carrier, ConfigDirCarrier, FlowStore, SessionCarrier},
    error::AuthError,
    flow::{AuthRequest, CallbackOutcome, PkceFlow, RejectedExchange, STATE_VERIFIER_PREFIX},
    pkce::{derive_challenge, generate_pkce, generate_state, generate_verifier},
    settings::{callback_path, callback_port, load_auth_config},
    storage::CredentialStore,
    types::{AuthConfig, Credential, FlowState, PkceChallenge},
};
