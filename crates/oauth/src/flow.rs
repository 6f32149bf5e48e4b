//! The PKCE authorization-code flow: start, callback handling, exchange.
//!
//! One logical flow is live at a time; starting a new one overwrites the
//! previous attempt in every carrier. The callback pass is a single-shot
//! state machine whose only resumable state is a provider rejection, which
//! re-enters the exchange step (and only that step) with an
//! operator-supplied client secret.

use std::time::Duration;

use {
    reqwest::Client,
    secrecy::{ExposeSecret, SecretString},
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    authorize::{TOKEN_PATH, build_authorize_url},
    carriers::{FlowStore, unix_now},
    error::AuthError,
    pkce::{derive_challenge, generate_pkce, generate_state},
    storage::CredentialStore,
    types::{AuthConfig, Credential, FlowState, PkceChallenge, TokenResponse},
};

/// Prefix marking a verifier embedded in the OAuth `state` parameter.
pub const STATE_VERIFIER_PREFIX: &str = "pkce:";

/// A hung exchange request is cut off after this and reported as transport
/// failure.
const EXCHANGE_TIMEOUT_SECS: u64 = 30;

/// A ready-to-navigate authorization request. The caller may open it
/// immediately or hold it for operator confirmation — either way the
/// generated verifier is already persisted and is never regenerated.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub url: String,
    pub state: String,
    pub pkce: PkceChallenge,
}

/// Terminal result of a callback pass.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Token exchanged, credential persisted, flow state invalidated.
    Complete(Credential),
    /// The provider rejected the exchange. Resumable via
    /// [`PkceFlow::retry_exchange`].
    Rejected(RejectedExchange),
}

/// Provider-reported exchange failure, holding what is needed to re-run the
/// exchange step. The same authorization code is reused across retries; once
/// the provider has invalidated it, every retry lands back here and the
/// operator must restart the flow.
#[derive(Debug, Clone)]
pub struct RejectedExchange {
    pub status: u16,
    pub error: String,
    pub error_description: Option<String>,
    code: String,
    verifier: String,
}

pub struct PkceFlow {
    config: AuthConfig,
    store: FlowStore,
    credentials: CredentialStore,
    client: Client,
}

impl PkceFlow {
    pub fn new(config: AuthConfig) -> Self {
        Self::with_stores(config, FlowStore::new(), CredentialStore::new())
    }

    /// Build a flow over explicit stores (useful for testing).
    pub fn with_stores(config: AuthConfig, store: FlowStore, credentials: CredentialStore) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(EXCHANGE_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            config,
            store,
            credentials,
            client,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start a new authorization attempt: generate the verifier/challenge
    /// pair, persist the flow state, and build the redirect URL.
    ///
    /// Configuration is validated before any random generation or storage
    /// write, so a misconfigured attempt leaves no stale state behind.
    pub fn start(&self) -> Result<AuthRequest, AuthError> {
        if self.config.auth_domain.trim().is_empty() {
            return Err(AuthError::Config("auth_domain"));
        }
        if self.config.client_id.trim().is_empty() {
            return Err(AuthError::Config("client_id"));
        }

        let pkce = generate_pkce();
        let state = if self.config.state_passthrough {
            warn!("embedding the PKCE verifier in the state parameter; the provider can observe it");
            format!("{STATE_VERIFIER_PREFIX}{}", pkce.verifier)
        } else {
            generate_state()
        };

        let flow_state = FlowState {
            verifier: pkce.verifier.clone(),
            challenge: pkce.challenge.clone(),
            created_at: unix_now(),
        };
        let written = self.store.put(&flow_state);
        if written == 0 && !self.config.state_passthrough {
            // Without a carrier the verifier would only survive inside the
            // provider-reflected state parameter. Fail closed instead.
            return Err(AuthError::FlowStateUnavailable);
        }

        let url = build_authorize_url(
            &self.config.auth_domain,
            &self.config.client_id,
            &self.config.redirect_uri,
            &self.config.scope,
            &pkce.challenge,
            &state,
        )?;

        info!(carriers = written, "authorization request prepared");
        Ok(AuthRequest {
            url: url.to_string(),
            state,
            pkce,
        })
    }

    /// Handle the provider redirect. Single pass:
    /// extract the code, recover the verifier, cross-check it against the
    /// stored challenge, exchange, persist the credential.
    pub async fn handle_callback(&self, callback_url: &str) -> Result<CallbackOutcome, AuthError> {
        let url = Url::parse(callback_url)?;
        let mut code = None;
        let mut state_param = None;
        for (key, value) in url.query_pairs() {
            match &*key {
                "code" => code = Some(value.into_owned()),
                "state" => state_param = Some(value.into_owned()),
                _ => {},
            }
        }
        let code = code.filter(|c| !c.is_empty()).ok_or(AuthError::NoCode)?;

        // Carrier chain first; the state parameter is the last resort and
        // covers a return leg where no carrier ever ran.
        let (verifier, stored_challenge) = match self.store.get() {
            Some(flow_state) => (flow_state.verifier, Some(flow_state.challenge)),
            None => {
                let from_state = state_param
                    .as_deref()
                    .and_then(|s| s.strip_prefix(STATE_VERIFIER_PREFIX))
                    .filter(|v| !v.is_empty());
                match from_state {
                    Some(verifier) => {
                        debug!("verifier recovered from the state parameter");
                        (verifier.to_string(), None)
                    },
                    None => return Err(AuthError::VerifierUnrecoverable),
                }
            },
        };

        // A mismatched verifier would burn the one-time code on an exchange
        // that is guaranteed to fail; check before spending it.
        if let Some(stored) = stored_challenge {
            let computed = derive_challenge(&verifier);
            if computed != stored {
                return Err(AuthError::ChallengeMismatch {
                    computed: prefix(&computed),
                    stored: prefix(&stored),
                });
            }
        }

        self.exchange(&code, &verifier, self.config.client_secret.as_ref())
            .await
    }

    /// Re-run the exchange step of a rejected flow with an extra client
    /// secret. The original code and verifier are reused — nothing is
    /// regenerated.
    pub async fn retry_exchange(
        &self,
        rejected: &RejectedExchange,
        secret: Option<&SecretString>,
    ) -> Result<CallbackOutcome, AuthError> {
        let secret = secret.or(self.config.client_secret.as_ref());
        self.exchange(&rejected.code, &rejected.verifier, secret).await
    }

    async fn exchange(
        &self,
        code: &str,
        verifier: &str,
        secret: Option<&SecretString>,
    ) -> Result<CallbackOutcome, AuthError> {
        let token_url = format!(
            "{}{TOKEN_PATH}",
            self.config.auth_domain.trim_end_matches('/')
        );

        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("code_verifier", verifier.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        // Only when one is actually available — never an empty parameter.
        if let Some(secret) = secret {
            form.push(("client_secret", secret.expose_secret().to_string()));
        }

        debug!(%token_url, "exchanging authorization code");
        let response = self
            .client
            .post(&token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(format!("token response unreadable: {e}")))?;

        let json: serde_json::Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) => {
                return Err(AuthError::Transport(format!(
                    "non-JSON response from token endpoint ({status}): {}",
                    truncate(&body, 200)
                )));
            },
        };

        if !status.is_success() {
            let error = json
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error")
                .to_string();
            let error_description = json
                .get("error_description")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            warn!(status = status.as_u16(), error = %error, "token exchange rejected");
            return Ok(CallbackOutcome::Rejected(RejectedExchange {
                status: status.as_u16(),
                error,
                error_description,
                code: code.to_string(),
                verifier: verifier.to_string(),
            }));
        }

        let tokens: TokenResponse = serde_json::from_value(json)
            .map_err(|e| AuthError::Transport(format!("malformed token response: {e}")))?;
        let instance_url = tokens
            .instance_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.config.auth_domain.trim_end_matches('/').to_string());

        let credential = Credential {
            instance_url,
            token: tokens.access_token,
        };
        self.credentials
            .save(&credential)
            .map_err(|e| AuthError::CredentialStore(e.to_string()))?;

        // The verifier is consumed exactly once; delete it everywhere so a
        // stale copy cannot be replayed.
        self.store.clear();

        info!(instance_url = %credential.instance_url, "token exchange successful");
        Ok(CallbackOutcome::Complete(credential))
    }
}

fn prefix(s: &str) -> String {
    s.chars().take(8).collect()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use {
        mockito::{Matcher, Server},
        std::path::Path,
    };

    use {
        super::*,
        crate::carriers::{ConfigDirCarrier, SessionCarrier},
    };

    const REDIRECT_URI: &str = "https://app.example.com/oauth/callback";

    fn test_config(auth_domain: &str) -> AuthConfig {
        AuthConfig {
            auth_domain: auth_domain.to_string(),
            client_id: "abc".to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
            scope: "api".to_string(),
            client_secret: None,
            state_passthrough: false,
        }
    }

    fn store_in(dir: &Path) -> FlowStore {
        FlowStore::with_carriers(vec![
            Box::new(SessionCarrier::with_path(dir.join("session.json"))),
            Box::new(ConfigDirCarrier::with_path(dir.join("pending.json"))),
        ])
    }

    fn flow_in(dir: &Path, config: AuthConfig) -> PkceFlow {
        PkceFlow::with_stores(
            config,
            store_in(dir),
            CredentialStore::with_path(dir.join("credential.json")),
        )
    }

    fn challenge_in_url(auth_url: &str) -> String {
        Url::parse(auth_url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code_challenge")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn no_secret_matcher() -> Matcher {
        // Exactly the five public-client parameters and nothing else; a
        // client_secret (empty or not) would fail the anchors.
        Matcher::Regex(
            "^grant_type=[^&]*&code=[^&]*&redirect_uri=[^&]*&code_verifier=[^&]*&client_id=[^&]*$"
                .into(),
        )
    }

    #[tokio::test]
    async fn start_then_callback_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let flow = flow_in(dir.path(), test_config(&server.url()));

        let request = flow.start().unwrap();
        let stored = store_in(dir.path()).get().unwrap();

        // The URL's challenge commits to the verifier that was persisted.
        assert_eq!(
            challenge_in_url(&request.url),
            derive_challenge(&stored.verifier)
        );
        assert_eq!(request.pkce.verifier, stored.verifier);

        let mock = server
            .mock("POST", "/services/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("redirect_uri".into(), REDIRECT_URI.into()),
                Matcher::UrlEncoded("code_verifier".into(), stored.verifier.clone()),
                Matcher::UrlEncoded("client_id".into(), "abc".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"tok","instance_url":"https://inst.example.com"}"#)
            .create_async()
            .await;

        let callback = format!("{REDIRECT_URI}?code=the-code&state={}", request.state);
        let outcome = flow.handle_callback(&callback).await.unwrap();
        mock.assert_async().await;

        match outcome {
            CallbackOutcome::Complete(credential) => {
                assert_eq!(credential.instance_url, "https://inst.example.com");
                assert_eq!(credential.token, "tok");
            },
            CallbackOutcome::Rejected(rejected) => {
                panic!("unexpected rejection: {}", rejected.error)
            },
        }

        // Credential persisted, verifier invalidated.
        let saved = CredentialStore::with_path(dir.path().join("credential.json"))
            .load()
            .unwrap();
        assert_eq!(saved.token, "tok");
        assert!(store_in(dir.path()).get().is_none());
    }

    #[tokio::test]
    async fn corrupted_verifier_fails_before_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/oauth2/token")
            .expect(0)
            .create_async()
            .await;

        let flow = flow_in(dir.path(), test_config(&server.url()));
        let request = flow.start().unwrap();

        // Single-character mutation of the persisted verifier.
        let probe = store_in(dir.path());
        let mut state = probe.get().unwrap();
        let head = if state.verifier.starts_with('A') { "B" } else { "A" };
        state.verifier.replace_range(0..1, head);
        probe.put(&state);

        let callback = format!("{REDIRECT_URI}?code=c&state={}", request.state);
        let err = flow.handle_callback(&callback).await.unwrap_err();
        assert!(matches!(err, AuthError::ChallengeMismatch { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_code_makes_no_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/oauth2/token")
            .expect(0)
            .create_async()
            .await;

        let flow = flow_in(dir.path(), test_config(&server.url()));
        flow.start().unwrap();

        let err = flow
            .handle_callback(&format!("{REDIRECT_URI}?state=whatever"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoCode));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_carriers_without_state_is_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::new_async().await;
        let flow = flow_in(dir.path(), test_config(&server.url()));

        let err = flow
            .handle_callback(&format!("{REDIRECT_URI}?code=c&state=random"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::VerifierUnrecoverable));
    }

    #[tokio::test]
    async fn state_param_recovers_verifier_when_carriers_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let verifier = crate::pkce::generate_verifier();

        let mock = server
            .mock("POST", "/services/oauth2/token")
            .match_body(Matcher::UrlEncoded("code_verifier".into(), verifier.clone()))
            .with_status(200)
            .with_body(r#"{"access_token":"tok","instance_url":"https://inst.example.com"}"#)
            .create_async()
            .await;

        let flow = flow_in(dir.path(), test_config(&server.url()));
        let callback = format!("{REDIRECT_URI}?code=c&state=pkce:{verifier}");
        let outcome = flow.handle_callback(&callback).await.unwrap();
        mock.assert_async().await;
        assert!(matches!(outcome, CallbackOutcome::Complete(_)));
    }

    #[tokio::test]
    async fn rejection_surfaces_provider_error_and_leaves_credentials_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/services/oauth2/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"expired"}"#)
            .create_async()
            .await;

        let flow = flow_in(dir.path(), test_config(&server.url()));
        let request = flow.start().unwrap();
        let callback = format!("{REDIRECT_URI}?code=c&state={}", request.state);
        let outcome = flow.handle_callback(&callback).await.unwrap();

        match outcome {
            CallbackOutcome::Rejected(rejected) => {
                assert_eq!(rejected.status, 400);
                assert_eq!(rejected.error, "invalid_grant");
                assert_eq!(rejected.error_description.as_deref(), Some("expired"));
            },
            CallbackOutcome::Complete(_) => panic!("exchange should have been rejected"),
        }

        let credentials = CredentialStore::with_path(dir.path().join("credential.json"));
        assert!(credentials.load().is_none());
        // Rejection does not invalidate the flow state; retries may still
        // need it.
        assert!(store_in(dir.path()).get().is_some());
    }

    #[tokio::test]
    async fn no_secret_parameter_unless_one_is_supplied() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/oauth2/token")
            .match_body(no_secret_matcher())
            .with_status(200)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;

        let flow = flow_in(dir.path(), test_config(&server.url()));
        let request = flow.start().unwrap();
        let callback = format!("{REDIRECT_URI}?code=c&state={}", request.state);
        flow.handle_callback(&callback).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retry_reuses_code_and_adds_secret() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/services/oauth2/token")
            .match_body(no_secret_matcher())
            .with_status(400)
            .with_body(r#"{"error":"invalid_client","error_description":"secret required"}"#)
            .create_async()
            .await;

        let flow = flow_in(dir.path(), test_config(&server.url()));
        let request = flow.start().unwrap();
        let verifier = request.pkce.verifier.clone();
        let callback = format!("{REDIRECT_URI}?code=one-time&state={}", request.state);
        let outcome = flow.handle_callback(&callback).await.unwrap();
        let CallbackOutcome::Rejected(rejected) = outcome else {
            panic!("expected rejection");
        };

        let retry_mock = server
            .mock("POST", "/services/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("code".into(), "one-time".into()),
                Matcher::UrlEncoded("code_verifier".into(), verifier),
                Matcher::UrlEncoded("client_secret".into(), "s3cret".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"tok2","instance_url":"https://inst.example.com"}"#)
            .create_async()
            .await;

        let secret = SecretString::new("s3cret".to_string());
        let outcome = flow.retry_exchange(&rejected, Some(&secret)).await.unwrap();
        retry_mock.assert_async().await;

        match outcome {
            CallbackOutcome::Complete(credential) => assert_eq!(credential.token, "tok2"),
            CallbackOutcome::Rejected(rejected) => {
                panic!("retry should have succeeded: {}", rejected.error)
            },
        }
    }

    #[tokio::test]
    async fn non_json_body_is_a_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/services/oauth2/token")
            .with_status(502)
            .with_body("<html>Bad Gateway</html>")
            .create_async()
            .await;

        let flow = flow_in(dir.path(), test_config(&server.url()));
        let request = flow.start().unwrap();
        let callback = format!("{REDIRECT_URI}?code=c&state={}", request.state);
        let err = flow.handle_callback(&callback).await.unwrap_err();
        match err {
            AuthError::Transport(detail) => {
                assert!(detail.contains("502"));
                assert!(detail.contains("Bad Gateway"));
            },
            other => panic!("expected transport error, got {other}"),
        }
    }

    #[tokio::test]
    async fn missing_instance_url_falls_back_to_auth_domain() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/services/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;

        let flow = flow_in(dir.path(), test_config(&server.url()));
        let request = flow.start().unwrap();
        let callback = format!("{REDIRECT_URI}?code=c&state={}", request.state);
        let outcome = flow.handle_callback(&callback).await.unwrap();
        let CallbackOutcome::Complete(credential) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(credential.instance_url, server.url().trim_end_matches('/'));
    }

    #[test]
    fn misconfigured_start_leaves_no_flow_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config("https://x.my.example.com");
        config.client_id = String::new();

        let flow = flow_in(dir.path(), config);
        let err = flow.start().unwrap_err();
        assert!(matches!(err, AuthError::Config("client_id")));
        assert!(store_in(dir.path()).get().is_none());
    }

    #[test]
    fn start_fails_closed_when_no_carrier_accepts_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let broken = FlowStore::with_carriers(vec![Box::new(SessionCarrier::with_path(
            dir.path().join("missing/session.json"),
        ))]);
        let flow = PkceFlow::with_stores(
            test_config("https://x.my.example.com"),
            broken,
            CredentialStore::with_path(dir.path().join("credential.json")),
        );
        let err = flow.start().unwrap_err();
        assert!(matches!(err, AuthError::FlowStateUnavailable));
    }

    #[test]
    fn passthrough_embeds_the_verifier_in_state() {
        let dir = tempfile::tempdir().unwrap();
        let broken = FlowStore::with_carriers(vec![Box::new(SessionCarrier::with_path(
            dir.path().join("missing/session.json"),
        ))]);
        let mut config = test_config("https://x.my.example.com");
        config.state_passthrough = true;
        let flow = PkceFlow::with_stores(
            config,
            broken,
            CredentialStore::with_path(dir.path().join("credential.json")),
        );

        let request = flow.start().unwrap();
        assert_eq!(
            request.state,
            format!("{STATE_VERIFIER_PREFIX}{}", request.pkce.verifier)
        );
    }
}
