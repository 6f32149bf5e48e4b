use url::Url;

use crate::error::AuthError;

pub const AUTHORIZE_PATH: &str = "/services/oauth2/authorize";
pub const TOKEN_PATH: &str = "/services/oauth2/token";

/// Compose the provider's authorize endpoint with a canonical query string.
///
/// Every parameter goes through the URL serializer individually — nothing is
/// concatenated into a pre-built query. An empty `auth_domain` or `client_id`
/// is a configuration error, never silently defaulted.
pub fn build_authorize_url(
    auth_domain: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    challenge: &str,
    state: &str,
) -> Result<Url, AuthError> {
    if auth_domain.trim().is_empty() {
        return Err(AuthError::Config("auth_domain"));
    }
    if client_id.trim().is_empty() {
        return Err(AuthError::Config("client_id"));
    }

    let base = auth_domain.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}{AUTHORIZE_PATH}"))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", scope)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn contains_all_required_params() {
        let url = build_authorize_url(
            "https://x.my.example.com",
            "abc",
            "https://app.example.com/oauth/callback",
            "api",
            "chal",
            "st",
        )
        .unwrap();

        assert!(url.as_str().starts_with(
            "https://x.my.example.com/services/oauth2/authorize?"
        ));
        assert_eq!(query_value(&url, "response_type").unwrap(), "code");
        assert_eq!(query_value(&url, "client_id").unwrap(), "abc");
        assert_eq!(
            query_value(&url, "redirect_uri").unwrap(),
            "https://app.example.com/oauth/callback"
        );
        assert_eq!(query_value(&url, "scope").unwrap(), "api");
        assert_eq!(query_value(&url, "code_challenge").unwrap(), "chal");
        assert_eq!(query_value(&url, "code_challenge_method").unwrap(), "S256");
        assert_eq!(query_value(&url, "state").unwrap(), "st");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let url = build_authorize_url(
            "https://x.my.example.com/",
            "abc",
            "https://app/cb",
            "api",
            "c",
            "s",
        )
        .unwrap();
        assert!(url.path().starts_with("/services/oauth2/authorize"));
        assert!(!url.as_str().contains("com//services"));
    }

    #[test]
    fn params_are_escaped_individually() {
        let url = build_authorize_url(
            "https://x.my.example.com",
            "abc",
            "https://app/cb",
            "api web",
            "c",
            "pkce:ver&fake=1",
        )
        .unwrap();
        // An injected parameter must not survive as its own query pair.
        assert!(query_value(&url, "fake").is_none());
        assert_eq!(query_value(&url, "state").unwrap(), "pkce:ver&fake=1");
        assert_eq!(query_value(&url, "scope").unwrap(), "api web");
    }

    #[test]
    fn missing_client_id_is_a_config_error() {
        let err = build_authorize_url("https://x", "", "https://app/cb", "api", "c", "s")
            .unwrap_err();
        assert!(matches!(err, AuthError::Config("client_id")));
    }

    #[test]
    fn missing_domain_is_a_config_error() {
        let err = build_authorize_url("  ", "abc", "https://app/cb", "api", "c", "s")
            .unwrap_err();
        assert!(matches!(err, AuthError::Config("auth_domain")));
    }
}
