use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::RngCore,
    sha2::{Digest, Sha256},
};

use crate::types::PkceChallenge;

/// Generate a fresh code verifier: 256 bits from the OS CSPRNG, base64url
/// without padding. Never reused across flow attempts.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derive the S256 code challenge for a verifier. Pure and deterministic:
/// the same verifier always yields the same challenge.
pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a PKCE S256 verifier/challenge pair.
pub fn generate_pkce() -> PkceChallenge {
    let verifier = generate_verifier();
    let challenge = derive_challenge(&verifier);
    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Random `state` parameter for flows that do not embed the verifier.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
