//! Shared-secret bearer tokens for the two audiences of the gateway.
//!
//! External callers present the API token; relay devices present the device
//! token. Presented tokens are compared by SHA-256 digest.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;
const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Caller,
    Device,
}

#[derive(Clone)]
pub struct AccessTokens {
    api_token: String,
    device_token: String,
}

impl AccessTokens {
    pub fn new(api_token: impl Into<String>, device_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            device_token: device_token.into(),
        }
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    /// Check an `Authorization` header value against the audience's token.
    pub fn verify(&self, audience: Audience, authorization: Option<&str>) -> bool {
        let expected = match audience {
            Audience::Caller => &self.api_token,
            Audience::Device => &self.device_token,
        };
        authorization
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .is_some_and(|presented| digest_eq(presented, expected))
    }
}

impl std::fmt::Debug for AccessTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokens")
            .field("api_token", &"<redacted>")
            .field("device_token", &"<redacted>")
            .finish()
    }
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn digest_eq(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audiences_use_their_own_token() {
        let tokens = AccessTokens::new("api-secret", "device-secret");
        assert!(tokens.verify(Audience::Caller, Some("Bearer api-secret")));
        assert!(tokens.verify(Audience::Device, Some("Bearer device-secret")));
        assert!(!tokens.verify(Audience::Caller, Some("Bearer device-secret")));
        assert!(!tokens.verify(Audience::Device, Some("Bearer api-secret")));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let tokens = AccessTokens::new("api-secret", "device-secret");
        assert!(!tokens.verify(Audience::Caller, None));
        assert!(!tokens.verify(Audience::Caller, Some("api-secret")));
        assert!(!tokens.verify(Audience::Caller, Some("bearer api-secret")));
        assert!(!tokens.verify(Audience::Caller, Some("Bearer api-secret ")));
    }

    #[test]
    fn generated_tokens_are_distinct_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let tokens = AccessTokens::new("api-secret", "device-secret");
        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("api-secret"));
        assert!(!rendered.contains("device-secret"));
    }
}
