//! # Token validation
//!
//! `POST /users/validate` is answered by a [`TokenValidator`]. The only implementation shipped is
//! [`StubTokenValidator`], which accepts every token. It performs **no authentication** and
//! must not be mistaken for it; a real validator plugs in behind the same trait.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenVerdict {
    pub valid: bool,
}

pub trait TokenValidator: Send + Sync + 'static {
    fn validate(&self, request: &TokenRequest) -> TokenVerdict;
}

/// Fixed-response stand-in: every token is reported valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubTokenValidator;

impl TokenValidator for StubTokenValidator {
    fn validate(&self, request: &TokenRequest) -> TokenVerdict {
        debug!(token_len = request.token.len(), "Stub validator accepting token");
        TokenVerdict { valid: true }
    }
}
