//! Identity validation for incoming connections.
//!
//! The gateway never issues tokens; it validates externally-issued ones
//! through the [`IdentityProvider`] seam and binds the resulting principal
//! to the connection. Two implementations are provided: an HMAC-SHA256
//! validator for deployments whose identity service shares a secret with
//! the gateway, and a static shared-secret validator for tests and dev.
//!
//! ## HMAC token format
//!
//! - 16 bytes: principal id
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the first 24 bytes
//!
//! Total: 56 bytes.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 56;

/// Token validation failed; the connection is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidToken(String),
    Expired,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidToken(reason) => write!(f, "invalid token: {reason}"),
            Self::Expired => write!(f, "token expired"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Validates an identity token and resolves the principal behind it.
///
/// Implementations are expected to be fast and local (signature checks,
/// key lookups); the gateway calls them once per connection.
pub trait IdentityProvider: Send + Sync {
    fn validate(&self, token: &[u8]) -> Result<Uuid, AuthError>;
}

/// Authentication configuration for [`HmacTokenValidator`].
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret shared with the token issuer.
    pub secret: Vec<u8>,
    /// Maximum accepted token age.
    pub token_expiry: Duration,
}

impl AuthConfig {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// HMAC-SHA256 token validator.
#[derive(Clone)]
pub struct HmacTokenValidator {
    config: AuthConfig,
}

impl HmacTokenValidator {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Mints a token for `principal`. The gateway itself never calls
    /// this; it exists for issuer-side tooling and tests.
    pub fn create_token(&self, principal: Uuid) -> Vec<u8> {
        let timestamp = unix_millis();

        let mut data = Vec::with_capacity(TOKEN_LEN);
        data.extend_from_slice(principal.as_bytes());
        data.extend_from_slice(&timestamp.to_be_bytes());

        let signature = self.sign(&data);
        data.extend_from_slice(&signature);
        data
    }

    fn sign(&self, data: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

impl IdentityProvider for HmacTokenValidator {
    fn validate(&self, token: &[u8]) -> Result<Uuid, AuthError> {
        if token.len() != TOKEN_LEN {
            return Err(AuthError::InvalidToken("wrong token length".into()));
        }

        let principal: [u8; 16] = token[0..16].try_into().unwrap();
        let timestamp_bytes: [u8; 8] = token[16..24].try_into().unwrap();
        let signature: [u8; 32] = token[24..TOKEN_LEN].try_into().unwrap();

        if signature != self.sign(&token[0..24]) {
            return Err(AuthError::InvalidToken("bad signature".into()));
        }

        let timestamp = u64::from_be_bytes(timestamp_bytes);
        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if unix_millis() > timestamp.saturating_add(expiry_millis) {
            return Err(AuthError::Expired);
        }

        Ok(Uuid::from_bytes(principal))
    }
}

/// Shared-secret validator: any token equal to the secret is accepted and
/// bound to a fresh principal. For tests and development only.
#[derive(Clone)]
pub struct StaticTokenValidator {
    secret: Vec<u8>,
}

impl StaticTokenValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

impl IdentityProvider for StaticTokenValidator {
    fn validate(&self, token: &[u8]) -> Result<Uuid, AuthError> {
        if token == self.secret.as_slice() {
            Ok(Uuid::new_v4())
        } else {
            Err(AuthError::InvalidToken("secret mismatch".into()))
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
