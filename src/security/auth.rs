//! Token validation for inbound connections
//!
//! Tokens are HS256 JWTs signed with a shared secret. For local development
//! the fixed `demo-token` credential can be enabled in configuration.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The development credential accepted when `allow_demo_token` is set
const DEMO_TOKEN: &str = "demo-token";

/// Validated identity of a connected client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user identifier (JWT `sub`)
    pub user_id: String,

    /// Human-readable name, when the token carries one
    pub display_name: Option<String>,
}

/// Claims carried by a relay token
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    exp: i64,
    iat: i64,
}

/// Validates connection tokens
#[derive(Debug, Clone)]
pub struct TokenValidator {
    secret: Option<String>,
    allow_demo: bool,
}

impl TokenValidator {
    #[must_use]
    pub fn new(secret: Option<String>, allow_demo: bool) -> Self {
        Self { secret, allow_demo }
    }

    /// Validate a token and return the identity it asserts
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` if the token is expired, malformed, signed with
    /// the wrong secret, or no validation mechanism is configured
    pub fn validate(&self, token: &str) -> Result<Identity> {
        if self.allow_demo && constant_time_eq(token.as_bytes(), DEMO_TOKEN.as_bytes()) {
            return Ok(Identity {
                user_id: "demo-user".to_string(),
                display_name: Some("Demo User".to_string()),
            });
        }

        let Some(secret) = &self.secret else {
            return Err(Error::Auth("no token secret configured".to_string()));
        };

        let mut validation = Validation::default();
        validation.validate_exp = true;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| Error::Auth(format!("invalid token: {e}")))?;

        Ok(Identity {
            user_id: data.claims.sub,
            display_name: data.claims.name,
        })
    }
}

/// Mint an HS256 token for a user (CLI helper)
///
/// # Errors
///
/// Returns error if signing fails
pub fn mint_token(
    secret: &str,
    user_id: &str,
    display_name: Option<&str>,
    expiry_hours: i64,
) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        name: display_name.map(ToString::to_string),
        exp: (now + Duration::hours(expiry_hours)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Auth(format!("failed to sign token: {e}")))
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
