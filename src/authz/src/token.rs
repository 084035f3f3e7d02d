//! Bearer token verification

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;

use crate::error::{AccessError, Result};
use crate::types::UserId;

/// Verified token claims
pub type Claims = serde_json::Map<String, Value>;

/// Verifies a bearer credential and returns its claims
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims>;
}

/// HMAC-SHA256 JWT verifier
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn hs256(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Sign claims with the same secret, for tooling and tests
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AccessError::Authentication(format!("JWT encoding error: {}", e)))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AccessError::Authentication(e.to_string()))
    }
}

/// Token part of an `Authorization: Bearer <token>` header
///
/// The scheme name is case-insensitive.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim_start().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// User ID stored under `key`, as a number or a numeric string
pub fn user_id_from_claims(claims: &Claims, key: &str) -> Option<UserId> {
    let id = match claims.get(key)? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (id > 0).then_some(id)
}
