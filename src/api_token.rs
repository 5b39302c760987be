//! Short-lived API tokens for first-party callers.
//!
//! A signed HS256 JWT naming the principal (kind and id), bound to the
//! caller's CSRF token and expiring after the session lifetime. Carrying the
//! token (cookie, header) is up to the caller.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::errors::{AuthorityError, Result};
use crate::models::PrincipalRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTokenClaims {
    pub sub: String,
    pub sub_kind: String,
    pub csrf: String,
    pub expiry: i64,
}

impl ApiTokenClaims {
    pub fn principal(&self) -> Result<PrincipalRef> {
        PrincipalRef::new(self.sub_kind.clone(), &self.sub)
    }
}

#[derive(Debug, Clone)]
pub struct ApiToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

pub struct ApiTokenFactory {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl ApiTokenFactory {
    pub fn new(key: &[u8], lifetime: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        if key.is_empty() {
            return Err(AuthorityError::validation("api token key must not be empty"));
        }
        if lifetime <= Duration::zero() {
            return Err(AuthorityError::validation(
                "api token lifetime must be positive",
            ));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            lifetime,
            clock,
        })
    }

    pub fn make(&self, principal: &PrincipalRef, csrf_token: &str) -> Result<ApiToken> {
        let expires_at = self.clock.now() + self.lifetime;
        let claims = ApiTokenClaims {
            sub: principal.id().to_string(),
            sub_kind: principal.kind().to_string(),
            csrf: csrf_token.to_string(),
            expiry: expires_at.timestamp(),
        };

        let value = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthorityError::validation(format!("failed to sign api token: {}", e)))?;

        Ok(ApiToken { value, expires_at })
    }

    /// Checks the signature, the CSRF binding and the `expiry` claim against
    /// the injected clock.
    pub fn verify(&self, value: &str, csrf_token: &str) -> Result<ApiTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is a custom claim checked below against our clock, not `exp`
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let claims = decode::<ApiTokenClaims>(value, &self.decoding, &validation)
            .map_err(|e| AuthorityError::validation(format!("invalid api token: {}", e)))?
            .claims;

        if claims.csrf != csrf_token {
            return Err(AuthorityError::validation("api token csrf mismatch"));
        }

        let expires_at = Utc
            .timestamp_opt(claims.expiry, 0)
            .single()
            .ok_or_else(|| AuthorityError::validation("api token expiry out of range"))?;
        if expires_at <= self.clock.now() {
            return Err(AuthorityError::validation("api token expired"));
        }

        Ok(claims)
    }
}
