use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::PrincipalRef;
use crate::errors::{AuthorityError, Result};
use crate::secret;

/// An issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub principal: PrincipalRef,
    pub client_id: Uuid,
    pub name: Option<String>,
    pub scopes: BTreeSet<String>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Active means neither revoked nor expired. Client state is not visible here.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    pub fn can(&self, scope: &str) -> bool {
        self.scopes.contains("*") || self.scopes.contains(scope)
    }
}

/// Attributes supplied by the grant flow when a token is issued.
///
/// `principal` and `client_id` are optional so that an incomplete grant is
/// reported as a validation failure instead of being unrepresentable.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub id: String,
    pub principal: Option<PrincipalRef>,
    pub client_id: Option<Uuid>,
    pub name: Option<String>,
    pub scopes: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
}

impl NewToken {
    pub fn new(principal: PrincipalRef, client_id: Uuid, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: secret::generate_token_id(),
            principal: Some(principal),
            client_id: Some(client_id),
            name: None,
            scopes: BTreeSet::new(),
            expires_at,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the attributes that do not need the store. Returns the
    /// required principal and client id on success.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(PrincipalRef, Uuid)> {
        if self.id.trim().is_empty() {
            return Err(AuthorityError::validation("token id must not be empty"));
        }
        let principal = self
            .principal
            .clone()
            .ok_or_else(|| AuthorityError::validation("token principal is required"))?;
        let client_id = self
            .client_id
            .ok_or_else(|| AuthorityError::validation("token client_id is required"))?;
        if self.stored_expires_at() <= now {
            return Err(AuthorityError::validation(format!(
                "token expires_at {} is not in the future",
                self.expires_at
            )));
        }
        Ok((principal, client_id))
    }

    /// Expiry at the microsecond precision the database keeps.
    pub(crate) fn stored_expires_at(&self) -> DateTime<Utc> {
        self.expires_at.trunc_subsecs(6)
    }

    pub(crate) fn into_token(
        self,
        principal: PrincipalRef,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> Token {
        let expires_at = self.stored_expires_at();
        Token {
            id: self.id,
            principal,
            client_id,
            name: self.name,
            scopes: self.scopes,
            revoked: false,
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }
}
