use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::PrincipalRef;
use crate::errors::{AuthorityError, Result};

/// A registered OAuth client.
///
/// `principal` is `None` for first-party clients owned by the system itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub principal: Option<PrincipalRef>,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub redirect_uri: String,
    pub is_personal_access: bool,
    pub is_password_grant: bool,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn is_active(&self) -> bool {
        !self.revoked
    }

    pub fn is_first_party(&self) -> bool {
        self.principal.is_none()
    }

    pub fn belongs_to(&self, principal: &PrincipalRef) -> bool {
        self.principal.as_ref() == Some(principal)
    }
}

/// Attributes for a client about to be stored.
#[derive(Debug, Clone, Default)]
pub struct NewClient {
    pub principal: Option<PrincipalRef>,
    pub name: String,
    pub redirect_uri: String,
    pub personal_access: bool,
    pub password_grant: bool,
}

impl NewClient {
    pub fn new(
        principal: Option<PrincipalRef>,
        name: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            principal,
            name: name.into(),
            redirect_uri: redirect_uri.into(),
            ..Default::default()
        }
    }

    pub fn personal_access(mut self) -> Self {
        self.personal_access = true;
        self
    }

    pub fn password_grant(mut self) -> Self {
        self.password_grant = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_details(&self.name, &self.redirect_uri)
    }
}

/// Name and redirect URI are required on both create and update.
pub fn validate_details(name: &str, redirect_uri: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AuthorityError::validation("client name must not be empty"));
    }
    if redirect_uri.trim().is_empty() {
        return Err(AuthorityError::validation(
            "client redirect_uri must not be empty",
        ));
    }
    Ok(())
}
