//! Polymorphic credential ownership.
//!
//! A credential belongs to a `(kind, id)` pair rather than to a row in one
//! fixed user table. Two references are equal only when both halves match;
//! principals of different kinds may share an id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{AuthorityError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPrincipalRef")]
pub struct PrincipalRef {
    kind: String,
    id: String,
}

impl PrincipalRef {
    /// Trims both halves; either one empty is a validation error.
    pub fn new(kind: impl Into<String>, id: impl ToString) -> Result<Self> {
        let kind: String = kind.into();
        let id = id.to_string();
        let (kind, id) = (kind.trim(), id.trim());
        if kind.is_empty() || id.is_empty() {
            return Err(AuthorityError::validation(format!(
                "principal '{}:{}' has an empty kind or id",
                kind, id
            )));
        }
        Ok(Self {
            kind: kind.to_string(),
            id: id.to_string(),
        })
    }

    pub fn of<P: Principal + ?Sized>(principal: &P) -> Result<Self> {
        Self::new(P::KIND, principal.principal_key())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Deserialize)]
struct RawPrincipalRef {
    kind: String,
    id: String,
}

impl TryFrom<RawPrincipalRef> for PrincipalRef {
    type Error = AuthorityError;

    fn try_from(raw: RawPrincipalRef) -> Result<Self> {
        Self::new(raw.kind, raw.id)
    }
}

impl fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Parses the `kind:id` form. The id may itself contain `:`.
impl FromStr for PrincipalRef {
    type Err = AuthorityError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s.split_once(':').ok_or_else(|| {
            AuthorityError::validation(format!("principal '{}' must have the form kind:id", s))
        })?;
        Self::new(kind, id)
    }
}

/// Domain types that can own clients and tokens.
pub trait Principal {
    /// Stable discriminator persisted in `owner_kind`.
    const KIND: &'static str;

    fn principal_key(&self) -> String;

    fn principal_ref(&self) -> Result<PrincipalRef> {
        PrincipalRef::new(Self::KIND, self.principal_key())
    }
}
