//! Persistence boundary for clients and tokens.
//!
//! Two backends implement both traits over one shared state so that the
//! client revocation cascade can run as a single transaction:
//! `PgStore` (PostgreSQL, production) and `MemoryStore` (embedded, tests).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{Client, NewClient, NewToken, PrincipalRef, Token};

#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Lookup by id. A miss is `Ok(None)`, never an error.
    async fn find(&self, id: Uuid) -> Result<Option<Client>>;

    async fn find_active(&self, id: Uuid) -> Result<Option<Client>> {
        Ok(self.find(id).await?.filter(Client::is_active))
    }

    /// Matches the client id and both halves of the principal.
    async fn find_for_principal(
        &self,
        id: Uuid,
        principal: &PrincipalRef,
    ) -> Result<Option<Client>>;

    /// Ordered by name, then id.
    async fn list_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Client>>;

    async fn list_active_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Client>> {
        let clients = self.list_for_principal(principal).await?;
        Ok(clients.into_iter().filter(Client::is_active).collect())
    }

    /// Stores a client with a freshly generated secret.
    async fn create(&self, client: NewClient) -> Result<Client>;

    /// Changes name and redirect URI only.
    async fn update(&self, client: &Client, name: &str, redirect_uri: &str) -> Result<Client>;

    /// Replaces the secret. The previous secret stops working immediately.
    async fn regenerate_secret(&self, client: &Client) -> Result<Client>;

    /// Revokes every token of the client, then the client, atomically.
    /// Revoking twice is a no-op.
    async fn revoke(&self, client: &Client) -> Result<()>;

    /// Absent clients count as revoked.
    async fn is_revoked(&self, id: Uuid) -> Result<bool> {
        Ok(self.find(id).await?.map_or(true, |c| c.revoked))
    }

    /// Most recently created personal access client, revoked or not.
    async fn latest_personal_access_client(&self) -> Result<Option<Client>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fails with `Validation` on a non-future expiry, a missing principal or
    /// client id, or a client that is absent or revoked.
    async fn create(&self, token: NewToken) -> Result<Token>;

    async fn find(&self, id: &str) -> Result<Option<Token>>;

    async fn find_for_principal(&self, id: &str, principal: &PrincipalRef)
        -> Result<Option<Token>>;

    /// Newest first.
    async fn list_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Token>>;

    /// Unrevoked, unexpired token of the principal under the client with the
    /// latest expiry; ties go to the most recently created.
    async fn find_valid_token(
        &self,
        principal: &PrincipalRef,
        client_id: Uuid,
    ) -> Result<Option<Token>>;

    /// Idempotent; absent ids are ignored.
    async fn revoke(&self, id: &str) -> Result<()>;

    /// Absent tokens count as revoked.
    async fn is_revoked(&self, id: &str) -> Result<bool> {
        Ok(self.find(id).await?.map_or(true, |t| t.revoked))
    }
}
