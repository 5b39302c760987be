//! Client and token lifecycle across both stores.
//!
//! The stores each see one table; the authority owns the rules that span
//! them: the revocation cascade on client deletion, personal access client
//! resolution, and token usability (token state plus client state).

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{AuthorityError, Result};
use crate::models::{Client, NewClient, NewToken, PrincipalRef, Token};
use crate::store::{ClientStore, TokenStore};

#[derive(Clone)]
pub struct CredentialAuthority {
    clients: Arc<dyn ClientStore>,
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    personal_access_client_id: Option<Uuid>,
}

impl CredentialAuthority {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            clients,
            tokens,
            clock,
            personal_access_client_id: None,
        }
    }

    /// Pins the client returned by `resolve_personal_access_client`.
    pub fn with_personal_access_client(mut self, id: Option<Uuid>) -> Self {
        self.personal_access_client_id = id;
        self
    }

    pub fn client_store(&self) -> &dyn ClientStore {
        self.clients.as_ref()
    }

    pub fn token_store(&self) -> &dyn TokenStore {
        self.tokens.as_ref()
    }

    pub async fn issue_client(&self, new: NewClient) -> Result<Client> {
        let client = self.clients.create(new).await?;
        tracing::info!(
            client_id = %client.id,
            owner = ?client.principal.as_ref().map(ToString::to_string),
            personal_access = client.is_personal_access,
            password_grant = client.is_password_grant,
            "client created"
        );
        Ok(client)
    }

    pub async fn issue_personal_access_client(
        &self,
        principal: Option<PrincipalRef>,
        name: &str,
        redirect_uri: &str,
    ) -> Result<Client> {
        self.issue_client(NewClient::new(principal, name, redirect_uri).personal_access())
            .await
    }

    pub async fn issue_password_grant_client(
        &self,
        principal: Option<PrincipalRef>,
        name: &str,
        redirect_uri: &str,
    ) -> Result<Client> {
        self.issue_client(NewClient::new(principal, name, redirect_uri).password_grant())
            .await
    }

    pub async fn regenerate_secret(&self, client: &Client) -> Result<Client> {
        let client = self.clients.regenerate_secret(client).await?;
        tracing::info!(client_id = %client.id, "client secret regenerated");
        Ok(client)
    }

    /// Logical delete: revokes the client's tokens and then the client in one
    /// transaction. Rows are kept. Deleting twice is a no-op.
    pub async fn delete_client(&self, client: &Client) -> Result<()> {
        self.clients.revoke(client).await?;
        tracing::info!(client_id = %client.id, "client revoked");
        Ok(())
    }

    /// The configured personal access client, or else the newest one.
    pub async fn resolve_personal_access_client(&self) -> Result<Client> {
        if let Some(id) = self.personal_access_client_id {
            return self.clients.find(id).await?.ok_or_else(|| {
                AuthorityError::not_found(format!("configured personal access client {}", id))
            });
        }

        self.clients
            .latest_personal_access_client()
            .await?
            .ok_or_else(|| AuthorityError::not_found("personal access client"))
    }

    /// Entry point for the grant flow once a grant has succeeded.
    pub async fn issue_token(&self, new: NewToken) -> Result<Token> {
        match self.tokens.create(new).await {
            Ok(token) => {
                tracing::info!(
                    token_id = %token.id,
                    client_id = %token.client_id,
                    owner = %token.principal,
                    expires_at = %token.expires_at,
                    "token issued"
                );
                Ok(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token issue rejected");
                Err(e)
            }
        }
    }

    pub async fn revoke_token(&self, id: &str) -> Result<()> {
        self.tokens.revoke(id).await?;
        tracing::info!(token_id = %id, "token revoked");
        Ok(())
    }

    pub async fn find_valid_token(
        &self,
        principal: &PrincipalRef,
        client: &Client,
    ) -> Result<Option<Token>> {
        if client.revoked {
            return Ok(None);
        }
        self.tokens.find_valid_token(principal, client.id).await
    }

    /// A token is usable when it is present, unrevoked and unexpired, and its
    /// client is present and unrevoked. The token store cannot see the
    /// client, so both are checked here.
    pub async fn is_token_usable(&self, token_id: &str) -> Result<bool> {
        let Some(token) = self.tokens.find(token_id).await? else {
            tracing::debug!(token_id = %token_id, "token unusable: not found");
            return Ok(false);
        };

        if !token.is_active(self.clock.now()) {
            tracing::debug!(token_id = %token_id, revoked = token.revoked, "token unusable");
            return Ok(false);
        }

        if self.clients.is_revoked(token.client_id).await? {
            tracing::debug!(
                token_id = %token_id,
                client_id = %token.client_id,
                "token unusable: client revoked"
            );
            return Ok(false);
        }

        Ok(true)
    }
}
