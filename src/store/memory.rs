use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ClientStore, TokenStore};
use crate::clock::{Clock, SystemClock};
use crate::errors::{AuthorityError, Result};
use crate::models::client::validate_details;
use crate::models::{Client, NewClient, NewToken, PrincipalRef, Token};
use crate::secret;

/// Row plus insertion order, used to break created_at ties.
#[derive(Clone)]
struct Entry<T> {
    seq: u64,
    row: T,
}

#[derive(Default)]
struct State {
    seq: u64,
    clients: HashMap<Uuid, Entry<Client>>,
    tokens: HashMap<String, Entry<Token>>,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// In-process store. Clients and tokens sit behind one lock, so a
/// revocation cascade is never observed half-applied.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            clock,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn sort_by_name(clients: &mut [Client]) {
    clients.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn find(&self, id: Uuid) -> Result<Option<Client>> {
        let state = self.state.read().await;
        Ok(state.clients.get(&id).map(|e| e.row.clone()))
    }

    async fn find_for_principal(
        &self,
        id: Uuid,
        principal: &PrincipalRef,
    ) -> Result<Option<Client>> {
        let state = self.state.read().await;
        Ok(state
            .clients
            .get(&id)
            .filter(|e| e.row.belongs_to(principal))
            .map(|e| e.row.clone()))
    }

    async fn list_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Client>> {
        let state = self.state.read().await;
        let mut clients: Vec<Client> = state
            .clients
            .values()
            .filter(|e| e.row.belongs_to(principal))
            .map(|e| e.row.clone())
            .collect();
        sort_by_name(&mut clients);
        Ok(clients)
    }

    async fn create(&self, new: NewClient) -> Result<Client> {
        new.validate()?;
        let now = self.clock.now();
        let client = Client {
            id: Uuid::new_v4(),
            principal: new.principal,
            name: new.name,
            secret: secret::generate_client_secret(),
            redirect_uri: new.redirect_uri,
            is_personal_access: new.personal_access,
            is_password_grant: new.password_grant,
            revoked: false,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        let seq = state.next_seq();
        state.clients.insert(
            client.id,
            Entry {
                seq,
                row: client.clone(),
            },
        );
        Ok(client)
    }

    async fn update(&self, client: &Client, name: &str, redirect_uri: &str) -> Result<Client> {
        validate_details(name, redirect_uri)?;
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let entry = state
            .clients
            .get_mut(&client.id)
            .ok_or_else(|| AuthorityError::not_found(format!("client {}", client.id)))?;
        entry.row.name = name.to_string();
        entry.row.redirect_uri = redirect_uri.to_string();
        entry.row.updated_at = now;
        Ok(entry.row.clone())
    }

    async fn regenerate_secret(&self, client: &Client) -> Result<Client> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let entry = state
            .clients
            .get_mut(&client.id)
            .ok_or_else(|| AuthorityError::not_found(format!("client {}", client.id)))?;
        entry.row.secret = secret::generate_client_secret();
        entry.row.updated_at = now;
        Ok(entry.row.clone())
    }

    async fn revoke(&self, client: &Client) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if !state.clients.contains_key(&client.id) {
            return Ok(());
        }

        for entry in state.tokens.values_mut() {
            if entry.row.client_id == client.id && !entry.row.revoked {
                entry.row.revoked = true;
                entry.row.updated_at = now;
            }
        }
        if let Some(entry) = state.clients.get_mut(&client.id) {
            if !entry.row.revoked {
                entry.row.revoked = true;
                entry.row.updated_at = now;
            }
        }
        Ok(())
    }

    async fn latest_personal_access_client(&self) -> Result<Option<Client>> {
        let state = self.state.read().await;
        Ok(state
            .clients
            .values()
            .filter(|e| e.row.is_personal_access)
            .max_by_key(|e| (e.row.created_at, e.seq))
            .map(|e| e.row.clone()))
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create(&self, new: NewToken) -> Result<Token> {
        let now = self.clock.now();
        let (principal, client_id) = new.validate(now)?;

        let mut state = self.state.write().await;
        match state.clients.get(&client_id) {
            Some(e) if !e.row.revoked => {}
            _ => {
                return Err(AuthorityError::validation(format!(
                    "client {} does not exist or is revoked",
                    client_id
                )))
            }
        }
        if state.tokens.contains_key(&new.id) {
            return Err(AuthorityError::validation(format!(
                "token {} already exists",
                new.id
            )));
        }

        let token = new.into_token(principal, client_id, now);
        let seq = state.next_seq();
        state.tokens.insert(
            token.id.clone(),
            Entry {
                seq,
                row: token.clone(),
            },
        );
        Ok(token)
    }

    async fn find(&self, id: &str) -> Result<Option<Token>> {
        let state = self.state.read().await;
        Ok(state.tokens.get(id).map(|e| e.row.clone()))
    }

    async fn find_for_principal(
        &self,
        id: &str,
        principal: &PrincipalRef,
    ) -> Result<Option<Token>> {
        let state = self.state.read().await;
        Ok(state
            .tokens
            .get(id)
            .filter(|e| &e.row.principal == principal)
            .map(|e| e.row.clone()))
    }

    async fn list_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Token>> {
        let state = self.state.read().await;
        let mut entries: Vec<&Entry<Token>> = state
            .tokens
            .values()
            .filter(|e| &e.row.principal == principal)
            .collect();
        // newest first
        entries.sort_by_key(|e| std::cmp::Reverse((e.row.created_at, e.seq)));
        Ok(entries.into_iter().map(|e| e.row.clone()).collect())
    }

    async fn find_valid_token(
        &self,
        principal: &PrincipalRef,
        client_id: Uuid,
    ) -> Result<Option<Token>> {
        let now = self.clock.now();
        let state = self.state.read().await;
        Ok(state
            .tokens
            .values()
            .filter(|e| {
                e.row.client_id == client_id
                    && &e.row.principal == principal
                    && e.row.is_active(now)
            })
            .max_by_key(|e| (e.row.expires_at, e.row.created_at, e.seq))
            .map(|e| e.row.clone()))
    }

    async fn revoke(&self, id: &str) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(entry) = state.tokens.get_mut(id) {
            if !entry.row.revoked {
                entry.row.revoked = true;
                entry.row.updated_at = now;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::{Duration, Utc};

    fn store() -> (MemoryStore, MockClock) {
        let clock = MockClock::new(Utc::now());
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_list_for_principal_orders_by_name_then_id() {
        let (store, _) = store();
        let owner = PrincipalRef::new("admin", 1).unwrap();
        for name in ["zeta", "alpha", "mid", "alpha"] {
            ClientStore::create(
                &store,
                NewClient::new(Some(owner.clone()), name, "https://cb.test"),
            )
            .await
            .unwrap();
        }

        let listed = ClientStore::list_for_principal(&store, &owner).await.unwrap();
        let names: Vec<&str> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "alpha", "mid", "zeta"]);
        assert!(listed[0].id < listed[1].id);
    }

    #[tokio::test]
    async fn test_latest_personal_access_client_breaks_ties_by_insertion() {
        let (store, _) = store();
        let first = ClientStore::create(
            &store,
            NewClient::new(None, "first", "http://localhost").personal_access(),
        )
        .await
        .unwrap();
        let second = ClientStore::create(
            &store,
            NewClient::new(None, "second", "http://localhost").personal_access(),
        )
        .await
        .unwrap();
        ClientStore::create(&store, NewClient::new(None, "plain", "http://localhost"))
            .await
            .unwrap();

        assert_eq!(first.created_at, second.created_at);
        let latest = store.latest_personal_access_client().await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn test_find_valid_token_tie_goes_to_most_recent() {
        let (store, clock) = store();
        let owner = PrincipalRef::new("member", 3).unwrap();
        let client = ClientStore::create(&store, NewClient::new(None, "app", "http://localhost"))
            .await
            .unwrap();
        let expires = clock.now() + Duration::hours(1);

        TokenStore::create(&store, NewToken::new(owner.clone(), client.id, expires))
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));
        let newer = TokenStore::create(&store, NewToken::new(owner.clone(), client.id, expires))
            .await
            .unwrap();

        let found = store.find_valid_token(&owner, client.id).await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn test_duplicate_token_id_rejected() {
        let (store, clock) = store();
        let owner = PrincipalRef::new("member", 3).unwrap();
        let client = ClientStore::create(&store, NewClient::new(None, "app", "http://localhost"))
            .await
            .unwrap();
        let attrs = NewToken::new(owner, client.id, clock.now() + Duration::hours(1))
            .with_id("fixed");

        TokenStore::create(&store, attrs.clone()).await.unwrap();
        let err = TokenStore::create(&store, attrs).await.unwrap_err();
        assert!(matches!(err, AuthorityError::Validation(_)));
    }
}
