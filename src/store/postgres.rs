use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use super::{ClientStore, TokenStore};
use crate::clock::Clock;
use crate::errors::{AuthorityError, Result};
use crate::models::client::validate_details;
use crate::models::{Client, NewClient, NewToken, PrincipalRef, Token};
use crate::secret;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, clock))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// -- Rows --

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    id: Uuid,
    owner_id: Option<String>,
    owner_kind: Option<String>,
    name: String,
    secret: String,
    redirect: String,
    personal_access_client: bool,
    password_client: bool,
    revoked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ClientRow> for Client {
    type Error = AuthorityError;

    fn try_from(row: ClientRow) -> Result<Self> {
        // the table constraint keeps owner_kind and owner_id null together
        let principal = match (row.owner_kind, row.owner_id) {
            (Some(kind), Some(id)) => Some(PrincipalRef::new(kind, id)?),
            _ => None,
        };
        Ok(Client {
            id: row.id,
            principal,
            name: row.name,
            secret: row.secret,
            redirect_uri: row.redirect,
            is_personal_access: row.personal_access_client,
            is_password_grant: row.password_client,
            revoked: row.revoked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    id: String,
    owner_id: String,
    owner_kind: String,
    client_id: Uuid,
    name: Option<String>,
    scopes: Json<BTreeSet<String>>,
    revoked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for Token {
    type Error = AuthorityError;

    fn try_from(row: TokenRow) -> Result<Self> {
        Ok(Token {
            id: row.id,
            principal: PrincipalRef::new(row.owner_kind, row.owner_id)?,
            client_id: row.client_id,
            name: row.name,
            scopes: row.scopes.0,
            revoked: row.revoked,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}

fn duplicate_or_storage(e: sqlx::Error, what: String) -> AuthorityError {
    let duplicate = e
        .as_database_error()
        .map_or(false, |db| db.is_unique_violation());
    if duplicate {
        AuthorityError::validation(format!("{} already exists", what))
    } else {
        e.into()
    }
}

// -- Client Operations --

#[async_trait]
impl ClientStore for PgStore {
    async fn find(&self, id: Uuid) -> Result<Option<Client>> {
        let row = sqlx::query_as::<_, ClientRow>(
            r#"SELECT id, owner_id, owner_kind, name, secret, redirect, personal_access_client,
                      password_client, revoked, created_at, updated_at
               FROM oauth_clients WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Client::try_from).transpose()
    }

    async fn find_for_principal(
        &self,
        id: Uuid,
        principal: &PrincipalRef,
    ) -> Result<Option<Client>> {
        let row = sqlx::query_as::<_, ClientRow>(
            r#"SELECT id, owner_id, owner_kind, name, secret, redirect, personal_access_client,
                      password_client, revoked, created_at, updated_at
               FROM oauth_clients
               WHERE id = $1 AND owner_id = $2 AND owner_kind = $3"#,
        )
        .bind(id)
        .bind(principal.id())
        .bind(principal.kind())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Client::try_from).transpose()
    }

    async fn list_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Client>> {
        let rows = sqlx::query_as::<_, ClientRow>(
            r#"SELECT id, owner_id, owner_kind, name, secret, redirect, personal_access_client,
                      password_client, revoked, created_at, updated_at
               FROM oauth_clients
               WHERE owner_id = $1 AND owner_kind = $2
               ORDER BY name ASC, id ASC"#,
        )
        .bind(principal.id())
        .bind(principal.kind())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Client::try_from).collect()
    }

    async fn list_active_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Client>> {
        let rows = sqlx::query_as::<_, ClientRow>(
            r#"SELECT id, owner_id, owner_kind, name, secret, redirect, personal_access_client,
                      password_client, revoked, created_at, updated_at
               FROM oauth_clients
               WHERE owner_id = $1 AND owner_kind = $2 AND revoked = false
               ORDER BY name ASC, id ASC"#,
        )
        .bind(principal.id())
        .bind(principal.kind())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Client::try_from).collect()
    }

    async fn create(&self, new: NewClient) -> Result<Client> {
        new.validate()?;
        let now = self.clock.now();
        let (owner_id, owner_kind) = match &new.principal {
            Some(p) => (Some(p.id()), Some(p.kind())),
            None => (None, None),
        };

        let row = sqlx::query_as::<_, ClientRow>(
            r#"INSERT INTO oauth_clients (id, owner_id, owner_kind, name, secret, redirect,
                                          personal_access_client, password_client, revoked,
                                          created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false, $9, $9)
               RETURNING id, owner_id, owner_kind, name, secret, redirect, personal_access_client,
                         password_client, revoked, created_at, updated_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(owner_kind)
        .bind(&new.name)
        .bind(secret::generate_client_secret())
        .bind(&new.redirect_uri)
        .bind(new.personal_access)
        .bind(new.password_grant)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn update(&self, client: &Client, name: &str, redirect_uri: &str) -> Result<Client> {
        validate_details(name, redirect_uri)?;
        let row = sqlx::query_as::<_, ClientRow>(
            r#"UPDATE oauth_clients SET name = $2, redirect = $3, updated_at = $4
               WHERE id = $1
               RETURNING id, owner_id, owner_kind, name, secret, redirect, personal_access_client,
                         password_client, revoked, created_at, updated_at"#,
        )
        .bind(client.id)
        .bind(name)
        .bind(redirect_uri)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| AuthorityError::not_found(format!("client {}", client.id)))?
            .try_into()
    }

    async fn regenerate_secret(&self, client: &Client) -> Result<Client> {
        let row = sqlx::query_as::<_, ClientRow>(
            r#"UPDATE oauth_clients SET secret = $2, updated_at = $3
               WHERE id = $1
               RETURNING id, owner_id, owner_kind, name, secret, redirect, personal_access_client,
                         password_client, revoked, created_at, updated_at"#,
        )
        .bind(client.id)
        .bind(secret::generate_client_secret())
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| AuthorityError::not_found(format!("client {}", client.id)))?
            .try_into()
    }

    async fn revoke(&self, client: &Client) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        // Row lock serialises the cascade against token inserts, which take FOR SHARE.
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM oauth_clients WHERE id = $1 FOR UPDATE",
        )
        .bind(client.id)
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Ok(());
        }

        let tokens = sqlx::query(
            "UPDATE oauth_access_tokens SET revoked = true, updated_at = $2 WHERE client_id = $1 AND revoked = false",
        )
        .bind(client.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE oauth_clients SET revoked = true, updated_at = $2 WHERE id = $1 AND revoked = false",
        )
        .bind(client.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            client_id = %client.id,
            tokens = tokens.rows_affected(),
            "revocation cascade committed"
        );
        Ok(())
    }

    async fn latest_personal_access_client(&self) -> Result<Option<Client>> {
        let row = sqlx::query_as::<_, ClientRow>(
            r#"SELECT id, owner_id, owner_kind, name, secret, redirect, personal_access_client,
                      password_client, revoked, created_at, updated_at
               FROM oauth_clients
               WHERE personal_access_client = true
               ORDER BY created_at DESC, seq DESC
               LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Client::try_from).transpose()
    }
}

// -- Token Operations --

#[async_trait]
impl TokenStore for PgStore {
    async fn create(&self, new: NewToken) -> Result<Token> {
        let now = self.clock.now();
        let (principal, client_id) = new.validate(now)?;

        let mut tx = self.pool.begin().await?;

        let client_revoked = sqlx::query_scalar::<_, bool>(
            "SELECT revoked FROM oauth_clients WHERE id = $1 FOR SHARE",
        )
        .bind(client_id)
        .fetch_optional(&mut *tx)
        .await?;
        if client_revoked != Some(false) {
            return Err(AuthorityError::validation(format!(
                "client {} does not exist or is revoked",
                client_id
            )));
        }

        let row = sqlx::query_as::<_, TokenRow>(
            r#"INSERT INTO oauth_access_tokens (id, owner_id, owner_kind, client_id, name, scopes,
                                                revoked, created_at, updated_at, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, false, $7, $7, $8)
               RETURNING id, owner_id, owner_kind, client_id, name, scopes, revoked,
                         created_at, updated_at, expires_at"#,
        )
        .bind(&new.id)
        .bind(principal.id())
        .bind(principal.kind())
        .bind(client_id)
        .bind(&new.name)
        .bind(Json(&new.scopes))
        .bind(now)
        .bind(new.stored_expires_at())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| duplicate_or_storage(e, format!("token {}", new.id)))?;

        tx.commit().await?;
        row.try_into()
    }

    async fn find(&self, id: &str) -> Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"SELECT id, owner_id, owner_kind, client_id, name, scopes, revoked,
                      created_at, updated_at, expires_at
               FROM oauth_access_tokens WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Token::try_from).transpose()
    }

    async fn find_for_principal(
        &self,
        id: &str,
        principal: &PrincipalRef,
    ) -> Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"SELECT id, owner_id, owner_kind, client_id, name, scopes, revoked,
                      created_at, updated_at, expires_at
               FROM oauth_access_tokens
               WHERE id = $1 AND owner_id = $2 AND owner_kind = $3"#,
        )
        .bind(id)
        .bind(principal.id())
        .bind(principal.kind())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Token::try_from).transpose()
    }

    async fn list_for_principal(&self, principal: &PrincipalRef) -> Result<Vec<Token>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"SELECT id, owner_id, owner_kind, client_id, name, scopes, revoked,
                      created_at, updated_at, expires_at
               FROM oauth_access_tokens
               WHERE owner_id = $1 AND owner_kind = $2
               ORDER BY created_at DESC, seq DESC"#,
        )
        .bind(principal.id())
        .bind(principal.kind())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Token::try_from).collect()
    }

    async fn find_valid_token(
        &self,
        principal: &PrincipalRef,
        client_id: Uuid,
    ) -> Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"SELECT id, owner_id, owner_kind, client_id, name, scopes, revoked,
                      created_at, updated_at, expires_at
               FROM oauth_access_tokens
               WHERE client_id = $1 AND owner_id = $2 AND owner_kind = $3
                 AND revoked = false AND expires_at > $4
               ORDER BY expires_at DESC, created_at DESC, seq DESC
               LIMIT 1"#,
        )
        .bind(client_id)
        .bind(principal.id())
        .bind(principal.kind())
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Token::try_from).transpose()
    }

    async fn revoke(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE oauth_access_tokens SET revoked = true, updated_at = $2 WHERE id = $1 AND revoked = false",
        )
        .bind(id)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
