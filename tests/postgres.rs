//! Postgres-backed store tests.
//!
//! **Requirements:**
//! - PostgreSQL running at DATABASE_URL
//! - Run with `cargo test --test postgres -- --ignored`

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use oauth_authority::clock::{Clock, MockClock};
use oauth_authority::models::{NewClient, NewToken, PrincipalRef};
use oauth_authority::store::postgres::PgStore;
use oauth_authority::store::{ClientStore, TokenStore};
use oauth_authority::{AuthorityError, CredentialAuthority};
use tokio::sync::Barrier;
use uuid::Uuid;

async fn setup() -> (PgStore, MockClock, CredentialAuthority) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let clock = MockClock::new(Utc::now());
    let store = PgStore::connect(&url, 5, Arc::new(clock.clone()))
        .await
        .expect("connect");
    store.migrate().await.expect("migrate");

    let shared = Arc::new(store.clone());
    let authority = CredentialAuthority::new(shared.clone(), shared, Arc::new(clock.clone()));
    (store, clock, authority)
}

/// Unique per run so repeated runs against one database do not collide.
fn principal(kind: &str) -> PrincipalRef {
    PrincipalRef::new(kind, Uuid::new_v4()).unwrap()
}

#[tokio::test]
#[ignore]
async fn test_pg_polymorphic_lookup() {
    let (store, _, authority) = setup().await;
    let owner = principal("admin");
    let other_kind = PrincipalRef::new("customer", owner.id()).unwrap();

    let client = authority
        .issue_client(NewClient::new(Some(owner.clone()), "app", "https://cb.test"))
        .await
        .unwrap();

    assert!(ClientStore::find_for_principal(&store, client.id, &owner)
        .await
        .unwrap()
        .is_some());
    assert!(ClientStore::find_for_principal(&store, client.id, &other_kind)
        .await
        .unwrap()
        .is_none());
    assert!(ClientStore::list_for_principal(&store, &other_kind)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[ignore]
async fn test_pg_revocation_cascade() {
    let (store, clock, authority) = setup().await;
    let owner = principal("admin");
    let client = authority
        .issue_client(NewClient::new(Some(owner.clone()), "C", "https://cb.test"))
        .await
        .unwrap();
    let now = clock.now();

    let t1 = authority
        .issue_token(NewToken::new(owner.clone(), client.id, now + Duration::minutes(10)))
        .await
        .unwrap();
    let t2 = authority
        .issue_token(NewToken::new(owner.clone(), client.id, now + Duration::minutes(5)))
        .await
        .unwrap();

    let found = authority.find_valid_token(&owner, &client).await.unwrap().unwrap();
    assert_eq!(found.id, t1.id);

    authority.delete_client(&client).await.unwrap();
    authority.delete_client(&client).await.unwrap();

    assert!(store.find_valid_token(&owner, client.id).await.unwrap().is_none());
    assert!(ClientStore::is_revoked(&store, client.id).await.unwrap());
    assert!(TokenStore::is_revoked(&store, &t1.id).await.unwrap());
    assert!(TokenStore::is_revoked(&store, &t2.id).await.unwrap());

    let err = authority
        .issue_token(NewToken::new(owner, client.id, now + Duration::minutes(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthorityError::Validation(_)));
}

#[tokio::test]
#[ignore]
async fn test_pg_duplicate_token_id_is_validation_error() {
    let (_, clock, authority) = setup().await;
    let owner = principal("member");
    let client = authority
        .issue_client(NewClient::new(None, "app", "https://cb.test"))
        .await
        .unwrap();
    let attrs = NewToken::new(owner, client.id, clock.now() + Duration::hours(1));

    authority.issue_token(attrs.clone()).await.unwrap();
    let err = authority.issue_token(attrs).await.unwrap_err();
    assert!(matches!(err, AuthorityError::Validation(_)));
}

#[tokio::test]
#[ignore]
async fn test_pg_scopes_round_trip() {
    let (store, clock, authority) = setup().await;
    let owner = principal("member");
    let client = authority
        .issue_client(NewClient::new(None, "app", "https://cb.test"))
        .await
        .unwrap();
    let token = authority
        .issue_token(
            NewToken::new(owner.clone(), client.id, clock.now() + Duration::hours(1))
                .with_name("deploy")
                .with_scopes(["write", "read"]),
        )
        .await
        .unwrap();

    let stored = TokenStore::find_for_principal(&store, &token.id, &owner)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.can("read"));
    assert!(stored.can("write"));
    assert!(!stored.can("admin"));
    assert_eq!(stored.name.as_deref(), Some("deploy"));
}

#[tokio::test]
#[ignore]
async fn test_pg_latest_personal_access_client_tie_goes_to_last_inserted() {
    let (_, _, authority) = setup().await;

    // the clock never moves, so every row shares one created_at
    for _ in 0..20 {
        authority
            .issue_personal_access_client(None, "older", "http://localhost")
            .await
            .unwrap();
        let newer = authority
            .issue_personal_access_client(None, "newer", "http://localhost")
            .await
            .unwrap();

        let resolved = authority.resolve_personal_access_client().await.unwrap();
        assert_eq!(resolved.id, newer.id);
    }
}

#[tokio::test]
#[ignore]
async fn test_pg_valid_token_tie_goes_to_last_inserted() {
    let (_, clock, authority) = setup().await;
    let owner = principal("member");
    let client = authority
        .issue_client(NewClient::new(None, "app", "https://cb.test"))
        .await
        .unwrap();
    let expires = clock.now() + Duration::hours(1);

    for _ in 0..20 {
        let newest = authority
            .issue_token(NewToken::new(owner.clone(), client.id, expires))
            .await
            .unwrap();
        let found = authority.find_valid_token(&owner, &client).await.unwrap().unwrap();
        assert_eq!(found.id, newest.id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_issue_racing_delete_leaves_no_live_token() {
    let (store, clock, authority) = setup().await;
    let owner = principal("admin");
    let client = authority
        .issue_client(NewClient::new(Some(owner.clone()), "app", "https://cb.test"))
        .await
        .unwrap();
    let expires = clock.now() + Duration::hours(1);

    let issuers = 4;
    let barrier = Arc::new(Barrier::new(issuers + 1));
    let mut handles = Vec::new();
    for _ in 0..issuers {
        let authority = authority.clone();
        let owner = owner.clone();
        let barrier = barrier.clone();
        let client_id = client.id;
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut issued = Vec::new();
            for _ in 0..500 {
                match authority
                    .issue_token(NewToken::new(owner.clone(), client_id, expires))
                    .await
                {
                    Ok(token) => issued.push(token.id),
                    Err(e) => return (issued, Some(e)),
                }
            }
            (issued, None)
        }));
    }
    let deleter = {
        let authority = authority.clone();
        let client = client.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            authority.delete_client(&client).await
        })
    };

    let mut issued = HashSet::new();
    for handle in handles {
        let (ids, rejection) = handle.await.unwrap();
        issued.extend(ids);
        let rejection = rejection.expect("issuer never saw the revoked client");
        assert!(matches!(rejection, AuthorityError::Validation(_)));
    }
    deleter.await.unwrap().unwrap();

    let stored = TokenStore::list_for_principal(&store, &owner).await.unwrap();
    let stored_ids: HashSet<String> = stored.iter().map(|t| t.id.clone()).collect();
    assert_eq!(stored_ids, issued);
    for token in &stored {
        assert!(token.revoked, "token {} survived the cascade", token.id);
    }
}
