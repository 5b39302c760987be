use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oauth_authority::api_token::ApiTokenFactory;
use oauth_authority::clock::{Clock, SystemClock};
use oauth_authority::config::{self, Config};
use oauth_authority::models::{Client, NewToken, PrincipalRef};
use oauth_authority::store::postgres::PgStore;
use oauth_authority::CredentialAuthority;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(&cfg);

    let args = cli::Cli::parse();

    let result = if args.command.needs_database() {
        run(args.command, &cfg).await
    } else {
        run_offline(args.command, &cfg)
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run(command: cli::Commands, cfg: &Config) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = PgStore::connect(&cfg.database_url, cfg.db_max_connections, clock.clone())
        .await
        .context("failed to connect to database")?;

    match command {
        cli::Commands::Migrate => {
            tracing::info!("Running migrations...");
            store.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        cli::Commands::Client { command } => {
            let authority = build_authority(&store, clock, cfg);
            handle_client_command(command, &authority).await
        }
        cli::Commands::Token { command } => {
            let authority = build_authority(&store, clock.clone(), cfg);
            handle_token_command(command, &authority, clock.as_ref(), cfg).await
        }
    }
}

fn run_offline(command: cli::Commands, cfg: &Config) -> anyhow::Result<()> {
    match command {
        cli::Commands::Token {
            command: cli::TokenCommands::Api { owner, csrf },
        } => mint_api_token(cfg, &owner, &csrf),
        _ => anyhow::bail!("this command needs a database connection"),
    }
}

fn mint_api_token(cfg: &Config, owner: &PrincipalRef, csrf: &str) -> anyhow::Result<()> {
    let factory = ApiTokenFactory::new(
        cfg.api_token_key.as_bytes(),
        cfg.session_lifetime,
        Arc::new(SystemClock),
    )?;
    let token = factory.make(owner, csrf)?;
    println!("API token (expires {}):\n  {}", token.expires_at, token.value);
    Ok(())
}

fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "oauth_authority=info,oauthctl=info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if cfg.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_authority(store: &PgStore, clock: Arc<dyn Clock>, cfg: &Config) -> CredentialAuthority {
    let shared = Arc::new(store.clone());
    CredentialAuthority::new(shared.clone(), shared, clock)
        .with_personal_access_client(cfg.personal_access_client_id)
}

async fn require_client(authority: &CredentialAuthority, id: uuid::Uuid) -> anyhow::Result<Client> {
    authority
        .client_store()
        .find(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Client not found: {}", id))
}

fn print_client(client: &Client, with_secret: bool) {
    println!("Client:");
    println!("  ID:        {}", client.id);
    println!("  Name:      {}", client.name);
    println!(
        "  Owner:     {}",
        client
            .principal
            .as_ref()
            .map_or_else(|| "(first party)".to_string(), ToString::to_string)
    );
    println!("  Redirect:  {}", client.redirect_uri);
    println!("  Personal:  {}", client.is_personal_access);
    println!("  Password:  {}", client.is_password_grant);
    println!("  Revoked:   {}", client.revoked);
    if with_secret {
        println!("  Secret:    {}", client.secret);
    }
}

async fn handle_client_command(
    cmd: cli::ClientCommands,
    authority: &CredentialAuthority,
) -> anyhow::Result<()> {
    match cmd {
        cli::ClientCommands::Create {
            name,
            redirect,
            owner,
            personal,
            password,
        } => {
            let client = if personal {
                authority
                    .issue_personal_access_client(owner, &name, &redirect)
                    .await?
            } else if password {
                authority
                    .issue_password_grant_client(owner, &name, &redirect)
                    .await?
            } else {
                authority
                    .issue_client(oauth_authority::models::NewClient::new(owner, name, redirect))
                    .await?
            };
            print_client(&client, true);
        }
        cli::ClientCommands::List { owner, active } => {
            let store = authority.client_store();
            let clients = if active {
                store.list_active_for_principal(&owner).await?
            } else {
                store.list_for_principal(&owner).await?
            };
            if clients.is_empty() {
                println!("No clients found.");
            } else {
                println!("{:<38} {:<24} {:<10} {:<10}", "ID", "NAME", "PERSONAL", "REVOKED");
                for c in clients {
                    println!(
                        "{:<38} {:<24} {:<10} {:<10}",
                        c.id, c.name, c.is_personal_access, c.revoked
                    );
                }
            }
        }
        cli::ClientCommands::Show { id } => {
            let client = require_client(authority, id).await?;
            print_client(&client, false);
        }
        cli::ClientCommands::Update { id, name, redirect } => {
            let client = require_client(authority, id).await?;
            let client = authority
                .client_store()
                .update(&client, &name, &redirect)
                .await?;
            print_client(&client, false);
        }
        cli::ClientCommands::Secret { id } => {
            let client = require_client(authority, id).await?;
            let client = authority.regenerate_secret(&client).await?;
            println!("New secret for {}:\n  {}", client.id, client.secret);
        }
        cli::ClientCommands::Delete { id } => {
            match authority.client_store().find(id).await? {
                Some(client) => {
                    authority.delete_client(&client).await?;
                    println!("Client and its tokens revoked.");
                }
                None => println!("Client not found."),
            }
        }
        cli::ClientCommands::Personal => {
            let client = authority.resolve_personal_access_client().await?;
            print_client(&client, false);
        }
    }
    Ok(())
}

async fn handle_token_command(
    cmd: cli::TokenCommands,
    authority: &CredentialAuthority,
    clock: &dyn Clock,
    cfg: &Config,
) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Issue {
            client,
            owner,
            name,
            scopes,
        } => {
            let mut attrs = NewToken::new(owner, client, clock.now() + cfg.token_ttl)
                .with_scopes(scopes.into_iter().filter(|s| !s.trim().is_empty()));
            if let Some(name) = name {
                attrs = attrs.with_name(name);
            }
            let token = authority.issue_token(attrs).await?;
            println!(
                "Token issued:\n  ID:      {}\n  Owner:   {}\n  Expires: {}",
                token.id, token.principal, token.expires_at
            );
        }
        cli::TokenCommands::List { owner } => {
            let tokens = authority.token_store().list_for_principal(&owner).await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                let now = clock.now();
                println!("{:<82} {:<38} {:<8}", "ID", "CLIENT", "ACTIVE");
                for t in tokens {
                    println!("{:<82} {:<38} {:<8}", t.id, t.client_id, t.is_active(now));
                }
            }
        }
        cli::TokenCommands::Revoke { id } => {
            if authority.token_store().find(&id).await?.is_some() {
                authority.revoke_token(&id).await?;
                println!("Token revoked.");
            } else {
                println!("Token not found.");
            }
        }
        cli::TokenCommands::Check { id } => {
            let usable = authority.is_token_usable(&id).await?;
            println!("{}", if usable { "usable" } else { "not usable" });
        }
        cli::TokenCommands::Api { owner, csrf } => mint_api_token(cfg, &owner, &csrf)?,
    }
    Ok(())
}
