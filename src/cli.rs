use clap::{Parser, Subcommand};
use uuid::Uuid;

use oauth_authority::models::PrincipalRef;

/// oauthctl: administer OAuth clients and access tokens
#[derive(Parser)]
#[command(name = "oauthctl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Manage OAuth clients
    Client {
        #[command(subcommand)]
        command: ClientCommands,
    },

    /// Manage access tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

impl Commands {
    /// Minting an API token only needs the signing key.
    pub fn needs_database(&self) -> bool {
        !matches!(
            self,
            Commands::Token {
                command: TokenCommands::Api { .. }
            }
        )
    }
}

#[derive(Subcommand)]
pub enum ClientCommands {
    /// Register a new client
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        redirect: String,
        /// Owning principal as kind:id; omit for a first-party client
        #[arg(long)]
        owner: Option<PrincipalRef>,
        /// Issue a personal access client
        #[arg(long, conflicts_with = "password")]
        personal: bool,
        /// Issue a password grant client
        #[arg(long)]
        password: bool,
    },
    /// List clients owned by a principal
    List {
        #[arg(long)]
        owner: PrincipalRef,
        /// Only clients that are not revoked
        #[arg(long)]
        active: bool,
    },
    /// Show a single client
    Show {
        #[arg(long)]
        id: Uuid,
    },
    /// Change a client's name and redirect URI
    Update {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        redirect: String,
    },
    /// Regenerate a client's secret
    Secret {
        #[arg(long)]
        id: Uuid,
    },
    /// Revoke a client and all of its tokens
    Delete {
        #[arg(long)]
        id: Uuid,
    },
    /// Show the personal access client in use
    Personal,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for a principal under a client
    Issue {
        #[arg(long)]
        client: Uuid,
        #[arg(long)]
        owner: PrincipalRef,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },
    /// List tokens owned by a principal
    List {
        #[arg(long)]
        owner: PrincipalRef,
    },
    /// Revoke a token
    Revoke {
        #[arg(long)]
        id: String,
    },
    /// Report whether a token is usable
    Check {
        #[arg(long)]
        id: String,
    },
    /// Mint a short-lived first-party API token bound to a CSRF token
    Api {
        #[arg(long)]
        owner: PrincipalRef,
        #[arg(long)]
        csrf: String,
    },
}
