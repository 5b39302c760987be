use anyhow::Context;
use chrono::Duration;
use uuid::Uuid;

const PLACEHOLDER_KEY: &str = "CHANGE_ME_API_TOKEN_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Pinned personal access client. When unset the newest one is used.
    pub personal_access_client_id: Option<Uuid>,
    /// Lifetime of tokens issued from the CLI.
    pub token_ttl: Duration,
    /// Lifetime of first-party API tokens.
    pub session_lifetime: Duration,
    pub api_token_key: String,
    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Builds the config from any key lookup; `load` uses the process environment.
pub fn from_lookup<F>(get: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let api_token_key = get("OAUTH_API_TOKEN_KEY").unwrap_or_else(|| PLACEHOLDER_KEY.into());
    if api_token_key == PLACEHOLDER_KEY {
        let env_mode = get("OAUTH_ENV")
            .or_else(|| get("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "OAUTH_API_TOKEN_KEY is still the insecure placeholder. \
                 Set a real signing key before running in production."
            );
        }
        eprintln!("OAUTH_API_TOKEN_KEY is not set, using insecure placeholder. Set a real key for production.");
    }

    let personal_access_client_id = get("OAUTH_PERSONAL_ACCESS_CLIENT_ID")
        .filter(|v| !v.trim().is_empty())
        .map(|v| Uuid::parse_str(v.trim()))
        .transpose()
        .context("OAUTH_PERSONAL_ACCESS_CLIENT_ID must be a UUID")?;

    Ok(Config {
        database_url: get("DATABASE_URL").unwrap_or_else(|| "postgres://localhost/oauth".into()),
        db_max_connections: parse_or(&get, "OAUTH_DB_MAX_CONNECTIONS", 10)?,
        personal_access_client_id,
        token_ttl: Duration::minutes(parse_or(&get, "OAUTH_TOKEN_TTL_MINUTES", 525_600)?),
        session_lifetime: Duration::minutes(parse_or(&get, "OAUTH_SESSION_LIFETIME_MINUTES", 120)?),
        api_token_key,
        json_logs: get("OAUTH_LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
    })
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}
