//! Service configuration.
//!
//! Secrets/config:
//! - Docker Compose: read from /run/secrets/*
//! - Container platforms without a secrets mount: read from env vars

use anyhow::{anyhow, Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub odds_api_key: String,
    pub api_base_url: String,
    pub database_url: String,
    pub league_id: String,
    /// Page size for the single events request.
    pub event_limit: u32,
    /// Fetch window: [today, today + lookahead_days].
    pub lookahead_days: i64,
    /// Wall-clock budget for one run, checked between games.
    pub max_run_seconds: u64,
    pub poll_interval_seconds: u64,
    pub health_port: u16,
    /// If true (the default), run one ingestion pass and exit.
    pub run_once: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let odds_api_key = match env::var("SPORTS_ODDS_API_KEY") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("SPORTS_ODDS_API_KEY is set but empty")),
            Err(_) => read_secret_file("/run/secrets/odds_api_key", "odds_api_key")?,
        };

        if looks_like_placeholder(&odds_api_key) {
            return Err(anyhow!(
                "SPORTS_ODDS_API_KEY appears to be a placeholder value; replace with your real key"
            ));
        }

        let database_url = match env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("DATABASE_URL is set but empty")),
            Err(_) => {
                let db_user = env::var("DB_USER").unwrap_or_else(|_| "odds".to_string());
                let db_name = env::var("DB_NAME").unwrap_or_else(|_| "odds".to_string());
                let db_host = env::var("DB_HOST").unwrap_or_else(|_| "postgres".to_string());
                let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
                let db_password = read_secret_file("/run/secrets/db_password", "db_password")?;
                format!(
                    "postgresql://{}:{}@{}:{}/{}",
                    db_user, db_password, db_host, db_port, db_name
                )
            }
        };

        Ok(Self {
            odds_api_key,
            api_base_url: env::var("SPORTS_ODDS_API_BASE")
                .unwrap_or_else(|_| "https://api.sportsgameodds.com".to_string()),
            database_url,
            league_id: env::var("LEAGUE_ID").unwrap_or_else(|_| "NFL".to_string()),
            event_limit: parse_env("EVENT_LIMIT", 3),
            lookahead_days: parse_env("LOOKAHEAD_DAYS", 7),
            max_run_seconds: parse_env("MAX_RUN_SECONDS", 240),
            poll_interval_seconds: parse_env("POLL_INTERVAL_SECONDS", 300),
            health_port: parse_env("HEALTH_PORT", 8084),
            run_once: env::var("RUN_ONCE")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Guard against accidental use of sample/placeholder keys.
pub fn looks_like_placeholder(key: &str) -> bool {
    let key = key.trim().to_lowercase();
    key.contains("change_me") || key.contains("your_") || key.starts_with("sample")
}

/// Read a secret from a Docker secret file. Required when the env var is
/// absent; there is no further fallback.
fn read_secret_file(file_path: &str, secret_name: &str) -> Result<String> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .context(format!(
            "Secret file not found at {} ({}). Container must have secrets mounted.",
            file_path, secret_name
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_keys_are_rejected() {
        assert!(looks_like_placeholder("CHANGE_ME"));
        assert!(looks_like_placeholder("your_api_key_here"));
        assert!(looks_like_placeholder("sample-key-123"));
        assert!(!looks_like_placeholder("4f2c9be11a0d4c5e"));
    }
}
