use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

use score_core::AggregatorConfig;
use score_persistence::connection::DEFAULT_DATABASE_URL;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub auth_dev_mode: bool,
    pub jwt_secret: String,
    pub admin_token: Option<String>,
    pub max_transaction_attempts: u32,
    pub leaderboard_top_size: usize,
    pub score_cache_path: Option<String>,
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT", "8080")?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            auth_dev_mode: parse_var("AUTH_DEV_MODE", "false")?,
            jwt_secret: env::var("JWT_SECRET").unwrap_or_default(),
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            max_transaction_attempts: parse_var("MAX_TRANSACTION_ATTEMPTS", "25")?,
            leaderboard_top_size: parse_var("LEADERBOARD_TOP_SIZE", "3")?,
            score_cache_path: env::var("SCORE_CACHE_PATH").ok().filter(|p| !p.is_empty()),
        })
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            max_transaction_attempts: self.max_transaction_attempts,
            ..AggregatorConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            auth_dev_mode: true,
            jwt_secret: String::new(),
            admin_token: None,
            max_transaction_attempts: 25,
            leaderboard_top_size: 3,
            score_cache_path: None,
        }
    }
}
