use crate::orchestration::Topics;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub token_secret: String,
    pub kafka_rest_url: String,
    pub topic_new_auction: String,
    pub topic_new_bid: String,
    pub topic_sold_auction: String,
    pub topic_verified: String,
    pub consumer_group: String,
    pub validity_window: Duration,
    pub sweep_interval: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = required(&env_map, "DATABASE_PATH")?;

        let token_secret = required(&env_map, "TOKEN_SECRET")?;
        if token_secret.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "TOKEN_SECRET".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let kafka_rest_url = required(&env_map, "KAFKA_REST_URL")?;

        let topic = |key: &str, default: &str| {
            env_map
                .get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };
        let topic_new_auction = topic("TOPIC_NEW_AUCTION", "sky-new-auction");
        let topic_new_bid = topic("TOPIC_NEW_BID", "sky-new-bid");
        let topic_sold_auction = topic("TOPIC_SOLD_AUCTION", "sky-sold-auction");
        let topic_verified = topic("TOPIC_VERIFIED", "sky-mc-verified");

        let consumer_group = match env_map.get("CONSUMER_GROUP") {
            Some(group) => group.clone(),
            None => default_consumer_group(env_map.get("HOSTNAME").map(|s| s.as_str())),
        };

        let validity_secs = positive(&env_map, "VALIDITY_WINDOW_SECS", 600, "seconds")?;
        let sweep_secs = positive(
            &env_map,
            "SWEEP_INTERVAL_SECS",
            (validity_secs / 2).max(1),
            "seconds",
        )?;
        let poll_ms = positive(&env_map, "POLL_INTERVAL_MS", 500, "milliseconds")?;

        Ok(Config {
            port,
            database_path,
            token_secret,
            kafka_rest_url,
            topic_new_auction,
            topic_new_bid,
            topic_sold_auction,
            topic_verified,
            consumer_group,
            validity_window: Duration::from_secs(validity_secs),
            sweep_interval: Duration::from_secs(sweep_secs),
            poll_interval: Duration::from_millis(poll_ms),
        })
    }

    pub fn topics(&self) -> Topics {
        Topics {
            new_auction: self.topic_new_auction.clone(),
            new_bid: self.topic_new_bid.clone(),
            sold_auction: self.topic_sold_auction.clone(),
        }
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn positive(
    env_map: &HashMap<String, String>,
    key: &str,
    default: u64,
    unit: &str,
) -> Result<u64, ConfigError> {
    let Some(raw) = env_map.get(key) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be a positive number of {}", unit),
        )),
    }
}

/// One group per replica, distinguished by the last character of the host name.
fn default_consumer_group(hostname: Option<&str>) -> String {
    match hostname.and_then(|h| h.chars().last()) {
        Some(suffix) => format!("mc-connect-{}", suffix),
        None => "mc-connect".to_string(),
    }
}
