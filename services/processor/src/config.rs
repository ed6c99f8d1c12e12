//! services/processor/src/config.rs
//!
//! Defines the processor's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use session_insight_core::{PriorityWeights, ProviderId};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Connection settings for one analysis provider.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    /// Without a key the provider is not configured at all.
    pub api_key: Option<String>,
    pub model: String,
    /// OpenAI-compatible endpoint; `None` uses the library default.
    pub api_base: Option<String>,
    /// Minimum spacing between two calls to this provider.
    pub min_interval: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: Option<String>,
    pub log_level: Level,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub gemini: ProviderSettings,
    pub scheduler_interval: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
    pub shutdown_grace: Duration,
    pub provider_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub completion_threshold: Option<usize>,
    pub priority_weights: PriorityWeights,
    pub min_content_length: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server, Storage and Logging ---
        let bind_address: SocketAddr =
            parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let database_url = non_empty(&lookup, "DATABASE_URL");

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Providers ---
        let openai = ProviderSettings {
            api_key: non_empty(&lookup, "OPENAI_API_KEY"),
            model: lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            api_base: non_empty(&lookup, "OPENAI_API_BASE"),
            min_interval: millis(&lookup, "OPENAI_MIN_INTERVAL_MS", 1500)?,
        };
        let anthropic = ProviderSettings {
            api_key: non_empty(&lookup, "ANTHROPIC_API_KEY"),
            model: lookup("ANTHROPIC_MODEL")
                .unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
            api_base: Some(
                non_empty(&lookup, "ANTHROPIC_API_BASE")
                    .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            ),
            min_interval: millis(&lookup, "ANTHROPIC_MIN_INTERVAL_MS", 3000)?,
        };
        let gemini = ProviderSettings {
            api_key: non_empty(&lookup, "GEMINI_API_KEY"),
            model: lookup("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            api_base: Some(non_empty(&lookup, "GEMINI_API_BASE").unwrap_or_else(|| {
                "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
            })),
            min_interval: millis(&lookup, "GEMINI_MIN_INTERVAL_MS", 2000)?,
        };

        // --- Scheduler ---
        let scheduler_interval = Duration::from_secs(positive(&lookup, "SCHEDULER_INTERVAL_SECS", 300u64)?);
        let batch_size = positive(&lookup, "SCHEDULER_BATCH_SIZE", 5usize)?;
        let concurrency = positive(&lookup, "SCHEDULER_CONCURRENCY", 2usize)?;
        let shutdown_grace = Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 30u64)?);

        // --- Provider Calls ---
        let provider_timeout = Duration::from_secs(positive(&lookup, "PROVIDER_TIMEOUT_SECS", 120u64)?);
        let retry_max_attempts = positive(&lookup, "RETRY_MAX_ATTEMPTS", 3u32)?;
        let retry_base_delay = millis(&lookup, "RETRY_BASE_DELAY_MS", 1000)?;
        let retry_max_delay = millis(&lookup, "RETRY_MAX_DELAY_MS", 30_000)?;

        // --- Consolidation and Priority ---
        let completion_threshold = match non_empty(&lookup, "COMPLETION_THRESHOLD") {
            Some(raw) => Some(parse_value("COMPLETION_THRESHOLD", &raw)?),
            None => None,
        };
        let priority_weights = match non_empty(&lookup, "PRIORITY_WEIGHTS") {
            Some(raw) => parse_weights(&raw)?,
            None => PriorityWeights::default(),
        };
        let min_content_length = parse_or(&lookup, "MIN_CONTENT_LENGTH", 100usize)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai,
            anthropic,
            gemini,
            scheduler_interval,
            batch_size,
            concurrency,
            shutdown_grace,
            provider_timeout,
            retry_max_attempts,
            retry_base_delay,
            retry_max_delay,
            completion_threshold,
            priority_weights,
            min_content_length,
        })
    }

    pub fn provider(&self, id: ProviderId) -> &ProviderSettings {
        match id {
            ProviderId::OpenAi => &self.openai,
            ProviderId::Anthropic => &self.anthropic,
            ProviderId::Gemini => &self.gemini,
        }
    }
}

fn non_empty<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn positive<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

fn millis<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_or(lookup, key, default)?))
}

fn parse_weights(raw: &str) -> Result<PriorityWeights, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue("PRIORITY_WEIGHTS".to_string(), reason);
    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|e| invalid(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [recency, owner, completion, efficiency] => {
            PriorityWeights::new(*recency, *owner, *completion, *efficiency).map_err(|e| invalid(e.to_string()))
        }
        _ => Err(invalid(format!(
            "expected 4 comma-separated weights, got {}",
            values.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000".parse().unwrap());
        assert!(config.database_url.is_none());
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.openai.api_key.is_none());
        assert_eq!(config.openai.model, "gpt-4o");
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert_eq!(config.scheduler_interval, Duration::from_secs(300));
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.anthropic.min_interval, Duration::from_millis(3000));
        assert_eq!(config.completion_threshold, None);
        assert_eq!(config.priority_weights, PriorityWeights::default());
        assert_eq!(config.min_content_length, 100);
    }

    #[test]
    fn blank_api_keys_leave_provider_unconfigured() {
        let config = config_from(&[("OPENAI_API_KEY", "  "), ("GEMINI_API_KEY", "g-key")]).unwrap();
        assert!(config.provider(ProviderId::OpenAi).api_key.is_none());
        assert_eq!(config.provider(ProviderId::Gemini).api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn custom_weights_must_sum_to_one() {
        let config = config_from(&[("PRIORITY_WEIGHTS", "0.25, 0.25, 0.25, 0.25")]).unwrap();
        assert_eq!(config.priority_weights.recency, 0.25);

        assert!(matches!(
            config_from(&[("PRIORITY_WEIGHTS", "0.5,0.5,0.5,0.5")]),
            Err(ConfigError::InvalidValue(key, _)) if key == "PRIORITY_WEIGHTS"
        ));
        assert!(config_from(&[("PRIORITY_WEIGHTS", "0.5,0.5")]).is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(matches!(
            config_from(&[("SCHEDULER_BATCH_SIZE", "0")]),
            Err(ConfigError::InvalidValue(key, _)) if key == "SCHEDULER_BATCH_SIZE"
        ));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        assert!(config_from(&[("RUST_LOG", "chatty")]).is_err());
    }

    #[test]
    fn completion_threshold_is_parsed() {
        let config = config_from(&[("COMPLETION_THRESHOLD", "2")]).unwrap();
        assert_eq!(config.completion_threshold, Some(2));
        assert!(config_from(&[("COMPLETION_THRESHOLD", "two")]).is_err());
    }
}
