use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::llm_client::ANTHROPIC_API_URL;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub llm_api_url: String,
    /// Budget for one judgment including retries, in seconds.
    pub llm_timeout_secs: u64,
    /// Timeout on a single HTTP attempt; must leave room to retry within the budget.
    pub llm_attempt_timeout_secs: u64,
    /// First retry delay for rate-limited or 5xx LLM calls; doubles per attempt.
    pub llm_retry_backoff_ms: u64,
    /// Default admission-gate size for a batch.
    pub screening_concurrency: usize,
    /// Upper bound for a per-request concurrency override.
    pub max_concurrency: usize,
    pub session_ttl_secs: u64,
    pub session_capacity: u64,
    /// Opening balance for accounts the ledger has not seen yet.
    pub free_credits: i64,
    /// Accounts on an unlimited plan, never debited.
    pub unlimited_accounts: Vec<String>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            llm_api_url: std::env::var("LLM_API_URL")
                .unwrap_or_else(|_| ANTHROPIC_API_URL.to_string()),
            llm_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 60)?,
            llm_attempt_timeout_secs: parse_env("LLM_ATTEMPT_TIMEOUT_SECS", 20)?,
            llm_retry_backoff_ms: parse_env("LLM_RETRY_BACKOFF_MS", 1000)?,
            screening_concurrency: parse_env("SCREENING_CONCURRENCY", 5)?,
            max_concurrency: parse_env("MAX_CONCURRENCY", 10)?,
            session_ttl_secs: parse_env("SESSION_TTL_SECS", 3600)?,
            session_capacity: parse_env("SESSION_CAPACITY", 1000)?,
            free_credits: parse_env("FREE_CREDITS", 3)?,
            unlimited_accounts: parse_list(&std::env::var("UNLIMITED_ACCOUNTS").unwrap_or_default()),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.screening_concurrency == 0 {
            bail!("SCREENING_CONCURRENCY must be at least 1");
        }
        if self.llm_attempt_timeout_secs == 0
            || self.llm_attempt_timeout_secs >= self.llm_timeout_secs
        {
            bail!(
                "LLM_ATTEMPT_TIMEOUT_SECS ({}) must be between 1 and LLM_TIMEOUT_SECS ({})",
                self.llm_attempt_timeout_secs,
                self.llm_timeout_secs
            );
        }
        if self.max_concurrency < self.screening_concurrency {
            bail!(
                "MAX_CONCURRENCY ({}) must not be below SCREENING_CONCURRENCY ({})",
                self.max_concurrency,
                self.screening_concurrency
            );
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
impl Config {
    /// Configuration used by handler and aggregator tests.
    pub fn for_tests() -> Self {
        Config {
            anthropic_api_key: "test-key".to_string(),
            llm_api_url: ANTHROPIC_API_URL.to_string(),
            llm_timeout_secs: 5,
            llm_attempt_timeout_secs: 2,
            llm_retry_backoff_ms: 10,
            screening_concurrency: 2,
            max_concurrency: 4,
            session_ttl_secs: 60,
            session_capacity: 16,
            free_credits: 3,
            unlimited_accounts: vec![],
            port: 0,
            rust_log: "debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = Config {
            screening_concurrency: 0,
            ..Config::for_tests()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cap_below_default_is_rejected() {
        let config = Config {
            screening_concurrency: 5,
            max_concurrency: 2,
            ..Config::for_tests()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("MAX_CONCURRENCY"), "got: {err}");
    }

    #[test]
    fn test_account_list_parsing() {
        assert_eq!(parse_list(" ops@acme.io, ,hr@acme.io "), vec!["ops@acme.io", "hr@acme.io"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_attempt_timeout_must_fit_in_call_budget() {
        let config = Config {
            llm_timeout_secs: 30,
            llm_attempt_timeout_secs: 30,
            ..Config::for_tests()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("LLM_ATTEMPT_TIMEOUT_SECS"), "got: {err}");
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(Config::for_tests().validate().is_ok());
    }
}
