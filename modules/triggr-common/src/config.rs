use std::env;

use anyhow::{Context, Result};

/// Node configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the sled database. Created if absent.
    pub data_dir: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    /// Substrate-style chain RPC endpoint (ws:// or wss://). Empty disables
    /// the ingester, which keeps the HTTP/WS surface usable in dev.
    pub chain_url: String,

    /// HS256 secret the external identity provider signs console JWTs with.
    pub console_jwt_secret: String,

    // Budgets and timeouts
    pub request_timeout_secs: u64,
    pub trigger_budget_ms: u64,
    pub ws_write_timeout_secs: u64,

    // Queue sizing
    pub subscriber_queue_len: usize,
    pub intake_queue_len: usize,

    /// Requests per minute allowed per API key. 0 = unlimited.
    pub rate_limit_per_min: u32,
}

impl Config {
    /// Load configuration from environment variables. Missing required vars
    /// or unparsable numbers are startup errors (exit code 1), not panics.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            data_dir: env::var("TRIGGR_DATA_DIR").unwrap_or_else(|_| "./triggr-data".to_string()),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: parsed_env("WEB_PORT", 8900)?,
            chain_url: env::var("CHAIN_URL").unwrap_or_default(),
            console_jwt_secret: required_env("CONSOLE_JWT_SECRET")?,
            request_timeout_secs: parsed_env("REQUEST_TIMEOUT_SECS", 30)?,
            trigger_budget_ms: parsed_env("TRIGGER_BUDGET_MS", 2_000)?,
            ws_write_timeout_secs: parsed_env("WS_WRITE_TIMEOUT_SECS", 5)?,
            subscriber_queue_len: parsed_env("SUBSCRIBER_QUEUE_LEN", 256)?,
            intake_queue_len: parsed_env("INTAKE_QUEUE_LEN", 1_024)?,
            rate_limit_per_min: parsed_env("RATE_LIMIT_PER_MIN", 0)?,
        })
    }

    /// Log each sensitive var's length, never its value.
    pub fn log_redacted(&self) {
        let vars = [("CONSOLE_JWT_SECRET", &self.console_jwt_secret)];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
        tracing::info!(
            data_dir = %self.data_dir,
            chain_url = %if self.chain_url.is_empty() { "(disabled)" } else { &self.chain_url },
            "configuration loaded"
        );
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
