use std::env;
use std::time::Duration;

use anyhow::Result;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;

/// Terminal configuration. Every interval is overridable so tests can run
/// with millisecond values.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub merchant_id: String,
    pub terminal_id: String,
    pub server_url: String,
    pub batch_number: String,
    /// Per-request timeout for every outbound call; exceeding it counts as
    /// a transport failure.
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Inclusive ceiling for offline approval.
    pub offline_limit: BigDecimal,
    pub heartbeat_interval: Duration,
    /// Shorter interval used after a failed heartbeat.
    pub heartbeat_retry_interval: Duration,
    pub sync_interval: Duration,
    pub notification_poll_interval: Duration,
    pub notification_error_backoff: Duration,
}

impl TerminalConfig {
    pub fn new(merchant_id: &str, terminal_id: &str, server_url: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            terminal_id: terminal_id.to_string(),
            server_url: server_url.to_string(),
            batch_number: "001".to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            offline_limit: default_offline_limit(),
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_retry_interval: Duration::from_secs(10),
            sync_interval: Duration::from_secs(30),
            notification_poll_interval: Duration::from_secs(5),
            notification_error_backoff: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        let merchant_id = env::var("TERMINAL_MERCHANT_ID")?;
        let terminal_id = env::var("TERMINAL_ID")?;
        let server_url =
            env::var("TERMINAL_SERVER_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());

        let mut config = Self::new(&merchant_id, &terminal_id, &server_url);

        if let Ok(batch) = env::var("TERMINAL_BATCH_NUMBER") {
            config.batch_number = batch;
        }
        if let Ok(secs) = env::var("TERMINAL_TIMEOUT_SECONDS") {
            config.request_timeout = Duration::from_secs(secs.parse()?);
        }
        if let Ok(retries) = env::var("TERMINAL_RETRY_ATTEMPTS") {
            config.max_retries = retries.parse()?;
        }
        if let Ok(secs) = env::var("TERMINAL_RETRY_DELAY_SECONDS") {
            config.retry_delay = Duration::from_secs(secs.parse()?);
        }
        if let Ok(limit) = env::var("TERMINAL_OFFLINE_LIMIT") {
            config.offline_limit = limit
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid TERMINAL_OFFLINE_LIMIT: {e}"))?;
        }
        if let Ok(secs) = env::var("TERMINAL_HEARTBEAT_INTERVAL_SECONDS") {
            config.heartbeat_interval = Duration::from_secs(secs.parse()?);
        }

        Ok(config)
    }
}

fn default_offline_limit() -> BigDecimal {
    BigDecimal::from(1000)
}
