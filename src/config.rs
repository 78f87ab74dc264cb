use anyhow::{bail, Context, Result};
use tokio::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub stream_url: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub reconnect_delay_ms: u64,
    pub alert_ttl_ms: u64,
    pub alert_grace_ms: u64,
    pub debounce_ms: u64,
    pub snapshot_limit: usize,
    /// 0 keeps every entry.
    pub ledger_capacity: usize,
    pub event_channel_capacity: usize,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let api_base = "http://localhost:8000".to_string();
        Self {
            stream_url: derive_stream_url(&api_base)
                .unwrap_or_else(|_| "ws://localhost:8000/fraud/stream".to_string()),
            api_base,
            token: None,
            username: None,
            password: None,
            reconnect_delay_ms: 3000,
            alert_ttl_ms: 5000,
            alert_grace_ms: 300,
            debounce_ms: 300,
            snapshot_limit: 50,
            ledger_capacity: 0,
            event_channel_capacity: 256,
            request_timeout_secs: 20,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Config::default();
        let api_base = std::env::var("FRAUD_API_BASE").unwrap_or(d.api_base);
        let stream_url = std::env::var("FRAUD_STREAM_URL")
            .ok()
            .or_else(|| derive_stream_url(&api_base).ok())
            .unwrap_or(d.stream_url);
        Self {
            api_base,
            stream_url,
            token: std::env::var("FRAUD_TOKEN").ok(),
            username: std::env::var("FRAUD_USER").ok(),
            password: std::env::var("FRAUD_PASSWORD").ok(),
            reconnect_delay_ms: std::env::var("RECONNECT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.reconnect_delay_ms),
            alert_ttl_ms: std::env::var("ALERT_TTL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.alert_ttl_ms),
            alert_grace_ms: std::env::var("ALERT_GRACE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.alert_grace_ms),
            debounce_ms: std::env::var("DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.debounce_ms),
            snapshot_limit: std::env::var("SNAPSHOT_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.snapshot_limit),
            ledger_capacity: std::env::var("LEDGER_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.ledger_capacity),
            event_channel_capacity: std::env::var("EVENT_CHANNEL_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.event_channel_capacity),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.request_timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let api = Url::parse(&self.api_base).with_context(|| format!("FRAUD_API_BASE: {}", self.api_base))?;
        if !matches!(api.scheme(), "http" | "https") {
            bail!("FRAUD_API_BASE must be http(s): {}", self.api_base);
        }
        let ws = Url::parse(&self.stream_url).with_context(|| format!("FRAUD_STREAM_URL: {}", self.stream_url))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            bail!("FRAUD_STREAM_URL must be ws(s): {}", self.stream_url);
        }
        if self.reconnect_delay_ms == 0 {
            bail!("RECONNECT_MS must be positive");
        }
        if self.debounce_ms == 0 {
            bail!("DEBOUNCE_MS must be positive");
        }
        if self.event_channel_capacity == 0 {
            bail!("EVENT_CHANNEL_CAP must be positive");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn alert_ttl(&self) -> Duration {
        Duration::from_millis(self.alert_ttl_ms)
    }

    pub fn alert_grace(&self) -> Duration {
        Duration::from_millis(self.alert_grace_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn ledger_capacity(&self) -> Option<usize> {
        (self.ledger_capacity > 0).then_some(self.ledger_capacity)
    }
}

/// `http://host:port/..` -> `ws://host:port/fraud/stream` (https -> wss).
pub fn derive_stream_url(api_base: &str) -> Result<String> {
    let mut url = Url::parse(api_base)?;
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("cannot derive stream url from {}", api_base))?;
    url.set_path("/fraud/stream");
    url.set_query(None);
    Ok(url.to_string())
}
