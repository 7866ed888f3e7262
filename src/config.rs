use std::{path::PathBuf, time::Duration};

use crate::{auth::ClientProvider, AppResult};

/// Staleness windows per entity kind. The chat feed has none; the poller
/// keeps it current instead.
#[derive(Debug, Clone)]
pub struct Windows {
    pub profile: Duration,
    pub directory: Duration,
    pub role: Duration,
    pub verification: Duration,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            profile: Duration::from_secs(60),
            directory: Duration::from_secs(30),
            role: Duration::from_secs(60),
            verification: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Option<String>,
    pub call_timeout: Duration,
    pub poll_interval: Duration,
    pub windows: Windows,
    pub client_secret_path: Option<PathBuf>,
    pub oauth_provider: ClientProvider,
    pub callback_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            call_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(3),
            windows: Windows::default(),
            client_secret_path: None,
            oauth_provider: ClientProvider::Google,
            callback_port: 8080,
        }
    }
}

impl Config {
    /// Reads `MEMBERLINK_*` variables, loading `.env` first when present.
    pub fn from_env() -> AppResult<Config> {
        dotenv::dotenv().ok();

        let mut config = Config::default();
        if let Ok(endpoint) = dotenv::var("MEMBERLINK_ENDPOINT") {
            config.endpoint = Some(endpoint);
        }
        if let Some(timeout) = millis("MEMBERLINK_CALL_TIMEOUT_MS")? {
            config.call_timeout = timeout;
        }
        if let Some(interval) = millis("MEMBERLINK_POLL_INTERVAL_MS")? {
            config.poll_interval = interval;
        }
        if let Ok(path) = dotenv::var("MEMBERLINK_CLIENT_SECRET") {
            config.client_secret_path = Some(PathBuf::from(path));
        }
        if let Ok(provider) = dotenv::var("MEMBERLINK_OAUTH_PROVIDER") {
            config.oauth_provider = provider.parse()?;
        }
        if let Ok(port) = dotenv::var("MEMBERLINK_CALLBACK_PORT") {
            config.callback_port = port
                .parse()
                .map_err(|_| format!("MEMBERLINK_CALLBACK_PORT must be a port number, got {port}"))?;
        }

        Ok(config)
    }
}

fn millis(var: &str) -> AppResult<Option<Duration>> {
    let Ok(raw) = dotenv::var(var) else {
        return Ok(None);
    };
    let ms: u64 = raw
        .parse()
        .map_err(|_| format!("{var} must be a number of milliseconds, got {raw}"))?;
    Ok(Some(Duration::from_millis(ms)))
}
