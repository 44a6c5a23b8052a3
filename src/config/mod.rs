//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Expected audience suffix and outgoing service id
    pub service_id: Option<String>,
    /// Expected token issuer
    pub token_issuer: String,
    /// Key-set endpoint (derived from API_URL when unset)
    pub jwks_url: String,
    /// Key-set cache max age before a refetch
    pub jwks_cache_max_age: Duration,
    /// Minimum spacing between key-set fetches
    pub jwks_refresh_cooldown: Duration,

    /// Base URL for match-result webhook submission
    pub api_url: Option<String>,
    /// Webhook key id header value
    pub signing_key_id: Option<String>,
    /// Webhook MAC secret
    pub signing_secret: Option<String>,

    /// Simulation rate in ticks per second
    pub sim_tick_hz: u32,
    /// Network broadcast rate in ticks per second
    pub network_hz: u32,
    /// Full snapshot period, in network ticks
    pub full_snapshot_interval_net_ticks: u32,
    /// Region label attached to the deploy profile of every frame
    pub deploy_region: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => 3000,
        };
        let server_addr: SocketAddr = format!("0.0.0.0:{port}")
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let api_url = env::var("API_URL").ok().filter(|v| !v.is_empty());
        let jwks_url = match env::var("JWKS_URL").ok().filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => match &api_url {
                Some(base) => format!("{}/.well-known/jwks.json", base.trim_end_matches('/')),
                None => return Err(ConfigError::Missing("JWKS_URL")),
            },
        };

        let sim_tick_hz = parse_hz("SIM_TICK_HZ", 60)?;
        let network_hz = parse_hz("NETWORK_HZ", 60)?;
        let full_snapshot_interval_net_ticks = match env::var("FULL_SNAPSHOT_INTERVAL_NET_TICKS") {
            Ok(raw) => raw
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber("FULL_SNAPSHOT_INTERVAL_NET_TICKS"))?,
            Err(_) => network_hz,
        };

        Ok(Self {
            server_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            service_id: env::var("SERVICE_ID").ok().filter(|v| !v.is_empty()),
            token_issuer: env::var("TOKEN_ISSUER").unwrap_or_else(|_| "usion-api".to_string()),
            jwks_url,
            jwks_cache_max_age: Duration::from_millis(parse_ms("JWKS_CACHE_MAX_AGE_MS", 300_000)?),
            jwks_refresh_cooldown: Duration::from_millis(parse_ms(
                "JWKS_REFRESH_COOLDOWN_MS",
                1_000,
            )?),

            api_url,
            signing_key_id: env::var("SIGNING_KEY_ID").ok().filter(|v| !v.is_empty()),
            signing_secret: env::var("SIGNING_SECRET").ok().filter(|v| !v.is_empty()),

            sim_tick_hz,
            network_hz,
            full_snapshot_interval_net_ticks,
            deploy_region: env::var("DEPLOY_REGION").unwrap_or_else(|_| "local".to_string()),
        })
    }

    /// Simulation ticks between network frames, at least one.
    pub fn net_tick_interval(&self) -> u64 {
        (self.sim_tick_hz / self.network_hz.max(1)).max(1) as u64
    }
}

fn parse_hz(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or(ConfigError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

fn parse_ms(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid numeric value for {0}")]
    InvalidNumber(&'static str),
}
