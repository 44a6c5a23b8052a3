//! Application state shared across routes

use std::sync::Arc;

use tracing::warn;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::game::RoomRegistry;
use crate::results::MatchResultReporter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    pub verifier: Arc<TokenVerifier>,
    pub reporter: Option<Arc<MatchResultReporter>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let verifier = Arc::new(TokenVerifier::new(
            config.jwks_url.clone(),
            config.token_issuer.clone(),
            config.service_id.clone(),
            config.jwks_cache_max_age,
            config.jwks_refresh_cooldown,
        ));

        // Result submission is optional; without the full signing triple the
        // match outcome is only delivered to clients.
        let reporter = match (
            config.api_url.clone(),
            config.service_id.clone(),
            config.signing_key_id.clone(),
            config.signing_secret.clone(),
        ) {
            (Some(api_url), Some(service_id), Some(key_id), Some(secret)) => Some(Arc::new(
                MatchResultReporter::new(api_url, service_id, key_id, secret),
            )),
            _ => {
                warn!("Result webhook disabled: API_URL/SERVICE_ID/SIGNING_* not fully configured");
                None
            }
        };

        Self {
            config,
            rooms: Arc::new(RoomRegistry::new()),
            verifier,
            reporter,
        }
    }
}
