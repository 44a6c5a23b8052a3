//! Access-token verification against the remote key set.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use tracing::debug;

use super::jwks::{JwksCache, KeySetError};

/// Audience claims are `"<prefix><service id>"`.
pub const AUDIENCE_PREFIX: &str = "usion-game-service:";

/// Accepted clock skew, seconds.
const CLOCK_SKEW_SECS: u64 = 60;

/// Raw claims carried by an access token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

/// Validated claims bound to a gateway session.
#[derive(Debug, Clone)]
pub struct AccessClaims {
    pub subject: String,
    pub room_id: String,
    pub session_id: String,
    pub service_id: String,
    pub expires_at: u64,
    pub issued_at: u64,
    pub permissions: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidToken {
    #[error("malformed token")]
    Malformed,

    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,

    #[error("token has no key id")]
    MissingKeyId,

    #[error("no matching key for kid {0}")]
    UnknownKey(String),

    #[error("signature verification failed")]
    Signature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("issuer mismatch")]
    IssuerMismatch,

    #[error("audience mismatch")]
    AudienceMismatch,

    #[error("service id missing")]
    MissingServiceId,

    #[error("missing play permission")]
    MissingPermission,

    #[error("missing session id")]
    MissingSessionId,

    #[error("missing room id")]
    MissingRoomId,

    #[error("room id mismatch")]
    RoomMismatch,

    #[error("key set unavailable: {0}")]
    KeySet(#[from] KeySetError),
}

impl InvalidToken {
    /// Failures that an upstream key rotation under the same kid can cause.
    fn is_rotation_signal(&self) -> bool {
        matches!(self, InvalidToken::UnknownKey(_) | InvalidToken::Signature)
    }
}

/// Per-call expectations for [`TokenVerifier::verify`].
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Overrides the verifier's configured service id.
    pub service_id: Option<String>,
    /// When set, the token's `room_id` must match exactly.
    pub expected_room_id: Option<String>,
}

pub struct TokenVerifier {
    jwks: JwksCache,
    expected_issuer: String,
    default_service_id: Option<String>,
}

impl TokenVerifier {
    pub fn new(
        jwks_url: String,
        expected_issuer: String,
        default_service_id: Option<String>,
        cache_max_age: Duration,
        refresh_cooldown: Duration,
    ) -> Self {
        Self {
            jwks: JwksCache::new(jwks_url, cache_max_age, refresh_cooldown),
            expected_issuer,
            default_service_id,
        }
    }

    /// Verify a token. On an unknown-key or bad-signature failure the key
    /// set is force-refreshed once and the token re-verified, which covers
    /// upstream rotation under an unchanged kid.
    pub async fn verify(
        &self,
        token: &str,
        opts: &VerifyOptions,
    ) -> Result<AccessClaims, InvalidToken> {
        match self.verify_once(token, opts).await {
            Err(error) if error.is_rotation_signal() => {
                debug!(%error, "Retrying verification after key-set refresh");
                self.jwks.force_refresh().await?;
                self.verify_once(token, opts).await
            }
            other => other,
        }
    }

    async fn verify_once(
        &self,
        token: &str,
        opts: &VerifyOptions,
    ) -> Result<AccessClaims, InvalidToken> {
        let header = decode_header(token).map_err(|_| InvalidToken::Malformed)?;
        if header.alg != Algorithm::RS256 {
            return Err(InvalidToken::UnsupportedAlgorithm);
        }
        let kid = header.kid.ok_or(InvalidToken::MissingKeyId)?;
        let key = self
            .jwks
            .key_for(&kid)
            .await?
            .ok_or_else(|| InvalidToken::UnknownKey(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = CLOCK_SKEW_SECS;
        validation.validate_aud = false;
        let data = decode::<TokenClaims>(token, &key, &validation).map_err(|error| {
            use jsonwebtoken::errors::ErrorKind;
            match error.kind() {
                ErrorKind::ExpiredSignature => InvalidToken::Expired,
                ErrorKind::ImmatureSignature => InvalidToken::NotYetValid,
                ErrorKind::InvalidSignature => InvalidToken::Signature,
                _ => InvalidToken::Malformed,
            }
        })?;

        let service_id = opts
            .service_id
            .clone()
            .or_else(|| self.default_service_id.clone());
        validate_claims(
            data.claims,
            &self.expected_issuer,
            service_id.as_deref(),
            opts.expected_room_id.as_deref(),
            now_secs(),
        )
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Claim-set enforcement, separated from signature checking so the rules
/// stay testable without key material.
fn validate_claims(
    claims: TokenClaims,
    expected_issuer: &str,
    service_id: Option<&str>,
    expected_room_id: Option<&str>,
    now: u64,
) -> Result<AccessClaims, InvalidToken> {
    if claims.iss.as_deref() != Some(expected_issuer) {
        return Err(InvalidToken::IssuerMismatch);
    }

    // The service id comes from the caller, or failing that from the
    // token's own claim.
    let service_id = match service_id {
        Some(id) => id.to_string(),
        None => claims
            .service_id
            .clone()
            .ok_or(InvalidToken::MissingServiceId)?,
    };
    let expected_aud = format!("{AUDIENCE_PREFIX}{service_id}");
    if claims.aud.as_deref() != Some(expected_aud.as_str()) {
        return Err(InvalidToken::AudienceMismatch);
    }

    if !claims.permissions.iter().any(|p| p == "play") {
        return Err(InvalidToken::MissingPermission);
    }

    let session_id = claims
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or(InvalidToken::MissingSessionId)?;
    let room_id = claims
        .room_id
        .clone()
        .filter(|r| !r.is_empty())
        .ok_or(InvalidToken::MissingRoomId)?;
    if let Some(expected) = expected_room_id {
        if room_id != expected {
            return Err(InvalidToken::RoomMismatch);
        }
    }

    if claims.iat > now + CLOCK_SKEW_SECS {
        return Err(InvalidToken::NotYetValid);
    }

    Ok(AccessClaims {
        subject: claims.sub,
        room_id,
        session_id,
        service_id,
        expires_at: claims.exp,
        issued_at: claims.iat,
        permissions: claims.permissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> TokenClaims {
        TokenClaims {
            sub: "user-1".to_string(),
            room_id: Some("room-1".to_string()),
            session_id: Some("sess-1".to_string()),
            service_id: Some("svc-1".to_string()),
            iss: Some("usion-api".to_string()),
            aud: Some("usion-game-service:svc-1".to_string()),
            permissions: vec!["play".to_string()],
            exp: 2_000_000_000,
            iat: 1_000,
        }
    }

    const NOW: u64 = 1_500;

    #[test]
    fn valid_claims_pass_and_bind_the_session() {
        let out = validate_claims(claims(), "usion-api", Some("svc-1"), Some("room-1"), NOW)
            .expect("valid claims");
        assert_eq!(out.subject, "user-1");
        assert_eq!(out.room_id, "room-1");
        assert_eq!(out.session_id, "sess-1");
        assert_eq!(out.service_id, "svc-1");
    }

    #[test]
    fn issuer_must_match() {
        let err = validate_claims(claims(), "someone-else", Some("svc-1"), None, NOW).unwrap_err();
        assert!(matches!(err, InvalidToken::IssuerMismatch));
    }

    #[test]
    fn audience_is_prefix_plus_service_id() {
        let err = validate_claims(claims(), "usion-api", Some("svc-2"), None, NOW).unwrap_err();
        assert!(matches!(err, InvalidToken::AudienceMismatch));
    }

    #[test]
    fn service_id_falls_back_to_the_token_claim() {
        let out = validate_claims(claims(), "usion-api", None, None, NOW).expect("inferred");
        assert_eq!(out.service_id, "svc-1");

        let mut anonymous = claims();
        anonymous.service_id = None;
        let err = validate_claims(anonymous, "usion-api", None, None, NOW).unwrap_err();
        assert!(matches!(err, InvalidToken::MissingServiceId));
    }

    #[test]
    fn play_permission_is_required() {
        let mut stripped = claims();
        stripped.permissions = vec!["observe".to_string()];
        let err = validate_claims(stripped, "usion-api", Some("svc-1"), None, NOW).unwrap_err();
        assert!(matches!(err, InvalidToken::MissingPermission));
    }

    #[test]
    fn session_id_must_be_present_and_non_empty() {
        let mut missing = claims();
        missing.session_id = Some(String::new());
        let err = validate_claims(missing, "usion-api", Some("svc-1"), None, NOW).unwrap_err();
        assert!(matches!(err, InvalidToken::MissingSessionId));
    }

    #[test]
    fn expected_room_id_is_enforced_exactly() {
        let err =
            validate_claims(claims(), "usion-api", Some("svc-1"), Some("room-9"), NOW).unwrap_err();
        assert!(matches!(err, InvalidToken::RoomMismatch));
    }

    #[test]
    fn iat_beyond_skew_is_rejected() {
        let mut future = claims();
        future.iat = NOW + CLOCK_SKEW_SECS + 1;
        let err = validate_claims(future, "usion-api", Some("svc-1"), None, NOW).unwrap_err();
        assert!(matches!(err, InvalidToken::NotYetValid));

        let mut skewed = claims();
        skewed.iat = NOW + CLOCK_SKEW_SECS;
        assert!(validate_claims(skewed, "usion-api", Some("svc-1"), None, NOW).is_ok());
    }

    #[test]
    fn rotation_signals_are_the_retry_set() {
        assert!(InvalidToken::UnknownKey("k1".to_string()).is_rotation_signal());
        assert!(InvalidToken::Signature.is_rotation_signal());
        assert!(!InvalidToken::Expired.is_rotation_signal());
        assert!(!InvalidToken::IssuerMismatch.is_rotation_signal());
    }
}
