//! Signed match-result submission to the matchmaking API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::game::world::{EndReason, PlayerStats};

type HmacSha256 = Hmac<Sha256>;

const RESULTS_PATH: &str = "/games/direct/results";

/// Result record POSTed when a match terminates.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub winner_ids: Vec<String>,
    pub participants: Vec<String>,
    pub reason: EndReason,
    pub final_stats: BTreeMap<String, PlayerStats>,
    /// RFC 3339 UTC.
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid API URL: {0}")]
    Url(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

/// Submits signed results. One attempt per match end; the receiver
/// deduplicates on the idempotency key.
pub struct MatchResultReporter {
    client: reqwest::Client,
    api_url: String,
    service_id: String,
    key_id: String,
    secret: String,
}

impl MatchResultReporter {
    pub fn new(api_url: String, service_id: String, key_id: String, secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            service_id,
            key_id,
            secret,
        }
    }

    /// POST the result. Returns the decoded response body on 2xx.
    pub async fn submit(&self, result: &MatchResult) -> Result<serde_json::Value, WebhookError> {
        let body = serde_json::to_vec(result)?;
        let url = format!("{}{}", self.api_url.trim_end_matches('/'), RESULTS_PATH);
        let path = reqwest::Url::parse(&url)
            .map_err(|e| WebhookError::Url(e.to_string()))?
            .path()
            .to_string();

        let timestamp = Utc::now().timestamp();
        let canonical = canonical_string(timestamp, "POST", &path, &body);
        let signature = sign(&self.secret, &canonical);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Usion-Service-Id", &self.service_id)
            .header("X-Usion-Key-Id", &self.key_id)
            .header("X-Usion-Signature", signature)
            .header("X-Usion-Timestamp", timestamp.to_string())
            .header("X-Idempotency-Key", Uuid::new_v4().to_string())
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WebhookError::Api { status, body });
        }
        Ok(response.json().await?)
    }
}

/// `"<unix-seconds>\n<uppercase-method>\n<path>\n<hex sha256 of body>"`
fn canonical_string(timestamp: i64, method: &str, path: &str, body: &[u8]) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    format!(
        "{timestamp}\n{}\n{path}\n{body_hash}",
        method.to_uppercase()
    )
}

/// Hex keyed MAC of the canonical string.
fn sign(secret: &str, canonical: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_has_the_four_lines() {
        let canonical = canonical_string(1_700_000_000, "post", "/games/direct/results", b"{}");
        let lines: Vec<&str> = canonical.split('\n').collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "1700000000");
        assert_eq!(lines[1], "POST");
        assert_eq!(lines[2], "/games/direct/results");
        // sha256("{}") as lowercase hex.
        assert_eq!(lines[3].len(), 64);
        assert!(lines[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_is_stable_hex_over_the_same_inputs() {
        let canonical = canonical_string(1, "POST", "/p", b"x");
        let a = sign("secret", &canonical);
        let b = sign("secret", &canonical);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign("other-secret", &canonical));
    }

    #[test]
    fn result_body_serializes_with_rfc3339_ended_at() {
        let result = MatchResult {
            room_id: "room-1".to_string(),
            session_id: Some("sess-1".to_string()),
            winner_ids: vec!["a".to_string()],
            participants: vec!["a".to_string(), "b".to_string()],
            reason: EndReason::Elimination,
            final_stats: BTreeMap::new(),
            ended_at: DateTime::parse_from_rfc3339("2026-08-02T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["reason"], "elimination");
        assert_eq!(value["ended_at"], "2026-08-02T12:00:00Z");
        assert_eq!(value["winner_ids"], serde_json::json!(["a"]));
    }
}
