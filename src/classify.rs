//! Labels completed upstream exchanges for the fallback loop.

use reqwest::StatusCode;
use serde::Deserialize;

/// Error `type` the upstream uses for rate limiting.
pub const RATE_LIMIT_ERROR_TYPE: &str = "rate_limit_exceeded";

/// Error `code` the upstream embeds in rate-limited 200 responses.
const RATE_LIMIT_ERROR_CODE: &str = "429";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Status 429.
    HardRateLimited,
    /// Status 200 carrying an embedded rate-limit error.
    SoftRateLimited,
}

impl Classification {
    pub fn is_rate_limited(self) -> bool {
        !matches!(self, Classification::Success)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<EmbeddedError>,
}

#[derive(Deserialize)]
struct EmbeddedError {
    #[serde(default, rename = "type")]
    kind: Option<serde_json::Value>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl EmbeddedError {
    fn is_rate_limit(&self) -> bool {
        let code_matches = self
            .code
            .as_ref()
            .and_then(|c| c.as_str())
            .is_some_and(|c| c == RATE_LIMIT_ERROR_CODE);
        let type_matches = self
            .kind
            .as_ref()
            .and_then(|t| t.as_str())
            .is_some_and(|t| t == RATE_LIMIT_ERROR_TYPE);
        code_matches || type_matches
    }
}

/// Classifies a completed exchange. Bodies that are empty or not JSON never
/// count as soft rate limits.
pub fn classify(status: StatusCode, body: &[u8]) -> Classification {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Classification::HardRateLimited;
    }

    if status == StatusCode::OK && has_embedded_rate_limit(body) {
        return Classification::SoftRateLimited;
    }

    Classification::Success
}

fn has_embedded_rate_limit(body: &[u8]) -> bool {
    serde_json::from_slice::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .is_some_and(|error| error.is_rate_limit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_str(status: u16, body: &str) -> Classification {
        classify(StatusCode::from_u16(status).unwrap(), body.as_bytes())
    }

    #[test]
    fn test_429_is_hard_rate_limited() {
        assert_eq!(classify_str(429, ""), Classification::HardRateLimited);
        assert_eq!(classify_str(429, r#"{"ok":true}"#), Classification::HardRateLimited);
    }

    #[test]
    fn test_embedded_type_is_soft_rate_limited() {
        assert_eq!(
            classify_str(200, r#"{"error":{"type":"rate_limit_exceeded"}}"#),
            Classification::SoftRateLimited
        );
    }

    #[test]
    fn test_embedded_string_code_is_soft_rate_limited() {
        assert_eq!(
            classify_str(200, r#"{"error":{"code":"429","message":"Too many requests"}}"#),
            Classification::SoftRateLimited
        );
    }

    #[test]
    fn test_numeric_code_is_not_soft_rate_limited() {
        assert_eq!(
            classify_str(200, r#"{"error":{"code":429}}"#),
            Classification::Success
        );
    }

    #[test]
    fn test_embedded_error_only_counts_on_200() {
        assert_eq!(
            classify_str(400, r#"{"error":{"type":"rate_limit_exceeded"}}"#),
            Classification::Success
        );
        assert_eq!(
            classify_str(201, r#"{"error":{"type":"rate_limit_exceeded"}}"#),
            Classification::Success
        );
    }

    #[test]
    fn test_normal_and_malformed_bodies_are_success() {
        assert_eq!(classify_str(200, r#"{"ok":true}"#), Classification::Success);
        assert_eq!(classify_str(200, "not json at all"), Classification::Success);
        assert_eq!(classify_str(200, ""), Classification::Success);
        assert_eq!(classify_str(200, "[1,2,3]"), Classification::Success);
        assert_eq!(classify_str(200, r#"{"error":"rate_limit_exceeded"}"#), Classification::Success);
        assert_eq!(classify_str(200, r#"{"error":null}"#), Classification::Success);
    }

    #[test]
    fn test_other_errors_are_success() {
        assert_eq!(
            classify_str(200, r#"{"error":{"type":"invalid_request_error","code":"400"}}"#),
            Classification::Success
        );
        assert_eq!(classify_str(500, "boom"), Classification::Success);
        assert_eq!(classify_str(401, r#"{"error":{"type":"auth"}}"#), Classification::Success);
    }

    #[test]
    fn test_is_rate_limited() {
        assert!(!Classification::Success.is_rate_limited());
        assert!(Classification::HardRateLimited.is_rate_limited());
        assert!(Classification::SoftRateLimited.is_rate_limited());
    }
}
