use serde::Deserialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Library-wide error type. Auth and input conditions get their own
/// variants so callers can match on them (e.g. trigger a fresh login on
/// `NotLoggedIn` instead of printing a raw HTTP failure).
#[derive(Debug, Error)]
pub enum Error {
    #[error("not logged in (missing token); run mixdown login")]
    NotLoggedIn,

    #[error("access token expired and no refresh token present; run mixdown login")]
    MissingRefreshToken,

    #[error("access token expired and no refresher configured")]
    NoRefresher,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("no playlists matched pattern")]
    NoPlaylistsMatched,

    #[error("delete playlist {id}: permission denied")]
    PermissionDenied { id: String },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("login timed out waiting for the browser redirect")]
    LoginTimeout,

    #[error("authorization failed: {0}")]
    AuthDenied(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Structured error for any non-2xx API response, carrying the status and
/// the message from the provider's error envelope when one was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "spotify api error: http {}", self.status)
        } else {
            write!(f, "spotify api error: http {}: {}", self.status, self.message)
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorEnvelope {
    #[serde(default)]
    error: ApiErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    message: String,
}

/// Decode the provider's `{"error": {"status", "message"}}` envelope,
/// falling back to the bare HTTP status when the body is missing or not
/// parsable as the envelope.
pub fn decode_api_error(body: &[u8], fallback_status: u16) -> ApiError {
    if let Ok(env) = serde_json::from_slice::<ApiErrorEnvelope>(body) {
        if env.error.status != 0 || !env.error.message.is_empty() {
            let status = if env.error.status != 0 {
                env.error.status
            } else {
                fallback_status
            };
            return ApiError {
                status,
                message: env.error.message,
            };
        }
    }
    ApiError {
        status: fallback_status,
        message: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_envelope() {
        let body = br#"{"error": {"status": 404, "message": "Not found"}}"#;
        let e = decode_api_error(body, 500);
        assert_eq!(e.status, 404);
        assert_eq!(e.message, "Not found");
    }

    #[test]
    fn falls_back_on_garbage_body() {
        let e = decode_api_error(b"<html>oops</html>", 502);
        assert_eq!(e.status, 502);
        assert!(e.message.is_empty());
        assert_eq!(e.to_string(), "spotify api error: http 502");
    }

    #[test]
    fn falls_back_status_when_envelope_has_message_only() {
        let body = br#"{"error": {"message": "nope"}}"#;
        let e = decode_api_error(body, 403);
        assert_eq!(e.status, 403);
        assert_eq!(e.message, "nope");
    }
}
