use thiserror::Error;

/// Classified backend failure.
///
/// Every transport error is mapped into one of these four variants at the
/// client boundary, so callers branch on the variant and never on message
/// text. `NotFound` covers both missing rows and missing tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Backend unavailable: {0}")]
    Transient(String),

    #[error("Backend error: {0}")]
    Unknown(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// PostgREST / Postgres codes meaning "no such row or table".
const NOT_FOUND_CODES: &[&str] = &["PGRST116", "PGRST205", "42P01"];

/// PostgREST codes for JWT and permission failures.
const UNAUTHORIZED_CODES: &[&str] = &["PGRST301", "PGRST302", "42501"];

/// Message fragments that signal a missing table when no code is present.
const NOT_FOUND_SIGNATURES: &[&str] = &["could not find the table", "no such table", "not found"];

impl RemoteError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify an HTTP status and response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            401 | 403 => RemoteError::Unauthorized(truncated),
            404 => RemoteError::NotFound(truncated),
            408 | 429 => RemoteError::Transient(truncated),
            500..=599 => RemoteError::Transient(truncated),
            _ => Self::from_code(None, body).unwrap_or_else(|| {
                RemoteError::Unknown(format!("Status {}: {}", status, truncated))
            }),
        }
    }

    /// Classify a backend error code and message pair, as found in a
    /// PostgREST error body. Returns `None` when nothing matches.
    pub fn from_code(code: Option<&str>, message: &str) -> Option<Self> {
        let truncated = Self::truncate_body(message);
        if let Some(code) = code {
            if NOT_FOUND_CODES.contains(&code) {
                return Some(RemoteError::NotFound(truncated));
            }
            if UNAUTHORIZED_CODES.contains(&code) {
                return Some(RemoteError::Unauthorized(truncated));
            }
        }
        let lower = message.to_lowercase();
        if NOT_FOUND_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
            return Some(RemoteError::NotFound(truncated));
        }
        if lower.contains("jwt") {
            return Some(RemoteError::Unauthorized(truncated));
        }
        None
    }

    /// Classify a PostgREST error body (`{"code": .., "message": ..}`).
    pub fn from_body(status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct PostgrestErrorBody {
            code: Option<String>,
            message: Option<String>,
        }

        if let Ok(parsed) = serde_json::from_str::<PostgrestErrorBody>(body) {
            let message = parsed.message.unwrap_or_else(|| body.to_string());
            if let Some(err) = Self::from_code(parsed.code.as_deref(), &message) {
                return err;
            }
        }
        Self::from_status(status, body)
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_decode() {
            RemoteError::Unknown(format!("Invalid response: {}", err))
        } else {
            RemoteError::Transient(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(RemoteError::from_status(401, ""), RemoteError::Unauthorized(_)));
        assert!(matches!(RemoteError::from_status(403, ""), RemoteError::Unauthorized(_)));
        assert!(matches!(RemoteError::from_status(404, ""), RemoteError::NotFound(_)));
        assert!(matches!(RemoteError::from_status(429, ""), RemoteError::Transient(_)));
        assert!(matches!(RemoteError::from_status(503, ""), RemoteError::Transient(_)));
        assert!(matches!(RemoteError::from_status(418, "teapot"), RemoteError::Unknown(_)));
    }

    #[test]
    fn test_missing_table_is_not_found() {
        let body = r#"{"code":"PGRST205","message":"Could not find the table 'public.user_visits' in the schema cache"}"#;
        assert!(RemoteError::from_body(404, body).is_not_found());

        // Same signature without a code, on a non-404 status.
        let body = r#"{"message":"Could not find the table 'public.user_visits'"}"#;
        assert!(RemoteError::from_body(400, body).is_not_found());

        let body = r#"{"code":"42P01","message":"relation \"user_visits\" does not exist"}"#;
        assert!(RemoteError::from_body(400, body).is_not_found());
    }

    #[test]
    fn test_jwt_errors_are_unauthorized() {
        let body = r#"{"code":"PGRST301","message":"JWT expired"}"#;
        assert!(matches!(RemoteError::from_body(400, body), RemoteError::Unauthorized(_)));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 50);
        let truncated = RemoteError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(RemoteError::Transient("timeout".into()).is_transient());
        assert!(!RemoteError::NotFound("t".into()).is_transient());
        assert!(!RemoteError::Unknown("t".into()).is_transient());
    }
}
