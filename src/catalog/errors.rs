//! Error types for the catalog client.

/// Number of body bytes carried along with an HTTP status failure.
const BODY_PREFIX_LEN: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("request to {path} failed with status {status}: {body_prefix}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
        body_prefix: String,
    },
    #[error("request to {path} returned an empty body")]
    EmptyBody { path: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl CatalogError {
    /// Builds a status error carrying the first 200 bytes of the body.
    pub fn status(path: &str, status: reqwest::StatusCode, body: &str) -> Self {
        CatalogError::Status {
            path: path.to_string(),
            status,
            body_prefix: truncate_to_bytes(body, BODY_PREFIX_LEN),
        }
    }
}

/// Cuts a string to at most `max` bytes without splitting a character.
fn truncate_to_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
