use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipeError>;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("catalog fetch failed: {0}")]
    CatalogFetch(String),

    #[error("invalid model id: {0:?}")]
    InvalidModelId(String),

    #[error("upstream returned status {status}: {body}")]
    UpstreamUnavailable {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("http error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for PipeError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for PipeError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedResponse(e.to_string())
    }
}
