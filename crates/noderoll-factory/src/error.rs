use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to encode schematic: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("empty schematic ID returned")]
    EmptySchematicId,

    #[error("empty version returned from {0}")]
    EmptyVersion(String),

    #[error("invalid factory URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

pub type FactoryResult<T> = Result<T, FactoryError>;
