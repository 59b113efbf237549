//! Error types for the study API client.
//!
//! # Design
//! Transport failures (the request never produced a response) and status
//! failures (the server answered outside 2xx) are distinct variants so the
//! presentation layer can word its notification differently. A status
//! failure displays as `"<status>: <reason>"`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by the client, the transport and the gateway.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network unreachable, DNS, TLS or any other failure before a response.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The server answered with a status outside 200..=299.
    #[error("{status}: {reason}")]
    Status {
        status: u16,
        reason: String,
        body: String,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The request payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The base URL or an endpoint path could not be turned into a URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Reading or writing persisted credentials failed.
    #[error("credential storage failed: {0}")]
    Storage(String),

    /// The card list could not be fetched.
    #[error("Could not retrieve cards from the server.")]
    CardRetrieval(#[source] Box<ApiError>),
}

impl ApiError {
    /// HTTP status of a status failure, looking through `CardRetrieval`.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::CardRetrieval(inner) => inner.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}
