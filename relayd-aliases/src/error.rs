use thiserror::Error;

/// Errors raised while retrieving the alias listing.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("Unable to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request failed before a complete response was read.
    #[error("Failed to fetch aliases from {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with something other than 200 OK.
    #[error("Failed to fetch aliases from {url}: status {status}")]
    Status { url: String, status: u16 },

    /// The listing held no usable records.
    #[error("Alias listing contained no records")]
    Empty,

    /// Any other source-specific failure.
    #[error("Failed to fetch aliases: {0}")]
    Other(String),
}

pub type FetchResult<T> = Result<T, FetchError>;
