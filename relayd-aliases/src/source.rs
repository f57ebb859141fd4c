use std::time::Duration;

use async_trait::async_trait;
use relayd_common::internal;

use crate::{
    error::{FetchError, FetchResult},
    record::{AliasRecord, parse_listing},
};

/// Anything that can produce a fresh alias listing.
#[async_trait]
pub trait AliasSource: Send + Sync {
    /// Retrieves and parses the complete listing.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when the listing could not be retrieved; the
    /// caller keeps whatever table it already has. An empty listing is not
    /// an error here.
    async fn fetch(&self) -> FetchResult<Vec<AliasRecord>>;
}

/// Fetches the alias listing with a plain HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpAliasSource {
    url: String,
    client: reqwest::Client,
}

impl HttpAliasSource {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be initialised.
    pub fn new(url: impl Into<String>) -> FetchResult<Self> {
        Self::with_timeout(url, Self::DEFAULT_TIMEOUT)
    }

    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be initialised.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl AliasSource for HttpAliasSource {
    #[tracing::instrument(level = "debug", skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> FetchResult<Vec<AliasRecord>> {
        let transport = |source| FetchError::Transport {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(transport)?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(transport)?;
        let records = parse_listing(&body);

        internal!(level = INFO, "fetched {} aliases", records.len());

        Ok(records)
    }
}
