//! HTTP client for the upstream document source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, instrument};

use crate::application::repos::{DocumentSource, SourceError};

pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches `<base_url>/<source name>` and returns the body as HTML.
#[derive(Clone, Debug)]
pub struct HttpDocumentSource {
    client: Client,
    base: Url,
}

impl HttpDocumentSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let base = Url::parse(base_url)
            .map_err(|err| SourceError::Configuration(format!("invalid base url `{base_url}`: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(SourceError::Configuration(format!(
                "base url `{base_url}` cannot carry a path"
            )));
        }
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| SourceError::Configuration(err.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("pinfall/", env!("CARGO_PKG_VERSION"))
    }

    fn url(&self, name: &str) -> Result<Url, SourceError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| SourceError::Configuration("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(name);
        Ok(url)
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    #[instrument(skip(self))]
    async fn fetch(&self, name: &str) -> Result<String, SourceError> {
        let url = self.url(name)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| SourceError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound {
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                name: name.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Transport(err.to_string()))?;
        if body.trim().is_empty() {
            return Err(SourceError::Empty {
                name: name.to_string(),
            });
        }

        debug!(bytes = body.len(), "Fetched document from source");
        Ok(body)
    }
}
