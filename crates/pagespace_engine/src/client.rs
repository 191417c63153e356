use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use pagespace_core::Credentials;
use pagespace_logging::{ps_debug, ps_warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;
use url::Url;

use crate::{FailureKind, FetchError, FetchedPage, PageDescriptor};

const PAGES_API_PATH: &str = "/_api/pages?status=200";

/// Body of a resource, delivered chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    /// Upper bound for one page body; resources are streamed and unbounded.
    pub max_page_bytes: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_page_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("page list request failed: {0}")]
    Request(FetchError),
    #[error("page list request returned http status {status}")]
    Status { status: u16 },
    #[error("page list response is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub enum ResourceFetch {
    Available(ByteStream),
    /// The host answered with a non-2xx status.
    Unavailable { status: u16 },
}

impl fmt::Debug for ResourceFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceFetch::Available(_) => f.write_str("Available(..)"),
            ResourceFetch::Unavailable { status } => {
                f.debug_struct("Unavailable").field("status", status).finish()
            }
        }
    }
}

/// Remote side of an export: the pages API and the content host serving
/// rendered pages and their resources.
#[async_trait::async_trait]
pub trait ContentClient: Send + Sync {
    /// Authenticated listing of all published pages.
    async fn list_pages(&self) -> Result<Vec<PageDescriptor>, ApiError>;

    async fn fetch_page(&self, page_url: &str) -> Result<FetchedPage, FetchError>;

    /// Fetch one resource, resolved against the host. A non-2xx answer is not an
    /// error but [`ResourceFetch::Unavailable`].
    async fn fetch_resource(&self, reference: &str) -> Result<ResourceFetch, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestContentClient {
    client: reqwest::Client,
    host: Url,
    credentials: Credentials,
    settings: ClientSettings,
}

impl ReqwestContentClient {
    pub fn new(
        host: Url,
        credentials: Credentials,
        settings: ClientSettings,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            client,
            host,
            credentials,
            settings,
        })
    }

    /// `{host}{path}` by concatenation, so a host with a path prefix keeps it.
    fn host_url(&self, path: &str) -> Result<Url, FetchError> {
        let host = self.host.as_str().trim_end_matches('/');
        let separator = if path.starts_with('/') { "" } else { "/" };
        Url::parse(&format!("{host}{separator}{path}"))
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))
    }
}

#[async_trait::async_trait]
impl ContentClient for ReqwestContentClient {
    async fn list_pages(&self) -> Result<Vec<PageDescriptor>, ApiError> {
        let url = self.host_url(PAGES_API_PATH).map_err(ApiError::Request)?;
        ps_debug!("Requesting page list from {}", url);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .basic_auth(self.credentials.user(), Some(self.credentials.password()))
            .send()
            .await
            .map_err(|err| ApiError::Request(map_reqwest_error(err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| ApiError::Request(map_reqwest_error(err)))?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn fetch_page(&self, page_url: &str) -> Result<FetchedPage, FetchError> {
        let url = self.host_url(page_url)?;
        ps_debug!("Requesting {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let max_bytes = self.settings.max_page_bytes;
        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(content_len),
                    },
                    "page too large",
                ));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut html = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = html.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(next_len),
                    },
                    "page too large",
                ));
            }
            html.extend_from_slice(&chunk);
        }
        ps_debug!("Received {} bytes for {}", html.len(), page_url);

        Ok(FetchedPage {
            url: page_url.to_string(),
            html,
            content_type,
        })
    }

    async fn fetch_resource(&self, reference: &str) -> Result<ResourceFetch, FetchError> {
        let url = self
            .host
            .join(reference.trim())
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        ps_debug!("Fetching resource {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            ps_warn!("Could not fetch {}: http status {}", url, status.as_u16());
            return Ok(ResourceFetch::Unavailable {
                status: status.as_u16(),
            });
        }

        Ok(ResourceFetch::Available(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(map_reqwest_error))
                .boxed(),
        ))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
