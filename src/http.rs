//! HTTP collaborator used for direct communication with the peer.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_MAX_BODY_SIZE: usize = 100 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("unexpected content type from {url}: {content_type}")]
    ContentType { url: String, content_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub max_redirects: usize,
    pub max_body_size: usize,
    /// Fail unless the response `Content-Type` starts with this value.
    pub content_type: Option<String>,
    pub use_cache: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            content_type: None,
            use_cache: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub final_uri: String,
    /// The body was truncated at `max_body_size`.
    pub body_size_exceeded: bool,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// # Errors
    ///
    /// Returns an error on transport failure; HTTP error statuses are responses.
    async fn get(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, FetchError>;

    /// # Errors
    ///
    /// Returns an error on transport failure.
    async fn head(&self, url: &str, options: &RequestOptions)
        -> Result<HttpResponse, FetchError>;

    /// POST `fields` as `application/x-www-form-urlencoded`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    async fn post(
        &self,
        url: &str,
        fields: &[(String, String)],
        options: &RequestOptions,
    ) -> Result<HttpResponse, FetchError>;
}

/// [`HttpFetcher`] backed by a `reqwest` client. Connect timeout and the
/// redirect limit are fixed at construction; the rest applies per request.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// # Errors
    ///
    /// Returns an error if the client cannot be constructed.
    pub fn new(user_agent: &str, options: &RequestOptions) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(options.connect_timeout)
            .timeout(options.socket_timeout)
            .redirect(reqwest::redirect::Policy::limited(options.max_redirects))
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
        options: &RequestOptions,
    ) -> Result<HttpResponse, FetchError> {
        let request_error = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut request = request.timeout(options.socket_timeout);
        if !options.use_cache {
            request = request.header(reqwest::header::CACHE_CONTROL, "no-cache");
        }
        let mut response = request.send().await.map_err(request_error)?;

        let status = response.status().as_u16();
        let final_uri = response.url().to_string();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();

        if let Some(expected) = &options.content_type {
            let actual = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !actual.starts_with(expected.as_str()) {
                return Err(FetchError::ContentType {
                    url: url.to_string(),
                    content_type: actual.to_string(),
                });
            }
        }

        let mut body = Vec::new();
        let mut body_size_exceeded = false;
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            let room = options.max_body_size.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                body_size_exceeded = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        debug!(status, bytes = body.len(), body_size_exceeded, "received response");
        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            final_uri,
            body_size_exceeded,
        })
    }
}

fn parse_url(url: &str) -> Result<reqwest::Url, FetchError> {
    reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, FetchError> {
        let target = parse_url(url)?;
        let span = info_span!("openid.http", http.method = "GET", url);
        self.send(url, self.client.get(target), options)
            .instrument(span)
            .await
    }

    async fn head(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, FetchError> {
        let target = parse_url(url)?;
        let span = info_span!("openid.http", http.method = "HEAD", url);
        self.send(url, self.client.head(target), options)
            .instrument(span)
            .await
    }

    async fn post(
        &self,
        url: &str,
        fields: &[(String, String)],
        options: &RequestOptions,
    ) -> Result<HttpResponse, FetchError> {
        let target = parse_url(url)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        let request = self
            .client
            .post(target)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body);
        let span = info_span!("openid.http", http.method = "POST", url);
        self.send(url, request, options).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let options = RequestOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.max_redirects, 10);
        assert_eq!(options.max_body_size, 100 * 1024);
        assert!(options.content_type.is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            ..HttpResponse::default()
        };
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.header("location"), None);
    }

    #[tokio::test]
    async fn invalid_url_is_reported() {
        let fetcher = ReqwestFetcher::new("openid-test", &RequestOptions::default());
        let Ok(fetcher) = fetcher else {
            return;
        };
        let result = fetcher.get("not a url", &RequestOptions::default()).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
