use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hiveworks_types::{Method, Request};

use crate::proxy::ProxyConfig;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "User-Agent",
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/124.0.0.0 Safari/537.36",
        ),
    );
    headers.insert(
        "Accept",
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
    headers
}

/// Terminal fetch error, recorded verbatim as a request's `last_error` once
/// retries are exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("请求超时")]
    Timeout,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{kind}: {message}")]
    Other { kind: String, message: String },
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::Status(status.as_u16());
        }
        let kind = if err.is_connect() {
            "connect"
        } else if err.is_request() {
            "request"
        } else if err.is_decode() {
            "decode"
        } else {
            "error"
        };
        Self::Other {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }

    /// 4xx status errors are never retried; everything else is, up to the
    /// caller's retry budget.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status(code) => !(400..500).contains(code),
            Self::Cancelled => false,
            _ => true,
        }
    }
}

/// A successful fetch: status, response headers, and body bytes.
pub struct FetchedResponse {
    pub status: u16,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Vec<u8>,
}

/// What a single [`HttpFetcher::fetch`] call produces: the response on
/// success, or the last terminal error once the retry budget is spent.
pub enum FetchOutcome {
    Response(FetchedResponse),
    Failed(FetchError),
}

/// Linear retry backoff: `base * (attempt + 1)`, up to `max_retries`
/// additional attempts beyond the first. 4xx responses are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }
}

/// A single request in, a single response (or terminal error) out. One
/// client per fetcher instance; the proxy (if any) and default headers
/// apply uniformly to every request issued through it.
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(retry: RetryPolicy) -> Result<Self, FetchError> {
        Self::with_proxy(retry, None)
    }

    pub fn with_proxy(retry: RetryPolicy, proxy: Option<ProxyConfig>) -> Result<Self, FetchError> {
        let mut builder = ClientBuilder::new()
            .default_headers(default_headers())
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy) = proxy {
            let proxy = proxy.to_reqwest().map_err(|e| FetchError::Other {
                kind: "proxy".to_string(),
                message: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| FetchError::Other {
            kind: "client_build".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { client, retry })
    }

    /// Fetch `request`, retrying per [`RetryPolicy`] on transient failures.
    /// `cancel` is observed between attempts and during the backoff sleep,
    /// never mid-flight.
    pub async fn fetch(&self, request: &Request, cancel: &CancellationToken) -> FetchOutcome {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return FetchOutcome::Failed(FetchError::Cancelled);
            }

            match self.fetch_once(request).await {
                Ok(response) => return FetchOutcome::Response(response),
                Err(err) => {
                    let retryable = err.is_retryable();
                    warn!(url = %request.url, attempt, retryable, error = %err, "fetch attempt failed");

                    if !retryable || attempt >= self.retry.max_retries {
                        return FetchOutcome::Failed(err);
                    }

                    let delay = self.retry.delay_for(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return FetchOutcome::Failed(FetchError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(&self, request: &Request) -> Result<FetchedResponse, FetchError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Patch => reqwest::Method::PATCH,
            Method::Options => reqwest::Method::OPTIONS,
        };

        let mut builder = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                builder = builder.header(name, val);
            }
        }

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() && !status.is_redirection() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let bytes = response.bytes().await.map_err(FetchError::from_reqwest)?;
        debug!(url = %request.url, status = status.as_u16(), len = bytes.len(), "fetched");
        Ok(FetchedResponse {
            status: status.as_u16(),
            headers,
            body: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiveworks_types::Request;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_successful_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(RetryPolicy::default()).unwrap();
        let request = Request::new(format!("{}/ok", server.uri()));
        let cancel = CancellationToken::new();

        match fetcher.fetch(&request, &cancel).await {
            FetchOutcome::Response(r) => assert_eq!(r.body, b"hello"),
            FetchOutcome::Failed(e) => panic!("unexpected failure: {e}"),
        }
    }

    #[tokio::test]
    async fn does_not_retry_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        })
        .unwrap();
        let request = Request::new(format!("{}/missing", server.uri()));
        let cancel = CancellationToken::new();

        match fetcher.fetch(&request, &cancel).await {
            FetchOutcome::Failed(FetchError::Status(404)) => {}
            other => panic!("expected Status(404), got something else: {}", matches!(other, FetchOutcome::Response(_))),
        }
    }

    #[tokio::test]
    async fn retries_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        })
        .unwrap();
        let request = Request::new(format!("{}/flaky", server.uri()));
        let cancel = CancellationToken::new();

        match fetcher.fetch(&request, &cancel).await {
            FetchOutcome::Response(r) => assert_eq!(r.body, b"recovered"),
            FetchOutcome::Failed(e) => panic!("unexpected failure: {e}"),
        }
    }

    #[test]
    fn linear_backoff_grows_by_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
    }
}
