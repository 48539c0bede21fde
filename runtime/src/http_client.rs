//! Async HTTP client wrapping reqwest.
//!
//! Used by authenticated replay to re-issue an export request outside the
//! browser. Streams the body to disk, retries on 5xx, and honours
//! `retry-after` on 429.

use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, REFERER, USER_AGENT};
use tokio::io::AsyncWriteExt;

use crate::capture::CaptureError;

/// Headers copied from the browser session for a replayed request.
#[derive(Debug, Clone, Default)]
pub struct ReplayHeaders {
    /// `name=value; name=value` cookie header.
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    /// Anything else, e.g. the anti-forgery token header.
    pub extra: Vec<(String, String)>,
}

impl ReplayHeaders {
    fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        let fixed = [
            (COOKIE, &self.cookie),
            (USER_AGENT, &self.user_agent),
            (REFERER, &self.referer),
        ];
        for (name, value) in fixed {
            if let Some(v) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                map.insert(name, v);
            }
        }
        for (name, value) in &self.extra {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    map.insert(n, v);
                }
                _ => tracing::warn!(header = %name, "skipping invalid replay header"),
            }
        }
        map
    }
}

/// HTTP client for direct export replay.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for hosts that reject HTTP/2.
    h1_client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl HttpClient {
    /// Create a new HTTP client with a standard Chrome user-agent. The
    /// browser's own user-agent overrides it per request.
    pub fn new(timeout_ms: u64) -> Self {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                  AppleWebKit/537.36 (KHTML, like Gecko) \
                  Chrome/131.0.0.0 Safari/537.36";
        let timeout = Duration::from_millis(timeout_ms);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self {
            client,
            h1_client,
            timeout,
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }

    /// Override the retry budget and first 5xx backoff.
    pub fn with_retry(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    /// GET `url` and stream the body into `dest`. Returns bytes written.
    ///
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject HTTP/2).
    pub async fn download(
        &self,
        url: &str,
        headers: &ReplayHeaders,
        dest: &Path,
    ) -> Result<u64, CaptureError> {
        match self.download_inner(&self.client, url, headers, dest).await {
            Err(CaptureError::Transient(msg))
                if msg.contains("http2")
                    || msg.contains("protocol")
                    || msg.contains("connection closed") =>
            {
                tracing::debug!(url, "retrying replay over HTTP/1.1");
                self.download_inner(&self.h1_client, url, headers, dest)
                    .await
            }
            other => other,
        }
    }

    async fn download_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        headers: &ReplayHeaders,
        dest: &Path,
    ) -> Result<u64, CaptureError> {
        let mut retries = 0u32;
        let header_map = headers.to_header_map();

        loop {
            let resp = client
                .get(url)
                .headers(header_map.clone())
                .timeout(self.timeout)
                .send()
                .await;

            let mut r = match resp {
                Ok(r) => r,
                Err(e) => {
                    if retries < self.max_retries {
                        retries += 1;
                        tokio::time::sleep(self.backoff_for(retries)).await;
                        continue;
                    }
                    return Err(self.transport_error(e));
                }
            };
            let status = r.status().as_u16();

            // Retry on 5xx
            if status >= 500 && retries < self.max_retries {
                retries += 1;
                tokio::time::sleep(self.backoff_for(retries)).await;
                continue;
            }

            // Backoff on 429
            if status == 429 && retries < self.max_retries {
                retries += 1;
                let retry_after = r.headers().get("retry-after").and_then(|v| v.to_str().ok());
                tokio::time::sleep(retry_after_delay(retry_after)).await;
                continue;
            }

            if !r.status().is_success() {
                return Err(CaptureError::Http {
                    status,
                    url: url.to_string(),
                });
            }

            let mut file = tokio::fs::File::create(dest).await?;
            let mut written = 0u64;
            while let Some(chunk) = r.chunk().await.map_err(|e| self.transport_error(e))? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            return Ok(written);
        }
    }

    fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.pow(retry.saturating_sub(1)))
    }

    fn transport_error(&self, e: reqwest::Error) -> CaptureError {
        if e.is_timeout() {
            CaptureError::Timeout {
                what: "replay request",
                after: self.timeout,
            }
        } else {
            CaptureError::Transient(format!("{e:#}"))
        }
    }
}

/// Wait before retrying a 429: the server's `Retry-After` seconds, capped at
/// 10s, or 2s when absent or not a plain number.
fn retry_after_delay(header: Option<&str>) -> Duration {
    let secs = header
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(2);
    Duration::from_secs(secs.min(10))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(5_000).with_retry(2, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_download_streams_body_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/export.csv"))
            .and(header("cookie", "session=abc; csrf=tok"))
            .and(header("x-csrf-token", "tok"))
            .and(header("user-agent", "TestAgent/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("PRICE,ZIP\n1,32541\n"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.csv");
        let headers = ReplayHeaders {
            cookie: Some("session=abc; csrf=tok".into()),
            user_agent: Some("TestAgent/1.0".into()),
            referer: Some("https://src.test/search".into()),
            extra: vec![("X-CSRF-Token".into(), "tok".into())],
        };
        let n = client()
            .download(&format!("{}/export.csv", server.uri()), &headers, &dest)
            .await
            .unwrap();
        assert_eq!(n, 19);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "PRICE,ZIP\n1,32541\n");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .with_priority(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.csv");
        let n = client()
            .download(&server.uri(), &ReplayHeaders::default(), &dest)
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = client()
            .download(&server.uri(), &ReplayHeaders::default(), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Http { status: 403, .. }));
    }

    #[test]
    fn test_invalid_extra_header_is_skipped() {
        let headers = ReplayHeaders {
            extra: vec![("bad header".into(), "v".into()), ("X-Ok".into(), "1".into())],
            ..Default::default()
        };
        let map = headers.to_header_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("x-ok").unwrap(), "1");
    }

    #[test]
    fn test_retry_after_is_capped() {
        assert_eq!(retry_after_delay(Some("3")), Duration::from_secs(3));
        assert_eq!(retry_after_delay(Some("120")), Duration::from_secs(10));
        assert_eq!(retry_after_delay(Some("Wed, 21 Oct 2026 07:28:00 GMT")), Duration::from_secs(2));
        assert_eq!(retry_after_delay(None), Duration::from_secs(2));
    }
}
