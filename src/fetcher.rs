use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::redirect::{Attempt, Action, Policy};
use reqwest::{Client, ClientBuilder, Response};

use crate::error::{AppError, Result};

// The placement site rejects obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115 Safari/537.36";

pub const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_DOCUMENT_BYTES: usize = 20 * 1024 * 1024;
const MAX_REDIRECTS: usize = 10;

/// A downloadable file relayed from the placement site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches an HTML page and returns its body as text.
    async fn fetch(&self, url: &str) -> Result<String>;

    /// Fetches any file, keeping the headers needed to relay it.
    async fn fetch_document(&self, url: &str) -> Result<Document>;
}

#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .redirect(Policy::custom(same_host_redirect))
            .build()?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str, limit: usize) -> Result<Response> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::FetchError(format!("HTTP {} for {}", status.as_u16(), url)));
        }

        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return Err(AppError::FetchError(format!(
                    "{} declares {} bytes, limit is {}",
                    url, length, limit
                )));
            }
        }

        Ok(response)
    }
}

/// Redirects are only followed while they stay on the host of the
/// original request.
fn same_host_redirect(attempt: Attempt) -> Action {
    if attempt.previous().len() >= MAX_REDIRECTS {
        return attempt.error("too many redirects");
    }

    let origin = attempt.previous().first().and_then(|url| url.host_str());
    let same_host = origin.is_some() && origin == attempt.url().host_str();
    if same_host {
        attempt.follow()
    } else {
        let message = format!("refusing redirect to {}", attempt.url());
        attempt.error(message)
    }
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub fn is_html(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

/// Reads the body chunk by chunk and gives up as soon as it outgrows `limit`,
/// whether or not the server declared a length.
async fn read_limited(mut response: Response, url: &str, limit: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(AppError::FetchError(format!(
                "{} returned more than {} bytes, limit is {}",
                url,
                body.len() + chunk.len(),
                limit
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[async_trait]
impl PageFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let started = std::time::Instant::now();
        let response = self.get(url, MAX_PAGE_BYTES).await?;

        if let Some(content_type) = header_string(&response, CONTENT_TYPE) {
            if !is_html(&content_type) {
                return Err(AppError::FetchError(format!(
                    "{} returned {} instead of HTML",
                    url, content_type
                )));
            }
        }

        let body = read_limited(response, url, MAX_PAGE_BYTES).await?;
        tracing::info!(%url, bytes = body.len(), elapsed = ?started.elapsed(), "Fetched page");

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn fetch_document(&self, url: &str) -> Result<Document> {
        let response = self.get(url, MAX_DOCUMENT_BYTES).await?;
        let content_type = header_string(&response, CONTENT_TYPE);
        let content_disposition = header_string(&response, CONTENT_DISPOSITION);
        let bytes = read_limited(response, url, MAX_DOCUMENT_BYTES).await?;

        Ok(Document {
            content_type,
            content_disposition,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_content_types() {
        assert!(is_html("text/html"));
        assert!(is_html("text/html; charset=UTF-8"));
        assert!(is_html("Application/XHTML+XML"));
        assert!(!is_html("application/pdf"));
        assert!(!is_html("application/octet-stream"));
        assert!(!is_html(""));
    }

    #[test]
    fn client_builds_with_timeout() {
        assert!(ReqwestFetcher::new(Duration::from_secs(15)).is_ok());
    }

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads one request head and returns its path.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&head)
            .split_whitespace()
            .nth(1)
            .unwrap_or("/")
            .to_string()
    }

    /// Serves canned responses chosen by path, one connection per request.
    async fn serve<F>(respond: F) -> u16
    where
        F: Fn(&str, u16) -> String + Send + Sync + 'static,
    {
        let respond = std::sync::Arc::new(respond);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let respond = respond.clone();
                tokio::spawn(async move {
                    let path = read_request(&mut stream).await;
                    let _ = stream.write_all(respond(&path, port).as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        port
    }

    fn ok(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn found(location: &str) -> String {
        format!("HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", location)
    }

    #[tokio::test]
    async fn redirects_to_another_host_are_refused() {
        let internal = serve(|_, _| ok("SECRET")).await;
        let target = format!("http://localhost:{}/admin", internal);
        let site = serve(move |_, _| found(&target)).await;

        let fetcher = ReqwestFetcher::new(Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch_document(&format!("http://127.0.0.1:{}/files/2024.pdf", site))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FetchError(_)), "{:?}", err);

        let err = fetcher
            .fetch(&format!("http://127.0.0.1:{}/placement", site))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FetchError(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn redirects_on_the_same_host_are_followed() {
        let site = serve(|path, port| match path {
            "/placement" => found(&format!("http://127.0.0.1:{}/placement/", port)),
            _ => ok("<div class=\"region-content\">ok</div>"),
        })
        .await;

        let fetcher = ReqwestFetcher::new(Duration::from_secs(5)).unwrap();
        let html = fetcher
            .fetch(&format!("http://127.0.0.1:{}/placement", site))
            .await
            .unwrap();
        assert!(html.contains("region-content"));
    }

    #[tokio::test]
    async fn chunked_body_over_the_limit_is_cut_off() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\n";
            if stream.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let chunk = vec![b'a'; 64 * 1024];
            for _ in 0..(MAX_PAGE_BYTES / chunk.len() + 16) {
                let mut frame = format!("{:x}\r\n", chunk.len()).into_bytes();
                frame.extend_from_slice(&chunk);
                frame.extend_from_slice(b"\r\n");
                if stream.write_all(&frame).await.is_err() {
                    return;
                }
            }
            // Never finish the body.
            std::future::pending::<()>().await;
        });

        let fetcher = ReqwestFetcher::new(Duration::from_secs(30)).unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            fetcher.fetch(&format!("http://127.0.0.1:{}/placement", port)),
        )
        .await
        .expect("oversized body should fail before the stream ends")
        .unwrap_err();

        match err {
            AppError::FetchError(message) => {
                assert!(message.contains(&format!("limit is {}", MAX_PAGE_BYTES)), "{}", message)
            }
            other => panic!("expected a fetch error, got {:?}", other),
        }
    }
}
