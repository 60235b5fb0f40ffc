use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;

use placement_portal::auth::{IdentityProvider, TokenClaims};
use placement_portal::config::Config;
use placement_portal::error::{AppError, Result};
use placement_portal::fetcher::{Document, PageFetcher};
use placement_portal::AppState;

pub const OVERVIEW_URL: &str = "https://www.tce.edu/placement";
pub const STATISTICS_URL: &str = "https://www.tce.edu/placement/statistics";

pub const OVERVIEW_HTML: &str = r#"<html><body>
  <div class="region-content">
    <h2>Training and Placement Cell</h2>
    <p>The cell coordinates campus recruitment.</p>
    <img src="/sites/default/files/cell.jpg">
  </div>
</body></html>"#;

pub const STATISTICS_HTML: &str = r#"<html><body><div class="region-content">
  <table><tbody>
    <tr><td>1</td><td>2024-2025</td><td><a href="/sites/default/files/2024-25.pdf"><img src="/pdf.png">View</a></td></tr>
  </tbody></table>
  <table><tbody>
    <tr><td>1</td><td>2023-2024</td><td>600</td><td>512</td><td><a href="/sites/default/files/2023-24.pdf">View</a></td></tr>
  </tbody></table>
  <table><tbody><tr><td>1</td><td>2022-2023</td><td>-</td></tr></tbody></table>
</div></body></html>"#;

/// Serves canned pages and counts every upstream request.
#[derive(Default)]
pub struct FakeFetcher {
    pages: Mutex<HashMap<String, String>>,
    documents: Mutex<HashMap<String, Document>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.set_page(url, html);
        self
    }

    pub fn with_document(self, url: &str, document: Document) -> Self {
        self.documents.lock().unwrap().insert(url.to_string(), document);
        self
    }

    /// Makes every page fetch take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_page(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), html.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::FetchError(format!("connection refused: {}", url)))
    }

    async fn fetch_document(&self, url: &str) -> Result<Document> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::FetchError(format!("HTTP 404 for {}", url)))
    }
}

/// Accepts tokens of the form `valid:<email>`.
pub struct FakeIdentityProvider;

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn verify_token(&self, id_token: &str) -> Result<TokenClaims> {
        match id_token.strip_prefix("valid:") {
            Some(email) => Ok(TokenClaims {
                uid: format!("uid-{}", email.len()),
                email: Some(email.to_string()),
                name: None,
            }),
            None => Err(AppError::AuthError("signature mismatch".to_string())),
        }
    }
}

pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("FIREBASE_SERVICE_ACCOUNT".into(), r#"{"project_id":"tce-portal"}"#.into());
    vars.insert("APP_ENV".into(), "production".into());
    for (key, value) in extra {
        vars.insert(key.to_string(), value.to_string());
    }
    Config::from_source(|key| vars.get(key).cloned()).expect("test config")
}

pub fn test_state(config: Config, fetcher: Arc<FakeFetcher>) -> AppState {
    AppState::new(config, Arc::new(FakeIdentityProvider), fetcher)
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, json: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json).unwrap()))
        .unwrap()
}
