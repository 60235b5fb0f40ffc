pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod models;

use std::sync::Arc;

use auth::{IdentityProvider, Verifier};
use cache::PageCache;
use config::Config;
use fetcher::PageFetcher;
use models::ExtractedPage;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<Verifier>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub cache: Arc<PageCache<ExtractedPage>>,
}

impl AppState {
    pub fn new(
        config: Config,
        provider: Arc<dyn IdentityProvider>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let verifier = Verifier::new(provider, config.allowed_email_domain.clone());
        let cache = PageCache::new(config.cache_ttl);

        AppState {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            fetcher,
            cache: Arc::new(cache),
        }
    }
}
