use std::path::Path;

use axum::{
    routing::{get, post},
    Router,
    extract::{Json, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::api::models::{CacheStatus, DownloadQuery, HealthResponse, VerifyRequest};
use crate::api::response;
use crate::auth::VerifyOutcome;
use crate::config::{Config, RunMode};
use crate::error::{AppError, Result};
use crate::extract::{extract_overview, extract_statistics};
use crate::models::{Endpoint, ExtractedPage};
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    let api = Router::new()
        .route("/api/auth/verify", post(verify_handler))
        .route("/api/placement/overview", get(overview_handler))
        .route("/api/placement/statistics", get(statistics_handler))
        .route("/api/placement/download", get(download_handler))
        .route("/api/health", get(health_handler));

    // The SPA's client-side router owns every path the API does not.
    let app = match app_state.config.mode {
        RunMode::Production => api.fallback_service(spa_service(&app_state.config.frontend_build_dir)),
        RunMode::Development => api,
    };

    app.layer(TraceLayer::new_for_http())
        .layer(cors_layer(&app_state.config))
        .with_state(app_state)
}

fn spa_service(build_dir: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(build_dir).fallback(ServeFile::new(build_dir.join("index.html")))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.frontend_origin == "*" {
        AllowOrigin::mirror_request()
    } else {
        match HeaderValue::from_str(&config.frontend_origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(err) => {
                tracing::warn!(error = %err, origin = %config.frontend_origin, "Invalid CORS origin, mirroring requests");
                AllowOrigin::mirror_request()
            }
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

async fn verify_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Response {
    let Some(id_token) = req.id_token.filter(|token| !token.trim().is_empty()) else {
        tracing::warn!("Verify request without idToken");
        return response::auth_failure(StatusCode::BAD_REQUEST, "idToken is required", None);
    };

    match state.verifier.verify(&id_token).await {
        Ok(VerifyOutcome::Authorized(user)) => {
            tracing::info!(uid = %user.id, email = %user.email, "User authorized");
            response::auth_success(user)
        }
        Ok(VerifyOutcome::Forbidden(message)) => {
            tracing::warn!(allowed = %state.verifier.allowed_domain(), "Rejected sign-in from outside the allowed domain");
            response::auth_failure(StatusCode::FORBIDDEN, message, None)
        }
        Err(err) => {
            tracing::error!(error = %err, "Auth error");
            response::auth_failure(
                StatusCode::UNAUTHORIZED,
                "Authentication failed",
                response::detail_for(state.config.mode, &err),
            )
        }
    }
}

async fn overview_handler(State(state): State<AppState>) -> Response {
    placement_page(&state, Endpoint::Overview).await
}

async fn statistics_handler(State(state): State<AppState>) -> Response {
    placement_page(&state, Endpoint::Statistics).await
}

async fn placement_page(state: &AppState, endpoint: Endpoint) -> Response {
    let start_time = std::time::Instant::now();
    let result = state
        .cache
        .get_or_refresh(endpoint, || load_page(state, endpoint))
        .await;
    tracing::debug!(%endpoint, elapsed = ?start_time.elapsed(), "Placement request processed");

    match result {
        Ok(page) => response::success(page),
        Err(err) => {
            tracing::error!(%endpoint, error = %err, "{} error", endpoint);
            let message = match &err {
                AppError::ParseError(_) => format!("Could not locate placement {} section", endpoint),
                _ => format!("Failed to fetch {}", endpoint),
            };
            response::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                message,
                response::detail_for(state.config.mode, &err),
            )
        }
    }
}

/// Fetches and extracts one placement page; the cache decides when to call this.
pub async fn load_page(state: &AppState, endpoint: Endpoint) -> Result<ExtractedPage> {
    let url = endpoint.url(&state.config.site_url);
    tracing::info!(%endpoint, %url, "Scraping placement page");

    let html = state.fetcher.fetch(&url).await?;

    let page = match endpoint {
        Endpoint::Overview => {
            let page = extract_overview(&html, &url)?;
            tracing::info!(sections = page.sections.len(), images = page.images.len(), "Extracted overview");
            ExtractedPage::Overview(page)
        }
        Endpoint::Statistics => {
            let page = extract_statistics(&html, &url)?;
            tracing::info!(tables = page.tables.len(), "Extracted statistics");
            ExtractedPage::Statistics(page)
        }
    };

    Ok(page)
}

/// Only files hosted on the placement site itself may be relayed.
pub fn validate_download_url(raw: &str, site_url: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| AppError::BadRequest(format!("Invalid url: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::BadRequest("url must be http or https".to_string()));
    }

    let site_host = Url::parse(site_url)
        .ok()
        .and_then(|site| site.host_str().map(str::to_string));
    match (url.host_str(), site_host) {
        (Some(host), Some(site_host)) if host == site_host => Ok(url),
        _ => Err(AppError::BadRequest("url must point at the placement site".to_string())),
    }
}

async fn download_handler(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> std::result::Result<Response, AppError> {
    let url = validate_download_url(&query.url, &state.config.site_url)?;
    tracing::info!(%url, "Relaying placement document");

    let document = state.fetcher.fetch_document(url.as_str()).await?;

    let mut response = (StatusCode::OK, document.bytes).into_response();
    let headers = response.headers_mut();
    let content_type = document
        .content_type
        .and_then(|value| HeaderValue::from_str(&value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(disposition) = document
        .content_disposition
        .and_then(|value| HeaderValue::from_str(&value).ok())
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok(response)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mode: state.config.mode.as_str(),
        timestamp: Utc::now(),
        cache: CacheStatus {
            overview: state.cache.age(Endpoint::Overview).map(|age| age.as_secs()),
            statistics: state.cache.age(Endpoint::Statistics).map(|age| age.as_secs()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://www.tce.edu";

    #[test]
    fn download_urls_must_stay_on_site() {
        let url = validate_download_url("https://www.tce.edu/sites/default/files/2024.pdf", SITE).unwrap();
        assert_eq!(url.path(), "/sites/default/files/2024.pdf");

        for bad in [
            "https://evil.example.com/x.pdf",
            "file:///etc/passwd",
            "https://www.tce.edu.evil.com/x.pdf",
            "not a url",
        ] {
            let err = validate_download_url(bad, SITE).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{}", bad);
        }
    }
}
