use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Deserialize)]
pub struct VerifyRequest {
    #[serde(rename = "idToken", default)]
    pub id_token: Option<String>,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    pub url: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: &'static str,
    pub timestamp: DateTime<Utc>,
    pub cache: CacheStatus,
}

/// Seconds since each endpoint was last scraped, `null` if never.
#[derive(Serialize)]
pub struct CacheStatus {
    pub overview: Option<u64>,
    pub statistics: Option<u64>,
}
