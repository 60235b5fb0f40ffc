use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::auth::AuthorizedUser;
use crate::config::RunMode;
use crate::error::AppError;

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthorizedUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Internal error text, only ever exposed in development mode.
pub fn detail_for(mode: RunMode, err: &AppError) -> Option<String> {
    (mode == RunMode::Development).then(|| err.to_string())
}

pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

pub fn error(status: StatusCode, message: impl Into<String>, detail: Option<String>) -> Response {
    let body = MessageResponse {
        message: message.into(),
        detail,
    };

    (status, Json(body)).into_response()
}

pub fn auth_success(user: AuthorizedUser) -> Response {
    let body = AuthResponse {
        success: true,
        user: Some(user),
        message: None,
        detail: None,
    };

    (StatusCode::OK, Json(body)).into_response()
}

pub fn auth_failure(status: StatusCode, message: impl Into<String>, detail: Option<String>) -> Response {
    let body = AuthResponse {
        success: false,
        user: None,
        message: Some(message.into()),
        detail,
    };

    (status, Json(body)).into_response()
}
