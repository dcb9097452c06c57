//! HTTP response types and utilities
//!
//! Every endpoint answers with the [`ApiResponse`] envelope. Errors are mapped
//! to status codes in [`handle_error`] and nowhere else.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult, GitError, ProviderError, RegistryError, ScheduleError};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Whether the operation was successful
    pub success: bool,
    /// Response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error_with_details(message: String, details: HashMap<String, String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: Some(details),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, Json(self)).into_response()
    }
}

/// Convert an AppResult into a 200 response or a mapped error
pub fn handle_result<T>(result: AppResult<T>) -> Response
where
    T: Serialize,
{
    match result {
        Ok(data) => ok(data).into_response(),
        Err(error) => handle_error(error),
    }
}

/// Like [`handle_result`] but answers 201 on success
pub fn handle_created<T>(result: AppResult<T>) -> Response
where
    T: Serialize,
{
    match result {
        Ok(data) => created(data).into_response(),
        Err(error) => handle_error(error),
    }
}

/// Convert AppError to appropriate HTTP response
pub fn handle_error(error: AppError) -> Response {
    let (status, message, details) = match &error {
        AppError::Validation { message } => (StatusCode::BAD_REQUEST, message.clone(), None),
        AppError::Schedule(ScheduleError::InvalidExpression { expression, reason }) => (
            StatusCode::BAD_REQUEST,
            format!("Invalid schedule '{}'", expression),
            Some(HashMap::from([("schedule".to_string(), reason.clone())])),
        ),
        AppError::Schedule(e @ ScheduleError::UnsatisfiableExpression { .. }) => {
            (StatusCode::BAD_REQUEST, e.to_string(), None)
        }
        AppError::Registry(RegistryError::NotFound { path }) => (
            StatusCode::NOT_FOUND,
            format!("Repository '{}' not found", path),
            None,
        ),
        AppError::Provider(ProviderError::Unauthorized { message }) => (
            StatusCode::UNAUTHORIZED,
            format!("Unauthorized: {}", message),
            None,
        ),
        AppError::Provider(ProviderError::UpstreamUnavailable { message }) => (
            StatusCode::BAD_GATEWAY,
            format!("Issue tracker unavailable: {}", message),
            None,
        ),
        AppError::Provider(ProviderError::NotFound { resource, id }) => (
            StatusCode::NOT_FOUND,
            format!("{} '{}' not found", resource, id),
            None,
        ),
        AppError::Git(GitError::NotARepository { path }) => (
            StatusCode::BAD_REQUEST,
            format!("Invalid git repository path: {}", path),
            None,
        ),
        AppError::Git(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Git operation failed: {}", e),
            None,
        ),
        AppError::Config(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error saving config: {}", e),
            None,
        ),
        AppError::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal error: {}", message),
            None,
        ),
    };

    let response = if let Some(details) = details {
        ApiResponse::<()>::error_with_details(message, details)
    } else {
        ApiResponse::<()>::error(message)
    };

    (status, Json(response)).into_response()
}

pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}
