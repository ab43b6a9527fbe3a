//! Standardized error handling for the Greenlight API
//!
//! This module provides a consistent error response format across all endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "VALIDATION_ERROR", "NOT_FOUND", "INSTANCE_CLOSED")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Application error type that can be converted to HTTP responses
///
/// Every variant carries the identifiers a caller needs to render an
/// actionable message. Storage errors never leak through; they are wrapped
/// into `Database` and reported as a generic internal error.
#[derive(Debug)]
pub enum AppError {
    // Input errors
    ValidationError { details: HashMap<String, Vec<String>> },
    NotFound { resource: &'static str, id: Uuid },

    // Workflow state errors
    NoEligibleAssignee { role_id: Uuid },
    UnauthorizedAction { instance_id: Uuid, actor_id: Uuid },
    InstanceClosed { instance_id: Uuid },
    ForbiddenAction { instance_id: Uuid, reason: String },
    ConcurrencyConflict { instance_id: Uuid },

    // Server errors
    InternalError(String),
    DatabaseError(String),
}

impl AppError {
    pub fn not_found(resource: &'static str, id: Uuid) -> Self {
        Self::NotFound { resource, id }
    }

    /// Create a validation error with a single field error
    pub fn validation_single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut details = HashMap::new();
        details.insert(field.into(), vec![message.into()]);
        Self::ValidationError { details }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::NoEligibleAssignee { .. } => StatusCode::CONFLICT,
            Self::UnauthorizedAction { .. } => StatusCode::FORBIDDEN,
            Self::InstanceClosed { .. } => StatusCode::CONFLICT,
            Self::ForbiddenAction { .. } => StatusCode::FORBIDDEN,
            Self::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            Self::InternalError(_) | Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NoEligibleAssignee { .. } => "NO_ELIGIBLE_ASSIGNEE",
            Self::UnauthorizedAction { .. } => "UNAUTHORIZED_ACTION",
            Self::InstanceClosed { .. } => "INSTANCE_CLOSED",
            Self::ForbiddenAction { .. } => "FORBIDDEN_ACTION",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::DatabaseError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::ValidationError { .. } => "Validation failed".to_string(),
            Self::NotFound { resource, id } => format!("{} {} not found", resource, id),
            Self::NoEligibleAssignee { role_id } => {
                format!("No eligible assignee for role {}", role_id)
            }
            Self::UnauthorizedAction { instance_id, actor_id } => format!(
                "User {} is not the current assignee of workflow {}",
                actor_id, instance_id
            ),
            Self::InstanceClosed { instance_id } => {
                format!("Workflow {} is no longer active", instance_id)
            }
            Self::ForbiddenAction { instance_id, reason } => {
                format!("Action not permitted on workflow {}: {}", instance_id, reason)
            }
            Self::ConcurrencyConflict { instance_id } => format!(
                "Concurrent update on workflow {}, retry the request",
                instance_id
            ),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "An internal error occurred".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = ApiError::new(self.error_code(), self.message());

        if let Self::ValidationError { details } = &self {
            error.details = Some(details.clone());
        }

        (status, Json(error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            // 40001 serialization_failure, 40P01 deadlock_detected
            if let Some(code) = db_err.code() {
                if code == "40001" || code == "40P01" {
                    return Self::ConcurrencyConflict { instance_id: Uuid::nil() };
                }
            }
        }
        Self::DatabaseError(err.to_string())
    }
}

/// Result type alias for handlers and services
pub type ApiResult<T> = Result<T, AppError>;

/// Helper to accumulate field-level validation errors
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn error(mut self, field: &str, message: impl Into<String>) -> Self {
        self.details
            .entry(field.to_string())
            .or_insert_with(Vec::new)
            .push(message.into());
        self
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.details
            .entry(field.to_string())
            .or_insert_with(Vec::new)
            .push(message.into());
    }

    pub fn build(self) -> Option<AppError> {
        if self.details.is_empty() {
            None
        } else {
            Some(AppError::ValidationError {
                details: self.details,
            })
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }

    /// Finish validation: Ok(()) if clean, the accumulated error otherwise
    pub fn finish(self) -> Result<(), AppError> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for ValidationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
