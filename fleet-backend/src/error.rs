use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use fleet_db::DbError;
use serde::Serialize;
use thiserror::Error;

use crate::validation::ValidationError;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Failures of the directory and session engines.
///
/// "Not found" is not here: engines return `Option`/outcome values for it.
#[derive(Debug, Error)]
pub enum ServiceError {
  /// Caller-supplied data violates a precondition.
  #[error(transparent)]
  InvalidInput(#[from] ValidationError),

  /// A multi-step write could not be completed as a unit.
  #[error("{operation} on {entity_id} did not complete: {source}")]
  Consistency {
    operation: &'static str,
    entity_id: String,
    #[source]
    source: DbError,
  },

  /// The store could not serve the request.
  #[error("store unavailable during {operation}: {source}")]
  Unavailable {
    operation: &'static str,
    #[source]
    source: DbError,
  },
}

impl ServiceError {
  /// Classify a store failure for `operation` on `entity_id` and log it.
  ///
  /// Domain rejections become `InvalidInput` and are not logged as errors.
  pub(crate) fn from_store(operation: &'static str, entity_id: &str, err: DbError) -> Self {
    match err {
      DbError::CapacityBelowPlayers {
        max_players,
        current_players,
      } => ServiceError::InvalidInput(ValidationError::CapacityBelowPlayers {
        max_players,
        current_players,
      }),
      DbError::PartialCreate { .. } => {
        tracing::error!(entity_id, operation, error = %err, "partial write rolled back");
        ServiceError::Consistency {
          operation,
          entity_id: entity_id.to_string(),
          source: err,
        }
      }
      other => {
        tracing::error!(entity_id, operation, error = %other, "store call failed");
        ServiceError::Unavailable {
          operation,
          source: other,
        }
      }
    }
  }

  /// Failures of an atomic join/leave unit: whatever went wrong, nothing committed.
  pub(crate) fn from_atomic_unit(operation: &'static str, entity_id: &str, err: DbError) -> Self {
    tracing::error!(entity_id, operation, error = %err, "atomic unit did not commit");
    ServiceError::Consistency {
      operation,
      entity_id: entity_id.to_string(),
      source: err,
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  Service(ServiceError),
  ValidationError(String),
  NotFound(&'static str),
  Conflict(&'static str),
  Unauthorized,
  Forbidden(&'static str),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::Service(ServiceError::InvalidInput(err)) => {
        AppError::ValidationError(err.to_string()).into_response()
      }
      AppError::Service(ServiceError::Consistency { .. }) => {
        // Already logged with context where it was classified
        let error_response =
          ErrorResponse::new("An internal error occurred. Please try again later.");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(error_response)).into_response()
      }
      AppError::Service(ServiceError::Unavailable { .. }) => {
        let error_response =
          ErrorResponse::new("The service is temporarily unavailable. Please try again later.");
        (StatusCode::SERVICE_UNAVAILABLE, Json(error_response)).into_response()
      }
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        let error_response = ErrorResponse::new(msg);
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
      }
      AppError::NotFound(what) => {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::new(what))).into_response()
      }
      AppError::Conflict(what) => {
        (StatusCode::CONFLICT, Json(ErrorResponse::new(what))).into_response()
      }
      AppError::Unauthorized => (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("Invalid or missing API key")),
      )
        .into_response(),
      AppError::Forbidden(permission) => (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse::with_details(
          "API key lacks the required permission",
          permission,
        )),
      )
        .into_response(),
    }
  }
}

impl From<ServiceError> for AppError {
  fn from(err: ServiceError) -> Self {
    AppError::Service(err)
  }
}

impl From<ValidationError> for AppError {
  fn from(err: ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}
