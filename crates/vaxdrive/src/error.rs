use crate::config::ConfigError;
use crate::drives::router::status_for;
use crate::drives::{DriveServiceError, RepositoryError};
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Storage(RepositoryError),
    Drive(DriveServiceError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Storage(err) => write!(f, "storage error: {}", err),
            AppError::Drive(err) => write!(f, "{}: {}", err.code(), err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Storage(err) => Some(err),
            AppError::Drive(err) => Some(err),
        }
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Drive(err) => err.code(),
            AppError::Storage(_) => "PERSISTENCE_FAILURE",
            AppError::Config(_) | AppError::Telemetry(_) | AppError::Io(_) | AppError::Server(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Drive(err) => status_for(err),
            AppError::Storage(_)
            | AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.code(), "message": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        Self::Storage(value)
    }
}

impl From<DriveServiceError> for AppError {
    fn from(value: DriveServiceError) -> Self {
        Self::Drive(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drives::{DriveId, DriveRejection};
    use chrono::NaiveDate;

    #[test]
    fn drive_errors_keep_their_code() {
        let rejection = DriveRejection::ImmutablePastDrive {
            end_date: NaiveDate::from_ymd_opt(2024, 1, 31).expect("valid"),
        };
        let err = AppError::from(DriveServiceError::from(rejection));

        assert_eq!(err.code(), "IMMUTABLE_PAST_DRIVE");
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn storage_errors_are_internal() {
        let err = AppError::from(DriveServiceError::DriveNotFound(DriveId(9)));
        assert!(err.to_string().starts_with("DRIVE_NOT_FOUND"));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let storage = AppError::from(RepositoryError::Unavailable("locked".to_string()));
        assert_eq!(storage.code(), "PERSISTENCE_FAILURE");
        assert_eq!(
            storage.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
