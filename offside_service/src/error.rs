use crate::{strategy::StrategyError, upload::UploadError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Upload(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServiceError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Strategy(StrategyError::DetectionFailure(_)) => StatusCode::BAD_GATEWAY,
            ServiceError::Strategy(StrategyError::WorkerFailure(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::Strategy(StrategyError::WorkerTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServiceError::from(UploadError::NoFilePart).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::from(UploadError::Storage(std::io::Error::other("disk full"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::from(StrategyError::DetectionFailure("bad".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::from(StrategyError::WorkerTimeout(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_upload_errors_keep_their_message() {
        assert_eq!(
            ServiceError::from(UploadError::InvalidFileType).to_string(),
            "Invalid file type"
        );
    }
}
