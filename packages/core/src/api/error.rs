//! HTTP presentation of domain errors.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{ErrorKind, MasterBusError};

/// Error returned by every handler. Rendered as
/// `{ "error": { "kind", "message" } }`.
#[derive(Debug)]
pub enum ApiError {
    Domain(MasterBusError),
    /// Persistence or encoding failure; details are logged, not returned.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Domain(err) => status_for(err.kind()),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Status code for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InvalidWindow => StatusCode::BAD_REQUEST,
        ErrorKind::FacilityNotFound
        | ErrorKind::EquipmentNotFound
        | ErrorKind::OrganizationNotFound => StatusCode::NOT_FOUND,
        ErrorKind::ComputationError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<MasterBusError> for ApiError {
    fn from(err: MasterBusError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Domain(MasterBusError::validation("body", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Domain(MasterBusError::validation("query", rejection.body_text()))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(format!("database error: {}", err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("encoding error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (kind, message) = match &self {
            ApiError::Domain(err) => (err.kind().as_str(), err.to_string()),
            ApiError::Internal(detail) => {
                tracing::error!("Request failed: {}", detail);
                ("internal_error", "internal server error".to_string())
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "kind": kind,
                    "message": message,
                }
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(
            status_for(ErrorKind::ValidationError),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(ErrorKind::InvalidWindow), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::OrganizationNotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::ComputationError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn body_carries_kind_and_message() {
        let response = ApiError::from(MasterBusError::facility_not_found("f9")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["kind"], "facility_not_found");
        assert_eq!(body["error"]["message"], "Facility not found: f9");
    }

    #[tokio::test]
    async fn internal_details_are_not_exposed() {
        let response = ApiError::Internal("disk full".to_string()).into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["kind"], "internal_error");
        assert!(!body["error"]["message"].as_str().unwrap().contains("disk"));
    }
}
