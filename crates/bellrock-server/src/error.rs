use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use bellrock_shared::Uid;
use bellrock_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown user: {0}")]
    UserNotFound(Uid),

    #[error("Unknown cell tower: {0:#018x}")]
    UnknownCellTower(u64),

    #[error("A user cannot be their own peer")]
    SelfPeer,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cell map error: {0}")]
    CellMap(#[from] bellrock_shared::CellMapError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::UserNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::UnknownCellTower(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::SelfPeer => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::Store(StoreError::Duplicate) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            ServerError::Store(StoreError::SelfEdge) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage error".to_string(),
            ),
            ServerError::CellMap(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cell map error".to_string(),
            ),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
