use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown node")]
    UnknownNode,
    #[error("file not found")]
    FileNotFound,
    #[error("insufficient healthy nodes")]
    InsufficientCapacity,
    #[error("write quorum not met: {uploaded} of {required} replicas uploaded")]
    WriteQuorum { uploaded: usize, required: usize },
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownNode => StatusCode::NOT_FOUND,
            ApiError::FileNotFound => StatusCode::NOT_FOUND,
            ApiError::InsufficientCapacity => StatusCode::CONFLICT,
            ApiError::WriteQuorum { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Any(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status_code, self.to_string()).into_response()
    }
}
