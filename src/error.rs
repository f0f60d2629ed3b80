// src/error.rs
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::store::StoreError;
use crate::validate::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Malformed payload")]
    MalformedPayload,

    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),

    #[error("Please sign in to continue")]
    AuthRequired,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You have already voted on this poll")]
    AlreadyVoted,

    #[error("This username is already taken")]
    UsernameTaken,

    /// Details are logged where the error happens; the client gets a generic message.
    #[error("Something went wrong, please try again")]
    Persistence(#[from] StoreError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::InvalidBody(rejection) => rejection.status(),
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyVoted | AppError::UsernameTaken => StatusCode::CONFLICT,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::InvalidBody(rejection) = &self {
            warn!("Rejected request body: {}", rejection.body_text());
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
