use crate::params::ParamsError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request body: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("Invalid generation parameters: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct JsonError {
    message: String,
    r#type: String,
}

#[derive(Serialize)]
struct JsonErrorWrapper {
    error: JsonError,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let r#type = match self {
            AppError::InternalError(_) => "api_error",
            _ => "invalid_request_error",
        };
        HttpResponse::build(self.status_code()).json(JsonErrorWrapper {
            error: JsonError {
                message: self.to_string(),
                r#type: r#type.to_string(),
            },
        })
    }
}
