use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use p13n_core::{Error, ErrorKind};
use serde::Serialize;

/// Message sent for every server-side failure. Backend errors carry ARNs and URLs that must not
/// reach clients, so the detail only goes to the log.
const GENERIC_SERVER_MESSAGE: &str = "An error occurred while processing the request";

/// A pipeline error on its way to the client.
#[derive(Debug, Clone, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub Error);

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "type")]
    error_type: &'a str,
    code: &'a str,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::ConfigNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::ConfigurationMissing => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self.0.kind() {
            ErrorKind::Client => self.0.to_string(),
            _ => GENERIC_SERVER_MESSAGE.to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error_type: self.0.error_type(),
            code: self.0.code(),
            message: self.message(),
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            format!(
                r#"{{"type":"{}","code":"{}","message":"{GENERIC_SERVER_MESSAGE}"}}"#,
                body.error_type, body.code
            )
        });

        (status, [("content-type", "application/json")], json).into_response()
    }
}
