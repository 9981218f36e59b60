use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::documents::DocumentError;
use crate::application::error::ErrorReport;
use crate::application::jobs::QueueError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const NOT_FOUND: &str = "not_found";
    pub const NOT_SYNCED: &str = "not_synced";
    pub const QUEUE_FULL: &str = "queue_full";
    pub const QUEUE_CLOSED: &str = "queue_closed";
    pub const STORAGE: &str = "storage_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn not_found(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, hint)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<DocumentError> for ApiError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Unknown(id) => {
                Self::not_found("Unknown document", Some(format!("no document named `{id}`")))
            }
            DocumentError::NotSynced(id) => Self::new(
                StatusCode::NOT_FOUND,
                codes::NOT_SYNCED,
                "Document has not been synced yet",
                Some(format!("request a refresh of `{id}`")),
            ),
            DocumentError::Queue(QueueError::Full) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::QUEUE_FULL,
                "Refresh queue is full",
                Some("retry shortly".to_string()),
            ),
            DocumentError::Queue(QueueError::Closed) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::QUEUE_CLOSED,
                "Refresh queue is not accepting jobs",
                None,
            ),
            DocumentError::Storage(err) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
                "Failed to read document",
                Some(err.to_string()),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::documents",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::StorageError;
    use crate::domain::documents::DocumentId;

    #[test]
    fn document_errors_map_to_statuses() {
        let id = DocumentId::parse("bylaws").expect("id");
        let cases = [
            (DocumentError::Unknown("nope".into()), StatusCode::NOT_FOUND, codes::NOT_FOUND),
            (DocumentError::NotSynced(id), StatusCode::NOT_FOUND, codes::NOT_SYNCED),
            (
                DocumentError::Queue(QueueError::Full),
                StatusCode::SERVICE_UNAVAILABLE,
                codes::QUEUE_FULL,
            ),
            (
                DocumentError::Storage(StorageError::InvalidPath("..".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
            ),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn response_carries_error_report() {
        let response = ApiError::not_found("Unknown document", None).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = response.extensions().get::<ErrorReport>().expect("report");
        assert_eq!(report.messages, ["not_found: Unknown document"]);
    }
}
