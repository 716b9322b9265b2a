use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use hsync_core::DomainError;
use hsync_infra::dispensing::DispenseError;
use hsync_infra::prescribing::IssueError;
use hsync_infra::store::StoreError;

const INTERNAL_MESSAGE: &str = "an internal error occurred; please retry";

pub fn dispense_error_to_response(err: DispenseError) -> axum::response::Response {
    let code = err.kind();
    match err {
        DispenseError::NotFoundOrMismatch => {
            json_error(StatusCode::NOT_FOUND, code, err.to_string())
        }
        DispenseError::AlreadyDispensed => json_error(StatusCode::CONFLICT, code, err.to_string()),
        DispenseError::InsufficientStock {
            ref medicine,
            required,
            available,
        } => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "error": code,
                "message": err.to_string(),
                "medicine": medicine.as_str(),
                "required": required,
                "available": available,
                "shortfall": required - available,
            })),
        )
            .into_response(),
        DispenseError::InvalidPrescription(ref msg) => {
            tracing::warn!(error = %msg, "stored prescription cannot be dispensed");
            json_error(StatusCode::UNPROCESSABLE_ENTITY, code, err.to_string())
        }
        DispenseError::StorageFailure(e) => {
            tracing::error!(error = %e, "dispense storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, code, INTERNAL_MESSAGE)
        }
    }
}

pub fn issue_error_to_response(err: IssueError) -> axum::response::Response {
    match err {
        IssueError::Invalid(e) => domain_error_to_response(e),
        IssueError::CodeSpaceExhausted { .. } => {
            tracing::error!(error = %err, "access code allocation failed");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "code_space_exhausted",
                "could not allocate an access code; please retry",
            )
        }
        IssueError::Storage(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    tracing::error!(error = %err, "storage failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_failure", INTERNAL_MESSAGE)
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

/// Malformed, mistyped or missing JSON bodies, in the same shape as every
/// other failure.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(rejection.status(), "invalid_body", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
