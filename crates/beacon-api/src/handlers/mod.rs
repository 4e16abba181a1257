//! Request handlers organized by resource.

pub mod builders;
pub mod health;
pub mod jobs;
pub mod schedulers;
pub mod webhooks;

use axum::http::StatusCode;
use beacon_core::Error;

/// Map a domain error onto an HTTP rejection.
pub fn rejection(err: Error) -> (StatusCode, String) {
    let status = match &err {
        Error::SchedulerNotFound(_) | Error::BuilderNotFound(_) | Error::JobNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::InvalidTransition { .. } | Error::JobAlreadyCompleted(_) => StatusCode::CONFLICT,
        Error::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        Error::InvalidSignature => StatusCode::UNAUTHORIZED,
        Error::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Network(_) | Error::Execution(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
