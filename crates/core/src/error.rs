// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! Unified error kinds surfaced to HTTP/WS clients and HQ callers (spec §7).

use std::fmt;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error kinds surfaced to clients and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    BadRequest,
    SessionExited,
    Unauthorized,
    UpstreamUnreachable,
    ServerShuttingDown,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::SessionExited => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            Self::ServerShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::SessionExited => "SESSION_EXITED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            Self::ServerShuttingDown => "SERVER_SHUTTING_DOWN",
            Self::Internal => "INTERNAL",
        }
    }

    /// Build the JSON error body clients see, sanitising `Internal` messages
    /// (the detail is logged by the caller, not echoed back).
    pub fn to_http_response(&self, detail: impl Into<String>) -> Response {
        let detail = detail.into();
        let message = if matches!(self, Self::Internal) {
            "internal error".to_owned()
        } else {
            detail
        };
        let body = Json(ErrorBody { error: ErrorDetail { code: self.as_str().to_owned(), message } });
        let mut response = (self.http_status(), body).into_response();
        if matches!(self, Self::ServerShuttingDown) {
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from_static("5"));
        }
        response
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutting_down_sets_retry_after() {
        let resp = ErrorCode::ServerShuttingDown.to_http_response("draining");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "5");
    }

    #[test]
    fn internal_message_is_sanitised() {
        let resp = ErrorCode::Internal.to_http_response("leaked secret path");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(ErrorCode::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::SessionExited.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::UpstreamUnreachable.http_status(), StatusCode::BAD_GATEWAY);
    }
}
