use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthorizationDenied,
    ValidationFailed,
    PrerequisiteNotMet,
    BackendUnreachable,
    BackendRejected,
    PartialFailure,
    NotFound,
}

impl ErrorKind {
    /// Classifies a backend outcome code. Unknown codes are backend rejections.
    pub fn from_code(code: &str) -> Self {
        match code {
            "authorization_denied" => Self::AuthorizationDenied,
            "validation_failed" => Self::ValidationFailed,
            "prerequisite_not_met" | "bridge_not_configured" | "token_required" => {
                Self::PrerequisiteNotMet
            }
            "backend_unreachable" => Self::BackendUnreachable,
            "not_found" | "file_not_found" | "conflict" => Self::NotFound,
            "partial_failure" => Self::PartialFailure,
            _ => Self::BackendRejected,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::AuthorizationDenied => "authorization_denied",
            Self::ValidationFailed => "validation_failed",
            Self::PrerequisiteNotMet => "prerequisite_not_met",
            Self::BackendUnreachable => "backend_unreachable",
            Self::BackendRejected => "backend_rejected",
            Self::PartialFailure => "partial_failure",
            Self::NotFound => "not_found",
        }
    }

    /// HTTP-equivalent status used when no step named one explicitly.
    pub fn default_status(self) -> u16 {
        match self {
            Self::AuthorizationDenied => 403,
            Self::ValidationFailed => 400,
            Self::NotFound => 404,
            Self::BackendUnreachable => 503,
            Self::PartialFailure => 200,
            Self::PrerequisiteNotMet | Self::BackendRejected => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
