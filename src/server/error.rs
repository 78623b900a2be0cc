// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::input::InputError;
use super::types::*;
use crate::compiler::CompileError;
use crate::interpreter::EvalError;
use crate::policy::PolicyError;
use crate::storage::StorageError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Errors surfaced by the HTTP API. Each kind maps onto one status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidParameter(String),

    #[error("{0}")]
    InputConflict(String),

    #[error("{message}")]
    Compile {
        message: &'static str,
        errors: Vec<CompileError>,
    },

    #[error("{0}")]
    WriteConflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("error(s) occurred while evaluating query")]
    Evaluation(EvalError),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidParameter(_) | ApiError::InputConflict(_) | ApiError::Compile { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::WriteConflict(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Evaluation(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorV1 {
        let (code, errors) = match self {
            ApiError::InvalidParameter(_) | ApiError::InputConflict(_) => {
                (CODE_INVALID_PARAMETER, vec![])
            }
            ApiError::Compile { errors, .. } => (
                CODE_INVALID_PARAMETER,
                errors.iter().cloned().map(ErrorDetailV1::Ast).collect(),
            ),
            ApiError::WriteConflict(_) => (CODE_RESOURCE_CONFLICT, vec![]),
            ApiError::NotFound(_) => (CODE_RESOURCE_NOT_FOUND, vec![]),
            ApiError::Evaluation(e) => (
                CODE_EVALUATION,
                vec![ErrorDetailV1::Eval(EvalErrorV1 {
                    code: e.code(),
                    sub_code: e.sub_code(),
                    message: e.to_string(),
                })],
            ),
            ApiError::Internal(_) => (CODE_INTERNAL, vec![]),
        };
        ErrorV1 {
            code,
            message: self.to_string(),
            errors,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => ApiError::NotFound(e.to_string()),
            StorageError::WriteConflict(_) => ApiError::WriteConflict(e.to_string()),
            StorageError::InvalidPatch(_)
            | StorageError::BadPatchOperation(_)
            | StorageError::BadPatchPath(_) => ApiError::InvalidParameter(e.to_string()),
            StorageError::Internal(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Parse(errors) => ApiError::Compile {
                message: MSG_PARSE_MODULE,
                errors,
            },
            PolicyError::Compile(errors) => ApiError::Compile {
                message: MSG_COMPILE_MODULE,
                errors,
            },
            PolicyError::NotFound(_) => ApiError::NotFound(e.to_string()),
            PolicyError::InvalidId { .. } => ApiError::InvalidParameter(e.to_string()),
            PolicyError::Persist(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<InputError> for ApiError {
    fn from(e: InputError) -> Self {
        match e {
            InputError::Conflict => ApiError::InputConflict(e.to_string()),
            InputError::Format | InputError::MalformedBody(_) => {
                ApiError::InvalidParameter(e.to_string())
            }
        }
    }
}

impl From<EvalError> for ApiError {
    fn from(e: EvalError) -> Self {
        ApiError::Evaluation(e)
    }
}
