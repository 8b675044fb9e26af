use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::responses::RequestMeta;

pub const E_BAD_RECIPIENT: &str = "BAD_RECIPIENT";
pub const E_BATCH_FAILURE: &str = "BATCH_FAILURE";
pub const E_DB_FAILURE: &str = "DB_FAILURE";
pub const E_GATEWAY_CONFIG: &str = "GATEWAY_CONFIG";
pub const E_LEDGER_FAILURE: &str = "LEDGER_FAILURE";
pub const E_PAYOUT_NOT_FOUND: &str = "PAYOUT_NOT_FOUND";
pub const E_RETRY_FAILURE: &str = "RETRY_FAILURE";

/// Core settlement error taxonomy. Anything that would corrupt financial
/// state fails loudly with one of these; expected operational hiccups
/// (gateway down, foreign webhooks) never surface here.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Unresolvable gateway or missing credentials.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad input from the initiating admin or service caller.
    #[error("validation error: {0}")]
    Validation(String),

    /// A precondition that must never be violated by correct callers,
    /// e.g. batching earnings owed to different recipients.
    #[error("logic error: {0}")]
    Logic(String),

    /// None of the requested earnings were claimable.
    #[error("no claimable earnings: {0}")]
    NothingToClaim(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl SettlementError {
    /// The message an admin caller should see. Validation and logic errors
    /// carry their specific reason; database errors stay generic.
    pub fn public_message(&self) -> String {
        match self {
            SettlementError::Db(_) => "internal storage failure".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::Validation(_)
            | SettlementError::Logic(_)
            | SettlementError::Config(_) => ApiError::BadRequest(e.public_message()),
            SettlementError::NothingToClaim(_) => ApiError::Conflict(e.public_message()),
            SettlementError::Db(inner) => ApiError::Internal(inner.into()),
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
