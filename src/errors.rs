use http::StatusCode;
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

/// Machine-checkable reason attached to every failed operation.
///
/// Callers branch on this instead of inspecting the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    InvalidState,
    ExpiredToken,
    InvalidToken,
    InsufficientFunds,
    TransactionFailed,
    Database,
    Internal,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Expired token: {0}")]
    ExpiredToken(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Insufficient funds: wallet of account {account_id} holds {balance}, {requested} requested")]
    InsufficientFunds {
        account_id: i32,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn not_found(entity: &str, key: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, key))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ValidationError(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::ExpiredToken(_) => ErrorCode::ExpiredToken,
            Self::InvalidToken(_) => ErrorCode::InvalidToken,
            Self::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            Self::TransactionFailed(_) => ErrorCode::TransactionFailed,
            Self::DatabaseError(_) => ErrorCode::Database,
            Self::InternalError(_) => ErrorCode::Internal,
        }
    }

    /// Business failures the caller can act on. Everything else is a fatal
    /// persistence or programming fault.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::DatabaseError(_) | Self::InternalError(_))
    }

    /// Returns the HTTP status code an API layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::ExpiredToken(_) => StatusCode::GONE,
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::TransactionFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for an external response. Persistence details stay in the logs.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}
