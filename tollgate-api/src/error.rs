//! Error Types for Tollgate API
//!
//! This module defines error handling for the API layer, including:
//! - ErrorCode enum: the business error-code catalog and its HTTP statuses
//! - ApiError struct for structured error responses
//! - IntoResponse implementation rendering the [`CommonResp`] envelope
//! - Conversions from the library error types
//!
//! Business codes use a prefix scheme: `A` for client errors, `B` for
//! system errors and `C` for third-party errors.

use crate::response::{CommonResp, SUCCESS_CODE};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tollgate_core::{
    CacheError, ConfigError, ExpressionError, IdempotencyError, RejectCode, TollgateError,
};
use tollgate_idempotent::GuardError;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Business error codes.
///
/// Each code maps to an HTTP status and carries a default message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Success,

    // ========================================================================
    // Client Errors (A****)
    // ========================================================================
    /// Generic client-side error
    ClientError,

    /// Caller identity could not be established
    UserLoginError,

    /// Missing or invalid credentials, including idempotency tokens
    Unauthorized,

    /// Request parameters could not be read
    RequestParamError,

    /// Request parameter has the wrong format
    InvalidParam,

    /// Required request parameter is missing
    MissingRequiredParam,

    /// Requested resource does not exist
    NotFound,

    /// A concurrent identical request holds the idempotency lock
    TooManyRequests,

    /// The request was already processed
    RepeatedRequest,

    // ========================================================================
    // System Errors (B****)
    // ========================================================================
    SystemError,

    SystemTimeout,

    /// Rate limiter rejected the request
    SystemLimitError,

    // ========================================================================
    // Third-Party Errors (C****)
    // ========================================================================
    ThirdPartyError,

    /// Backing store failure
    CacheError,

    MessageConsumeError,
}

impl ErrorCode {
    /// Business code string.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::Success => SUCCESS_CODE,
            ErrorCode::ClientError => "A0001",
            ErrorCode::UserLoginError => "A0200",
            ErrorCode::Unauthorized => "A0301",
            ErrorCode::RequestParamError => "A0400",
            ErrorCode::InvalidParam => "A0401",
            ErrorCode::MissingRequiredParam => "A0402",
            ErrorCode::NotFound => "A0404",
            ErrorCode::TooManyRequests => "A0501",
            ErrorCode::RepeatedRequest => "A0506",
            ErrorCode::SystemError => "B0000",
            ErrorCode::SystemTimeout => "B0100",
            ErrorCode::SystemLimitError => "B0102",
            ErrorCode::ThirdPartyError => "C0001",
            ErrorCode::CacheError => "C0102",
            ErrorCode::MessageConsumeError => "C0105",
        }
    }

    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Success => StatusCode::OK,

            ErrorCode::ClientError
            | ErrorCode::RequestParamError
            | ErrorCode::InvalidParam
            | ErrorCode::MissingRequiredParam => StatusCode::BAD_REQUEST,

            ErrorCode::UserLoginError | ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,

            ErrorCode::NotFound => StatusCode::NOT_FOUND,

            ErrorCode::TooManyRequests | ErrorCode::SystemLimitError => {
                StatusCode::TOO_MANY_REQUESTS
            }

            ErrorCode::RepeatedRequest => StatusCode::CONFLICT,

            ErrorCode::SystemError => StatusCode::INTERNAL_SERVER_ERROR,

            ErrorCode::SystemTimeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::ThirdPartyError | ErrorCode::MessageConsumeError => {
                StatusCode::BAD_GATEWAY
            }

            ErrorCode::CacheError => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "成功",
            ErrorCode::ClientError => "用户端错误",
            ErrorCode::UserLoginError => "用户登录异常",
            ErrorCode::Unauthorized => "访问未授权",
            ErrorCode::RequestParamError => "用户请求参数错误",
            ErrorCode::InvalidParam => "请求参数格式不匹配",
            ErrorCode::MissingRequiredParam => "请求必填参数为空",
            ErrorCode::NotFound => "请求资源不存在",
            ErrorCode::TooManyRequests => "请求次数超出限制",
            ErrorCode::RepeatedRequest => "请勿重复提交",
            ErrorCode::SystemError => "系统执行错误",
            ErrorCode::SystemTimeout => "系统执行超时",
            ErrorCode::SystemLimitError => "系统限流",
            ErrorCode::ThirdPartyError => "第三方服务错误",
            ErrorCode::CacheError => "缓存服务异常",
            ErrorCode::MessageConsumeError => "消息消费异常",
        }
    }

    /// Look a code up by its business code string.
    pub fn from_code(code: &str) -> Option<Self> {
        ALL_CODES.iter().copied().find(|c| c.code() == code)
    }

    pub fn is_client_error(&self) -> bool {
        self.code().starts_with('A')
    }

    pub fn is_system_error(&self) -> bool {
        self.code().starts_with('B')
    }

    pub fn is_third_party_error(&self) -> bool {
        self.code().starts_with('C')
    }
}

const ALL_CODES: [ErrorCode; 16] = [
    ErrorCode::Success,
    ErrorCode::ClientError,
    ErrorCode::UserLoginError,
    ErrorCode::Unauthorized,
    ErrorCode::RequestParamError,
    ErrorCode::InvalidParam,
    ErrorCode::MissingRequiredParam,
    ErrorCode::NotFound,
    ErrorCode::TooManyRequests,
    ErrorCode::RepeatedRequest,
    ErrorCode::SystemError,
    ErrorCode::SystemTimeout,
    ErrorCode::SystemLimitError,
    ErrorCode::ThirdPartyError,
    ErrorCode::CacheError,
    ErrorCode::MessageConsumeError,
];

impl From<RejectCode> for ErrorCode {
    fn from(code: RejectCode) -> Self {
        match code {
            RejectCode::ClientError => ErrorCode::ClientError,
            RejectCode::Unauthorized => ErrorCode::Unauthorized,
            RejectCode::TooManyRequests => ErrorCode::TooManyRequests,
            RejectCode::UserLoginError => ErrorCode::UserLoginError,
            RejectCode::RepeatedRequest => ErrorCode::RepeatedRequest,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error returned by every endpoint.
///
/// Rendered as a failure [`CommonResp`] with the code's HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details, logged but never sent to the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Request id echoed in the envelope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            request_id: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn request_param_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestParamError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SystemError, message)
    }

    pub fn system_limit_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SystemLimitError, message)
    }

    pub fn cache_error() -> Self {
        Self::from_code(ErrorCode::CacheError)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Some(details) = &self.details {
            tracing::debug!(code = %self.code, details = %details, "Error details");
        }
        let body = CommonResp::<()>::failure(self.code, self.message)
            .with_request_id(self.request_id.unwrap_or_default());
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM LIBRARY ERRORS
// ============================================================================

impl From<IdempotencyError> for ApiError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::Rejected { code, message } => Self::new(code.into(), message),
            IdempotencyError::RepeatConsumption { status } => Self::from_code(
                ErrorCode::RepeatedRequest,
            )
            .with_details(serde_json::json!({ "consumeStatus": status.code() })),
            other => {
                tracing::error!("Idempotency wiring error: {}", other);
                Self::system_error(other.to_string())
            }
        }
    }
}

/// Store failures are logged in full and reported generically.
impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        tracing::error!("Cache error: {}", err);
        match err {
            CacheError::LockTimeout { .. } => Self::from_code(ErrorCode::SystemTimeout),
            _ => Self::cache_error(),
        }
    }
}

impl From<ExpressionError> for ApiError {
    fn from(err: ExpressionError) -> Self {
        tracing::error!("Key expression error: {}", err);
        Self::system_error(err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!("Configuration error: {}", err);
        Self::system_error(err.to_string())
    }
}

impl From<TollgateError> for ApiError {
    fn from(err: TollgateError) -> Self {
        match err {
            TollgateError::Cache(e) => e.into(),
            TollgateError::Expression(e) => e.into(),
            TollgateError::Idempotency(e) => e.into(),
            TollgateError::Config(e) => e.into(),
        }
    }
}

impl From<GuardError<ApiError>> for ApiError {
    fn from(err: GuardError<ApiError>) -> Self {
        match err {
            GuardError::Idempotency(e) => e.into(),
            GuardError::Operation(e) => e,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::request_param_error(rejection.body_text())
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
