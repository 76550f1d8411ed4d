//! Response envelope shared by every endpoint.
//!
//! Success and failure bodies have the same shape:
//! `{ code, message, data, timestamp, requestId }`.

use crate::error::ErrorCode;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Business code of a successful response.
pub const SUCCESS_CODE: &str = "00000";

/// Message of a successful response.
pub const SUCCESS_MESSAGE: &str = "成功";

/// Uniform response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonResp<T> {
    /// `00000` on success, otherwise an [`ErrorCode`] business code.
    pub code: String,
    pub message: String,
    pub data: Option<T>,
    /// Epoch milliseconds at which the response was built.
    pub timestamp: i64,
    /// Request id from the caller's user context.
    pub request_id: String,
}

impl<T> CommonResp<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: SUCCESS_CODE.to_string(),
            message: SUCCESS_MESSAGE.to_string(),
            data: Some(data),
            timestamp: chrono::Utc::now().timestamp_millis(),
            request_id: String::new(),
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code().to_string(),
            message: message.into(),
            data: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            request_id: String::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

impl<T: Serialize> IntoResponse for CommonResp<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() -> Result<(), serde_json::Error> {
        let resp = CommonResp::success("tok").with_request_id("req-1");
        let json = serde_json::to_value(&resp)?;
        assert_eq!(json["code"], "00000");
        assert_eq!(json["data"], "tok");
        assert_eq!(json["requestId"], "req-1");
        assert!(json["timestamp"].as_i64().is_some_and(|ts| ts > 0));
        Ok(())
    }

    #[test]
    fn test_failure_has_null_data() -> Result<(), serde_json::Error> {
        let resp: CommonResp<String> =
            CommonResp::failure(ErrorCode::RepeatedRequest, "请勿重复提交");
        assert!(!resp.is_success());
        let json = serde_json::to_value(&resp)?;
        assert_eq!(json["code"], "A0506");
        assert_eq!(json["message"], "请勿重复提交");
        assert!(json["data"].is_null());
        Ok(())
    }
}
