//! HTTP 错误响应
//!
//! 把服务层错误映射为状态码和统一响应体

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::LoyaltyError;

/// HTTP 层错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Loyalty(#[from] LoyaltyError),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        let err = match self {
            Self::Validation(_) => return StatusCode::BAD_REQUEST,
            Self::Loyalty(err) => err,
        };
        match err {
            LoyaltyError::Validation(_)
            | LoyaltyError::NotYetEligible(_)
            | LoyaltyError::MissingCustomer(_)
            | LoyaltyError::InvalidTierOrder(_) => StatusCode::BAD_REQUEST,

            LoyaltyError::CustomerNotFound { .. }
            | LoyaltyError::TierNotFound(_)
            | LoyaltyError::TransactionNotFound { .. }
            | LoyaltyError::MigrationJobNotFound(_) => StatusCode::NOT_FOUND,

            LoyaltyError::TierHasActiveMembers { .. }
            | LoyaltyError::DuplicateTierName(_)
            | LoyaltyError::DuplicateFloorTier(_)
            | LoyaltyError::InvalidJobTransition { .. }
            | LoyaltyError::ConcurrencyConflict => StatusCode::CONFLICT,

            LoyaltyError::EmptyCatalog(_) => StatusCode::UNPROCESSABLE_ENTITY,

            LoyaltyError::OrderFeed(_) | LoyaltyError::CreditIssuance(_) => StatusCode::BAD_GATEWAY,

            LoyaltyError::Database(_) | LoyaltyError::Serialization(_) | LoyaltyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Loyalty(err) => err.error_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LoyaltyError::TierNotFound(1), StatusCode::NOT_FOUND),
            (
                LoyaltyError::TierHasActiveMembers { tier_id: 1, members: 2 },
                StatusCode::CONFLICT,
            ),
            (LoyaltyError::EmptyCatalog("s".to_string()), StatusCode::UNPROCESSABLE_ENTITY),
            (LoyaltyError::OrderFeed("down".to_string()), StatusCode::BAD_GATEWAY),
            (LoyaltyError::Internal("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_error_code_passthrough() {
        let err = ApiError::from(LoyaltyError::DuplicateTierName("Gold".to_string()));
        assert_eq!(err.error_code(), "DUPLICATE_TIER_NAME");
        assert_eq!(ApiError::Validation("x".to_string()).error_code(), "VALIDATION_ERROR");
    }
}
