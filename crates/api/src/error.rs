use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coordinator_core::CoordinatorError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("协调器错误: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP状态码和稳定的错误码
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Coordinator(err) => match err {
                CoordinatorError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                CoordinatorError::OperationNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "OPERATION_NOT_FOUND")
                }
                CoordinatorError::NodeNotFound { .. } => (StatusCode::NOT_FOUND, "NODE_NOT_FOUND"),
                CoordinatorError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
                CoordinatorError::NoEligibleNodes { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "NO_ELIGIBLE_NODES")
                }
                CoordinatorError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            ApiError::Coordinator(err) => err.to_string(),
            ApiError::BadRequest(msg) => format!("请求参数错误: {}", msg),
            ApiError::NotFound => "请求的资源不存在".to_string(),
            // 内部错误细节只写日志
            ApiError::Internal(_) => "系统内部错误".to_string(),
        };

        if status.is_server_error() {
            error!(code, "请求处理失败: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
