use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 协调器错误类型定义
#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("操作未找到: {id}")]
    OperationNotFound { id: String },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("非法状态: {0}")]
    InvalidState(String),

    #[error("没有可用的节点执行操作: {operation_type}")]
    NoEligibleNodes { operation_type: String },

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("{failed} of {total} nodes failed: {causes}")]
    AggregateFailure {
        failed: usize,
        total: usize,
        causes: String,
    },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("远程节点执行失败: {0}")]
    Remote(String),

    #[error("操作已取消: {0}")]
    Cancelled(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

/// 可序列化的错误分类，用于在共享结构中携带失败信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    NoEligibleNodes,
    Timeout,
    AggregateFailure,
    Network,
    Remote,
    Cancelled,
    Configuration,
    Serialization,
    Internal,
}

impl CoordinatorError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn operation_not_found<S: Into<String>>(id: S) -> Self {
        Self::OperationNotFound { id: id.into() }
    }
    pub fn node_not_found<S: Into<String>>(id: S) -> Self {
        Self::NodeNotFound { id: id.into() }
    }
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }
    pub fn no_eligible_nodes<S: Into<String>>(operation_type: S) -> Self {
        Self::NoEligibleNodes {
            operation_type: operation_type.into(),
        }
    }
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }
    pub fn remote<S: Into<String>>(msg: S) -> Self {
        Self::Remote(msg.into())
    }
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 只有网络和超时类的瞬时错误允许在执行器内部重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Network(_) | CoordinatorError::Timeout(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::Validation(_) => ErrorKind::Validation,
            CoordinatorError::OperationNotFound { .. } | CoordinatorError::NodeNotFound { .. } => {
                ErrorKind::NotFound
            }
            CoordinatorError::InvalidState(_) => ErrorKind::InvalidState,
            CoordinatorError::NoEligibleNodes { .. } => ErrorKind::NoEligibleNodes,
            CoordinatorError::Timeout(_) => ErrorKind::Timeout,
            CoordinatorError::AggregateFailure { .. } => ErrorKind::AggregateFailure,
            CoordinatorError::Network(_) => ErrorKind::Network,
            CoordinatorError::Remote(_) => ErrorKind::Remote,
            CoordinatorError::Cancelled(_) => ErrorKind::Cancelled,
            CoordinatorError::Configuration(_) => ErrorKind::Configuration,
            CoordinatorError::Serialization(_) => ErrorKind::Serialization,
            CoordinatorError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn user_message(&self) -> &str {
        match self {
            CoordinatorError::OperationNotFound { .. } => "请求的操作不存在",
            CoordinatorError::NodeNotFound { .. } => "请求的节点不存在",
            CoordinatorError::Validation(_) => "输入数据验证失败",
            CoordinatorError::InvalidState(_) => "当前状态不允许该操作",
            CoordinatorError::NoEligibleNodes { .. } => "没有可用的节点，请稍后重试",
            CoordinatorError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CoordinatorError {
    fn from(err: anyhow::Error) -> Self {
        CoordinatorError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(CoordinatorError::network("connection refused").is_retryable());
        assert!(CoordinatorError::timeout("rpc").is_retryable());
        assert!(!CoordinatorError::validation("bad args").is_retryable());
        assert!(!CoordinatorError::remote("image not found").is_retryable());
        assert!(!CoordinatorError::cancelled("op-1").is_retryable());
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            CoordinatorError::operation_not_found("op-1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoordinatorError::node_not_found("node-1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoordinatorError::no_eligible_nodes("pull").kind(),
            ErrorKind::NoEligibleNodes
        );
    }

    #[test]
    fn test_aggregate_failure_message() {
        let err = CoordinatorError::AggregateFailure {
            failed: 1,
            total: 3,
            causes: "node-b: 网络错误: reset".to_string(),
        };
        assert!(err.to_string().starts_with("1 of 3 nodes failed"));
    }

    #[test]
    fn test_from_serde_error() {
        let err: CoordinatorError = serde_json::from_str::<u32>("oops").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }
}
