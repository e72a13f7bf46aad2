//! 错误定义模块

use crate::models::LifecycleState;
use thiserror::Error;

/// 实验室系统统一错误类型
#[derive(Error, Debug)]
pub enum LabError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    /// 状态图不允许的标本状态转换，由调用方选择合法转换后重试
    #[error("无效状态转换: 标本 {specimen} 从 {from} 到 {to}")]
    InvalidTransition {
        specimen: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// 质控结果中的分析物在测试定义中没有均值/标准差
    #[error("缺少参考统计: 质控 {definition} 的分析物 {analyte} 没有均值/标准差")]
    MissingReferenceStats { definition: String, analyte: String },

    /// 两个写入方竞争同一实体，交由调用方决定是否重试
    #[error("并发修改冲突: {entity} 期望版本 {expected}，实际版本 {actual}")]
    ConcurrentModification {
        entity: String,
        expected: u64,
        actual: u64,
    },
}

impl LabError {
    /// 是否为调用方可通过重试解决的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, LabError::ConcurrentModification { .. })
    }
}

/// 实验室系统统一结果类型
pub type Result<T> = std::result::Result<T, LabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message_names_states() {
        let err = LabError::InvalidTransition {
            specimen: "20261019-SER-0001".to_string(),
            from: LifecycleState::Rejected,
            to: LifecycleState::Processing,
        };

        let message = err.to_string();
        assert!(message.contains("20261019-SER-0001"));
        assert!(message.contains("REJECTED"));
        assert!(message.contains("PROCESSING"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_concurrent_modification_is_retryable() {
        let err = LabError::ConcurrentModification {
            entity: "specimen 20261019-SER-0001".to_string(),
            expected: 3,
            actual: 4,
        };
        assert!(err.is_retryable());
    }
}
