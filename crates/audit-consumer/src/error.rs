//! 审计消费者错误类型
//!
//! 任何错误都会让所在批次整批转入死信队列，这里只负责分类与描述。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("审计服务返回错误: status={status}, body={body}")]
    AuditApi { status: u16, body: String },

    #[error("审计服务请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("模拟故障: 第 {batch} 个批次")]
    InjectedFailure { batch: u64 },

    #[error(transparent)]
    Shared(#[from] oms_shared::error::OmsError),
}

impl AuditError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuditApi { .. } => "AUDIT_API_ERROR",
            Self::Http(_) => "AUDIT_HTTP_ERROR",
            Self::InjectedFailure { .. } => "INJECTED_FAILURE",
            Self::Shared(e) => e.code(),
        }
    }
}
