//! 统一错误处理模块
//!
//! 定义订单审计链路中共享的错误类型，按发生阶段划分：
//! 启动期的配置/拓扑错误是致命的，运行期的批次错误在分发边界被吸收并转为死信。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum OmsError {
    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("配置无效: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    #[error("未找到队列的路由键映射: queue={queue}")]
    RoutingKeyNotFound { queue: String },

    // ==================== Broker 错误 ====================
    #[error("Broker 错误: {0}")]
    Broker(#[from] lapin::Error),

    #[error("拓扑声明失败: {object} - {source}")]
    Topology {
        object: String,
        #[source]
        source: lapin::Error,
    },

    #[error("消息未被 broker 确认: exchange={exchange}, routing_key={routing_key}")]
    PublishNotConfirmed { exchange: String, routing_key: String },

    #[error("消息流已关闭: queue={queue}")]
    DeliveryStreamClosed { queue: String },

    // ==================== 消费者生命周期 ====================
    #[error("消费者状态不允许该操作: 当前={current}")]
    InvalidState { current: String },

    #[error("启动过程被关闭信号取消")]
    StartupCancelled,

    #[error("消费者已停止，批次无法入队")]
    ConsumerStopped,

    // ==================== 批次处理错误 ====================
    #[error("消息反序列化失败: {0}")]
    Deserialization(String),

    #[error("消息序列化失败: {0}")]
    Serialization(String),

    #[error("批次处理失败: {0}")]
    Handler(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, OmsError>;

impl OmsError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::RoutingKeyNotFound { .. } => "ROUTING_KEY_NOT_FOUND",
            Self::Broker(_) => "BROKER_ERROR",
            Self::Topology { .. } => "TOPOLOGY_ERROR",
            Self::PublishNotConfirmed { .. } => "PUBLISH_NOT_CONFIRMED",
            Self::DeliveryStreamClosed { .. } => "DELIVERY_STREAM_CLOSED",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::StartupCancelled => "STARTUP_CANCELLED",
            Self::ConsumerStopped => "CONSUMER_STOPPED",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Handler(_) => "HANDLER_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为启动期致命错误
    ///
    /// 配置与拓扑错误不重试，直接中止宿主进程的启动。
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidConfig { .. }
                | Self::RoutingKeyNotFound { .. }
                | Self::Topology { .. }
        )
    }

    /// 是否为可重试错误
    ///
    /// 只有传输层故障值得由上层（进程重启策略）重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Broker(_) | Self::DeliveryStreamClosed { .. })
    }

    /// 便捷构造配置校验错误
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}
