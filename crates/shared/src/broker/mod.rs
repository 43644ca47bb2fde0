//! RabbitMQ 基础设施
//!
//! 批量消费者的核心：拓扑声明、路由解析、批次累积与分发、消费者生命周期。
//! 通过 `BrokerConnector` / `BrokerChannel` 两个 trait 隔离 AMQP 客户端，
//! 生产环境使用 lapin 实现，测试中注入 mock。

pub mod accumulator;
pub mod amqp;
pub mod consumer;
pub mod dispatcher;
pub mod publisher;
pub mod routing;
pub mod topology;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::OmsError;

pub use accumulator::{Batch, BatchAccumulator, PendingDelivery};
pub use amqp::LapinConnector;
pub use consumer::{BatchConsumer, ConsumerState};
pub use dispatcher::{BatchDispatcher, BatchHandler, BatchOutcome};
pub use publisher::{MessagePublisher, PublishSummary};
pub use routing::{ResolvedTopic, resolve_routing_key};
pub use topology::declare_topology;

/// 交换机类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Topic,
    Direct,
}

/// 工作队列的死信参数（x-dead-letter-exchange / x-dead-letter-routing-key）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterArgs {
    pub exchange: String,
    pub routing_key: String,
}

/// 订阅得到的投递流，传输层错误以 `Err` 形式出现
pub type DeliveryStream = BoxStream<'static, Result<PendingDelivery, OmsError>>;

/// AMQP 通道操作的抽象
///
/// 只暴露批量消费者与发布者实际用到的协议操作。
/// 实现持有通道及其所属连接，`close` 一并释放两者。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(
        &self,
        exchange: &str,
        kind: ExchangeType,
        durable: bool,
        auto_delete: bool,
    ) -> Result<(), OmsError>;

    async fn declare_queue(
        &self,
        queue: &str,
        durable: bool,
        dead_letter: Option<DeadLetterArgs>,
    ) -> Result<(), OmsError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), OmsError>;

    /// 设置未确认投递的上限
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), OmsError>;

    /// 以手动确认模式订阅队列
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, OmsError>;

    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), OmsError>;

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool)
    -> Result<(), OmsError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), OmsError>;

    async fn close(&self) -> Result<(), OmsError>;
}

/// 建立连接并打开通道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, OmsError>;
}
