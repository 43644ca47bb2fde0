//! 消息发布
//!
//! 以 JSON 形式把领域事件发布到 topic 交换机，路由键取自消息本身。

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::{BrokerChannel, ExchangeType};
use crate::error::OmsError;
use crate::messages::RoutedMessage;

/// 批量发布结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub failed: usize,
}

/// 面向业务的消息发布者
#[derive(Clone)]
pub struct MessagePublisher {
    channel: Arc<dyn BrokerChannel>,
    exchange: String,
}

impl MessagePublisher {
    pub fn new(channel: Arc<dyn BrokerChannel>, exchange: impl Into<String>) -> Self {
        Self {
            channel,
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// 声明 topic 交换机，参数与消费端一致
    pub async fn declare_exchange(&self) -> Result<(), OmsError> {
        self.channel
            .declare_exchange(&self.exchange, ExchangeType::Topic, false, false)
            .await
    }

    /// 序列化并发布单条消息
    pub async fn publish<M>(&self, message: &M) -> Result<(), OmsError>
    where
        M: RoutedMessage + Serialize + Sync,
    {
        let payload =
            serde_json::to_vec(message).map_err(|e| OmsError::Serialization(e.to_string()))?;
        let routing_key = message.routing_key();

        self.channel
            .publish(&self.exchange, routing_key, &payload)
            .await?;
        debug!(exchange = %self.exchange, routing_key, bytes = payload.len(), "消息已发布");
        Ok(())
    }

    /// 逐条发布，单条失败不中断后续消息
    pub async fn publish_batch<M>(&self, messages: &[M]) -> PublishSummary
    where
        M: RoutedMessage + Serialize + Sync,
    {
        let mut summary = PublishSummary::default();
        for message in messages {
            match self.publish(message).await {
                Ok(()) => summary.published += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        exchange = %self.exchange,
                        routing_key = message.routing_key(),
                        error = %e,
                        "消息发布失败"
                    );
                }
            }
        }
        summary
    }

    pub async fn close(&self) -> Result<(), OmsError> {
        self.channel.close().await
    }
}
