//! 路由解析
//!
//! 启动时把 topic 配置与交换机映射表合并为一份不可变的 `ResolvedTopic`。
//! 找不到映射时拒绝启动，而不是悄悄跳过绑定。

use std::time::Duration;

use crate::config::{DeadLetterSettings, ExchangeMapping, RabbitMqSettings, TopicSettings};
use crate::error::OmsError;

/// 查找与 topic 队列名匹配的映射（忽略大小写）
pub fn resolve_routing_key<'a>(
    settings: &'a RabbitMqSettings,
    topic: &TopicSettings,
) -> Result<&'a ExchangeMapping, OmsError> {
    settings
        .exchange_mappings
        .iter()
        .find(|m| m.queue.eq_ignore_ascii_case(&topic.queue))
        .ok_or_else(|| OmsError::RoutingKeyNotFound {
            queue: topic.queue.clone(),
        })
}

/// 解析完成的 topic 配置，消费者生命周期内不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTopic {
    pub exchange: String,
    pub queue: String,
    pub routing_key_pattern: String,
    pub batch_size: u16,
    pub batch_timeout: Duration,
    pub dead_letter: DeadLetterSettings,
}

impl ResolvedTopic {
    /// 合并 topic 配置与映射表
    ///
    /// 映射上的死信配置优先于 topic 自身的死信配置。
    /// 直接构造的 `TopicSettings` 也在这里校验，保证预取值恰为两倍批次大小。
    pub fn resolve(settings: &RabbitMqSettings, topic: &TopicSettings) -> Result<Self, OmsError> {
        topic.validate(&format!("topic[{}]", topic.queue))?;
        let mapping = resolve_routing_key(settings, topic)?;

        let dead_letter = mapping
            .dead_letter
            .clone()
            .unwrap_or_else(|| topic.dead_letter.clone());

        Ok(Self {
            exchange: settings.exchange.clone(),
            queue: topic.queue.clone(),
            routing_key_pattern: mapping.routing_key_pattern.clone(),
            batch_size: topic.batch_size,
            batch_timeout: topic.batch_timeout(),
            dead_letter,
        })
    }

    /// 预取上限：允许当前批次分发期间，下一整批消息继续在途
    ///
    /// 经 `resolve` 得到的实例保证 `batch_size <= u16::MAX / 2`，结果恰为两倍。
    pub fn prefetch_count(&self) -> u16 {
        self.batch_size.saturating_mul(2)
    }
}
