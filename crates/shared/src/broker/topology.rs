//! 拓扑声明
//!
//! 消费者开始接收投递前，先确认死信链路存在：
//! topic 交换机 -> 死信交换机 -> 死信队列及绑定 -> 带死信参数的工作队列 -> 工作队列绑定。
//! 所有声明都是幂等的，参数相同的重复声明不会报错，也不会改变已有绑定。

use tracing::{debug, info};

use super::routing::ResolvedTopic;
use super::{BrokerChannel, DeadLetterArgs, ExchangeType};
use crate::error::OmsError;

/// 按顺序声明 topic 所需的全部拓扑，任一步失败即返回错误
pub async fn declare_topology(
    channel: &dyn BrokerChannel,
    topic: &ResolvedTopic,
) -> Result<(), OmsError> {
    let dl = &topic.dead_letter;

    channel
        .declare_exchange(&topic.exchange, ExchangeType::Topic, false, false)
        .await?;
    debug!(exchange = %topic.exchange, "topic 交换机已声明");

    channel
        .declare_exchange(&dl.exchange, ExchangeType::Direct, true, false)
        .await?;

    channel.declare_queue(&dl.queue, true, None).await?;
    channel
        .bind_queue(&dl.queue, &dl.exchange, &dl.routing_key)
        .await?;
    debug!(dlx = %dl.exchange, dlq = %dl.queue, "死信链路已声明");

    channel
        .declare_queue(
            &topic.queue,
            false,
            Some(DeadLetterArgs {
                exchange: dl.exchange.clone(),
                routing_key: dl.routing_key.clone(),
            }),
        )
        .await?;
    channel
        .bind_queue(&topic.queue, &topic.exchange, &topic.routing_key_pattern)
        .await?;

    info!(
        exchange = %topic.exchange,
        queue = %topic.queue,
        routing_key = %topic.routing_key_pattern,
        dlx = %dl.exchange,
        dlq = %dl.queue,
        "队列拓扑声明完成"
    );
    Ok(())
}
