//! lapin 实现的 broker 通道
//!
//! 每次 `open_channel` 建立一条独立连接并在其上打开一个通道，
//! 连接与通道的所有权归调用方（消费者或发布者）所有，`close` 时一并释放。
//! 首次发布前把通道切换到 publisher confirm 模式，只有 broker ack 的消息才算发布成功。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::accumulator::PendingDelivery;
use super::{BrokerChannel, BrokerConnector, DeadLetterArgs, DeliveryStream, ExchangeType};
use crate::config::RabbitMqSettings;
use crate::error::OmsError;

/// AMQP reply code 200：正常关闭
const REPLY_SUCCESS: u16 = 200;

/// 持久化投递模式
const PERSISTENT: u8 = 2;

// ---------------------------------------------------------------------------
// LapinConnector
// ---------------------------------------------------------------------------

/// 基于 lapin 的连接器
#[derive(Clone)]
pub struct LapinConnector {
    uri: String,
    endpoint: String,
}

impl LapinConnector {
    pub fn new(settings: &RabbitMqSettings) -> Self {
        Self {
            uri: settings.amqp_uri(),
            endpoint: settings.endpoint(),
        }
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, OmsError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        info!(endpoint = %self.endpoint, channel_id = channel.id(), "RabbitMQ 连接已建立");

        Ok(Arc::new(LapinChannel {
            connection,
            channel,
            confirms: OnceCell::new(),
            closed: AtomicBool::new(false),
        }))
    }
}

// ---------------------------------------------------------------------------
// LapinChannel
// ---------------------------------------------------------------------------

struct LapinChannel {
    connection: Connection,
    channel: Channel,
    /// confirm 模式只需开启一次
    confirms: OnceCell<()>,
    closed: AtomicBool,
}

fn exchange_kind(kind: ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Topic => ExchangeKind::Topic,
        ExchangeType::Direct => ExchangeKind::Direct,
    }
}

fn dead_letter_table(args: Option<DeadLetterArgs>) -> FieldTable {
    let mut table = FieldTable::default();
    if let Some(args) = args {
        table.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(args.exchange.into()),
        );
        table.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(args.routing_key.into()),
        );
    }
    table
}

/// 只有 broker 的 ack 算发布成功
fn check_confirmation(
    confirmation: Confirmation,
    exchange: &str,
    routing_key: &str,
) -> Result<(), OmsError> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) | Confirmation::NotRequested => Err(OmsError::PublishNotConfirmed {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        }),
    }
}

fn topology_error(object: String) -> impl FnOnce(lapin::Error) -> OmsError {
    move |source| OmsError::Topology { object, source }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_exchange(
        &self,
        exchange: &str,
        kind: ExchangeType,
        durable: bool,
        auto_delete: bool,
    ) -> Result<(), OmsError> {
        self.channel
            .exchange_declare(
                exchange,
                exchange_kind(kind),
                ExchangeDeclareOptions {
                    durable,
                    auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(topology_error(format!("exchange {exchange}")))
    }

    async fn declare_queue(
        &self,
        queue: &str,
        durable: bool,
        dead_letter: Option<DeadLetterArgs>,
    ) -> Result<(), OmsError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    ..Default::default()
                },
                dead_letter_table(dead_letter),
            )
            .await
            .map(|q| debug!(queue = %q.name(), messages = q.message_count(), "队列已声明"))
            .map_err(topology_error(format!("queue {queue}")))
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), OmsError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(topology_error(format!("binding {queue} -> {exchange} ({routing_key})")))
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), OmsError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, OmsError> {
        // no_ack 默认为 false，即手动确认
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue, consumer_tag, "已订阅队列");

        Ok(consumer
            .map(|item| {
                item.map(|delivery| PendingDelivery::new(delivery.data, delivery.delivery_tag))
                    .map_err(OmsError::from)
            })
            .boxed())
    }

    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), OmsError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await?;
        Ok(())
    }

    async fn nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), OmsError> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), OmsError> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);

        self.confirms
            .get_or_try_init(|| async {
                self.channel
                    .confirm_select(ConfirmSelectOptions::default())
                    .await?;
                debug!(channel_id = self.channel.id(), "通道已开启 publisher confirm");
                Ok::<(), OmsError>(())
            })
            .await?;

        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;
        check_confirmation(confirmation, exchange, routing_key)
    }

    async fn close(&self) -> Result<(), OmsError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let channel_result = self.channel.close(REPLY_SUCCESS, "consumer stopped").await;
        let connection_result = self.connection.close(REPLY_SUCCESS, "consumer stopped").await;
        info!(channel_id = self.channel.id(), "RabbitMQ 通道与连接已关闭");

        channel_result?;
        connection_result?;
        Ok(())
    }
}
