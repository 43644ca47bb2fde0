//! 批次分发
//!
//! 单个分发任务按入队顺序处理批次：反序列化 -> 业务回调 -> 整批确认或整批死信。
//! 回调在累积器锁之外执行，慢回调不会阻塞下一批消息的缓冲。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::BrokerChannel;
use super::accumulator::Batch;
use crate::error::OmsError;

/// 每个 topic 的领域能力：解码单条消息、处理整批消息
///
/// 以泛型参数注入消费者，每个 topic 独立实现、独立测试。
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    type Message: DeserializeOwned + Send + 'static;
    type Error: std::fmt::Display + Send + 'static;

    /// 默认按 JSON 解码
    fn decode(&self, payload: &[u8]) -> Result<Self::Message, OmsError> {
        serde_json::from_slice(payload).map_err(|e| OmsError::Deserialization(e.to_string()))
    }

    /// 返回错误时整批进入死信队列
    async fn process_batch(&self, messages: Vec<Self::Message>) -> Result<(), Self::Error>;
}

/// 单个批次的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Acked {
        count: usize,
        watermark: u64,
    },
    DeadLettered {
        count: usize,
        watermark: u64,
        reason: String,
    },
}

impl BatchOutcome {
    pub fn is_acked(&self) -> bool {
        matches!(self, Self::Acked { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Acked { .. } => "acked",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// 批次分发器
pub struct BatchDispatcher<H: BatchHandler> {
    queue: String,
    handler: Arc<H>,
    channel: Arc<dyn BrokerChannel>,
}

impl<H: BatchHandler> BatchDispatcher<H> {
    pub fn new(queue: impl Into<String>, handler: Arc<H>, channel: Arc<dyn BrokerChannel>) -> Self {
        Self {
            queue: queue.into(),
            handler,
            channel,
        }
    }

    /// 按顺序消费分发队列，直到所有发送端关闭
    pub async fn run(self, mut batches: mpsc::UnboundedReceiver<Batch>) {
        while let Some(batch) = batches.recv().await {
            self.dispatch(batch).await;
        }
        info!(queue = %self.queue, "分发队列已关闭，分发任务退出");
    }

    /// 处理一个批次并以水位线整批确认或拒绝
    ///
    /// 批次内的任何错误都在这里被吸收，不会向上传播。
    pub async fn dispatch(&self, batch: Batch) -> BatchOutcome {
        let count = batch.len();
        let watermark = batch.watermark();
        let started = Instant::now();

        let outcome = match self.decode_and_process(&batch).await {
            Ok(()) => {
                if let Err(e) = self.channel.ack(watermark, true).await {
                    // 通道关闭后的确认直接忽略，未确认的投递会由 broker 重新投递
                    warn!(queue = %self.queue, watermark, error = %e, "批次确认失败");
                }
                info!(queue = %self.queue, count, watermark, "批次处理成功");
                BatchOutcome::Acked { count, watermark }
            }
            Err(reason) => {
                if let Err(e) = self.channel.nack(watermark, true, false).await {
                    warn!(queue = %self.queue, watermark, error = %e, "批次拒绝失败");
                }
                error!(queue = %self.queue, count, watermark, reason = %reason, "批次处理失败，已转入死信队列");
                BatchOutcome::DeadLettered {
                    count,
                    watermark,
                    reason,
                }
            }
        };

        record_batch_metrics(&self.queue, &outcome, count, started.elapsed().as_secs_f64());
        outcome
    }

    async fn decode_and_process(&self, batch: &Batch) -> Result<(), String> {
        let messages = batch
            .deliveries()
            .iter()
            .map(|d| {
                self.handler.decode(&d.payload).map_err(|e| {
                    format!("delivery_tag={} {}", d.delivery_tag, e)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.handler
            .process_batch(messages)
            .await
            .map_err(|e| e.to_string())
    }
}

fn record_batch_metrics(queue: &str, outcome: &BatchOutcome, count: usize, duration_secs: f64) {
    metrics::counter!(
        "oms_consumer_batches_total",
        "queue" => queue.to_string(),
        "outcome" => outcome.label()
    )
    .increment(1);
    metrics::histogram!("oms_consumer_batch_size", "queue" => queue.to_string())
        .record(count as f64);
    metrics::histogram!("oms_consumer_batch_duration_seconds", "queue" => queue.to_string())
        .record(duration_secs);
}
