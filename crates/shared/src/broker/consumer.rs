//! 批量消费者生命周期
//!
//! 状态流转：Stopped -> Starting -> Running -> Stopping -> Stopped。
//!
//! 运行期间有三个任务：
//! - 接收任务：读取投递流并追加到累积器
//! - 定时任务：每个批次超时周期刷新一次累积器
//! - 分发任务：按顺序处理刷新出的批次并确认/拒绝
//!
//! 启动过程与关闭信号竞争，任一步失败或被取消都会释放已获取的通道。
//! 关闭由唯一的 `stop` 完成，可重复调用。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::accumulator::BatchAccumulator;
use super::dispatcher::{BatchDispatcher, BatchHandler};
use super::routing::ResolvedTopic;
use super::topology::declare_topology;
use super::{BrokerChannel, BrokerConnector, DeliveryStream};
use crate::config::{RabbitMqSettings, TopicSettings};
use crate::error::OmsError;

/// 关闭时等待分发队列中已刷新批次处理完的最长时间
const DISPATCH_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// 消费者状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// 运行期持有的资源，只在 Running 状态存在
struct RunningParts {
    channel: Arc<dyn BrokerChannel>,
    accumulator: Arc<BatchAccumulator>,
    timer: JoinHandle<()>,
    /// `run` 中已等到结束时置为 None
    intake: Option<JoinHandle<OmsError>>,
    dispatcher: JoinHandle<()>,
}

/// 批量消费者
///
/// 每个 topic 一个实例，业务逻辑由 `H` 提供。
pub struct BatchConsumer<H: BatchHandler> {
    topic: ResolvedTopic,
    consumer_tag: String,
    connector: Arc<dyn BrokerConnector>,
    handler: Arc<H>,
    state: ConsumerState,
    running: Option<RunningParts>,
}

impl<H: BatchHandler> BatchConsumer<H> {
    /// 解析路由与批次配置
    ///
    /// 配置错误在这里直接返回，不会触发任何 broker 调用。
    pub fn new(
        settings: &RabbitMqSettings,
        topic: &TopicSettings,
        connector: Arc<dyn BrokerConnector>,
        handler: Arc<H>,
    ) -> Result<Self, OmsError> {
        let topic = ResolvedTopic::resolve(settings, topic)?;
        let consumer_tag = format!("{}.{}", topic.queue, Uuid::now_v7());

        Ok(Self {
            topic,
            consumer_tag,
            connector,
            handler,
            state: ConsumerState::Stopped,
            running: None,
        })
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn topic(&self) -> &ResolvedTopic {
        &self.topic
    }

    /// 连接、声明拓扑、订阅并启动后台任务
    pub async fn start(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), OmsError> {
        if self.state != ConsumerState::Stopped {
            return Err(OmsError::InvalidState {
                current: self.state.to_string(),
            });
        }
        self.state = ConsumerState::Starting;
        info!(queue = %self.topic.queue, "批量消费者启动中");

        let channel = match until_shutdown(shutdown, self.connector.open_channel()).await {
            Ok(channel) => channel,
            Err(e) => {
                self.state = ConsumerState::Stopped;
                return Err(e);
            }
        };

        let deliveries = match self.prepare(channel.as_ref(), shutdown).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    warn!(queue = %self.topic.queue, error = %close_err, "启动失败后关闭通道出错");
                }
                self.state = ConsumerState::Stopped;
                error!(queue = %self.topic.queue, error = %e, "批量消费者启动失败");
                return Err(e);
            }
        };

        self.running = Some(self.spawn_tasks(channel, deliveries));
        self.state = ConsumerState::Running;
        info!(
            queue = %self.topic.queue,
            batch_size = self.topic.batch_size,
            batch_timeout_secs = self.topic.batch_timeout.as_secs(),
            prefetch = self.topic.prefetch_count(),
            "批量消费者已启动"
        );
        Ok(())
    }

    /// 预取、拓扑、订阅，每一步都可被关闭信号打断
    async fn prepare(
        &self,
        channel: &dyn BrokerChannel,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<DeliveryStream, OmsError> {
        until_shutdown(shutdown, channel.set_prefetch(self.topic.prefetch_count())).await?;
        until_shutdown(shutdown, declare_topology(channel, &self.topic)).await?;
        until_shutdown(shutdown, channel.consume(&self.topic.queue, &self.consumer_tag)).await
    }

    fn spawn_tasks(&self, channel: Arc<dyn BrokerChannel>, deliveries: DeliveryStream) -> RunningParts {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let accumulator = Arc::new(BatchAccumulator::new(
            usize::from(self.topic.batch_size),
            flush_tx,
        ));

        let dispatcher = BatchDispatcher::new(
            self.topic.queue.clone(),
            Arc::clone(&self.handler),
            Arc::clone(&channel),
        );
        let dispatcher = tokio::spawn(dispatcher.run(flush_rx));

        let timer = tokio::spawn(run_timer(
            self.topic.queue.clone(),
            Arc::clone(&accumulator),
            self.topic.batch_timeout,
        ));

        let intake = tokio::spawn(run_intake(
            self.topic.queue.clone(),
            Arc::clone(&accumulator),
            deliveries,
        ));

        RunningParts {
            channel,
            accumulator,
            timer,
            intake: Some(intake),
            dispatcher,
        }
    }

    /// 停止消费并释放资源，重复调用无副作用
    ///
    /// 顺序：定时任务 -> 接收任务 -> 已缓冲未刷新的投递放弃 -> 等待分发队列清空 -> 关闭通道。
    /// 放弃的投递不确认也不拒绝，通道关闭后由 broker 重新投递。
    pub async fn stop(&mut self) {
        let Some(parts) = self.running.take() else {
            self.state = ConsumerState::Stopped;
            return;
        };
        self.state = ConsumerState::Stopping;
        info!(queue = %self.topic.queue, "批量消费者停止中");

        let RunningParts {
            channel,
            accumulator,
            timer,
            intake,
            mut dispatcher,
        } = parts;

        timer.abort();
        let _ = timer.await;
        if let Some(intake) = intake {
            intake.abort();
            let _ = intake.await;
        }

        if let Some(abandoned) = accumulator.drain_all().await {
            warn!(
                queue = %self.topic.queue,
                count = abandoned.len(),
                watermark = abandoned.watermark(),
                "关闭时仍有未分发的缓冲投递，将由 broker 重新投递"
            );
        }
        // 释放最后一个发送端，分发任务处理完队列后自行退出
        drop(accumulator);

        if tokio::time::timeout(DISPATCH_GRACE_PERIOD, &mut dispatcher)
            .await
            .is_err()
        {
            warn!(queue = %self.topic.queue, "分发任务未在宽限期内结束，强制终止");
            dispatcher.abort();
        }

        if let Err(e) = channel.close().await {
            warn!(queue = %self.topic.queue, error = %e, "关闭通道失败");
        }

        self.state = ConsumerState::Stopped;
        info!(queue = %self.topic.queue, "批量消费者已停止");
    }

    /// 启动并运行到关闭信号到达或投递流结束
    ///
    /// 启动期间收到关闭信号属于正常退出，返回 `Ok`。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), OmsError> {
        match self.start(&mut shutdown).await {
            Ok(()) => {}
            Err(OmsError::StartupCancelled) => {
                info!(queue = %self.topic.queue, "启动期间收到关闭信号，消费者未启动");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let ended = match self.running.as_mut().and_then(|parts| parts.intake.as_mut()) {
            Some(intake) => {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => None,
                    ended = intake => Some(ended),
                }
            }
            None => None,
        };

        let outcome = match ended {
            None => {
                info!(queue = %self.topic.queue, "收到关闭信号");
                Ok(())
            }
            Some(ended) => {
                if let Some(parts) = self.running.as_mut() {
                    parts.intake = None;
                }
                match ended {
                    Ok(e) => Err(e),
                    Err(e) => Err(OmsError::Internal(format!("接收任务异常退出: {e}"))),
                }
            }
        };

        if let Err(ref e) = outcome {
            error!(queue = %self.topic.queue, error = %e, "消费者停止接收投递");
        }
        self.stop().await;
        outcome
    }
}

impl<H: BatchHandler> Drop for BatchConsumer<H> {
    fn drop(&mut self) {
        if let Some(parts) = self.running.take() {
            parts.timer.abort();
            if let Some(intake) = &parts.intake {
                intake.abort();
            }
            parts.dispatcher.abort();
        }
    }
}

/// 接收任务：投递流结束或出错时返回原因
async fn run_intake(
    queue: String,
    accumulator: Arc<BatchAccumulator>,
    mut deliveries: DeliveryStream,
) -> OmsError {
    while let Some(item) = deliveries.next().await {
        match item {
            Ok(delivery) => {
                if let Err(e) = accumulator.append(delivery).await {
                    return e;
                }
            }
            Err(e) => {
                error!(queue = %queue, error = %e, "投递流传输错误");
                return e;
            }
        }
    }
    warn!(queue = %queue, "投递流已关闭");
    OmsError::DeliveryStreamClosed { queue }
}

/// 定时任务：第一次触发在一个超时周期之后
async fn run_timer(queue: String, accumulator: Arc<BatchAccumulator>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match accumulator.flush().await {
            Ok(true) => debug!(queue = %queue, "定时刷新已入队"),
            Ok(false) => {}
            Err(e) => {
                warn!(queue = %queue, error = %e, "定时刷新失败，定时任务退出");
                return;
            }
        }
    }
}

/// 等待关闭信号；发送端被丢弃也视为关闭
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn until_shutdown<T, F>(shutdown: &mut watch::Receiver<bool>, fut: F) -> Result<T, OmsError>
where
    F: Future<Output = Result<T, OmsError>>,
{
    if *shutdown.borrow() {
        return Err(OmsError::StartupCancelled);
    }
    tokio::select! {
        biased;
        _ = wait_for_shutdown(shutdown) => Err(OmsError::StartupCancelled),
        result = fut => result,
    }
}
