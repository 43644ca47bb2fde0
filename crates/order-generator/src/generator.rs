//! 模拟订单生成器
//!
//! 每轮生成一批新订单并发布订单创建事件，再随机挑选其中一部分发布状态变更事件，
//! 为审计消费者提供持续的流量。

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use fake::Fake;
use fake::faker::address::en::{BuildingNumber, CityName, StreetName};
use fake::faker::company::en::CatchPhrase;
use oms_shared::broker::{MessagePublisher, PublishSummary};
use oms_shared::config::GeneratorConfig;
use oms_shared::messages::{
    OrderCreatedMessage, OrderItemMessage, OrderStatusChangedMessage, routing_keys,
};
use oms_shared::observability::metrics::record_generator_published;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 状态变更事件可取的状态
pub const STATUS_TRANSITIONS: [&str; 3] = ["processing", "shipped", "cancelled"];

const STATUS_CREATED: &str = "created";

// ---------------------------------------------------------------------------
// OrderFactory
// ---------------------------------------------------------------------------

/// 订单构造器
///
/// 订单号与订单项号共用一个单调递增序列，保证同一进程内不重复。
pub struct OrderFactory {
    config: GeneratorConfig,
    next_id: AtomicI64,
}

impl OrderFactory {
    /// 以当前毫秒时间戳为序列起点，进程重启后仍大概率不与旧订单冲突
    pub fn new(config: GeneratorConfig) -> Self {
        Self::with_first_id(config, Utc::now().timestamp_millis() * 1000)
    }

    pub fn with_first_id(config: GeneratorConfig, first_id: i64) -> Self {
        Self {
            config,
            next_id: AtomicI64::new(first_id),
        }
    }

    pub fn orders_per_tick(&self) -> usize {
        self.config.orders_per_tick
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 单个订单，恰好包含一个订单项，价格与币种固定
    pub fn build_order<R: Rng>(&self, rng: &mut R) -> OrderCreatedMessage {
        let now = Utc::now();
        let order_id = self.next_id();
        let product_id = rng.gen_range(1..=10_000);

        let item = OrderItemMessage {
            id: self.next_id(),
            order_id,
            product_id,
            quantity: 1,
            product_title: CatchPhrase().fake(),
            product_url: format!("https://shop.example.com/products/{product_id}"),
            price_cents: self.config.price_cents,
            price_currency: self.config.currency.clone(),
            created_at: now,
            updated_at: now,
        };

        let city: String = CityName().fake();
        let street: String = StreetName().fake();
        let building: String = BuildingNumber().fake();

        OrderCreatedMessage {
            id: order_id,
            customer_id: rng.gen_range(1..=100_000),
            delivery_address: format!("{city}, {street} {building}"),
            total_price_cents: self.config.price_cents,
            total_price_currency: self.config.currency.clone(),
            order_status: STATUS_CREATED.to_string(),
            created_at: now,
            updated_at: now,
            order_items: vec![item],
        }
    }

    pub fn build_batch<R: Rng>(&self, rng: &mut R) -> Vec<OrderCreatedMessage> {
        (0..self.config.orders_per_tick)
            .map(|_| self.build_order(rng))
            .collect()
    }
}

/// 随机挑选非空子集生成状态变更事件；订单为空时返回空
pub fn pick_status_changes<R: Rng>(
    orders: &[OrderCreatedMessage],
    rng: &mut R,
) -> Vec<OrderStatusChangedMessage> {
    if orders.is_empty() {
        return Vec::new();
    }

    let count = rng.gen_range(1..=orders.len());
    let chosen: Vec<&OrderCreatedMessage> = orders.choose_multiple(rng, count).collect();
    chosen
        .into_iter()
        .map(|order| {
            let status = STATUS_TRANSITIONS[rng.gen_range(0..STATUS_TRANSITIONS.len())];
            OrderStatusChangedMessage {
                order_id: order.id,
                order_status: status.to_string(),
                customer_id: order.customer_id,
                order_item_ids: order.order_items.iter().map(|i| i.id).collect(),
                updated_at: Utc::now(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// OrderGenerator
// ---------------------------------------------------------------------------

/// 单轮发布结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub created: PublishSummary,
    pub status_changed: PublishSummary,
}

pub struct OrderGenerator {
    publisher: MessagePublisher,
    factory: OrderFactory,
    interval: Duration,
}

impl OrderGenerator {
    pub fn new(publisher: MessagePublisher, config: &GeneratorConfig) -> Self {
        Self::with_factory(
            publisher,
            OrderFactory::new(config.clone()),
            Duration::from_millis(config.interval_millis.max(1)),
        )
    }

    pub fn with_factory(publisher: MessagePublisher, factory: OrderFactory, interval: Duration) -> Self {
        Self {
            publisher,
            factory,
            interval,
        }
    }

    /// 生成一轮订单与状态变更消息，不发布
    pub fn generate(&self) -> (Vec<OrderCreatedMessage>, Vec<OrderStatusChangedMessage>) {
        let mut rng = rand::thread_rng();
        let orders = self.factory.build_batch(&mut rng);
        let changes = pick_status_changes(&orders, &mut rng);
        (orders, changes)
    }

    /// 发布一轮：先订单创建，再状态变更
    pub async fn tick(&self) -> TickSummary {
        let (orders, changes) = self.generate();

        let created = self.publisher.publish_batch(&orders).await;
        record_generator_published(routing_keys::ORDER_CREATED, created.published);

        let status_changed = self.publisher.publish_batch(&changes).await;
        record_generator_published(routing_keys::ORDER_STATUS_CHANGED, status_changed.published);

        if created.failed > 0 || status_changed.failed > 0 {
            warn!(
                created_failed = created.failed,
                status_changed_failed = status_changed.failed,
                "本轮部分消息发布失败"
            );
        }
        debug!(
            created = created.published,
            status_changed = status_changed.published,
            "本轮消息已发布"
        );

        TickSummary {
            created,
            status_changed,
        }
    }

    /// 按固定间隔持续发布，直到收到关闭信号或达到 `max_ticks`
    ///
    /// 返回实际执行的轮数。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, max_ticks: Option<u64>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        info!(
            interval_ms = self.interval.as_millis() as u64,
            orders_per_tick = self.factory.orders_per_tick(),
            exchange = %self.publisher.exchange(),
            "订单生成器已启动"
        );

        loop {
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，订单生成器退出");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                    ticks += 1;
                }
            }
        }

        info!(ticks, "订单生成器已停止");
        ticks
    }
}
