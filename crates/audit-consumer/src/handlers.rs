//! 订单事件批处理器
//!
//! 把一批订单事件展开为审计记录，合并为一次审计 API 调用。

use std::sync::Arc;

use async_trait::async_trait;
use oms_shared::broker::BatchHandler;
use oms_shared::messages::{OrderCreatedMessage, OrderStatusChangedMessage};
use tracing::{info, warn};

use crate::client::AuditClient;
use crate::dto::{AuditLogOrderRequest, LogOrder};
use crate::error::AuditError;
use crate::failure::FailureInjector;

const STATUS_CREATED: &str = "created";

// ---------------------------------------------------------------------------
// 订单创建
// ---------------------------------------------------------------------------

pub struct OrderCreatedHandler {
    client: Arc<dyn AuditClient>,
    failures: FailureInjector,
}

impl OrderCreatedHandler {
    pub fn new(client: Arc<dyn AuditClient>, failures: FailureInjector) -> Self {
        Self { client, failures }
    }
}

/// 每个 (订单, 订单项) 组合对应一条审计记录
fn created_rows(messages: &[OrderCreatedMessage]) -> Vec<LogOrder> {
    messages
        .iter()
        .flat_map(|order| {
            order.order_items.iter().map(move |item| LogOrder {
                order_id: order.id,
                order_item_id: item.id,
                customer_id: order.customer_id,
                order_status: STATUS_CREATED.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl BatchHandler for OrderCreatedHandler {
    type Message = OrderCreatedMessage;
    type Error = AuditError;

    async fn process_batch(&self, messages: Vec<OrderCreatedMessage>) -> Result<(), AuditError> {
        if let Err(e) = self.failures.check() {
            warn!(messages = messages.len(), error = %e, "故障注入触发，批次将转入死信队列");
            return Err(e);
        }

        let orders = created_rows(&messages);
        if orders.is_empty() {
            return Ok(());
        }

        let rows = orders.len();
        self.client
            .log_order(AuditLogOrderRequest { orders })
            .await?;
        info!(messages = messages.len(), rows, "订单创建审计已写入");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 订单状态变更
// ---------------------------------------------------------------------------

pub struct OrderStatusChangedHandler {
    client: Arc<dyn AuditClient>,
}

impl OrderStatusChangedHandler {
    pub fn new(client: Arc<dyn AuditClient>) -> Self {
        Self { client }
    }
}

/// 有订单项时逐项记录，没有时以订单号本身作为订单项号
fn status_rows(messages: &[OrderStatusChangedMessage]) -> Vec<LogOrder> {
    messages
        .iter()
        .flat_map(|msg| {
            let status = msg.order_status.to_lowercase();
            let item_ids = if msg.order_item_ids.is_empty() {
                vec![msg.order_id]
            } else {
                msg.order_item_ids.clone()
            };
            item_ids.into_iter().map(move |order_item_id| LogOrder {
                order_id: msg.order_id,
                order_item_id,
                customer_id: msg.customer_id,
                order_status: status.clone(),
            })
        })
        .collect()
}

#[async_trait]
impl BatchHandler for OrderStatusChangedHandler {
    type Message = OrderStatusChangedMessage;
    type Error = AuditError;

    async fn process_batch(
        &self,
        messages: Vec<OrderStatusChangedMessage>,
    ) -> Result<(), AuditError> {
        let orders = status_rows(&messages);
        if orders.is_empty() {
            return Ok(());
        }

        let rows = orders.len();
        self.client
            .log_order(AuditLogOrderRequest { orders })
            .await?;
        info!(messages = messages.len(), rows, "订单状态审计已写入");
        Ok(())
    }
}
