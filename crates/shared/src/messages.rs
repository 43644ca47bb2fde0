//! 订单领域事件模型
//!
//! 订单服务发布到 topic 交换机的消息体。字段名使用 snake_case，
//! 与下游消费者、审计服务约定一致。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 集中管理路由键，防止字符串散落在发布端与消费端导致拼写不一致
pub mod routing_keys {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_STATUS_CHANGED: &str = "order.status.changed";
}

/// 带有固定路由键的消息
pub trait RoutedMessage {
    fn routing_key(&self) -> &'static str;
}

/// 订单项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemMessage {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub product_title: String,
    #[serde(default)]
    pub product_url: String,
    pub price_cents: i64,
    pub price_currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 订单创建事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedMessage {
    pub id: i64,
    pub customer_id: i64,
    #[serde(default)]
    pub delivery_address: String,
    pub total_price_cents: i64,
    pub total_price_currency: String,
    pub order_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 上游可能省略空数组
    #[serde(default)]
    pub order_items: Vec<OrderItemMessage>,
}

impl RoutedMessage for OrderCreatedMessage {
    fn routing_key(&self) -> &'static str {
        routing_keys::ORDER_CREATED
    }
}

/// 订单状态变更事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusChangedMessage {
    pub order_id: i64,
    pub order_status: String,
    pub customer_id: i64,
    #[serde(default)]
    pub order_item_ids: Vec<i64>,
    pub updated_at: DateTime<Utc>,
}

impl RoutedMessage for OrderStatusChangedMessage {
    fn routing_key(&self) -> &'static str {
        routing_keys::ORDER_STATUS_CHANGED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_keys() {
        let msg = OrderStatusChangedMessage {
            order_id: 1,
            order_status: "shipped".to_string(),
            customer_id: 2,
            order_item_ids: vec![],
            updated_at: Utc::now(),
        };
        assert_eq!(msg.routing_key(), "order.status.changed");
        assert_eq!(routing_keys::ORDER_CREATED, "order.created");
    }

    #[test]
    fn test_order_created_without_items_field() {
        let json = r#"{
            "id": 7,
            "customer_id": 42,
            "total_price_cents": 1000,
            "total_price_currency": "RUB",
            "order_status": "created",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z"
        }"#;

        let msg: OrderCreatedMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, 7);
        assert_eq!(msg.customer_id, 42);
        assert!(msg.order_items.is_empty());
        assert!(msg.delivery_address.is_empty());
    }

    #[test]
    fn test_status_changed_snake_case_fields() {
        let msg = OrderStatusChangedMessage {
            order_id: 10,
            order_status: "processing".to_string(),
            customer_id: 3,
            order_item_ids: vec![100, 101],
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"order_item_ids\":[100,101]"));
        assert!(json.contains("\"customer_id\":3"));
    }
}
