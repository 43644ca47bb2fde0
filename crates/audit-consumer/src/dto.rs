//! 审计日志 API 的请求与响应

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单条审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOrder {
    pub order_id: i64,
    pub order_item_id: i64,
    pub customer_id: i64,
    pub order_status: String,
}

/// POST api/v1/audit/log-order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogOrderRequest {
    pub orders: Vec<LogOrder>,
}

impl AuditLogOrderRequest {
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// 审计服务落库后的记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogOrder {
    pub id: i64,
    pub order_id: i64,
    pub order_item_id: i64,
    pub customer_id: i64,
    pub order_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogOrderResponse {
    #[serde(default)]
    pub orders: Vec<AuditLogOrder>,
}
