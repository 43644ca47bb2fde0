//! 订单审计消费者
//!
//! 批量消费订单创建与订单状态变更事件，展开为审计记录后批量写入审计日志 API。
//! 批次处理失败时整批转入死信队列。

pub mod client;
pub mod dto;
pub mod error;
pub mod failure;
pub mod handlers;
