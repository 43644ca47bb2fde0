//! 共享库
//!
//! 订单审计链路各服务共用的配置、错误处理、消息模型、可观测性与 RabbitMQ 批量消费基础设施。

pub mod broker;
pub mod config;
pub mod error;
pub mod messages;
pub mod observability;
