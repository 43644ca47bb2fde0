//! 模拟订单生成器
//!
//! 持续向 topic 交换机发布订单创建与状态变更事件，供审计消费者联调与压测。

pub mod cli;
pub mod generator;
