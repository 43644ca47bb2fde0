//! CLI 参数定义
//!
//! 命令行参数覆盖配置文件中的 `generator` 配置段。

use clap::Parser;
use oms_shared::config::GeneratorConfig;

/// 模拟订单生成器命令行工具
#[derive(Parser, Debug)]
#[command(name = "order-generator")]
#[command(version, about = "向 RabbitMQ 持续发布模拟订单事件")]
pub struct Cli {
    /// 发布间隔（毫秒），覆盖配置文件
    #[arg(long)]
    pub interval_millis: Option<u64>,

    /// 每轮生成的订单数，覆盖配置文件
    #[arg(short, long)]
    pub orders_per_tick: Option<usize>,

    /// 执行指定轮数后退出；不指定时持续运行直到收到关闭信号
    #[arg(short, long)]
    pub ticks: Option<u64>,

    /// 只生成一轮并以 JSON 打印到标准输出，不连接 broker
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// 把命令行覆盖项合并进配置
    pub fn apply(&self, config: &mut GeneratorConfig) {
        if let Some(interval) = self.interval_millis {
            config.interval_millis = interval;
        }
        if let Some(orders) = self.orders_per_tick {
            config.orders_per_tick = orders;
        }
    }
}
