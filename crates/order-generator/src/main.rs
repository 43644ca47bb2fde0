//! 模拟订单生成器 CLI

use std::sync::Arc;

use clap::Parser;
use oms_shared::broker::{BrokerConnector, LapinConnector, MessagePublisher};
use oms_shared::config::AppConfig;
use oms_shared::observability;
use order_generator::cli::Cli;
use order_generator::generator::OrderGenerator;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load("order-generator")?;
    cli.apply(&mut config.generator);
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    if cli.dry_run {
        return print_one_tick(&config);
    }

    let connector = LapinConnector::new(&config.rabbitmq);
    let channel = connector.open_channel().await?;
    let publisher = MessagePublisher::new(Arc::clone(&channel), config.rabbitmq.exchange.clone());
    publisher.declare_exchange().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, initiating graceful shutdown...");
        let _ = shutdown_tx.send(true);
    });

    let generator = OrderGenerator::new(publisher.clone(), &config.generator);
    let ticks = generator.run(shutdown_rx, cli.ticks).await;

    publisher.close().await?;
    info!(ticks, "order-generator stopped");
    Ok(())
}

/// 不连接 broker，仅打印一轮生成结果
fn print_one_tick(config: &AppConfig) -> anyhow::Result<()> {
    let factory = order_generator::generator::OrderFactory::new(config.generator.clone());
    let mut rng = rand::thread_rng();
    let orders = factory.build_batch(&mut rng);
    let changes = order_generator::generator::pick_status_changes(&orders, &mut rng);

    let output = serde_json::json!({
        "order_created": orders,
        "order_status_changed": changes,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
