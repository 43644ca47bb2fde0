//! 订单审计消费者服务
//!
//! 同时运行订单创建与订单状态变更两个批量消费者。

use std::sync::Arc;

use audit_consumer::client::{AuditClient, HttpAuditClient};
use audit_consumer::failure::FailureInjector;
use audit_consumer::handlers::{OrderCreatedHandler, OrderStatusChangedHandler};
use oms_shared::broker::{BatchConsumer, BatchHandler, BrokerConnector, LapinConnector};
use oms_shared::config::AppConfig;
use oms_shared::error::OmsError;
use oms_shared::observability;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("audit-consumer")?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        broker = %config.rabbitmq.endpoint(),
        audit = %config.audit.base_url,
        "Starting audit-consumer..."
    );

    let client: Arc<dyn AuditClient> = Arc::new(HttpAuditClient::new(&config.audit)?);
    let connector: Arc<dyn BrokerConnector> = Arc::new(LapinConnector::new(&config.rabbitmq));

    let failures = FailureInjector::every_nth(config.failure_injection.order_created_every_nth_batch);
    if failures.is_enabled() {
        info!(
            every_nth_batch = config.failure_injection.order_created_every_nth_batch,
            "订单创建消费者已开启故障注入"
        );
    }

    // 路由映射缺失等配置错误在这里直接中止启动
    let created = BatchConsumer::new(
        &config.rabbitmq,
        &config.rabbitmq.order_created,
        Arc::clone(&connector),
        Arc::new(OrderCreatedHandler::new(Arc::clone(&client), failures)),
    )?;
    let status_changed = BatchConsumer::new(
        &config.rabbitmq,
        &config.rabbitmq.order_status_changed,
        Arc::clone(&connector),
        Arc::new(OrderStatusChangedHandler::new(client)),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });
    }

    let (created_result, status_result) = tokio::join!(
        run_consumer(created, shutdown_rx.clone(), Arc::clone(&shutdown_tx)),
        run_consumer(status_changed, shutdown_rx, shutdown_tx),
    );

    created_result?;
    status_result?;
    info!("audit-consumer stopped");
    Ok(())
}

/// 任一消费者异常退出时通知另一个一起停止，交给进程重启策略恢复
async fn run_consumer<H: BatchHandler>(
    consumer: BatchConsumer<H>,
    shutdown: watch::Receiver<bool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
) -> Result<(), OmsError> {
    let queue = consumer.topic().queue.clone();
    let result = consumer.run(shutdown).await;
    if let Err(e) = &result {
        error!(queue = %queue, error = %e, code = e.code(), "消费者异常退出");
        let _ = shutdown_tx.send(true);
    }
    result
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
