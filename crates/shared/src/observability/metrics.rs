//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics();
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 描述会出现在 /metrics 端点的 HELP 注释中
fn describe_metrics() {
    metrics::describe_counter!(
        "oms_consumer_batches_total",
        "Total number of dispatched batches by outcome"
    );
    metrics::describe_histogram!(
        "oms_consumer_batch_size",
        "Number of deliveries per dispatched batch"
    );
    metrics::describe_histogram!(
        "oms_consumer_batch_duration_seconds",
        "Batch decode and callback duration in seconds"
    );
    metrics::describe_counter!(
        "oms_audit_requests_total",
        "Total number of audit API requests by status"
    );
    metrics::describe_counter!(
        "oms_generator_published_total",
        "Total number of messages published by the order generator"
    );
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }))
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let app = router(handle);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次审计 API 调用
#[inline]
pub fn record_audit_request(status: &str, rows: usize) {
    metrics::counter!("oms_audit_requests_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("oms_audit_request_rows").record(rows as f64);
}

/// 记录生成器发布的消息数
#[inline]
pub fn record_generator_published(routing_key: &'static str, count: usize) {
    metrics::counter!("oms_generator_published_total", "routing_key" => routing_key)
        .increment(count as u64);
}
