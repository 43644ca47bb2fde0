//! 审计客户端与处理器集成测试
//!
//! 在进程内启动 axum 服务模拟审计日志 API。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use audit_consumer::client::{AuditClient, HttpAuditClient};
use audit_consumer::dto::{AuditLogOrder, AuditLogOrderRequest, AuditLogOrderResponse, LogOrder};
use audit_consumer::error::AuditError;
use audit_consumer::handlers::OrderStatusChangedHandler;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use oms_shared::broker::BatchHandler;
use oms_shared::config::AuditConfig;
use oms_shared::messages::OrderStatusChangedMessage;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct MockAuditApi {
    received: Arc<Mutex<Vec<AuditLogOrderRequest>>>,
    fail_with: Option<StatusCode>,
}

async fn log_order(
    State(api): State<MockAuditApi>,
    Json(request): Json<AuditLogOrderRequest>,
) -> Result<Json<AuditLogOrderResponse>, StatusCode> {
    if let Some(status) = api.fail_with {
        return Err(status);
    }

    let now = Utc::now();
    let orders = request
        .orders
        .iter()
        .enumerate()
        .map(|(i, o)| AuditLogOrder {
            id: i as i64 + 1,
            order_id: o.order_id,
            order_item_id: o.order_item_id,
            customer_id: o.customer_id,
            order_status: o.order_status.clone(),
            created_at: now,
            updated_at: now,
        })
        .collect();
    api.received.lock().unwrap().push(request);
    Ok(Json(AuditLogOrderResponse { orders }))
}

async fn spawn_api(api: MockAuditApi) -> SocketAddr {
    let app = Router::new()
        .route("/api/v1/audit/log-order", post(log_order))
        .with_state(api);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr) -> HttpAuditClient {
    HttpAuditClient::new(&AuditConfig {
        base_url: format!("http://{addr}"),
        timeout_seconds: 5,
    })
    .unwrap()
}

fn row(order_id: i64, item_id: i64) -> LogOrder {
    LogOrder {
        order_id,
        order_item_id: item_id,
        customer_id: 42,
        order_status: "created".to_string(),
    }
}

#[tokio::test]
async fn test_log_order_round_trip() {
    let api = MockAuditApi::default();
    let addr = spawn_api(api.clone()).await;
    let client = client_for(addr);

    let response = client
        .log_order(AuditLogOrderRequest {
            orders: vec![row(1, 11), row(1, 12)],
        })
        .await
        .unwrap();

    assert_eq!(response.orders.len(), 2);
    assert_eq!(response.orders[1].order_item_id, 12);
    let received = api.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].orders, vec![row(1, 11), row(1, 12)]);
}

#[tokio::test]
async fn test_non_success_status_is_error() {
    let api = MockAuditApi {
        fail_with: Some(StatusCode::SERVICE_UNAVAILABLE),
        ..Default::default()
    };
    let addr = spawn_api(api).await;
    let client = client_for(addr);

    let err = client
        .log_order(AuditLogOrderRequest {
            orders: vec![row(1, 11)],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::AuditApi { status: 503, .. }));
}

#[tokio::test]
async fn test_unreachable_service_is_http_error() {
    // 绑定后立即释放端口，连接必然被拒绝
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client_for(addr)
        .log_order(AuditLogOrderRequest {
            orders: vec![row(1, 11)],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::Http(_)));
}

#[tokio::test]
async fn test_status_handler_sends_lowercased_rows() {
    let api = MockAuditApi::default();
    let addr = spawn_api(api.clone()).await;
    let handler = OrderStatusChangedHandler::new(Arc::new(client_for(addr)));

    handler
        .process_batch(vec![
            OrderStatusChangedMessage {
                order_id: 9,
                order_status: "Shipped".to_string(),
                customer_id: 42,
                order_item_ids: vec![91, 92],
                updated_at: Utc::now(),
            },
            OrderStatusChangedMessage {
                order_id: 10,
                order_status: "Processing".to_string(),
                customer_id: 43,
                order_item_ids: vec![],
                updated_at: Utc::now(),
            },
        ])
        .await
        .unwrap();

    let received = api.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let statuses: Vec<_> = received[0]
        .orders
        .iter()
        .map(|o| (o.order_item_id, o.order_status.as_str()))
        .collect();
    assert_eq!(
        statuses,
        vec![(91, "shipped"), (92, "shipped"), (10, "processing")]
    );
}
