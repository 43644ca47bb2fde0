//! 审计日志 API 客户端

use std::time::Duration;

use async_trait::async_trait;
use oms_shared::config::AuditConfig;
use oms_shared::observability::metrics::record_audit_request;
use tracing::{debug, warn};

use crate::dto::{AuditLogOrderRequest, AuditLogOrderResponse};
use crate::error::AuditError;

const LOG_ORDER_PATH: &str = "api/v1/audit/log-order";

/// 审计日志写入能力
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditClient: Send + Sync {
    /// 一次写入一批审计记录，非 2xx 响应视为失败
    async fn log_order(
        &self,
        request: AuditLogOrderRequest,
    ) -> Result<AuditLogOrderResponse, AuditError>;
}

/// 基于 reqwest 的实现
pub struct HttpAuditClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAuditClient {
    pub fn new(config: &AuditConfig) -> Result<Self, AuditError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/{}", config.base_url.trim_end_matches('/'), LOG_ORDER_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AuditClient for HttpAuditClient {
    async fn log_order(
        &self,
        request: AuditLogOrderRequest,
    ) -> Result<AuditLogOrderResponse, AuditError> {
        let rows = request.len();
        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                record_audit_request("error", rows);
                return Err(e.into());
            }
        };

        let status = response.status();
        record_audit_request(status.as_str(), rows);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), rows, "审计服务返回非成功状态");
            return Err(AuditError::AuditApi {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.json::<AuditLogOrderResponse>().await?;
        debug!(rows, stored = body.orders.len(), "审计记录已写入");
        Ok(body)
    }
}
