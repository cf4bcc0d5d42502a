//! 外部储值发放客户端

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cashback_shared::config::CreditIssuerConfig;

use crate::error::{LoyaltyError, Result};

/// 储值发放请求
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditIssueRequest {
    pub shop: String,
    pub customer_ref: String,
    pub amount: Decimal,
    pub currency: String,
    /// 幂等引用（订单号）
    pub reference: String,
}

/// 字段级错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// 储值发放响应，user_errors 为空表示成功
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditIssueResponse {
    #[serde(default)]
    pub user_errors: Vec<FieldError>,
}

impl CreditIssueResponse {
    pub fn is_success(&self) -> bool {
        self.user_errors.is_empty()
    }

    /// 拼接为一条可读的错误描述
    pub fn error_summary(&self) -> String {
        self.user_errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// 储值发放接口
///
/// 传输层失败返回 Err（可重试），业务拒绝通过 user_errors 返回
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditIssuer: Send + Sync {
    async fn issue_credit(&self, request: &CreditIssueRequest) -> Result<CreditIssueResponse>;
}

/// 基于 HTTP 的储值发放客户端
pub struct HttpCreditIssuer {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpCreditIssuer {
    pub fn new(config: &CreditIssuerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LoyaltyError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl CreditIssuer for HttpCreditIssuer {
    async fn issue_credit(&self, request: &CreditIssueRequest) -> Result<CreditIssueResponse> {
        let url = format!("{}/shops/{}/store-credit", self.base_url, request.shop);
        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LoyaltyError::CreditIssuance("储值发放请求超时".to_string())
            } else {
                LoyaltyError::CreditIssuance(format!("储值发放请求失败: {e}"))
            }
        })?;

        let status = resp.status();
        // 4xx 的响应体仍是字段错误格式，交给调用方按业务拒绝处理
        if status.is_server_error() {
            return Err(LoyaltyError::CreditIssuance(format!("储值发放返回 HTTP {}", status)));
        }

        let body: CreditIssueResponse = resp
            .json()
            .await
            .map_err(|e| LoyaltyError::CreditIssuance(format!("解析储值发放响应失败: {e}")))?;
        debug!(
            customer_ref = %request.customer_ref,
            http_status = status.as_u16(),
            errors = body.user_errors.len(),
            "储值发放已返回"
        );
        Ok(body)
    }
}
