//! 外部订单源客户端
//!
//! 订单源按创建时间和财务状态过滤，游标分页，返回 has_next_page 标记

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use cashback_shared::config::OrderFeedConfig;

use crate::error::{LoyaltyError, Result};
use crate::models::{OrderPage, OrderQuery};

/// 订单源接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderFeed: Send + Sync {
    /// 拉取一页订单
    async fn fetch_page(&self, query: &OrderQuery) -> Result<OrderPage>;
}

/// 基于 HTTP 的订单源
pub struct HttpOrderFeed {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpOrderFeed {
    pub fn new(config: &OrderFeedConfig) -> Result<Self> {
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

/// 查询参数
fn query_params(query: &OrderQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", query.page_size.to_string())];
    if let Some(cursor) = &query.cursor {
        params.push(("cursor", cursor.clone()));
    }
    if let Some(min) = query.created_at_min {
        params.push(("created_at_min", min.to_rfc3339()));
    }
    if let Some(max) = query.created_at_max {
        params.push(("created_at_max", max.to_rfc3339()));
    }
    if let Some(status) = &query.financial_status {
        params.push(("financial_status", status.clone()));
    }
    params
}

#[async_trait]
impl OrderFeed for HttpOrderFeed {
    async fn fetch_page(&self, query: &OrderQuery) -> Result<OrderPage> {
        let url = format!("{}/shops/{}/orders", self.base_url, query.shop);
        let mut builder = self.client.get(&url).query(&query_params(query));
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LoyaltyError::OrderFeed("订单源请求超时".to_string())
            } else {
                LoyaltyError::OrderFeed(format!("订单源请求失败: {e}"))
            }
        })?;

        if !resp.status().is_success() {
            return Err(LoyaltyError::OrderFeed(format!("订单源返回 HTTP {}", resp.status())));
        }

        let page: OrderPage = resp
            .json()
            .await
            .map_err(|e| LoyaltyError::OrderFeed(format!("解析订单页失败: {e}")))?;
        debug!(
            shop = %query.shop,
            orders = page.orders.len(),
            has_next_page = page.has_next_page,
            "已拉取订单页"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_first_page_params() {
        let query = OrderQuery {
            shop: "demo.myshopify.com".to_string(),
            page_size: 250,
            financial_status: Some("paid".to_string()),
            ..OrderQuery::default()
        };
        let params = query_params(&query);
        assert_eq!(params[0], ("limit", "250".to_string()));
        assert!(params.iter().all(|(k, _)| *k != "cursor"));
        assert!(params.contains(&("financial_status", "paid".to_string())));
    }

    #[test]
    fn test_cursor_and_date_range_params() {
        let query = OrderQuery {
            shop: "demo.myshopify.com".to_string(),
            page_size: 50,
            cursor: Some("abc".to_string()),
            created_at_min: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..OrderQuery::default()
        };
        let params = query_params(&query);
        assert!(params.contains(&("cursor", "abc".to_string())));
        assert!(params.contains(&("created_at_min", "2024-01-01T00:00:00+00:00".to_string())));
    }
}
