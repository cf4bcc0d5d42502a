//! 订单入账处理器

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use crate::api::{
    dto::{ApiResponse, IngestResponse},
    error::Result,
    state::AppState,
};
use crate::models::{FeedOrder, LedgerSource};
use crate::service::PaymentBreakdown;

/// 实时订单入账
///
/// POST /api/shops/{shop}/orders
///
/// 同一订单重复推送返回原交易，不会重复计返现
pub async fn ingest_order(
    State(state): State<AppState>,
    Path(shop): Path<String>,
    Json(order): Json<FeedOrder>,
) -> Result<Json<ApiResponse<IngestResponse>>> {
    let outcome = state
        .engine
        .ingest
        .ingest(&shop, &order, LedgerSource::OrderEvent)
        .await?;

    let response = IngestResponse::from(outcome);
    info!(shop = %shop, order_id = %order.id, outcome = response.outcome, "Order ingested");
    Ok(Json(ApiResponse::success(response)))
}

/// 只分析支付拆分，不入账
///
/// POST /api/shops/{shop}/orders/analyze
pub async fn analyze_order(
    State(state): State<AppState>,
    Path(_shop): Path<String>,
    Json(order): Json<FeedOrder>,
) -> Result<Json<ApiResponse<PaymentBreakdown>>> {
    let breakdown = state.engine.ingest.analyzer().analyze_order(&order)?;
    Ok(Json(ApiResponse::success(breakdown)))
}
