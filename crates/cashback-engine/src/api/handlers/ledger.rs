//! 储值账本处理器

use axum::{
    Json,
    extract::{Path, State},
};
use validator::Validate;

use crate::api::{
    dto::{
        AdjustBalanceRequest, ApiResponse, ImportBalanceRequest, LedgerWriteResponse,
        ReconcileRequest, ReconcileResponse, RefundCreditRequest,
    },
    error::Result,
    state::AppState,
};
use crate::models::{LedgerAudit, LedgerEntry};

/// 与外部余额对账
///
/// POST /api/shops/{shop}/customers/{customer_ref}/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ApiResponse<ReconcileResponse>>> {
    req.validate()?;

    let ledger = &state.engine.ledger;
    let customer = ledger.resolve_customer(&shop, &customer_ref).await?;
    let outcome = ledger
        .reconcile(customer.id, req.external_balance, &req.triggered_by)
        .await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 人工调整余额
///
/// POST /api/shops/{shop}/customers/{customer_ref}/adjustments
pub async fn adjust(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
    Json(req): Json<AdjustBalanceRequest>,
) -> Result<Json<ApiResponse<LedgerEntry>>> {
    req.validate()?;

    let ledger = &state.engine.ledger;
    let customer = ledger.resolve_customer(&shop, &customer_ref).await?;
    let entry = ledger
        .adjust(customer.id, req.amount, &req.reason, &req.operator)
        .await?;
    Ok(Json(ApiResponse::success(entry)))
}

/// 退款返还储值
///
/// POST /api/shops/{shop}/customers/{customer_ref}/refunds
pub async fn refund(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
    Json(req): Json<RefundCreditRequest>,
) -> Result<Json<ApiResponse<LedgerWriteResponse>>> {
    req.validate()?;

    let ledger = &state.engine.ledger;
    let customer = ledger.resolve_customer(&shop, &customer_ref).await?;
    let outcome = ledger
        .credit_refund(customer.id, req.amount, &req.refund_id)
        .await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 导入历史余额
///
/// POST /api/shops/{shop}/customers/{customer_ref}/imports
pub async fn import_balance(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
    Json(req): Json<ImportBalanceRequest>,
) -> Result<Json<ApiResponse<LedgerWriteResponse>>> {
    req.validate()?;

    let ledger = &state.engine.ledger;
    let customer = ledger.resolve_customer(&shop, &customer_ref).await?;
    let outcome = ledger
        .import_balance(customer.id, req.amount, &req.reference)
        .await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 核对缓存余额与流水
///
/// GET /api/shops/{shop}/customers/{customer_ref}/audit
pub async fn audit(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
) -> Result<Json<ApiResponse<LedgerAudit>>> {
    let ledger = &state.engine.ledger;
    let customer = ledger.resolve_customer(&shop, &customer_ref).await?;
    let audit = ledger.audit(customer.id).await?;
    Ok(Json(ApiResponse::success(audit)))
}
