//! 客户查询与等级管理处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use validator::Validate;

use crate::api::{
    dto::{ApiResponse, AssignTierRequest, LimitQuery, ReevaluateRequest, TierChangeResponse},
    error::{ApiError, Result},
    state::AppState,
};
use crate::service::{CustomerHistory, CustomerProjection, ManualAssignment};

/// 客户当前等级与余额
///
/// GET /api/shops/{shop}/customers/{customer_ref}
pub async fn get_customer(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
) -> Result<Json<ApiResponse<CustomerProjection>>> {
    let projection = state.engine.lookup.lookup(&shop, &customer_ref).await?;
    Ok(Json(ApiResponse::success(projection)))
}

/// 客户流水、等级变更与交易历史
///
/// GET /api/shops/{shop}/customers/{customer_ref}/history
pub async fn get_history(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<CustomerHistory>>> {
    let history = state
        .engine
        .lookup
        .history(&shop, &customer_ref, query.limit_or(50))
        .await?;
    Ok(Json(ApiResponse::success(history)))
}

/// 手工指定等级
///
/// PUT /api/shops/{shop}/customers/{customer_ref}/tier
pub async fn assign_tier(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
    Json(req): Json<AssignTierRequest>,
) -> Result<Json<ApiResponse<TierChangeResponse>>> {
    req.validate()?;

    let customer = state.engine.ledger.resolve_customer(&shop, &customer_ref).await?;
    let assignment = ManualAssignment {
        customer_id: customer.id,
        tier_id: req.tier_id,
        assignment_type: req.assignment_type,
        expires_at: req.expires_at,
        reason: req.reason,
        operator: req.operator,
    };
    let outcome = state.engine.evaluator.assign_tier(&assignment).await?;

    info!(
        shop = %shop,
        customer_ref = %customer_ref,
        tier_id = assignment.tier_id,
        operator = %assignment.operator,
        "Tier assigned manually"
    );
    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 按当前消费重新评估，覆盖手工等级
///
/// POST /api/shops/{shop}/customers/{customer_ref}/reevaluate
pub async fn reevaluate(
    State(state): State<AppState>,
    Path((shop, customer_ref)): Path<(String, String)>,
    Json(req): Json<ReevaluateRequest>,
) -> Result<Json<ApiResponse<TierChangeResponse>>> {
    req.validate()?;

    let customer = state.engine.ledger.resolve_customer(&shop, &customer_ref).await?;
    let outcome = state
        .engine
        .evaluator
        .reevaluate(customer.id, &req.operator)
        .await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 路径中的店铺必须与资源所属店铺一致
pub(crate) fn ensure_same_shop(path_shop: &str, owner_shop: &str, what: &str) -> Result<()> {
    if path_shop != owner_shop {
        return Err(ApiError::Validation(format!("{} 不属于店铺 {}", what, path_shop)));
    }
    Ok(())
}
