//! 等级目录处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use validator::Validate;

use super::customer::ensure_same_shop;
use crate::api::{
    dto::{
        ApiResponse, CreateTierRequest, DeleteTierQuery, ReorderTiersRequest, UpdateTierRequest,
    },
    error::Result,
    state::AppState,
};
use crate::models::Tier;
use crate::service::SYSTEM_ACTOR;

/// 获取等级列表
///
/// GET /api/shops/{shop}/tiers
pub async fn list_tiers(
    State(state): State<AppState>,
    Path(shop): Path<String>,
) -> Result<Json<ApiResponse<Vec<Tier>>>> {
    let tiers = state.engine.catalog.list(&shop).await?;
    Ok(Json(ApiResponse::success(tiers)))
}

/// 创建等级
///
/// POST /api/shops/{shop}/tiers
pub async fn create_tier(
    State(state): State<AppState>,
    Path(shop): Path<String>,
    Json(req): Json<CreateTierRequest>,
) -> Result<Json<ApiResponse<Tier>>> {
    req.validate()?;

    let tier = state.engine.catalog.create(req.into_new_tier(&shop)).await?;
    info!(shop = %shop, tier_id = tier.id, name = %tier.name, "Tier created");
    Ok(Json(ApiResponse::success(tier)))
}

/// 更新等级
///
/// PUT /api/shops/{shop}/tiers/{id}
pub async fn update_tier(
    State(state): State<AppState>,
    Path((shop, id)): Path<(String, i64)>,
    Json(req): Json<UpdateTierRequest>,
) -> Result<Json<ApiResponse<Tier>>> {
    req.validate()?;

    let catalog = &state.engine.catalog;
    let existing = catalog.get(id).await?;
    ensure_same_shop(&shop, &existing.shop, "等级")?;

    let tier = catalog.update(id, req.into()).await?;
    info!(shop = %shop, tier_id = id, "Tier updated");
    Ok(Json(ApiResponse::success(tier)))
}

/// 删除等级，返回剩余目录
///
/// DELETE /api/shops/{shop}/tiers/{id}?policy=MIGRATE_MEMBERS
pub async fn delete_tier(
    State(state): State<AppState>,
    Path((shop, id)): Path<(String, i64)>,
    Query(query): Query<DeleteTierQuery>,
) -> Result<Json<ApiResponse<Vec<Tier>>>> {
    let catalog = &state.engine.catalog;
    let existing = catalog.get(id).await?;
    ensure_same_shop(&shop, &existing.shop, "等级")?;

    let operator = query.operator.as_deref().unwrap_or(SYSTEM_ACTOR);
    let remaining = catalog.delete(id, query.policy, operator).await?;
    info!(shop = %shop, tier_id = id, policy = ?query.policy, "Tier deleted");
    Ok(Json(ApiResponse::success_with_message(remaining, "等级已删除")))
}

/// 重排等级
///
/// PUT /api/shops/{shop}/tiers/order
pub async fn reorder_tiers(
    State(state): State<AppState>,
    Path(shop): Path<String>,
    Json(req): Json<ReorderTiersRequest>,
) -> Result<Json<ApiResponse<Vec<Tier>>>> {
    req.validate()?;

    let tiers = state.engine.catalog.reorder(&shop, &req.tier_ids).await?;
    Ok(Json(ApiResponse::success(tiers)))
}
