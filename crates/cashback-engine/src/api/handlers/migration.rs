//! 历史订单迁移处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::api::{
    dto::{ApiResponse, LimitQuery, StartMigrationRequest},
    error::Result,
    state::AppState,
};
use crate::models::MigrationJob;

/// 创建并启动迁移任务
///
/// POST /api/shops/{shop}/migrations
///
/// 任务在后台运行，立即返回 PENDING 状态的任务
pub async fn start_migration(
    State(state): State<AppState>,
    Path(shop): Path<String>,
    Json(req): Json<StartMigrationRequest>,
) -> Result<Json<ApiResponse<MigrationJob>>> {
    req.validate()?;

    let job = state.engine.migrations.start(&shop, req.into()).await?;
    info!(shop = %shop, job_id = %job.id, "Migration job started");
    Ok(Json(ApiResponse::success(job)))
}

/// 店铺的迁移任务列表
///
/// GET /api/shops/{shop}/migrations
pub async fn list_migrations(
    State(state): State<AppState>,
    Path(shop): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<MigrationJob>>>> {
    let jobs = state
        .engine
        .migrations
        .list_jobs(&shop, query.limit_or(20))
        .await?;
    Ok(Json(ApiResponse::success(jobs)))
}

/// 查询迁移进度
///
/// GET /api/migrations/{id}
pub async fn get_migration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<MigrationJob>>> {
    let job = state.engine.migrations.get_job(id).await?;
    Ok(Json(ApiResponse::success(job)))
}

/// 取消迁移任务
///
/// POST /api/migrations/{id}/cancel
pub async fn cancel_migration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<MigrationJob>>> {
    let job = state.engine.migrations.cancel(id).await?;
    info!(job_id = %id, "Migration job cancelled");
    Ok(Json(ApiResponse::success(job)))
}
