//! 路由配置模块
//!
//! 所有接口按店铺划分，迁移任务查询按任务 ID 直接寻址

use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    routing::{get, post, put},
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use cashback_shared::observability::middleware as obs_middleware;

use super::{handlers, state::AppState};

/// 客户查询、等级与账本路由
fn customer_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/shops/{shop}/customers/{customer_ref}",
            get(handlers::customer::get_customer),
        )
        .route(
            "/shops/{shop}/customers/{customer_ref}/history",
            get(handlers::customer::get_history),
        )
        .route(
            "/shops/{shop}/customers/{customer_ref}/tier",
            put(handlers::customer::assign_tier),
        )
        .route(
            "/shops/{shop}/customers/{customer_ref}/reevaluate",
            post(handlers::customer::reevaluate),
        )
        // 账本
        .route(
            "/shops/{shop}/customers/{customer_ref}/reconcile",
            post(handlers::ledger::reconcile),
        )
        .route(
            "/shops/{shop}/customers/{customer_ref}/adjustments",
            post(handlers::ledger::adjust),
        )
        .route(
            "/shops/{shop}/customers/{customer_ref}/refunds",
            post(handlers::ledger::refund),
        )
        .route(
            "/shops/{shop}/customers/{customer_ref}/imports",
            post(handlers::ledger::import_balance),
        )
        .route(
            "/shops/{shop}/customers/{customer_ref}/audit",
            get(handlers::ledger::audit),
        )
}

fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/shops/{shop}/orders", post(handlers::order::ingest_order))
        .route(
            "/shops/{shop}/orders/analyze",
            post(handlers::order::analyze_order),
        )
}

/// 等级目录路由
fn tier_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/shops/{shop}/tiers",
            get(handlers::tier::list_tiers).post(handlers::tier::create_tier),
        )
        .route("/shops/{shop}/tiers/order", put(handlers::tier::reorder_tiers))
        .route(
            "/shops/{shop}/tiers/{id}",
            put(handlers::tier::update_tier).delete(handlers::tier::delete_tier),
        )
}

fn migration_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/shops/{shop}/migrations",
            get(handlers::migration::list_migrations).post(handlers::migration::start_migration),
        )
        .route("/migrations/{id}", get(handlers::migration::get_migration))
        .route(
            "/migrations/{id}/cancel",
            post(handlers::migration::cancel_migration),
        )
}

/// 全部 API 路由（不含前缀）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(customer_routes())
        .merge(order_routes())
        .merge(tier_routes())
        .merge(migration_routes())
}

/// 构建完整应用
///
/// 挂载 /api 前缀、健康检查和可观测性中间件；CORS 由调用方按部署环境追加
pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.engine.config().server.request_timeout_seconds);

    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(health_check))
        .layer(request_timeout(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

/// 超时的请求返回 408
fn request_timeout(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// 存活探针
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cashback-engine"
    }))
}
