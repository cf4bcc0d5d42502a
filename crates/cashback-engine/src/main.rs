//! 返现引擎服务
//!
//! 提供订单入账、等级管理、账本对账与历史迁移的 REST API，并运行等级维护 worker。

use std::sync::Arc;

use axum::http::HeaderValue;
use cashback_engine::{
    Engine, HttpCreditIssuer, HttpOrderFeed, Repositories,
    api::{self, AppState},
    external::{CreditIssuer, OrderFeed},
};
use cashback_shared::{config::AppConfig, database::Database, observability};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("cashback-engine").unwrap_or_default();

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting cashback-engine on {}", config.server_addr());

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations(&sqlx::migrate!("./migrations")).await?;
    }

    let feed: Arc<dyn OrderFeed> = Arc::new(HttpOrderFeed::new(&config.order_feed)?);
    let issuer: Option<Arc<dyn CreditIssuer>> = if config.credit_issuer.enabled {
        info!(base_url = %config.credit_issuer.base_url, "Store credit sync enabled");
        Some(Arc::new(HttpCreditIssuer::new(&config.credit_issuer)?))
    } else {
        warn!("Store credit sync disabled, cashback stays in the local ledger only");
        None
    };

    let server_addr = config.server_addr();
    let production = config.is_production();
    let engine = Engine::new(Repositories::postgres(db.pool().clone()), config, feed, issuer);

    // 等级维护：到期回退、失败评估重试、储值同步补偿
    let worker = engine.maintenance_worker();
    tokio::spawn(async move {
        worker.run().await;
    });

    // CORS 来源通过 CASHBACK_CORS_ORIGINS 控制，默认只放行本地管理后台
    let allowed_origins = std::env::var("CASHBACK_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3001,http://localhost:5173".to_string());
    let cors = if allowed_origins == "*" {
        if production {
            warn!("CASHBACK_CORS_ORIGINS=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        info!("CORS allowed_origins: {}", allowed_origins);
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = api::router(AppState::new(engine)).layer(cors);

    let listener = TcpListener::bind(&server_addr).await?;
    info!("Listening on {}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// SIGTERM 或 Ctrl+C 到达后返回，触发 axum 的优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
