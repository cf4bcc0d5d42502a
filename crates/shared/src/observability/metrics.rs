//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述
///
/// 描述会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "cashback_transactions_total",
        "Cashback transactions by outcome (created / existing / failed)"
    );
    metrics::describe_histogram!(
        "cashback_amount",
        "Cashback credited per transaction, in store currency"
    );
    metrics::describe_histogram!(
        "cashback_record_duration_seconds",
        "Transaction recording duration in seconds"
    );

    metrics::describe_counter!("ledger_entries_total", "Ledger entries appended by entry type");
    metrics::describe_counter!(
        "ledger_corrections_total",
        "External sync corrections appended during reconciliation"
    );

    metrics::describe_counter!("tier_transitions_total", "Tier transitions by change type");

    metrics::describe_counter!("migration_jobs_total", "Migration jobs by terminal status");
    metrics::describe_counter!("migration_orders_total", "Migrated orders by outcome");
    metrics::describe_histogram!(
        "migration_job_duration_seconds",
        "Migration job duration in seconds"
    );

    metrics::describe_counter!("credit_sync_total", "External store credit issuance attempts");

    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last background worker iteration"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录返现交易
///
/// `cashback` 以浮点形式记录，仅用于观测，不参与账务计算
#[inline]
pub fn record_cashback_transaction(outcome: &str, cashback: f64, duration_secs: f64) {
    metrics::counter!("cashback_transactions_total", "outcome" => outcome.to_string())
        .increment(1);
    if cashback > 0.0 {
        metrics::histogram!("cashback_amount").record(cashback);
    }
    metrics::histogram!("cashback_record_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// 记录账本流水写入
#[inline]
pub fn record_ledger_entry(entry_type: &str) {
    metrics::counter!("ledger_entries_total", "entry_type" => entry_type.to_string())
        .increment(1);
}

/// 记录对账修正
#[inline]
pub fn record_ledger_correction(shop: &str) {
    metrics::counter!("ledger_corrections_total", "shop" => shop.to_string()).increment(1);
}

/// 记录等级变更
#[inline]
pub fn record_tier_transition(change_type: &str) {
    metrics::counter!("tier_transitions_total", "change_type" => change_type.to_string())
        .increment(1);
}

/// 记录迁移任务结束
#[inline]
pub fn record_migration_job(status: &str, duration_secs: f64) {
    metrics::counter!("migration_jobs_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("migration_job_duration_seconds", "status" => status.to_string())
        .record(duration_secs);
}

/// 记录迁移订单处理结果
#[inline]
pub fn record_migration_orders(outcome: &str, count: u64) {
    metrics::counter!("migration_orders_total", "outcome" => outcome.to_string())
        .increment(count);
}

/// 记录外部储值同步
#[inline]
pub fn record_credit_sync(status: &str) {
    metrics::counter!("credit_sync_total", "status" => status.to_string()).increment(1);
}

/// 记录后台 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_http_request("GET", "/api/test", 200, 0.1);
        record_cashback_transaction("created", 1.0, 0.02);
        record_ledger_entry("EARNED");
        record_ledger_correction("demo.myshopify.com");
        record_tier_transition("AUTO_UPGRADE");
        record_migration_job("completed", 12.5);
        record_migration_orders("processed", 250);
        record_credit_sync("synced");
        set_worker_last_run("tier_maintenance_worker");
    }
}
