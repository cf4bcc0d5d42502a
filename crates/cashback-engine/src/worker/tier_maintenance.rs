//! 等级维护 Worker
//!
//! 定期执行：
//! 1. 回退已到期的手工/活动等级
//! 2. 重试交易后失败的等级评估
//! 3. 补同步外部储值失败的交易（启用外部发放时）

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use cashback_shared::config::WorkersConfig;
use cashback_shared::observability::metrics;

use crate::service::{CreditSyncService, DrainReport, EvaluationRetryQueue, TierEvaluator};

const WORKER_NAME: &str = "tier_maintenance_worker";

/// 单轮维护结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reverted: usize,
    pub evaluations: DrainReport,
    pub credit_synced: usize,
}

/// 等级维护 Worker
pub struct TierMaintenanceWorker {
    evaluator: Arc<TierEvaluator>,
    retry_queue: Arc<EvaluationRetryQueue>,
    credit_sync: Option<Arc<CreditSyncService>>,
    poll_interval: Duration,
    batch_size: i64,
}

impl TierMaintenanceWorker {
    pub fn new(
        evaluator: Arc<TierEvaluator>,
        retry_queue: Arc<EvaluationRetryQueue>,
        credit_sync: Option<Arc<CreditSyncService>>,
        config: &WorkersConfig,
    ) -> Self {
        Self {
            evaluator,
            retry_queue,
            credit_sync,
            poll_interval: Duration::from_secs(config.maintenance_interval_seconds.max(1)),
            batch_size: config.expiration_batch_size.max(1),
        }
    }

    /// 主循环：持续执行直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            credit_sync = self.credit_sync.is_some(),
            "TierMaintenanceWorker 已启动"
        );
        loop {
            self.run_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 执行一轮维护，单项失败不影响其他项
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.evaluator.revert_expired(Utc::now(), self.batch_size).await {
            Ok(reverted) => report.reverted = reverted,
            Err(e) => error!(error = %e, "到期等级回退出错"),
        }

        if !self.retry_queue.is_empty() {
            report.evaluations = self.retry_queue.drain(&self.evaluator).await;
        }

        if let Some(sync) = &self.credit_sync {
            match sync.retry_failed(self.batch_size).await {
                Ok(synced) => report.credit_synced = synced,
                Err(e) => error!(error = %e, "外部储值补同步出错"),
            }
        }

        metrics::set_worker_last_run(WORKER_NAME);
        report
    }
}
