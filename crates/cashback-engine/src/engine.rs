//! 服务装配
//!
//! 从仓储集合与配置构建全部服务，供 HTTP 层、后台 worker 和测试共用

use std::sync::Arc;

use cashback_shared::config::AppConfig;

use crate::external::{CreditIssuer, OrderFeed};
use crate::migration::MigrationPipeline;
use crate::repository::Repositories;
use crate::service::{
    CreditSyncService, CustomerLookupService, EvaluationRetryQueue, LedgerService,
    OrderIngestService, TierCatalogService, TierEvaluator, TransactionRecorder,
};
use crate::worker::TierMaintenanceWorker;

/// 返现引擎
#[derive(Clone)]
pub struct Engine {
    pub repositories: Repositories,
    pub ledger: Arc<LedgerService>,
    pub evaluator: Arc<TierEvaluator>,
    pub catalog: Arc<TierCatalogService>,
    pub recorder: Arc<TransactionRecorder>,
    pub ingest: Arc<OrderIngestService>,
    pub lookup: Arc<CustomerLookupService>,
    pub migrations: Arc<MigrationPipeline>,
    pub retry_queue: Arc<EvaluationRetryQueue>,
    pub credit_sync: Option<Arc<CreditSyncService>>,
    config: Arc<AppConfig>,
}

impl Engine {
    /// 装配服务
    ///
    /// issuer 为空时不做外部储值同步
    pub fn new(
        repositories: Repositories,
        config: AppConfig,
        feed: Arc<dyn OrderFeed>,
        issuer: Option<Arc<dyn CreditIssuer>>,
    ) -> Self {
        let repos = &repositories;

        let ledger = Arc::new(LedgerService::new(repos.customers.clone(), repos.ledger.clone()));
        let evaluator = Arc::new(TierEvaluator::new(
            repos.customers.clone(),
            repos.tiers.clone(),
            repos.memberships.clone(),
            repos.transactions.clone(),
        ));
        let catalog = Arc::new(TierCatalogService::new(repos.tiers.clone(), evaluator.clone()));
        let retry_queue = Arc::new(EvaluationRetryQueue::new(config.workers.evaluation_max_attempts));

        let credit_sync = issuer.map(|issuer| {
            Arc::new(CreditSyncService::new(
                issuer,
                repos.customers.clone(),
                repos.transactions.clone(),
                config.credit_issuer.retry.to_policy(),
            ))
        });

        let mut recorder = TransactionRecorder::new(
            repos.customers.clone(),
            repos.tiers.clone(),
            repos.memberships.clone(),
            repos.transactions.clone(),
            evaluator.clone(),
            retry_queue.clone(),
        );
        if let Some(sync) = &credit_sync {
            recorder = recorder.with_credit_sync(sync.clone());
        }
        let recorder = Arc::new(recorder);

        let ingest = Arc::new(OrderIngestService::new(
            &config.payment,
            recorder.clone(),
            ledger.clone(),
        ));
        let lookup = Arc::new(CustomerLookupService::new(
            repos.customers.clone(),
            repos.tiers.clone(),
            repos.memberships.clone(),
            repos.ledger.clone(),
            repos.transactions.clone(),
        ));
        let migrations = Arc::new(MigrationPipeline::new(
            repos.migration_jobs.clone(),
            feed,
            ingest.clone(),
            config.migration.clone(),
        ));

        Self {
            repositories,
            ledger,
            evaluator,
            catalog,
            recorder,
            ingest,
            lookup,
            migrations,
            retry_queue,
            credit_sync,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 等级维护 worker
    pub fn maintenance_worker(&self) -> TierMaintenanceWorker {
        TierMaintenanceWorker::new(
            self.evaluator.clone(),
            self.retry_queue.clone(),
            self.credit_sync.clone(),
            &self.config.workers,
        )
    }
}
