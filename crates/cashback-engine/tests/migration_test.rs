//! 历史订单迁移集成测试
//!
//! 订单源与交易仓储用可控实现替换，验证计数、失败隔离与取消

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use cashback_engine::external::OrderFeed;
use cashback_engine::repository::{MigrationJobRepositoryTrait, TransactionRepositoryTrait};
use cashback_engine::{
    CashbackTransaction, LoyaltyError, MemoryStore, MigrationParams, MigrationStatus,
    NewCashbackTransaction, OrderPage, OrderQuery, RecordOutcome, Repositories, Result,
    TransactionStatus,
};
use cashback_shared::config::AppConfig;

use common::{PagedOrderFeed, SHOP, build_engine, feed_order, paid_orders, seed_catalog};

/// 指定订单写入失败的交易仓储
struct FailingTransactions {
    inner: MemoryStore,
    failing_order: String,
}

#[async_trait]
impl TransactionRepositoryTrait for FailingTransactions {
    async fn find_transaction(&self, shop: &str, order_id: &str) -> Result<Option<CashbackTransaction>> {
        self.inner.find_transaction(shop, order_id).await
    }

    async fn record_with_ledger(&self, transaction: &NewCashbackTransaction) -> Result<RecordOutcome> {
        if transaction.order_id == self.failing_order {
            return Err(LoyaltyError::Internal("simulated write failure".to_string()));
        }
        self.inner.record_with_ledger(transaction).await
    }

    async fn sum_spend(&self, customer_id: i64, since: Option<DateTime<Utc>>) -> Result<Decimal> {
        self.inner.sum_spend(customer_id, since).await
    }

    async fn mark_sync_result(
        &self,
        id: i64,
        status: TransactionStatus,
        sync_error: Option<String>,
    ) -> Result<()> {
        self.inner.mark_sync_result(id, status, sync_error).await
    }

    async fn list_by_customer(&self, customer_id: i64, limit: i64) -> Result<Vec<CashbackTransaction>> {
        self.inner.list_by_customer(customer_id, limit).await
    }

    async fn list_sync_failed(&self, limit: i64) -> Result<Vec<CashbackTransaction>> {
        self.inner.list_sync_failed(limit).await
    }
}

/// 第 N 次拉取时把任务标记为取消的订单源
struct CancellingFeed {
    inner: PagedOrderFeed,
    store: MemoryStore,
    job_id: Mutex<Option<Uuid>>,
    cancel_on_call: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl OrderFeed for CancellingFeed {
    async fn fetch_page(&self, query: &OrderQuery) -> Result<OrderPage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = *self.job_id.lock();
        if call == self.cancel_on_call
            && let Some(job_id) = job_id
        {
            self.store
                .transition_status(
                    job_id,
                    &[MigrationStatus::Processing],
                    MigrationStatus::Cancelled,
                    None,
                )
                .await?;
        }
        self.inner.fetch_page(query).await
    }
}

/// 始终不可用的订单源
struct DownFeed;

#[async_trait]
impl OrderFeed for DownFeed {
    async fn fetch_page(&self, _query: &OrderQuery) -> Result<OrderPage> {
        Err(LoyaltyError::OrderFeed("503 Service Unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_single_order_failure_does_not_abort_job() {
    let store = MemoryStore::new();
    let mut repositories = Repositories::in_memory(store.clone());
    repositories.transactions = Arc::new(FailingTransactions {
        inner: store.clone(),
        failing_order: "order-700".to_string(),
    });
    let feed = Arc::new(PagedOrderFeed::new(paid_orders(1000, 50, Utc::now())));
    let engine = build_engine(repositories, feed.clone());
    seed_catalog(&engine).await;

    let job = engine
        .migrations
        .create_job(SHOP, MigrationParams::default())
        .await
        .unwrap();
    let finished = engine.migrations.run(job.id).await.unwrap();

    assert_eq!(finished.status, MigrationStatus::Completed);
    assert_eq!(finished.total_records, 1000);
    assert_eq!(finished.processed_records, 999);
    assert_eq!(finished.failed_records, 1);
    assert_eq!(finished.skipped_records, 0);
    assert_eq!(finished.errors.0.len(), 1);
    assert_eq!(finished.errors.0[0].order_id, "order-700");
    assert!(finished.started_at.is_some());
    assert!(finished.completed_at.is_some());
    assert_eq!(feed.calls(), 4);
    assert_eq!(store.transaction_snapshot().len(), 999);
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_counts_skips() {
    let store = MemoryStore::new();
    let mut orders = paid_orders(30, 5, Utc::now());
    orders.push(feed_order("guest-1", None, Decimal::from(20), Some(Decimal::from(20))));
    orders.push(feed_order("pending-1", Some("customer-1"), Decimal::from(20), None));
    let engine = build_engine(
        Repositories::in_memory(store.clone()),
        Arc::new(PagedOrderFeed::new(orders)),
    );
    seed_catalog(&engine).await;

    let params = MigrationParams {
        page_size: Some(7),
        ..MigrationParams::default()
    };
    let first = engine.migrations.create_job(SHOP, params.clone()).await.unwrap();
    let first = engine.migrations.run(first.id).await.unwrap();
    assert_eq!(first.status, MigrationStatus::Completed);
    assert_eq!(first.total_records, 32);
    assert_eq!(first.processed_records, 30);
    assert_eq!(first.skipped_records, 2);
    let ledger_len = store.ledger_snapshot().len();

    let second = engine.migrations.create_job(SHOP, params).await.unwrap();
    let second = engine.migrations.run(second.id).await.unwrap();
    assert_eq!(second.processed_records, 30);
    assert_eq!(store.transaction_snapshot().len(), 30);
    assert_eq!(store.ledger_snapshot().len(), ledger_len);

    let jobs = engine.migrations.list_jobs(SHOP, 10).await.unwrap();
    assert_eq!(jobs.len(), 2);
}

#[tokio::test]
async fn test_cancel_stops_before_next_page() {
    let store = MemoryStore::new();
    let feed = Arc::new(CancellingFeed {
        inner: PagedOrderFeed::new(paid_orders(1000, 50, Utc::now())),
        store: store.clone(),
        job_id: Mutex::new(None),
        cancel_on_call: 2,
        calls: AtomicUsize::new(0),
    });
    let engine = build_engine(Repositories::in_memory(store.clone()), feed.clone());
    seed_catalog(&engine).await;

    let job = engine
        .migrations
        .create_job(SHOP, MigrationParams::default())
        .await
        .unwrap();
    *feed.job_id.lock() = Some(job.id);

    let finished = engine.migrations.run(job.id).await.unwrap();
    assert_eq!(finished.status, MigrationStatus::Cancelled);
    // 取消时已拉取的第二页仍会处理完
    assert_eq!(finished.total_records, 500);
    assert_eq!(finished.processed_records, 500);
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);

    let err = engine.migrations.cancel(job.id).await.unwrap_err();
    assert!(matches!(err, LoyaltyError::InvalidJobTransition { .. }));
}

#[tokio::test]
async fn test_cancelled_pending_job_does_not_run() {
    let store = MemoryStore::new();
    let feed = Arc::new(PagedOrderFeed::new(paid_orders(10, 2, Utc::now())));
    let engine = build_engine(Repositories::in_memory(store.clone()), feed.clone());
    seed_catalog(&engine).await;

    let job = engine
        .migrations
        .create_job(SHOP, MigrationParams::default())
        .await
        .unwrap();
    let cancelled = engine.migrations.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, MigrationStatus::Cancelled);

    let err = engine.migrations.run(job.id).await.unwrap_err();
    assert!(matches!(err, LoyaltyError::InvalidJobTransition { .. }));
    assert_eq!(feed.calls(), 0);
    assert!(store.transaction_snapshot().is_empty());
}

#[tokio::test]
async fn test_feed_outage_fails_job() {
    let mut config = AppConfig::default();
    config.migration.feed_retry.initial_delay_ms = 1;
    config.migration.feed_retry.max_delay_ms = 5;
    let engine = cashback_engine::Engine::new(
        Repositories::in_memory(MemoryStore::new()),
        config,
        Arc::new(DownFeed),
        None,
    );

    let job = engine
        .migrations
        .create_job(SHOP, MigrationParams::default())
        .await
        .unwrap();
    let finished = engine.migrations.run(job.id).await.unwrap();

    assert_eq!(finished.status, MigrationStatus::Failed);
    assert!(finished.error_message.unwrap().contains("503"));
    assert_eq!(finished.total_records, 0);
}

#[tokio::test]
async fn test_create_job_validates_params() {
    let (engine, _store) = common::memory_engine();

    let oversized = MigrationParams {
        page_size: Some(251),
        ..MigrationParams::default()
    };
    assert!(matches!(
        engine.migrations.create_job(SHOP, oversized).await,
        Err(LoyaltyError::Validation(_))
    ));

    let inverted = MigrationParams {
        created_at_min: Some(Utc::now()),
        created_at_max: Some(Utc::now() - chrono::Duration::days(1)),
        ..MigrationParams::default()
    };
    assert!(engine.migrations.create_job(SHOP, inverted).await.is_err());

    assert!(matches!(
        engine.migrations.get_job(Uuid::now_v7()).await,
        Err(LoyaltyError::MigrationJobNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_started_job_runs_in_background() {
    let store = MemoryStore::new();
    let feed = Arc::new(PagedOrderFeed::new(paid_orders(300, 30, Utc::now())));
    let engine = build_engine(Repositories::in_memory(store.clone()), feed.clone());
    seed_catalog(&engine).await;

    let job = engine.migrations.start(SHOP, MigrationParams::default()).await.unwrap();
    assert_eq!(job.status, MigrationStatus::Pending);

    let finished = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        loop {
            let current = engine.migrations.get_job(job.id).await.unwrap();
            if current.status.is_terminal() {
                return current;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("后台任务未在时限内结束");

    assert_eq!(finished.status, MigrationStatus::Completed);
    assert_eq!(finished.total_records, 300);
    assert_eq!(finished.processed_records, 300);
    assert_eq!(feed.calls(), 2);
    assert_eq!(store.transaction_snapshot().len(), 300);
}

#[tokio::test]
async fn test_empty_feed_completes_with_zero_counts() {
    let store = MemoryStore::new();
    let engine = build_engine(
        Repositories::in_memory(store.clone()),
        Arc::new(PagedOrderFeed::default()),
    );
    seed_catalog(&engine).await;

    let job = engine
        .migrations
        .create_job(SHOP, MigrationParams::default())
        .await
        .unwrap();
    let finished = engine.migrations.run(job.id).await.unwrap();

    assert_eq!(finished.status, MigrationStatus::Completed);
    assert_eq!(finished.total_records, 0);
    assert!(finished.errors.0.is_empty());
}
