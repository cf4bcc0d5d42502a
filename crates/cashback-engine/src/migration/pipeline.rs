//! 迁移任务执行
//!
//! ## 状态机
//!
//! PENDING → PROCESSING → COMPLETED | FAILED | CANCELLED
//!
//! - 每页处理完立即持久化计数增量，进程崩溃后任务保留准确的部分进度，不会被自动续跑
//! - 单个订单失败只计数并记录样本，不中断当前页和任务
//! - 订单源重试耗尽后任务标记为 FAILED 并记录原因
//! - 页与页之间检查取消标记；已入账的交易不回滚，重跑时依靠幂等跳过

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use cashback_shared::config::MigrationConfig;
use cashback_shared::observability::metrics;
use cashback_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{LoyaltyError, Result};
use crate::external::OrderFeed;
use crate::models::{
    FeedOrder, LedgerSource, MigrationError, MigrationJob, MigrationParams, MigrationStatus,
    OrderQuery, ProgressDelta,
};
use crate::repository::MigrationJobRepositoryTrait;
use crate::service::dto::IngestOutcome;
use crate::service::ingest::OrderIngestService;

/// 单页订单上限
const MAX_PAGE_SIZE: u32 = 250;

/// 迁移任务执行器
pub struct MigrationPipeline {
    jobs: Arc<dyn MigrationJobRepositoryTrait>,
    feed: Arc<dyn OrderFeed>,
    ingest: Arc<OrderIngestService>,
    config: MigrationConfig,
    feed_retry: RetryPolicy,
}

/// 一次运行的结束方式
enum RunEnd {
    Exhausted,
    Cancelled,
}

impl MigrationPipeline {
    pub fn new(
        jobs: Arc<dyn MigrationJobRepositoryTrait>,
        feed: Arc<dyn OrderFeed>,
        ingest: Arc<OrderIngestService>,
        config: MigrationConfig,
    ) -> Self {
        let feed_retry = config.feed_retry.to_policy();
        Self {
            jobs,
            feed,
            ingest,
            config,
            feed_retry,
        }
    }

    // ==================== 任务管理 ====================

    /// 创建待执行的任务
    #[instrument(skip(self, params))]
    pub async fn create_job(&self, shop: &str, params: MigrationParams) -> Result<MigrationJob> {
        if shop.trim().is_empty() {
            return Err(LoyaltyError::Validation("shop 不能为空".to_string()));
        }
        if let Some(size) = params.page_size
            && !(1..=MAX_PAGE_SIZE).contains(&size)
        {
            return Err(LoyaltyError::Validation(format!(
                "page_size 必须在 1 到 {} 之间: {}",
                MAX_PAGE_SIZE, size
            )));
        }
        if let (Some(min), Some(max)) = (params.created_at_min, params.created_at_max)
            && min > max
        {
            return Err(LoyaltyError::Validation("created_at_min 不能晚于 created_at_max".to_string()));
        }

        let job = MigrationJob::new(shop, params);
        self.jobs.create_job(&job).await?;
        info!(job_id = %job.id, "迁移任务已创建");
        Ok(job)
    }

    /// 创建任务并在后台执行
    pub async fn start(self: &Arc<Self>, shop: &str, params: MigrationParams) -> Result<MigrationJob> {
        let job = self.create_job(shop, params).await?;
        let pipeline = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            if let Err(e) = pipeline.run(job_id).await {
                error!(job_id = %job_id, error = %e, "迁移任务执行出错");
            }
        });
        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<MigrationJob> {
        self.jobs
            .get_job(job_id)
            .await?
            .ok_or(LoyaltyError::MigrationJobNotFound(job_id))
    }

    pub async fn list_jobs(&self, shop: &str, limit: i64) -> Result<Vec<MigrationJob>> {
        self.jobs.list_jobs(shop, limit.clamp(1, 100)).await
    }

    /// 取消任务
    ///
    /// 运行中的任务在下一页开始前停止，已写入的计数保留
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: Uuid) -> Result<MigrationJob> {
        let cancelled = self.transition(job_id, MigrationStatus::Cancelled, None).await?;

        let job = self.get_job(job_id).await?;
        if !cancelled {
            return Err(LoyaltyError::InvalidJobTransition {
                job_id,
                current_status: job.status.as_str().to_string(),
            });
        }
        info!(job_id = %job_id, "迁移任务已取消");
        Ok(job)
    }

    // ==================== 执行 ====================

    /// 执行任务直到订单源没有更多页、任务被取消或失败，返回最终状态的任务
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid) -> Result<MigrationJob> {
        let job = self.get_job(job_id).await?;
        let claimed = self.transition(job_id, MigrationStatus::Processing, None).await?;
        if !claimed {
            let current = self.get_job(job_id).await?;
            return Err(LoyaltyError::InvalidJobTransition {
                job_id,
                current_status: current.status.as_str().to_string(),
            });
        }

        let started = Instant::now();
        info!(shop = %job.shop, "迁移任务开始执行");

        match self.process_pages(&job).await {
            Ok(RunEnd::Exhausted) => {
                let completed = self.transition(job_id, MigrationStatus::Completed, None).await?;
                if !completed {
                    warn!("任务在结束前已被取消");
                }
            }
            Ok(RunEnd::Cancelled) => {
                info!("检测到取消标记，停止拉取");
            }
            Err(e) => {
                error!(error = %e, "迁移任务失败");
                self.transition(job_id, MigrationStatus::Failed, Some(e.to_string()))
                    .await?;
            }
        }

        let finished = self.get_job(job_id).await?;
        metrics::record_migration_job(finished.status.as_str(), started.elapsed().as_secs_f64());
        info!(
            status = finished.status.as_str(),
            total = finished.total_records,
            processed = finished.processed_records,
            failed = finished.failed_records,
            skipped = finished.skipped_records,
            "迁移任务结束"
        );
        Ok(finished)
    }

    async fn process_pages(&self, job: &MigrationJob) -> Result<RunEnd> {
        let params = &job.params.0;
        let mut query = OrderQuery {
            shop: job.shop.clone(),
            created_at_min: params.created_at_min,
            created_at_max: params.created_at_max,
            financial_status: params.financial_status.clone(),
            page_size: params.page_size.unwrap_or(self.config.page_size).clamp(1, MAX_PAGE_SIZE),
            cursor: None,
        };
        let mut page_no = 0u32;

        loop {
            if self.is_cancelled(job.id).await? {
                return Ok(RunEnd::Cancelled);
            }

            let page = retry_with_policy(
                &self.feed_retry,
                "order_feed.fetch_page",
                LoyaltyError::is_retryable,
                || self.feed.fetch_page(&query),
            )
            .await?;
            page_no += 1;

            let delta = self.process_page(&job.shop, page.orders).await;
            // 空页不写库
            if !delta.is_empty() {
                self.jobs
                    .record_progress(job.id, &delta, self.config.max_recorded_errors)
                    .await?;
            }
            metrics::record_migration_orders("processed", delta.processed as u64);
            metrics::record_migration_orders("skipped", delta.skipped as u64);
            metrics::record_migration_orders("failed", delta.failed as u64);
            info!(
                page = page_no,
                orders = delta.total,
                processed = delta.processed,
                skipped = delta.skipped,
                failed = delta.failed,
                "迁移页已处理"
            );

            match page.end_cursor {
                Some(cursor) if page.has_next_page => query.cursor = Some(cursor),
                _ => return Ok(RunEnd::Exhausted),
            }
        }
    }

    /// 以有限并发处理一页订单，单个订单失败只计入增量
    ///
    /// 每个订单的 future 持有自己的输入
    async fn process_page(&self, shop: &str, orders: Vec<FeedOrder>) -> ProgressDelta {
        let shop: Arc<str> = Arc::from(shop);
        let results: Vec<(String, Result<IngestOutcome>)> = futures::stream::iter(orders)
            .map(|order| {
                let ingest = Arc::clone(&self.ingest);
                let shop = Arc::clone(&shop);
                async move {
                    let result = ingest.ingest(&shop, &order, LedgerSource::Migration).await;
                    (order.id, result)
                }
            })
            .buffer_unordered(self.config.page_concurrency.max(1))
            .collect()
            .await;

        let mut delta = ProgressDelta {
            total: results.len() as i64,
            ..ProgressDelta::default()
        };
        for (order_id, result) in results {
            match result {
                Ok(outcome) if outcome.is_skipped() => delta.skipped += 1,
                Ok(_) => delta.processed += 1,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "订单迁移失败");
                    delta.failed += 1;
                    if delta.errors.len() < self.config.max_recorded_errors {
                        delta.errors.push(MigrationError {
                            order_id,
                            message: e.to_string(),
                            occurred_at: Utc::now(),
                        });
                    }
                }
            }
        }
        delta
    }

    /// 按状态机允许的来源状态做条件迁移
    async fn transition(
        &self,
        job_id: Uuid,
        target: MigrationStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let sources = MigrationStatus::sources_of(target);
        self.jobs
            .transition_status(job_id, &sources, target, error_message)
            .await
    }

    async fn is_cancelled(&self, job_id: Uuid) -> Result<bool> {
        let job = self.get_job(job_id).await?;
        Ok(job.status == MigrationStatus::Cancelled)
    }
}
