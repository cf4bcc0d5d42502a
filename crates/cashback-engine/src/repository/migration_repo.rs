//! 迁移任务仓储
//!
//! 状态迁移带 WHERE status 条件，计数使用原子自增，不依赖进程内状态

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::traits::MigrationJobRepositoryTrait;
use crate::error::Result;
use crate::models::{MigrationJob, MigrationStatus, ProgressDelta};

const JOB_COLUMNS: &str = "id, shop, status, total_records, processed_records, failed_records, \
                           skipped_records, errors, params, error_message, started_at, \
                           completed_at, created_at, updated_at";

/// 迁移任务仓储（PostgreSQL）
pub struct PgMigrationJobRepository {
    pool: PgPool,
}

impl PgMigrationJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationJobRepositoryTrait for PgMigrationJobRepository {
    async fn create_job(&self, job: &MigrationJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_jobs (id, shop, status, errors, params, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(&job.shop)
        .bind(job.status)
        .bind(&job.errors)
        .bind(&job.params)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<MigrationJob>> {
        let sql = format!("SELECT {} FROM migration_jobs WHERE id = $1", JOB_COLUMNS);
        let job = sqlx::query_as::<_, MigrationJob>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn list_jobs(&self, shop: &str, limit: i64) -> Result<Vec<MigrationJob>> {
        let sql = format!(
            "SELECT {} FROM migration_jobs WHERE shop = $1 ORDER BY created_at DESC LIMIT $2",
            JOB_COLUMNS
        );
        let jobs = sqlx::query_as::<_, MigrationJob>(&sql)
            .bind(shop)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[MigrationStatus],
        to: MigrationStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE migration_jobs
            SET status = $2,
                error_message = COALESCE($3, error_message),
                started_at = CASE WHEN $4 THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $5 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($6)
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(error_message)
        .bind(to == MigrationStatus::Processing)
        .bind(to.is_terminal())
        .bind(&from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_progress(
        &self,
        id: Uuid,
        delta: &ProgressDelta,
        max_errors: usize,
    ) -> Result<()> {
        // 错误样本拼接后按序截断到上限，单条语句保证原子性
        sqlx::query(
            r#"
            UPDATE migration_jobs
            SET total_records = total_records + $2,
                processed_records = processed_records + $3,
                failed_records = failed_records + $4,
                skipped_records = skipped_records + $5,
                errors = (
                    SELECT COALESCE(jsonb_agg(e ORDER BY ord), '[]'::jsonb)
                    FROM jsonb_array_elements(errors || $6) WITH ORDINALITY AS t(e, ord)
                    WHERE ord <= $7
                ),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delta.total)
        .bind(delta.processed)
        .bind(delta.failed)
        .bind(delta.skipped)
        .bind(Json(&delta.errors))
        .bind(max_errors as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
