//! 历史订单迁移任务实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::enums::MigrationStatus;

/// 迁移参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationParams {
    /// 只迁移该时间之后创建的订单
    pub created_at_min: Option<DateTime<Utc>>,
    pub created_at_max: Option<DateTime<Utc>>,
    pub financial_status: Option<String>,
    /// 覆盖默认分页大小
    pub page_size: Option<u32>,
}

/// 单个订单的失败样本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationError {
    pub order_id: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// 迁移任务
///
/// 计数在运行中增量持久化，进程崩溃后保留准确的部分进度。任务不会被自动续跑。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJob {
    pub id: Uuid,
    pub shop: String,
    pub status: MigrationStatus,
    /// 已拉取的订单数
    pub total_records: i64,
    /// 已入账的订单数（含幂等命中）
    pub processed_records: i64,
    pub failed_records: i64,
    /// 无客户或未结算而跳过的订单数
    pub skipped_records: i64,
    /// 失败样本（有上限）
    pub errors: Json<Vec<MigrationError>>,
    pub params: Json<MigrationParams>,
    /// 任务级失败原因
    #[sqlx(default)]
    pub error_message: Option<String>,
    #[sqlx(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 一页订单处理后的计数增量
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressDelta {
    pub total: i64,
    pub processed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub errors: Vec<MigrationError>,
}

impl ProgressDelta {
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.errors.is_empty()
    }
}

impl MigrationJob {
    pub fn new(shop: impl Into<String>, params: MigrationParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            shop: shop.into(),
            status: MigrationStatus::Pending,
            total_records: 0,
            processed_records: 0,
            failed_records: 0,
            skipped_records: 0,
            errors: Json(Vec::new()),
            params: Json(params),
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 合并计数增量，错误样本不超过 max_errors 条
    pub fn apply_progress(&mut self, delta: &ProgressDelta, max_errors: usize) {
        self.total_records += delta.total;
        self.processed_records += delta.processed;
        self.failed_records += delta.failed;
        self.skipped_records += delta.skipped;
        let room = max_errors.saturating_sub(self.errors.0.len());
        self.errors
            .0
            .extend(delta.errors.iter().take(room).cloned());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(order_id: &str) -> MigrationError {
        MigrationError {
            order_id: order_id.to_string(),
            message: "boom".to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = MigrationJob::new("demo.myshopify.com", MigrationParams::default());
        assert_eq!(job.status, MigrationStatus::Pending);
        assert_eq!(job.total_records, 0);
        assert!(job.errors.0.is_empty());
    }

    #[test]
    fn test_apply_progress_caps_errors() {
        let mut job = MigrationJob::new("demo.myshopify.com", MigrationParams::default());
        let delta = ProgressDelta {
            total: 3,
            processed: 1,
            failed: 2,
            skipped: 0,
            errors: vec![error("1"), error("2")],
        };
        job.apply_progress(&delta, 3);
        job.apply_progress(&delta, 3);

        assert_eq!(job.total_records, 6);
        assert_eq!(job.processed_records, 2);
        assert_eq!(job.failed_records, 4);
        assert_eq!(job.errors.0.len(), 3);
    }

    #[test]
    fn test_progress_delta_emptiness() {
        assert!(ProgressDelta::default().is_empty());

        let only_errors = ProgressDelta {
            errors: vec![error("9")],
            ..ProgressDelta::default()
        };
        assert!(!only_errors.is_empty());
        assert_ne!(only_errors, ProgressDelta::default());
        assert_eq!(only_errors.clone(), only_errors);
    }
}
