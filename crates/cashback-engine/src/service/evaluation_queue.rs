//! 等级评估补偿队列
//!
//! 交易写入后的等级评估失败不影响交易本身，客户被放入队列，由后台 worker 定期重试。
//! 队列在进程内，重启后丢失的评估会在客户下一笔订单时自然补上。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::service::tier_evaluator::{SYSTEM_ACTOR, TierEvaluator};

/// 待重试的评估
#[derive(Debug, Clone)]
pub struct PendingEvaluation {
    pub attempts: u32,
    pub last_error: String,
    pub first_failed_at: DateTime<Utc>,
}

/// 一次重试的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub requeued: usize,
    pub dropped: usize,
}

/// 等级评估补偿队列
pub struct EvaluationRetryQueue {
    pending: DashMap<i64, PendingEvaluation>,
    max_attempts: u32,
}

impl EvaluationRetryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            pending: DashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// 加入队列，同一客户只保留一条
    pub fn enqueue(&self, customer_id: i64, error: impl Into<String>) {
        let error = error.into();
        self.pending
            .entry(customer_id)
            .and_modify(|p| p.last_error = error.clone())
            .or_insert_with(|| PendingEvaluation {
                attempts: 1,
                last_error: error,
                first_failed_at: Utc::now(),
            });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, customer_id: i64) -> Option<PendingEvaluation> {
        self.pending.get(&customer_id).map(|p| p.clone())
    }

    /// 逐个重试队列中的评估
    ///
    /// 达到最大次数仍失败的客户被移出队列并记录错误日志
    pub async fn drain(&self, evaluator: &TierEvaluator) -> DrainReport {
        let customer_ids: Vec<i64> = self.pending.iter().map(|e| *e.key()).collect();
        let mut report = DrainReport::default();

        for customer_id in customer_ids {
            let Some((_, mut pending)) = self.pending.remove(&customer_id) else {
                continue;
            };

            match evaluator.evaluate(customer_id, SYSTEM_ACTOR).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    pending.attempts += 1;
                    pending.last_error = e.to_string();
                    if pending.attempts >= self.max_attempts {
                        error!(
                            customer_id,
                            attempts = pending.attempts,
                            first_failed_at = %pending.first_failed_at,
                            error = %e,
                            "等级评估多次重试失败，放弃"
                        );
                        report.dropped += 1;
                    } else {
                        warn!(customer_id, attempts = pending.attempts, error = %e, "等级评估重试失败");
                        self.pending.entry(customer_id).or_insert(pending);
                        report.requeued += 1;
                    }
                }
            }
        }

        if report.succeeded > 0 || report.dropped > 0 {
            info!(
                succeeded = report.succeeded,
                requeued = report.requeued,
                dropped = report.dropped,
                "等级评估补偿完成"
            );
        }
        report
    }
}
