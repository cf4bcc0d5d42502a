//! 外部储值同步
//!
//! 交易提交后尽力把返现同步到外部储值账户：
//! - 传输失败按策略重试，耗尽后标记 SYNC_FAILED
//! - 外部返回字段错误时不重试，直接标记 SYNC_FAILED 并记录原因
//!
//! 同步结果只影响交易状态，不改动本地账本。

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use cashback_shared::observability::metrics;
use cashback_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{LoyaltyError, Result};
use crate::external::{CreditIssueRequest, CreditIssuer};
use crate::models::{CashbackTransaction, TransactionStatus};
use crate::repository::{CustomerRepositoryTrait, TransactionRepositoryTrait};

/// 外部储值同步服务
pub struct CreditSyncService {
    issuer: Arc<dyn CreditIssuer>,
    customers: Arc<dyn CustomerRepositoryTrait>,
    transactions: Arc<dyn TransactionRepositoryTrait>,
    retry: RetryPolicy,
}

impl CreditSyncService {
    pub fn new(
        issuer: Arc<dyn CreditIssuer>,
        customers: Arc<dyn CustomerRepositoryTrait>,
        transactions: Arc<dyn TransactionRepositoryTrait>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            issuer,
            customers,
            transactions,
            retry,
        }
    }

    /// 同步一笔交易的返现，返回同步后的交易状态
    #[instrument(skip(self, transaction), fields(shop = %transaction.shop, order_id = %transaction.order_id))]
    pub async fn sync(&self, transaction: &CashbackTransaction, customer_ref: &str) -> TransactionStatus {
        let request = CreditIssueRequest {
            shop: transaction.shop.clone(),
            customer_ref: customer_ref.to_string(),
            amount: transaction.cashback_amount,
            currency: transaction.currency.clone(),
            reference: transaction.order_id.clone(),
        };

        let result = retry_with_policy(
            &self.retry,
            "credit_issuer.issue_credit",
            LoyaltyError::is_retryable,
            || self.issuer.issue_credit(&request),
        )
        .await;

        let (status, sync_error) = match result {
            Ok(resp) if resp.is_success() => (TransactionStatus::SyncedToExternal, None),
            Ok(resp) => {
                let summary = resp.error_summary();
                warn!(errors = %summary, "外部储值发放被拒绝");
                (TransactionStatus::SyncFailed, Some(summary))
            }
            Err(e) => {
                warn!(error = %e, "外部储值发放失败");
                (TransactionStatus::SyncFailed, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .transactions
            .mark_sync_result(transaction.id, status, sync_error)
            .await
        {
            error!(transaction_id = transaction.id, error = %e, "记录同步结果失败");
        }

        let label = match status {
            TransactionStatus::SyncedToExternal => "synced",
            _ => "failed",
        };
        metrics::record_credit_sync(label);
        status
    }

    /// 重试同步失败的交易，返回本次成功的数量
    pub async fn retry_failed(&self, limit: i64) -> Result<usize> {
        let failed = self.transactions.list_sync_failed(limit).await?;
        let mut synced = 0;
        for transaction in failed {
            let Some(customer) = self.customers.get_customer(transaction.customer_id).await? else {
                warn!(transaction_id = transaction.id, "交易关联的客户不存在，跳过同步");
                continue;
            };
            if self.sync(&transaction, &customer.external_customer_id).await
                == TransactionStatus::SyncedToExternal
            {
                synced += 1;
            }
        }
        if synced > 0 {
            info!(synced, "已补同步外部储值");
        }
        Ok(synced)
    }
}
