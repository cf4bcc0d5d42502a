//! 返现交易记录器
//!
//! ## 记录流程
//!
//! 1. 参数校验
//! 2. 幂等检查：(shop, order_id) 已存在时直接返回原交易
//! 3. 查找或创建客户，未入会的客户先完成首次分配
//! 4. 取生效比例：调用方指定的比例，否则为客户当前等级的比例
//! 5. 交易与 EARNED 流水原子写入
//! 6. 重新评估等级（新等级只影响下一笔订单）
//! 7. 可选：同步外部储值
//!
//! 第 6、7 步失败不影响已提交的交易：评估失败进入补偿队列，同步失败记录在交易状态上。

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, instrument, warn};

use cashback_shared::observability::metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{
    Customer, NewCashbackTransaction, RecordOutcome, Tier, compute_cashback,
};
use crate::repository::{
    CustomerRepositoryTrait, MembershipRepositoryTrait, TierRepositoryTrait,
    TransactionRepositoryTrait,
};
use crate::service::credit_sync::CreditSyncService;
use crate::service::dto::RecordRequest;
use crate::service::evaluation_queue::EvaluationRetryQueue;
use crate::service::tier_evaluator::{SYSTEM_ACTOR, TierEvaluator};

/// 返现交易记录器
pub struct TransactionRecorder {
    customers: Arc<dyn CustomerRepositoryTrait>,
    tiers: Arc<dyn TierRepositoryTrait>,
    memberships: Arc<dyn MembershipRepositoryTrait>,
    transactions: Arc<dyn TransactionRepositoryTrait>,
    evaluator: Arc<TierEvaluator>,
    retry_queue: Arc<EvaluationRetryQueue>,
    credit_sync: Option<Arc<CreditSyncService>>,
}

impl TransactionRecorder {
    pub fn new(
        customers: Arc<dyn CustomerRepositoryTrait>,
        tiers: Arc<dyn TierRepositoryTrait>,
        memberships: Arc<dyn MembershipRepositoryTrait>,
        transactions: Arc<dyn TransactionRepositoryTrait>,
        evaluator: Arc<TierEvaluator>,
        retry_queue: Arc<EvaluationRetryQueue>,
    ) -> Self {
        Self {
            customers,
            tiers,
            memberships,
            transactions,
            evaluator,
            retry_queue,
            credit_sync: None,
        }
    }

    /// 启用外部储值同步
    pub fn with_credit_sync(mut self, credit_sync: Arc<CreditSyncService>) -> Self {
        self.credit_sync = Some(credit_sync);
        self
    }

    /// 记录一笔订单的返现
    #[instrument(
        skip(self, request),
        fields(shop = %request.shop, order_id = %request.order_id, customer_ref = %request.customer_ref)
    )]
    pub async fn record(&self, request: RecordRequest) -> Result<RecordOutcome> {
        let started = Instant::now();
        validate_request(&request)?;

        // 幂等快速路径
        if let Some(existing) = self
            .transactions
            .find_transaction(&request.shop, &request.order_id)
            .await?
        {
            debug!(transaction_id = existing.id, "订单已记录，返回原交易");
            let outcome = RecordOutcome::Existing(existing);
            metrics::record_cashback_transaction(outcome.outcome_label(), 0.0, started.elapsed().as_secs_f64());
            return Ok(outcome);
        }

        let (customer, created) = self
            .customers
            .get_or_create_customer(&request.shop, &request.customer_ref)
            .await?;
        if created {
            info!(customer_id = customer.id, "首次出现的客户已创建");
        }

        let current_tier = self.current_tier(&customer, request.rate_percent.is_some()).await?;
        let rate = match (request.rate_percent, &current_tier) {
            (Some(rate), _) => rate,
            (None, Some(tier)) => tier.cashback_percent,
            (None, None) => return Err(LoyaltyError::EmptyCatalog(request.shop.clone())),
        };
        let cashback_amount = compute_cashback(request.eligible_amount, rate);

        let new_transaction = NewCashbackTransaction {
            shop: request.shop.clone(),
            order_id: request.order_id.clone(),
            customer_id: customer.id,
            order_amount: request.order_amount,
            eligible_amount: request.eligible_amount,
            cashback_amount,
            cashback_percent: rate,
            currency: request.currency.clone(),
            tier_id: current_tier.as_ref().map(|t| t.id),
            ordered_at: request.ordered_at,
            source: request.source,
        };
        let mut outcome = self.transactions.record_with_ledger(&new_transaction).await?;

        metrics::record_cashback_transaction(
            outcome.outcome_label(),
            cashback_amount.to_f64().unwrap_or_default(),
            started.elapsed().as_secs_f64(),
        );

        if let RecordOutcome::Created { transaction, entry } = &mut outcome {
            if let Some(entry) = entry {
                metrics::record_ledger_entry(entry.entry_type.as_str());
            }
            info!(
                transaction_id = transaction.id,
                cashback_amount = %transaction.cashback_amount,
                cashback_percent = %transaction.cashback_percent,
                "返现交易已记录"
            );

            // 新比例只对下一笔订单生效
            if let Err(e) = self.evaluator.evaluate(customer.id, SYSTEM_ACTOR).await {
                warn!(customer_id = customer.id, error = %e, "交易后等级评估失败，加入补偿队列");
                self.retry_queue.enqueue(customer.id, e.to_string());
            }

            if let Some(sync) = &self.credit_sync
                && transaction.cashback_amount > Decimal::ZERO
            {
                let status = sync.sync(transaction, &request.customer_ref).await;
                transaction.status = status;
            }
        }

        Ok(outcome)
    }

    /// 读取客户当前等级，未入会时先完成首次分配
    ///
    /// 调用方已指定比例时，入会失败（如目录为空）只记录告警
    async fn current_tier(&self, customer: &Customer, rate_supplied: bool) -> Result<Option<Tier>> {
        let membership = match self.memberships.get_active_membership(customer.id).await? {
            Some(m) => Some(m),
            None => match self.evaluator.evaluate(customer.id, SYSTEM_ACTOR).await {
                Ok(_) => self.memberships.get_active_membership(customer.id).await?,
                Err(e) if rate_supplied => {
                    warn!(customer_id = customer.id, error = %e, "客户入会失败，使用指定比例继续记录");
                    None
                }
                Err(e) => return Err(e),
            },
        };

        match membership {
            Some(m) => Ok(self.tiers.get_tier(m.tier_id).await?),
            None => Ok(None),
        }
    }
}

fn validate_request(request: &RecordRequest) -> Result<()> {
    if request.shop.trim().is_empty() || request.order_id.trim().is_empty() {
        return Err(LoyaltyError::Validation("shop 和 order_id 不能为空".to_string()));
    }
    if request.customer_ref.trim().is_empty() {
        return Err(LoyaltyError::MissingCustomer(request.order_id.clone()));
    }
    LoyaltyError::non_negative("order_amount", request.order_amount)?;
    LoyaltyError::non_negative("eligible_amount", request.eligible_amount)?;
    if request.eligible_amount > request.order_amount {
        return Err(LoyaltyError::Validation(format!(
            "可计返现金额 {} 超过订单金额 {}",
            request.eligible_amount, request.order_amount
        )));
    }
    if let Some(rate) = request.rate_percent
        && (rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED)
    {
        return Err(LoyaltyError::Validation(format!("返现比例必须在 0 到 100 之间: {}", rate)));
    }
    Ok(())
}
