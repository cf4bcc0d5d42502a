//! 储值账本服务
//!
//! 所有储值变动都以追加流水的方式记录，不修改、不删除已有流水：
//! - 返现入账（EARNED）由交易记录器随交易原子写入
//! - 订单储值抵扣、退款返还、人工调整、历史导入在这里写入
//! - 对账发现差异时追加修正流水，差异在账本中始终可见
//!
//! 同一客户的追加由仓储串行（行锁或进程内互斥），这里只负责校验、日志和指标。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use cashback_shared::observability::metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{
    AppendOutcome, Customer, LedgerAudit, LedgerEntry, LedgerEntryType, LedgerSource,
    NewLedgerEntry,
};
use crate::repository::{CustomerRepositoryTrait, LedgerRepositoryTrait};
use crate::service::dto::ReconcileOutcome;

/// 储值账本服务
pub struct LedgerService {
    customers: Arc<dyn CustomerRepositoryTrait>,
    ledger: Arc<dyn LedgerRepositoryTrait>,
}

impl LedgerService {
    pub fn new(
        customers: Arc<dyn CustomerRepositoryTrait>,
        ledger: Arc<dyn LedgerRepositoryTrait>,
    ) -> Self {
        Self {
            customers,
            ledger,
        }
    }

    // ==================== 写入 ====================

    /// 追加一条流水
    ///
    /// 金额不能为 0；带外部引用的去重类流水重复写入时返回已有记录
    #[instrument(
        skip(self, entry),
        fields(customer_id = entry.customer_id, entry_type = entry.entry_type.as_str(), amount = %entry.amount)
    )]
    pub async fn append(&self, entry: NewLedgerEntry) -> Result<AppendOutcome> {
        if entry.amount.is_zero() {
            return Err(LoyaltyError::Validation("流水金额不能为 0".to_string()));
        }

        let outcome = self.ledger.append(&entry).await?;
        match &outcome {
            AppendOutcome::Appended(written) => {
                metrics::record_ledger_entry(written.entry_type.as_str());
                if written.balance.is_sign_negative() && !written.balance.is_zero() {
                    warn!(
                        customer_id = written.customer_id,
                        balance = %written.balance,
                        "储值余额为负，需人工核查"
                    );
                }
                info!(entry_id = written.id, balance = %written.balance, "储值流水已写入");
            }
            AppendOutcome::Existing(existing) => {
                info!(
                    entry_id = existing.id,
                    reference = ?existing.external_reference,
                    "流水已存在，跳过重复写入"
                );
            }
        }
        Ok(outcome)
    }

    /// 订单使用储值支付的扣减，按订单号幂等
    pub async fn debit_order_payment(
        &self,
        customer_id: i64,
        amount: Decimal,
        order_id: &str,
        source: LedgerSource,
    ) -> Result<AppendOutcome> {
        positive("debit amount", amount)?;
        let entry = NewLedgerEntry::new(customer_id, -amount, LedgerEntryType::OrderPaymentDebit, source)
            .with_reference(order_id)
            .with_description(format!("订单 {} 使用储值支付", order_id));
        self.append(entry).await
    }

    /// 退款返还储值，按退款单号幂等
    pub async fn credit_refund(
        &self,
        customer_id: i64,
        amount: Decimal,
        refund_id: &str,
    ) -> Result<AppendOutcome> {
        positive("refund amount", amount)?;
        let entry = NewLedgerEntry::new(
            customer_id,
            amount,
            LedgerEntryType::RefundCredit,
            LedgerSource::Refund,
        )
        .with_reference(refund_id)
        .with_description(format!("退款 {} 返还储值", refund_id));
        self.append(entry).await
    }

    /// 人工调整，金额可正可负
    pub async fn adjust(
        &self,
        customer_id: i64,
        amount: Decimal,
        reason: &str,
        operator: &str,
    ) -> Result<LedgerEntry> {
        if reason.trim().is_empty() {
            return Err(LoyaltyError::Validation("人工调整必须填写原因".to_string()));
        }
        let entry = NewLedgerEntry::new(
            customer_id,
            amount,
            LedgerEntryType::ManualAdjustment,
            LedgerSource::Admin,
        )
        .with_description(format!("{} (操作人: {})", reason, operator));
        Ok(self.append(entry).await?.into_entry())
    }

    /// 导入迁移前的历史余额，按引用幂等
    pub async fn import_balance(
        &self,
        customer_id: i64,
        amount: Decimal,
        reference: &str,
    ) -> Result<AppendOutcome> {
        positive("import amount", amount)?;
        let entry = NewLedgerEntry::new(
            customer_id,
            amount,
            LedgerEntryType::InitialImport,
            LedgerSource::Migration,
        )
        .with_reference(reference)
        .with_description("历史余额导入");
        self.append(entry).await
    }

    // ==================== 对账 ====================

    /// 与外部余额对账
    ///
    /// 本地缓存余额与外部余额不一致时追加一条 EXTERNAL_SYNC_CORRECTION 流水补齐差额，
    /// 并打上 reconciled_at 标记供运营复核。读余额与追加修正在仓储的同一原子单元内。
    #[instrument(skip(self), fields(customer_id = customer_id, external_balance = %external_balance))]
    pub async fn reconcile(
        &self,
        customer_id: i64,
        external_balance: Decimal,
        triggered_by: &str,
    ) -> Result<ReconcileOutcome> {
        let customer = self.require_customer(customer_id).await?;

        let correction = NewLedgerEntry::new(
            customer_id,
            Decimal::ZERO,
            LedgerEntryType::ExternalSyncCorrection,
            LedgerSource::Reconciliation,
        )
        .with_description(format!("按外部余额 {} 修正，由 {} 触发", external_balance, triggered_by))
        .reconciled(Utc::now());

        let result = self
            .ledger
            .reconcile(customer_id, external_balance, &correction)
            .await?;
        let delta = result.delta();
        let Some(written) = result.entry else {
            info!(balance = %result.local_balance, "余额一致，无需修正");
            return Ok(ReconcileOutcome::InSync {
                balance: result.local_balance,
            });
        };

        metrics::record_ledger_entry(written.entry_type.as_str());
        metrics::record_ledger_correction(&customer.shop);
        warn!(
            shop = %customer.shop,
            customer_ref = %customer.external_customer_id,
            local_balance = %result.local_balance,
            delta = %delta,
            entry_id = written.id,
            "储值余额与外部不一致，已追加修正流水"
        );

        Ok(ReconcileOutcome::Corrected {
            delta,
            entry: written,
        })
    }

    // ==================== 查询 ====================

    /// 指定时间点的余额
    pub async fn balance_as_of(&self, customer_id: i64, at: DateTime<Utc>) -> Result<Decimal> {
        self.ledger.balance_as_of(customer_id, at).await
    }

    pub async fn list_entries(&self, customer_id: i64, limit: i64) -> Result<Vec<LedgerEntry>> {
        self.ledger.list_entries(customer_id, limit.clamp(1, 500)).await
    }

    /// 核对缓存余额与流水
    pub async fn audit(&self, customer_id: i64) -> Result<LedgerAudit> {
        let audit = self.ledger.audit(customer_id).await?;
        if !audit.is_consistent() {
            warn!(
                customer_id,
                cached_balance = %audit.cached_balance,
                entry_sum = %audit.entry_sum,
                latest_balance = %audit.latest_balance,
                "账本缓存与流水不一致"
            );
        }
        Ok(audit)
    }

    /// 按店铺和外部客户 ID 查找客户
    pub async fn resolve_customer(&self, shop: &str, customer_ref: &str) -> Result<Customer> {
        self.customers
            .find_customer(shop, customer_ref)
            .await?
            .ok_or_else(|| LoyaltyError::CustomerNotFound {
                shop: shop.to_string(),
                customer_ref: customer_ref.to_string(),
            })
    }

    async fn require_customer(&self, customer_id: i64) -> Result<Customer> {
        self.customers
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| LoyaltyError::CustomerNotFound {
                shop: String::new(),
                customer_ref: format!("#{}", customer_id),
            })
    }
}

fn positive(field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(LoyaltyError::Validation(format!("{} 必须大于 0: {}", field, value)));
    }
    Ok(())
}
