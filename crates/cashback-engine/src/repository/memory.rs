//! 内存仓储
//!
//! 用于测试和本地运行。全部状态放在一把互斥锁下，每个仓储调用在锁内一次完成，
//! 天然满足原子单元和同一客户串行的要求。锁不跨越 await。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

use super::traits::{
    CustomerRepositoryTrait, LedgerRepositoryTrait, MembershipRepositoryTrait,
    MigrationJobRepositoryTrait, TierRepositoryTrait, TransactionRepositoryTrait,
};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    AppendOutcome, BalanceCorrection, CashbackTransaction, Customer, CustomerMembership,
    LedgerAudit, LedgerEntry,
    LedgerEntryType, MigrationJob, MigrationStatus, NewCashbackTransaction, NewLedgerEntry,
    NewTier, ProgressDelta, RecordOutcome, Tier, TierChangeLog, TierTransition, TierUpdate,
    TransactionStatus, TransitionOutcome,
};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    customers: BTreeMap<i64, Customer>,
    ledger: Vec<LedgerEntry>,
    tiers: BTreeMap<i64, Tier>,
    memberships: Vec<CustomerMembership>,
    change_logs: Vec<TierChangeLog>,
    transactions: Vec<CashbackTransaction>,
    jobs: HashMap<Uuid, MigrationJob>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn append(&mut self, entry: &NewLedgerEntry) -> Result<AppendOutcome> {
        if !self.customers.contains_key(&entry.customer_id) {
            return Err(LoyaltyError::CustomerNotFound {
                shop: String::new(),
                customer_ref: entry.customer_id.to_string(),
            });
        }

        if entry.entry_type.is_reference_unique()
            && let Some(reference) = &entry.external_reference
            && let Some(existing) = self.ledger.iter().find(|e| {
                e.customer_id == entry.customer_id
                    && e.entry_type == entry.entry_type
                    && e.external_reference.as_ref() == Some(reference)
            })
        {
            return Ok(AppendOutcome::Existing(existing.clone()));
        }

        let previous = self
            .ledger
            .iter()
            .rev()
            .find(|e| e.customer_id == entry.customer_id)
            .map_or(Decimal::ZERO, |e| e.balance);
        let balance = previous + entry.amount;
        let now = Utc::now();

        let created = LedgerEntry {
            id: self.next_id(),
            customer_id: entry.customer_id,
            amount: entry.amount,
            balance,
            entry_type: entry.entry_type,
            source: entry.source,
            external_reference: entry.external_reference.clone(),
            description: entry.description.clone(),
            reconciled_at: entry.reconciled_at,
            created_at: now,
        };
        self.ledger.push(created.clone());

        if let Some(customer) = self.customers.get_mut(&entry.customer_id) {
            customer.store_credit = balance;
            customer.total_earned += entry.earned_delta();
            customer.updated_at = now;
        }

        Ok(AppendOutcome::Appended(created))
    }

    fn shop_tiers(&self, shop: &str) -> Vec<Tier> {
        let mut tiers: Vec<Tier> = self.tiers.values().filter(|t| t.shop == shop).cloned().collect();
        tiers.sort_by_key(|t| t.level);
        tiers
    }

    fn active_member_count(&self, tier_id: i64) -> i64 {
        self.memberships
            .iter()
            .filter(|m| m.is_active && m.tier_id == tier_id)
            .count() as i64
    }

    fn check_tier_uniqueness(&self, shop: &str, id: Option<i64>, name: &str, floor: bool) -> Result<()> {
        let others = self
            .tiers
            .values()
            .filter(|t| t.shop == shop && Some(t.id) != id);
        for tier in others {
            if tier.name == name {
                return Err(LoyaltyError::DuplicateTierName(name.to_string()));
            }
            if floor && tier.min_spend.is_floor() {
                return Err(LoyaltyError::DuplicateFloorTier(shop.to_string()));
            }
        }
        Ok(())
    }
}

/// 内存仓储，实现全部仓储接口
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部流水（测试断言用）
    pub fn ledger_snapshot(&self) -> Vec<LedgerEntry> {
        self.state.lock().ledger.clone()
    }

    /// 全部会员记录（测试断言用）
    pub fn membership_snapshot(&self) -> Vec<CustomerMembership> {
        self.state.lock().memberships.clone()
    }

    /// 全部交易（测试断言用）
    pub fn transaction_snapshot(&self) -> Vec<CashbackTransaction> {
        self.state.lock().transactions.clone()
    }

    /// 调整交易的下单时间（测试滚动窗口用）
    pub fn set_ordered_at(&self, shop: &str, order_id: &str, ordered_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if let Some(t) = state
            .transactions
            .iter_mut()
            .find(|t| t.shop == shop && t.order_id == order_id)
        {
            t.ordered_at = ordered_at;
        }
    }

    /// 改写活跃会员记录的到期时间（测试到期回退用）
    pub fn set_membership_expiry(&self, customer_id: i64, expires_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if let Some(m) = state
            .memberships
            .iter_mut()
            .find(|m| m.customer_id == customer_id && m.is_active)
        {
            m.expires_at = Some(expires_at);
        }
    }

    /// 绕过账本直接改写缓存余额（测试对账用）
    pub fn overwrite_cached_balance(&self, customer_id: i64, store_credit: Decimal) {
        if let Some(c) = self.state.lock().customers.get_mut(&customer_id) {
            c.store_credit = store_credit;
        }
    }
}

#[async_trait]
impl CustomerRepositoryTrait for MemoryStore {
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>> {
        Ok(self.state.lock().customers.get(&id).cloned())
    }

    async fn find_customer(
        &self,
        shop: &str,
        external_customer_id: &str,
    ) -> Result<Option<Customer>> {
        Ok(self
            .state
            .lock()
            .customers
            .values()
            .find(|c| c.shop == shop && c.external_customer_id == external_customer_id)
            .cloned())
    }

    async fn get_or_create_customer(
        &self,
        shop: &str,
        external_customer_id: &str,
    ) -> Result<(Customer, bool)> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .customers
            .values()
            .find(|c| c.shop == shop && c.external_customer_id == external_customer_id)
        {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let customer = Customer {
            id: state.next_id(),
            shop: shop.to_string(),
            external_customer_id: external_customer_id.to_string(),
            store_credit: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        state.customers.insert(customer.id, customer.clone());
        Ok((customer, true))
    }
}

#[async_trait]
impl LedgerRepositoryTrait for MemoryStore {
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome> {
        self.state.lock().append(entry)
    }

    async fn reconcile(
        &self,
        customer_id: i64,
        external_balance: Decimal,
        correction: &NewLedgerEntry,
    ) -> Result<BalanceCorrection> {
        let mut state = self.state.lock();
        let local_balance = state
            .customers
            .get(&customer_id)
            .map(|c| c.store_credit)
            .ok_or_else(|| LoyaltyError::CustomerNotFound {
                shop: String::new(),
                customer_ref: customer_id.to_string(),
            })?;

        let delta = external_balance - local_balance;
        if delta.is_zero() {
            return Ok(BalanceCorrection {
                local_balance,
                entry: None,
            });
        }

        let entry = NewLedgerEntry {
            customer_id,
            amount: delta,
            ..correction.clone()
        };
        let written = state.append(&entry)?.into_entry();
        Ok(BalanceCorrection {
            local_balance,
            entry: Some(written),
        })
    }

    async fn list_entries(&self, customer_id: i64, limit: i64) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .state
            .lock()
            .ledger
            .iter()
            .rev()
            .filter(|e| e.customer_id == customer_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn balance_as_of(&self, customer_id: i64, at: DateTime<Utc>) -> Result<Decimal> {
        Ok(self
            .state
            .lock()
            .ledger
            .iter()
            .rev()
            .find(|e| e.customer_id == customer_id && e.created_at <= at)
            .map_or(Decimal::ZERO, |e| e.balance))
    }

    async fn audit(&self, customer_id: i64) -> Result<LedgerAudit> {
        let state = self.state.lock();
        let customer = state
            .customers
            .get(&customer_id)
            .ok_or_else(|| LoyaltyError::CustomerNotFound {
                shop: String::new(),
                customer_ref: customer_id.to_string(),
            })?;

        let entries: Vec<&LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.customer_id == customer_id)
            .collect();

        Ok(LedgerAudit {
            customer_id,
            cached_balance: customer.store_credit,
            entry_sum: entries.iter().map(|e| e.amount).sum(),
            latest_balance: entries.last().map_or(Decimal::ZERO, |e| e.balance),
            cached_total_earned: customer.total_earned,
            earned_sum: entries
                .iter()
                .filter(|e| e.entry_type.counts_as_earned())
                .map(|e| e.amount)
                .sum(),
            entry_count: entries.len() as i64,
        })
    }
}

#[async_trait]
impl TierRepositoryTrait for MemoryStore {
    async fn get_tier(&self, id: i64) -> Result<Option<Tier>> {
        Ok(self.state.lock().tiers.get(&id).cloned())
    }

    async fn list_tiers(&self, shop: &str) -> Result<Vec<Tier>> {
        Ok(self.state.lock().shop_tiers(shop))
    }

    async fn create_tier(&self, new: &NewTier) -> Result<Tier> {
        let mut state = self.state.lock();
        state.check_tier_uniqueness(&new.shop, None, &new.name, new.min_spend.is_floor())?;

        let level = state
            .tiers
            .values()
            .filter(|t| t.shop == new.shop)
            .map(|t| t.level)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let tier = Tier {
            id: state.next_id(),
            shop: new.shop.clone(),
            name: new.name.clone(),
            level,
            min_spend: new.min_spend,
            cashback_percent: new.cashback_percent,
            evaluation_period: new.evaluation_period,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
        };
        state.tiers.insert(tier.id, tier.clone());
        Ok(tier)
    }

    async fn update_tier(&self, id: i64, update: &TierUpdate) -> Result<Tier> {
        let mut state = self.state.lock();
        let mut tier = state.tiers.get(&id).cloned().ok_or(LoyaltyError::TierNotFound(id))?;
        update.apply_to(&mut tier);
        state.check_tier_uniqueness(&tier.shop, Some(id), &tier.name, tier.min_spend.is_floor())?;
        tier.updated_at = Utc::now();
        state.tiers.insert(id, tier.clone());
        Ok(tier)
    }

    async fn reorder_tiers(&self, shop: &str, ordered_ids: &[i64]) -> Result<Vec<Tier>> {
        let mut state = self.state.lock();
        let mut expected: Vec<i64> = state.shop_tiers(shop).iter().map(|t| t.id).collect();
        let mut requested = ordered_ids.to_vec();
        expected.sort_unstable();
        requested.sort_unstable();
        if expected != requested {
            return Err(LoyaltyError::InvalidTierOrder(
                "重排列表必须恰好包含店铺的全部等级".to_string(),
            ));
        }

        let now = Utc::now();
        for (index, id) in ordered_ids.iter().enumerate() {
            if let Some(tier) = state.tiers.get_mut(id) {
                tier.level = index as i32 + 1;
                tier.updated_at = now;
            }
        }
        Ok(state.shop_tiers(shop))
    }

    async fn delete_tier(&self, id: i64) -> Result<Vec<Tier>> {
        let mut state = self.state.lock();
        let tier = state.tiers.get(&id).cloned().ok_or(LoyaltyError::TierNotFound(id))?;

        let members = state.active_member_count(id);
        if members > 0 {
            return Err(LoyaltyError::TierHasActiveMembers { tier_id: id, members });
        }

        state.tiers.remove(&id);
        let now = Utc::now();
        for other in state.tiers.values_mut() {
            if other.shop == tier.shop && other.level > tier.level {
                other.level -= 1;
                other.updated_at = now;
            }
        }
        Ok(state.shop_tiers(&tier.shop))
    }

    async fn count_active_members(&self, tier_id: i64) -> Result<i64> {
        Ok(self.state.lock().active_member_count(tier_id))
    }
}

#[async_trait]
impl MembershipRepositoryTrait for MemoryStore {
    async fn get_active_membership(&self, customer_id: i64) -> Result<Option<CustomerMembership>> {
        Ok(self
            .state
            .lock()
            .memberships
            .iter()
            .find(|m| m.customer_id == customer_id && m.is_active)
            .cloned())
    }

    async fn transition(&self, transition: &TierTransition) -> Result<TransitionOutcome> {
        let mut state = self.state.lock();

        if !state.tiers.contains_key(&transition.to_tier_id) {
            return Err(LoyaltyError::TierNotFound(transition.to_tier_id));
        }

        let current_index = state
            .memberships
            .iter()
            .position(|m| m.customer_id == transition.customer_id && m.is_active);
        let current_id = current_index.map(|i| state.memberships[i].id);
        if current_id != transition.expected_current {
            return Err(LoyaltyError::ConcurrencyConflict);
        }

        let now = Utc::now();
        let from_tier_id = match current_index {
            Some(i) => {
                let current = &mut state.memberships[i];
                current.is_active = false;
                current.end_date = Some(now);
                Some(current.tier_id)
            }
            None => None,
        };

        let membership = CustomerMembership {
            id: state.next_id(),
            customer_id: transition.customer_id,
            tier_id: transition.to_tier_id,
            start_date: now,
            end_date: None,
            is_active: true,
            assignment_type: transition.assignment_type,
            previous_tier_id: from_tier_id,
            expires_at: transition.expires_at,
        };
        state.memberships.push(membership.clone());

        let log = TierChangeLog {
            id: state.next_id(),
            customer_id: transition.customer_id,
            from_tier_id,
            to_tier_id: transition.to_tier_id,
            change_type: transition.change_type,
            reason: transition.reason.clone(),
            triggered_by: transition.triggered_by.clone(),
            metadata: Json(transition.metadata.clone()),
            created_at: now,
        };
        state.change_logs.push(log.clone());

        Ok(TransitionOutcome { membership, log })
    }

    async fn list_memberships(&self, customer_id: i64) -> Result<Vec<CustomerMembership>> {
        Ok(self
            .state
            .lock()
            .memberships
            .iter()
            .filter(|m| m.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn list_change_logs(&self, customer_id: i64) -> Result<Vec<TierChangeLog>> {
        Ok(self
            .state
            .lock()
            .change_logs
            .iter()
            .filter(|l| l.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn list_active_members_of_tier(&self, tier_id: i64) -> Result<Vec<CustomerMembership>> {
        Ok(self
            .state
            .lock()
            .memberships
            .iter()
            .filter(|m| m.tier_id == tier_id && m.is_active)
            .cloned()
            .collect())
    }

    async fn list_expired_overrides(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CustomerMembership>> {
        let state = self.state.lock();
        let mut expired: Vec<CustomerMembership> = state
            .memberships
            .iter()
            .filter(|m| m.is_active && m.is_override_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|m| m.expires_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }
}

#[async_trait]
impl TransactionRepositoryTrait for MemoryStore {
    async fn find_transaction(
        &self,
        shop: &str,
        order_id: &str,
    ) -> Result<Option<CashbackTransaction>> {
        Ok(self
            .state
            .lock()
            .transactions
            .iter()
            .find(|t| t.shop == shop && t.order_id == order_id)
            .cloned())
    }

    async fn record_with_ledger(&self, new: &NewCashbackTransaction) -> Result<RecordOutcome> {
        let mut state = self.state.lock();

        if let Some(existing) = state
            .transactions
            .iter()
            .find(|t| t.shop == new.shop && t.order_id == new.order_id)
        {
            return Ok(RecordOutcome::Existing(existing.clone()));
        }

        // 先写流水：失败时交易也不落地
        let entry = if new.cashback_amount > Decimal::ZERO {
            let entry = NewLedgerEntry::new(
                new.customer_id,
                new.cashback_amount,
                LedgerEntryType::Earned,
                new.source,
            )
            .with_reference(new.order_id.clone());
            Some(state.append(&entry)?.into_entry())
        } else {
            None
        };

        let now = Utc::now();
        let transaction = CashbackTransaction {
            id: state.next_id(),
            shop: new.shop.clone(),
            order_id: new.order_id.clone(),
            customer_id: new.customer_id,
            order_amount: new.order_amount,
            eligible_amount: new.eligible_amount,
            cashback_amount: new.cashback_amount,
            cashback_percent: new.cashback_percent,
            currency: new.currency.clone(),
            tier_id: new.tier_id,
            status: TransactionStatus::Completed,
            sync_error: None,
            ordered_at: new.ordered_at,
            created_at: now,
            updated_at: now,
        };
        state.transactions.push(transaction.clone());

        Ok(RecordOutcome::Created { transaction, entry })
    }

    async fn sum_spend(&self, customer_id: i64, since: Option<DateTime<Utc>>) -> Result<Decimal> {
        Ok(self
            .state
            .lock()
            .transactions
            .iter()
            .filter(|t| t.customer_id == customer_id && since.is_none_or(|s| t.ordered_at >= s))
            .map(|t| t.order_amount)
            .sum())
    }

    async fn mark_sync_result(
        &self,
        id: i64,
        status: TransactionStatus,
        sync_error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(t) = state.transactions.iter_mut().find(|t| t.id == id) {
            t.status = status;
            t.sync_error = sync_error;
            t.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_by_customer(
        &self,
        customer_id: i64,
        limit: i64,
    ) -> Result<Vec<CashbackTransaction>> {
        let mut transactions: Vec<CashbackTransaction> = self
            .state
            .lock()
            .transactions
            .iter()
            .filter(|t| t.customer_id == customer_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.ordered_at.cmp(&a.ordered_at).then(b.id.cmp(&a.id)));
        transactions.truncate(limit.max(0) as usize);
        Ok(transactions)
    }

    async fn list_sync_failed(&self, limit: i64) -> Result<Vec<CashbackTransaction>> {
        Ok(self
            .state
            .lock()
            .transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::SyncFailed)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MigrationJobRepositoryTrait for MemoryStore {
    async fn create_job(&self, job: &MigrationJob) -> Result<()> {
        self.state.lock().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<MigrationJob>> {
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, shop: &str, limit: i64) -> Result<Vec<MigrationJob>> {
        let mut jobs: Vec<MigrationJob> = self
            .state
            .lock()
            .jobs
            .values()
            .filter(|j| j.shop == shop)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[MigrationStatus],
        to: MigrationStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !from.contains(&job.status) {
            return Ok(false);
        }

        let now = Utc::now();
        job.status = to;
        if error_message.is_some() {
            job.error_message = error_message;
        }
        if to == MigrationStatus::Processing {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }
        job.updated_at = now;
        Ok(true)
    }

    async fn record_progress(
        &self,
        id: Uuid,
        delta: &ProgressDelta,
        max_errors: usize,
    ) -> Result<()> {
        if let Some(job) = self.state.lock().jobs.get_mut(&id) {
            job.apply_progress(delta, max_errors);
        }
        Ok(())
    }
}
