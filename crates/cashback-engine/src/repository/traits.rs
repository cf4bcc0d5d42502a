//! 仓储 Trait 定义
//!
//! 服务层只依赖这些接口。跨表的原子单元（交易 + 流水 + 缓存余额、会员关闭 + 新开 + 日志、
//! 等级删除 + 压缩）都是单个仓储调用，由各实现自行保证原子性。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AppendOutcome, BalanceCorrection, CashbackTransaction, Customer, CustomerMembership,
    LedgerAudit, LedgerEntry,
    MigrationJob, MigrationStatus, NewCashbackTransaction, NewLedgerEntry, NewTier,
    ProgressDelta, RecordOutcome, Tier, TierChangeLog, TierTransition, TierUpdate,
    TransactionStatus, TransitionOutcome,
};

/// 客户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CustomerRepositoryTrait: Send + Sync {
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>>;
    async fn find_customer(&self, shop: &str, external_customer_id: &str)
    -> Result<Option<Customer>>;
    /// 返回 (客户, 是否新建)
    async fn get_or_create_customer(
        &self,
        shop: &str,
        external_customer_id: &str,
    ) -> Result<(Customer, bool)>;
}

/// 储值账本仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRepositoryTrait: Send + Sync {
    /// 追加流水，并在同一原子单元内更新客户缓存余额
    ///
    /// 同一客户的追加必须串行，余额基于最新一条流水计算
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome>;
    /// 与外部余额对账
    ///
    /// 读取缓存余额、比较、追加修正流水在同一原子单元内完成；
    /// `correction` 的金额由实现按差额填入，差额为 0 时不写入
    async fn reconcile(
        &self,
        customer_id: i64,
        external_balance: Decimal,
        correction: &NewLedgerEntry,
    ) -> Result<BalanceCorrection>;
    /// 按时间倒序列出最近的流水
    async fn list_entries(&self, customer_id: i64, limit: i64) -> Result<Vec<LedgerEntry>>;
    /// 指定时间点（含）之前最新一条流水的余额，没有流水时为 0
    async fn balance_as_of(&self, customer_id: i64, at: DateTime<Utc>) -> Result<Decimal>;
    async fn audit(&self, customer_id: i64) -> Result<LedgerAudit>;
}

/// 等级目录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TierRepositoryTrait: Send + Sync {
    async fn get_tier(&self, id: i64) -> Result<Option<Tier>>;
    /// 按 level 升序
    async fn list_tiers(&self, shop: &str) -> Result<Vec<Tier>>;
    /// 新等级的 level 为当前最大值 + 1
    async fn create_tier(&self, tier: &NewTier) -> Result<Tier>;
    async fn update_tier(&self, id: i64, update: &TierUpdate) -> Result<Tier>;
    /// 按给定顺序重排为 1..n，ids 必须恰好覆盖店铺全部等级
    async fn reorder_tiers(&self, shop: &str, ordered_ids: &[i64]) -> Result<Vec<Tier>>;
    /// 删除无活跃会员的等级，并把更高等级的 level 依次减一，返回剩余等级
    async fn delete_tier(&self, id: i64) -> Result<Vec<Tier>>;
    async fn count_active_members(&self, tier_id: i64) -> Result<i64>;
}

/// 会员等级仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipRepositoryTrait: Send + Sync {
    async fn get_active_membership(&self, customer_id: i64) -> Result<Option<CustomerMembership>>;
    /// 原子地关闭当前记录、新开记录并写变更日志
    async fn transition(&self, transition: &TierTransition) -> Result<TransitionOutcome>;
    async fn list_memberships(&self, customer_id: i64) -> Result<Vec<CustomerMembership>>;
    async fn list_change_logs(&self, customer_id: i64) -> Result<Vec<TierChangeLog>>;
    async fn list_active_members_of_tier(&self, tier_id: i64) -> Result<Vec<CustomerMembership>>;
    /// 已到期的手工/活动等级
    async fn list_expired_overrides(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CustomerMembership>>;
}

/// 返现交易仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionRepositoryTrait: Send + Sync {
    async fn find_transaction(
        &self,
        shop: &str,
        order_id: &str,
    ) -> Result<Option<CashbackTransaction>>;
    /// 交易与 EARNED 流水作为一个原子单元写入，订单已存在时返回原记录
    async fn record_with_ledger(&self, transaction: &NewCashbackTransaction) -> Result<RecordOutcome>;
    /// 窗口内（ordered_at >= since）的订单金额之和，since 为空表示终身
    async fn sum_spend(&self, customer_id: i64, since: Option<DateTime<Utc>>) -> Result<Decimal>;
    async fn mark_sync_result(
        &self,
        id: i64,
        status: TransactionStatus,
        sync_error: Option<String>,
    ) -> Result<()>;
    async fn list_by_customer(&self, customer_id: i64, limit: i64)
    -> Result<Vec<CashbackTransaction>>;
    async fn list_sync_failed(&self, limit: i64) -> Result<Vec<CashbackTransaction>>;
}

/// 迁移任务仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MigrationJobRepositoryTrait: Send + Sync {
    async fn create_job(&self, job: &MigrationJob) -> Result<()>;
    async fn get_job(&self, id: Uuid) -> Result<Option<MigrationJob>>;
    async fn list_jobs(&self, shop: &str, limit: i64) -> Result<Vec<MigrationJob>>;
    /// 仅当当前状态属于 from 时迁移，返回是否迁移成功
    async fn transition_status(
        &self,
        id: Uuid,
        from: &[MigrationStatus],
        to: MigrationStatus,
        error_message: Option<String>,
    ) -> Result<bool>;
    /// 原子地累加计数并追加错误样本（不超过 max_errors 条）
    async fn record_progress(&self, id: Uuid, delta: &ProgressDelta, max_errors: usize)
    -> Result<()>;
}
