//! 服务层 DTO 定义
//!
//! 服务方法的请求参数与返回结构，与 HTTP 层的请求体解耦

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{
    AssignmentType, CashbackTransaction, CustomerMembership, LedgerEntry, LedgerSource, RecordOutcome,
    TierChangeLog,
};

/// 返现记录请求
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRequest {
    pub shop: String,
    pub order_id: String,
    pub customer_ref: String,
    pub order_amount: Decimal,
    pub eligible_amount: Decimal,
    /// 为空时使用客户当前等级的返现比例
    pub rate_percent: Option<Decimal>,
    pub currency: String,
    pub ordered_at: DateTime<Utc>,
    pub source: LedgerSource,
}

/// 订单被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// 游客订单，无可归属客户
    NoCustomer,
    /// 缺少支付净额
    NotYetEligible,
    /// 财务状态不可计返现
    NotPaid,
}

/// 订单入账结果
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Recorded {
        outcome: RecordOutcome,
        /// 储值抵扣流水
        debit: Option<LedgerEntry>,
    },
    Skipped(SkipReason),
}

impl IngestOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// 等级删除策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletePolicy {
    /// 有活跃会员时拒绝
    #[default]
    Reject,
    /// 先把会员迁移到剩余等级再删除
    MigrateMembers,
}

/// 对账结果
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    InSync { balance: Decimal },
    Corrected { delta: Decimal, entry: LedgerEntry },
}

/// 手工指定等级
#[derive(Debug, Clone, PartialEq)]
pub struct ManualAssignment {
    pub customer_id: i64,
    pub tier_id: i64,
    pub assignment_type: AssignmentType,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub operator: String,
}

/// 客户视图（店面查询用）
///
/// 金额在这里保留两位小数，账务运算不经过这里
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerProjection {
    pub shop: String,
    pub customer_ref: String,
    pub tier_id: Option<i64>,
    pub tier_name: Option<String>,
    pub tier_level: Option<i32>,
    pub cashback_percent: Option<Decimal>,
    pub assignment_type: Option<AssignmentType>,
    pub tier_expires_at: Option<DateTime<Utc>>,
    pub store_credit: Decimal,
    pub total_earned: Decimal,
}

/// 客户历史
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerHistory {
    pub ledger: Vec<LedgerEntry>,
    /// 全部会员期，含已关闭的
    pub memberships: Vec<CustomerMembership>,
    pub tier_changes: Vec<TierChangeLog>,
    pub transactions: Vec<CashbackTransaction>,
}
