//! 客户与储值账本实体定义

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{LedgerEntryType, LedgerSource};

/// 客户
///
/// 以 (shop, external_customer_id) 唯一标识。store_credit 与 total_earned 为账本的冗余缓存，
/// 只能随流水写入一起更新。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub shop: String,
    /// 电商平台侧的客户 ID
    pub external_customer_id: String,
    /// 当前储值余额（等于最新一条流水的 balance）
    pub store_credit: Decimal,
    /// 累计返现（EARNED 与 INITIAL_IMPORT 流水之和）
    pub total_earned: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 储值流水
///
/// 不可变记录。同一客户的流水按 id 全序，第 N 条的 balance 等于第 N-1 条的 balance 加本条 amount。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub customer_id: i64,
    /// 带符号金额
    pub amount: Decimal,
    /// 写入后的余额
    pub balance: Decimal,
    pub entry_type: LedgerEntryType,
    pub source: LedgerSource,
    /// 关联的订单号或退款号
    #[sqlx(default)]
    pub external_reference: Option<String>,
    #[sqlx(default)]
    pub description: Option<String>,
    /// 对账修正流水的标记时间
    #[sqlx(default)]
    pub reconciled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 待写入的流水
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub customer_id: i64,
    pub amount: Decimal,
    pub entry_type: LedgerEntryType,
    pub source: LedgerSource,
    pub external_reference: Option<String>,
    pub description: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl NewLedgerEntry {
    pub fn new(
        customer_id: i64,
        amount: Decimal,
        entry_type: LedgerEntryType,
        source: LedgerSource,
    ) -> Self {
        Self {
            customer_id,
            amount,
            entry_type,
            source,
            external_reference: None,
            description: None,
            reconciled_at: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn reconciled(mut self, at: DateTime<Utc>) -> Self {
        self.reconciled_at = Some(at);
        self
    }

    /// 本条流水计入 total_earned 的增量
    pub fn earned_delta(&self) -> Decimal {
        if self.entry_type.counts_as_earned() {
            self.amount
        } else {
            Decimal::ZERO
        }
    }
}

/// 流水写入结果
///
/// 按外部引用去重的流水再次写入时返回已有记录
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Appended(LedgerEntry),
    Existing(LedgerEntry),
}

impl AppendOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Appended(e) | Self::Existing(e) => e,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            Self::Appended(e) | Self::Existing(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Appended(_))
    }
}

/// 对账修正结果
#[derive(Debug, Clone)]
pub struct BalanceCorrection {
    /// 对账时的本地缓存余额
    pub local_balance: Decimal,
    /// 余额一致时不写流水
    pub entry: Option<LedgerEntry>,
}

impl BalanceCorrection {
    pub fn delta(&self) -> Decimal {
        self.entry.as_ref().map_or(Decimal::ZERO, |e| e.amount)
    }
}

/// 账本一致性核对结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAudit {
    pub customer_id: i64,
    /// 客户行上的缓存余额
    pub cached_balance: Decimal,
    /// 全部流水金额之和
    pub entry_sum: Decimal,
    /// 最新一条流水的 balance
    pub latest_balance: Decimal,
    pub cached_total_earned: Decimal,
    pub earned_sum: Decimal,
    pub entry_count: i64,
}

impl LedgerAudit {
    /// 缓存与流水是否一致
    pub fn is_consistent(&self) -> bool {
        self.cached_balance == self.entry_sum
            && self.cached_balance == self.latest_balance
            && self.cached_total_earned == self.earned_sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_earned_delta_by_type() {
        let earned = NewLedgerEntry::new(1, dec!(2.50), LedgerEntryType::Earned, LedgerSource::OrderEvent);
        assert_eq!(earned.earned_delta(), dec!(2.50));

        let debit = NewLedgerEntry::new(
            1,
            dec!(-5),
            LedgerEntryType::OrderPaymentDebit,
            LedgerSource::OrderEvent,
        );
        assert_eq!(debit.earned_delta(), Decimal::ZERO);
    }

    #[test]
    fn test_audit_consistency() {
        let audit = LedgerAudit {
            customer_id: 1,
            cached_balance: dec!(10),
            entry_sum: dec!(10),
            latest_balance: dec!(10),
            cached_total_earned: dec!(12),
            earned_sum: dec!(12),
            entry_count: 3,
        };
        assert!(audit.is_consistent());

        let drifted = LedgerAudit {
            cached_balance: dec!(11),
            ..audit
        };
        assert!(!drifted.is_consistent());
    }
}
