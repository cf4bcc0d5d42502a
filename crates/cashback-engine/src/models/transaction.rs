//! 返现交易实体定义

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::customer::LedgerEntry;
use super::enums::{LedgerSource, TransactionStatus};

/// 返现交易
///
/// 每个外部订单一条，(shop, order_id) 唯一，也是订单重放的幂等键
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CashbackTransaction {
    pub id: i64,
    pub shop: String,
    pub order_id: String,
    pub customer_id: i64,
    pub order_amount: Decimal,
    /// 可计返现金额（现金支付部分）
    pub eligible_amount: Decimal,
    pub cashback_amount: Decimal,
    /// 计算时生效的返现比例
    pub cashback_percent: Decimal,
    pub currency: String,
    /// 计算时客户所在等级
    #[sqlx(default)]
    pub tier_id: Option<i64>,
    pub status: TransactionStatus,
    #[sqlx(default)]
    pub sync_error: Option<String>,
    /// 订单创建时间（用于消费窗口统计）
    pub ordered_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待写入的返现交易
#[derive(Debug, Clone, PartialEq)]
pub struct NewCashbackTransaction {
    pub shop: String,
    pub order_id: String,
    pub customer_id: i64,
    pub order_amount: Decimal,
    pub eligible_amount: Decimal,
    pub cashback_amount: Decimal,
    pub cashback_percent: Decimal,
    pub currency: String,
    pub tier_id: Option<i64>,
    pub ordered_at: DateTime<Utc>,
    pub source: LedgerSource,
}

/// 交易与流水的原子写入结果
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// 新写入，附带 EARNED 流水（返现为 0 时没有流水）
    Created {
        transaction: CashbackTransaction,
        entry: Option<LedgerEntry>,
    },
    /// 订单已处理过，返回原记录
    Existing(CashbackTransaction),
}

impl RecordOutcome {
    pub fn transaction(&self) -> &CashbackTransaction {
        match self {
            Self::Created { transaction, .. } | Self::Existing(transaction) => transaction,
        }
    }

    pub fn into_transaction(self) -> CashbackTransaction {
        match self {
            Self::Created { transaction, .. } | Self::Existing(transaction) => transaction,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Existing(_) => "existing",
        }
    }
}

/// 按比例计算返现
///
/// 账务运算不做舍入，展示层再保留两位小数
pub fn compute_cashback(eligible_amount: Decimal, percent: Decimal) -> Decimal {
    eligible_amount * percent / Decimal::ONE_HUNDRED
}
