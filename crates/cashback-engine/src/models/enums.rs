//! 返现引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，数据库中以 varchar 存储

use serde::{Deserialize, Serialize};

/// 账本流水类型
///
/// 每一次储值变动都必须落到其中一种类型上，纠错也只能以新流水的形式出现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    /// 订单返现（+）
    Earned,
    /// 订单使用储值抵扣（-）
    OrderPaymentDebit,
    /// 退款返还储值（+）
    RefundCredit,
    /// 运营手工调整（±）
    ManualAdjustment,
    /// 与外部余额对账产生的修正（±）
    ExternalSyncCorrection,
    /// 历史余额导入（+）
    InitialImport,
}

impl LedgerEntryType {
    /// 是否计入累计返现（total_earned）
    pub fn counts_as_earned(&self) -> bool {
        matches!(self, Self::Earned | Self::InitialImport)
    }

    /// 同一客户下按外部引用去重的流水类型
    pub fn is_reference_unique(&self) -> bool {
        matches!(
            self,
            Self::Earned | Self::OrderPaymentDebit | Self::RefundCredit | Self::InitialImport
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earned => "EARNED",
            Self::OrderPaymentDebit => "ORDER_PAYMENT_DEBIT",
            Self::RefundCredit => "REFUND_CREDIT",
            Self::ManualAdjustment => "MANUAL_ADJUSTMENT",
            Self::ExternalSyncCorrection => "EXTERNAL_SYNC_CORRECTION",
            Self::InitialImport => "INITIAL_IMPORT",
        }
    }
}

/// 流水来源
///
/// 标识写入流水的子系统，用于追溯和审计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerSource {
    /// 实时订单事件
    #[default]
    OrderEvent,
    /// 历史订单迁移
    Migration,
    /// 运营后台
    Admin,
    /// 对账任务
    Reconciliation,
    /// 退款事件
    Refund,
}

/// 等级评估周期
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationPeriod {
    /// 滚动 365 天
    #[default]
    RollingAnnual,
    /// 终身累计
    Lifetime,
}

impl EvaluationPeriod {
    /// 统计窗口起点，None 表示不设下限
    pub fn window_start(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            Self::RollingAnnual => Some(now - chrono::Duration::days(365)),
            Self::Lifetime => None,
        }
    }
}

/// 会员等级分配方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentType {
    /// 按消费自动评估
    #[default]
    Automatic,
    /// 运营手工指定
    Manual,
    /// 营销活动赠送
    Promotional,
    /// 历史数据导入
    Imported,
}

impl AssignmentType {
    /// 是否参与自动升降级
    ///
    /// 手工和活动指定的等级在到期或显式重评估前保持不变
    pub fn is_auto_revisable(&self) -> bool {
        matches!(self, Self::Automatic | Self::Imported)
    }
}

/// 等级变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierChangeType {
    InitialAssignment,
    AutoUpgrade,
    AutoDowngrade,
    ManualOverride,
    ExpirationRevert,
    TierDeletedMigration,
}

impl TierChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialAssignment => "INITIAL_ASSIGNMENT",
            Self::AutoUpgrade => "AUTO_UPGRADE",
            Self::AutoDowngrade => "AUTO_DOWNGRADE",
            Self::ManualOverride => "MANUAL_OVERRIDE",
            Self::ExpirationRevert => "EXPIRATION_REVERT",
            Self::TierDeletedMigration => "TIER_DELETED_MIGRATION",
        }
    }
}

/// 返现交易状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// 已入账（本地账本）
    #[default]
    Completed,
    /// 已同步到外部储值系统
    SyncedToExternal,
    /// 外部同步失败，等待对账
    SyncFailed,
}

/// 迁移任务状态
///
/// pending -> processing -> (completed | failed | cancelled)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationStatus {
    pub const ALL: [MigrationStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// 允许迁移到 target 的全部来源状态
    pub fn sources_of(target: MigrationStatus) -> Vec<MigrationStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(target))
            .collect()
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// 状态机是否允许从当前状态迁移到目标状态
    pub fn can_transition_to(&self, target: MigrationStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_entry_type_earned_flags() {
        assert!(LedgerEntryType::Earned.counts_as_earned());
        assert!(LedgerEntryType::InitialImport.counts_as_earned());
        assert!(!LedgerEntryType::RefundCredit.counts_as_earned());
        assert!(!LedgerEntryType::ManualAdjustment.is_reference_unique());
        assert!(LedgerEntryType::OrderPaymentDebit.is_reference_unique());
    }

    #[test]
    fn test_entry_type_serialization() {
        let json = serde_json::to_string(&LedgerEntryType::ExternalSyncCorrection).unwrap();
        assert_eq!(json, "\"EXTERNAL_SYNC_CORRECTION\"");
        assert_eq!(LedgerEntryType::ExternalSyncCorrection.as_str(), "EXTERNAL_SYNC_CORRECTION");
    }

    #[test]
    fn test_evaluation_window() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            EvaluationPeriod::RollingAnnual.window_start(now),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(EvaluationPeriod::Lifetime.window_start(now), None);
    }

    #[test]
    fn test_assignment_auto_revisable() {
        assert!(AssignmentType::Automatic.is_auto_revisable());
        assert!(AssignmentType::Imported.is_auto_revisable());
        assert!(!AssignmentType::Manual.is_auto_revisable());
        assert!(!AssignmentType::Promotional.is_auto_revisable());
    }

    #[test]
    fn test_migration_state_machine() {
        use MigrationStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Failed.is_terminal());
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn test_migration_transition_sources() {
        use MigrationStatus::*;
        assert_eq!(MigrationStatus::sources_of(Processing), vec![Pending]);
        assert_eq!(MigrationStatus::sources_of(Completed), vec![Processing]);
        assert_eq!(MigrationStatus::sources_of(Cancelled), vec![Pending, Processing]);
        assert!(MigrationStatus::sources_of(Pending).is_empty());
    }
}
