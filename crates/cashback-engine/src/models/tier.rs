//! 等级实体定义
//!
//! 等级按 level 升序排列，level 从 1 开始连续无空洞。
//! 基础等级用 [`MinSpend::Floor`] 显式表示，而不是依赖空值比较。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::EvaluationPeriod;

/// 等级门槛
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MinSpend {
    /// 基础等级，无门槛，任何消费都满足
    Floor,
    /// 消费达到该金额即满足
    AtLeast(Decimal),
}

impl MinSpend {
    /// 从数据库的可空列还原
    pub fn from_column(value: Option<Decimal>) -> Self {
        value.map_or(Self::Floor, Self::AtLeast)
    }

    /// 写回数据库的可空列
    pub fn to_column(&self) -> Option<Decimal> {
        match self {
            Self::Floor => None,
            Self::AtLeast(v) => Some(*v),
        }
    }

    pub fn is_floor(&self) -> bool {
        matches!(self, Self::Floor)
    }

    pub fn is_met_by(&self, spend: Decimal) -> bool {
        match self {
            Self::Floor => true,
            Self::AtLeast(v) => spend >= *v,
        }
    }

    /// 用于排序比较的门槛值，基础等级视为 0
    pub fn threshold(&self) -> Decimal {
        match self {
            Self::Floor => Decimal::ZERO,
            Self::AtLeast(v) => *v,
        }
    }
}

/// 返现等级
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub id: i64,
    pub shop: String,
    pub name: String,
    /// 排序键，1 为最低等级
    pub level: i32,
    pub min_spend: MinSpend,
    /// 返现比例（百分数，如 2.5 表示 2.5%）
    pub cashback_percent: Decimal,
    pub evaluation_period: EvaluationPeriod,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 等级表的数据库行
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TierRow {
    pub id: i64,
    pub shop: String,
    pub name: String,
    pub level: i32,
    pub min_spend: Option<Decimal>,
    pub cashback_percent: Decimal,
    pub evaluation_period: EvaluationPeriod,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TierRow> for Tier {
    fn from(row: TierRow) -> Self {
        Self {
            id: row.id,
            shop: row.shop,
            name: row.name,
            level: row.level,
            min_spend: MinSpend::from_column(row.min_spend),
            cashback_percent: row.cashback_percent,
            evaluation_period: row.evaluation_period,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 新建等级参数（level 由仓储分配）
#[derive(Debug, Clone, PartialEq)]
pub struct NewTier {
    pub shop: String,
    pub name: String,
    pub min_spend: MinSpend,
    pub cashback_percent: Decimal,
    pub evaluation_period: EvaluationPeriod,
    pub is_active: bool,
}

/// 等级更新参数，None 表示不修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierUpdate {
    pub name: Option<String>,
    pub min_spend: Option<MinSpend>,
    pub cashback_percent: Option<Decimal>,
    pub evaluation_period: Option<EvaluationPeriod>,
    pub is_active: Option<bool>,
}

impl TierUpdate {
    pub fn apply_to(&self, tier: &mut Tier) {
        if let Some(name) = &self.name {
            tier.name = name.clone();
        }
        if let Some(min_spend) = self.min_spend {
            tier.min_spend = min_spend;
        }
        if let Some(percent) = self.cashback_percent {
            tier.cashback_percent = percent;
        }
        if let Some(period) = self.evaluation_period {
            tier.evaluation_period = period;
        }
        if let Some(active) = self.is_active {
            tier.is_active = active;
        }
    }
}

// ==================== 等级匹配 ====================

/// 目录中的基础等级
///
/// 优先取 [`MinSpend::Floor`] 的启用等级；没有显式基础等级时，最低 level 的启用等级充当基础等级。
pub fn floor_tier(tiers: &[Tier]) -> Option<&Tier> {
    let active = || tiers.iter().filter(|t| t.is_active);
    active()
        .find(|t| t.min_spend.is_floor())
        .or_else(|| active().min_by_key(|t| t.level))
}

/// 按消费金额匹配等级
///
/// 在满足门槛的启用等级中取 level 最高者；都不满足时回落到基础等级。
pub fn resolve_for_spend(tiers: &[Tier], spend: Decimal) -> Option<&Tier> {
    tiers
        .iter()
        .filter(|t| t.is_active && t.min_spend.is_met_by(spend))
        .max_by_key(|t| t.level)
        .or_else(|| floor_tier(tiers))
}

/// 检查 level 是否从 1 开始连续
pub fn levels_are_contiguous(tiers: &[Tier]) -> bool {
    let mut levels: Vec<i32> = tiers.iter().map(|t| t.level).collect();
    levels.sort_unstable();
    levels.iter().enumerate().all(|(i, l)| *l == i as i32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tier(id: i64, level: i32, min_spend: MinSpend, percent: Decimal) -> Tier {
        Tier {
            id,
            shop: "demo.myshopify.com".to_string(),
            name: format!("T{}", level),
            level,
            min_spend,
            cashback_percent: percent,
            evaluation_period: EvaluationPeriod::Lifetime,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn catalog() -> Vec<Tier> {
        vec![
            tier(1, 1, MinSpend::Floor, dec!(1)),
            tier(2, 2, MinSpend::AtLeast(dec!(500)), dec!(2)),
            tier(3, 3, MinSpend::AtLeast(dec!(2000)), dec!(3)),
        ]
    }

    #[test]
    fn test_min_spend_column_mapping() {
        assert_eq!(MinSpend::from_column(None), MinSpend::Floor);
        assert_eq!(MinSpend::from_column(Some(dec!(10))), MinSpend::AtLeast(dec!(10)));
        assert_eq!(MinSpend::AtLeast(dec!(10)).to_column(), Some(dec!(10)));
        assert!(MinSpend::Floor.is_met_by(Decimal::ZERO));
    }

    #[test]
    fn test_resolve_for_spend() {
        let tiers = catalog();
        assert_eq!(resolve_for_spend(&tiers, dec!(0)).map(|t| t.id), Some(1));
        assert_eq!(resolve_for_spend(&tiers, dec!(499.99)).map(|t| t.id), Some(1));
        assert_eq!(resolve_for_spend(&tiers, dec!(500)).map(|t| t.id), Some(2));
        assert_eq!(resolve_for_spend(&tiers, dec!(10000)).map(|t| t.id), Some(3));
    }

    #[test]
    fn test_resolve_skips_inactive() {
        let mut tiers = catalog();
        tiers[1].is_active = false;
        assert_eq!(resolve_for_spend(&tiers, dec!(800)).map(|t| t.id), Some(1));
    }

    #[test]
    fn test_tie_broken_by_highest_level() {
        let tiers = vec![
            tier(1, 1, MinSpend::Floor, dec!(1)),
            tier(2, 2, MinSpend::AtLeast(dec!(100)), dec!(2)),
            tier(3, 3, MinSpend::AtLeast(dec!(100)), dec!(2.5)),
        ];
        assert_eq!(resolve_for_spend(&tiers, dec!(150)).map(|t| t.id), Some(3));
    }

    #[test]
    fn test_floor_fallback_without_floor_tier() {
        let tiers = vec![
            tier(7, 1, MinSpend::AtLeast(dec!(100)), dec!(1)),
            tier(8, 2, MinSpend::AtLeast(dec!(300)), dec!(2)),
        ];
        assert_eq!(floor_tier(&tiers).map(|t| t.id), Some(7));
        assert_eq!(resolve_for_spend(&tiers, dec!(10)).map(|t| t.id), Some(7));
        assert!(resolve_for_spend(&[], dec!(10)).is_none());
    }

    #[test]
    fn test_levels_contiguous() {
        let mut tiers = catalog();
        assert!(levels_are_contiguous(&tiers));
        tiers.remove(1);
        assert!(!levels_are_contiguous(&tiers));
    }
}
