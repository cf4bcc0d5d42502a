//! 等级目录服务
//!
//! 目录变更（新建、修改、重排、删除）按店铺串行执行，并在写入前对变更后的完整目录做一致性校验：
//! - 基础等级最多一个，且必须位于 level 1
//! - 门槛随 level 单调不减
//! - 返现比例在 0 到 100 之间
//!
//! 校验失败时直接拒绝，不产生任何部分写入。

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use crate::error::{LoyaltyError, Result};
use crate::lock::KeyedLock;
use crate::models::{MinSpend, NewTier, Tier, TierUpdate, levels_are_contiguous, resolve_for_spend};
use crate::repository::TierRepositoryTrait;
use crate::service::dto::DeletePolicy;
use crate::service::tier_evaluator::TierEvaluator;

/// 等级目录服务
pub struct TierCatalogService {
    tiers: Arc<dyn TierRepositoryTrait>,
    evaluator: Arc<TierEvaluator>,
    shop_locks: KeyedLock,
}

impl TierCatalogService {
    pub fn new(tiers: Arc<dyn TierRepositoryTrait>, evaluator: Arc<TierEvaluator>) -> Self {
        Self {
            tiers,
            evaluator,
            shop_locks: KeyedLock::new(),
        }
    }

    // ==================== 查询 ====================

    /// 按 level 升序列出店铺全部等级
    pub async fn list(&self, shop: &str) -> Result<Vec<Tier>> {
        self.tiers.list_tiers(shop).await
    }

    pub async fn get(&self, tier_id: i64) -> Result<Tier> {
        self.tiers
            .get_tier(tier_id)
            .await?
            .ok_or(LoyaltyError::TierNotFound(tier_id))
    }

    /// 消费金额对应的等级
    pub async fn resolve(&self, shop: &str, spend: Decimal) -> Result<Tier> {
        let tiers = self.tiers.list_tiers(shop).await?;
        resolve_for_spend(&tiers, spend)
            .cloned()
            .ok_or_else(|| LoyaltyError::EmptyCatalog(shop.to_string()))
    }

    // ==================== 变更 ====================

    /// 新建等级，level 追加到末尾
    #[instrument(skip(self, tier), fields(shop = %tier.shop, name = %tier.name))]
    pub async fn create(&self, tier: NewTier) -> Result<Tier> {
        validate_name(&tier.name)?;
        validate_percent(tier.cashback_percent)?;
        validate_min_spend(&tier.min_spend)?;

        let _guard = self.shop_locks.lock(&tier.shop).await;

        let mut prospective = self.tiers.list_tiers(&tier.shop).await?;
        let next_level = prospective.iter().map(|t| t.level).max().unwrap_or(0) + 1;
        prospective.push(Tier {
            id: 0,
            shop: tier.shop.clone(),
            name: tier.name.clone(),
            level: next_level,
            min_spend: tier.min_spend,
            cashback_percent: tier.cashback_percent,
            evaluation_period: tier.evaluation_period,
            is_active: tier.is_active,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        });
        validate_catalog_order(&prospective)?;

        let created = self.tiers.create_tier(&tier).await?;
        info!(tier_id = created.id, level = created.level, "等级已创建");
        Ok(created)
    }

    /// 修改等级属性
    #[instrument(skip(self, update), fields(tier_id = tier_id))]
    pub async fn update(&self, tier_id: i64, update: TierUpdate) -> Result<Tier> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(percent) = update.cashback_percent {
            validate_percent(percent)?;
        }
        if let Some(min_spend) = &update.min_spend {
            validate_min_spend(min_spend)?;
        }

        let existing = self.get(tier_id).await?;
        let _guard = self.shop_locks.lock(&existing.shop).await;

        let mut prospective = self.tiers.list_tiers(&existing.shop).await?;
        if let Some(target) = prospective.iter_mut().find(|t| t.id == tier_id) {
            update.apply_to(target);
        }
        validate_catalog_order(&prospective)?;

        let updated = self.tiers.update_tier(tier_id, &update).await?;
        info!(shop = %updated.shop, "等级已更新");
        Ok(updated)
    }

    /// 按给定顺序重排，ids 必须恰好覆盖店铺全部等级
    #[instrument(skip(self))]
    pub async fn reorder(&self, shop: &str, ordered_ids: &[i64]) -> Result<Vec<Tier>> {
        let _guard = self.shop_locks.lock(shop).await;

        let current = self.tiers.list_tiers(shop).await?;
        let mut prospective = Vec::with_capacity(ordered_ids.len());
        for (index, id) in ordered_ids.iter().enumerate() {
            let mut tier = current
                .iter()
                .find(|t| t.id == *id)
                .cloned()
                .ok_or_else(|| LoyaltyError::InvalidTierOrder(format!("等级 {} 不属于该店铺", id)))?;
            tier.level = index as i32 + 1;
            prospective.push(tier);
        }
        if prospective.len() != current.len() {
            return Err(LoyaltyError::InvalidTierOrder(format!(
                "需要覆盖全部 {} 个等级，实际 {} 个",
                current.len(),
                prospective.len()
            )));
        }
        validate_catalog_order(&prospective)?;

        let reordered = self.tiers.reorder_tiers(shop, ordered_ids).await?;
        info!(count = reordered.len(), "等级已重排");
        Ok(reordered)
    }

    /// 删除等级
    ///
    /// `Reject` 在仍有活跃会员时拒绝；`MigrateMembers` 先停用该等级并把会员迁走，再删除。
    /// 迁移失败时恢复原启用状态，等级保持不变。
    #[instrument(skip(self))]
    pub async fn delete(&self, tier_id: i64, policy: DeletePolicy, operator: &str) -> Result<Vec<Tier>> {
        let tier = self.get(tier_id).await?;
        let _guard = self.shop_locks.lock(&tier.shop).await;

        let members = self.tiers.count_active_members(tier_id).await?;
        if members > 0 {
            match policy {
                DeletePolicy::Reject => {
                    warn!(members, "等级仍有活跃会员，拒绝删除");
                    return Err(LoyaltyError::TierHasActiveMembers { tier_id, members });
                }
                DeletePolicy::MigrateMembers => self.migrate_before_delete(&tier, operator).await?,
            }
        }

        let remaining = self.tiers.delete_tier(tier_id).await?;
        info!(shop = %tier.shop, remaining = remaining.len(), "等级已删除");
        Ok(remaining)
    }

    async fn migrate_before_delete(&self, tier: &Tier, operator: &str) -> Result<()> {
        let deactivate = TierUpdate {
            is_active: Some(false),
            ..TierUpdate::default()
        };
        self.tiers.update_tier(tier.id, &deactivate).await?;

        let remaining = self.tiers.list_tiers(&tier.shop).await?;
        if let Err(e) = self.evaluator.migrate_members_off(tier, &remaining, operator).await {
            let restore = TierUpdate {
                is_active: Some(tier.is_active),
                ..TierUpdate::default()
            };
            if let Err(restore_err) = self.tiers.update_tier(tier.id, &restore).await {
                error!(tier_id = tier.id, error = %restore_err, "恢复等级启用状态失败");
            }
            return Err(e);
        }
        Ok(())
    }
}

// ==================== 目录校验 ====================

/// 校验变更后的目录
pub fn validate_catalog_order(tiers: &[Tier]) -> Result<()> {
    let mut sorted: Vec<&Tier> = tiers.iter().collect();
    sorted.sort_by_key(|t| t.level);

    let floors: Vec<&&Tier> = sorted.iter().filter(|t| t.min_spend.is_floor()).collect();
    if floors.len() > 1 {
        return Err(LoyaltyError::DuplicateFloorTier(
            sorted.first().map(|t| t.shop.clone()).unwrap_or_default(),
        ));
    }
    if let Some(floor) = floors.first()
        && floor.level != 1
    {
        return Err(LoyaltyError::InvalidTierOrder(format!(
            "基础等级 {} 必须位于 level 1",
            floor.name
        )));
    }

    if !levels_are_contiguous(tiers) {
        let levels: Vec<i32> = sorted.iter().map(|t| t.level).collect();
        return Err(LoyaltyError::InvalidTierOrder(format!(
            "level 必须从 1 开始连续且不重复: {:?}",
            levels
        )));
    }

    for pair in sorted.windows(2) {
        let (lower, higher) = (pair[0], pair[1]);
        if higher.min_spend.threshold() < lower.min_spend.threshold() {
            return Err(LoyaltyError::InvalidTierOrder(format!(
                "等级 {} 的门槛低于下一级 {}",
                higher.name, lower.name
            )));
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LoyaltyError::Validation("等级名称不能为空".to_string()));
    }
    Ok(())
}

fn validate_percent(percent: Decimal) -> Result<()> {
    if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        return Err(LoyaltyError::Validation(format!(
            "返现比例必须在 0 到 100 之间: {}",
            percent
        )));
    }
    Ok(())
}

fn validate_min_spend(min_spend: &MinSpend) -> Result<()> {
    if let MinSpend::AtLeast(amount) = min_spend {
        LoyaltyError::non_negative("min_spend", *amount)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvaluationPeriod;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn tier(id: i64, level: i32, min_spend: MinSpend) -> Tier {
        Tier {
            id,
            shop: "demo.myshopify.com".to_string(),
            name: format!("T{}", id),
            level,
            min_spend,
            cashback_percent: dec!(1),
            evaluation_period: EvaluationPeriod::RollingAnnual,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_catalog() {
        let tiers = vec![
            tier(1, 1, MinSpend::Floor),
            tier(2, 2, MinSpend::AtLeast(dec!(500))),
            tier(3, 3, MinSpend::AtLeast(dec!(500))),
        ];
        assert!(validate_catalog_order(&tiers).is_ok());
    }

    #[test]
    fn test_floor_must_be_first() {
        let tiers = vec![
            tier(1, 1, MinSpend::AtLeast(dec!(0))),
            tier(2, 2, MinSpend::Floor),
        ];
        assert!(matches!(
            validate_catalog_order(&tiers),
            Err(LoyaltyError::InvalidTierOrder(_))
        ));
    }

    #[test]
    fn test_second_floor_is_rejected() {
        let tiers = vec![tier(1, 1, MinSpend::Floor), tier(2, 2, MinSpend::Floor)];
        assert!(matches!(
            validate_catalog_order(&tiers),
            Err(LoyaltyError::DuplicateFloorTier(_))
        ));
    }

    #[test]
    fn test_decreasing_threshold_is_rejected() {
        let tiers = vec![
            tier(1, 1, MinSpend::AtLeast(dec!(1000))),
            tier(2, 2, MinSpend::AtLeast(dec!(200))),
        ];
        assert!(validate_catalog_order(&tiers).is_err());
    }

    #[test]
    fn test_level_gap_or_duplicate_is_rejected() {
        let gap = vec![tier(1, 1, MinSpend::Floor), tier(2, 3, MinSpend::AtLeast(dec!(500)))];
        assert!(matches!(
            validate_catalog_order(&gap),
            Err(LoyaltyError::InvalidTierOrder(_))
        ));

        let duplicate = vec![
            tier(1, 1, MinSpend::Floor),
            tier(2, 2, MinSpend::AtLeast(dec!(100))),
            tier(3, 2, MinSpend::AtLeast(dec!(200))),
        ];
        assert!(validate_catalog_order(&duplicate).is_err());
    }

    #[test]
    fn test_percent_bounds() {
        assert!(validate_percent(dec!(0)).is_ok());
        assert!(validate_percent(dec!(100)).is_ok());
        assert!(validate_percent(dec!(100.01)).is_err());
        assert!(validate_percent(dec!(-1)).is_err());
    }
}
