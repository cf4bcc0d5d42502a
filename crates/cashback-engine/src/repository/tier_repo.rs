//! 等级目录仓储
//!
//! 目录变更（新建、重排、删除）在事务内先取店铺级 advisory lock，同一店铺单写者

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};
use tracing::info;

use super::traits::TierRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{NewTier, Tier, TierRow, TierUpdate};

const TIER_COLUMNS: &str = "id, shop, name, level, min_spend, cashback_percent, \
                            evaluation_period, is_active, created_at, updated_at";

/// 等级目录仓储（PostgreSQL）
pub struct PgTierRepository {
    pool: PgPool,
}

impl PgTierRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 店铺级事务锁，事务结束自动释放
    async fn lock_shop(conn: &mut PgConnection, shop: &str) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(shop)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn list_in_tx(conn: &mut PgConnection, shop: &str) -> Result<Vec<Tier>> {
        let sql = format!(
            "SELECT {} FROM tiers WHERE shop = $1 ORDER BY level ASC",
            TIER_COLUMNS
        );
        let rows = sqlx::query_as::<_, TierRow>(&sql)
            .bind(shop)
            .fetch_all(conn)
            .await?;
        Ok(rows.into_iter().map(Tier::from).collect())
    }

    /// 唯一约束冲突转换为业务错误
    fn map_unique_violation(err: sqlx::Error, shop: &str, name: &str) -> LoyaltyError {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.constraint() {
                Some("uq_tiers_shop_name") => {
                    return LoyaltyError::DuplicateTierName(name.to_string());
                }
                Some("uq_tiers_shop_floor") => {
                    return LoyaltyError::DuplicateFloorTier(shop.to_string());
                }
                _ => {}
            }
        }
        LoyaltyError::Database(err)
    }
}

#[async_trait]
impl TierRepositoryTrait for PgTierRepository {
    async fn get_tier(&self, id: i64) -> Result<Option<Tier>> {
        let sql = format!("SELECT {} FROM tiers WHERE id = $1", TIER_COLUMNS);
        let row = sqlx::query_as::<_, TierRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Tier::from))
    }

    async fn list_tiers(&self, shop: &str) -> Result<Vec<Tier>> {
        let mut conn = self.pool.acquire().await?;
        Self::list_in_tx(&mut conn, shop).await
    }

    async fn create_tier(&self, tier: &NewTier) -> Result<Tier> {
        let mut tx = self.pool.begin().await?;
        Self::lock_shop(&mut tx, &tier.shop).await?;

        let next_level: i32 = sqlx::query(
            "SELECT COALESCE(MAX(level), 0) + 1 AS next_level FROM tiers WHERE shop = $1",
        )
        .bind(&tier.shop)
        .fetch_one(&mut *tx)
        .await?
        .get("next_level");

        let sql = format!(
            r#"
            INSERT INTO tiers (shop, name, level, min_spend, cashback_percent, evaluation_period, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TIER_COLUMNS
        );
        let row = sqlx::query_as::<_, TierRow>(&sql)
            .bind(&tier.shop)
            .bind(&tier.name)
            .bind(next_level)
            .bind(tier.min_spend.to_column())
            .bind(tier.cashback_percent)
            .bind(tier.evaluation_period)
            .bind(tier.is_active)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Self::map_unique_violation(e, &tier.shop, &tier.name))?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn update_tier(&self, id: i64, update: &TierUpdate) -> Result<Tier> {
        let mut tier = self.get_tier(id).await?.ok_or(LoyaltyError::TierNotFound(id))?;
        update.apply_to(&mut tier);

        let sql = format!(
            r#"
            UPDATE tiers
            SET name = $2, min_spend = $3, cashback_percent = $4,
                evaluation_period = $5, is_active = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TIER_COLUMNS
        );
        let row = sqlx::query_as::<_, TierRow>(&sql)
            .bind(id)
            .bind(&tier.name)
            .bind(tier.min_spend.to_column())
            .bind(tier.cashback_percent)
            .bind(tier.evaluation_period)
            .bind(tier.is_active)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::map_unique_violation(e, &tier.shop, &tier.name))?
            .ok_or(LoyaltyError::TierNotFound(id))?;
        Ok(row.into())
    }

    async fn reorder_tiers(&self, shop: &str, ordered_ids: &[i64]) -> Result<Vec<Tier>> {
        let mut tx = self.pool.begin().await?;
        Self::lock_shop(&mut tx, shop).await?;

        let current = Self::list_in_tx(&mut tx, shop).await?;
        let mut expected: Vec<i64> = current.iter().map(|t| t.id).collect();
        let mut requested = ordered_ids.to_vec();
        expected.sort_unstable();
        requested.sort_unstable();
        if expected != requested {
            return Err(LoyaltyError::InvalidTierOrder(
                "重排列表必须恰好包含店铺的全部等级".to_string(),
            ));
        }

        // uq_tiers_shop_level 为延迟约束，中间状态允许重复
        for (index, id) in ordered_ids.iter().enumerate() {
            sqlx::query("UPDATE tiers SET level = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(index as i32 + 1)
                .execute(&mut *tx)
                .await?;
        }

        let tiers = Self::list_in_tx(&mut tx, shop).await?;
        tx.commit().await?;
        Ok(tiers)
    }

    async fn delete_tier(&self, id: i64) -> Result<Vec<Tier>> {
        let tier = self.get_tier(id).await?.ok_or(LoyaltyError::TierNotFound(id))?;

        let mut tx = self.pool.begin().await?;
        Self::lock_shop(&mut tx, &tier.shop).await?;

        // 行锁与会员变更时的 FOR SHARE 互斥，计数之后不会再有新会员进入
        let locked: Option<i32> = sqlx::query("SELECT level FROM tiers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("level"));
        let level = locked.ok_or(LoyaltyError::TierNotFound(id))?;

        let members: i64 = sqlx::query(
            "SELECT COUNT(*) AS members FROM customer_memberships WHERE tier_id = $1 AND is_active",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?
        .get("members");
        if members > 0 {
            return Err(LoyaltyError::TierHasActiveMembers { tier_id: id, members });
        }

        sqlx::query("DELETE FROM tiers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let compacted = sqlx::query(
            "UPDATE tiers SET level = level - 1, updated_at = NOW() WHERE shop = $1 AND level > $2",
        )
        .bind(&tier.shop)
        .bind(level)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let remaining = Self::list_in_tx(&mut tx, &tier.shop).await?;
        tx.commit().await?;

        info!(tier_id = id, shop = %tier.shop, compacted, "等级已删除并压缩 level");
        Ok(remaining)
    }

    async fn count_active_members(&self, tier_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS members FROM customer_memberships WHERE tier_id = $1 AND is_active",
        )
        .bind(tier_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("members"))
    }
}
