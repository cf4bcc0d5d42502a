//! 会员等级仓储
//!
//! 等级变更在一个事务内完成，部分唯一索引保证每个客户最多一条活跃记录

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use super::customer_repo::PgCustomerRepository;
use super::traits::MembershipRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{CustomerMembership, TierChangeLog, TierTransition, TransitionOutcome};

const MEMBERSHIP_COLUMNS: &str = "id, customer_id, tier_id, start_date, end_date, is_active, \
                                  assignment_type, previous_tier_id, expires_at";

const LOG_COLUMNS: &str = "id, customer_id, from_tier_id, to_tier_id, change_type, reason, \
                           triggered_by, metadata, created_at";

/// 会员等级仓储（PostgreSQL）
pub struct PgMembershipRepository {
    pool: PgPool,
}

impl PgMembershipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepositoryTrait for PgMembershipRepository {
    async fn get_active_membership(&self, customer_id: i64) -> Result<Option<CustomerMembership>> {
        let sql = format!(
            "SELECT {} FROM customer_memberships WHERE customer_id = $1 AND is_active",
            MEMBERSHIP_COLUMNS
        );
        let membership = sqlx::query_as::<_, CustomerMembership>(&sql)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(membership)
    }

    async fn transition(&self, transition: &TierTransition) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        PgCustomerRepository::lock_in_tx(&mut tx, transition.customer_id).await?;

        // 与等级删除的 FOR UPDATE 互斥
        let target_exists = sqlx::query("SELECT id FROM tiers WHERE id = $1 FOR SHARE")
            .bind(transition.to_tier_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !target_exists {
            return Err(LoyaltyError::TierNotFound(transition.to_tier_id));
        }

        let sql = format!(
            "SELECT {} FROM customer_memberships WHERE customer_id = $1 AND is_active FOR UPDATE",
            MEMBERSHIP_COLUMNS
        );
        let current = sqlx::query_as::<_, CustomerMembership>(&sql)
            .bind(transition.customer_id)
            .fetch_optional(&mut *tx)
            .await?;

        if current.as_ref().map(|m| m.id) != transition.expected_current {
            return Err(LoyaltyError::ConcurrencyConflict);
        }

        let now = Utc::now();
        if let Some(current) = &current {
            sqlx::query(
                "UPDATE customer_memberships SET is_active = FALSE, end_date = $2 WHERE id = $1",
            )
            .bind(current.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let from_tier_id = current.as_ref().map(|m| m.tier_id);

        let sql = format!(
            r#"
            INSERT INTO customer_memberships
                (customer_id, tier_id, start_date, is_active, assignment_type, previous_tier_id, expires_at)
            VALUES ($1, $2, $3, TRUE, $4, $5, $6)
            RETURNING {}
            "#,
            MEMBERSHIP_COLUMNS
        );
        let membership = sqlx::query_as::<_, CustomerMembership>(&sql)
            .bind(transition.customer_id)
            .bind(transition.to_tier_id)
            .bind(now)
            .bind(transition.assignment_type)
            .bind(from_tier_id)
            .bind(transition.expires_at)
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            INSERT INTO tier_change_logs
                (customer_id, from_tier_id, to_tier_id, change_type, reason, triggered_by, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            LOG_COLUMNS
        );
        let log = sqlx::query_as::<_, TierChangeLog>(&sql)
            .bind(transition.customer_id)
            .bind(from_tier_id)
            .bind(transition.to_tier_id)
            .bind(transition.change_type)
            .bind(&transition.reason)
            .bind(&transition.triggered_by)
            .bind(Json(&transition.metadata))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(TransitionOutcome { membership, log })
    }

    async fn list_memberships(&self, customer_id: i64) -> Result<Vec<CustomerMembership>> {
        let sql = format!(
            "SELECT {} FROM customer_memberships WHERE customer_id = $1 ORDER BY id ASC",
            MEMBERSHIP_COLUMNS
        );
        let memberships = sqlx::query_as::<_, CustomerMembership>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(memberships)
    }

    async fn list_change_logs(&self, customer_id: i64) -> Result<Vec<TierChangeLog>> {
        let sql = format!(
            "SELECT {} FROM tier_change_logs WHERE customer_id = $1 ORDER BY id ASC",
            LOG_COLUMNS
        );
        let logs = sqlx::query_as::<_, TierChangeLog>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    async fn list_active_members_of_tier(&self, tier_id: i64) -> Result<Vec<CustomerMembership>> {
        let sql = format!(
            "SELECT {} FROM customer_memberships WHERE tier_id = $1 AND is_active ORDER BY id ASC",
            MEMBERSHIP_COLUMNS
        );
        let memberships = sqlx::query_as::<_, CustomerMembership>(&sql)
            .bind(tier_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(memberships)
    }

    async fn list_expired_overrides(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CustomerMembership>> {
        let sql = format!(
            r#"
            SELECT {} FROM customer_memberships
            WHERE is_active
              AND assignment_type IN ('MANUAL', 'PROMOTIONAL')
              AND expires_at IS NOT NULL
              AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
            MEMBERSHIP_COLUMNS
        );
        let memberships = sqlx::query_as::<_, CustomerMembership>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(memberships)
    }
}
