//! 等级评估服务
//!
//! 每个客户的状态只有两种：未入会，或在某个等级上有一条活跃会员记录。
//!
//! ## 评估流程
//!
//! 1. 按客户当前等级配置的统计窗口汇总消费（未入会时用基础等级的窗口）
//! 2. 在等级目录中匹配该消费对应的等级
//! 3. 与当前等级不同则关闭旧记录、新开记录并写变更日志
//!
//! 手工/活动指定的等级不参与自动评估，到期后回退为自动评估；显式重新评估会立即改回自动。
//! 会员记录的变更带乐观校验，并发冲突时按退避策略重试。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use cashback_shared::observability::metrics;
use cashback_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{LoyaltyError, Result};
use crate::models::{
    AssignmentType, Customer, CustomerMembership, Tier, TierChangeType, TierTransition,
    TransitionOutcome, floor_tier, resolve_for_spend,
};
use crate::repository::{
    CustomerRepositoryTrait, MembershipRepositoryTrait, TierRepositoryTrait,
    TransactionRepositoryTrait,
};
use crate::service::dto::ManualAssignment;

/// 系统触发者标识
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// 一次评估的结果
#[derive(Debug, Clone)]
pub enum EvaluationOutcome {
    /// 等级无需变化
    Unchanged { tier_id: i64, spend: Decimal },
    /// 手工/活动等级未到期，跳过自动评估
    Skipped {
        tier_id: i64,
        assignment_type: AssignmentType,
    },
    Transitioned(Box<TransitionOutcome>),
}

impl EvaluationOutcome {
    pub fn is_transitioned(&self) -> bool {
        matches!(self, Self::Transitioned(_))
    }

    /// 评估后客户所在等级
    pub fn tier_id(&self) -> i64 {
        match self {
            Self::Unchanged { tier_id, .. } | Self::Skipped { tier_id, .. } => *tier_id,
            Self::Transitioned(outcome) => outcome.membership.tier_id,
        }
    }
}

/// 评估模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// 自动评估，尊重未到期的手工等级
    Automatic,
    /// 显式重新评估，无条件改回自动
    Explicit,
}

/// 等级评估服务
pub struct TierEvaluator {
    customers: Arc<dyn CustomerRepositoryTrait>,
    tiers: Arc<dyn TierRepositoryTrait>,
    memberships: Arc<dyn MembershipRepositoryTrait>,
    transactions: Arc<dyn TransactionRepositoryTrait>,
    conflict_retry: RetryPolicy,
}

impl TierEvaluator {
    pub fn new(
        customers: Arc<dyn CustomerRepositoryTrait>,
        tiers: Arc<dyn TierRepositoryTrait>,
        memberships: Arc<dyn MembershipRepositoryTrait>,
        transactions: Arc<dyn TransactionRepositoryTrait>,
    ) -> Self {
        Self {
            customers,
            tiers,
            memberships,
            transactions,
            conflict_retry: RetryPolicy {
                max_retries: 3,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(200),
                multiplier: 2.0,
            },
        }
    }

    // ==================== 自动评估 ====================

    /// 评估客户等级
    ///
    /// 未入会的客户在这里完成首次分配
    #[instrument(skip(self), fields(customer_id = customer_id))]
    pub async fn evaluate(&self, customer_id: i64, triggered_by: &str) -> Result<EvaluationOutcome> {
        let customer = self.require_customer(customer_id).await?;
        retry_with_policy(
            &self.conflict_retry,
            "tier_evaluation",
            is_conflict,
            || self.evaluate_once(&customer, triggered_by, Mode::Automatic),
        )
        .await
    }

    /// 显式重新评估
    ///
    /// 手工/活动等级也会被改回自动评估结果；等级不变时仍记一条 MANUAL_OVERRIDE 日志
    #[instrument(skip(self), fields(customer_id = customer_id))]
    pub async fn reevaluate(&self, customer_id: i64, operator: &str) -> Result<EvaluationOutcome> {
        let customer = self.require_customer(customer_id).await?;
        retry_with_policy(
            &self.conflict_retry,
            "tier_reevaluation",
            is_conflict,
            || self.evaluate_once(&customer, operator, Mode::Explicit),
        )
        .await
    }

    async fn evaluate_once(
        &self,
        customer: &Customer,
        triggered_by: &str,
        mode: Mode,
    ) -> Result<EvaluationOutcome> {
        let now = Utc::now();
        let tiers = self.active_catalog(&customer.shop).await?;
        let current = self.memberships.get_active_membership(customer.id).await?;

        let Some(membership) = current else {
            return self.enroll(customer, &tiers, triggered_by, now).await;
        };

        let expired = membership.is_override_expired(now);
        if mode == Mode::Automatic && !membership.assignment_type.is_auto_revisable() && !expired {
            debug!(
                tier_id = membership.tier_id,
                assignment_type = ?membership.assignment_type,
                "手工指定等级未到期，跳过自动评估"
            );
            return Ok(EvaluationOutcome::Skipped {
                tier_id: membership.tier_id,
                assignment_type: membership.assignment_type,
            });
        }

        let current_tier = tiers.iter().find(|t| t.id == membership.tier_id);
        let spend = self.qualifying_spend(customer.id, current_tier, &tiers, now).await?;
        let target = target_tier(&tiers, spend, &customer.shop)?;
        let was_override = !membership.assignment_type.is_auto_revisable();

        let change_type = match current_tier {
            _ if was_override && expired && mode == Mode::Automatic => TierChangeType::ExpirationRevert,
            None => TierChangeType::TierDeletedMigration,
            Some(tier) if target.id == tier.id => {
                if !was_override {
                    return Ok(EvaluationOutcome::Unchanged {
                        tier_id: tier.id,
                        spend,
                    });
                }
                TierChangeType::ManualOverride
            }
            Some(tier) if target.level > tier.level => TierChangeType::AutoUpgrade,
            Some(_) => TierChangeType::AutoDowngrade,
        };

        let reason = match change_type {
            TierChangeType::ExpirationRevert => "指定等级到期，恢复自动评估",
            TierChangeType::TierDeletedMigration => "当前等级已不可用，按消费重新匹配",
            TierChangeType::ManualOverride => "显式重新评估，恢复自动评估",
            TierChangeType::AutoUpgrade => "消费达到更高等级门槛",
            _ => "消费低于当前等级门槛",
        };

        let transition = TierTransition {
            customer_id: customer.id,
            expected_current: Some(membership.id),
            to_tier_id: target.id,
            assignment_type: AssignmentType::Automatic,
            expires_at: None,
            change_type,
            reason: Some(reason.to_string()),
            triggered_by: triggered_by.to_string(),
            metadata: spend_metadata(spend, current_tier.unwrap_or(target), now),
        };
        let outcome = self.apply(&transition).await?;
        Ok(EvaluationOutcome::Transitioned(Box::new(outcome)))
    }

    /// 首次分配：基础等级，消费已满足更高门槛时直接分到对应等级
    async fn enroll(
        &self,
        customer: &Customer,
        tiers: &[Tier],
        triggered_by: &str,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome> {
        let floor = floor_tier(tiers).ok_or_else(|| LoyaltyError::EmptyCatalog(customer.shop.clone()))?;
        let spend = self.qualifying_spend(customer.id, Some(floor), tiers, now).await?;
        let target = target_tier(tiers, spend, &customer.shop)?;

        let transition = TierTransition {
            customer_id: customer.id,
            expected_current: None,
            to_tier_id: target.id,
            assignment_type: AssignmentType::Automatic,
            expires_at: None,
            change_type: TierChangeType::InitialAssignment,
            reason: Some("首次入会".to_string()),
            triggered_by: triggered_by.to_string(),
            metadata: spend_metadata(spend, floor, now),
        };
        let outcome = self.apply(&transition).await?;
        Ok(EvaluationOutcome::Transitioned(Box::new(outcome)))
    }

    // ==================== 手工指定 ====================

    /// 手工/活动指定等级
    ///
    /// 指定的等级在到期前不会被自动评估修改
    #[instrument(skip(self, assignment), fields(customer_id = assignment.customer_id, tier_id = assignment.tier_id))]
    pub async fn assign_tier(&self, assignment: &ManualAssignment) -> Result<TransitionOutcome> {
        if !matches!(
            assignment.assignment_type,
            AssignmentType::Manual | AssignmentType::Promotional
        ) {
            return Err(LoyaltyError::Validation(format!(
                "手工指定只支持 MANUAL 或 PROMOTIONAL: {:?}",
                assignment.assignment_type
            )));
        }
        let now = Utc::now();
        if assignment.expires_at.is_some_and(|t| t <= now) {
            return Err(LoyaltyError::Validation("到期时间必须晚于当前时间".to_string()));
        }

        let customer = self.require_customer(assignment.customer_id).await?;
        let tier = self
            .tiers
            .get_tier(assignment.tier_id)
            .await?
            .filter(|t| t.shop == customer.shop)
            .ok_or(LoyaltyError::TierNotFound(assignment.tier_id))?;
        if !tier.is_active {
            return Err(LoyaltyError::Validation(format!("等级已停用: {}", tier.name)));
        }

        retry_with_policy(&self.conflict_retry, "tier_assignment", is_conflict, || async {
            let current = self.memberships.get_active_membership(customer.id).await?;
            let transition = TierTransition {
                customer_id: customer.id,
                expected_current: current.as_ref().map(|m| m.id),
                to_tier_id: tier.id,
                assignment_type: assignment.assignment_type,
                expires_at: assignment.expires_at,
                change_type: TierChangeType::ManualOverride,
                reason: assignment.reason.clone(),
                triggered_by: assignment.operator.clone(),
                metadata: json!({
                    "assignmentType": assignment.assignment_type,
                    "expiresAt": assignment.expires_at,
                }),
            };
            self.apply(&transition).await
        })
        .await
    }

    // ==================== 批量处理 ====================

    /// 等级删除前迁移其全部会员
    ///
    /// 每个会员按原等级的统计窗口汇总消费，迁到剩余目录中不高于其消费的最近等级
    #[instrument(skip(self, tier, remaining), fields(tier_id = tier.id, shop = %tier.shop))]
    pub async fn migrate_members_off(
        &self,
        tier: &Tier,
        remaining: &[Tier],
        triggered_by: &str,
    ) -> Result<usize> {
        let remaining: Vec<Tier> = remaining
            .iter()
            .filter(|t| t.is_active && t.id != tier.id)
            .cloned()
            .collect();
        if remaining.is_empty() {
            return Err(LoyaltyError::EmptyCatalog(tier.shop.clone()));
        }

        let members = self.memberships.list_active_members_of_tier(tier.id).await?;
        let now = Utc::now();
        let mut migrated = 0;

        for member in members {
            let spend = self
                .transactions
                .sum_spend(member.customer_id, tier.evaluation_period.window_start(now))
                .await?;
            let target = target_tier(&remaining, spend, &tier.shop)?;
            let transition = TierTransition {
                customer_id: member.customer_id,
                expected_current: Some(member.id),
                to_tier_id: target.id,
                assignment_type: AssignmentType::Automatic,
                expires_at: None,
                change_type: TierChangeType::TierDeletedMigration,
                reason: Some(format!("等级 {} 被删除", tier.name)),
                triggered_by: triggered_by.to_string(),
                metadata: spend_metadata(spend, tier, now),
            };
            match self.apply(&transition).await {
                Ok(_) => migrated += 1,
                // 会员在此期间已被其他操作迁走
                Err(LoyaltyError::ConcurrencyConflict) => {
                    warn!(customer_id = member.customer_id, "会员记录已变化，跳过迁移");
                }
                Err(e) => return Err(e),
            }
        }

        info!(migrated, target_count = remaining.len(), "已迁移被删除等级的会员");
        Ok(migrated)
    }

    /// 回退已到期的手工/活动等级，返回回退的客户数
    pub async fn revert_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<usize> {
        let expired = self.memberships.list_expired_overrides(now, limit).await?;
        let mut reverted = 0;
        for membership in expired {
            match self.evaluate(membership.customer_id, SYSTEM_ACTOR).await {
                Ok(outcome) if outcome.is_transitioned() => reverted += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(customer_id = membership.customer_id, error = %e, "到期等级回退失败");
                }
            }
        }
        if reverted > 0 {
            info!(reverted, "已回退到期的指定等级");
        }
        Ok(reverted)
    }

    // ==================== 内部方法 ====================

    async fn apply(&self, transition: &TierTransition) -> Result<TransitionOutcome> {
        let outcome = self.memberships.transition(transition).await?;
        metrics::record_tier_transition(transition.change_type.as_str());
        info!(
            customer_id = transition.customer_id,
            from_tier_id = ?outcome.log.from_tier_id,
            to_tier_id = transition.to_tier_id,
            change_type = transition.change_type.as_str(),
            triggered_by = %transition.triggered_by,
            "会员等级已变更"
        );
        Ok(outcome)
    }

    /// 按等级窗口汇总消费，等级缺失时使用基础等级的窗口
    async fn qualifying_spend(
        &self,
        customer_id: i64,
        window_tier: Option<&Tier>,
        tiers: &[Tier],
        now: DateTime<Utc>,
    ) -> Result<Decimal> {
        let period = window_tier
            .or_else(|| floor_tier(tiers))
            .map(|t| t.evaluation_period)
            .unwrap_or_default();
        self.transactions
            .sum_spend(customer_id, period.window_start(now))
            .await
    }

    async fn active_catalog(&self, shop: &str) -> Result<Vec<Tier>> {
        let tiers = self.tiers.list_tiers(shop).await?;
        if !tiers.iter().any(|t| t.is_active) {
            return Err(LoyaltyError::EmptyCatalog(shop.to_string()));
        }
        Ok(tiers)
    }

    async fn require_customer(&self, customer_id: i64) -> Result<Customer> {
        self.customers
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| LoyaltyError::CustomerNotFound {
                shop: String::new(),
                customer_ref: format!("#{}", customer_id),
            })
    }

    /// 当前活跃会员记录
    pub async fn current_membership(&self, customer_id: i64) -> Result<Option<CustomerMembership>> {
        self.memberships.get_active_membership(customer_id).await
    }
}

fn is_conflict(err: &LoyaltyError) -> bool {
    matches!(err, LoyaltyError::ConcurrencyConflict)
}

fn target_tier<'a>(tiers: &'a [Tier], spend: Decimal, shop: &str) -> Result<&'a Tier> {
    resolve_for_spend(tiers, spend).ok_or_else(|| LoyaltyError::EmptyCatalog(shop.to_string()))
}

fn spend_metadata(spend: Decimal, window_tier: &Tier, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "spend": spend,
        "evaluationPeriod": window_tier.evaluation_period,
        "windowStart": window_tier.evaluation_period.window_start(now),
    })
}
