//! 会员等级与等级变更日志实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use super::enums::{AssignmentType, TierChangeType};

/// 客户会员记录
///
/// 每个客户任意时刻只有一条 is_active 记录。等级变更时关闭旧记录（写 end_date）并新开一条，不做删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CustomerMembership {
    pub id: i64,
    pub customer_id: i64,
    pub tier_id: i64,
    pub start_date: DateTime<Utc>,
    /// 被替换时写入
    #[sqlx(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub assignment_type: AssignmentType,
    #[sqlx(default)]
    pub previous_tier_id: Option<i64>,
    /// 手工/活动指定等级的到期时间
    #[sqlx(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CustomerMembership {
    /// 手工/活动指定等级是否已到期
    pub fn is_override_expired(&self, now: DateTime<Utc>) -> bool {
        !self.assignment_type.is_auto_revisable() && self.expires_at.is_some_and(|t| t <= now)
    }
}

/// 等级变更审计日志
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TierChangeLog {
    pub id: i64,
    pub customer_id: i64,
    /// 首次分配时为空
    #[sqlx(default)]
    pub from_tier_id: Option<i64>,
    pub to_tier_id: i64,
    pub change_type: TierChangeType,
    #[sqlx(default)]
    pub reason: Option<String>,
    /// 触发者（SYSTEM、运营账号、迁移任务 ID 等）
    pub triggered_by: String,
    pub metadata: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// 一次等级变更
///
/// 仓储在同一事务内完成：校验当前记录、关闭旧记录、新开记录、写变更日志
#[derive(Debug, Clone, PartialEq)]
pub struct TierTransition {
    pub customer_id: i64,
    /// 调用方读到的当前记录 ID，与库中不一致时返回并发冲突
    pub expected_current: Option<i64>,
    pub to_tier_id: i64,
    pub assignment_type: AssignmentType,
    pub expires_at: Option<DateTime<Utc>>,
    pub change_type: TierChangeType,
    pub reason: Option<String>,
    pub triggered_by: String,
    pub metadata: serde_json::Value,
}

/// 等级变更结果
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub membership: CustomerMembership,
    pub log: TierChangeLog,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(assignment_type: AssignmentType, expires_at: Option<DateTime<Utc>>) -> CustomerMembership {
        CustomerMembership {
            id: 1,
            customer_id: 1,
            tier_id: 1,
            start_date: Utc::now(),
            end_date: None,
            is_active: true,
            assignment_type,
            previous_tier_id: None,
            expires_at,
        }
    }

    #[test]
    fn test_override_expiration() {
        let now = Utc::now();
        let past = now - chrono::Duration::days(1);
        let future = now + chrono::Duration::days(1);

        assert!(membership(AssignmentType::Manual, Some(past)).is_override_expired(now));
        assert!(!membership(AssignmentType::Promotional, Some(future)).is_override_expired(now));
        assert!(!membership(AssignmentType::Manual, None).is_override_expired(now));
        // 自动等级不受 expires_at 影响
        assert!(!membership(AssignmentType::Automatic, Some(past)).is_override_expired(now));
    }
}
