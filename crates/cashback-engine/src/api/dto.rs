//! HTTP 请求与响应 DTO

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{
    AppendOutcome, AssignmentType, CashbackTransaction, CustomerMembership, EvaluationPeriod,
    LedgerEntry, MigrationParams, MinSpend, NewTier, TierChangeLog, TierUpdate, TransitionOutcome,
};
use crate::service::{
    DeletePolicy, EvaluationOutcome, IngestOutcome, ReconcileOutcome, SkipReason,
};

// ==================== 通用响应 ====================

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

fn percent_in_range(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("percent_out_of_range"));
    }
    Ok(())
}

fn positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("amount_not_positive"));
    }
    Ok(())
}

fn non_zero_amount(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("amount_is_zero"));
    }
    Ok(())
}

// ==================== 等级目录 ====================

/// 创建等级请求
///
/// minSpend 为空表示基础等级
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTierRequest {
    #[validate(length(min = 1, max = 100, message = "等级名称长度必须在1-100个字符之间"))]
    pub name: String,
    pub min_spend: Option<Decimal>,
    #[validate(custom(function = "percent_in_range", message = "返现比例必须在0-100之间"))]
    pub cashback_percent: Decimal,
    #[serde(default)]
    pub evaluation_period: EvaluationPeriod,
    pub is_active: Option<bool>,
}

impl CreateTierRequest {
    pub fn into_new_tier(self, shop: &str) -> NewTier {
        NewTier {
            shop: shop.to_string(),
            name: self.name,
            min_spend: MinSpend::from_column(self.min_spend),
            cashback_percent: self.cashback_percent,
            evaluation_period: self.evaluation_period,
            is_active: self.is_active.unwrap_or(true),
        }
    }
}

/// 更新等级请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTierRequest {
    #[validate(length(min = 1, max = 100, message = "等级名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    pub min_spend: Option<MinSpend>,
    #[validate(custom(function = "percent_in_range", message = "返现比例必须在0-100之间"))]
    pub cashback_percent: Option<Decimal>,
    pub evaluation_period: Option<EvaluationPeriod>,
    pub is_active: Option<bool>,
}

impl From<UpdateTierRequest> for TierUpdate {
    fn from(req: UpdateTierRequest) -> Self {
        Self {
            name: req.name,
            min_spend: req.min_spend,
            cashback_percent: req.cashback_percent,
            evaluation_period: req.evaluation_period,
            is_active: req.is_active,
        }
    }
}

/// 重排等级请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReorderTiersRequest {
    #[validate(length(min = 1, message = "至少需要一个等级"))]
    pub tier_ids: Vec<i64>,
}

/// 删除等级参数
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTierQuery {
    #[serde(default)]
    pub policy: DeletePolicy,
    pub operator: Option<String>,
}

// ==================== 客户 ====================

/// 手工指定等级请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignTierRequest {
    pub tier_id: i64,
    pub assignment_type: AssignmentType,
    pub expires_at: Option<DateTime<Utc>>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(min = 1, max = 100, message = "操作人不能为空"))]
    pub operator: String,
}

/// 重新评估请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReevaluateRequest {
    #[validate(length(min = 1, max = 100, message = "操作人不能为空"))]
    pub operator: String,
}

/// 对账请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub external_balance: Decimal,
    #[validate(length(min = 1, max = 100))]
    pub triggered_by: String,
}

/// 人工调整请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustBalanceRequest {
    #[validate(custom(function = "non_zero_amount", message = "调整金额不能为0"))]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 500, message = "调整原因不能为空"))]
    pub reason: String,
    #[validate(length(min = 1, max = 100, message = "操作人不能为空"))]
    pub operator: String,
}

/// 退款返还请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefundCreditRequest {
    #[validate(length(min = 1, max = 100, message = "退款单号不能为空"))]
    pub refund_id: String,
    #[validate(custom(function = "positive_amount", message = "退款金额必须大于0"))]
    pub amount: Decimal,
}

/// 历史余额导入请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImportBalanceRequest {
    #[validate(length(min = 1, max = 100))]
    pub reference: String,
    #[validate(custom(function = "positive_amount", message = "导入金额必须大于0"))]
    pub amount: Decimal,
}

/// 列表数量参数
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn limit_or(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default)
    }
}

/// 对账响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub in_sync: bool,
    pub delta: Decimal,
    pub balance: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction: Option<LedgerEntry>,
}

impl From<ReconcileOutcome> for ReconcileResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::InSync { balance } => Self {
                in_sync: true,
                delta: Decimal::ZERO,
                balance,
                correction: None,
            },
            ReconcileOutcome::Corrected { delta, entry } => Self {
                in_sync: false,
                delta,
                balance: entry.balance,
                correction: Some(entry),
            },
        }
    }
}

/// 流水写入响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerWriteResponse {
    /// false 表示同一引用已存在，返回的是原流水
    pub created: bool,
    pub entry: LedgerEntry,
}

impl From<AppendOutcome> for LedgerWriteResponse {
    fn from(outcome: AppendOutcome) -> Self {
        Self {
            created: outcome.is_new(),
            entry: outcome.into_entry(),
        }
    }
}

/// 等级变更响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierChangeResponse {
    pub tier_id: i64,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership: Option<CustomerMembership>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<TierChangeLog>,
}

impl From<TransitionOutcome> for TierChangeResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            tier_id: outcome.membership.tier_id,
            changed: true,
            membership: Some(outcome.membership),
            change: Some(outcome.log),
        }
    }
}

impl From<EvaluationOutcome> for TierChangeResponse {
    fn from(outcome: EvaluationOutcome) -> Self {
        match outcome {
            EvaluationOutcome::Transitioned(transition) => (*transition).into(),
            other => Self {
                tier_id: other.tier_id(),
                changed: false,
                membership: None,
                change: None,
            },
        }
    }
}

// ==================== 订单 ====================

/// 订单入账响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// CREATED、EXISTING 或 SKIPPED
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<CashbackTransaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_credit_debit: Option<LedgerEntry>,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Skipped(reason) => Self {
                outcome: "SKIPPED",
                skip_reason: Some(reason),
                transaction: None,
                store_credit_debit: None,
            },
            IngestOutcome::Recorded { outcome, debit } => Self {
                outcome: if outcome.is_created() { "CREATED" } else { "EXISTING" },
                skip_reason: None,
                transaction: Some(outcome.into_transaction()),
                store_credit_debit: debit,
            },
        }
    }
}

// ==================== 迁移 ====================

/// 启动迁移请求
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartMigrationRequest {
    pub created_at_min: Option<DateTime<Utc>>,
    pub created_at_max: Option<DateTime<Utc>>,
    pub financial_status: Option<String>,
    #[validate(range(min = 1, max = 250, message = "分页大小必须在1-250之间"))]
    pub page_size: Option<u32>,
}

impl From<StartMigrationRequest> for MigrationParams {
    fn from(req: StartMigrationRequest) -> Self {
        Self {
            created_at_min: req.created_at_min,
            created_at_max: req.created_at_max,
            financial_status: req.financial_status,
            page_size: req.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_tier_validation() {
        let req: CreateTierRequest = serde_json::from_value(serde_json::json!({
            "name": "Gold",
            "minSpend": "500",
            "cashbackPercent": "150"
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let req: CreateTierRequest = serde_json::from_value(serde_json::json!({
            "name": "Bronze",
            "cashbackPercent": "1.5"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        let tier = req.into_new_tier("demo.myshopify.com");
        assert_eq!(tier.min_spend, MinSpend::Floor);
        assert_eq!(tier.cashback_percent, dec!(1.5));
        assert!(tier.is_active);
    }

    #[test]
    fn test_adjust_rejects_zero() {
        let req = AdjustBalanceRequest {
            amount: Decimal::ZERO,
            reason: "goodwill".to_string(),
            operator: "ops".to_string(),
        };
        assert!(req.validate().is_err());
    }
}
