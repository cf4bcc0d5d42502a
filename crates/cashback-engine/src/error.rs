//! 返现引擎错误类型
//!
//! 定义服务层的业务错误和系统错误

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use cashback_shared::error::SharedError;

/// 返现引擎错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // === 输入拒绝 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("订单尚不可计算返现: order_id={0}")]
    NotYetEligible(String),

    #[error("订单缺少可归属的客户: order_id={0}")]
    MissingCustomer(String),

    // === 查询未命中 ===
    #[error("客户不存在: shop={shop}, customer={customer_ref}")]
    CustomerNotFound { shop: String, customer_ref: String },

    #[error("等级不存在: {0}")]
    TierNotFound(i64),

    #[error("返现交易不存在: shop={shop}, order_id={order_id}")]
    TransactionNotFound { shop: String, order_id: String },

    #[error("迁移任务不存在: {0}")]
    MigrationJobNotFound(Uuid),

    // === 等级目录一致性 ===
    #[error("等级仍有 {members} 个活跃会员，无法删除: tier_id={tier_id}")]
    TierHasActiveMembers { tier_id: i64, members: i64 },

    #[error("等级名称已存在: {0}")]
    DuplicateTierName(String),

    #[error("店铺已存在基础等级: shop={0}")]
    DuplicateFloorTier(String),

    #[error("等级顺序无效: {0}")]
    InvalidTierOrder(String),

    #[error("店铺未配置任何可用等级: shop={0}")]
    EmptyCatalog(String),

    // === 状态机 ===
    #[error("迁移任务状态不允许此操作: job_id={job_id}, current_status={current_status}")]
    InvalidJobTransition { job_id: Uuid, current_status: String },

    // === 外部系统 ===
    #[error("订单源错误: {0}")]
    OrderFeed(String),

    #[error("储值发放失败: {0}")]
    CreditIssuance(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,
}

/// 返现引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl LoyaltyError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::OrderFeed(_) | Self::CreditIssuance(_) | Self::ConcurrencyConflict
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Internal(_)
                | Self::OrderFeed(_)
                | Self::CreditIssuance(_)
                | Self::ConcurrencyConflict
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotYetEligible(_) => "NOT_YET_ELIGIBLE",
            Self::MissingCustomer(_) => "MISSING_CUSTOMER",
            Self::CustomerNotFound { .. } => "CUSTOMER_NOT_FOUND",
            Self::TierNotFound(_) => "TIER_NOT_FOUND",
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::MigrationJobNotFound(_) => "MIGRATION_JOB_NOT_FOUND",
            Self::TierHasActiveMembers { .. } => "TIER_HAS_ACTIVE_MEMBERS",
            Self::DuplicateTierName(_) => "DUPLICATE_TIER_NAME",
            Self::DuplicateFloorTier(_) => "DUPLICATE_FLOOR_TIER",
            Self::InvalidTierOrder(_) => "INVALID_TIER_ORDER",
            Self::EmptyCatalog(_) => "EMPTY_CATALOG",
            Self::InvalidJobTransition { .. } => "INVALID_JOB_TRANSITION",
            Self::OrderFeed(_) => "ORDER_FEED_ERROR",
            Self::CreditIssuance(_) => "CREDIT_ISSUANCE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
        }
    }

    /// 金额校验辅助
    pub(crate) fn non_negative(field: &str, value: Decimal) -> Result<()> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(Self::Validation(format!("{} 不能为负数: {}", field, value)));
        }
        Ok(())
    }
}

/// 从基础设施错误转换
impl From<SharedError> for LoyaltyError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::Database(e) => Self::Database(e),
            SharedError::ExternalService { service, message } => {
                Self::OrderFeed(format!("{}: {}", service, message))
            }
            SharedError::ExternalServiceTimeout { service } => {
                Self::OrderFeed(format!("{} 请求超时", service))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}
