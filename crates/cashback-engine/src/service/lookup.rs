//! 客户查询
//!
//! 店面调用的只读视图，直接读取客户行上的缓存余额，不逐条汇总流水

use std::sync::Arc;

use tracing::instrument;

use crate::error::{LoyaltyError, Result};
use crate::models::Customer;
use crate::repository::{
    CustomerRepositoryTrait, LedgerRepositoryTrait, MembershipRepositoryTrait, TierRepositoryTrait,
    TransactionRepositoryTrait,
};
use crate::service::dto::{CustomerHistory, CustomerProjection};

/// 客户查询服务
pub struct CustomerLookupService {
    customers: Arc<dyn CustomerRepositoryTrait>,
    tiers: Arc<dyn TierRepositoryTrait>,
    memberships: Arc<dyn MembershipRepositoryTrait>,
    ledger: Arc<dyn LedgerRepositoryTrait>,
    transactions: Arc<dyn TransactionRepositoryTrait>,
}

impl CustomerLookupService {
    pub fn new(
        customers: Arc<dyn CustomerRepositoryTrait>,
        tiers: Arc<dyn TierRepositoryTrait>,
        memberships: Arc<dyn MembershipRepositoryTrait>,
        ledger: Arc<dyn LedgerRepositoryTrait>,
        transactions: Arc<dyn TransactionRepositoryTrait>,
    ) -> Self {
        Self {
            customers,
            tiers,
            memberships,
            ledger,
            transactions,
        }
    }

    /// 当前等级、返现比例、余额与累计返现
    #[instrument(skip(self))]
    pub async fn lookup(&self, shop: &str, customer_ref: &str) -> Result<CustomerProjection> {
        let customer = self.find(shop, customer_ref).await?;
        let membership = self.memberships.get_active_membership(customer.id).await?;
        let tier = match &membership {
            Some(m) => self.tiers.get_tier(m.tier_id).await?,
            None => None,
        };

        Ok(CustomerProjection {
            shop: customer.shop,
            customer_ref: customer.external_customer_id,
            tier_id: tier.as_ref().map(|t| t.id),
            tier_name: tier.as_ref().map(|t| t.name.clone()),
            tier_level: tier.as_ref().map(|t| t.level),
            cashback_percent: tier.as_ref().map(|t| t.cashback_percent),
            assignment_type: membership.as_ref().map(|m| m.assignment_type),
            tier_expires_at: membership.and_then(|m| m.expires_at),
            store_credit: customer.store_credit.round_dp(2),
            total_earned: customer.total_earned.round_dp(2),
        })
    }

    /// 最近的流水、会员期、等级变更与交易
    pub async fn history(&self, shop: &str, customer_ref: &str, limit: i64) -> Result<CustomerHistory> {
        let customer = self.find(shop, customer_ref).await?;
        let limit = limit.clamp(1, 500);
        Ok(CustomerHistory {
            ledger: self.ledger.list_entries(customer.id, limit).await?,
            memberships: self.memberships.list_memberships(customer.id).await?,
            tier_changes: self.memberships.list_change_logs(customer.id).await?,
            transactions: self.transactions.list_by_customer(customer.id, limit).await?,
        })
    }

    async fn find(&self, shop: &str, customer_ref: &str) -> Result<Customer> {
        self.customers
            .find_customer(shop, customer_ref)
            .await?
            .ok_or_else(|| LoyaltyError::CustomerNotFound {
                shop: shop.to_string(),
                customer_ref: customer_ref.to_string(),
            })
    }
}
