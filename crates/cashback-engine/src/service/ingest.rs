//! 订单入账
//!
//! 实时订单事件和历史迁移共用的入口：支付分析 → 跳过判定 → 记录返现 → 储值抵扣流水。
//! 输入视为已通过签名校验的订单数据。

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use cashback_shared::config::PaymentConfig;

use crate::error::{LoyaltyError, Result};
use crate::models::{FeedOrder, LedgerSource};
use crate::service::dto::{IngestOutcome, RecordRequest, SkipReason};
use crate::service::ledger::LedgerService;
use crate::service::payment_analyzer::PaymentAnalyzer;
use crate::service::recorder::TransactionRecorder;

/// 订单入账服务
pub struct OrderIngestService {
    analyzer: PaymentAnalyzer,
    recorder: Arc<TransactionRecorder>,
    ledger: Arc<LedgerService>,
    paid_statuses: Vec<String>,
}

impl OrderIngestService {
    pub fn new(
        payment: &PaymentConfig,
        recorder: Arc<TransactionRecorder>,
        ledger: Arc<LedgerService>,
    ) -> Self {
        Self {
            analyzer: PaymentAnalyzer::new(payment),
            recorder,
            ledger,
            paid_statuses: payment.paid_statuses.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// 处理一个订单
    ///
    /// 游客订单、未结算订单、不可计返现状态的订单返回 Skipped，不视为错误
    #[instrument(skip(self, order), fields(shop = %shop, order_id = %order.id))]
    pub async fn ingest(&self, shop: &str, order: &FeedOrder, source: LedgerSource) -> Result<IngestOutcome> {
        let Some(customer_ref) = order
            .customer_ref
            .as_deref()
            .filter(|r| !r.trim().is_empty())
        else {
            debug!("订单无可归属客户，跳过");
            return Ok(IngestOutcome::Skipped(SkipReason::NoCustomer));
        };

        if let Some(status) = &order.financial_status
            && !self.paid_statuses.contains(&status.to_lowercase())
        {
            debug!(financial_status = %status, "订单财务状态不可计返现，跳过");
            return Ok(IngestOutcome::Skipped(SkipReason::NotPaid));
        }

        let breakdown = match self.analyzer.analyze_order(order) {
            Ok(b) => b,
            Err(LoyaltyError::NotYetEligible(_)) => {
                debug!("订单缺少支付净额，跳过");
                return Ok(IngestOutcome::Skipped(SkipReason::NotYetEligible));
            }
            Err(e) => return Err(e),
        };

        let outcome = self
            .recorder
            .record(RecordRequest {
                shop: shop.to_string(),
                order_id: order.id.clone(),
                customer_ref: customer_ref.to_string(),
                order_amount: breakdown.order_total,
                eligible_amount: breakdown.eligible_amount,
                rate_percent: None,
                currency: order.currency.clone(),
                ordered_at: order.created_at,
                source,
            })
            .await?;

        // 按订单号幂等，重放时返回已有流水
        let debit = if breakdown.store_credit_amount > Decimal::ZERO {
            let customer_id = outcome.transaction().customer_id;
            let appended = self
                .ledger
                .debit_order_payment(customer_id, breakdown.store_credit_amount, &order.id, source)
                .await?;
            Some(appended.into_entry())
        } else {
            None
        };

        Ok(IngestOutcome::Recorded { outcome, debit })
    }

    pub fn analyzer(&self) -> &PaymentAnalyzer {
        &self.analyzer
    }
}
