//! 订单支付分析
//!
//! 从订单的支付明细推导可计返现金额：
//! - 可计返现金额 = 现金等价支付净额，限制在 [0, 订单总额] 内
//! - 非现金部分 = 订单总额 - 可计返现金额，按网关名称拆出礼品卡
//! - 无法归类的剩余部分归为储值抵扣，下限为 0，吸收舍入误差

use rust_decimal::Decimal;
use serde::Serialize;

use cashback_shared::config::PaymentConfig;

use crate::error::{LoyaltyError, Result};
use crate::models::{FeedOrder, PaymentTransaction};

/// 支付拆分结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBreakdown {
    pub order_total: Decimal,
    /// 可计返现金额
    pub eligible_amount: Decimal,
    /// 非现金支付合计
    pub non_cash_amount: Decimal,
    pub gift_card_amount: Decimal,
    /// 储值抵扣（含无法归类的剩余部分）
    pub store_credit_amount: Decimal,
    /// 储值抵扣中未被储值网关明确识别的部分
    pub unclassified_amount: Decimal,
}

/// 订单支付分析器
#[derive(Debug, Clone)]
pub struct PaymentAnalyzer {
    gift_card_gateways: Vec<String>,
    store_credit_gateways: Vec<String>,
    settled_statuses: Vec<String>,
}

impl Default for PaymentAnalyzer {
    fn default() -> Self {
        Self::new(&PaymentConfig::default())
    }
}

impl PaymentAnalyzer {
    pub fn new(config: &PaymentConfig) -> Self {
        let lower = |names: &[String]| names.iter().map(|n| n.to_lowercase()).collect();
        Self {
            gift_card_gateways: lower(&config.gift_card_gateways),
            store_credit_gateways: lower(&config.store_credit_gateways),
            settled_statuses: lower(&config.settled_statuses),
        }
    }

    /// 分析外部订单
    ///
    /// 净额缺失时返回 [`LoyaltyError::NotYetEligible`]，调用方应跳过该订单而不是中断流程
    pub fn analyze_order(&self, order: &FeedOrder) -> Result<PaymentBreakdown> {
        let net_payment = order
            .net_payment
            .ok_or_else(|| LoyaltyError::NotYetEligible(order.id.clone()))?;
        Ok(self.analyze(order.total_amount, net_payment, &order.transactions))
    }

    /// 按金额拆分
    pub fn analyze(
        &self,
        order_total: Decimal,
        net_payment: Decimal,
        transactions: &[PaymentTransaction],
    ) -> PaymentBreakdown {
        let order_total = order_total.max(Decimal::ZERO);
        let eligible_amount = net_payment.max(Decimal::ZERO).min(order_total);
        let non_cash_amount = order_total - eligible_amount;

        let gift_card_amount = self
            .settled_total(transactions, &self.gift_card_gateways)
            .min(non_cash_amount);
        let store_credit_amount = (non_cash_amount - gift_card_amount).max(Decimal::ZERO);
        let identified_store_credit = self
            .settled_total(transactions, &self.store_credit_gateways)
            .min(store_credit_amount);

        PaymentBreakdown {
            order_total,
            eligible_amount,
            non_cash_amount,
            gift_card_amount,
            store_credit_amount,
            unclassified_amount: store_credit_amount - identified_store_credit,
        }
    }

    /// 已结算且网关属于指定类别的支付金额之和
    fn settled_total(&self, transactions: &[PaymentTransaction], gateways: &[String]) -> Decimal {
        transactions
            .iter()
            .filter(|t| {
                let gateway = t.gateway.to_lowercase();
                let status = t.status.to_lowercase();
                gateways.contains(&gateway) && self.settled_statuses.contains(&status)
            })
            .map(|t| t.amount.max(Decimal::ZERO))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn txn(gateway: &str, amount: Decimal, status: &str) -> PaymentTransaction {
        PaymentTransaction {
            gateway: gateway.to_string(),
            amount,
            status: status.to_string(),
        }
    }

    #[test]
    fn test_gift_card_split() {
        let analyzer = PaymentAnalyzer::default();
        let result = analyzer.analyze(
            dec!(100.00),
            dec!(80.00),
            &[txn("shopify_payments", dec!(80), "success"), txn("gift_card", dec!(20.00), "success")],
        );

        assert_eq!(result.eligible_amount, dec!(80.00));
        assert_eq!(result.gift_card_amount, dec!(20.00));
        assert_eq!(result.store_credit_amount, Decimal::ZERO);
        assert_eq!(result.unclassified_amount, Decimal::ZERO);
    }

    #[test]
    fn test_all_non_cash_order_is_zero_eligible() {
        let analyzer = PaymentAnalyzer::default();
        let result = analyzer.analyze(dec!(60), dec!(0), &[txn("gift_card", dec!(60), "success")]);
        assert_eq!(result.eligible_amount, Decimal::ZERO);
        assert_eq!(result.gift_card_amount, dec!(60));
    }

    #[test]
    fn test_unclassified_remainder_goes_to_store_credit() {
        let analyzer = PaymentAnalyzer::default();
        let result = analyzer.analyze(
            dec!(100),
            dec!(70),
            &[
                txn("gift_card", dec!(10), "success"),
                txn("shopify_store_credit", dec!(15), "success"),
            ],
        );
        assert_eq!(result.eligible_amount, dec!(70));
        assert_eq!(result.gift_card_amount, dec!(10));
        assert_eq!(result.store_credit_amount, dec!(20));
        assert_eq!(result.unclassified_amount, dec!(5));
    }

    #[test]
    fn test_unsettled_gift_card_is_ignored() {
        let analyzer = PaymentAnalyzer::default();
        let result = analyzer.analyze(dec!(50), dec!(30), &[txn("gift_card", dec!(20), "failure")]);
        assert_eq!(result.gift_card_amount, Decimal::ZERO);
        assert_eq!(result.store_credit_amount, dec!(20));
    }

    #[test]
    fn test_eligible_amount_is_bounded() {
        let analyzer = PaymentAnalyzer::default();
        let cases = [
            (dec!(100), dec!(150)),
            (dec!(100), dec!(-5)),
            (dec!(-10), dec!(5)),
            (dec!(0), dec!(0)),
            (dec!(19.99), dec!(19.99)),
        ];
        for (total, net) in cases {
            let result = analyzer.analyze(total, net, &[txn("gift_card", dec!(500), "success")]);
            assert!(result.eligible_amount >= Decimal::ZERO);
            assert!(result.eligible_amount <= result.order_total);
            assert!(result.gift_card_amount <= result.non_cash_amount);
            assert!(result.store_credit_amount >= Decimal::ZERO);
        }
    }

    #[test]
    fn test_missing_net_payment_is_not_yet_eligible() {
        let analyzer = PaymentAnalyzer::default();
        let order = FeedOrder {
            id: "1001".to_string(),
            customer_ref: Some("c-1".to_string()),
            total_amount: dec!(10),
            net_payment: None,
            currency: "USD".to_string(),
            financial_status: Some("pending".to_string()),
            transactions: vec![],
            created_at: Utc::now(),
        };
        let err = analyzer.analyze_order(&order).unwrap_err();
        assert!(matches!(err, LoyaltyError::NotYetEligible(id) if id == "1001"));
    }

    #[test]
    fn test_gateway_matching_is_case_insensitive() {
        let analyzer = PaymentAnalyzer::default();
        let result = analyzer.analyze(dec!(40), dec!(30), &[txn("Gift_Card", dec!(10), "SUCCESS")]);
        assert_eq!(result.gift_card_amount, dec!(10));
    }
}
