//! 外部订单源数据结构
//!
//! 订单源按游标分页返回订单，字段与电商平台的订单接口对应

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 订单上的单笔支付记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    /// 支付网关名称（如 gift_card、shopify_payments）
    pub gateway: String,
    pub amount: Decimal,
    /// 支付状态（如 success、failure、pending）
    pub status: String,
}

/// 订单源返回的订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedOrder {
    pub id: String,
    /// 下单客户，游客订单为空
    pub customer_ref: Option<String>,
    pub total_amount: Decimal,
    /// 现金等价支付净额，订单尚未结算时为空
    pub net_payment: Option<Decimal>,
    pub currency: String,
    #[serde(default)]
    pub financial_status: Option<String>,
    #[serde(default)]
    pub transactions: Vec<PaymentTransaction>,
    pub created_at: DateTime<Utc>,
}

/// 订单分页查询条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderQuery {
    pub shop: String,
    pub created_at_min: Option<DateTime<Utc>>,
    pub created_at_max: Option<DateTime<Utc>>,
    pub financial_status: Option<String>,
    pub page_size: u32,
    /// 上一页返回的游标，首页为空
    pub cursor: Option<String>,
}

/// 一页订单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<FeedOrder>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}
