//! 集成测试公共工具
//!
//! 基于内存仓储装配完整引擎，订单源用内存分页实现替代

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use cashback_engine::external::OrderFeed;
use cashback_engine::repository::TierRepositoryTrait;
use cashback_engine::service::RecordRequest;
use cashback_engine::{
    Engine, EvaluationPeriod, FeedOrder, LedgerSource, MemoryStore, MinSpend, NewTier, OrderPage,
    OrderQuery, PaymentTransaction, Repositories, Result, Tier,
};
use cashback_shared::config::AppConfig;

pub const SHOP: &str = "demo.myshopify.com";

/// 按游标分页返回固定订单列表的订单源
#[derive(Default)]
pub struct PagedOrderFeed {
    orders: Vec<FeedOrder>,
    calls: AtomicUsize,
}

impl PagedOrderFeed {
    pub fn new(orders: Vec<FeedOrder>) -> Self {
        Self {
            orders,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderFeed for PagedOrderFeed {
    async fn fetch_page(&self, query: &OrderQuery) -> Result<OrderPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start: usize = query
            .cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let end = (start + query.page_size as usize).min(self.orders.len());
        let has_next_page = end < self.orders.len();
        Ok(OrderPage {
            orders: self.orders[start..end].to_vec(),
            has_next_page,
            end_cursor: has_next_page.then(|| end.to_string()),
        })
    }
}

pub fn build_engine(repositories: Repositories, feed: Arc<dyn OrderFeed>) -> Engine {
    Engine::new(repositories, AppConfig::default(), feed, None)
}

/// 内存仓储上的引擎
pub fn memory_engine() -> (Engine, MemoryStore) {
    let store = MemoryStore::new();
    let engine = build_engine(
        Repositories::in_memory(store.clone()),
        Arc::new(PagedOrderFeed::default()),
    );
    (engine, store)
}

pub fn new_tier(name: &str, min_spend: MinSpend, percent: Decimal) -> NewTier {
    NewTier {
        shop: SHOP.to_string(),
        name: name.to_string(),
        min_spend,
        cashback_percent: percent,
        evaluation_period: EvaluationPeriod::Lifetime,
        is_active: true,
    }
}

/// Bronze(基础, 1%) / Silver(500, 2%) / Gold(2000, 5%)
pub async fn seed_catalog(engine: &Engine) -> Vec<Tier> {
    use rust_decimal_macros::dec;

    let mut tiers = Vec::new();
    for tier in [
        new_tier("Bronze", MinSpend::Floor, dec!(1)),
        new_tier("Silver", MinSpend::AtLeast(dec!(500)), dec!(2)),
        new_tier("Gold", MinSpend::AtLeast(dec!(2000)), dec!(5)),
    ] {
        tiers.push(engine.catalog.create(tier).await.unwrap());
    }
    tiers
}

pub fn record_request(order_id: &str, customer_ref: &str, amount: Decimal) -> RecordRequest {
    RecordRequest {
        shop: SHOP.to_string(),
        order_id: order_id.to_string(),
        customer_ref: customer_ref.to_string(),
        order_amount: amount,
        eligible_amount: amount,
        rate_percent: None,
        currency: "USD".to_string(),
        ordered_at: Utc::now(),
        source: LedgerSource::OrderEvent,
    }
}

pub fn feed_order(id: &str, customer_ref: Option<&str>, total: Decimal, net: Option<Decimal>) -> FeedOrder {
    FeedOrder {
        id: id.to_string(),
        customer_ref: customer_ref.map(str::to_string),
        total_amount: total,
        net_payment: net,
        currency: "USD".to_string(),
        financial_status: Some("paid".to_string()),
        transactions: Vec::new(),
        created_at: Utc::now(),
    }
}

pub fn payment(gateway: &str, amount: Decimal) -> PaymentTransaction {
    PaymentTransaction {
        gateway: gateway.to_string(),
        amount,
        status: "success".to_string(),
    }
}

/// 生成 n 个已支付订单，客户在 customers 个之间轮换
pub fn paid_orders(n: usize, customers: usize, created_at: DateTime<Utc>) -> Vec<FeedOrder> {
    (1..=n)
        .map(|i| {
            let customer = format!("customer-{}", i % customers);
            let mut order = feed_order(
                &format!("order-{}", i),
                Some(&customer),
                Decimal::from(10),
                Some(Decimal::from(10)),
            );
            order.created_at = created_at;
            order
        })
        .collect()
}

/// 店铺等级的 level 序列
pub async fn levels(store: &MemoryStore) -> Vec<i32> {
    store
        .list_tiers(SHOP)
        .await
        .unwrap()
        .iter()
        .map(|t| t.level)
        .collect()
}
