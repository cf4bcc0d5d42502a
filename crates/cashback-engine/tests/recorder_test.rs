//! 返现记录与订单入账集成测试

mod common;

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use cashback_engine::service::{IngestOutcome, SkipReason};
use cashback_engine::{LedgerEntryType, LedgerSource, LoyaltyError, TierChangeType};

use common::{
    SHOP, feed_order, memory_engine, payment, record_request, seed_catalog,
};

#[tokio::test]
async fn test_record_is_idempotent_per_order() {
    let (engine, store) = memory_engine();
    seed_catalog(&engine).await;

    let mut request = record_request("order-50", "c-1", dec!(50));
    request.rate_percent = Some(dec!(2));

    let first = engine.recorder.record(request.clone()).await.unwrap();
    let replay = engine.recorder.record(request).await.unwrap();

    assert!(first.is_created());
    assert!(!replay.is_created());
    assert_eq!(first.transaction().id, replay.transaction().id);
    assert_eq!(first.transaction().cashback_amount, dec!(1.00));
    assert_eq!(store.transaction_snapshot().len(), 1);

    let earned: Vec<_> = store
        .ledger_snapshot()
        .into_iter()
        .filter(|e| e.entry_type == LedgerEntryType::Earned)
        .collect();
    assert_eq!(earned.len(), 1);
    assert_eq!(earned[0].amount, dec!(1.00));
}

#[tokio::test]
async fn test_upgrade_applies_to_next_order_only() {
    let (engine, _store) = memory_engine();
    let tiers = seed_catalog(&engine).await;
    let (bronze, silver) = (&tiers[0], &tiers[1]);

    let first = engine
        .recorder
        .record(record_request("order-1", "c-1", dec!(300)))
        .await
        .unwrap();
    assert_eq!(first.transaction().cashback_percent, dec!(1));
    assert_eq!(first.transaction().tier_id, Some(bronze.id));

    // 跨过 500 门槛的这一笔仍按原等级计算
    let crossing = engine
        .recorder
        .record(record_request("order-2", "c-1", dec!(250)))
        .await
        .unwrap();
    assert_eq!(crossing.transaction().cashback_percent, dec!(1));
    assert_eq!(crossing.transaction().cashback_amount, dec!(2.50));

    let customer = engine.ledger.resolve_customer(SHOP, "c-1").await.unwrap();
    let membership = engine
        .evaluator
        .current_membership(customer.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(membership.tier_id, silver.id);

    let next = engine
        .recorder
        .record(record_request("order-3", "c-1", dec!(100)))
        .await
        .unwrap();
    assert_eq!(next.transaction().cashback_percent, dec!(2));
    assert_eq!(next.transaction().cashback_amount, dec!(2.00));

    let history = engine.lookup.history(SHOP, "c-1", 50).await.unwrap();
    let change_types: Vec<_> = history.tier_changes.iter().map(|l| l.change_type).collect();
    assert!(change_types.contains(&TierChangeType::InitialAssignment));
    assert!(change_types.contains(&TierChangeType::AutoUpgrade));
}

#[tokio::test]
async fn test_concurrent_orders_keep_single_active_membership() {
    let (engine, store) = memory_engine();
    seed_catalog(&engine).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .recorder
                .record(record_request(&format!("order-{}", i), "c-1", dec!(150)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let customer = engine.ledger.resolve_customer(SHOP, "c-1").await.unwrap();
    let active = store
        .membership_snapshot()
        .into_iter()
        .filter(|m| m.customer_id == customer.id && m.is_active)
        .count();
    assert_eq!(active, 1);
    assert_eq!(store.transaction_snapshot().len(), 20);

    // 3000 消费在补偿队列处理后应落到 Gold
    engine.retry_queue.drain(&engine.evaluator).await;
    engine.evaluator.evaluate(customer.id, "test").await.unwrap();
    let projection = engine.lookup.lookup(SHOP, "c-1").await.unwrap();
    assert_eq!(projection.tier_name.as_deref(), Some("Gold"));
}

#[tokio::test]
async fn test_record_without_catalog_requires_rate() {
    let (engine, _store) = memory_engine();

    let err = engine
        .recorder
        .record(record_request("order-1", "c-1", dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::EmptyCatalog(_)));

    let mut request = record_request("order-1", "c-1", dec!(10));
    request.rate_percent = Some(dec!(3));
    let outcome = engine.recorder.record(request).await.unwrap();
    assert_eq!(outcome.transaction().cashback_amount, dec!(0.30));
    assert_eq!(outcome.transaction().tier_id, None);
}

#[tokio::test]
async fn test_record_rejects_invalid_amounts() {
    let (engine, _store) = memory_engine();
    seed_catalog(&engine).await;

    let mut over = record_request("order-1", "c-1", dec!(10));
    over.eligible_amount = dec!(11);
    assert!(matches!(
        engine.recorder.record(over).await,
        Err(LoyaltyError::Validation(_))
    ));

    let anonymous = record_request("order-2", "", dec!(10));
    assert!(matches!(
        engine.recorder.record(anonymous).await,
        Err(LoyaltyError::MissingCustomer(_))
    ));
}

#[tokio::test]
async fn test_ingest_excludes_gift_card_payment() {
    let (engine, _store) = memory_engine();
    seed_catalog(&engine).await;

    let mut order = feed_order("order-100", Some("c-1"), dec!(100.00), Some(dec!(80.00)));
    order.transactions = vec![
        payment("shopify_payments", dec!(80.00)),
        payment("gift_card", dec!(20.00)),
    ];

    let outcome = engine
        .ingest
        .ingest(SHOP, &order, LedgerSource::OrderEvent)
        .await
        .unwrap();
    let IngestOutcome::Recorded { outcome, debit } = outcome else {
        panic!("已支付订单应入账");
    };
    let transaction = outcome.transaction();
    assert_eq!(transaction.order_amount, dec!(100.00));
    assert_eq!(transaction.eligible_amount, dec!(80.00));
    assert_eq!(transaction.cashback_amount, dec!(0.80));
    assert!(debit.is_none());
}

#[tokio::test]
async fn test_ingest_debits_store_credit_once() {
    let (engine, store) = memory_engine();
    seed_catalog(&engine).await;
    engine.recorder.record(record_request("order-1", "c-1", dec!(400))).await.unwrap();

    let mut order = feed_order("order-2", Some("c-1"), dec!(50), Some(dec!(47)));
    order.transactions = vec![payment("shopify_store_credit", dec!(3))];

    for _ in 0..2 {
        engine
            .ingest
            .ingest(SHOP, &order, LedgerSource::OrderEvent)
            .await
            .unwrap();
    }

    let debits: Vec<_> = store
        .ledger_snapshot()
        .into_iter()
        .filter(|e| e.entry_type == LedgerEntryType::OrderPaymentDebit)
        .collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, dec!(-3));
    // 4.00 + 0.47 - 3
    let projection = engine.lookup.lookup(SHOP, "c-1").await.unwrap();
    assert_eq!(projection.store_credit, dec!(1.47));
}

#[tokio::test]
async fn test_ingest_skips_ineligible_orders() {
    let (engine, store) = memory_engine();
    seed_catalog(&engine).await;

    let guest = feed_order("order-1", None, dec!(10), Some(dec!(10)));
    let pending = feed_order("order-2", Some("c-1"), dec!(10), None);
    let mut voided = feed_order("order-3", Some("c-1"), dec!(10), Some(dec!(10)));
    voided.financial_status = Some("voided".to_string());

    let cases = [
        (guest, SkipReason::NoCustomer),
        (pending, SkipReason::NotYetEligible),
        (voided, SkipReason::NotPaid),
    ];
    for (order, reason) in cases {
        let outcome = engine
            .ingest
            .ingest(SHOP, &order, LedgerSource::OrderEvent)
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Skipped(r) if r == reason));
    }
    assert!(store.transaction_snapshot().is_empty());
    assert_eq!(Decimal::ZERO, store.ledger_snapshot().iter().map(|e| e.amount).sum::<Decimal>());
}
