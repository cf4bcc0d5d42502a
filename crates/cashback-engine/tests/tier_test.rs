//! 等级目录与等级评估集成测试

mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use cashback_engine::service::{DeletePolicy, EvaluationOutcome, ManualAssignment};
use cashback_engine::{
    AssignmentType, EvaluationPeriod, LoyaltyError, MinSpend, TierChangeType, TierUpdate,
    levels_are_contiguous,
};

use common::{SHOP, levels, memory_engine, new_tier, record_request, seed_catalog};

#[tokio::test]
async fn test_new_tiers_append_levels() {
    let (engine, store) = memory_engine();
    let tiers = seed_catalog(&engine).await;

    assert_eq!(tiers.iter().map(|t| t.level).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(levels(&store).await, vec![1, 2, 3]);

    let resolved = engine.catalog.resolve(SHOP, dec!(750)).await.unwrap();
    assert_eq!(resolved.name, "Silver");
    let resolved = engine.catalog.resolve(SHOP, dec!(0)).await.unwrap();
    assert_eq!(resolved.name, "Bronze");
}

#[tokio::test]
async fn test_catalog_rejects_inconsistent_changes() {
    let (engine, _store) = memory_engine();
    let tiers = seed_catalog(&engine).await;

    // 门槛低于上一级
    let err = engine
        .catalog
        .create(new_tier("Platinum", MinSpend::AtLeast(dec!(100)), dec!(8)))
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::InvalidTierOrder(_)));

    let err = engine
        .catalog
        .create(new_tier("Base", MinSpend::Floor, dec!(0.5)))
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::DuplicateFloorTier(_)));

    let err = engine
        .catalog
        .create(new_tier("Diamond", MinSpend::AtLeast(dec!(9000)), dec!(101)))
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::Validation(_)));

    let update = TierUpdate {
        min_spend: Some(MinSpend::AtLeast(dec!(5000))),
        ..TierUpdate::default()
    };
    assert!(engine.catalog.update(tiers[1].id, update).await.is_err());

    // 基础等级不能排到后面
    let reversed: Vec<i64> = tiers.iter().rev().map(|t| t.id).collect();
    assert!(matches!(
        engine.catalog.reorder(SHOP, &reversed).await,
        Err(LoyaltyError::InvalidTierOrder(_))
    ));
    let partial = [tiers[0].id, tiers[1].id];
    assert!(engine.catalog.reorder(SHOP, &partial).await.is_err());

    let unchanged = engine.catalog.list(SHOP).await.unwrap();
    assert_eq!(unchanged, tiers);
}

#[tokio::test]
async fn test_delete_middle_tier_keeps_levels_contiguous() {
    let (engine, store) = memory_engine();
    let tiers = seed_catalog(&engine).await;

    let remaining = engine
        .catalog
        .delete(tiers[1].id, DeletePolicy::Reject, "ops")
        .await
        .unwrap();

    assert_eq!(remaining.len(), 2);
    assert_eq!(levels(&store).await, vec![1, 2]);
    let gold = remaining.iter().find(|t| t.name == "Gold").unwrap();
    assert_eq!(gold.level, 2);
}

#[tokio::test]
async fn test_levels_stay_contiguous_across_catalog_edits() {
    let (engine, _store) = memory_engine();
    let mut tiers = seed_catalog(&engine).await;
    let platinum = engine
        .catalog
        .create(new_tier("Platinum", MinSpend::AtLeast(dec!(5000)), dec!(8)))
        .await
        .unwrap();
    tiers.push(platinum);
    assert!(levels_are_contiguous(&engine.catalog.list(SHOP).await.unwrap()));

    // 删除最低的非基础等级，再删除最高等级
    engine.catalog.delete(tiers[1].id, DeletePolicy::Reject, "ops").await.unwrap();
    assert!(levels_are_contiguous(&engine.catalog.list(SHOP).await.unwrap()));
    engine.catalog.delete(tiers[3].id, DeletePolicy::Reject, "ops").await.unwrap();
    let current = engine.catalog.list(SHOP).await.unwrap();
    assert!(levels_are_contiguous(&current));
    assert_eq!(current.len(), 2);

    let diamond = engine
        .catalog
        .create(new_tier("Diamond", MinSpend::AtLeast(dec!(9000)), dec!(10)))
        .await
        .unwrap();
    assert_eq!(diamond.level, 3);

    let order: Vec<i64> = engine.catalog.list(SHOP).await.unwrap().iter().map(|t| t.id).collect();
    let reordered = engine.catalog.reorder(SHOP, &order).await.unwrap();
    assert!(levels_are_contiguous(&reordered));
    let names: Vec<&str> = reordered.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Bronze", "Gold", "Diamond"]);
}

#[tokio::test]
async fn test_delete_with_members_requires_migration_policy() {
    let (engine, store) = memory_engine();
    let tiers = seed_catalog(&engine).await;
    let silver = &tiers[1];

    engine.recorder.record(record_request("order-1", "c-1", dec!(600))).await.unwrap();
    engine.recorder.record(record_request("order-2", "c-2", dec!(50))).await.unwrap();
    let projection = engine.lookup.lookup(SHOP, "c-1").await.unwrap();
    assert_eq!(projection.tier_id, Some(silver.id));

    let err = engine
        .catalog
        .delete(silver.id, DeletePolicy::Reject, "ops")
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::TierHasActiveMembers { members: 1, .. }));

    let remaining = engine
        .catalog
        .delete(silver.id, DeletePolicy::MigrateMembers, "ops")
        .await
        .unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(levels(&store).await, vec![1, 2]);

    let projection = engine.lookup.lookup(SHOP, "c-1").await.unwrap();
    assert_eq!(projection.tier_name.as_deref(), Some("Bronze"));

    let history = engine.lookup.history(SHOP, "c-1", 50).await.unwrap();
    let last = history
        .tier_changes
        .iter()
        .max_by_key(|l| l.id)
        .unwrap();
    assert_eq!(last.change_type, TierChangeType::TierDeletedMigration);
    assert_eq!(last.triggered_by, "ops");

    // 被删等级的会员期关闭，迁入等级成为唯一生效的一段
    assert!(history.memberships.len() >= 2);
    let open: Vec<_> = history.memberships.iter().filter(|m| m.is_active).collect();
    assert_eq!(open.len(), 1);
    assert_eq!(Some(open[0].tier_id), projection.tier_id);
    assert!(history
        .memberships
        .iter()
        .any(|m| m.tier_id == silver.id && !m.is_active && m.end_date.is_some()));

    let active: Vec<_> = store
        .membership_snapshot()
        .into_iter()
        .filter(|m| m.is_active)
        .collect();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|m| m.tier_id != silver.id));
}

#[tokio::test]
async fn test_rolling_window_downgrade() {
    let (engine, store) = memory_engine();
    engine
        .catalog
        .create(new_tier("Bronze", MinSpend::Floor, dec!(1)))
        .await
        .unwrap();
    let mut silver = new_tier("Silver", MinSpend::AtLeast(dec!(500)), dec!(2));
    silver.evaluation_period = EvaluationPeriod::RollingAnnual;
    let silver = engine.catalog.create(silver).await.unwrap();

    engine.recorder.record(record_request("order-1", "c-1", dec!(600))).await.unwrap();
    let customer = engine.ledger.resolve_customer(SHOP, "c-1").await.unwrap();
    assert_eq!(engine.lookup.lookup(SHOP, "c-1").await.unwrap().tier_id, Some(silver.id));

    store.set_ordered_at(SHOP, "order-1", Utc::now() - Duration::days(400));
    let outcome = engine.evaluator.evaluate(customer.id, "test").await.unwrap();

    let EvaluationOutcome::Transitioned(transition) = outcome else {
        panic!("消费移出窗口后应降级");
    };
    assert_eq!(transition.log.change_type, TierChangeType::AutoDowngrade);
    assert_eq!(transition.log.from_tier_id, Some(silver.id));
}

#[tokio::test]
async fn test_manual_override_survives_until_expiry() {
    let (engine, store) = memory_engine();
    let tiers = seed_catalog(&engine).await;
    let gold = &tiers[2];

    engine.recorder.record(record_request("order-1", "c-1", dec!(10))).await.unwrap();
    let customer = engine.ledger.resolve_customer(SHOP, "c-1").await.unwrap();

    let assignment = ManualAssignment {
        customer_id: customer.id,
        tier_id: gold.id,
        assignment_type: AssignmentType::Promotional,
        expires_at: Some(Utc::now() + Duration::days(30)),
        reason: Some("spring campaign".to_string()),
        operator: "ops@demo".to_string(),
    };
    let outcome = engine.evaluator.assign_tier(&assignment).await.unwrap();
    assert_eq!(outcome.log.change_type, TierChangeType::ManualOverride);

    // 新订单按 Gold 比例，自动评估不改等级
    let next = engine
        .recorder
        .record(record_request("order-2", "c-1", dec!(100)))
        .await
        .unwrap();
    assert_eq!(next.transaction().cashback_percent, dec!(5));
    let evaluated = engine.evaluator.evaluate(customer.id, "test").await.unwrap();
    assert!(matches!(evaluated, EvaluationOutcome::Skipped { tier_id, .. } if tier_id == gold.id));

    // 到期后由维护任务回退
    store.set_membership_expiry(customer.id, Utc::now() - Duration::minutes(1));
    let report = engine.maintenance_worker().run_once().await;
    assert_eq!(report.reverted, 1);

    let projection = engine.lookup.lookup(SHOP, "c-1").await.unwrap();
    assert_eq!(projection.tier_name.as_deref(), Some("Bronze"));
    assert_eq!(projection.assignment_type, Some(AssignmentType::Automatic));

    let history = engine.lookup.history(SHOP, "c-1", 50).await.unwrap();
    assert!(history
        .tier_changes
        .iter()
        .any(|l| l.change_type == TierChangeType::ExpirationRevert));
}

#[tokio::test]
async fn test_explicit_reevaluation_clears_override() {
    let (engine, _store) = memory_engine();
    let tiers = seed_catalog(&engine).await;

    engine.recorder.record(record_request("order-1", "c-1", dec!(700))).await.unwrap();
    let customer = engine.ledger.resolve_customer(SHOP, "c-1").await.unwrap();
    engine
        .evaluator
        .assign_tier(&ManualAssignment {
            customer_id: customer.id,
            tier_id: tiers[0].id,
            assignment_type: AssignmentType::Manual,
            expires_at: None,
            reason: None,
            operator: "ops".to_string(),
        })
        .await
        .unwrap();

    let outcome = engine.evaluator.reevaluate(customer.id, "ops").await.unwrap();
    assert!(outcome.is_transitioned());
    assert_eq!(outcome.tier_id(), tiers[1].id);
}

#[tokio::test]
async fn test_assignment_rejects_invalid_input() {
    let (engine, _store) = memory_engine();
    let tiers = seed_catalog(&engine).await;
    engine.recorder.record(record_request("order-1", "c-1", dec!(10))).await.unwrap();
    let customer = engine.ledger.resolve_customer(SHOP, "c-1").await.unwrap();

    let base = ManualAssignment {
        customer_id: customer.id,
        tier_id: tiers[2].id,
        assignment_type: AssignmentType::Manual,
        expires_at: None,
        reason: None,
        operator: "ops".to_string(),
    };

    let automatic = ManualAssignment {
        assignment_type: AssignmentType::Automatic,
        ..base.clone()
    };
    assert!(engine.evaluator.assign_tier(&automatic).await.is_err());

    let past = ManualAssignment {
        expires_at: Some(Utc::now() - Duration::hours(1)),
        ..base.clone()
    };
    assert!(engine.evaluator.assign_tier(&past).await.is_err());

    let unknown = ManualAssignment {
        tier_id: 9_999,
        ..base
    };
    assert!(matches!(
        engine.evaluator.assign_tier(&unknown).await,
        Err(LoyaltyError::TierNotFound(9_999))
    ));
}
