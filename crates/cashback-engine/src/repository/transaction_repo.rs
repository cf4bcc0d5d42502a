//! 返现交易仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use super::ledger_repo::PgLedgerRepository;
use super::traits::TransactionRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    AppendOutcome, CashbackTransaction, LedgerEntryType, NewCashbackTransaction, NewLedgerEntry,
    RecordOutcome, TransactionStatus,
};

const TRANSACTION_COLUMNS: &str = "id, shop, order_id, customer_id, order_amount, eligible_amount, \
                                   cashback_amount, cashback_percent, currency, tier_id, status, \
                                   sync_error, ordered_at, created_at, updated_at";

/// 返现交易仓储（PostgreSQL）
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepositoryTrait for PgTransactionRepository {
    async fn find_transaction(
        &self,
        shop: &str,
        order_id: &str,
    ) -> Result<Option<CashbackTransaction>> {
        let sql = format!(
            "SELECT {} FROM cashback_transactions WHERE shop = $1 AND order_id = $2",
            TRANSACTION_COLUMNS
        );
        let transaction = sqlx::query_as::<_, CashbackTransaction>(&sql)
            .bind(shop)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(transaction)
    }

    async fn record_with_ledger(&self, new: &NewCashbackTransaction) -> Result<RecordOutcome> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO cashback_transactions
                (shop, order_id, customer_id, order_amount, eligible_amount, cashback_amount,
                 cashback_percent, currency, tier_id, status, ordered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (shop, order_id) DO NOTHING
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );
        let inserted = sqlx::query_as::<_, CashbackTransaction>(&sql)
            .bind(&new.shop)
            .bind(&new.order_id)
            .bind(new.customer_id)
            .bind(new.order_amount)
            .bind(new.eligible_amount)
            .bind(new.cashback_amount)
            .bind(new.cashback_percent)
            .bind(&new.currency)
            .bind(new.tier_id)
            .bind(TransactionStatus::Completed)
            .bind(new.ordered_at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(transaction) = inserted else {
            tx.rollback().await?;
            let existing = self
                .find_transaction(&new.shop, &new.order_id)
                .await?
                .ok_or_else(|| LoyaltyError::Internal("交易插入冲突后未查到记录".to_string()))?;
            return Ok(RecordOutcome::Existing(existing));
        };

        let entry = if new.cashback_amount > Decimal::ZERO {
            let entry = NewLedgerEntry::new(
                new.customer_id,
                new.cashback_amount,
                LedgerEntryType::Earned,
                new.source,
            )
            .with_reference(new.order_id.clone());
            match PgLedgerRepository::append_in_tx(&mut tx, &entry).await? {
                AppendOutcome::Appended(e) | AppendOutcome::Existing(e) => Some(e),
            }
        } else {
            None
        };

        tx.commit().await?;
        Ok(RecordOutcome::Created { transaction, entry })
    }

    async fn sum_spend(&self, customer_id: i64, since: Option<DateTime<Utc>>) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(order_amount), 0) AS spend
            FROM cashback_transactions
            WHERE customer_id = $1
              AND ($2::timestamptz IS NULL OR ordered_at >= $2)
            "#,
        )
        .bind(customer_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("spend"))
    }

    async fn mark_sync_result(
        &self,
        id: i64,
        status: TransactionStatus,
        sync_error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE cashback_transactions SET status = $2, sync_error = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(sync_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_customer(
        &self,
        customer_id: i64,
        limit: i64,
    ) -> Result<Vec<CashbackTransaction>> {
        let sql = format!(
            r#"
            SELECT {} FROM cashback_transactions
            WHERE customer_id = $1
            ORDER BY ordered_at DESC, id DESC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        );
        let transactions = sqlx::query_as::<_, CashbackTransaction>(&sql)
            .bind(customer_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(transactions)
    }

    async fn list_sync_failed(&self, limit: i64) -> Result<Vec<CashbackTransaction>> {
        let sql = format!(
            r#"
            SELECT {} FROM cashback_transactions
            WHERE status = 'SYNC_FAILED'
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
            TRANSACTION_COLUMNS
        );
        let transactions = sqlx::query_as::<_, CashbackTransaction>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(transactions)
    }
}
