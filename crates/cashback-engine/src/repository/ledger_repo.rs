//! 储值账本仓储
//!
//! 流水只追加不修改。追加时先锁定客户行，再基于最新一条流水计算余额，
//! 流水写入与客户缓存余额更新在同一事务内完成。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

use super::customer_repo::PgCustomerRepository;
use super::traits::LedgerRepositoryTrait;
use crate::error::Result;
use crate::models::{AppendOutcome, BalanceCorrection, LedgerAudit, LedgerEntry, NewLedgerEntry};

const ENTRY_COLUMNS: &str = "id, customer_id, amount, balance, entry_type, source, \
                             external_reference, description, reconciled_at, created_at";

/// 储值账本仓储（PostgreSQL）
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中追加流水
    ///
    /// 调用方负责开启和提交事务。按外部引用去重的类型在命中已有记录时不写入。
    /// created_at 取行锁之后的 clock_timestamp()，同一客户的流水时间与 id 顺序一致。
    pub async fn append_in_tx(
        conn: &mut PgConnection,
        entry: &NewLedgerEntry,
    ) -> Result<AppendOutcome> {
        PgCustomerRepository::lock_in_tx(&mut *conn, entry.customer_id).await?;

        if entry.entry_type.is_reference_unique()
            && let Some(reference) = &entry.external_reference
        {
            let sql = format!(
                r#"
                SELECT {} FROM ledger_entries
                WHERE customer_id = $1 AND entry_type = $2 AND external_reference = $3
                "#,
                ENTRY_COLUMNS
            );
            let existing = sqlx::query_as::<_, LedgerEntry>(&sql)
                .bind(entry.customer_id)
                .bind(entry.entry_type)
                .bind(reference)
                .fetch_optional(&mut *conn)
                .await?;
            if let Some(existing) = existing {
                debug!(
                    customer_id = entry.customer_id,
                    reference = %reference,
                    "流水已存在，跳过写入"
                );
                return Ok(AppendOutcome::Existing(existing));
            }
        }

        let previous: Decimal = sqlx::query(
            r#"
            SELECT COALESCE(
                (SELECT balance FROM ledger_entries
                 WHERE customer_id = $1
                 ORDER BY id DESC
                 LIMIT 1),
                0
            ) AS balance
            "#,
        )
        .bind(entry.customer_id)
        .fetch_one(&mut *conn)
        .await?
        .get("balance");

        let balance = previous + entry.amount;

        let sql = format!(
            r#"
            INSERT INTO ledger_entries
                (customer_id, amount, balance, entry_type, source, external_reference, description,
                 reconciled_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, clock_timestamp())
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );
        let created = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(entry.customer_id)
            .bind(entry.amount)
            .bind(balance)
            .bind(entry.entry_type)
            .bind(entry.source)
            .bind(&entry.external_reference)
            .bind(&entry.description)
            .bind(entry.reconciled_at)
            .fetch_one(&mut *conn)
            .await?;

        sqlx::query(
            r#"
            UPDATE customers
            SET store_credit = $2,
                total_earned = total_earned + $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(entry.customer_id)
        .bind(balance)
        .bind(entry.earned_delta())
        .execute(&mut *conn)
        .await?;

        Ok(AppendOutcome::Appended(created))
    }
}

#[async_trait]
impl LedgerRepositoryTrait for PgLedgerRepository {
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::append_in_tx(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn reconcile(
        &self,
        customer_id: i64,
        external_balance: Decimal,
        correction: &NewLedgerEntry,
    ) -> Result<BalanceCorrection> {
        let mut tx = self.pool.begin().await?;
        let customer = PgCustomerRepository::lock_in_tx(&mut tx, customer_id).await?;

        let delta = external_balance - customer.store_credit;
        if delta.is_zero() {
            tx.commit().await?;
            return Ok(BalanceCorrection {
                local_balance: customer.store_credit,
                entry: None,
            });
        }

        let entry = NewLedgerEntry {
            customer_id,
            amount: delta,
            ..correction.clone()
        };
        let written = Self::append_in_tx(&mut tx, &entry).await?.into_entry();
        tx.commit().await?;

        Ok(BalanceCorrection {
            local_balance: customer.store_credit,
            entry: Some(written),
        })
    }

    async fn list_entries(&self, customer_id: i64, limit: i64) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {} FROM ledger_entries
            WHERE customer_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
            ENTRY_COLUMNS
        );
        let entries = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(customer_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    async fn balance_as_of(&self, customer_id: i64, at: DateTime<Utc>) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(
                (SELECT balance FROM ledger_entries
                 WHERE customer_id = $1 AND created_at <= $2
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1),
                0
            ) AS balance
            "#,
        )
        .bind(customer_id)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("balance"))
    }

    async fn audit(&self, customer_id: i64) -> Result<LedgerAudit> {
        let row = sqlx::query(
            r#"
            SELECT
                c.store_credit AS cached_balance,
                c.total_earned AS cached_total_earned,
                COALESCE(SUM(e.amount), 0) AS entry_sum,
                COALESCE(SUM(e.amount) FILTER (WHERE e.entry_type IN ('EARNED', 'INITIAL_IMPORT')), 0) AS earned_sum,
                COUNT(e.id) AS entry_count,
                COALESCE(
                    (SELECT balance FROM ledger_entries
                     WHERE customer_id = c.id
                     ORDER BY id DESC
                     LIMIT 1),
                    0
                ) AS latest_balance
            FROM customers c
            LEFT JOIN ledger_entries e ON e.customer_id = c.id
            WHERE c.id = $1
            GROUP BY c.id, c.store_credit, c.total_earned
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| crate::error::LoyaltyError::CustomerNotFound {
            shop: String::new(),
            customer_ref: customer_id.to_string(),
        })?;

        Ok(LedgerAudit {
            customer_id,
            cached_balance: row.get("cached_balance"),
            entry_sum: row.get("entry_sum"),
            latest_balance: row.get("latest_balance"),
            cached_total_earned: row.get("cached_total_earned"),
            earned_sum: row.get("earned_sum"),
            entry_count: row.get("entry_count"),
        })
    }
}
