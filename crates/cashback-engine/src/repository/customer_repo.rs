//! 客户仓储

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use super::traits::CustomerRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::Customer;

const CUSTOMER_COLUMNS: &str =
    "id, shop, external_customer_id, store_credit, total_earned, created_at, updated_at";

/// 客户仓储（PostgreSQL）
pub struct PgCustomerRepository {
    pool: PgPool,
}

impl PgCustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中锁定客户行
    ///
    /// 同一客户的流水追加、等级变更都先取这把行锁，保证串行
    pub async fn lock_in_tx(conn: &mut PgConnection, id: i64) -> Result<Customer> {
        let sql = format!("SELECT {} FROM customers WHERE id = $1 FOR UPDATE", CUSTOMER_COLUMNS);
        sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| LoyaltyError::CustomerNotFound {
                shop: String::new(),
                customer_ref: id.to_string(),
            })
    }
}

#[async_trait]
impl CustomerRepositoryTrait for PgCustomerRepository {
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>> {
        let sql = format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS);
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    async fn find_customer(
        &self,
        shop: &str,
        external_customer_id: &str,
    ) -> Result<Option<Customer>> {
        let sql = format!(
            "SELECT {} FROM customers WHERE shop = $1 AND external_customer_id = $2",
            CUSTOMER_COLUMNS
        );
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(shop)
            .bind(external_customer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    async fn get_or_create_customer(
        &self,
        shop: &str,
        external_customer_id: &str,
    ) -> Result<(Customer, bool)> {
        // ON CONFLICT DO NOTHING 在冲突时不返回行，需要再查一次
        let sql = format!(
            r#"
            INSERT INTO customers (shop, external_customer_id)
            VALUES ($1, $2)
            ON CONFLICT (shop, external_customer_id) DO NOTHING
            RETURNING {}
            "#,
            CUSTOMER_COLUMNS
        );
        let inserted = sqlx::query_as::<_, Customer>(&sql)
            .bind(shop)
            .bind(external_customer_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(customer) = inserted {
            return Ok((customer, true));
        }

        let existing = self
            .find_customer(shop, external_customer_id)
            .await?
            .ok_or_else(|| LoyaltyError::Internal("客户插入冲突后未查到记录".to_string()))?;
        Ok((existing, false))
    }
}
