//! 数据库仓储层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 需要原子性的多表写入收敛为单个仓储方法，由实现负责事务
//! - 定义 trait 接口以支持 mock 测试和内存实现

mod customer_repo;
mod ledger_repo;
mod membership_repo;
mod memory;
mod migration_repo;
mod tier_repo;
mod traits;
mod transaction_repo;

use std::sync::Arc;

use sqlx::PgPool;

pub use customer_repo::PgCustomerRepository;
pub use ledger_repo::PgLedgerRepository;
pub use membership_repo::PgMembershipRepository;
pub use memory::MemoryStore;
pub use migration_repo::PgMigrationJobRepository;
pub use tier_repo::PgTierRepository;
pub use traits::*;
pub use transaction_repo::PgTransactionRepository;

/// 仓储集合
///
/// 服务通过它拿到各实体的仓储，PostgreSQL 与内存实现可以互换
#[derive(Clone)]
pub struct Repositories {
    pub customers: Arc<dyn CustomerRepositoryTrait>,
    pub ledger: Arc<dyn LedgerRepositoryTrait>,
    pub tiers: Arc<dyn TierRepositoryTrait>,
    pub memberships: Arc<dyn MembershipRepositoryTrait>,
    pub transactions: Arc<dyn TransactionRepositoryTrait>,
    pub migration_jobs: Arc<dyn MigrationJobRepositoryTrait>,
}

impl Repositories {
    /// PostgreSQL 实现
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            customers: Arc::new(PgCustomerRepository::new(pool.clone())),
            ledger: Arc::new(PgLedgerRepository::new(pool.clone())),
            tiers: Arc::new(PgTierRepository::new(pool.clone())),
            memberships: Arc::new(PgMembershipRepository::new(pool.clone())),
            transactions: Arc::new(PgTransactionRepository::new(pool.clone())),
            migration_jobs: Arc::new(PgMigrationJobRepository::new(pool)),
        }
    }

    /// 共享同一个内存状态的实现
    pub fn in_memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            customers: store.clone(),
            ledger: store.clone(),
            tiers: store.clone(),
            memberships: store.clone(),
            transactions: store.clone(),
            migration_jobs: store,
        }
    }
}
