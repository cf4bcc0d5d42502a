//! 进程内键控锁
//!
//! 等级目录变更按店铺串行。多实例部署时，PostgreSQL 仓储另外在事务内持有
//! `pg_advisory_xact_lock`，两者叠加保证同一店铺单写者。

mod keyed_lock;

pub use keyed_lock::{KeyedLock, KeyedLockGuard};
