//! API 处理器

pub mod customer;
pub mod ledger;
pub mod migration;
pub mod order;
pub mod tier;
