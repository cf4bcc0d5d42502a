//! 数据模型
//!
//! 与数据库表结构一一对应，所有金额使用 Decimal，不在账务运算中做舍入

mod customer;
mod enums;
mod membership;
mod migration;
mod order;
mod tier;
mod transaction;

pub use customer::*;
pub use enums::*;
pub use membership::*;
pub use migration::*;
pub use order::*;
pub use tier::*;
pub use transaction::*;
