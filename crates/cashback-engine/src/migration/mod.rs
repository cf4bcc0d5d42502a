//! 历史订单迁移
//!
//! 按游标分页拉取外部订单，逐页经订单入账服务写入，计数随每页原子累加。

mod pipeline;

pub use pipeline::MigrationPipeline;
