//! 商户返现会员引擎
//!
//! 按订单的现金等价支付计算返现，写入只追加的储值账本，并按客户消费维护会员等级。
//!
//! ## 核心功能
//!
//! - **支付分析**：从订单支付明细拆出可计返现金额、礼品卡和储值抵扣
//! - **储值账本**：只追加流水，客户行缓存余额与累计返现，支持与外部余额对账
//! - **等级目录**：按店铺维护有序等级，保证基础等级唯一、level 连续、门槛单调
//! - **等级评估**：按评估周期内消费升降级，尊重未到期的手工等级
//! - **交易记录**：按订单幂等记录返现，同一事务内写交易和账本
//! - **历史迁移**：分页拉取历史订单补算返现，进度增量持久化，支持取消
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 仓储层（PostgreSQL 与内存实现）
//! - `service`: 业务服务层
//! - `external`: 订单源与储值发放的外部接口
//! - `migration`: 历史订单迁移流水线
//! - `worker`: 后台维护任务
//! - `lock`: 进程内按键互斥
//! - `api`: HTTP 接口
//! - `engine`: 服务装配

pub mod api;
pub mod engine;
pub mod error;
pub mod external;
pub mod lock;
pub mod migration;
pub mod models;
pub mod repository;
pub mod service;
pub mod worker;

pub use engine::Engine;
pub use error::{LoyaltyError, Result};
pub use external::{CreditIssuer, HttpCreditIssuer, HttpOrderFeed, OrderFeed};
pub use migration::MigrationPipeline;
pub use models::*;
pub use repository::{MemoryStore, Repositories};
pub use service::{
    CustomerLookupService, LedgerService, OrderIngestService, PaymentAnalyzer, PaymentBreakdown,
    TierCatalogService, TierEvaluator, TransactionRecorder,
};
pub use worker::{MaintenanceReport, TierMaintenanceWorker};
