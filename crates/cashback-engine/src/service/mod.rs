//! 服务层
//!
//! 返现引擎的业务逻辑，依赖仓储 trait 而不是具体数据库实现

pub mod credit_sync;
pub mod dto;
pub mod evaluation_queue;
pub mod ingest;
pub mod ledger;
pub mod lookup;
pub mod payment_analyzer;
pub mod recorder;
pub mod tier_catalog;
pub mod tier_evaluator;

pub use credit_sync::CreditSyncService;
pub use dto::*;
pub use evaluation_queue::{DrainReport, EvaluationRetryQueue, PendingEvaluation};
pub use ingest::OrderIngestService;
pub use ledger::LedgerService;
pub use lookup::CustomerLookupService;
pub use payment_analyzer::{PaymentAnalyzer, PaymentBreakdown};
pub use recorder::TransactionRecorder;
pub use tier_catalog::TierCatalogService;
pub use tier_evaluator::{EvaluationOutcome, SYSTEM_ACTOR, TierEvaluator};
