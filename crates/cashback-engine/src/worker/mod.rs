pub mod tier_maintenance;

pub use tier_maintenance::{MaintenanceReport, TierMaintenanceWorker};
