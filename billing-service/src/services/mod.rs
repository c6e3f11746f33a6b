//! Services module for billing-service.

pub mod billing;
pub mod cycle;
pub mod database;
pub mod imports;
pub mod metrics;

pub use billing::BillingEngine;
pub use cycle::compute_billing_cycle;
pub use database::Database;
pub use imports::{process_import_batch, reconcile_leases, reconcile_rooms};
pub use metrics::{get_metrics, init_metrics};
