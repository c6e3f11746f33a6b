//! Background workers for billing-service.

pub mod import_worker;

pub use import_worker::{ImportJob, ImportQueue};
