//! Apartment billing core.
//!
//! Manages the property hierarchy (company → community → building → unit),
//! leases, meters and the bill lifecycle: anchored monthly billing cycles
//! derived from a lease's start date, idempotent bill generation, and a
//! strict draft → submitted → approved → issued/void state machine with a
//! line-item snapshot frozen at approval.

pub mod config;
pub mod models;
pub mod services;
pub mod workers;
