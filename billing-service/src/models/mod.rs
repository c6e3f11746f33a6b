//! Domain models for billing-service.

mod audit;
mod bill;
mod hierarchy;
mod import;
mod lease;
mod meter;
mod template;
mod user;

pub use audit::{AuditLog, CreateAuditLog};
pub use bill::{
    freeze_lines, Bill, BillLine, BillOperation, BillStatus, CreateBillLine, FrozenLine, NewBill,
};
pub use hierarchy::{Building, Community, Company, Unit, UnitContext};
pub use import::{
    row_field, ImportBatch, ImportBatchStatus, ImportKind, ImportRow, ImportSummary,
};
pub use lease::{CreateLease, Lease, Tenant};
pub use meter::{Meter, MeterKind, MeterReading};
pub use template::{
    BillTemplate, BillTemplateLine, ChargeItem, CreateTemplate, CreateTemplateLine, UpdateTemplate,
};
pub use user::{Actor, Role, User};
