//! Property hierarchy models: company → community → building → unit.
//!
//! Every node is addressed by a natural key: its code, scoped to the parent
//! node (company codes are global, a unit number is unique within its
//! building). Imports upsert against these keys.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Company {
    pub company_id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Community {
    pub community_id: Uuid,
    pub company_id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Building {
    pub building_id: Uuid,
    pub community_id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Unit {
    pub unit_id: Uuid,
    pub building_id: Uuid,
    pub unit_no: String,
    pub remark: Option<String>,
}

/// A unit with its resolved ancestry.
///
/// Bill rows denormalize the company and community references; this is the
/// record the explicit foreign-key walk produces.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub unit: Unit,
    pub building: Building,
    pub community: Community,
    pub company: Company,
}
