//! Charge item and bill template models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Catalogue entry a template line points at.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChargeItem {
    pub charge_item_id: Uuid,
    pub code: String,
    pub name: String,
}

/// A reusable, ordered set of charge items stamped onto new draft bills.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillTemplate {
    pub template_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillTemplateLine {
    pub template_line_id: Uuid,
    pub template_id: Uuid,
    pub charge_item_id: Uuid,
    pub is_required: bool,
    pub sort_order: i32,
    pub note: Option<String>,
}

/// Input for creating a template line.
#[derive(Debug, Clone)]
pub struct CreateTemplateLine {
    pub charge_item_id: Uuid,
    pub is_required: bool,
    pub sort_order: i32,
    pub note: Option<String>,
}

/// Input for creating a template.
#[derive(Debug, Clone)]
pub struct CreateTemplate {
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub items: Vec<CreateTemplateLine>,
}

/// Input for updating a template. `items = Some(..)` replaces every line.
#[derive(Debug, Clone, Default)]
pub struct UpdateTemplate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub items: Option<Vec<CreateTemplateLine>>,
}
