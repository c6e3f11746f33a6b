//! Meter and meter reading models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Meter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterKind {
    ColdWater,
    HotWater,
    Elec,
}

impl MeterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeterKind::ColdWater => "cold_water",
            MeterKind::HotWater => "hot_water",
            MeterKind::Elec => "elec",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "hot_water" => MeterKind::HotWater,
            "elec" => MeterKind::Elec,
            _ => MeterKind::ColdWater,
        }
    }
}

/// A physical meter attached to a unit.
///
/// `(unit_id, kind, slot)` is unique; slots distinguish twin meters of the
/// same kind on one unit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Meter {
    pub meter_id: Uuid,
    pub unit_id: Uuid,
    pub kind: String,
    pub slot: i32,
    pub serial: Option<String>,
}

/// One reading per meter per "YYYY-MM" period.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MeterReading {
    pub reading_id: Uuid,
    pub meter_id: Uuid,
    pub period: String,
    pub reading: Decimal,
    pub read_at: DateTime<Utc>,
}
