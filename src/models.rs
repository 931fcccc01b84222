use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tracked vehicle. Fillups and events refer to it by `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_plate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_id: Option<String>,
}

/// One fuel purchase.
///
/// `partial` marks a fill that did not top up the tank; `previous_missed_fillups`
/// marks a gap in the history before this record. Both drive
/// [`crate::efficiency::recalculate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillupRecord {
    pub id: String,
    pub vehicle_id: String,
    #[serde(default)]
    pub date: String,
    pub odometer_reading: Decimal,
    pub volume: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<Decimal>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub previous_missed_fillups: bool,
    #[serde(default)]
    pub fuel_efficiency: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Service, repair or expense event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub vehicle_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odometer_reading: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_subtype_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedType {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Per-user lookup tables referenced by records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserTypes {
    pub event_subtypes: Vec<NamedType>,
    pub fuel_types: Vec<NamedType>,
    pub trip_types: Vec<NamedType>,
}

impl UserTypes {
    pub fn is_empty(&self) -> bool {
        self.event_subtypes.is_empty() && self.fuel_types.is_empty() && self.trip_types.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMetadata {
    pub content_type: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub id: String,
    pub metadata: PhotoMetadata,
    pub data: Vec<u8>,
}

/// Content of `metadata.json`: photo id to photo metadata.
pub type PhotoManifest = BTreeMap<String, PhotoMetadata>;

/// Number of records written by one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub vehicles: usize,
    pub fillups: usize,
    pub events: usize,
}

impl ImportCounts {
    pub fn add(&mut self, other: ImportCounts) {
        self.vehicles += other.vehicles;
        self.fillups += other.fillups;
        self.events += other.events;
    }
}

/// What to export: one user's data, optionally narrowed to some vehicles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSelection {
    pub username: String,
    pub vehicle_ids: Option<Vec<String>>,
}

impl ExportSelection {
    pub fn all(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            vehicle_ids: None,
        }
    }

    pub fn vehicles(username: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            username: username.into(),
            vehicle_ids: Some(ids),
        }
    }

    pub fn includes(&self, vehicle_id: &str) -> bool {
        match &self.vehicle_ids {
            Some(ids) => ids.iter().any(|id| id == vehicle_id),
            None => true,
        }
    }
}
