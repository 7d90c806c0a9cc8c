//! Indexed document shapes. Every document carries `created_on` /
//! `modified_on` audit timestamps maintained by the indexers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Anything storable under a string key.
pub trait Document: Clone + Send + Sync + 'static {
    fn key(&self) -> &str;
}

/// Device registry entry, keyed by the upstream device id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDocument {
    pub device_id: String,
    pub area_id: Option<String>,
    pub manufacturer: Option<String>,
    pub device_model: Option<String>,
    pub device_name: Option<String>,
    pub entities: Vec<String>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
}

impl Document for DeviceDocument {
    fn key(&self) -> &str {
        &self.device_id
    }
}

/// Latest observed state of one entity, keyed by entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntityDocument {
    pub entity_id: String,
    pub state: String,
    pub state_class: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub device_class: Option<String>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Number of state changes folded into this document.
    pub change_count: u64,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
}

impl Document for DeviceEntityDocument {
    fn key(&self) -> &str {
        &self.entity_id
    }
}

/// Post record, keyed by its numeric id rendered as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDocument {
    pub post_id: String,
    pub title: String,
    pub body: Option<String>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
}

impl Document for PostDocument {
    fn key(&self) -> &str {
        &self.post_id
    }
}
