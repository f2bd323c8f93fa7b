//! Pins and the effects the action gate applies to them.

use serde::{Deserialize, Serialize};

/// A message pinned at a location. Replies carry a `parent_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Pin {
    pub id: String,
    pub location_id: String,
    pub device_session_id: String,
    pub parent_id: Option<String>,
    pub body: String,
    pub created_at: u64,
    pub deleted_at: Option<u64>,
    pub boosted_until: Option<u64>,
}

impl Pin {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// The mutation a gated action produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum EffectResult {
    Created { pin_id: String },
    Boosted { pin_id: String, boosted_until: u64 },
    Deleted { pin_id: String },
}
