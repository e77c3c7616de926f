//! Response bodies of the V2 HTTP and batch APIs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Body of a successful upload.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct UploadResponse {
    pub code: u16,
    pub events_ingested: u64,
    pub payload_size_bytes: u64,
    pub server_upload_time: i64,
}

/// Body of a 400 response. Event lists hold indices into the uploaded
/// events, keyed by the offending field.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct InvalidRequestResponse {
    pub code: u16,
    pub error: String,
    pub missing_field: Option<String>,
    pub events_with_invalid_fields: HashMap<String, Vec<usize>>,
    pub events_with_missing_fields: HashMap<String, Vec<usize>>,
    pub events_with_invalid_id_lengths: HashMap<String, Vec<usize>>,
    pub silenced_devices: Vec<String>,
    pub silenced_events: Vec<usize>,
    pub throttled_events: Vec<usize>,
}

impl InvalidRequestResponse {
    /// Wraps a body that is not JSON, as returned by the V1 APIs.
    pub fn from_text(code: u16, text: &str) -> Self {
        Self {
            code,
            error: text.trim().to_string(),
            ..Default::default()
        }
    }
}

/// Body of a 413 response.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PayloadTooLargeResponse {
    pub code: u16,
    pub error: String,
}

/// Body of a 429 response. Throttled users and devices map to their current
/// events-per-second.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ThrottledResponse {
    pub code: u16,
    pub error: String,
    pub eps_threshold: Option<u64>,
    pub throttled_devices: HashMap<String, u64>,
    pub throttled_users: HashMap<String, u64>,
    pub throttled_events: Vec<usize>,
    pub exceeded_daily_quota_devices: HashMap<String, u64>,
    pub exceeded_daily_quota_users: HashMap<String, u64>,
}
