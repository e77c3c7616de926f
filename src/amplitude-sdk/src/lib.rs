//! A client for the Amplitude HTTP ingestion APIs, as described at
//! https://amplitude.com/docs/apis/analytics.
//!
//! Covers the V1 Identify, Group Identify and HTTP APIs as well as the V2
//! HTTP API and the Batch Event Upload API.

pub mod batch;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;

pub use batch::{BatchSummary, BatchUploader, EventSink, UploadApi};
pub use client::{Client, ClientOptions, ServerZone};
pub use error::{Error, ValidationError};
pub use models::event::{Event, IngestionOptions, Plan};
pub use models::group::GroupIdentification;
pub use models::identify::{DeviceInfo, Identification, LocationInfo, UserProperties};
pub use retry::RetryPolicy;
