//! Payloads of the Identify API, see
//! https://amplitude.com/docs/apis/analytics/identify.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::models::check_identity;

/// Operations on user (or group) properties. Each operation maps property
/// names to the values it is applied with.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UserProperties {
    #[serde(rename = "$set", default, skip_serializing_if = "Map::is_empty")]
    pub set: Map<String, Value>,
    #[serde(rename = "$setOnce", default, skip_serializing_if = "Map::is_empty")]
    pub set_once: Map<String, Value>,
    #[serde(rename = "$add", default, skip_serializing_if = "Map::is_empty")]
    pub add: Map<String, Value>,
    #[serde(rename = "$append", default, skip_serializing_if = "Map::is_empty")]
    pub append: Map<String, Value>,
    #[serde(rename = "$prepend", default, skip_serializing_if = "Map::is_empty")]
    pub prepend: Map<String, Value>,
    #[serde(rename = "$unset", default, skip_serializing_if = "Map::is_empty")]
    pub unset: Map<String, Value>,
    #[serde(rename = "$preInsert", default, skip_serializing_if = "Map::is_empty")]
    pub pre_insert: Map<String, Value>,
    #[serde(rename = "$postInsert", default, skip_serializing_if = "Map::is_empty")]
    pub post_insert: Map<String, Value>,
    #[serde(rename = "$remove", default, skip_serializing_if = "Map::is_empty")]
    pub remove: Map<String, Value>,
    /// Removes every user property. Sent as `"$clearAll": "-"`.
    #[serde(
        rename = "$clearAll",
        default,
        skip_serializing_if = "std::ops::Not::not",
        serialize_with = "serialize_clear_all",
        deserialize_with = "deserialize_clear_all"
    )]
    pub clear_all: bool,
}

impl UserProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(key.into(), value.into());
        self
    }

    pub fn set_once(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_once.insert(key.into(), value.into());
        self
    }

    pub fn add(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add.insert(key.into(), value.into());
        self
    }

    pub fn append(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.append.insert(key.into(), value.into());
        self
    }

    pub fn prepend(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.prepend.insert(key.into(), value.into());
        self
    }

    /// The API ignores the value of an unset; it is always sent as `"-"`.
    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset
            .insert(key.into(), Value::String("-".to_string()));
        self
    }

    pub fn pre_insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pre_insert.insert(key.into(), value.into());
        self
    }

    pub fn post_insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.post_insert.insert(key.into(), value.into());
        self
    }

    pub fn remove(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.remove.insert(key.into(), value.into());
        self
    }

    pub fn clear_all(mut self) -> Self {
        self.clear_all = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.clear_all
            && self.set.is_empty()
            && self.set_once.is_empty()
            && self.add.is_empty()
            && self.append.is_empty()
            && self.prepend.is_empty()
            && self.unset.is_empty()
            && self.pre_insert.is_empty()
            && self.post_insert.is_empty()
            && self.remove.is_empty()
    }

    /// The operations object as the API expects it.
    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

fn serialize_clear_all<S: Serializer>(_: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("-")
}

fn deserialize_clear_all<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Value::deserialize(deserializer).map(|value| !value.is_null())
}

/// Device fields. Amplitude resets the ones that are not set whenever any of
/// them is set, so they should be sent together.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
}

/// Location fields. Like [DeviceInfo], these are reset together.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LocationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dma: Option<String>,
}

/// One entry of the `identification` argument of the Identify API.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Identification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paying: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub device: DeviceInfo,
    #[serde(flatten)]
    pub location: LocationInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_properties: Option<UserProperties>,
}

impl Identification {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    pub fn with_user_properties(mut self, user_properties: UserProperties) -> Self {
        self.user_properties = Some(user_properties);
        self
    }

    pub fn validate(&self, min_id_length: Option<u32>) -> Result<(), ValidationError> {
        check_identity(
            self.user_id.as_deref(),
            self.device_id.as_deref(),
            min_id_length,
        )
    }

    /// The identification as the API expects it: unset fields are left out
    /// and user properties are keyed by their operation.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
