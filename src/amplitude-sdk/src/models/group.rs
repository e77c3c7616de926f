//! Payloads of the Group Identify API, see
//! https://amplitude.com/docs/apis/analytics/group-identify.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::models::identify::UserProperties;

/// Sets properties on a group, for example `org_id` `acme`. Group properties
/// accept the same operations as user properties.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GroupIdentification {
    pub group_type: String,
    pub group_value: String,
    #[serde(default, skip_serializing_if = "UserProperties::is_empty")]
    pub group_properties: UserProperties,
}

impl GroupIdentification {
    pub fn new(group_type: impl Into<String>, group_value: impl Into<String>) -> Self {
        Self {
            group_type: group_type.into(),
            group_value: group_value.into(),
            group_properties: UserProperties::default(),
        }
    }

    pub fn with_properties(mut self, group_properties: UserProperties) -> Self {
        self.group_properties = group_properties;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.group_type.is_empty() || self.group_value.is_empty() {
            return Err(ValidationError::MissingGroup { index: 0 });
        }
        Ok(())
    }

    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
