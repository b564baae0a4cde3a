// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Data model shared by the directory client, the classifier and the consumers.

use crate::errors::ApiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Suffix appended to a subscription key to form the AMQP queue name.
const QUEUE_SUFFIX: &str = "-queue";

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Response envelope used by every backend endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub error: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T: Default> ApiResponse<T> {
    /// Unwraps the payload, turning `error: true` into [`ApiError::Backend`].
    pub fn into_data(self) -> Result<T, ApiError> {
        if self.error {
            return Err(ApiError::Backend(self.message));
        }
        Ok(self.data.unwrap_or_default())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub token: String,
}

/// A network appliance registered in the backend directory.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Device {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(rename = "nasname")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shortname: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub brand: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub port: i64,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing)]
    pub secret: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub server: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub community: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub syslog_5651_enabled: bool,
}

impl Device {
    #[must_use]
    pub fn subscription_key(&self) -> SubscriptionKey {
        SubscriptionKey::from_parts(&self.brand, &self.name)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("brand", &self.brand)
            .field("kind", &self.kind)
            .field("syslog_5651_enabled", &self.syslog_5651_enabled)
            .finish_non_exhaustive()
    }
}

/// Export target configured in the backend. Consumed by the export job only.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub password: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub port: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ssh_key_path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ip_address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_path: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("ip_address", &self.ip_address)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Identifies a desired or running consumer: `lowercase(brand + "-" + name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    #[must_use]
    pub fn from_parts(brand: &str, name: &str) -> Self {
        Self(format!("{brand}-{name}").to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// AMQP queue the device's logs are routed to.
    #[must_use]
    pub fn queue_name(&self) -> String {
        format!("{}{QUEUE_SUFFIX}", self.0)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single broker delivery, as emitted by the syslog relay.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "fromhost", default, deserialize_with = "null_as_default")]
    pub from_host: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub facility: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: String,
    #[serde(rename = "timereported", default, deserialize_with = "null_as_default")]
    pub time_reported: String,
    #[serde(rename = "timegenerated", default, deserialize_with = "null_as_default")]
    pub time_generated: String,
}

impl RawMessage {
    /// Decodes a delivery body.
    ///
    /// A JSON object carrying a non-empty `message` (rsyslog JSON template) is
    /// decoded field by field; anything else becomes the message text verbatim.
    #[must_use]
    pub fn from_body(body: &[u8]) -> Self {
        if body.first() == Some(&b'{') {
            if let Ok(decoded) = serde_json::from_slice::<RawMessage>(body) {
                if !decoded.message.is_empty() {
                    return decoded;
                }
            }
        }
        Self {
            message: String::from_utf8_lossy(body).into_owned(),
            ..Self::default()
        }
    }

    /// `timereported` parsed as RFC 3339, if present and valid.
    #[must_use]
    pub fn reported_at(&self) -> Option<DateTime<Utc>> {
        if self.time_reported.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(&self.time_reported)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Vendor dialect a message was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Ruijie,
    Forti,
    Unknown,
}

impl Brand {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::Ruijie => "ruijie",
            Brand::Forti => "forti",
            Brand::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Brand::Unknown)
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured document written to the search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub brand: Brand,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub src_ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dst_ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub src_port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dst_port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub raw_message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub from_host: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url_category: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub src_mac: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub policy_name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub dev_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dev_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub src_intf: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub nas_name: String,
}

impl NormalizedRecord {
    /// An empty record of the given brand carrying the raw message and origin host.
    #[must_use]
    pub fn new(brand: Brand, raw: &RawMessage) -> Self {
        Self {
            brand,
            src_ip: String::new(),
            dst_ip: String::new(),
            src_port: String::new(),
            dst_port: String::new(),
            url: String::new(),
            action: String::new(),
            timestamp: None,
            raw_message: raw.message.clone(),
            from_host: raw.from_host.clone(),
            device_id: String::new(),
            url_category: String::new(),
            src_mac: String::new(),
            policy_name: String::new(),
            user: String::new(),
            dev_id: String::new(),
            dev_name: String::new(),
            src_intf: String::new(),
            hostname: String::new(),
            nas_name: String::new(),
        }
    }

    /// Only records of a known vendor with a URL are indexed.
    #[must_use]
    pub fn is_indexable(&self) -> bool {
        self.brand.is_known() && !self.url.is_empty()
    }
}
