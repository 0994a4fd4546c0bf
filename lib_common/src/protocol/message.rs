//! # Protocol Messages
//!
//! One decoded event from the controller stream:
//!
//! ```json
//! {"messageType": "Update", "key": "default/web", "routes": [...], "cluster": {...}}
//! ```
//!
//! `messageType` is accepted either as a name (case-insensitive) or as the
//! numeric code the controller emits when it serializes its enum as an
//! integer. `key`, `routes` and `cluster` may be missing or `null`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// What a message asks the receiver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Keep-alive; carries no configuration.
    Heartbeat,
    /// Replace the routing configuration with the attached routes/cluster.
    Update,
    /// Resource deletion notice; the following `Update` carries the result.
    Remove,
    /// Anything this receiver does not understand. Logged and dropped.
    Unrecognized(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Heartbeat => "Heartbeat",
            MessageKind::Update => "Update",
            MessageKind::Remove => "Remove",
            MessageKind::Unrecognized(raw) => raw,
        }
    }

    fn from_code(code: i64) -> Self {
        match code {
            0 => MessageKind::Heartbeat,
            1 => MessageKind::Update,
            2 => MessageKind::Remove,
            other => MessageKind::Unrecognized(other.to_string()),
        }
    }

    fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("heartbeat") {
            MessageKind::Heartbeat
        } else if name.eq_ignore_ascii_case("update") {
            MessageKind::Update
        } else if name.eq_ignore_ascii_case("remove") {
            MessageKind::Remove
        } else {
            MessageKind::Unrecognized(name.to_string())
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKind {
    Code(i64),
    Name(String),
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawKind::deserialize(deserializer)? {
            RawKind::Code(code) => MessageKind::from_code(code),
            RawKind::Name(name) => MessageKind::from_name(&name),
        })
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "messageType")]
    pub kind: MessageKind,
    /// Identifier of the affected resource, used for diagnostics only.
    #[serde(default, deserialize_with = "null_as_default")]
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub routes: Vec<RouteDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cluster: ClusterDescriptor,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Request matching criteria of a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One routing rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteDescriptor {
    pub route_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<BTreeMap<String, String>>,
    /// Fields this receiver does not model, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A backend address inside a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestinationDescriptor {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The backend cluster the routes point at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancing_policy: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub destinations: BTreeMap<String, DestinationDescriptor>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
