use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};

/// A monitored node as it appears in the node list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub url: Url,
}

impl NodeConfig {
    pub fn new(name: &str, url: Url) -> Self {
        NodeConfig {
            name: name.to_string(),
            url,
        }
    }
}

/// Latest known reading for one node.
///
/// Field order is the order the upstream collector expects on the wire.
/// Everything but `free`, `reason` and `name` is left out of the JSON when
/// it holds its zero value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatus {
    #[serde(deserialize_with = "null_as_default")]
    pub free: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub reason: String,
    #[serde(deserialize_with = "null_as_default", skip_serializing_if = "is_zero_f64")]
    pub load1: f64,
    #[serde(deserialize_with = "null_as_default", skip_serializing_if = "is_zero_f64")]
    pub load5: f64,
    #[serde(deserialize_with = "null_as_default", skip_serializing_if = "is_zero_f64")]
    pub load15: f64,
    #[serde(
        rename = "net",
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub net_rate: String,
    #[serde(
        rename = "net-threshold",
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub net_threshold: String,
    #[serde(
        rename = "net-utilization",
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_zero_u64"
    )]
    pub net_utilization: u64,
    #[serde(
        rename = "time",
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_zero_i64"
    )]
    pub timestamp: i64,
    #[serde(
        rename = "uptime",
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_zero_u64"
    )]
    pub uptime_secs: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub hostname: String,
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus {
            free: false,
            reason: "".to_string(),
            load1: 0.0,
            load5: 0.0,
            load15: 0.0,
            net_rate: "".to_string(),
            net_threshold: "".to_string(),
            net_utilization: 0,
            timestamp: 0,
            uptime_secs: 0,
            name: "".to_string(),
            hostname: "".to_string(),
        }
    }
}

impl NodeStatus {
    /// A status with every reading cleared, used whenever a poll fails so
    /// that values from an earlier successful poll do not linger.
    pub fn unreachable(name: &str, reason: impl Into<String>) -> Self {
        NodeStatus {
            name: name.to_string(),
            reason: reason.into(),
            ..Default::default()
        }
    }
}

/// JSON indented with four spaces, the layout both the agent and the
/// upstream collector exchange.
pub fn to_json_indented<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

/// `null` reads as the field's zero value, like an absent field.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Option::unwrap_or_default)
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}
