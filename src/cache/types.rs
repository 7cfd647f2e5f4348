use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// A device query as received from a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Prefix, address or hostname the query is about
    pub target: String,
    /// Directive name (e.g. `bgp_route`, `ping`)
    pub query_type: String,
    /// Device the query runs on
    pub device_id: String,
    /// Extra directive arguments
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Transport metadata, never part of the cache key
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Query {
    pub fn new(
        target: impl Into<String>,
        query_type: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            query_type: query_type.into(),
            device_id: device_id.into(),
            parameters: BTreeMap::new(),
            request_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Short human readable description for log lines
    pub fn summary(&self) -> String {
        format!("{} {} on {}", self.query_type, self.target, self.device_id)
    }
}

/// Output of a device query, either a structured document or raw text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedOutput {
    Structured(Map<String, Value>),
    Text(String),
}

impl CachedOutput {
    pub fn is_structured(&self) -> bool {
        matches!(self, CachedOutput::Structured(_))
    }

    /// Response content type for this output
    pub fn format(&self) -> &'static str {
        if self.is_structured() {
            "application/json"
        } else {
            "text/plain"
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            CachedOutput::Structured(map) => Value::Object(map.clone()),
            CachedOutput::Text(text) => Value::String(text.clone()),
        }
    }

    /// Decode a stored value. Anything but an object or a string is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(CachedOutput::Structured(map)),
            Value::String(text) => Some(CachedOutput::Text(text)),
            _ => None,
        }
    }
}

/// A cached query result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub output: CachedOutput,
    pub structured: bool,
    /// When the query was originally executed; preserved across hits
    pub timestamp: DateTime<Utc>,
    pub ttl: Duration,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refresh_failures: u64,
    pub hit_rate: f32,
}

impl CacheStats {
    pub fn new(hits: u64, misses: u64, refresh_failures: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f32 / total as f32) * 100.0
        } else {
            0.0
        };
        Self {
            hits,
            misses,
            refresh_failures,
            hit_rate,
        }
    }
}
