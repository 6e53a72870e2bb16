// Metric value model - the types exchanged between collector plugins and the core
//
// This module defines:
// 1. MetricValue - a tagged numeric value (integer or floating point)
// 2. AttributeValue - a typed dimension label value
// 3. MetricQueryResult - one observation produced by a collector plugin

use opentelemetry::{KeyValue, Value};
use std::collections::HashMap;
use std::fmt;

/// Series key used when an observation carries no key of its own.
pub const DEFAULT_SERIES_KEY: &str = "default";

/// A numeric metric value.
///
/// Every metric is either integer or floating point end-to-end, selected by
/// the metric definition's `is_integer` flag; the two are never mixed within
/// one metric. Downstream exposition formats distinguish the two, so the
/// distinction is carried all the way from collection to export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// 64-bit signed integer value
    Long(i64),

    /// 64-bit floating point value
    Double(f64),
}

impl MetricValue {
    /// Returns the value as a signed integer, truncating if necessary.
    pub fn as_i64(&self) -> i64 {
        match self {
            MetricValue::Long(v) => *v,
            MetricValue::Double(v) => *v as i64,
        }
    }

    /// Returns the value as an unsigned integer, clamping negatives to zero.
    /// Used for instruments that only accept non-negative recordings.
    pub fn as_u64(&self) -> u64 {
        self.as_i64().max(0) as u64
    }

    /// Returns the value as a floating point number.
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Long(v) => *v as f64,
            MetricValue::Double(v) => *v,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Long(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Long(v as i64)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Long(v as i64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Double(v)
    }
}

/// A typed attribute (dimension label) value attached to an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Converts the attribute into an OpenTelemetry key/value pair.
    pub fn to_key_value(&self, key: &str) -> KeyValue {
        let value = match self {
            AttributeValue::Str(s) => Value::String(s.clone().into()),
            AttributeValue::Long(v) => Value::I64(*v),
            AttributeValue::Double(v) => Value::F64(*v),
            AttributeValue::Bool(v) => Value::Bool(*v),
        };
        KeyValue::new(key.to_string(), value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Str(s) => write!(f, "{}", s),
            AttributeValue::Long(v) => write!(f, "{}", v),
            AttributeValue::Double(v) => write!(f, "{}", v),
            AttributeValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Long(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// Map of attribute name to attribute value.
pub type AttributeMap = HashMap<String, AttributeValue>;

/// Converts an attribute map into OpenTelemetry key/value pairs.
pub fn attributes_to_key_values(attributes: &AttributeMap) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| value.to_key_value(key))
        .collect()
}

/// The result of one metric query, produced by a collector plugin.
///
/// A result carries a value, an optional series key (observations with
/// distinct keys become independent series under one metric) and a map of
/// dimension attributes. A result with a `None` value means "no data this
/// cycle" and is ignored by the series store without disturbing history.
///
/// # Example
/// ```
/// use telemetry_collector::model::MetricQueryResult;
///
/// let result = MetricQueryResult::new(42i64)
///     .with_key("ORDERS.QUEUE")
///     .with_attribute("queue", "ORDERS.QUEUE");
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricQueryResult {
    value: Option<MetricValue>,
    key: Option<String>,
    attributes: AttributeMap,
}

impl MetricQueryResult {
    /// Creates a new result with the given value.
    pub fn new(value: impl Into<MetricValue>) -> Self {
        MetricQueryResult {
            value: Some(value.into()),
            key: None,
            attributes: AttributeMap::new(),
        }
    }

    /// Creates a result carrying no value, signalling "no data this cycle".
    pub fn empty() -> Self {
        MetricQueryResult::default()
    }

    /// Sets the series key for this result.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Adds a dimension attribute to this result.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn value(&self) -> Option<MetricValue> {
        self.value
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Retrieves a single attribute by name.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}
