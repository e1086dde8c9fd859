//! Metric model shared by the agent and the server.
//!
//! A metric is identified by its kind and id and carries exactly one typed
//! value. On the wire it travels as `{id, type, value?, delta?}`; the
//! conversion into [`Metric`] is where that shape is validated, so every
//! `Metric` in memory already satisfies the one-value-per-kind rule.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or merging metrics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("unknown metric type: {0:?}")]
    UnknownKind(String),

    #[error("metric id must not be empty")]
    EmptyId,

    #[error("{kind} metric {id:?} is missing its {field:?} field")]
    MissingValue {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("invalid {kind} value: {value:?}")]
    InvalidValue { kind: MetricKind, value: String },

    #[error("counter {id:?} overflowed")]
    Overflow { id: String },

    #[error("cannot merge {incoming} into {existing}")]
    KindMismatch {
        existing: MetricKind,
        incoming: MetricKind,
    },
}

/// The two metric kinds. Each kind has its own key-space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Gauge, MetricKind::Counter];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }

    /// Name of the wire field that carries this kind's value.
    pub fn value_field(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "value",
            MetricKind::Counter => "delta",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricError::UnknownKind(other.to_string())),
        }
    }
}

/// A typed metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Instantaneous reading; last write wins.
    Gauge(f64),
    /// Increment; the stored value is the running sum of all deltas.
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a textual value (as found in `/update/{kind}/{id}/{value}`).
    ///
    /// Non-finite gauges are rejected: they cannot be represented in JSON.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        let invalid = || MetricError::InvalidValue {
            kind,
            value: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => {
                let v: f64 = raw.trim().parse().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                Ok(MetricValue::Gauge(v))
            }
            MetricKind::Counter => raw
                .trim()
                .parse()
                .map(MetricValue::Counter)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // f64's Display is the shortest round-trip form and never uses an exponent.
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(v) => write!(f, "{v}"),
        }
    }
}

/// A metric: identity plus typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetric", into = "RawMetric")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn new(id: impl Into<String>, value: MetricValue) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self::new(id, MetricValue::Gauge(value))
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self::new(id, MetricValue::Counter(delta))
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Merge `incoming` into this (stored) metric using the kind rule.
    ///
    /// Gauges take the incoming reading, counters add the incoming delta.
    pub fn merge(&self, incoming: &Metric) -> Result<Metric, MetricError> {
        let value = match (self.value, incoming.value) {
            (MetricValue::Gauge(_), MetricValue::Gauge(v)) => MetricValue::Gauge(v),
            (MetricValue::Counter(current), MetricValue::Counter(delta)) => {
                let sum = current
                    .checked_add(delta)
                    .ok_or_else(|| MetricError::Overflow {
                        id: self.id.clone(),
                    })?;
                MetricValue::Counter(sum)
            }
            (existing, incoming) => {
                return Err(MetricError::KindMismatch {
                    existing: existing.kind(),
                    incoming: incoming.kind(),
                });
            }
        };
        Ok(Metric::new(self.id.clone(), value))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind(), self.id, self.value)
    }
}

/// Wire form of a metric: `{id, type, delta?, value?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl TryFrom<RawMetric> for Metric {
    type Error = MetricError;

    fn try_from(raw: RawMetric) -> Result<Self, Self::Error> {
        let kind: MetricKind = raw.kind.parse()?;
        if raw.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let missing = || MetricError::MissingValue {
            id: raw.id.clone(),
            kind,
            field: kind.value_field(),
        };
        let value = match kind {
            MetricKind::Gauge => {
                let v = raw.value.ok_or_else(missing)?;
                if !v.is_finite() {
                    return Err(MetricError::InvalidValue {
                        kind,
                        value: v.to_string(),
                    });
                }
                MetricValue::Gauge(v)
            }
            MetricKind::Counter => MetricValue::Counter(raw.delta.ok_or_else(missing)?),
        };
        Ok(Metric { id: raw.id, value })
    }
}

impl From<Metric> for RawMetric {
    fn from(m: Metric) -> Self {
        let kind = m.kind().as_str().to_string();
        match m.value {
            MetricValue::Gauge(v) => RawMetric {
                id: m.id,
                kind,
                delta: None,
                value: Some(v),
            },
            MetricValue::Counter(d) => RawMetric {
                id: m.id,
                kind,
                delta: Some(d),
                value: None,
            },
        }
    }
}

/// Read request body for `POST /value`: `{id, type}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MetricQuery {
    /// Validate the query, returning its kind and id.
    pub fn parse(&self) -> Result<(MetricKind, &str), MetricError> {
        let kind: MetricKind = self.kind.parse()?;
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        Ok((kind, self.id.as_str()))
    }
}
