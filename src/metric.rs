//! Dashboard metric values.
//!
//! A metric is either a server-confirmed count or explicitly unknown. The two
//! are never conflated: `Known(0)` means the server said zero, `Unknown` means
//! the query failed or has not run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fields::TrendDirection;
use crate::trend::calculate_trend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum MetricValue {
    Known(u64),
    #[default]
    Unknown,
}

impl MetricValue {
    pub fn known(self) -> Option<u64> {
        match self {
            MetricValue::Known(v) => Some(v),
            MetricValue::Unknown => None,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, MetricValue::Unknown)
    }
}

impl From<Option<u64>> for MetricValue {
    fn from(v: Option<u64>) -> Self {
        v.map_or(MetricValue::Unknown, MetricValue::Known)
    }
}

impl From<MetricValue> for Option<u64> {
    fn from(v: MetricValue) -> Self {
        v.known()
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Known(v) => write!(f, "{v}"),
            MetricValue::Unknown => f.write_str("?"),
        }
    }
}

/// Previous-period comparison attached to a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub previous: u64,
    pub percent: i64,
    pub direction: TrendDirection,
}

impl MetricTrend {
    pub fn between(current: u64, previous: u64) -> Self {
        let t = calculate_trend(current, previous);
        MetricTrend { previous, percent: t.percent, direction: t.direction }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metric {
    pub value: MetricValue,
    pub trend: Option<MetricTrend>,
}

impl Metric {
    pub fn unknown() -> Self {
        Metric::default()
    }

    /// A metric with a trend when both periods are known; otherwise no trend.
    pub fn compared(current: MetricValue, previous: MetricValue) -> Self {
        let trend = match (current, previous) {
            (MetricValue::Known(c), MetricValue::Known(p)) => Some(MetricTrend::between(c, p)),
            _ => None,
        };
        Metric { value: current, trend }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_serialises_as_null_and_zero_as_zero() {
        assert_eq!(serde_json::to_value(MetricValue::Unknown).unwrap(), serde_json::Value::Null);
        assert_eq!(serde_json::to_value(MetricValue::Known(0)).unwrap(), serde_json::json!(0));
        let back: MetricValue = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert!(back.is_unknown());
    }

    #[test]
    fn trend_needs_both_periods() {
        let m = Metric::compared(MetricValue::Known(10), MetricValue::Known(5));
        assert_eq!(
            m.trend,
            Some(MetricTrend { previous: 5, percent: 100, direction: TrendDirection::Up })
        );
        assert_eq!(Metric::compared(MetricValue::Known(10), MetricValue::Unknown).trend, None);
        assert_eq!(Metric::compared(MetricValue::Unknown, MetricValue::Known(3)).trend, None);
    }
}
