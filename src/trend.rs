//! Week-over-week percentage trend.

use serde::{Deserialize, Serialize};

use crate::fields::TrendDirection;

/// Signed whole-percent change and its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trend {
    pub percent: i64,
    pub direction: TrendDirection,
}

/// Percentage change from `previous` to `current`.
///
/// Growth from zero reports +100% up; zero to zero is flat. Halves round
/// toward positive infinity.
pub fn calculate_trend(current: u64, previous: u64) -> Trend {
    if previous == 0 {
        return if current > 0 {
            Trend { percent: 100, direction: TrendDirection::Up }
        } else {
            Trend { percent: 0, direction: TrendDirection::Flat }
        };
    }
    let change = (current as f64 - previous as f64) / previous as f64 * 100.0;
    let percent = (change + 0.5).floor() as i64;
    let direction = match percent {
        p if p > 0 => TrendDirection::Up,
        p if p < 0 => TrendDirection::Down,
        _ => TrendDirection::Flat,
    };
    Trend { percent, direction }
}
