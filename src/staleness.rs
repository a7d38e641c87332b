//! Per-stage staleness of pipeline opportunities.
//!
//! An opportunity is stale when the whole days since its last activity strictly
//! exceed its stage's threshold. No recorded activity is always stale. Closed
//! and unrecognised stages are never stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dates::parse_timestamp;
use crate::fields::{Stage, ACTIVE_STAGES};

/// Days without activity after which each active stage goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaleThresholds {
    pub new_lead: i64,
    pub initial_outreach: i64,
    pub sample_visit_offered: i64,
    pub feedback_logged: i64,
    pub demo_scheduled: i64,
}

impl Default for StaleThresholds {
    fn default() -> Self {
        StaleThresholds {
            new_lead: 7,
            initial_outreach: 14,
            sample_visit_offered: 14,
            feedback_logged: 21,
            demo_scheduled: 14,
        }
    }
}

impl StaleThresholds {
    /// Threshold for `stage`, or `None` for closed stages.
    pub fn for_stage(&self, stage: Stage) -> Option<i64> {
        match stage {
            Stage::NewLead => Some(self.new_lead),
            Stage::InitialOutreach => Some(self.initial_outreach),
            Stage::SampleVisitOffered => Some(self.sample_visit_offered),
            Stage::FeedbackLogged => Some(self.feedback_logged),
            Stage::DemoScheduled => Some(self.demo_scheduled),
            Stage::ClosedWon | Stage::ClosedLost => None,
        }
    }

    /// Smallest active threshold; anything touched more recently cannot be stale.
    pub fn min_days(&self) -> i64 {
        ACTIVE_STAGES
            .iter()
            .filter_map(|s| self.for_stage(*s))
            .min()
            .unwrap_or(0)
    }

    /// Threshold for a wire stage name.
    pub fn for_stage_name(&self, stage: &str) -> Option<i64> {
        stage.parse::<Stage>().ok().and_then(|s| self.for_stage(s))
    }
}

pub fn is_closed_stage(stage: &str) -> bool {
    stage.parse::<Stage>().map(Stage::is_closed).unwrap_or(false)
}

pub fn is_active_pipeline_stage(stage: &str) -> bool {
    stage
        .parse::<Stage>()
        .map(|s| ACTIVE_STAGES.contains(&s))
        .unwrap_or(false)
}

/// Whole days elapsed since `last_activity`, or `None` when there was none.
pub fn days_since_activity(last_activity: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    last_activity.map(|ts| (now - ts).num_days())
}

/// Whether an opportunity in `stage` with the given last activity is stale at `now`.
pub fn is_opportunity_stale(
    stage: &str,
    last_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    thresholds: &StaleThresholds,
) -> bool {
    let Some(threshold) = thresholds.for_stage_name(stage) else {
        return false;
    };
    match days_since_activity(last_activity, now) {
        None => true,
        Some(days) => days > threshold,
    }
}

/// The fields of an opportunity row that staleness looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityActivity {
    #[serde(default)]
    pub id: Option<i64>,
    pub stage: String,
    #[serde(default, alias = "last_activity_at")]
    pub last_activity_date: Option<String>,
}

impl OpportunityActivity {
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity_date.as_deref().and_then(parse_timestamp)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, thresholds: &StaleThresholds) -> bool {
        is_opportunity_stale(&self.stage, self.last_activity(), now, thresholds)
    }
}

pub fn count_stale(opportunities: &[OpportunityActivity], now: DateTime<Utc>, thresholds: &StaleThresholds) -> usize {
    opportunities
        .iter()
        .filter(|o| o.is_stale(now, thresholds))
        .count()
}

pub fn filter_stale<'a>(
    opportunities: &'a [OpportunityActivity],
    now: DateTime<Utc>,
    thresholds: &StaleThresholds,
) -> Vec<&'a OpportunityActivity> {
    opportunities
        .iter()
        .filter(|o| o.is_stale(now, thresholds))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 28, 12, 0, 0).unwrap()
    }

    fn ts(s: &str) -> Option<DateTime<Utc>> {
        parse_timestamp(s)
    }

    fn opp(id: i64, stage: &str, last: Option<&str>) -> OpportunityActivity {
        OpportunityActivity {
            id: Some(id),
            stage: stage.into(),
            last_activity_date: last.map(str::to_string),
        }
    }

    #[test]
    fn default_thresholds() {
        let t = StaleThresholds::default();
        assert_eq!(t.for_stage_name("new_lead"), Some(7));
        assert_eq!(t.for_stage_name("initial_outreach"), Some(14));
        assert_eq!(t.for_stage_name("sample_visit_offered"), Some(14));
        assert_eq!(t.for_stage_name("feedback_logged"), Some(21));
        assert_eq!(t.for_stage_name("demo_scheduled"), Some(14));
        assert_eq!(t.for_stage_name("closed_won"), None);
        assert_eq!(t.for_stage_name("unknown"), None);
        assert_eq!(t.min_days(), 7);
    }

    #[test]
    fn stage_predicates() {
        assert!(is_closed_stage("closed_lost"));
        assert!(!is_closed_stage("unknown_stage"));
        assert!(is_active_pipeline_stage("feedback_logged"));
        assert!(!is_active_pipeline_stage("closed_won"));
    }

    #[rstest]
    #[case("new_lead", 7)]
    #[case("initial_outreach", 14)]
    #[case("feedback_logged", 21)]
    fn threshold_is_exclusive(#[case] stage: &str, #[case] days: i64) {
        let t = StaleThresholds::default();
        let now = reference();
        assert!(!is_opportunity_stale(stage, Some(now - Duration::days(days)), now, &t));
        assert!(is_opportunity_stale(stage, Some(now - Duration::days(days + 1)), now, &t));
    }

    #[test]
    fn null_activity_is_stale_unless_closed() {
        let t = StaleThresholds::default();
        for stage in ["new_lead", "initial_outreach", "demo_scheduled"] {
            assert!(is_opportunity_stale(stage, None, reference(), &t));
        }
        for stage in ["closed_won", "closed_lost"] {
            assert!(!is_opportunity_stale(stage, None, reference(), &t));
            assert!(!is_opportunity_stale(stage, ts("2020-01-01T00:00:00Z"), reference(), &t));
        }
    }

    #[test]
    fn days_since_activity_counts_whole_days() {
        let now = reference();
        assert_eq!(days_since_activity(ts("2025-11-27T12:00:00Z"), now), Some(1));
        assert_eq!(days_since_activity(ts("2025-11-21T12:00:00Z"), now), Some(7));
        assert_eq!(days_since_activity(ts("2025-11-28T00:00:00Z"), now), Some(0));
        assert_eq!(days_since_activity(None, now), None);
    }

    #[test]
    fn counts_and_filters_mixed_pipeline() {
        let t = StaleThresholds::default();
        let opps = vec![
            opp(1, "new_lead", Some("2025-11-20T00:00:00Z")),
            opp(2, "new_lead", Some("2025-11-25T00:00:00Z")),
            opp(3, "initial_outreach", None),
            opp(4, "demo_scheduled", Some("2025-11-10T00:00:00Z")),
            opp(5, "closed_won", None),
            opp(6, "feedback_logged", Some("2025-11-20T00:00:00Z")),
        ];
        assert_eq!(count_stale(&opps, reference(), &t), 3);
        let ids: Vec<_> = filter_stale(&opps, reference(), &t).iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![Some(1), Some(3), Some(4)]);
        assert_eq!(count_stale(&[], reference(), &t), 0);
    }

    #[test]
    fn accepts_alternate_activity_field() {
        let row: OpportunityActivity = serde_json::from_value(serde_json::json!({
            "stage": "new_lead",
            "last_activity_at": "2025-11-20T00:00:00Z"
        }))
        .unwrap();
        assert!(row.is_stale(reference(), &StaleThresholds::default()));
    }
}
