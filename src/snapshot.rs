//! Serializable planning-queue state.
//!
//! A snapshot captures everything needed to reconstruct a planning queue at
//! the point of a prior halt: the start time, the optional base calendar
//! date, the arrival counter, and the ordered queued-plan records. Plan
//! actions are closures and cannot be serialized; each record instead
//! carries the opaque payload its plan was created with, and reconstruction
//! takes a rehydration function mapping records back to actions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::plan::PlannerKind;

/// One queued plan, as captured into a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// The plan's scheduled time.
    pub time: f64,

    /// Whether the plan is active.
    pub active: bool,

    /// The plan's key, if it was keyed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// The owning planner's kind.
    pub planner_kind: PlannerKind,

    /// The owning planner's id within its kind.
    pub owner_id: u64,

    /// The arrival sequence assigned when the plan was added.
    pub arrival_id: u64,

    /// The plan's opaque payload (`Null` if none was attached).
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// The complete persisted state of a planning queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// The queue's start time.
    pub start_time: f64,

    /// The base calendar date, if the clock was anchored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_date: Option<NaiveDate>,

    /// The arrival counter at capture time. Every record's `arrival_id`
    /// is strictly below this value.
    pub arrival_counter: u64,

    /// Queued plans in extraction order.
    pub plans: Vec<PlanRecord>,
}

impl QueueSnapshot {
    /// Number of queued plans captured.
    #[must_use]
    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    /// Number of captured plans that are active.
    #[must_use]
    pub fn active_plan_count(&self) -> usize {
        self.plans.iter().filter(|p| p.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: f64, arrival: u64) -> PlanRecord {
        PlanRecord {
            time,
            active: true,
            key: None,
            planner_kind: PlannerKind::Actor,
            owner_id: 0,
            arrival_id: arrival,
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let snapshot = QueueSnapshot {
            start_time: 1.5,
            base_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            arrival_counter: 2,
            plans: vec![record(2.0, 0), record(3.0, 1)],
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: QueueSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let json = r#"{
            "time": 2.0,
            "active": false,
            "planner_kind": "data_manager",
            "owner_id": 3,
            "arrival_id": 9
        }"#;
        let rec: PlanRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.payload, serde_json::Value::Null);
        assert!(!rec.active);
        assert_eq!(rec.planner_kind, PlannerKind::DataManager);
    }

    #[test]
    fn test_active_plan_count() {
        let mut snapshot = QueueSnapshot {
            start_time: 0.0,
            base_date: None,
            arrival_counter: 3,
            plans: vec![record(1.0, 0), record(2.0, 1), record(3.0, 2)],
        };
        snapshot.plans[1].active = false;
        assert_eq!(snapshot.plan_count(), 3);
        assert_eq!(snapshot.active_plan_count(), 2);
    }
}
