//! Plans: time-stamped units of work owned by actors and data managers.
//!
//! A plan pairs a simulation time with an action closure. Active plans
//! count toward "work remaining" and keep a scenario alive; passive plans
//! are discarded, never executed, once no active plan remains queued.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::Context;
use crate::error::NucleusResult;

/// The kind of entity a plan or context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    /// An independent computational unit.
    Actor,
    /// A stateful subsystem.
    DataManager,
    /// A reporting collaborator.
    Report,
}

/// Identity of a planner: its kind plus its id within that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlannerId {
    /// The planner's kind.
    pub kind: PlannerKind,
    /// The planner's id within its kind.
    pub id: u64,
}

impl PlannerId {
    /// Creates a planner identity.
    #[must_use]
    pub const fn new(kind: PlannerKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for PlannerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PlannerKind::Actor => write!(f, "actor:{}", self.id),
            PlannerKind::DataManager => write!(f, "data_manager:{}", self.id),
            PlannerKind::Report => write!(f, "report:{}", self.id),
        }
    }
}

/// A key identifying a queued plan within its planner's scope.
///
/// Keys must be non-empty; uniqueness is enforced per planner by the
/// planning queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanKey(String);

impl PlanKey {
    /// Creates a plan key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty or whitespace-only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlanKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for PlanKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// The action a plan executes when its time arrives.
pub type PlanAction = Box<dyn FnOnce(&Context) -> NucleusResult<()>>;

/// A scheduled, time-stamped unit of work.
///
/// Constructed with [`Plan::new`] and refined with the chaining setters;
/// the planning queue assigns the arrival sequence at add time.
pub struct Plan {
    time: f64,
    active: bool,
    key: Option<PlanKey>,
    planner: PlannerId,
    arrival: u64,
    payload: Option<serde_json::Value>,
    action: PlanAction,
}

impl Plan {
    /// Creates an active, unkeyed plan for the given time.
    #[must_use]
    pub fn new(time: f64, action: impl FnOnce(&Context) -> NucleusResult<()> + 'static) -> Self {
        Self {
            time,
            active: true,
            key: None,
            planner: PlannerId::new(PlannerKind::Actor, 0),
            arrival: 0,
            payload: None,
            action: Box::new(action),
        }
    }

    /// Sets the plan's key.
    #[must_use]
    pub fn keyed(mut self, key: impl Into<PlanKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Marks the plan passive: it never keeps the scenario alive and is
    /// discarded once the last active plan has executed.
    #[must_use]
    pub fn passive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Sets the owning planner.
    #[must_use]
    pub fn owned_by(mut self, planner: PlannerId) -> Self {
        self.planner = planner;
        self
    }

    /// Attaches an opaque payload, captured verbatim into queue snapshots.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The plan's scheduled time.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Whether the plan is active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// The plan's key, if any.
    #[must_use]
    pub const fn key(&self) -> Option<&PlanKey> {
        self.key.as_ref()
    }

    /// The owning planner.
    #[must_use]
    pub const fn planner(&self) -> PlannerId {
        self.planner
    }

    /// The arrival sequence assigned by the planning queue.
    ///
    /// Zero until the plan has been added to a queue.
    #[must_use]
    pub const fn arrival_sequence(&self) -> u64 {
        self.arrival
    }

    /// The plan's opaque payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Consumes the plan and runs its action.
    ///
    /// # Errors
    ///
    /// Propagates whatever the action returns.
    pub fn execute(self, ctx: &Context) -> NucleusResult<()> {
        (self.action)(ctx)
    }

    pub(crate) fn set_arrival(&mut self, arrival: u64) {
        self.arrival = arrival;
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("time", &self.time)
            .field("active", &self.active)
            .field("key", &self.key)
            .field("planner", &self.planner)
            .field("arrival", &self.arrival)
            .finish_non_exhaustive()
    }
}
