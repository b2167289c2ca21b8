//! The time-ordered planning queue.
//!
//! Plans are extracted in ascending time order; ties are broken by
//! ascending arrival sequence, giving strict FIFO order among equal-time
//! plans. Extraction order is therefore deterministic and reproducible
//! regardless of how the queue's internal structure arranged insertions.
//!
//! The queue tracks how many *active* plans remain. Once that count
//! reaches zero, the queue reports itself drained and any passive backlog
//! is discarded without running — passive plans only execute while an
//! active plan is still queued behind them.

use std::collections::{BTreeMap, HashMap};

use crate::error::{NucleusError, NucleusResult, PlanningError};
use crate::plan::{Plan, PlanAction, PlanKey, PlannerId};
use crate::snapshot::{PlanRecord, QueueSnapshot};
use crate::time::SimulationClock;

/// Total order over `f64` times, valid because the queue only ever admits
/// finite values.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeKey(f64);

impl Eq for TimeKey {}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Position of a plan in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueuePosition {
    time: TimeKey,
    arrival: u64,
}

/// A time-ordered collection of pending plans.
///
/// # Examples
///
/// ```
/// use nucleus::{Plan, PlanningQueue};
///
/// let mut queue = PlanningQueue::new();
/// queue.add(Plan::new(2.0, |_| Ok(()))).unwrap();
/// queue.add(Plan::new(1.0, |_| Ok(()))).unwrap();
///
/// let first = queue.pop_next().unwrap();
/// assert_eq!(first.time(), 1.0);
/// assert_eq!(queue.current_time(), 1.0);
/// ```
#[derive(Debug)]
pub struct PlanningQueue {
    clock: SimulationClock,
    next_arrival: u64,
    queue: BTreeMap<QueuePosition, Plan>,
    keyed: HashMap<(PlannerId, PlanKey), QueuePosition>,
    active_count: usize,
}

impl PlanningQueue {
    /// Creates an empty queue starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SimulationClock::default())
    }

    /// Creates an empty queue driven by the given clock.
    #[must_use]
    pub fn with_clock(clock: SimulationClock) -> Self {
        Self {
            clock,
            next_arrival: 0,
            queue: BTreeMap::new(),
            keyed: HashMap::new(),
            active_count: 0,
        }
    }

    /// The queue's clock.
    #[must_use]
    pub const fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// The current simulation time: the time of the most recently popped
    /// plan, or the start time if nothing has run yet.
    #[must_use]
    pub const fn current_time(&self) -> f64 {
        self.clock.time()
    }

    /// Number of queued plans, active and passive.
    #[must_use]
    pub fn queued_plan_count(&self) -> usize {
        self.queue.len()
    }

    /// Number of queued active plans.
    #[must_use]
    pub const fn active_plan_count(&self) -> usize {
        self.active_count
    }

    /// Whether the queue is drained: no active plan remains.
    ///
    /// A drained queue may still hold passive plans; they will never run.
    #[must_use]
    pub const fn is_drained(&self) -> bool {
        self.active_count == 0
    }

    /// Adds a plan to the queue, assigning its arrival sequence.
    ///
    /// # Errors
    ///
    /// - `PlanningError::InvalidPlanTime` if the plan's time is not finite.
    /// - `PlanningError::PastPlanningTime` if the plan's time precedes the
    ///   current simulation time.
    /// - `PlanningError::EmptyPlanKey` if the plan carries a blank key.
    /// - `PlanningError::DuplicatePlanKey` if the plan's key is already
    ///   queued for the same planner.
    pub fn add(&mut self, mut plan: Plan) -> Result<(), PlanningError> {
        let time = plan.time();
        if !time.is_finite() {
            return Err(PlanningError::InvalidPlanTime { time });
        }
        if time < self.clock.time() {
            return Err(PlanningError::PastPlanningTime {
                planned: time,
                current: self.clock.time(),
            });
        }
        if let Some(key) = plan.key() {
            if key.is_blank() {
                return Err(PlanningError::EmptyPlanKey);
            }
            let scope = (plan.planner(), key.clone());
            if self.keyed.contains_key(&scope) {
                return Err(PlanningError::DuplicatePlanKey {
                    key: key.to_string(),
                });
            }
        }

        let position = QueuePosition {
            time: TimeKey(time),
            arrival: self.next_arrival,
        };
        plan.set_arrival(self.next_arrival);
        self.next_arrival += 1;

        if let Some(key) = plan.key() {
            self.keyed.insert((plan.planner(), key.clone()), position);
        }
        if plan.is_active() {
            self.active_count += 1;
        }
        self.queue.insert(position, plan);
        Ok(())
    }

    /// Extracts the next plan in `(time, arrival)` order, advancing the
    /// clock to its time.
    ///
    /// Returns `None` once the queue is drained — even if passive plans
    /// remain queued, since nothing is left to wake them.
    pub fn pop_next(&mut self) -> Option<Plan> {
        if self.is_drained() {
            return None;
        }
        let (position, plan) = self.queue.pop_first()?;
        if let Some(key) = plan.key() {
            self.keyed.remove(&(plan.planner(), key.clone()));
        }
        if plan.is_active() {
            self.active_count -= 1;
        }
        // Finite by admission; monotone by time ordering.
        self.clock
            .advance_to(position.time.0)
            .expect("queue order violates clock monotonicity");
        Some(plan)
    }

    /// Removes and returns the keyed plan for the given planner, if queued.
    ///
    /// An unknown key is not an error; a blank key is.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError::EmptyPlanKey` for a blank key argument.
    pub fn remove(
        &mut self,
        planner: PlannerId,
        key: &PlanKey,
    ) -> Result<Option<Plan>, PlanningError> {
        if key.is_blank() {
            return Err(PlanningError::EmptyPlanKey);
        }
        let Some(position) = self.keyed.remove(&(planner, key.clone())) else {
            return Ok(None);
        };
        let plan = self
            .queue
            .remove(&position)
            .expect("keyed index out of sync with queue");
        if plan.is_active() {
            self.active_count -= 1;
        }
        Ok(Some(plan))
    }

    /// The scheduled time of the keyed plan for the given planner, if queued.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError::EmptyPlanKey` for a blank key argument.
    pub fn peek_time(&self, planner: PlannerId, key: &PlanKey) -> Result<Option<f64>, PlanningError> {
        if key.is_blank() {
            return Err(PlanningError::EmptyPlanKey);
        }
        Ok(self
            .keyed
            .get(&(planner, key.clone()))
            .map(|position| position.time.0))
    }

    /// A record view of the keyed plan for the given planner, if queued.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError::EmptyPlanKey` for a blank key argument.
    pub fn record(
        &self,
        planner: PlannerId,
        key: &PlanKey,
    ) -> Result<Option<PlanRecord>, PlanningError> {
        if key.is_blank() {
            return Err(PlanningError::EmptyPlanKey);
        }
        let Some(position) = self.keyed.get(&(planner, key.clone())) else {
            return Ok(None);
        };
        let plan = self
            .queue
            .get(position)
            .expect("keyed index out of sync with queue");
        Ok(Some(PlanRecord {
            time: plan.time(),
            active: plan.is_active(),
            key: plan.key().map(ToString::to_string),
            planner_kind: plan.planner().kind,
            owner_id: plan.planner().id,
            arrival_id: plan.arrival_sequence(),
            payload: plan.payload().cloned().unwrap_or(serde_json::Value::Null),
        }))
    }

    /// All queued plan keys for the given planner, in extraction order.
    #[must_use]
    pub fn keys(&self, planner: PlannerId) -> Vec<PlanKey> {
        let mut found: Vec<(QueuePosition, PlanKey)> = self
            .keyed
            .iter()
            .filter(|((owner, _), _)| *owner == planner)
            .map(|((_, key), position)| (*position, key.clone()))
            .collect();
        found.sort_by_key(|(position, _)| *position);
        found.into_iter().map(|(_, key)| key).collect()
    }

    /// Discards every queued plan, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.keyed.clear();
        self.active_count = 0;
        dropped
    }

    /// Captures the queue's complete state into a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let plans = self
            .queue
            .values()
            .map(|plan| PlanRecord {
                time: plan.time(),
                active: plan.is_active(),
                key: plan.key().map(ToString::to_string),
                planner_kind: plan.planner().kind,
                owner_id: plan.planner().id,
                arrival_id: plan.arrival_sequence(),
                payload: plan.payload().cloned().unwrap_or(serde_json::Value::Null),
            })
            .collect();
        QueueSnapshot {
            start_time: self.clock.time(),
            base_date: self.clock.base_date(),
            arrival_counter: self.next_arrival,
            plans,
        }
    }

    /// Reconstructs a queue from a snapshot.
    ///
    /// `rehydrate` maps each record back to an executable action; it runs
    /// once per record, in extraction order.
    ///
    /// # Errors
    ///
    /// - `PlanningError::InvalidPlanTime` for a non-finite record time.
    /// - `PlanningError::SnapshotPlanTime` for a record time before the
    ///   snapshot's start time.
    /// - `PlanningError::SnapshotArrivalId` for an arrival id at or above
    ///   the counter, or one appearing twice.
    /// - `PlanningError::DuplicatePlanKey` for a repeated key within one
    ///   planner's scope.
    /// - Whatever `rehydrate` itself returns.
    pub fn from_snapshot(
        snapshot: &QueueSnapshot,
        mut rehydrate: impl FnMut(&PlanRecord) -> NucleusResult<PlanAction>,
    ) -> NucleusResult<Self> {
        let mut clock = SimulationClock::starting_at(snapshot.start_time)
            .map_err(NucleusError::from)?;
        if let Some(base) = snapshot.base_date {
            clock = SimulationClock::anchored(snapshot.start_time, base);
        }

        let mut queue = Self::with_clock(clock);
        queue.next_arrival = snapshot.arrival_counter;

        let mut seen_arrivals = std::collections::HashSet::new();
        for record in &snapshot.plans {
            if !record.time.is_finite() {
                return Err(PlanningError::InvalidPlanTime { time: record.time }.into());
            }
            if record.time < snapshot.start_time {
                return Err(PlanningError::SnapshotPlanTime {
                    time: record.time,
                    start_time: snapshot.start_time,
                }
                .into());
            }
            if record.arrival_id >= snapshot.arrival_counter
                || !seen_arrivals.insert(record.arrival_id)
            {
                return Err(PlanningError::SnapshotArrivalId {
                    arrival: record.arrival_id,
                    counter: snapshot.arrival_counter,
                }
                .into());
            }

            let planner = PlannerId::new(record.planner_kind, record.owner_id);
            let position = QueuePosition {
                time: TimeKey(record.time),
                arrival: record.arrival_id,
            };
            if let Some(key) = &record.key {
                let key = PlanKey::new(key.clone());
                if key.is_blank() {
                    return Err(PlanningError::EmptyPlanKey.into());
                }
                if queue.keyed.contains_key(&(planner, key.clone())) {
                    return Err(PlanningError::DuplicatePlanKey {
                        key: key.to_string(),
                    }
                    .into());
                }
                queue.keyed.insert((planner, key), position);
            }

            let action = rehydrate(record)?;
            let mut plan = Plan::new(record.time, action).owned_by(planner);
            if !record.active {
                plan = plan.passive();
            }
            if let Some(key) = &record.key {
                plan = plan.keyed(key.clone());
            }
            if !record.payload.is_null() {
                plan = plan.with_payload(record.payload.clone());
            }
            plan.set_arrival(record.arrival_id);

            if plan.is_active() {
                queue.active_count += 1;
            }
            queue.queue.insert(position, plan);
        }
        Ok(queue)
    }
}

impl Default for PlanningQueue {
    fn default() -> Self {
        Self::new()
    }
}
