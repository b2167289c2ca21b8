//! The experiment context surfaced to reporting collaborators.
//!
//! All experiment-level callbacks — experiment open/close, simulation
//! open/close, output delivery — run on the invoking thread, driven by the
//! runner's event loop. The context owns the aggregated state (status map,
//! failure causes, metadata), so callback authors never handle
//! concurrency.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Instant;

use uuid::Uuid;

use crate::error::{ExperimentError, NucleusError, NucleusResult};

use super::scenario::ScenarioStatus;

type ExperimentHandler = Box<dyn FnMut(&ExperimentContext) -> NucleusResult<()>>;
type ScenarioHandler = Box<dyn FnMut(&ExperimentContext, usize) -> NucleusResult<()>>;
type OutputHandler = Box<dyn FnMut(&ExperimentContext, usize, &dyn Any) -> NucleusResult<()>>;

/// Aggregated view of a running experiment, plus callback registration.
///
/// Returned by `Experiment::execute` so terminal statuses, causes, and
/// metadata remain queryable after the run.
pub struct ExperimentContext {
    run_id: Uuid,
    started: Instant,
    experiment_metadata: Vec<String>,
    scenario_metadata: Vec<Vec<String>>,
    statuses: Vec<ScenarioStatus>,
    causes: HashMap<usize, NucleusError>,
    open_handlers: Vec<ExperimentHandler>,
    close_handlers: Vec<ExperimentHandler>,
    simulation_open_handlers: Vec<ScenarioHandler>,
    simulation_close_handlers: Vec<ScenarioHandler>,
    output_handlers: HashMap<TypeId, Vec<OutputHandler>>,
}

impl ExperimentContext {
    pub(crate) fn new(
        run_id: Uuid,
        experiment_metadata: Vec<String>,
        scenario_metadata: Vec<Vec<String>>,
    ) -> Self {
        let statuses = vec![ScenarioStatus::Ready; scenario_metadata.len()];
        Self {
            run_id,
            started: Instant::now(),
            experiment_metadata,
            scenario_metadata,
            statuses,
            causes: HashMap::new(),
            open_handlers: Vec::new(),
            close_handlers: Vec::new(),
            simulation_open_handlers: Vec::new(),
            simulation_close_handlers: Vec::new(),
            output_handlers: HashMap::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// This execution's run id.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Total number of scenarios in the experiment.
    #[must_use]
    pub fn scenario_count(&self) -> usize {
        self.statuses.len()
    }

    /// The experiment-level metadata: every dimension's declared metadata
    /// column names, in dimension order.
    #[must_use]
    pub fn experiment_metadata(&self) -> &[String] {
        &self.experiment_metadata
    }

    /// A scenario's dimension-level metadata values.
    ///
    /// # Errors
    ///
    /// `ExperimentError::UnknownScenarioId` for an out-of-range id.
    pub fn scenario_metadata(&self, id: usize) -> NucleusResult<&[String]> {
        self.scenario_metadata
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| ExperimentError::UnknownScenarioId { id }.into())
    }

    /// A scenario's current status.
    ///
    /// # Errors
    ///
    /// `ExperimentError::UnknownScenarioId` for an out-of-range id.
    pub fn scenario_status(&self, id: usize) -> NucleusResult<ScenarioStatus> {
        self.statuses
            .get(id)
            .copied()
            .ok_or_else(|| ExperimentError::UnknownScenarioId { id }.into())
    }

    /// The error that failed a scenario, if it failed during this run.
    ///
    /// # Errors
    ///
    /// `ExperimentError::UnknownScenarioId` for an out-of-range id.
    pub fn scenario_failure_cause(&self, id: usize) -> NucleusResult<Option<&NucleusError>> {
        if id >= self.statuses.len() {
            return Err(ExperimentError::UnknownScenarioId { id }.into());
        }
        Ok(self.causes.get(&id))
    }

    /// Ids of every scenario currently in the given status, ascending.
    #[must_use]
    pub fn scenarios_with_status(&self, status: ScenarioStatus) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id)
            .collect()
    }

    /// Wall-clock seconds since the experiment context was created.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    // ── Callback registration ────────────────────────────────────────

    /// Registers a handler fired once, before any scenario starts.
    pub fn subscribe_to_experiment_open(
        &mut self,
        handler: impl FnMut(&ExperimentContext) -> NucleusResult<()> + 'static,
    ) {
        self.open_handlers.push(Box::new(handler));
    }

    /// Registers a handler fired once, after every scenario has reached a
    /// terminal state.
    pub fn subscribe_to_experiment_close(
        &mut self,
        handler: impl FnMut(&ExperimentContext) -> NucleusResult<()> + 'static,
    ) {
        self.close_handlers.push(Box::new(handler));
    }

    /// Registers a handler fired when a worker begins a scenario.
    pub fn subscribe_to_simulation_open(
        &mut self,
        handler: impl FnMut(&ExperimentContext, usize) -> NucleusResult<()> + 'static,
    ) {
        self.simulation_open_handlers.push(Box::new(handler));
    }

    /// Registers a handler fired when a scenario reaches a terminal state.
    pub fn subscribe_to_simulation_close(
        &mut self,
        handler: impl FnMut(&ExperimentContext, usize) -> NucleusResult<()> + 'static,
    ) {
        self.simulation_close_handlers.push(Box::new(handler));
    }

    /// Registers a handler for released output values of type `T`.
    ///
    /// Output of other types is ignored by this handler; handlers for the
    /// same type fire in registration order.
    pub fn subscribe_to_output<T: Any>(
        &mut self,
        mut handler: impl FnMut(&ExperimentContext, usize, &T) -> NucleusResult<()> + 'static,
    ) {
        let erased: OutputHandler = Box::new(move |ctx, scenario, value| {
            let value = value
                .downcast_ref::<T>()
                .expect("output type mismatch in dispatch");
            handler(ctx, scenario, value)
        });
        self.output_handlers
            .entry(TypeId::of::<T>())
            .or_default()
            .push(erased);
    }

    // ── Runner-side state transitions and dispatch ───────────────────

    pub(crate) fn mark_running(&mut self, id: usize) {
        if self.statuses[id] == ScenarioStatus::Ready {
            self.statuses[id] = ScenarioStatus::Running;
        }
    }

    pub(crate) fn mark_terminal(
        &mut self,
        id: usize,
        status: ScenarioStatus,
        cause: Option<NucleusError>,
    ) {
        debug_assert!(status.is_terminal());
        if !self.statuses[id].is_terminal() {
            self.statuses[id] = status;
            if let Some(cause) = cause {
                self.causes.insert(id, cause);
            }
        }
    }

    /// Applies a terminal status recovered from a progress log; no cause
    /// is available for failures recorded by a previous run.
    pub(crate) fn mark_logged(&mut self, id: usize, status: ScenarioStatus) {
        debug_assert!(status.is_terminal());
        self.statuses[id] = status;
    }

    pub(crate) fn take_cause(&mut self, id: usize) -> Option<NucleusError> {
        self.causes.remove(&id)
    }

    pub(crate) fn fire_experiment_open(&mut self) -> NucleusResult<()> {
        let mut handlers = std::mem::take(&mut self.open_handlers);
        let result = handlers.iter_mut().try_for_each(|h| h(self));
        self.open_handlers = handlers;
        result
    }

    pub(crate) fn fire_experiment_close(&mut self) -> NucleusResult<()> {
        let mut handlers = std::mem::take(&mut self.close_handlers);
        let result = handlers.iter_mut().try_for_each(|h| h(self));
        self.close_handlers = handlers;
        result
    }

    pub(crate) fn fire_simulation_open(&mut self, id: usize) -> NucleusResult<()> {
        let mut handlers = std::mem::take(&mut self.simulation_open_handlers);
        let result = handlers.iter_mut().try_for_each(|h| h(self, id));
        self.simulation_open_handlers = handlers;
        result
    }

    pub(crate) fn fire_simulation_close(&mut self, id: usize) -> NucleusResult<()> {
        let mut handlers = std::mem::take(&mut self.simulation_close_handlers);
        let result = handlers.iter_mut().try_for_each(|h| h(self, id));
        self.simulation_close_handlers = handlers;
        result
    }

    pub(crate) fn fire_output(&mut self, id: usize, value: &dyn Any) -> NucleusResult<()> {
        let mut handlers = std::mem::take(&mut self.output_handlers);
        let result = match handlers.get_mut(&value.type_id()) {
            Some(typed) => typed.iter_mut().try_for_each(|h| h(self, id, value)),
            None => Ok(()),
        };
        self.output_handlers = handlers;
        result
    }
}

impl std::fmt::Debug for ExperimentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentContext")
            .field("run_id", &self.run_id)
            .field("scenario_count", &self.statuses.len())
            .finish_non_exhaustive()
    }
}
