//! The single-scenario simulation engine.
//!
//! An engine ties the planning queue, event router, and registries
//! together and drives one scenario to completion: pop the next plan,
//! advance the clock, run the plan's action, repeat until the queue drains
//! or a `halt` is observed. Everything inside one engine is
//! single-threaded and run-to-completion; actor and data-manager code
//! needs no locking.

mod context;

pub use context::Context;

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::{EngineError, NucleusResult};
use crate::event::EventRouter;
use crate::plan::{PlannerId, PlannerKind};
use crate::plugin::{initialization_order, Plugin, PluginContext, PluginDataSet};
use crate::registry::{ActorRegistry, DataManagerRegistry};
use crate::scheduler::PlanningQueue;
use crate::time::SimulationClock;

/// A value released by domain code through the output sink.
pub type OutputValue = Box<dyn Any + Send>;

/// The output sink callback type.
pub type OutputSink = Box<dyn FnMut(OutputValue)>;

pub(crate) type CloseAction = Box<dyn FnOnce(&Context) -> NucleusResult<()>>;

/// Shared mutable state of one running scenario.
///
/// Owned behind a single `Rc<RefCell<..>>`; contexts are lightweight
/// handles onto it. Borrows are never held across domain callbacks, so
/// callbacks may re-enter freely.
pub(crate) struct Kernel {
    pub(crate) queue: PlanningQueue,
    pub(crate) router: EventRouter,
    pub(crate) actors: ActorRegistry,
    pub(crate) managers: DataManagerRegistry,
    pub(crate) output: Option<Rc<RefCell<OutputSink>>>,
    pub(crate) close_handlers: Vec<(PlannerId, CloseAction)>,
    pub(crate) halted: bool,
    pub(crate) scenario_id: usize,
    pub(crate) scenario_metadata: Arc<Vec<String>>,
}

/// Immutable configuration of a single scenario run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Simulation time the scenario starts at.
    pub start_time: f64,

    /// Calendar date anchoring day zero, if any.
    pub base_date: Option<NaiveDate>,

    /// The scenario's id within its experiment (0 for standalone runs).
    pub scenario_id: usize,

    /// The scenario's dimension-level metadata (empty for standalone runs).
    pub scenario_metadata: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            base_date: None,
            scenario_id: 0,
            scenario_metadata: Vec::new(),
        }
    }
}

/// Lifecycle state of a simulation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed; `execute` has not been called.
    Built,
    /// `execute` is in progress (or failed part-way).
    Running,
    /// The scenario drained its plan queue and closed normally.
    Completed,
    /// The scenario was stopped by an explicit halt.
    Halted,
}

/// Summary of a finished scenario run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    /// Number of plan actions that ran.
    pub plans_executed: u64,

    /// The clock value when the scenario stopped.
    pub final_time: f64,

    /// Queued plans discarded at stop: the passive backlog on a normal
    /// drain, or everything still queued on a halt.
    pub plans_discarded: usize,

    /// Whether the scenario stopped on an explicit halt.
    pub halted: bool,
}

/// Orchestrator for one scenario.
///
/// # Examples
///
/// ```
/// use nucleus::{Plugin, SimulationConfig, SimulationEngine};
///
/// let plugin = Plugin::builder("clock")
///     .initializer(|ctx| {
///         ctx.add_actor(|actor| {
///             actor.add_plan(1.0, |c| {
///                 c.release_output(format!("tick at {}", c.time()));
///                 Ok(())
///             })
///         })?;
///         Ok(())
///     })
///     .build()
///     .unwrap();
///
/// let mut engine = SimulationEngine::new(SimulationConfig::default());
/// engine.add_plugin(plugin);
/// let report = engine.execute().unwrap();
/// assert_eq!(report.plans_executed, 1);
/// ```
pub struct SimulationEngine {
    config: SimulationConfig,
    state: EngineState,
    plugins: Vec<Arc<Plugin>>,
    prepared_data: Option<PluginDataSet>,
    output: Option<Rc<RefCell<OutputSink>>>,
}

impl SimulationEngine {
    /// Creates an engine for the given configuration.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            state: EngineState::Built,
            plugins: Vec::new(),
            prepared_data: None,
            output: None,
        }
    }

    /// The engine's lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Adds a plugin. The dependency graph is validated at `execute`.
    pub fn add_plugin(&mut self, plugin: Plugin) {
        self.plugins.push(Arc::new(plugin));
    }

    /// Sets the output sink. The last registration wins; `None`
    /// suppresses output entirely.
    pub fn set_output_sink(&mut self, sink: Option<OutputSink>) {
        self.output = sink.map(|s| Rc::new(RefCell::new(s)));
    }

    pub(crate) fn set_shared_plugins(&mut self, plugins: Vec<Arc<Plugin>>) {
        self.plugins = plugins;
    }

    pub(crate) fn set_prepared_data(&mut self, data: PluginDataSet) {
        self.prepared_data = Some(data);
    }

    /// Runs the scenario to completion.
    ///
    /// Plugin initializers run first, in topological dependency order;
    /// then plans run in `(time, arrival)` order until the queue drains or
    /// a halt is observed; then simulation-close handlers run in
    /// registration order.
    ///
    /// # Errors
    ///
    /// - `EngineError::RepeatedExecution` on a second call.
    /// - Plugin-graph errors, before any initializer runs.
    /// - Any error returned by a plugin initializer, plan action, event
    ///   handler, or close handler — the engine never swallows them.
    pub fn execute(&mut self) -> NucleusResult<SimulationReport> {
        if self.state != EngineState::Built {
            return Err(EngineError::RepeatedExecution.into());
        }
        self.state = EngineState::Running;

        let order = initialization_order(&self.plugins)?;

        let clock = match self.config.base_date {
            Some(base) => SimulationClock::anchored(self.config.start_time, base),
            None => SimulationClock::starting_at(self.config.start_time)?,
        };
        let kernel = Rc::new(RefCell::new(Kernel {
            queue: PlanningQueue::with_clock(clock),
            router: EventRouter::new(),
            actors: ActorRegistry::new(),
            managers: DataManagerRegistry::new(),
            output: self.output.take(),
            close_handlers: Vec::new(),
            halted: false,
            scenario_id: self.config.scenario_id,
            scenario_metadata: Arc::new(self.config.scenario_metadata.clone()),
        }));

        let data = self
            .prepared_data
            .take()
            .unwrap_or_else(|| PluginDataSet::from_plugins(&self.plugins));
        for idx in order {
            let ctx = Context::new(
                Rc::clone(&kernel),
                PlannerId::new(PlannerKind::Report, idx as u64),
            );
            let mut plugin_ctx = PluginContext::new(&ctx, &data);
            self.plugins[idx].run_initializer(&mut plugin_ctx)?;
        }
        drop(data);

        let mut executed: u64 = 0;
        loop {
            if kernel.borrow().halted {
                break;
            }
            let plan = kernel.borrow_mut().queue.pop_next();
            let Some(plan) = plan else { break };
            let ctx = Context::new(Rc::clone(&kernel), plan.planner());
            plan.execute(&ctx)?;
            executed += 1;
        }

        // Close handlers may themselves register further close handlers;
        // drain from the front to preserve registration order.
        loop {
            let next = {
                let mut k = kernel.borrow_mut();
                if k.close_handlers.is_empty() {
                    None
                } else {
                    Some(k.close_handlers.remove(0))
                }
            };
            let Some((owner, action)) = next else { break };
            let ctx = Context::new(Rc::clone(&kernel), owner);
            action(&ctx)?;
        }

        let (halted, discarded, final_time) = {
            let mut k = kernel.borrow_mut();
            let halted = k.halted;
            let discarded = k.queue.clear();
            (halted, discarded, k.queue.current_time())
        };
        self.state = if halted {
            EngineState::Halted
        } else {
            EngineState::Completed
        };
        Ok(SimulationReport {
            plans_executed: executed,
            final_time,
            plans_discarded: discarded,
            halted,
        })
    }
}

impl std::fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("state", &self.state)
            .field("scenario_id", &self.config.scenario_id)
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NucleusError, PlanningError};

    fn single_actor_engine(
        init: impl FnOnce(&Context) -> NucleusResult<()> + Clone + Send + Sync + 'static,
    ) -> SimulationEngine {
        let plugin = Plugin::builder("test")
            .initializer(move |ctx| {
                ctx.add_actor(init.clone())?;
                Ok(())
            })
            .build()
            .unwrap();
        let mut engine = SimulationEngine::new(SimulationConfig::default());
        engine.add_plugin(plugin);
        engine
    }

    #[test]
    fn test_execute_twice_fails() {
        let mut engine = SimulationEngine::new(SimulationConfig::default());
        engine.execute().unwrap();
        let err = engine.execute().unwrap_err();
        assert!(matches!(
            err,
            NucleusError::Engine(EngineError::RepeatedExecution)
        ));
    }

    #[test]
    fn test_empty_engine_completes_immediately() {
        let mut engine = SimulationEngine::new(SimulationConfig::default());
        let report = engine.execute().unwrap();
        assert_eq!(report.plans_executed, 0);
        assert_eq!(report.final_time, 0.0);
        assert!(!report.halted);
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[test]
    fn test_plans_run_in_time_order_and_advance_clock() {
        let mut engine = single_actor_engine(|actor| {
            actor.add_plan(3.0, |c| {
                assert_eq!(c.time(), 3.0);
                Ok(())
            })?;
            actor.add_plan(1.0, |c| {
                assert_eq!(c.time(), 1.0);
                // Planning into the past fails from inside a running plan.
                let err = c.add_plan(0.5, |_| Ok(())).unwrap_err();
                assert!(matches!(
                    err,
                    NucleusError::Planning(PlanningError::PastPlanningTime { .. })
                ));
                Ok(())
            })?;
            Ok(())
        });
        let report = engine.execute().unwrap();
        assert_eq!(report.plans_executed, 2);
        assert_eq!(report.final_time, 3.0);
    }

    #[test]
    fn test_halt_discards_remaining_plans() {
        let mut engine = single_actor_engine(|actor| {
            actor.add_plan(1.0, |c| {
                c.halt();
                // The in-flight action still completes.
                Ok(())
            })?;
            actor.add_plan(2.0, |_| panic!("must not run after halt"))?;
            actor.add_plan(3.0, |_| panic!("must not run after halt"))?;
            Ok(())
        });
        let report = engine.execute().unwrap();
        assert!(report.halted);
        assert_eq!(report.plans_executed, 1);
        assert_eq!(report.plans_discarded, 2);
        assert_eq!(engine.state(), EngineState::Halted);
    }

    #[test]
    fn test_passive_backlog_is_discarded_not_run() {
        let mut engine = single_actor_engine(|actor| {
            for t in [1.0, 2.0, 3.0, 7.0] {
                actor.add_plan(t, |_| Ok(()))?;
            }
            actor.add_passive_plan(5.0, |_| Ok(()))?;
            actor.add_passive_plan(6.0, |_| Ok(()))?;
            actor.add_passive_plan(8.0, |_| panic!("passive tail must not run"))?;
            actor.add_passive_plan(9.0, |_| panic!("passive tail must not run"))?;
            Ok(())
        });
        let report = engine.execute().unwrap();
        assert_eq!(report.plans_executed, 6);
        assert_eq!(report.plans_discarded, 2);
        assert_eq!(report.final_time, 7.0);
    }

    #[test]
    fn test_plan_error_propagates_out_of_execute() {
        let mut engine = single_actor_engine(|actor| {
            actor.add_plan(1.0, |_| Err(NucleusError::scenario("boom")))?;
            Ok(())
        });
        let err = engine.execute().unwrap_err();
        assert!(matches!(err, NucleusError::Scenario { .. }));
    }

    #[test]
    fn test_close_handlers_run_after_drain_in_order() {
        let mut engine = single_actor_engine(|actor| {
            let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
            let first = std::rc::Rc::clone(&seen);
            let second = std::rc::Rc::clone(&seen);
            actor.subscribe_to_simulation_close(move |c| {
                assert_eq!(c.time(), 4.0);
                first.borrow_mut().push("first");
                Ok(())
            });
            actor.subscribe_to_simulation_close(move |_| {
                assert_eq!(*second.borrow(), vec!["first"]);
                Ok(())
            });
            actor.add_plan(4.0, |_| Ok(()))
        });
        let report = engine.execute().unwrap();
        assert_eq!(report.plans_executed, 1);
        assert_eq!(report.final_time, 4.0);
    }

    #[test]
    fn test_output_sink_receives_released_values() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let total = Arc::new(AtomicU64::new(0));
        let sink_total = Arc::clone(&total);
        let mut engine = single_actor_engine(|actor| {
            actor.add_plan(1.0, |c| {
                c.release_output(40u64);
                c.release_output(2u64);
                Ok(())
            })
        });
        engine.set_output_sink(Some(Box::new(move |value| {
            if let Ok(v) = value.downcast::<u64>() {
                sink_total.fetch_add(*v, Ordering::SeqCst);
            }
        })));
        engine.execute().unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_no_sink_suppresses_output() {
        let mut engine = single_actor_engine(|actor| {
            actor.add_plan(1.0, |c| {
                c.release_output("ignored".to_string());
                Ok(())
            })
        });
        engine.execute().unwrap();
    }

    #[test]
    fn test_start_time_anchors_planning() {
        let mut engine = SimulationEngine::new(SimulationConfig {
            start_time: 10.0,
            ..SimulationConfig::default()
        });
        let plugin = Plugin::builder("test")
            .initializer(|ctx| {
                ctx.add_actor(|actor| {
                    assert_eq!(actor.time(), 10.0);
                    let err = actor.add_plan(9.0, |_| Ok(())).unwrap_err();
                    assert!(matches!(
                        err,
                        NucleusError::Planning(PlanningError::PastPlanningTime { .. })
                    ));
                    actor.add_plan(11.0, |_| Ok(()))
                })?;
                Ok(())
            })
            .build()
            .unwrap();
        engine.add_plugin(plugin);
        let report = engine.execute().unwrap();
        assert_eq!(report.final_time, 11.0);
    }

    #[test]
    fn test_plugin_initializers_run_in_dependency_order() {
        use std::sync::Mutex;

        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let mut engine = SimulationEngine::new(SimulationConfig::default());

        let record = |label: &'static str, seen: &Arc<Mutex<Vec<&'static str>>>| {
            let seen = Arc::clone(seen);
            move |_: &mut PluginContext<'_>| {
                seen.lock().unwrap().push(label);
                Ok(())
            }
        };

        let reports = Plugin::builder("reports")
            .dependency("people")
            .initializer(record("reports", &seen))
            .build()
            .unwrap();
        let people = Plugin::builder("people")
            .initializer(record("people", &seen))
            .build()
            .unwrap();
        engine.add_plugin(reports);
        engine.add_plugin(people);
        engine.execute().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["people", "reports"]);
    }
}
