//! # Nucleus - a deterministic discrete-event simulation kernel
//!
//! Nucleus drives time-ordered execution of independent computational
//! units (actors) and stateful subsystems (data managers) communicating
//! through a typed publish/subscribe event bus, and replicates a whole
//! simulation across a combinatorial grid of parameter variations
//! (dimensions) executed concurrently as an experiment.
//!
//! ## Core Concepts
//!
//! - **Plan**: a scheduled, time-stamped unit of work owned by an actor or
//!   data manager; active plans keep a scenario alive, passive plans never do
//! - **Event**: an immutable typed value routed synchronously to filtered
//!   subscribers
//! - **Plugin**: the unit of composition — data payloads, dependencies, and
//!   an initializer run in topological order
//! - **Scenario**: one fully-resolved combination of dimension levels,
//!   executed as an independent simulation run
//!
//! ## Usage
//!
//! ```rust
//! use nucleus::{Plugin, SimulationConfig, SimulationEngine};
//!
//! let clock = Plugin::builder("clock")
//!     .initializer(|ctx| {
//!         ctx.add_actor(|actor| {
//!             actor.add_plan(1.0, |c| {
//!                 c.release_output(format!("day {}", c.time()));
//!                 Ok(())
//!             })
//!         })?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let mut engine = SimulationEngine::new(SimulationConfig::default());
//! engine.add_plugin(clock);
//! let report = engine.execute()?;
//! assert_eq!(report.plans_executed, 1);
//! # Ok::<(), nucleus::NucleusError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Kernel primitives
pub mod error;
pub mod event;
pub mod plan;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod time;

// Single-scenario simulation
pub mod engine;
pub mod plugin;

// Experiment replication
pub mod experiment;

// Re-export primary types at crate root for convenience
pub use error::{
    EngineError, ExperimentError, NucleusError, NucleusResult, PlanningError, PluginError,
    RegistryError,
};
pub use event::{EventFilter, EventFilterBuilder, EventRouter, FieldValue};
pub use plan::{Plan, PlanAction, PlanKey, PlannerId, PlannerKind};
pub use registry::{
    ActorId, ActorRegistry, DataManager, DataManagerId, DataManagerRegistry, ManagerClass,
};
pub use scheduler::PlanningQueue;
pub use snapshot::{PlanRecord, QueueSnapshot};
pub use time::SimulationClock;

pub use engine::{
    Context, EngineState, OutputSink, OutputValue, SimulationConfig, SimulationEngine,
    SimulationReport,
};
pub use plugin::{
    Plugin, PluginBuilder, PluginContext, PluginData, PluginDataSet, PluginId, PluginInitializer,
};

pub use experiment::{
    Dimension, DimensionBuilder, Experiment, ExperimentConfig, ExperimentContext, LevelContext,
    ScenarioStatus,
};
