//! Error types for the nucleus kernel.
//!
//! All errors are strongly typed using thiserror. The set of contract
//! violations is closed: callers pattern-match on the specific kind rather
//! than inspecting messages. Preconditions are checked eagerly and fail
//! fast — nothing is silently coerced or defaulted.

use thiserror::Error;

/// Contract violations raised by the planning queue.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("Plan time {time} is not a finite number")]
    InvalidPlanTime {
        time: f64,
    },

    #[error("Plan time {planned} precedes the current simulation time {current}")]
    PastPlanningTime {
        planned: f64,
        current: f64,
    },

    #[error("Plan key '{key}' is already queued for this planner")]
    DuplicatePlanKey {
        key: String,
    },

    #[error("Plan key must not be empty")]
    EmptyPlanKey,

    #[error("Snapshot plan time {time} precedes the snapshot start time {start_time}")]
    SnapshotPlanTime {
        time: f64,
        start_time: f64,
    },

    #[error("Snapshot arrival id {arrival} is invalid against counter {counter}")]
    SnapshotArrivalId {
        arrival: u64,
        counter: u64,
    },
}

/// Contract violations raised by the actor and data-manager registries.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown actor id: {id}")]
    UnknownActorId {
        id: u64,
    },

    #[error("No data manager is registered for class '{class}'")]
    UnknownDataManagerClass {
        class: String,
    },

    #[error("More than one data manager is assignable to class '{class}'")]
    AmbiguousDataManagerClass {
        class: String,
    },
}

/// Fatal plugin-definition errors, raised before any scenario runs.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin id must not be empty")]
    EmptyPluginId,

    #[error("Duplicate plugin id: '{id}'")]
    DuplicatePluginId {
        id: String,
    },

    #[error("Plugin '{plugin}' depends on unknown plugin '{dependency}'")]
    MissingPluginDependency {
        plugin: String,
        dependency: String,
    },

    #[error("Plugin dependencies form a cycle involving: {}", involved.join(", "))]
    CyclicPluginDependencies {
        involved: Vec<String>,
    },

    #[error("No plugin data of type '{type_name}' is registered")]
    UnknownPluginData {
        type_name: String,
    },

    #[error("More than one plugin data payload of type '{type_name}' is registered")]
    AmbiguousPluginData {
        type_name: String,
    },
}

/// Contract violations raised by the simulation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Simulation engines execute at most once")]
    RepeatedExecution,
}

/// Errors raised by the experiment runner.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Unknown scenario id: {id}")]
    UnknownScenarioId {
        id: usize,
    },

    #[error("Dimension '{dimension}' declared {expected} metadata values but a level produced {actual}")]
    DimensionMetadataMismatch {
        dimension: String,
        expected: usize,
        actual: usize,
    },

    #[error("Continuation from a progress log requires a configured log path")]
    ProgressLogNotConfigured,

    #[error("Progress log fingerprint {found} does not match this experiment ({expected})")]
    ProgressLogMismatch {
        expected: String,
        found: String,
    },

    #[error("Progress log is corrupt at line {line}: {reason}")]
    ProgressLogCorrupt {
        line: usize,
        reason: String,
    },

    #[error("Progress log I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type for the nucleus kernel.
///
/// This enum encompasses all contract violations that can occur when
/// building or running simulations and experiments.
#[derive(Debug, Error)]
pub enum NucleusError {
    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    /// A domain-defined failure released by actor or data-manager code.
    ///
    /// Kernel code never produces this variant; it exists so domain
    /// callbacks can abort a scenario with their own description.
    #[error("Scenario failure: {message}")]
    Scenario {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NucleusError {
    /// Creates a domain-defined scenario failure.
    #[must_use]
    pub fn scenario(message: impl Into<String>) -> Self {
        Self::Scenario {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a planning-queue error.
    #[must_use]
    pub const fn is_planning(&self) -> bool {
        matches!(self, Self::Planning(_))
    }

    /// Returns true if this is a registry error.
    #[must_use]
    pub const fn is_registry(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    /// Returns true if this is a plugin-definition error.
    #[must_use]
    pub const fn is_plugin(&self) -> bool {
        matches!(self, Self::Plugin(_))
    }

    /// Returns true if this is an engine-lifecycle error.
    #[must_use]
    pub const fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// Returns true if this is an experiment error.
    #[must_use]
    pub const fn is_experiment(&self) -> bool {
        matches!(self, Self::Experiment(_))
    }
}

/// Result type alias for nucleus operations.
pub type NucleusResult<T> = Result<T, NucleusError>;
