//! The multi-threaded experiment runner.
//!
//! An experiment expands its dimensions into a scenario cross-product and
//! executes the scenarios across a fixed-size pool of named worker
//! threads. Each worker builds one fresh engine per scenario; engines
//! never cross threads, and the invoking thread never runs a scenario's
//! plans. Workers report lifecycle and output events over a bounded
//! channel; the invoking thread drains it, owning the status map, the
//! progress log, and every experiment-level callback — a single-writer
//! view that spares callback authors any concurrency handling.

pub mod context;
pub mod dimension;
pub mod progress;
pub mod scenario;

pub use context::ExperimentContext;
pub use dimension::{Dimension, DimensionBuilder, LevelContext};
pub use scenario::ScenarioStatus;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::NaiveDate;
use crossbeam_channel::{bounded, Receiver, Sender};
use uuid::Uuid;

use crate::engine::{OutputValue, SimulationConfig, SimulationEngine, SimulationReport};
use crate::error::{ExperimentError, NucleusError, NucleusResult};
use crate::plugin::{initialization_order, Plugin, PluginDataSet};

use progress::ProgressLog;
use scenario::expand_scenarios;

/// Immutable configuration of an experiment execution.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Size of the worker pool. Scenario plans never run on the invoking
    /// thread, even with a single worker.
    pub thread_count: usize,

    /// When true, the first scenario failure stops further scenario
    /// launches and re-raises the cause out of `execute`. When false
    /// (default), failures are isolated per scenario.
    pub halt_on_exception: bool,

    /// Path of the append-only progress log, if any.
    pub progress_log: Option<PathBuf>,

    /// When true, scenarios recorded terminal in the existing progress
    /// log are skipped. Requires `progress_log`.
    pub continue_from_progress_log: bool,

    /// Calendar date anchoring every scenario's day zero, if any.
    pub base_date: Option<NaiveDate>,

    /// Capacity of the worker-to-main callback channel.
    pub callback_queue_capacity: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            halt_on_exception: false,
            progress_log: None,
            continue_from_progress_log: false,
            base_date: None,
            callback_queue_capacity: 1024,
        }
    }
}

/// A consumer given the experiment context before the run starts, to
/// register experiment-level callbacks.
pub type ContextConsumer = Box<dyn FnOnce(&mut ExperimentContext) -> NucleusResult<()>>;

/// One scenario's work order, shipped to a worker.
struct Job {
    scenario: usize,
    metadata: Vec<String>,
    data: PluginDataSet,
}

/// Lifecycle and output events reported by workers.
enum WorkerEvent {
    Opened {
        scenario: usize,
    },
    Output {
        scenario: usize,
        value: OutputValue,
    },
    Closed {
        scenario: usize,
        result: Result<SimulationReport, NucleusError>,
    },
    /// The job was skipped because a failure already stopped launches.
    Aborted {
        scenario: usize,
    },
}

/// Maps a dimension cross-product to concurrent scenario executions.
///
/// # Examples
///
/// ```
/// use nucleus::{Experiment, ExperimentConfig, Plugin};
///
/// let plugin = Plugin::builder("noop").build().unwrap();
/// let mut experiment = Experiment::new(ExperimentConfig::default());
/// experiment.add_plugin(plugin);
/// let ctx = experiment.execute().unwrap();
/// assert_eq!(ctx.scenario_count(), 1);
/// ```
pub struct Experiment {
    config: ExperimentConfig,
    dimensions: Vec<Dimension>,
    plugins: Vec<Arc<Plugin>>,
    consumers: Vec<ContextConsumer>,
}

impl Experiment {
    /// Creates an experiment with the given configuration.
    #[must_use]
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            config,
            dimensions: Vec::new(),
            plugins: Vec::new(),
            consumers: Vec::new(),
        }
    }

    /// Adds a dimension. Dimension order fixes scenario-id enumeration.
    pub fn add_dimension(&mut self, dimension: Dimension) {
        self.dimensions.push(dimension);
    }

    /// Adds a plugin, shared by every scenario.
    pub fn add_plugin(&mut self, plugin: Plugin) {
        self.plugins.push(Arc::new(plugin));
    }

    /// Registers a consumer that receives the experiment context before
    /// the run starts — the place to register experiment-level callbacks.
    pub fn add_context_consumer(
        &mut self,
        consumer: impl FnOnce(&mut ExperimentContext) -> NucleusResult<()> + 'static,
    ) {
        self.consumers.push(Box::new(consumer));
    }

    /// The number of scenarios this experiment will expand to.
    #[must_use]
    pub fn scenario_count(&self) -> usize {
        self.dimensions
            .iter()
            .map(Dimension::level_count)
            .product()
    }

    /// Runs every scenario to a terminal state and returns the closed
    /// experiment context for post-run queries.
    ///
    /// # Errors
    ///
    /// - Plugin-graph errors, before any scenario launches.
    /// - `ExperimentError` kinds for dimension-metadata and progress-log
    ///   violations.
    /// - With `halt_on_exception`, the first scenario failure's cause.
    /// - Any error returned by an experiment-level callback.
    pub fn execute(mut self) -> NucleusResult<ExperimentContext> {
        // Fatal plugin-definition problems surface before any scenario.
        initialization_order(&self.plugins)?;

        let run_id = Uuid::new_v4();
        let expanded = expand_scenarios(&self.dimensions, &self.plugins)?;
        let experiment_metadata: Vec<String> = self
            .dimensions
            .iter()
            .flat_map(|d| d.metadata_names().iter().cloned())
            .collect();
        let scenario_metadata: Vec<Vec<String>> = expanded
            .iter()
            .map(|(s, _)| s.metadata.clone())
            .collect();

        let mut ctx = ExperimentContext::new(run_id, experiment_metadata, scenario_metadata);
        for consumer in self.consumers.drain(..) {
            consumer(&mut ctx)?;
        }

        let fingerprint = progress::fingerprint(&self.dimensions);
        let scenario_count = expanded.len();
        let mut log = None;
        let mut recorded = std::collections::BTreeMap::new();
        if self.config.continue_from_progress_log {
            let path = self
                .config
                .progress_log
                .as_ref()
                .ok_or(ExperimentError::ProgressLogNotConfigured)?;
            let (l, done) = ProgressLog::resume(path, run_id, scenario_count, &fingerprint)?;
            log = Some(l);
            recorded = done;
        } else if let Some(path) = &self.config.progress_log {
            log = Some(ProgressLog::start(path, run_id, scenario_count, &fingerprint)?);
        }
        for (&id, &status) in &recorded {
            ctx.mark_logged(id, status);
        }

        ctx.fire_experiment_open()?;

        let jobs: Vec<Job> = expanded
            .into_iter()
            .filter(|(s, _)| !recorded.contains_key(&s.id))
            .map(|(s, data)| Job {
                scenario: s.id,
                metadata: s.metadata,
                data,
            })
            .collect();

        if jobs.is_empty() {
            ctx.fire_experiment_close()?;
            return Ok(ctx);
        }

        let (job_tx, job_rx) = bounded::<Job>(jobs.len());
        let (event_tx, event_rx) = bounded::<WorkerEvent>(self.config.callback_queue_capacity.max(1));
        let abort = Arc::new(AtomicBool::new(false));

        let mut remaining = jobs.len();
        for job in jobs {
            job_tx
                .send(job)
                .map_err(|_| NucleusError::internal("job channel rejected a queued scenario"))?;
        }
        drop(job_tx);

        let worker_count = self.config.thread_count.max(1);
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(worker_count);
        for idx in 0..worker_count {
            let job_rx = job_rx.clone();
            let event_tx = event_tx.clone();
            let abort = Arc::clone(&abort);
            let plugins = self.plugins.clone();
            let base_date = self.config.base_date;
            let halt_on_exception = self.config.halt_on_exception;
            let handle = thread::Builder::new()
                .name(format!("nucleus-worker-{idx}"))
                .spawn(move || {
                    worker_loop(&job_rx, &event_tx, &abort, &plugins, base_date, halt_on_exception);
                })
                .map_err(|e| NucleusError::internal(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }
        drop(job_rx);
        drop(event_tx);

        let mut first_failure: Option<usize> = None;
        while remaining > 0 {
            let event = event_rx
                .recv()
                .map_err(|_| NucleusError::internal("worker pool disconnected mid-experiment"))?;
            match event {
                WorkerEvent::Opened { scenario } => {
                    ctx.mark_running(scenario);
                    ctx.fire_simulation_open(scenario)?;
                }
                WorkerEvent::Output { scenario, value } => {
                    ctx.fire_output(scenario, value.as_ref())?;
                }
                WorkerEvent::Closed { scenario, result } => {
                    let status = match result {
                        Ok(_) => {
                            ctx.mark_terminal(scenario, ScenarioStatus::Succeeded, None);
                            ScenarioStatus::Succeeded
                        }
                        Err(cause) => {
                            ctx.mark_terminal(scenario, ScenarioStatus::Failed, Some(cause));
                            if self.config.halt_on_exception {
                                first_failure.get_or_insert(scenario);
                            }
                            ScenarioStatus::Failed
                        }
                    };
                    if let Some(log) = log.as_mut() {
                        log.append(scenario, status)?;
                    }
                    ctx.fire_simulation_close(scenario)?;
                    remaining -= 1;
                }
                WorkerEvent::Aborted { .. } => {
                    // Never launched: the scenario stays READY.
                    remaining -= 1;
                }
            }
        }

        for worker in workers {
            worker
                .join()
                .map_err(|_| NucleusError::internal("simulation worker panicked"))?;
        }

        ctx.fire_experiment_close()?;

        if self.config.halt_on_exception {
            if let Some(scenario) = first_failure {
                let cause = ctx.take_cause(scenario).unwrap_or_else(|| {
                    NucleusError::internal("failure cause missing for halted experiment")
                });
                return Err(cause);
            }
        }
        Ok(ctx)
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("dimensions", &self.dimensions.len())
            .field("plugins", &self.plugins.len())
            .field("scenario_count", &self.scenario_count())
            .finish_non_exhaustive()
    }
}

/// One worker's life: pull a job, run its scenario on a fresh engine,
/// report back. Exits when the job channel drains or the main thread has
/// gone away. Under halt-on-exception, the worker observing a failure
/// raises the abort flag itself, so no later job launches behind it.
fn worker_loop(
    jobs: &Receiver<Job>,
    events: &Sender<WorkerEvent>,
    abort: &AtomicBool,
    plugins: &[Arc<Plugin>],
    base_date: Option<NaiveDate>,
    halt_on_exception: bool,
) {
    while let Ok(job) = jobs.recv() {
        let scenario = job.scenario;
        if abort.load(Ordering::SeqCst) {
            if events.send(WorkerEvent::Aborted { scenario }).is_err() {
                return;
            }
            continue;
        }
        if events.send(WorkerEvent::Opened { scenario }).is_err() {
            return;
        }

        let mut engine = SimulationEngine::new(SimulationConfig {
            start_time: 0.0,
            base_date,
            scenario_id: scenario,
            scenario_metadata: job.metadata,
        });
        engine.set_shared_plugins(plugins.to_vec());
        engine.set_prepared_data(job.data);
        let output_tx = events.clone();
        engine.set_output_sink(Some(Box::new(move |value| {
            let _ = output_tx.send(WorkerEvent::Output { scenario, value });
        })));

        let result = engine.execute();
        if halt_on_exception && result.is_err() {
            abort.store(true, Ordering::SeqCst);
        }
        if events.send(WorkerEvent::Closed { scenario, result }).is_err() {
            return;
        }
    }
}
