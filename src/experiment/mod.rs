//! Multi-scenario experiments.
//!
//! An experiment sweeps the Cartesian product of its dimensions' levels.
//! Every scenario gets its own copy of the plugin data, rebuilt for its
//! levels, and runs as an independent simulation on a fixed pool of worker
//! threads.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ContractError, ExecutionError, NucleusError, NucleusResult};
use crate::ids::ScenarioId;
use crate::plugin::{resolve_order, Plugin};
use crate::simulation::{Simulation, SimulationReport, SimulationState};

pub mod context;
pub mod dimension;
pub mod parameters;
pub(crate) mod progress;
pub(crate) mod runtime;
pub mod scenario;

pub use context::{ExperimentContext, ScenarioStatus};
pub use dimension::{Dimension, DimensionContext, FunctionalDimension, FunctionalDimensionBuilder};
pub use parameters::ExperimentParameters;
pub use scenario::{derive_seed, ScenarioSpace};

use progress::ProgressLog;
use runtime::WorkerPool;
use scenario::{prepare_plugins, Scenario};

type ContextConsumer = dyn FnOnce(&ExperimentContext);

/// Outcome of a finished experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentReport {
    pub scenario_count: usize,
    pub succeeded: BTreeMap<ScenarioId, SimulationReport>,
    pub failed: BTreeMap<ScenarioId, NucleusError>,
    pub previously_succeeded: Vec<ScenarioId>,
    /// Excluded by the scenario subset or never started after a failure.
    pub not_run: Vec<ScenarioId>,
    pub elapsed_seconds: f64,
}

impl ExperimentReport {
    /// Returns true if no scenario failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum ScenarioOutcome {
    Completed(SimulationReport),
    Failed(NucleusError),
    Skipped,
}

struct ScenarioResult {
    scenario_id: ScenarioId,
    outcome: ScenarioOutcome,
}

struct Shared {
    context: ExperimentContext,
    progress: Option<ProgressLog>,
    record_state: bool,
    halt_on_exception: bool,
    stop: AtomicBool,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Runs `f`, turning a panic into a `WorkerPanicked` failure of the scenario.
fn guarded<T>(scenario_id: ScenarioId, f: impl FnOnce() -> NucleusResult<T>) -> NucleusResult<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(ExecutionError::WorkerPanicked {
            scenario_id,
            message: panic_message(payload.as_ref()),
        }
        .into())
    })
}

fn run_scenario(shared: &Shared, scenario: Scenario) -> ScenarioResult {
    let scenario_id = scenario.id;
    if shared.stop.load(Ordering::SeqCst) {
        return ScenarioResult {
            scenario_id,
            outcome: ScenarioOutcome::Skipped,
        };
    }
    info!(scenario = %scenario_id, seed = scenario.seed, "scenario started");

    // A panic in any callback fails this scenario only.
    let context = shared.context.clone();
    let plugins = scenario.plugins;
    let state = scenario.state;
    let result = guarded(scenario_id, || {
        shared.context.open_simulation(scenario_id);
        Ok(())
    })
    .and_then(|()| {
        guarded(scenario_id, || {
            let mut builder = Simulation::builder()
                .add_plugins(plugins)
                .set_scenario_id(scenario_id)
                .set_halt_time_opt(scenario.halt_time)
                .set_record_state(shared.record_state)
                .set_seed(scenario.seed)
                .set_output_consumer(move |output| context.handle_output(scenario_id, &output));
            if let Some(state) = state {
                builder = builder.set_simulation_state(state);
            }
            builder.build().and_then(Simulation::execute)
        })
    })
    .and_then(|report| {
        guarded(scenario_id, || {
            shared.context.close_simulation(scenario_id, ScenarioStatus::Succeeded);
            Ok(())
        })
        .map(|()| report)
    });

    match result {
        Ok(report) => {
            if let Some(progress) = &shared.progress {
                if let Err(e) = progress.record(scenario_id, &scenario.meta_data) {
                    warn!(scenario = %scenario_id, error = %e, "failed to record progress");
                }
            }
            info!(
                scenario = %scenario_id,
                final_time = report.final_time,
                plans = report.plans_executed,
                "scenario succeeded"
            );
            ScenarioResult {
                scenario_id,
                outcome: ScenarioOutcome::Completed(report),
            }
        }
        Err(e) => {
            if shared.halt_on_exception {
                shared.stop.store(true, Ordering::SeqCst);
            }
            let status = shared.context.scenario_status(scenario_id);
            if status == Some(ScenarioStatus::Succeeded) {
                // A close callback panicked after the status was set.
                shared.context.set_status(scenario_id, ScenarioStatus::Failed);
            } else if let Err(close_error) = guarded(scenario_id, || {
                shared.context.close_simulation(scenario_id, ScenarioStatus::Failed);
                Ok(())
            }) {
                shared.context.set_status(scenario_id, ScenarioStatus::Failed);
                warn!(scenario = %scenario_id, error = %close_error, "close callback failed");
            }
            warn!(scenario = %scenario_id, error = %e, "scenario failed");
            ScenarioResult {
                scenario_id,
                outcome: ScenarioOutcome::Failed(e),
            }
        }
    }
}

/// A configured experiment.
pub struct Experiment {
    plugins: Vec<Plugin>,
    dimensions: Vec<Arc<dyn Dimension>>,
    consumers: Vec<Box<ContextConsumer>>,
    parameters: ExperimentParameters,
    state: Option<Arc<SimulationState>>,
    scenario_states: BTreeMap<ScenarioId, Arc<SimulationState>>,
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("plugins", &self.plugins.iter().map(Plugin::id).collect::<Vec<_>>())
            .field("dimensions", &self.dimensions.len())
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl Experiment {
    #[must_use]
    pub fn builder() -> ExperimentBuilder {
        ExperimentBuilder::default()
    }

    /// The scenario space spanned by the dimensions.
    #[must_use]
    pub fn scenario_space(&self) -> ScenarioSpace {
        ScenarioSpace::new(self.dimensions.iter().map(|d| d.level_count()).collect())
    }

    fn prepare(&self, space: &ScenarioSpace) -> NucleusResult<Vec<Scenario>> {
        (0..space.scenario_count())
            .map(|index| {
                let id = ScenarioId::from(index);
                let levels = space.levels(id)?;
                let (plugins, meta_data) = prepare_plugins(&self.plugins, &self.dimensions, &levels)?;
                let seed = derive_seed(self.parameters.master_seed, id);
                Ok(Scenario {
                    id,
                    meta_data,
                    plugins,
                    halt_time: self.parameters.halt_time_for(id),
                    seed,
                    state: self.state_for(id, seed),
                })
            })
            .collect()
    }

    /// A scenario's own recorded state resumes it exactly. The shared state
    /// only fixes the clock and plan counter; each scenario keeps its own
    /// random stream.
    fn state_for(&self, scenario_id: ScenarioId, seed: u64) -> Option<Arc<SimulationState>> {
        match self.scenario_states.get(&scenario_id) {
            Some(state) => Some(Arc::clone(state)),
            None => self.state.as_ref().map(|state| Arc::new(state.reseeded(seed))),
        }
    }

    /// Runs every selected scenario and blocks until all have finished.
    ///
    /// # Errors
    ///
    /// Dimension and progress log errors before any scenario starts. With
    /// `halt_on_exception`, the first scenario failure. Otherwise scenario
    /// failures are reported in [`ExperimentReport::failed`].
    pub fn execute(self) -> NucleusResult<ExperimentReport> {
        let space = self.scenario_space();
        let scenario_count = space.scenario_count();
        let experiment_meta_data: Vec<String> = self.dimensions.iter().flat_map(|d| d.meta_data()).collect();
        let scenarios = self.prepare(&space)?;

        let previously_succeeded = match (&self.parameters.progress_log, self.parameters.continue_from_progress_log) {
            (Some(path), true) => progress::read_completed(path, scenario_count, &experiment_meta_data)?,
            _ => BTreeSet::new(),
        };
        let progress = self
            .parameters
            .progress_log
            .as_deref()
            .map(|path| {
                ProgressLog::open(
                    path,
                    scenario_count,
                    &experiment_meta_data,
                    self.parameters.continue_from_progress_log,
                )
            })
            .transpose()?;

        let scenario_meta_data = scenarios.iter().map(|s| (s.id, s.meta_data.clone())).collect();
        let context = ExperimentContext::new(experiment_meta_data, scenario_meta_data, scenario_count);
        for scenario_id in &previously_succeeded {
            context.set_status(*scenario_id, ScenarioStatus::PreviouslySucceeded);
        }
        for consumer in self.consumers {
            consumer(&context);
        }

        let (to_run, mut not_run): (Vec<Scenario>, Vec<Scenario>) = scenarios
            .into_iter()
            .filter(|s| !previously_succeeded.contains(&s.id))
            .partition(|s| self.parameters.includes(s.id));

        info!(
            scenarios = scenario_count,
            to_run = to_run.len(),
            previously_succeeded = previously_succeeded.len(),
            threads = self.parameters.thread_count,
            "experiment started"
        );
        context.open_experiment();

        let shared = Arc::new(Shared {
            context: context.clone(),
            progress,
            record_state: self.parameters.record_state,
            halt_on_exception: self.parameters.halt_on_exception,
            stop: AtomicBool::new(false),
        });
        let results = Self::run_all(&shared, to_run, self.parameters.thread_count);

        context.close_experiment();

        let results = results?;
        let mut report = ExperimentReport {
            scenario_count,
            succeeded: BTreeMap::new(),
            failed: BTreeMap::new(),
            previously_succeeded: previously_succeeded.into_iter().collect(),
            not_run: not_run.drain(..).map(|s| s.id).collect(),
            elapsed_seconds: context.elapsed_seconds(),
        };
        let mut first_failure = None;
        for result in results {
            match result.outcome {
                ScenarioOutcome::Completed(sim) => {
                    report.succeeded.insert(result.scenario_id, sim);
                }
                ScenarioOutcome::Failed(e) => {
                    first_failure.get_or_insert((result.scenario_id, e.to_string()));
                    report.failed.insert(result.scenario_id, e);
                }
                ScenarioOutcome::Skipped => report.not_run.push(result.scenario_id),
            }
        }
        report.not_run.sort_unstable();

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            not_run = report.not_run.len(),
            elapsed_seconds = report.elapsed_seconds,
            "experiment finished"
        );

        match first_failure {
            Some((scenario_id, message)) if self.parameters.halt_on_exception => {
                Err(ExecutionError::ScenarioFailed { scenario_id, message }.into())
            }
            _ => Ok(report),
        }
    }

    fn run_all(shared: &Arc<Shared>, scenarios: Vec<Scenario>, thread_count: usize) -> NucleusResult<Vec<ScenarioResult>> {
        if thread_count == 0 {
            return Ok(scenarios
                .into_iter()
                .map(|scenario| run_scenario(shared, scenario))
                .collect());
        }

        let worker_shared = Arc::clone(shared);
        let pool = WorkerPool::start("scenario", thread_count, thread_count, move |scenario: Scenario| {
            run_scenario(&worker_shared, scenario)
        })?;

        let mut submitted = 0;
        let mut submit_error = None;
        for scenario in scenarios {
            if shared.stop.load(Ordering::SeqCst) {
                debug!(scenario = %scenario.id, "not submitted after failure");
                continue;
            }
            match pool.submit(scenario) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    submit_error = Some(e);
                    break;
                }
            }
        }

        let mut results = Vec::with_capacity(submitted);
        for _ in 0..submitted {
            match pool.recv() {
                Ok(result) => results.push(result),
                Err(e) => {
                    submit_error.get_or_insert(e);
                    break;
                }
            }
        }
        pool.shutdown();

        match submit_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

/// Builder for [`Experiment`].
#[derive(Default)]
pub struct ExperimentBuilder {
    plugins: Vec<Plugin>,
    dimensions: Vec<Arc<dyn Dimension>>,
    consumers: Vec<Box<ContextConsumer>>,
    parameters: ExperimentParameters,
    state: Option<Arc<SimulationState>>,
    scenario_states: BTreeMap<ScenarioId, Arc<SimulationState>>,
}

impl ExperimentBuilder {
    #[must_use]
    pub fn add_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    #[must_use]
    pub fn add_dimension(mut self, dimension: impl Dimension + 'static) -> Self {
        self.dimensions.push(Arc::new(dimension));
        self
    }

    /// Receives the experiment context before the experiment opens, to
    /// register its subscriptions.
    #[must_use]
    pub fn add_experiment_context_consumer(mut self, consumer: impl FnOnce(&ExperimentContext) + 'static) -> Self {
        self.consumers.push(Box::new(consumer));
        self
    }

    /// Replaces every parameter at once.
    #[must_use]
    pub fn set_parameters(mut self, parameters: ExperimentParameters) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn set_thread_count(mut self, thread_count: usize) -> Self {
        self.parameters.thread_count = thread_count;
        self
    }

    #[must_use]
    pub fn set_record_state(mut self, record_state: bool) -> Self {
        self.parameters.record_state = record_state;
        self
    }

    #[must_use]
    pub fn set_simulation_halt_time(mut self, halt_time: f64) -> Self {
        self.parameters.simulation_halt_time = Some(halt_time);
        self
    }

    #[must_use]
    pub fn set_scenario_halt_time(mut self, scenario_id: ScenarioId, halt_time: f64) -> Self {
        self.parameters.scenario_halt_times.insert(scenario_id, halt_time);
        self
    }

    #[must_use]
    pub fn set_halt_on_exception(mut self, halt_on_exception: bool) -> Self {
        self.parameters.halt_on_exception = halt_on_exception;
        self
    }

    #[must_use]
    pub fn set_master_seed(mut self, master_seed: u64) -> Self {
        self.parameters.master_seed = master_seed;
        self
    }

    #[must_use]
    pub fn set_progress_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.parameters.progress_log = Some(path.into());
        self
    }

    #[must_use]
    pub fn set_continue_from_progress_log(mut self, continue_from_progress_log: bool) -> Self {
        self.parameters.continue_from_progress_log = continue_from_progress_log;
        self
    }

    /// Restricts the run to the given scenarios.
    #[must_use]
    pub fn set_scenario_ids(mut self, scenario_ids: impl IntoIterator<Item = ScenarioId>) -> Self {
        self.parameters.scenario_ids = Some(scenario_ids.into_iter().collect());
        self
    }

    /// Starts every scenario from a recorded clock and plan counter. Each
    /// scenario still draws from the stream of its own derived seed.
    #[must_use]
    pub fn set_simulation_state(mut self, state: Arc<SimulationState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Resumes one scenario exactly from the state it recorded, random
    /// stream position included.
    #[must_use]
    pub fn set_scenario_simulation_state(mut self, scenario_id: ScenarioId, state: Arc<SimulationState>) -> Self {
        self.scenario_states.insert(scenario_id, state);
        self
    }

    /// Validates the configuration and orders the plugins.
    ///
    /// # Errors
    ///
    /// Plugin graph errors, invalid parameters, a dimension without levels,
    /// or a scenario id outside the scenario space.
    pub fn build(self) -> NucleusResult<Experiment> {
        self.parameters.validate()?;
        let order = resolve_order(&self.plugins)?;
        let plugins: Vec<Plugin> = order.into_iter().map(|idx| self.plugins[idx].clone()).collect();

        if self.dimensions.iter().any(|d| d.level_count() == 0) {
            return Err(ContractError::incompatible("dimension levels", "at least one level", 0).into());
        }
        let space = ScenarioSpace::new(self.dimensions.iter().map(|d| d.level_count()).collect());
        let scenario_count = space.scenario_count();
        let named = self
            .parameters
            .scenario_halt_times
            .keys()
            .chain(self.scenario_states.keys())
            .chain(self.parameters.scenario_ids.iter().flatten());
        for scenario_id in named {
            if scenario_id.index() >= scenario_count {
                return Err(ContractError::unknown(scenario_id).into());
            }
        }

        debug!(
            plugins = plugins.len(),
            dimensions = self.dimensions.len(),
            scenarios = scenario_count,
            "experiment built"
        );
        Ok(Experiment {
            plugins,
            dimensions: self.dimensions,
            consumers: self.consumers,
            parameters: self.parameters,
            state: self.state,
            scenario_states: self.scenario_states,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginGraphError;

    fn noop(id: &str) -> Plugin {
        Plugin::builder(id).set_initializer(|_| Ok(())).build().unwrap()
    }

    #[test]
    fn test_plugin_cycle_fails_the_build() {
        let a = Plugin::builder("a").add_dependency("b").set_initializer(|_| Ok(())).build().unwrap();
        let b = Plugin::builder("b").add_dependency("a").set_initializer(|_| Ok(())).build().unwrap();
        let err = Experiment::builder().add_plugin(a).add_plugin(b).build().unwrap_err();
        assert!(matches!(
            err,
            NucleusError::PluginGraph(PluginGraphError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_out_of_range_scenario_is_rejected() {
        let err = Experiment::builder()
            .add_plugin(noop("a"))
            .set_scenario_halt_time(ScenarioId::new(1), 3.0)
            .build()
            .unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn test_out_of_range_scenario_state_is_rejected() {
        let state = SimulationState::builder().build_state().unwrap();
        let err = Experiment::builder()
            .add_plugin(noop("a"))
            .set_scenario_simulation_state(ScenarioId::new(3), state)
            .build()
            .unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn test_empty_experiment_runs_one_scenario() {
        let report = Experiment::builder()
            .add_plugin(noop("a"))
            .build()
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(report.scenario_count, 1);
        assert_eq!(report.succeeded.keys().copied().collect::<Vec<_>>(), vec![ScenarioId::new(0)]);
        assert!(report.is_success());
    }

    #[test]
    fn test_panicking_scenario_is_reported() {
        let plugin = Plugin::builder("boom")
            .set_initializer(|_| panic!("initializer exploded"))
            .build()
            .unwrap();
        let report = Experiment::builder()
            .add_plugin(plugin)
            .set_thread_count(1)
            .build()
            .unwrap()
            .execute()
            .unwrap();
        let err = report.failed.get(&ScenarioId::new(0)).unwrap();
        assert!(matches!(
            err,
            NucleusError::Execution(ExecutionError::WorkerPanicked { message, .. }) if message.contains("exploded")
        ));
    }
}
