//! Single-scenario simulation.
//!
//! A simulation initializes its plugins in dependency order, then runs plans
//! one at a time. Each plan's callback, and every event it publishes, is
//! fully processed before the next plan is taken. Nothing inside a
//! simulation is shared across threads.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ContractError, NucleusResult};
use crate::ids::ScenarioId;
use crate::plugin::{resolve_order, Plugin};

pub mod context;
pub mod data_manager;
pub(crate) mod kernel;
pub mod output;
pub mod state;

pub use context::{ActorContext, DataManagerContext};
pub use data_manager::{DataManager, DataManagerRegistry};
pub use output::Output;
pub use state::{SimulationState, SimulationStateBuilder, StateContext};

use kernel::{Kernel, KernelConfig};

/// Lifecycle phase of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulationPhase {
    Initializing,
    Running,
    Halted,
    Terminated,
}

impl fmt::Display for SimulationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Halted => write!(f, "halted"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub scenario_id: ScenarioId,
    pub final_time: f64,
    pub plans_executed: u64,
    pub events_published: u64,
    pub actors_created: u64,
}

/// A configured, not yet executed simulation.
pub struct Simulation {
    plugins: Vec<Plugin>,
    scenario_id: ScenarioId,
    halt_time: Option<f64>,
    record_state: bool,
    seed: u64,
    state: Option<Arc<SimulationState>>,
    output: Option<Box<dyn FnMut(Output)>>,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("plugins", &self.plugins.iter().map(Plugin::id).collect::<Vec<_>>())
            .field("scenario_id", &self.scenario_id)
            .field("halt_time", &self.halt_time)
            .field("record_state", &self.record_state)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Starts building a simulation.
    #[must_use]
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::default()
    }

    /// Runs the simulation to completion.
    ///
    /// # Errors
    ///
    /// The first error raised by any plugin initializer, data manager, actor
    /// or kernel contract check.
    pub fn execute(self) -> NucleusResult<SimulationReport> {
        debug!(scenario = %self.scenario_id, plugins = self.plugins.len(), "executing simulation");
        let output = self.output.unwrap_or_else(|| Box::new(|_: Output| {}));
        let kernel = Kernel::new(KernelConfig {
            scenario_id: self.scenario_id,
            halt_time: self.halt_time,
            record_state: self.record_state,
            seed: self.seed,
            state: self.state,
            output,
        });
        kernel.run(&self.plugins)
    }
}

/// Builder for [`Simulation`].
#[derive(Default)]
pub struct SimulationBuilder {
    plugins: Vec<Plugin>,
    scenario_id: ScenarioId,
    halt_time: Option<f64>,
    record_state: bool,
    seed: u64,
    state: Option<Arc<SimulationState>>,
    output: Option<Box<dyn FnMut(Output)>>,
}

impl SimulationBuilder {
    #[must_use]
    pub fn add_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    #[must_use]
    pub fn add_plugins(mut self, plugins: impl IntoIterator<Item = Plugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    #[must_use]
    pub fn set_scenario_id(mut self, scenario_id: ScenarioId) -> Self {
        self.scenario_id = scenario_id;
        self
    }

    /// Plans later than `halt_time` do not run; the clock stops there.
    #[must_use]
    pub fn set_halt_time(mut self, halt_time: f64) -> Self {
        self.halt_time = Some(halt_time);
        self
    }

    #[must_use]
    pub fn set_halt_time_opt(mut self, halt_time: Option<f64>) -> Self {
        self.halt_time = halt_time;
        self
    }

    /// Collects plugin data from every data manager at halt.
    #[must_use]
    pub fn set_record_state(mut self, record_state: bool) -> Self {
        self.record_state = record_state;
        self
    }

    /// Seeds the scenario's random stream.
    #[must_use]
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Resumes from a recorded state. The recorded random stream position
    /// takes precedence over the seed.
    #[must_use]
    pub fn set_simulation_state(mut self, state: Arc<SimulationState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Receives every released output and checkpoint value.
    #[must_use]
    pub fn set_output_consumer(mut self, consumer: impl FnMut(Output) + 'static) -> Self {
        self.output = Some(Box::new(consumer));
        self
    }

    /// Validates the configuration and orders plugins by dependency.
    ///
    /// # Errors
    ///
    /// Plugin graph errors, a duplicate plugin id, or a non-finite halt time.
    pub fn build(self) -> NucleusResult<Simulation> {
        if let Some(halt_time) = self.halt_time {
            if !halt_time.is_finite() {
                return Err(ContractError::incompatible("halt time", "a finite time", halt_time).into());
            }
        }
        let order = resolve_order(&self.plugins)?;
        let plugins = order.into_iter().map(|idx| self.plugins[idx].clone()).collect();
        Ok(Simulation {
            plugins,
            scenario_id: self.scenario_id,
            halt_time: self.halt_time,
            record_state: self.record_state,
            seed: self.seed,
            state: self.state,
            output: self.output,
        })
    }
}
