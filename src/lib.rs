//! # Nucleus - discrete-event simulation kernel
//!
//! Nucleus runs agent-based models assembled from plugins. Each plugin
//! contributes data managers, which own its mutable state, and actors, which
//! drive the model through plans (deferred callbacks) and labeled events.
//! Experiments sweep dimension levels across many independent scenarios on a
//! pool of worker threads.
//!
//! ## Core Concepts
//!
//! - **Plugin**: id, dependencies, immutable plugin data and an initializer
//! - **DataManager**: exclusive owner of one plugin's state within a run
//! - **Plan**: a callback scheduled at a time, ordered by (time, priority, arrival)
//! - **EventLabel**: compound key routing events to interested subscribers
//! - **Experiment**: the Cartesian product of dimension levels, one scenario each
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nucleus::{Experiment, Plugin};
//!
//! let plugin = Plugin::builder("clock")
//!     .set_initializer(|ctx| {
//!         ctx.add_actor(|actor| {
//!             actor.add_plan(1.0, |actor| {
//!                 actor.release_output(format!("tick at {}", actor.time()));
//!                 Ok(())
//!             })?;
//!             Ok(())
//!         });
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let report = Experiment::builder()
//!     .add_plugin(plugin)
//!     .set_thread_count(4)
//!     .build()?
//!     .execute()?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Identity and errors
pub mod error;
pub mod ids;

// Composition, events and scheduling
pub mod event;
pub mod plan;
pub mod plugin;

// Execution
pub mod experiment;
pub mod simulation;

pub use error::{ContractError, ExecutionError, NucleusError, NucleusResult, PluginGraphError};
pub use ids::{ActorId, DataManagerId, EventLabelerId, IdKind, Identifier, Owner, PlanId, PluginId, ScenarioId};

pub use event::{Event, EventLabel, EventLabeler, EventType, LabelKey, LabelerContext};
pub use plan::{PlanData, PlanSpec, PrioritizedPlanData};
pub use plugin::{BuilderState, Plugin, PluginBuilder, PluginContext, PluginData, PluginDataBuilder};

pub use experiment::{
    Dimension, DimensionContext, Experiment, ExperimentBuilder, ExperimentContext, ExperimentParameters,
    ExperimentReport, FunctionalDimension, ScenarioStatus,
};
pub use simulation::{
    ActorContext, DataManager, DataManagerContext, Output, Simulation, SimulationBuilder, SimulationPhase,
    SimulationReport, SimulationState, StateContext,
};
