//! Checkpoint collection and the kernel's own resumable state.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{ContractError, NucleusResult};
use crate::ids::{DataManagerId, IdKind, Owner, ScenarioId};
use crate::plan::{PlanData, PrioritizedPlanData};
use crate::plugin::data::{BuilderState, PluginData, PluginDataBuilder};

use super::data_manager::DataManager;
use super::kernel::Kernel;

/// Handed to [`DataManager::record_state`] when a simulation halts with state
/// recording on.
pub struct StateContext<'a> {
    kernel: &'a mut Kernel,
    data_manager_id: DataManagerId,
}

impl<'a> StateContext<'a> {
    pub(crate) fn new(kernel: &'a mut Kernel, data_manager_id: DataManagerId) -> Self {
        Self {
            kernel,
            data_manager_id,
        }
    }

    /// The halt time. A resumed simulation starts here.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.kernel.time
    }

    #[must_use]
    pub fn scenario_id(&self) -> ScenarioId {
        self.kernel.scenario_id
    }

    /// This manager's pending plans that carry plan data, in firing order.
    #[must_use]
    pub fn all_prioritized_plan_data(&self) -> Vec<PrioritizedPlanData> {
        self.kernel
            .plans
            .prioritized_plan_data(Owner::DataManager(self.data_manager_id))
    }

    /// This manager's pending plans whose plan data has type `P`.
    #[must_use]
    pub fn prioritized_plan_data<P: PlanData>(&self) -> Vec<PrioritizedPlanData> {
        self.all_prioritized_plan_data()
            .into_iter()
            .filter(|ppd| ppd.plan_data.as_ref().is::<P>())
            .collect()
    }

    /// Reads another data manager while collecting.
    ///
    /// # Errors
    ///
    /// `UnknownId` or `DataManagerBusy`.
    pub fn read_data_manager<T: DataManager, R>(&self, f: impl FnOnce(&T) -> R) -> NucleusResult<R> {
        self.kernel.data_managers.read::<T, R>(f)
    }

    /// Releases the manager's checkpoint.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if plugin data of the same type was already released in
    /// this simulation.
    pub fn release_plugin_data(&mut self, data: impl PluginData) -> NucleusResult<()> {
        self.kernel.release_state(Arc::new(data))
    }

    /// Releases an already shared checkpoint value.
    ///
    /// # Errors
    ///
    /// `DuplicateId` as for [`Self::release_plugin_data`].
    pub fn release_shared_plugin_data(&mut self, data: Arc<dyn PluginData>) -> NucleusResult<()> {
        self.kernel.release_state(data)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StateContent {
    start_time: f64,
    next_plan_sequence: u64,
    rng_seed: [u8; 32],
    rng_word_pos: u128,
}

impl Default for StateContent {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            next_plan_sequence: 0,
            rng_seed: ChaCha8Rng::seed_from_u64(0).get_seed(),
            rng_word_pos: 0,
        }
    }
}

/// The kernel's resumable state: clock, plan arrival counter and random
/// stream position.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    content: Arc<StateContent>,
}

impl SimulationState {
    #[must_use]
    pub fn builder() -> SimulationStateBuilder {
        SimulationStateBuilder {
            state: BuilderState::default(),
        }
    }

    #[must_use]
    pub fn start_time(&self) -> f64 {
        self.content.start_time
    }

    #[must_use]
    pub fn next_plan_sequence(&self) -> u64 {
        self.content.next_plan_sequence
    }

    #[must_use]
    pub fn rng_seed(&self) -> [u8; 32] {
        self.content.rng_seed
    }

    #[must_use]
    pub fn rng_word_pos(&self) -> u128 {
        self.content.rng_word_pos
    }

    /// The same clock and plan counter with a fresh stream seeded from
    /// `seed`.
    #[must_use]
    pub fn reseeded(&self, seed: u64) -> SimulationState {
        let rng = ChaCha8Rng::seed_from_u64(seed);
        SimulationState {
            content: Arc::new(StateContent {
                rng_seed: rng.get_seed(),
                rng_word_pos: 0,
                ..(*self.content).clone()
            }),
        }
    }

    pub(crate) fn restore_rng(&self) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::from_seed(self.content.rng_seed);
        rng.set_word_pos(self.content.rng_word_pos);
        rng
    }
}

impl PluginData for SimulationState {
    fn clone_builder(&self) -> Box<dyn PluginDataBuilder> {
        Box::new(SimulationStateBuilder {
            state: BuilderState::sealed(Arc::clone(&self.content)),
        })
    }

    fn empty_builder(&self) -> Box<dyn PluginDataBuilder> {
        Box::new(SimulationState::builder())
    }
}

/// Builder for [`SimulationState`].
#[derive(Debug)]
pub struct SimulationStateBuilder {
    state: BuilderState<StateContent>,
}

impl SimulationStateBuilder {
    pub fn set_start_time(&mut self, start_time: f64) -> &mut Self {
        self.state.edit().start_time = start_time;
        self
    }

    pub fn set_next_plan_sequence(&mut self, sequence: u64) -> &mut Self {
        self.state.edit().next_plan_sequence = sequence;
        self
    }

    /// Captures the position of a random stream.
    pub fn set_rng(&mut self, rng: &ChaCha8Rng) -> &mut Self {
        let content = self.state.edit();
        content.rng_seed = rng.get_seed();
        content.rng_word_pos = rng.get_word_pos();
        self
    }

    /// Builds the concrete state.
    ///
    /// # Errors
    ///
    /// `IncompatibleValue` if the start time is not finite.
    pub fn build_state(&mut self) -> NucleusResult<Arc<SimulationState>> {
        let content = self.state.seal_with(|c| {
            if c.start_time.is_finite() {
                Ok(())
            } else {
                Err(ContractError::incompatible("start time", "a finite time", c.start_time))
            }
        })?;
        Ok(Arc::new(SimulationState { content }))
    }
}

impl PluginDataBuilder for SimulationStateBuilder {
    fn build(&mut self) -> NucleusResult<Arc<dyn PluginData>> {
        Ok(self.build_state()?)
    }
}

/// Tracks which plugin data types were released by one simulation.
#[derive(Debug, Default)]
pub(crate) struct ReleasedTypes(HashSet<TypeId>);

impl ReleasedTypes {
    pub(crate) fn claim(&mut self, data: &dyn PluginData) -> Result<(), ContractError> {
        if self.0.insert(data.as_any().type_id()) {
            Ok(())
        } else {
            Err(ContractError::DuplicateId {
                kind: IdKind::PluginData,
                id: data.type_name().to_string(),
            })
        }
    }
}
