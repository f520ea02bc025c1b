//! The single-threaded simulation core.
//!
//! The kernel owns the clock, the plan queue, the event router, the data
//! manager registry and the pending work queue. Contexts borrow it mutably
//! for the duration of one callback.

use std::any::Any;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::error::{ContractError, NucleusResult};
use crate::event::{Event, EventLabel, EventRouter, LabelerContext, PublishedEvent};
use crate::ids::{ActorId, DataManagerId, Owner, PlanId, ScenarioId};
use crate::plan::{PendingPlan, PlanQueue, PlanSpec};
use crate::plugin::data::PluginData;
use crate::plugin::{Plugin, PluginContext};

use super::context::{ActorContext, ActorInit, DataManagerContext};
use super::data_manager::DataManagerRegistry;
use super::output::Output;
use super::state::{ReleasedTypes, SimulationState, StateContext};
use super::{SimulationPhase, SimulationReport};

pub(crate) type ActorEventFn = dyn Fn(&mut ActorContext<'_>, &dyn Any) -> NucleusResult<()>;
pub(crate) type DataManagerEventFn = dyn Fn(&mut DataManagerContext<'_>, &dyn Any) -> NucleusResult<()>;
pub(crate) type ActorPlanFn = Box<dyn FnOnce(&mut ActorContext<'_>) -> NucleusResult<()>>;
pub(crate) type DataManagerPlanFn = Box<dyn FnOnce(&mut DataManagerContext<'_>) -> NucleusResult<()>>;

#[derive(Clone)]
pub(crate) enum EventCallback {
    Actor(Rc<ActorEventFn>),
    DataManager(Rc<DataManagerEventFn>),
}

pub(crate) enum PlanCallback {
    Actor(ActorPlanFn),
    DataManager(DataManagerPlanFn),
}

/// Close callbacks share the plan callback shapes.
pub(crate) type CloseCallback = PlanCallback;

enum Work {
    Event(PublishedEvent),
    ActorInit(ActorId, ActorInit),
}

pub(crate) struct Kernel {
    pub(crate) scenario_id: ScenarioId,
    pub(crate) phase: SimulationPhase,
    pub(crate) time: f64,
    halt_time: Option<f64>,
    halt_requested: bool,
    pub(crate) record_state: bool,
    pub(crate) plans: PlanQueue<PlanCallback>,
    pub(crate) router: EventRouter<EventCallback>,
    pub(crate) data_managers: DataManagerRegistry,
    actors: BTreeSet<ActorId>,
    next_actor_id: u64,
    work: VecDeque<Work>,
    close_callbacks: Vec<(Owner, CloseCallback)>,
    output: Box<dyn FnMut(Output)>,
    released_state: ReleasedTypes,
    pub(crate) rng: ChaCha8Rng,
    plans_executed: u64,
    events_published: u64,
}

pub(crate) struct KernelConfig {
    pub(crate) scenario_id: ScenarioId,
    pub(crate) halt_time: Option<f64>,
    pub(crate) record_state: bool,
    pub(crate) seed: u64,
    pub(crate) state: Option<Arc<SimulationState>>,
    pub(crate) output: Box<dyn FnMut(Output)>,
}

impl Kernel {
    pub(crate) fn new(config: KernelConfig) -> Self {
        let mut kernel = Self {
            scenario_id: config.scenario_id,
            phase: SimulationPhase::Initializing,
            time: 0.0,
            halt_time: config.halt_time,
            halt_requested: false,
            record_state: config.record_state,
            plans: PlanQueue::new(),
            router: EventRouter::new(),
            data_managers: DataManagerRegistry::default(),
            actors: BTreeSet::new(),
            next_actor_id: 0,
            work: VecDeque::new(),
            close_callbacks: Vec::new(),
            output: config.output,
            released_state: ReleasedTypes::default(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            plans_executed: 0,
            events_published: 0,
        };
        if let Some(state) = config.state {
            kernel.time = state.start_time();
            kernel.plans.advance_sequence(state.next_plan_sequence());
            kernel.rng = state.restore_rng();
        }
        kernel
    }

    /// Runs the whole lifecycle and returns the report. `plugins` must
    /// already be in dependency order.
    pub(crate) fn run(mut self, plugins: &[Plugin]) -> NucleusResult<SimulationReport> {
        self.initialize(plugins)?;

        self.transition(SimulationPhase::Running);
        self.run_plans()?;

        self.transition(SimulationPhase::Halted);
        self.close()?;
        if self.record_state {
            self.collect_state()?;
        }

        self.transition(SimulationPhase::Terminated);
        Ok(SimulationReport {
            scenario_id: self.scenario_id,
            final_time: self.time,
            plans_executed: self.plans_executed,
            events_published: self.events_published,
            actors_created: self.next_actor_id,
        })
    }

    fn transition(&mut self, phase: SimulationPhase) {
        debug!(scenario = %self.scenario_id, from = %self.phase, to = %phase, time = self.time, "simulation phase");
        self.phase = phase;
    }

    fn initialize(&mut self, plugins: &[Plugin]) -> NucleusResult<()> {
        let mut actor_inits: Vec<ActorInit> = Vec::new();
        for plugin in plugins {
            trace!(plugin = %plugin.id(), "initializing plugin");
            let mut ctx = PluginContext::new(plugin, self.scenario_id, &mut self.data_managers, &mut actor_inits);
            plugin.initialize(&mut ctx)?;
        }

        let ids: Vec<DataManagerId> = self.data_managers.ids().collect();
        for id in ids {
            let cell = self.data_managers.erased(id)?;
            {
                let mut data_manager = cell
                    .try_borrow_mut()
                    .map_err(|_| self.data_managers.busy(id))?;
                data_manager.init(&mut DataManagerContext::new(self, id))?;
            }
            self.drain_work()?;
        }

        for init in actor_inits {
            self.add_actor(init)?;
        }
        self.drain_work()
    }

    fn run_plans(&mut self) -> NucleusResult<()> {
        loop {
            if self.halt_requested || !self.plans.has_active() {
                break;
            }
            let Some(next_time) = self.plans.peek_time() else {
                break;
            };
            if let Some(halt_time) = self.halt_time {
                if next_time > halt_time {
                    // A resumed run may already be past its halt time.
                    self.time = self.time.max(halt_time);
                    break;
                }
            }
            let Some(plan) = self.plans.pop() else {
                break;
            };
            self.time = plan.time;
            self.plans_executed += 1;
            match (plan.owner, plan.payload) {
                (Owner::Actor(actor_id), PlanCallback::Actor(callback)) => {
                    callback(&mut ActorContext::new(self, actor_id))?;
                }
                (Owner::DataManager(dm_id), PlanCallback::DataManager(callback)) => {
                    callback(&mut DataManagerContext::new(self, dm_id))?;
                }
                (owner, _) => {
                    return Err(ContractError::incompatible("plan owner", "matching callback kind", owner).into());
                }
            }
            self.drain_work()?;
        }
        Ok(())
    }

    fn close(&mut self) -> NucleusResult<()> {
        let mut callbacks = std::mem::take(&mut self.close_callbacks);
        callbacks.sort_by_key(|(owner, _)| matches!(owner, Owner::Actor(_)));
        for (owner, callback) in callbacks {
            match (owner, callback) {
                (Owner::DataManager(dm_id), PlanCallback::DataManager(callback)) => {
                    callback(&mut DataManagerContext::new(self, dm_id))?;
                }
                (Owner::Actor(actor_id), PlanCallback::Actor(callback)) => {
                    if self.actors.contains(&actor_id) {
                        callback(&mut ActorContext::new(self, actor_id))?;
                    }
                }
                (owner, _) => {
                    return Err(ContractError::incompatible("close owner", "matching callback kind", owner).into());
                }
            }
            self.drain_work()?;
        }
        Ok(())
    }

    fn collect_state(&mut self) -> NucleusResult<()> {
        let ids: Vec<DataManagerId> = self.data_managers.ids().collect();
        for id in ids {
            let cell = self.data_managers.erased(id)?;
            let data_manager = cell.try_borrow().map_err(|_| self.data_managers.busy(id))?;
            data_manager.record_state(&mut StateContext::new(self, id))?;
        }

        let mut builder = SimulationState::builder();
        builder
            .set_start_time(self.time)
            .set_next_plan_sequence(self.plans.next_sequence())
            .set_rng(&self.rng);
        let state = builder.build_state()?;
        self.release_state(state)
    }

    pub(crate) fn release_state(&mut self, data: Arc<dyn PluginData>) -> NucleusResult<()> {
        self.released_state.claim(data.as_ref())?;
        (self.output)(Output::PluginData(data));
        Ok(())
    }

    pub(crate) fn release_output(&mut self, output: Output) {
        (self.output)(output);
    }

    fn drain_work(&mut self) -> NucleusResult<()> {
        while let Some(work) = self.work.pop_front() {
            match work {
                Work::Event(event) => self.dispatch(&event)?,
                Work::ActorInit(actor_id, init) => {
                    if self.actors.contains(&actor_id) {
                        init(&mut ActorContext::new(self, actor_id))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &PublishedEvent) -> NucleusResult<()> {
        let targets = {
            let ctx = LabelerContext::new(&self.data_managers, self.time);
            self.router.route(event, &ctx)?
        };
        trace!(event_type = event.event_type.name(), subscribers = targets.len(), "dispatching event");
        for target in targets {
            match (target.owner, target.callback) {
                (Owner::DataManager(dm_id), EventCallback::DataManager(callback)) => {
                    callback(&mut DataManagerContext::new(self, dm_id), event.value.as_ref())?;
                }
                (Owner::Actor(actor_id), EventCallback::Actor(callback)) => {
                    if self.actors.contains(&actor_id) {
                        callback(&mut ActorContext::new(self, actor_id), event.value.as_ref())?;
                    }
                }
                (owner, _) => {
                    return Err(ContractError::incompatible("subscriber", "matching callback kind", owner).into());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn ensure_phase(&self, operation: &str, allowed: &[SimulationPhase]) -> Result<(), ContractError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(ContractError::PhaseViolation {
                operation: operation.to_string(),
                phase: self.phase.to_string(),
            })
        }
    }

    pub(crate) fn schedule(&mut self, owner: Owner, spec: PlanSpec, callback: PlanCallback) -> NucleusResult<PlanId> {
        self.ensure_phase("add plan", &[SimulationPhase::Initializing, SimulationPhase::Running])?;
        Ok(self.plans.schedule(self.time, spec, owner, callback)?)
    }

    /// Removes a pending plan, but only one scheduled by `owner`.
    pub(crate) fn cancel_plan(&mut self, owner: Owner, plan_id: PlanId) -> Option<PendingPlan<()>> {
        let matches = self.plans.owner_of(plan_id) == Some(owner);
        if !matches {
            debug!(%owner, plan = %plan_id, "cancel of unknown or foreign plan ignored");
            return None;
        }
        self.plans.cancel(plan_id).map(PendingPlan::discard_payload)
    }

    pub(crate) fn subscribe(&mut self, owner: Owner, label: EventLabel, callback: EventCallback) -> NucleusResult<()> {
        Ok(self.router.subscribe(label, owner, callback)?)
    }

    pub(crate) fn unsubscribe(&mut self, owner: Owner, label: &EventLabel) -> usize {
        self.router.unsubscribe(label, owner)
    }

    pub(crate) fn subscribe_to_close(&mut self, owner: Owner, callback: CloseCallback) -> NucleusResult<()> {
        self.ensure_phase(
            "subscribe to simulation close",
            &[SimulationPhase::Initializing, SimulationPhase::Running],
        )?;
        self.close_callbacks.push((owner, callback));
        Ok(())
    }

    pub(crate) fn publish<E: Event>(&mut self, event: E) {
        self.events_published += 1;
        self.work.push_back(Work::Event(PublishedEvent::new(event)));
    }

    pub(crate) fn add_actor(&mut self, init: ActorInit) -> NucleusResult<ActorId> {
        self.ensure_phase("add actor", &[SimulationPhase::Initializing, SimulationPhase::Running])?;
        let actor_id = ActorId::new(self.next_actor_id);
        self.next_actor_id += 1;
        self.actors.insert(actor_id);
        self.work.push_back(Work::ActorInit(actor_id, init));
        Ok(actor_id)
    }

    pub(crate) fn remove_actor(&mut self, actor_id: ActorId) -> NucleusResult<()> {
        if !self.actors.remove(&actor_id) {
            return Err(ContractError::unknown(&actor_id).into());
        }
        let owner = Owner::Actor(actor_id);
        let plans = self.plans.remove_where(|o| o == owner);
        let subscriptions = self.router.unsubscribe_owner(owner);
        self.close_callbacks.retain(|(o, _)| *o != owner);
        debug!(actor = %actor_id, plans, subscriptions, "removed actor");
        Ok(())
    }

    pub(crate) fn actor_exists(&self, actor_id: ActorId) -> bool {
        self.actors.contains(&actor_id)
    }

    pub(crate) fn halt(&mut self) {
        self.halt_requested = true;
    }
}
