//! Contexts through which actors and data managers act on a simulation.
//!
//! A context is a short-lived mutable borrow of the kernel tagged with the
//! component it acts for. Plans, subscriptions and close callbacks created
//! through a context are owned by that component.

use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;

use rand_chacha::ChaCha8Rng;

use crate::error::{ContractError, NucleusResult};
use crate::event::{Event, EventLabel, EventLabeler, EventType, LabelKey};
use crate::ids::{ActorId, DataManagerId, Owner, PlanId, ScenarioId};
use crate::plan::{PendingPlan, PlanData, PlanSpec, PrioritizedPlanData};
use crate::plugin::data::PluginData;

use super::data_manager::{busy, DataManager};
use super::kernel::{
    ActorEventFn, ActorPlanFn, DataManagerEventFn, DataManagerPlanFn, EventCallback, Kernel, PlanCallback,
};
use super::output::Output;
use super::SimulationPhase;

/// Deferred actor initialization.
pub(crate) type ActorInit = ActorPlanFn;

fn check_label<E: Event>(label: &EventLabel) -> Result<(), ContractError> {
    let expected = EventType::of::<E>();
    if label.event_type() == expected {
        Ok(())
    } else {
        Err(ContractError::incompatible(
            "event label",
            format!("a label for {expected}"),
            label.event_type(),
        ))
    }
}

fn with_cell<T: DataManager, R>(
    kernel: &mut Kernel,
    f: impl FnOnce(&mut T, &mut DataManagerContext<'_>) -> NucleusResult<R>,
) -> NucleusResult<R> {
    let cell = kernel.data_managers.cell::<T>()?;
    let id = kernel
        .data_managers
        .id_of::<T>()
        .ok_or_else(|| ContractError::null("data manager id"))?;
    let mut data_manager = cell.try_borrow_mut().map_err(|_| busy::<T>())?;
    f(&mut *data_manager, &mut DataManagerContext::new(kernel, id))
}

/// Context of an actor callback.
pub struct ActorContext<'a> {
    kernel: &'a mut Kernel,
    actor_id: ActorId,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(kernel: &'a mut Kernel, actor_id: ActorId) -> Self {
        Self { kernel, actor_id }
    }

    const fn owner(&self) -> Owner {
        Owner::Actor(self.actor_id)
    }

    #[must_use]
    pub const fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Current simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.kernel.time
    }

    #[must_use]
    pub fn scenario_id(&self) -> ScenarioId {
        self.kernel.scenario_id
    }

    #[must_use]
    pub fn phase(&self) -> SimulationPhase {
        self.kernel.phase
    }

    /// Returns true if the simulation will collect plugin data at halt.
    #[must_use]
    pub fn state_recording_is_scheduled(&self) -> bool {
        self.kernel.record_state
    }

    /// Schedules a plan owned by this actor.
    ///
    /// # Errors
    ///
    /// `SchedulingInPast`, `IncompatibleValue` for a non-finite time, or
    /// `PhaseViolation` once the simulation has halted.
    pub fn add_plan(
        &mut self,
        spec: impl Into<PlanSpec>,
        plan: impl FnOnce(&mut ActorContext<'_>) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<PlanId> {
        let owner = self.owner();
        self.kernel.schedule(owner, spec.into(), PlanCallback::Actor(Box::new(plan)))
    }

    /// Cancels one of this actor's pending plans. Returns `None` if the plan
    /// already fired, never existed or belongs to someone else.
    pub fn cancel_plan(&mut self, plan_id: PlanId) -> Option<PendingPlan<()>> {
        let owner = self.owner();
        self.kernel.cancel_plan(owner, plan_id)
    }

    #[must_use]
    pub fn has_plan(&self, plan_id: PlanId) -> bool {
        self.kernel.plans.owner_of(plan_id) == Some(self.owner())
    }

    /// Subscribes to events matching `label`.
    ///
    /// # Errors
    ///
    /// `UnknownId` if the label's labeler is not registered, and
    /// `IncompatibleValue` if the label is for another event type.
    pub fn subscribe<E: Event>(
        &mut self,
        label: EventLabel,
        callback: impl Fn(&mut ActorContext<'_>, &E) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        check_label::<E>(&label)?;
        let erased: Rc<ActorEventFn> = Rc::new(
            move |ctx: &mut ActorContext<'_>, event: &dyn Any| -> NucleusResult<()> {
                match event.downcast_ref::<E>() {
                    Some(event) => callback(ctx, event),
                    None => Ok(()),
                }
            },
        );
        let owner = self.owner();
        self.kernel.subscribe(owner, label, EventCallback::Actor(erased))
    }

    /// Subscribes to every event of type `E`.
    ///
    /// # Errors
    ///
    /// As for [`Self::subscribe`].
    pub fn subscribe_to_type<E: Event>(
        &mut self,
        callback: impl Fn(&mut ActorContext<'_>, &E) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.subscribe(EventLabel::of_type::<E>(), callback)
    }

    /// Subscribes to events of type `E` whose primary key is `key`.
    ///
    /// # Errors
    ///
    /// As for [`Self::subscribe`].
    pub fn subscribe_by_primary_key<E: Event>(
        &mut self,
        key: impl Into<LabelKey>,
        callback: impl Fn(&mut ActorContext<'_>, &E) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.subscribe(EventLabel::by_primary_key::<E>(key), callback)
    }

    /// Drops this actor's subscriptions under `label`.
    pub fn unsubscribe(&mut self, label: &EventLabel) -> usize {
        let owner = self.owner();
        self.kernel.unsubscribe(owner, label)
    }

    /// Drops this actor's type-wide subscription for `E`.
    pub fn unsubscribe_from_type<E: Event>(&mut self) -> usize {
        self.unsubscribe(&EventLabel::of_type::<E>())
    }

    /// Runs `callback` once the simulation halts, after data managers' close
    /// callbacks.
    ///
    /// # Errors
    ///
    /// `PhaseViolation` once the simulation has halted.
    pub fn subscribe_to_simulation_close(
        &mut self,
        callback: impl FnOnce(&mut ActorContext<'_>) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        let owner = self.owner();
        self.kernel.subscribe_to_close(owner, PlanCallback::Actor(Box::new(callback)))
    }

    /// Sends a value to the output consumer.
    pub fn release_output<T: Any + Send + Sync>(&mut self, value: T) {
        self.kernel.release_output(Output::value(value));
    }

    /// Adds an actor. Its init runs after the current callback's work.
    ///
    /// # Errors
    ///
    /// `PhaseViolation` once the simulation has halted.
    pub fn add_actor(
        &mut self,
        init: impl FnOnce(&mut ActorContext<'_>) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<ActorId> {
        self.kernel.add_actor(Box::new(init))
    }

    /// Removes an actor together with its plans and subscriptions.
    ///
    /// # Errors
    ///
    /// `UnknownId` if the actor does not exist.
    pub fn remove_actor(&mut self, actor_id: ActorId) -> NucleusResult<()> {
        self.kernel.remove_actor(actor_id)
    }

    #[must_use]
    pub fn actor_exists(&self, actor_id: ActorId) -> bool {
        self.kernel.actor_exists(actor_id)
    }

    /// Calls into a data manager with that manager's own context.
    ///
    /// # Errors
    ///
    /// `UnknownId`, `DataManagerBusy`, or whatever `f` returns.
    pub fn with_data_manager<T: DataManager, R>(
        &mut self,
        f: impl FnOnce(&mut T, &mut DataManagerContext<'_>) -> NucleusResult<R>,
    ) -> NucleusResult<R> {
        with_cell(self.kernel, f)
    }

    /// Reads a data manager.
    ///
    /// # Errors
    ///
    /// `UnknownId` or `DataManagerBusy`.
    pub fn read_data_manager<T: DataManager, R>(&self, f: impl FnOnce(&T) -> R) -> NucleusResult<R> {
        self.kernel.data_managers.read::<T, R>(f)
    }

    /// This actor's pending plans that carry plan data, in firing order.
    #[must_use]
    pub fn all_prioritized_plan_data(&self) -> Vec<PrioritizedPlanData> {
        self.kernel.plans.prioritized_plan_data(self.owner())
    }

    /// This actor's pending plans whose plan data has type `P`.
    #[must_use]
    pub fn prioritized_plan_data<P: PlanData>(&self) -> Vec<PrioritizedPlanData> {
        self.all_prioritized_plan_data()
            .into_iter()
            .filter(|ppd| ppd.plan_data.as_ref().is::<P>())
            .collect()
    }

    /// Releases this actor's checkpoint from its close callback.
    ///
    /// # Errors
    ///
    /// `PhaseViolation` outside the halted phase, `IncompatibleValue` when
    /// state recording is off, and `DuplicateId` if plugin data of the same
    /// type was already released in this simulation.
    pub fn release_plugin_data(&mut self, data: impl PluginData) -> NucleusResult<()> {
        self.kernel.ensure_phase("release plugin data", &[SimulationPhase::Halted])?;
        if !self.kernel.record_state {
            return Err(ContractError::incompatible("state recording", "scheduled", "off").into());
        }
        self.kernel.release_state(Arc::new(data))
    }

    /// The scenario's random stream.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.kernel.rng
    }

    /// Ends the run after the current plan.
    pub fn halt(&mut self) {
        self.kernel.halt();
    }
}

/// Context of a data manager callback.
pub struct DataManagerContext<'a> {
    kernel: &'a mut Kernel,
    data_manager_id: DataManagerId,
}

impl<'a> DataManagerContext<'a> {
    pub(crate) fn new(kernel: &'a mut Kernel, data_manager_id: DataManagerId) -> Self {
        Self {
            kernel,
            data_manager_id,
        }
    }

    const fn owner(&self) -> Owner {
        Owner::DataManager(self.data_manager_id)
    }

    fn ensure_owner<D: DataManager>(&self) -> Result<(), ContractError> {
        if self.kernel.data_managers.id_of::<D>() == Some(self.data_manager_id) {
            Ok(())
        } else {
            Err(ContractError::incompatible(
                "data manager",
                self.kernel.data_managers.type_name(self.data_manager_id),
                std::any::type_name::<D>(),
            ))
        }
    }

    #[must_use]
    pub const fn data_manager_id(&self) -> DataManagerId {
        self.data_manager_id
    }

    #[must_use]
    pub fn time(&self) -> f64 {
        self.kernel.time
    }

    #[must_use]
    pub fn scenario_id(&self) -> ScenarioId {
        self.kernel.scenario_id
    }

    #[must_use]
    pub fn phase(&self) -> SimulationPhase {
        self.kernel.phase
    }

    #[must_use]
    pub fn state_recording_is_scheduled(&self) -> bool {
        self.kernel.record_state
    }

    /// Publishes an event. It is dispatched once the current callback
    /// returns, after events published before it.
    pub fn publish<E: Event>(&mut self, event: E) {
        self.kernel.publish(event);
    }

    /// Registers a labeler for an event type this manager publishes.
    ///
    /// # Errors
    ///
    /// `PhaseViolation` after initialization, `DuplicateLabelerId` if the id
    /// is taken for `E`.
    pub fn register_labeler<E: Event>(&mut self, labeler: EventLabeler<E>) -> NucleusResult<()> {
        self.kernel
            .ensure_phase("register event labeler", &[SimulationPhase::Initializing])?;
        Ok(self.kernel.router.register_labeler(labeler)?)
    }

    /// Schedules a plan that runs against this manager.
    ///
    /// # Errors
    ///
    /// `IncompatibleValue` if `D` is not this manager's type, otherwise as
    /// for [`ActorContext::add_plan`].
    pub fn add_plan<D: DataManager>(
        &mut self,
        spec: impl Into<PlanSpec>,
        plan: impl FnOnce(&mut D, &mut DataManagerContext<'_>) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<PlanId> {
        self.ensure_owner::<D>()?;
        let callback: DataManagerPlanFn = Box::new(move |ctx: &mut DataManagerContext<'_>| -> NucleusResult<()> {
            let cell = ctx.kernel.data_managers.cell::<D>()?;
            let mut data_manager = cell.try_borrow_mut().map_err(|_| busy::<D>())?;
            plan(&mut *data_manager, ctx)
        });
        let owner = self.owner();
        self.kernel.schedule(owner, spec.into(), PlanCallback::DataManager(callback))
    }

    /// Cancels one of this manager's pending plans.
    pub fn cancel_plan(&mut self, plan_id: PlanId) -> Option<PendingPlan<()>> {
        let owner = self.owner();
        self.kernel.cancel_plan(owner, plan_id)
    }

    #[must_use]
    pub fn has_plan(&self, plan_id: PlanId) -> bool {
        self.kernel.plans.owner_of(plan_id) == Some(self.owner())
    }

    /// This manager's pending plans whose plan data has type `P`, in firing
    /// order.
    #[must_use]
    pub fn prioritized_plan_data<P: PlanData>(&self) -> Vec<PrioritizedPlanData> {
        self.kernel
            .plans
            .prioritized_plan_data(self.owner())
            .into_iter()
            .filter(|ppd| ppd.plan_data.as_ref().is::<P>())
            .collect()
    }

    /// Subscribes this manager to events matching `label`.
    ///
    /// # Errors
    ///
    /// `IncompatibleValue` if `D` is not this manager's type or the label is
    /// for another event type; `UnknownId` if the labeler is unknown.
    pub fn subscribe<D: DataManager, E: Event>(
        &mut self,
        label: EventLabel,
        callback: impl Fn(&mut D, &mut DataManagerContext<'_>, &E) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.ensure_owner::<D>()?;
        check_label::<E>(&label)?;
        let erased: Rc<DataManagerEventFn> = Rc::new(
            move |ctx: &mut DataManagerContext<'_>, event: &dyn Any| -> NucleusResult<()> {
                let Some(event) = event.downcast_ref::<E>() else {
                    return Ok(());
                };
                let cell = ctx.kernel.data_managers.cell::<D>()?;
                let mut data_manager = cell.try_borrow_mut().map_err(|_| busy::<D>())?;
                callback(&mut *data_manager, ctx, event)
            },
        );
        let owner = self.owner();
        self.kernel.subscribe(owner, label, EventCallback::DataManager(erased))
    }

    /// Subscribes this manager to every event of type `E`.
    ///
    /// # Errors
    ///
    /// As for [`Self::subscribe`].
    pub fn subscribe_to_type<D: DataManager, E: Event>(
        &mut self,
        callback: impl Fn(&mut D, &mut DataManagerContext<'_>, &E) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.subscribe(EventLabel::of_type::<E>(), callback)
    }

    /// Subscribes this manager to events of type `E` with primary key `key`.
    ///
    /// # Errors
    ///
    /// As for [`Self::subscribe`].
    pub fn subscribe_by_primary_key<D: DataManager, E: Event>(
        &mut self,
        key: impl Into<LabelKey>,
        callback: impl Fn(&mut D, &mut DataManagerContext<'_>, &E) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.subscribe(EventLabel::by_primary_key::<E>(key), callback)
    }

    pub fn unsubscribe(&mut self, label: &EventLabel) -> usize {
        let owner = self.owner();
        self.kernel.unsubscribe(owner, label)
    }

    /// Runs `callback` once the simulation halts, before actors' close
    /// callbacks.
    ///
    /// # Errors
    ///
    /// `IncompatibleValue` if `D` is not this manager's type, `PhaseViolation`
    /// once the simulation has halted.
    pub fn subscribe_to_simulation_close<D: DataManager>(
        &mut self,
        callback: impl FnOnce(&mut D, &mut DataManagerContext<'_>) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.ensure_owner::<D>()?;
        let erased: DataManagerPlanFn = Box::new(move |ctx: &mut DataManagerContext<'_>| -> NucleusResult<()> {
            let cell = ctx.kernel.data_managers.cell::<D>()?;
            let mut data_manager = cell.try_borrow_mut().map_err(|_| busy::<D>())?;
            callback(&mut *data_manager, ctx)
        });
        let owner = self.owner();
        self.kernel.subscribe_to_close(owner, PlanCallback::DataManager(erased))
    }

    pub fn release_output<T: Any + Send + Sync>(&mut self, value: T) {
        self.kernel.release_output(Output::value(value));
    }

    /// Adds an actor.
    ///
    /// # Errors
    ///
    /// `PhaseViolation` once the simulation has halted.
    pub fn add_actor(
        &mut self,
        init: impl FnOnce(&mut ActorContext<'_>) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<ActorId> {
        self.kernel.add_actor(Box::new(init))
    }

    /// Removes an actor together with its plans and subscriptions.
    ///
    /// # Errors
    ///
    /// `UnknownId` if the actor does not exist.
    pub fn remove_actor(&mut self, actor_id: ActorId) -> NucleusResult<()> {
        self.kernel.remove_actor(actor_id)
    }

    #[must_use]
    pub fn actor_exists(&self, actor_id: ActorId) -> bool {
        self.kernel.actor_exists(actor_id)
    }

    /// Calls into another data manager.
    ///
    /// # Errors
    ///
    /// `UnknownId`, `DataManagerBusy` (always, for this manager's own type),
    /// or whatever `f` returns.
    pub fn with_data_manager<T: DataManager, R>(
        &mut self,
        f: impl FnOnce(&mut T, &mut DataManagerContext<'_>) -> NucleusResult<R>,
    ) -> NucleusResult<R> {
        with_cell(self.kernel, f)
    }

    /// Reads another data manager.
    ///
    /// # Errors
    ///
    /// `UnknownId` or `DataManagerBusy`.
    pub fn read_data_manager<T: DataManager, R>(&self, f: impl FnOnce(&T) -> R) -> NucleusResult<R> {
        self.kernel.data_managers.read::<T, R>(f)
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.kernel.rng
    }

    pub fn halt(&mut self) {
        self.kernel.halt();
    }
}
