//! Plans: deferred callbacks ordered by time, priority and arrival.

use std::fmt;
use std::sync::Arc;

use crate::plugin::data::AsAny;

/// Time/priority ordered plan queue.
pub mod queue;

pub use queue::{PendingPlan, PlanQueue};

/// Serializable description of a pending plan's intent.
///
/// A data manager attaches plan data to the plans it wants restored after a
/// checkpoint, and rebuilds the callback from it when it is handed back.
pub trait PlanData: AsAny + fmt::Debug {}

impl dyn PlanData {
    /// Downcasts to a concrete plan data type.
    #[must_use]
    pub fn downcast_ref<T: PlanData>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns true if the concrete type is `T`.
    #[must_use]
    pub fn is<T: PlanData>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// A pending plan's scheduling coordinates together with its intent.
///
/// Time and arrival sequence are carried alongside the priority so that a
/// restored queue fires in exactly the order of the original.
#[derive(Debug, Clone)]
pub struct PrioritizedPlanData {
    pub time: f64,
    pub priority: i64,
    pub sequence: u64,
    pub active: bool,
    pub plan_data: Arc<dyn PlanData>,
}

impl PrioritizedPlanData {
    /// Downcasts the plan data.
    #[must_use]
    pub fn data<T: PlanData>(&self) -> Option<&T> {
        self.plan_data.as_ref().downcast_ref::<T>()
    }

    /// A plan spec that re-creates the original plan.
    #[must_use]
    pub fn to_spec(&self) -> PlanSpec {
        PlanSpec {
            time: self.time,
            priority: self.priority,
            active: self.active,
            plan_data: Some(Arc::clone(&self.plan_data)),
            sequence: Some(self.sequence),
        }
    }
}

/// Scheduling parameters for a new plan.
#[derive(Debug, Clone)]
pub struct PlanSpec {
    pub(crate) time: f64,
    pub(crate) priority: i64,
    pub(crate) active: bool,
    pub(crate) plan_data: Option<Arc<dyn PlanData>>,
    pub(crate) sequence: Option<u64>,
}

impl PlanSpec {
    /// An active plan at `time` with priority zero.
    #[must_use]
    pub const fn at(time: f64) -> Self {
        Self {
            time,
            priority: 0,
            active: true,
            plan_data: None,
            sequence: None,
        }
    }

    /// Lower priorities fire first among plans at the same time.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the plan passive: it fires if the simulation is still running,
    /// but does not keep the simulation alive on its own.
    #[must_use]
    pub fn passive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Attaches plan data for checkpointing.
    #[must_use]
    pub fn with_plan_data(mut self, plan_data: impl PlanData) -> Self {
        self.plan_data = Some(Arc::new(plan_data));
        self
    }

    /// Reuses an arrival sequence from a checkpoint.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    #[must_use]
    pub const fn priority(&self) -> i64 {
        self.priority
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }
}

impl From<f64> for PlanSpec {
    fn from(time: f64) -> Self {
        Self::at(time)
    }
}
