//! Binary-heap plan queue with lazy cancellation.

use std::cmp::{Ordering, Reverse};
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use crate::error::ContractError;
use crate::ids::{Owner, PlanId};

use super::{PlanData, PlanSpec, PrioritizedPlanData};

#[derive(Debug, Clone, Copy)]
struct QueueKey {
    time: f64,
    priority: i64,
    sequence: u64,
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueKey {}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.priority.cmp(&other.priority))
            .then(self.sequence.cmp(&other.sequence))
    }
}

struct QueuedPlan<T> {
    key: QueueKey,
    active: bool,
    owner: Owner,
    plan_data: Option<Arc<dyn PlanData>>,
    payload: T,
}

/// A plan removed from the queue, either popped or cancelled.
#[derive(Debug)]
pub struct PendingPlan<T> {
    pub id: PlanId,
    pub time: f64,
    pub priority: i64,
    pub active: bool,
    pub owner: Owner,
    pub plan_data: Option<Arc<dyn PlanData>>,
    pub payload: T,
}

impl<T> PendingPlan<T> {
    /// Drops the callback payload, keeping the scheduling coordinates.
    pub fn discard_payload(self) -> PendingPlan<()> {
        PendingPlan {
            id: self.id,
            time: self.time,
            priority: self.priority,
            active: self.active,
            owner: self.owner,
            plan_data: self.plan_data,
            payload: (),
        }
    }
}

impl<T> QueuedPlan<T> {
    fn into_pending(self, id: PlanId) -> PendingPlan<T> {
        PendingPlan {
            id,
            time: self.key.time,
            priority: self.key.priority,
            active: self.active,
            owner: self.owner,
            plan_data: self.plan_data,
            payload: self.payload,
        }
    }
}

/// Queue of plans ordered by `(time, priority, sequence)`.
///
/// The heap holds only keys. Plan bodies live in a map keyed by id, so
/// cancelling is a map removal and the stale heap key is discarded when it
/// surfaces.
pub struct PlanQueue<T> {
    heap: BinaryHeap<Reverse<QueueKey>>,
    plans: HashMap<PlanId, QueuedPlan<T>>,
    active_count: usize,
    next_sequence: u64,
}

impl<T> Default for PlanQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            plans: HashMap::new(),
            active_count: 0,
            next_sequence: 0,
        }
    }
}

impl<T> PlanQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plan.
    ///
    /// # Errors
    ///
    /// * `IncompatibleValue` if the time is not finite.
    /// * `SchedulingInPast` if the time is before `now`.
    /// * `DuplicateId` if an explicit sequence is already queued.
    pub fn schedule(&mut self, now: f64, spec: PlanSpec, owner: Owner, payload: T) -> Result<PlanId, ContractError> {
        if !spec.time.is_finite() {
            return Err(ContractError::incompatible("plan time", "a finite time", spec.time));
        }
        if spec.time < now {
            return Err(ContractError::SchedulingInPast {
                requested: spec.time,
                current: now,
            });
        }

        let sequence = match spec.sequence {
            Some(sequence) => sequence,
            None => self.next_sequence,
        };
        let id = PlanId::new(sequence);
        let key = QueueKey {
            time: spec.time,
            priority: spec.priority,
            sequence,
        };

        match self.plans.entry(id) {
            Entry::Occupied(_) => return Err(ContractError::duplicate(&id)),
            Entry::Vacant(slot) => {
                slot.insert(QueuedPlan {
                    key,
                    active: spec.active,
                    owner,
                    plan_data: spec.plan_data,
                    payload,
                });
            }
        }

        self.next_sequence = self.next_sequence.max(sequence.saturating_add(1));
        if spec.active {
            self.active_count += 1;
        }
        self.heap.push(Reverse(key));
        Ok(id)
    }

    /// Removes a plan that has not fired yet.
    pub fn cancel(&mut self, id: PlanId) -> Option<PendingPlan<T>> {
        let plan = self.plans.remove(&id)?;
        if plan.active {
            self.active_count -= 1;
        }
        Some(plan.into_pending(id))
    }

    /// Pops the earliest live plan.
    pub fn pop(&mut self) -> Option<PendingPlan<T>> {
        while let Some(Reverse(key)) = self.heap.pop() {
            let id = PlanId::new(key.sequence);
            if !self.is_live(key) {
                continue;
            }
            if let Some(plan) = self.plans.remove(&id) {
                if plan.active {
                    self.active_count -= 1;
                }
                return Some(plan.into_pending(id));
            }
        }
        None
    }

    /// Time of the earliest live plan.
    pub fn peek_time(&mut self) -> Option<f64> {
        self.discard_stale();
        self.heap.peek().map(|Reverse(key)| key.time)
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse(key)) = self.heap.peek() {
            if self.is_live(*key) {
                break;
            }
            self.heap.pop();
        }
    }

    /// A heap key is stale once its plan was cancelled, even if the
    /// sequence was later reused by a restored plan.
    fn is_live(&self, key: QueueKey) -> bool {
        self.plans
            .get(&PlanId::new(key.sequence))
            .is_some_and(|plan| plan.key == key)
    }

    /// Returns true while any active plan is queued.
    #[must_use]
    pub const fn has_active(&self) -> bool {
        self.active_count > 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: PlanId) -> bool {
        self.plans.contains_key(&id)
    }

    /// Owner of a pending plan.
    #[must_use]
    pub fn owner_of(&self, id: PlanId) -> Option<Owner> {
        self.plans.get(&id).map(|plan| plan.owner)
    }

    /// The sequence the next unsequenced plan will receive.
    #[must_use]
    pub const fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Moves the sequence counter forward, never backward.
    pub fn advance_sequence(&mut self, sequence: u64) {
        self.next_sequence = self.next_sequence.max(sequence);
    }

    /// Pending plans of one owner that carry plan data, in firing order.
    #[must_use]
    pub fn prioritized_plan_data(&self, owner: Owner) -> Vec<PrioritizedPlanData> {
        let mut out: Vec<(QueueKey, PrioritizedPlanData)> = self
            .plans
            .values()
            .filter(|plan| plan.owner == owner)
            .filter_map(|plan| {
                let data = plan.plan_data.as_ref()?;
                Some((
                    plan.key,
                    PrioritizedPlanData {
                        time: plan.key.time,
                        priority: plan.key.priority,
                        sequence: plan.key.sequence,
                        active: plan.active,
                        plan_data: Arc::clone(data),
                    },
                ))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.into_iter().map(|(_, ppd)| ppd).collect()
    }

    /// Ids of pending plans in firing order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<PlanId> {
        let mut keys: Vec<QueueKey> = self.plans.values().map(|plan| plan.key).collect();
        keys.sort();
        keys.into_iter().map(|key| PlanId::new(key.sequence)).collect()
    }

    /// Removes every pending plan matching `predicate` and returns how many
    /// were removed.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(Owner) -> bool) -> usize {
        let doomed: Vec<PlanId> = self
            .plans
            .iter()
            .filter(|(_, plan)| predicate(plan.owner))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.cancel(*id);
        }
        doomed.len()
    }
}
