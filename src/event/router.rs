//! Subscription storage and label-keyed routing.
//!
//! Subscriptions are stored per event type in a map keyed by the full
//! [`EventLabel`]. Routing an event computes one label per registered labeler
//! that currently has subscribers, plus the type-wide and primary-key labels,
//! and performs one hash lookup for each. The cost of a publication therefore
//! depends on the number of labelers for its type, never on the number of
//! subscribers.

use std::any::TypeId;
use std::collections::HashMap;

use tracing::debug;

use crate::error::{ContractError, NucleusResult};
use crate::ids::{EventLabelerId, Owner};

use super::label::{is_reserved_labeler, ErasedLabeler, PRIMARY_KEY_LABELER, TYPE_LABELER};
use super::{Event, EventLabel, EventLabeler, EventType, LabelerContext, PublishedEvent};

/// A subscriber selected for one publication.
#[derive(Debug, Clone)]
pub struct RoutedSubscriber<S> {
    pub owner: Owner,
    pub callback: S,
}

struct Subscription<S> {
    owner: Owner,
    sequence: u64,
    callback: S,
}

struct TypeRoute<S> {
    event_type: EventType,
    labelers: Vec<ErasedLabeler>,
    subscriptions: HashMap<EventLabel, Vec<Subscription<S>>>,
    /// Live subscription count per labeler id; labelers at zero are skipped.
    counts: HashMap<EventLabelerId, usize>,
}

impl<S> TypeRoute<S> {
    fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            labelers: Vec::new(),
            subscriptions: HashMap::new(),
            counts: HashMap::new(),
        }
    }

    fn knows_labeler(&self, id: &EventLabelerId) -> bool {
        is_reserved_labeler(id) || self.labelers.iter().any(|l| &l.id == id)
    }

    fn adjust_count(&mut self, id: &EventLabelerId, removed: usize) {
        if let Some(count) = self.counts.get_mut(id) {
            *count = count.saturating_sub(removed);
            if *count == 0 {
                self.counts.remove(id);
            }
        }
    }
}

/// Label-keyed event router.
///
/// `S` is the callback handle stored per subscription. It is cloned out of
/// the router on every routing so callbacks can freely subscribe and
/// unsubscribe while they run.
pub struct EventRouter<S> {
    routes: HashMap<TypeId, TypeRoute<S>>,
    next_sequence: u64,
}

impl<S> Default for EventRouter<S> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            next_sequence: 0,
        }
    }
}

impl<S: Clone> EventRouter<S> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn route_mut(&mut self, event_type: EventType) -> &mut TypeRoute<S> {
        self.routes
            .entry(event_type.type_id())
            .or_insert_with(|| TypeRoute::new(event_type))
    }

    /// Registers a labeler for events of type `E`.
    ///
    /// # Errors
    ///
    /// `DuplicateLabelerId` if a labeler with the same id is already
    /// registered for `E`, or the id is one of the reserved built-in ids.
    pub fn register_labeler<E: Event>(&mut self, labeler: EventLabeler<E>) -> Result<(), ContractError> {
        let event_type = EventType::of::<E>();
        let route = self.route_mut(event_type);
        if route.knows_labeler(labeler.id()) {
            return Err(ContractError::DuplicateLabelerId {
                event_type: event_type.name().to_string(),
                labeler_id: labeler.id().to_string(),
            });
        }
        debug!(event_type = event_type.name(), labeler = %labeler.id(), "registered event labeler");
        route.labelers.push(labeler.erase());
        Ok(())
    }

    /// Returns true if a labeler with this id exists for the event type.
    #[must_use]
    pub fn has_labeler(&self, event_type: EventType, id: &EventLabelerId) -> bool {
        is_reserved_labeler(id)
            || self
                .routes
                .get(&event_type.type_id())
                .is_some_and(|route| route.knows_labeler(id))
    }

    /// Adds a subscription under `label`.
    ///
    /// # Errors
    ///
    /// `UnknownId` if no labeler with the label's id is registered for the
    /// label's event type.
    pub fn subscribe(&mut self, label: EventLabel, owner: Owner, callback: S) -> Result<(), ContractError> {
        let route = self.route_mut(label.event_type());
        if !route.knows_labeler(label.labeler_id()) {
            return Err(ContractError::unknown(label.labeler_id()));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let route = self.route_mut(label.event_type());
        *route.counts.entry(label.labeler_id().clone()).or_insert(0) += 1;
        route.subscriptions.entry(label).or_default().push(Subscription {
            owner,
            sequence,
            callback,
        });
        Ok(())
    }

    /// Removes every subscription `owner` holds under `label`.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe(&mut self, label: &EventLabel, owner: Owner) -> usize {
        let Some(route) = self.routes.get_mut(&label.event_type().type_id()) else {
            return 0;
        };
        let Some(subs) = route.subscriptions.get_mut(label) else {
            return 0;
        };
        let before = subs.len();
        subs.retain(|s| s.owner != owner);
        let removed = before - subs.len();
        if subs.is_empty() {
            route.subscriptions.remove(label);
        }
        route.adjust_count(label.labeler_id(), removed);
        removed
    }

    /// Removes every subscription held by `owner`, for every event type.
    pub fn unsubscribe_owner(&mut self, owner: Owner) -> usize {
        let mut removed = 0;
        for route in self.routes.values_mut() {
            let mut per_labeler: Vec<(EventLabelerId, usize)> = Vec::new();
            route.subscriptions.retain(|label, subs| {
                let before = subs.len();
                subs.retain(|s| s.owner != owner);
                let gone = before - subs.len();
                if gone > 0 {
                    per_labeler.push((label.labeler_id().clone(), gone));
                }
                !subs.is_empty()
            });
            for (id, gone) in per_labeler {
                route.adjust_count(&id, gone);
                removed += gone;
            }
        }
        removed
    }

    /// Returns true if anything is subscribed to events of this type.
    #[must_use]
    pub fn has_subscribers(&self, event_type: EventType) -> bool {
        self.routes
            .get(&event_type.type_id())
            .is_some_and(|route| !route.subscriptions.is_empty())
    }

    /// Number of live subscriptions across all types.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.routes
            .values()
            .flat_map(|route| route.subscriptions.values())
            .map(Vec::len)
            .sum()
    }

    /// Selects the subscribers of a published event.
    ///
    /// Data manager subscribers come first, then actors; within each group
    /// subscribers are returned in subscription order.
    ///
    /// # Errors
    ///
    /// Propagates labeler failures.
    pub(crate) fn route(
        &self,
        event: &PublishedEvent,
        ctx: &LabelerContext<'_>,
    ) -> NucleusResult<Vec<RoutedSubscriber<S>>> {
        let Some(route) = self.routes.get(&event.event_type.type_id()) else {
            return Ok(Vec::new());
        };
        if route.subscriptions.is_empty() {
            return Ok(Vec::new());
        }

        let mut labels = Vec::with_capacity(route.labelers.len() + 2);
        let type_labeler = EventLabelerId::new(TYPE_LABELER);
        if route.counts.contains_key(&type_labeler) {
            labels.push(EventLabel::from_parts(route.event_type, type_labeler, Vec::new()));
        }
        if let Some(key) = &event.primary_key {
            let pk_labeler = EventLabelerId::new(PRIMARY_KEY_LABELER);
            if route.counts.contains_key(&pk_labeler) {
                labels.push(EventLabel::from_parts(route.event_type, pk_labeler, vec![key.clone()]));
            }
        }
        for labeler in &route.labelers {
            if !route.counts.contains_key(&labeler.id) {
                continue;
            }
            let keys = (labeler.function)(ctx, event.value.as_ref())?;
            labels.push(EventLabel::from_parts(route.event_type, labeler.id.clone(), keys));
        }

        let mut matched: Vec<&Subscription<S>> = labels
            .iter()
            .filter_map(|label| route.subscriptions.get(label))
            .flatten()
            .collect();
        matched.sort_by_key(|s| (matches!(s.owner, Owner::Actor(_)), s.sequence));

        Ok(matched
            .into_iter()
            .map(|s| RoutedSubscriber {
                owner: s.owner,
                callback: s.callback.clone(),
            })
            .collect())
    }
}
