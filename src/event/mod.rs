//! Events and label-based subscription routing.
//!
//! An event is an immutable value describing a state change. Subscribers
//! register interest in an [`EventLabel`]; on publication the router asks each
//! labeler registered for the event's type to compute the event's label and
//! looks the label up directly, instead of offering the event to every
//! subscriber.

use std::any::{self, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Compound keys, labels and labelers.
pub mod label;
/// Subscription storage and event routing.
pub mod router;

pub use label::{EventLabel, EventLabeler, LabelKey, LabelerContext};
pub use router::{EventRouter, RoutedSubscriber};

/// An immutable state-change value.
pub trait Event: Any + fmt::Debug {
    /// The value used by primary-key subscriptions.
    ///
    /// Events without a natural primary key return `None` and can only be
    /// reached through type-wide or labeled subscriptions.
    fn primary_key(&self) -> Option<LabelKey> {
        None
    }
}

/// Runtime tag of an event type.
#[derive(Debug, Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    /// Returns the tag for `E`.
    #[must_use]
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: any::type_name::<E>(),
        }
    }

    /// The type id.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.id
    }

    /// The type name, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A published event waiting to be routed.
pub(crate) struct PublishedEvent {
    pub(crate) event_type: EventType,
    pub(crate) primary_key: Option<LabelKey>,
    pub(crate) value: Box<dyn Any>,
}

impl PublishedEvent {
    pub(crate) fn new<E: Event>(event: E) -> Self {
        Self {
            event_type: EventType::of::<E>(),
            primary_key: event.primary_key(),
            value: Box::new(event),
        }
    }
}

impl fmt::Debug for PublishedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishedEvent")
            .field("event_type", &self.event_type)
            .field("primary_key", &self.primary_key)
            .finish_non_exhaustive()
    }
}
