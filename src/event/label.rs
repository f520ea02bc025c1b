//! Event labels.
//!
//! An [`EventLabel`] is the compound routing key `(event type, labeler id,
//! ordered key components)`. An [`EventLabeler`] computes the label of a
//! concrete event; the data manager that owns an event type usually exposes
//! matching constructors (`label_by_region(..)`) for subscribers to use.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{ContractError, NucleusError, NucleusResult};
use crate::ids::{ActorId, DataManagerId, EventLabelerId, PluginId, ScenarioId};
use crate::simulation::data_manager::{DataManager, DataManagerRegistry};

use super::{Event, EventType};

/// Reserved labeler id for type-wide subscriptions.
pub const TYPE_LABELER: &str = "type";

/// Reserved labeler id for primary-key subscriptions.
pub const PRIMARY_KEY_LABELER: &str = "primary_key";

/// One component of a compound label key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LabelKey {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Text(Arc<str>),
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for LabelKey {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for LabelKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for LabelKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for LabelKey {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u32> for LabelKey {
    fn from(value: u32) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<usize> for LabelKey {
    fn from(value: usize) -> Self {
        Self::UInt(value as u64)
    }
}

impl From<&str> for LabelKey {
    fn from(value: &str) -> Self {
        Self::Text(Arc::from(value))
    }
}

impl From<String> for LabelKey {
    fn from(value: String) -> Self {
        Self::Text(Arc::from(value))
    }
}

impl From<PluginId> for LabelKey {
    fn from(value: PluginId) -> Self {
        Self::Text(Arc::from(value.as_str()))
    }
}

impl From<ActorId> for LabelKey {
    fn from(value: ActorId) -> Self {
        Self::UInt(value.value())
    }
}

impl From<DataManagerId> for LabelKey {
    fn from(value: DataManagerId) -> Self {
        Self::UInt(value.value())
    }
}

impl From<ScenarioId> for LabelKey {
    fn from(value: ScenarioId) -> Self {
        Self::UInt(value.value())
    }
}

/// Compound routing key for event subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventLabel {
    event_type: EventType,
    labeler_id: EventLabelerId,
    keys: Vec<LabelKey>,
}

impl EventLabel {
    /// Creates a label for events of type `E` produced by the given labeler.
    #[must_use]
    pub fn new<E: Event>(labeler_id: impl Into<EventLabelerId>, keys: Vec<LabelKey>) -> Self {
        Self {
            event_type: EventType::of::<E>(),
            labeler_id: labeler_id.into(),
            keys,
        }
    }

    /// The label matching every event of type `E`.
    #[must_use]
    pub fn of_type<E: Event>() -> Self {
        Self::new::<E>(TYPE_LABELER, Vec::new())
    }

    /// The label matching events of type `E` whose primary key equals `key`.
    #[must_use]
    pub fn by_primary_key<E: Event>(key: impl Into<LabelKey>) -> Self {
        Self::new::<E>(PRIMARY_KEY_LABELER, vec![key.into()])
    }

    pub(crate) fn from_parts(event_type: EventType, labeler_id: EventLabelerId, keys: Vec<LabelKey>) -> Self {
        Self {
            event_type,
            labeler_id,
            keys,
        }
    }

    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    #[must_use]
    pub const fn labeler_id(&self) -> &EventLabelerId {
        &self.labeler_id
    }

    #[must_use]
    pub fn keys(&self) -> &[LabelKey] {
        &self.keys
    }

    /// Returns true for type-wide or primary-key labels.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        is_reserved_labeler(&self.labeler_id)
    }
}

impl fmt::Display for EventLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}](", self.event_type, self.labeler_id)?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}")?;
        }
        f.write_str(")")
    }
}

pub(crate) fn is_reserved_labeler(id: &EventLabelerId) -> bool {
    id.as_str() == TYPE_LABELER || id.as_str() == PRIMARY_KEY_LABELER
}

type LabelFn<E> = dyn Fn(&LabelerContext<'_>, &E) -> NucleusResult<Vec<LabelKey>>;

/// Computes the label of an event for one labeler id.
pub struct EventLabeler<E: Event> {
    id: EventLabelerId,
    function: Rc<LabelFn<E>>,
}

impl<E: Event> Clone for EventLabeler<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            function: Rc::clone(&self.function),
        }
    }
}

impl<E: Event> fmt::Debug for EventLabeler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLabeler")
            .field("id", &self.id)
            .field("event_type", &EventType::of::<E>())
            .finish_non_exhaustive()
    }
}

impl<E: Event> EventLabeler<E> {
    /// Creates a labeler from a key function.
    pub fn new(
        id: impl Into<EventLabelerId>,
        function: impl Fn(&LabelerContext<'_>, &E) -> NucleusResult<Vec<LabelKey>> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            function: Rc::new(function),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &EventLabelerId {
        &self.id
    }

    /// Builds the label this labeler would produce for the given keys.
    #[must_use]
    pub fn label_for(&self, keys: Vec<LabelKey>) -> EventLabel {
        EventLabel::new::<E>(self.id.clone(), keys)
    }

    /// Computes the label of a concrete event.
    ///
    /// # Errors
    ///
    /// Propagates errors raised while the labeler reads data managers.
    pub fn label(&self, ctx: &LabelerContext<'_>, event: &E) -> NucleusResult<EventLabel> {
        Ok(self.label_for((self.function)(ctx, event)?))
    }

    pub(crate) fn erase(self) -> ErasedLabeler {
        let function = self.function;
        ErasedLabeler {
            id: self.id,
            function: Rc::new(move |ctx: &LabelerContext<'_>, event: &dyn Any| {
                let event = event.downcast_ref::<E>().ok_or_else(|| {
                    NucleusError::from(ContractError::incompatible(
                        "event",
                        EventType::of::<E>().name(),
                        "an event of another type",
                    ))
                })?;
                function(ctx, event)
            }),
        }
    }
}

type ErasedLabelFn = dyn Fn(&LabelerContext<'_>, &dyn Any) -> NucleusResult<Vec<LabelKey>>;

pub(crate) struct ErasedLabeler {
    pub(crate) id: EventLabelerId,
    pub(crate) function: Rc<ErasedLabelFn>,
}

/// Read-only view handed to labelers.
pub struct LabelerContext<'a> {
    data_managers: &'a DataManagerRegistry,
    time: f64,
}

impl<'a> LabelerContext<'a> {
    pub(crate) const fn new(data_managers: &'a DataManagerRegistry, time: f64) -> Self {
        Self { data_managers, time }
    }

    /// Current simulation time.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Reads a data manager.
    ///
    /// # Errors
    ///
    /// `UnknownId` if no data manager of type `T` exists, `DataManagerBusy`
    /// if it is currently borrowed mutably.
    pub fn read_data_manager<T: DataManager, R>(&self, f: impl FnOnce(&T) -> R) -> NucleusResult<R> {
        self.data_managers.read::<T, R>(f)
    }
}
