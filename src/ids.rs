//! Identifier types.
//!
//! Every id in the kernel implements [`Identifier`], which names the kind of
//! thing it identifies. Domain plugins define their own ids (people, regions,
//! resources) by implementing the same trait, so diagnostics can always say
//! which kind of id was unknown or duplicated.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The kind of thing an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Plugin,
    PluginData,
    Actor,
    DataManager,
    Plan,
    EventLabeler,
    Scenario,
    Dimension,
    Output,
    /// An id owned by a domain plugin.
    Domain(&'static str),
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plugin => write!(f, "plugin"),
            Self::PluginData => write!(f, "plugin data"),
            Self::Actor => write!(f, "actor"),
            Self::DataManager => write!(f, "data manager"),
            Self::Plan => write!(f, "plan"),
            Self::EventLabeler => write!(f, "event labeler"),
            Self::Scenario => write!(f, "scenario"),
            Self::Dimension => write!(f, "dimension"),
            Self::Output => write!(f, "output"),
            Self::Domain(name) => write!(f, "{name}"),
        }
    }
}

/// Capability trait shared by all identifiers.
pub trait Identifier: fmt::Debug + fmt::Display + Clone + Eq + Hash + Send + Sync + 'static {
    /// The kind reported in diagnostics.
    const KIND: IdKind;
}

/// Identifies a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(Arc<str>);

impl PluginId {
    /// Creates a plugin id from a name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the plugin name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Identifier for PluginId {
    const KIND: IdKind = IdKind::Plugin;
}

/// Identifies an event labeler within one event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLabelerId(Arc<str>);

impl EventLabelerId {
    /// Creates a labeler id from a name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the labeler name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventLabelerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventLabelerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Identifier for EventLabelerId {
    const KIND: IdKind = IdKind::EventLabeler;
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw value.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn value(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl Identifier for $name {
            const KIND: IdKind = $kind;
        }
    };
}

numeric_id!(
    /// Identifies an actor within one simulation.
    ActorId,
    IdKind::Actor,
    "actor-"
);

numeric_id!(
    /// Identifies a data manager within one simulation.
    DataManagerId,
    IdKind::DataManager,
    "dm-"
);

numeric_id!(
    /// Handle of a scheduled plan. Equal to the plan's arrival sequence.
    PlanId,
    IdKind::Plan,
    "plan-"
);

numeric_id!(
    /// Lexicographic index of a scenario within an experiment.
    ScenarioId,
    IdKind::Scenario,
    ""
);

impl ScenarioId {
    /// Returns the id as an index.
    #[must_use]
    pub fn index(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl From<usize> for ScenarioId {
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}

/// The component that owns a plan, subscription or close callback.
///
/// Data managers order before actors, so when an event is dispatched every
/// data manager sees it before any actor does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    DataManager(DataManagerId),
    Actor(ActorId),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataManager(id) => write!(f, "{id}"),
            Self::Actor(id) => write!(f, "{id}"),
        }
    }
}
