//! Values released by a simulation to its output consumer.

use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

use crate::plugin::data::PluginData;

/// An output object released during or at the end of a run.
///
/// Checkpoint plugin data travels through the same channel as ordinary
/// outputs, so consumers see one ordered stream per scenario.
#[derive(Clone)]
pub enum Output {
    Value {
        value: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
    },
    PluginData(Arc<dyn PluginData>),
}

impl Output {
    /// Wraps an arbitrary value.
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Self::Value {
            value: Arc::new(value),
            type_name: any::type_name::<T>(),
        }
    }

    /// Downcasts the carried value, whichever variant carries it.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Value { value, .. } => value.as_ref().downcast_ref::<T>(),
            Self::PluginData(data) => data.as_ref().as_any().downcast_ref::<T>(),
        }
    }

    /// The checkpoint plugin data, if this is one.
    #[must_use]
    pub const fn plugin_data(&self) -> Option<&Arc<dyn PluginData>> {
        match self {
            Self::PluginData(data) => Some(data),
            Self::Value { .. } => None,
        }
    }

    /// Concrete type name of the carried value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Value { type_name, .. } => *type_name,
            Self::PluginData(data) => data.as_ref().type_name(),
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value { type_name, .. } => f.debug_struct("Value").field("type_name", type_name).finish(),
            Self::PluginData(data) => f.debug_tuple("PluginData").field(data).finish(),
        }
    }
}
