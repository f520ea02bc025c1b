//! Plugin data snapshots and their lock/copy-on-write builders.
//!
//! A [`PluginData`] value is the immutable initial (or checkpointed) state of
//! one plugin. It is produced by a [`PluginDataBuilder`] which starts open,
//! seals on `build()`, and clones its content before applying any later
//! mutation, so a value that has been handed out never changes.

use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

use crate::error::NucleusResult;

/// Type-erasure helpers for shared, thread-safe kernel values.
pub trait AsAny: Any + Send + Sync {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Converts a shared pointer into a shared `Any`.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Returns the concrete type name.
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }
}

/// Mutable type-erasure helper for builders.
pub trait AsAnyMut: Any {
    /// Returns `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAnyMut for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Immutable snapshot of one plugin's state.
pub trait PluginData: AsAny + fmt::Debug {
    /// Returns an unlocked builder pre-filled with this value's content.
    fn clone_builder(&self) -> Box<dyn PluginDataBuilder>;

    /// Returns an unlocked builder with no content.
    fn empty_builder(&self) -> Box<dyn PluginDataBuilder>;
}

impl dyn PluginData {
    /// Downcasts to a concrete plugin data type.
    #[must_use]
    pub fn downcast_ref<T: PluginData>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns true if the concrete type is `T`.
    #[must_use]
    pub fn is<T: PluginData>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Downcasts a shared plugin data pointer into its concrete type.
#[must_use]
pub fn downcast_plugin_data<T: PluginData>(data: &Arc<dyn PluginData>) -> Option<Arc<T>> {
    Arc::clone(data).into_any_arc().downcast::<T>().ok()
}

/// Builder for a [`PluginData`] type.
pub trait PluginDataBuilder: AsAnyMut + Send {
    /// Validates the content, seals the builder and returns the value.
    ///
    /// # Errors
    ///
    /// Returns a contract error if the content violates the plugin data's
    /// invariants.
    fn build(&mut self) -> NucleusResult<Arc<dyn PluginData>>;
}

impl dyn PluginDataBuilder {
    /// Downcasts to a concrete builder type.
    pub fn downcast_mut<B: PluginDataBuilder>(&mut self) -> Option<&mut B> {
        self.as_any_mut().downcast_mut::<B>()
    }
}

/// Lock state of a plugin data builder.
///
/// `Open` content is exclusively owned by the builder. `Sealed` content is
/// shared with every value built from it; the first mutation after sealing
/// clones it back into `Open`.
#[derive(Debug, Clone)]
pub enum BuilderState<T> {
    Open(T),
    Sealed(Arc<T>),
}

impl<T: Default> Default for BuilderState<T> {
    fn default() -> Self {
        Self::Open(T::default())
    }
}

impl<T: Clone> BuilderState<T> {
    /// Starts from owned content.
    #[must_use]
    pub const fn open(value: T) -> Self {
        Self::Open(value)
    }

    /// Starts from content shared with an already built value.
    #[must_use]
    pub const fn sealed(value: Arc<T>) -> Self {
        Self::Sealed(value)
    }

    /// Returns true if the content is currently shared.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }

    /// Read access to the current content.
    #[must_use]
    pub fn get(&self) -> &T {
        match self {
            Self::Open(value) => value,
            Self::Sealed(shared) => shared,
        }
    }

    /// Mutable access, cloning shared content first.
    pub fn edit(&mut self) -> &mut T {
        if let Self::Sealed(shared) = self {
            let copy = T::clone(shared);
            *self = Self::Open(copy);
        }
        match self {
            Self::Open(value) => value,
            Self::Sealed(shared) => Arc::make_mut(shared),
        }
    }

    /// Seals the content and returns the shared value.
    ///
    /// Sealing an already sealed builder returns the same value.
    pub fn seal(&mut self) -> Arc<T> {
        match self {
            Self::Sealed(shared) => Arc::clone(shared),
            Self::Open(value) => {
                let shared = Arc::new(value.clone());
                *self = Self::Sealed(Arc::clone(&shared));
                shared
            }
        }
    }

    /// Validates the content, then seals it.
    ///
    /// # Errors
    ///
    /// Returns whatever `validate` returns; the builder stays open in that case.
    pub fn seal_with<E>(&mut self, validate: impl FnOnce(&T) -> Result<(), E>) -> Result<Arc<T>, E> {
        validate(self.get())?;
        Ok(self.seal())
    }
}
