//! Plugins and their composition.
//!
//! A [`Plugin`] bundles an id, the ids of the plugins it depends on, its
//! [`PluginData`] and an initializer. At simulation start plugins are
//! initialized in dependency order; each initializer receives a
//! [`PluginContext`] through which it registers its data managers and
//! actors.

use std::fmt;
use std::sync::Arc;

use crate::error::{ContractError, NucleusResult};
use crate::ids::{DataManagerId, IdKind, PluginId, ScenarioId};
use crate::simulation::context::{ActorContext, ActorInit};
use crate::simulation::data_manager::{DataManager, DataManagerRegistry};

/// Plugin data snapshots and builders.
pub mod data;
/// Dependency ordering.
pub mod resolver;

pub use data::{downcast_plugin_data, BuilderState, PluginData, PluginDataBuilder};
pub use resolver::resolve_order;

type Initializer = dyn Fn(&mut PluginContext<'_>) -> NucleusResult<()> + Send + Sync;

/// A unit of composition: id, dependencies, data and initializer.
///
/// Plugins are immutable and cheap to clone, and can be shared with worker
/// threads.
#[derive(Clone)]
pub struct Plugin {
    id: PluginId,
    dependencies: Vec<PluginId>,
    plugin_data: Vec<Arc<dyn PluginData>>,
    initializer: Arc<Initializer>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("plugin_data", &self.plugin_data)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    /// Starts building a plugin.
    pub fn builder(id: impl Into<PluginId>) -> PluginBuilder {
        PluginBuilder {
            id: id.into(),
            dependencies: Vec::new(),
            plugin_data: Vec::new(),
            initializer: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &PluginId {
        &self.id
    }

    /// Declared dependencies, in declaration order without repeats.
    #[must_use]
    pub fn dependencies(&self) -> &[PluginId] {
        &self.dependencies
    }

    #[must_use]
    pub fn plugin_data(&self) -> &[Arc<dyn PluginData>] {
        &self.plugin_data
    }

    /// Returns a copy of this plugin carrying different plugin data.
    #[must_use]
    pub fn with_plugin_data(&self, plugin_data: Vec<Arc<dyn PluginData>>) -> Self {
        Self {
            id: self.id.clone(),
            dependencies: self.dependencies.clone(),
            plugin_data,
            initializer: Arc::clone(&self.initializer),
        }
    }

    pub(crate) fn initialize(&self, ctx: &mut PluginContext<'_>) -> NucleusResult<()> {
        (self.initializer)(ctx)
    }
}

/// Builder for [`Plugin`].
pub struct PluginBuilder {
    id: PluginId,
    dependencies: Vec<PluginId>,
    plugin_data: Vec<Arc<dyn PluginData>>,
    initializer: Option<Arc<Initializer>>,
}

impl PluginBuilder {
    /// Declares a dependency. Repeated ids are ignored.
    #[must_use]
    pub fn add_dependency(mut self, dependency: impl Into<PluginId>) -> Self {
        let dependency = dependency.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    /// Adds a plugin data value.
    #[must_use]
    pub fn add_plugin_data(mut self, data: impl PluginData) -> Self {
        self.plugin_data.push(Arc::new(data));
        self
    }

    /// Adds an already shared plugin data value.
    #[must_use]
    pub fn add_shared_plugin_data(mut self, data: Arc<dyn PluginData>) -> Self {
        self.plugin_data.push(data);
        self
    }

    /// Sets the initializer run once per simulation.
    #[must_use]
    pub fn set_initializer(
        mut self,
        initializer: impl Fn(&mut PluginContext<'_>) -> NucleusResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Builds the plugin.
    ///
    /// # Errors
    ///
    /// `NullArgument` if no initializer was set.
    pub fn build(self) -> NucleusResult<Plugin> {
        let initializer = self
            .initializer
            .ok_or_else(|| ContractError::null(format!("initializer of plugin {}", self.id)))?;
        Ok(Plugin {
            id: self.id,
            dependencies: self.dependencies,
            plugin_data: self.plugin_data,
            initializer,
        })
    }
}

/// Context handed to a plugin initializer.
pub struct PluginContext<'a> {
    plugin_id: &'a PluginId,
    plugin_data: &'a [Arc<dyn PluginData>],
    scenario_id: ScenarioId,
    data_managers: &'a mut DataManagerRegistry,
    actors: &'a mut Vec<ActorInit>,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(
        plugin: &'a Plugin,
        scenario_id: ScenarioId,
        data_managers: &'a mut DataManagerRegistry,
        actors: &'a mut Vec<ActorInit>,
    ) -> Self {
        Self {
            plugin_id: &plugin.id,
            plugin_data: &plugin.plugin_data,
            scenario_id,
            data_managers,
            actors,
        }
    }

    #[must_use]
    pub const fn plugin_id(&self) -> &PluginId {
        self.plugin_id
    }

    #[must_use]
    pub const fn scenario_id(&self) -> ScenarioId {
        self.scenario_id
    }

    /// Registers a data manager. Its `init` runs after every plugin has been
    /// initialized, in registration order.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if a data manager of the same type already exists.
    pub fn add_data_manager<T: DataManager>(&mut self, data_manager: T) -> NucleusResult<DataManagerId> {
        Ok(self.data_managers.insert(data_manager)?)
    }

    /// Registers an actor whose init runs after every data manager's init.
    pub fn add_actor(&mut self, init: impl FnOnce(&mut ActorContext<'_>) -> NucleusResult<()> + 'static) {
        self.actors.push(Box::new(init));
    }

    /// The first plugin data of type `T`, if any.
    #[must_use]
    pub fn find_plugin_data<T: PluginData>(&self) -> Option<Arc<T>> {
        self.plugin_data.iter().find_map(downcast_plugin_data::<T>)
    }

    /// The first plugin data of type `T`.
    ///
    /// # Errors
    ///
    /// `UnknownId` if the plugin carries no data of that type.
    pub fn plugin_data<T: PluginData>(&self) -> NucleusResult<Arc<T>> {
        self.find_plugin_data::<T>().ok_or_else(|| {
            ContractError::UnknownId {
                kind: IdKind::PluginData,
                id: std::any::type_name::<T>().to_string(),
            }
            .into()
        })
    }
}
