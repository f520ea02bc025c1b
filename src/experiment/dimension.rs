//! Dimensions: independent variables swept by an experiment.

use std::any;
use std::fmt;
use std::sync::Arc;

use crate::error::{ContractError, NucleusResult};
use crate::ids::IdKind;
use crate::plugin::data::PluginDataBuilder;

/// Gives a dimension level access to the scenario's plugin data builders.
///
/// Every builder starts as a clone of the experiment's base plugin data, so
/// a level only writes the fields it varies.
pub struct DimensionContext<'a> {
    builders: &'a mut [Box<dyn PluginDataBuilder>],
}

impl<'a> DimensionContext<'a> {
    pub(crate) fn new(builders: &'a mut [Box<dyn PluginDataBuilder>]) -> Self {
        Self { builders }
    }

    /// The scenario's builder of type `B`.
    ///
    /// # Errors
    ///
    /// `UnknownId` if no plugin carries plugin data built by `B`.
    pub fn plugin_data_builder<B: PluginDataBuilder>(&mut self) -> NucleusResult<&mut B> {
        self.builders
            .iter_mut()
            .find_map(|builder| builder.as_mut().downcast_mut::<B>())
            .ok_or_else(|| {
                ContractError::UnknownId {
                    kind: IdKind::PluginData,
                    id: any::type_name::<B>().to_string(),
                }
                .into()
            })
    }
}

/// An independent variable with a fixed number of levels.
pub trait Dimension: Send + Sync {
    /// Number of levels. Must be at least one.
    fn level_count(&self) -> usize;

    /// Column names describing each level.
    fn meta_data(&self) -> Vec<String>;

    /// Applies level `level` to the scenario's builders and returns the
    /// level's meta data values, one per [`Self::meta_data`] entry.
    ///
    /// # Errors
    ///
    /// Any error aborts the experiment before a scenario runs.
    fn execute_level(&self, ctx: &mut DimensionContext<'_>, level: usize) -> NucleusResult<Vec<String>>;
}

type LevelFn = dyn Fn(&mut DimensionContext<'_>) -> NucleusResult<Vec<String>> + Send + Sync;

/// A dimension assembled from closures, one per level.
#[derive(Clone)]
pub struct FunctionalDimension {
    meta_data: Vec<String>,
    levels: Vec<Arc<LevelFn>>,
}

impl fmt::Debug for FunctionalDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionalDimension")
            .field("meta_data", &self.meta_data)
            .field("levels", &self.levels.len())
            .finish()
    }
}

impl FunctionalDimension {
    #[must_use]
    pub fn builder() -> FunctionalDimensionBuilder {
        FunctionalDimensionBuilder {
            meta_data: Vec::new(),
            levels: Vec::new(),
        }
    }
}

impl Dimension for FunctionalDimension {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn meta_data(&self) -> Vec<String> {
        self.meta_data.clone()
    }

    fn execute_level(&self, ctx: &mut DimensionContext<'_>, level: usize) -> NucleusResult<Vec<String>> {
        let apply = self.levels.get(level).ok_or_else(|| ContractError::UnknownId {
            kind: IdKind::Domain("dimension level"),
            id: level.to_string(),
        })?;
        apply(ctx)
    }
}

/// Builder for [`FunctionalDimension`].
pub struct FunctionalDimensionBuilder {
    meta_data: Vec<String>,
    levels: Vec<Arc<LevelFn>>,
}

impl FunctionalDimensionBuilder {
    #[must_use]
    pub fn add_meta_datum(mut self, name: impl Into<String>) -> Self {
        self.meta_data.push(name.into());
        self
    }

    /// Appends a level. Levels are numbered in the order they are added.
    #[must_use]
    pub fn add_level(
        mut self,
        level: impl Fn(&mut DimensionContext<'_>) -> NucleusResult<Vec<String>> + Send + Sync + 'static,
    ) -> Self {
        self.levels.push(Arc::new(level));
        self
    }

    /// # Errors
    ///
    /// `IncompatibleValue` if the dimension has no levels.
    pub fn build(self) -> NucleusResult<FunctionalDimension> {
        if self.levels.is_empty() {
            return Err(ContractError::incompatible("dimension levels", "at least one level", 0).into());
        }
        Ok(FunctionalDimension {
            meta_data: self.meta_data,
            levels: self.levels,
        })
    }
}
