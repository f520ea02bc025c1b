//! Scenario enumeration and preparation.
//!
//! Scenario ids index the Cartesian product of dimension levels in
//! row-major order: the last dimension varies fastest.

use std::sync::Arc;

use crate::error::{ContractError, NucleusResult};
use crate::ids::ScenarioId;
use crate::plugin::data::{PluginData, PluginDataBuilder};
use crate::plugin::Plugin;
use crate::simulation::SimulationState;

use super::dimension::{Dimension, DimensionContext};

/// The level space spanned by an experiment's dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSpace {
    level_counts: Vec<usize>,
}

impl ScenarioSpace {
    #[must_use]
    pub fn new(level_counts: Vec<usize>) -> Self {
        Self { level_counts }
    }

    /// Product of the level counts. No dimensions means one scenario.
    #[must_use]
    pub fn scenario_count(&self) -> usize {
        self.level_counts.iter().product()
    }

    /// Level of each dimension for a scenario.
    ///
    /// # Errors
    ///
    /// `UnknownId` if the id is outside the space.
    pub fn levels(&self, scenario_id: ScenarioId) -> Result<Vec<usize>, ContractError> {
        let mut remainder = scenario_id.index();
        if remainder >= self.scenario_count() {
            return Err(ContractError::unknown(&scenario_id));
        }
        let mut levels = vec![0; self.level_counts.len()];
        for (slot, &count) in levels.iter_mut().zip(&self.level_counts).rev() {
            *slot = remainder % count;
            remainder /= count;
        }
        Ok(levels)
    }

    /// Scenario id of a level combination.
    ///
    /// # Errors
    ///
    /// `IncompatibleValue` if the combination does not fit the space.
    pub fn scenario_id(&self, levels: &[usize]) -> Result<ScenarioId, ContractError> {
        if levels.len() != self.level_counts.len() {
            return Err(ContractError::incompatible(
                "scenario levels",
                format!("{} levels", self.level_counts.len()),
                levels.len(),
            ));
        }
        let mut index = 0;
        for (&level, &count) in levels.iter().zip(&self.level_counts) {
            if level >= count {
                return Err(ContractError::incompatible(
                    "scenario level",
                    format!("a level below {count}"),
                    level,
                ));
            }
            index = index * count + level;
        }
        Ok(ScenarioId::from(index))
    }
}

/// Per-scenario seed derived from the experiment's master seed.
#[must_use]
pub fn derive_seed(master_seed: u64, scenario_id: ScenarioId) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&master_seed.to_le_bytes());
    hasher.update(&scenario_id.value().to_le_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// A scenario ready to run: its plugins carry the plugin data built for its
/// dimension levels.
#[derive(Debug, Clone)]
pub(crate) struct Scenario {
    pub(crate) id: ScenarioId,
    pub(crate) meta_data: Vec<String>,
    pub(crate) plugins: Vec<Plugin>,
    pub(crate) halt_time: Option<f64>,
    pub(crate) seed: u64,
    pub(crate) state: Option<Arc<SimulationState>>,
}

/// Clones every plugin's data into builders, applies each dimension's level
/// and rebuilds the plugins around the results.
pub(crate) fn prepare_plugins(
    plugins: &[Plugin],
    dimensions: &[Arc<dyn Dimension>],
    levels: &[usize],
) -> NucleusResult<(Vec<Plugin>, Vec<String>)> {
    let mut builders: Vec<Box<dyn PluginDataBuilder>> = Vec::new();
    let mut owners = Vec::new();
    for (plugin_idx, plugin) in plugins.iter().enumerate() {
        for data in plugin.plugin_data() {
            builders.push(data.as_ref().clone_builder());
            owners.push(plugin_idx);
        }
    }

    let mut meta_data = Vec::new();
    for (dimension, &level) in dimensions.iter().zip(levels) {
        let values = dimension.execute_level(&mut DimensionContext::new(&mut builders), level)?;
        let expected = dimension.meta_data().len();
        if values.len() != expected {
            return Err(ContractError::incompatible(
                "dimension meta data",
                format!("{expected} values"),
                values.len(),
            )
            .into());
        }
        meta_data.extend(values);
    }

    let mut rebuilt: Vec<Vec<Arc<dyn PluginData>>> = plugins.iter().map(|_| Vec::new()).collect();
    for (builder, plugin_idx) in builders.iter_mut().zip(owners) {
        rebuilt[plugin_idx].push(builder.build()?);
    }
    let plugins = plugins
        .iter()
        .zip(rebuilt)
        .map(|(plugin, data)| plugin.with_plugin_data(data))
        .collect();
    Ok((plugins, meta_data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_dimension_varies_fastest() {
        let space = ScenarioSpace::new(vec![3, 2]);
        assert_eq!(space.scenario_count(), 6);
        assert_eq!(space.levels(ScenarioId::new(0)).unwrap(), vec![0, 0]);
        assert_eq!(space.levels(ScenarioId::new(1)).unwrap(), vec![0, 1]);
        assert_eq!(space.levels(ScenarioId::new(2)).unwrap(), vec![1, 0]);
        assert_eq!(space.levels(ScenarioId::new(5)).unwrap(), vec![2, 1]);
        assert!(space.levels(ScenarioId::new(6)).is_err());
    }

    #[test]
    fn test_ids_and_levels_agree() {
        let space = ScenarioSpace::new(vec![2, 3, 4]);
        for index in 0..space.scenario_count() {
            let id = ScenarioId::from(index);
            let levels = space.levels(id).unwrap();
            assert_eq!(space.scenario_id(&levels).unwrap(), id);
        }
    }

    #[test]
    fn test_no_dimensions_is_one_scenario() {
        let space = ScenarioSpace::new(Vec::new());
        assert_eq!(space.scenario_count(), 1);
        assert_eq!(space.levels(ScenarioId::new(0)).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_seeds_are_stable_and_distinct() {
        assert_eq!(derive_seed(7, ScenarioId::new(3)), derive_seed(7, ScenarioId::new(3)));
        assert_ne!(derive_seed(7, ScenarioId::new(3)), derive_seed(7, ScenarioId::new(4)));
        assert_ne!(derive_seed(7, ScenarioId::new(3)), derive_seed(8, ScenarioId::new(3)));
    }
}
