//! Plugin dependency resolution.
//!
//! Kahn's algorithm over the plugin graph. Plugins that become ready at the
//! same time are taken in insertion order, so the resolved order is a pure
//! function of the plugin list.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::{ContractError, NucleusResult, PluginGraphError};
use crate::ids::PluginId;

use super::Plugin;

/// Returns plugin indices in initialization order.
///
/// # Errors
///
/// * `DuplicateId` if two plugins share an id.
/// * `MissingDependency` if a plugin depends on an id that was never added.
/// * `CircularDependency` naming the first cycle found.
pub fn resolve_order(plugins: &[Plugin]) -> NucleusResult<Vec<usize>> {
    let mut index_of: HashMap<&PluginId, usize> = HashMap::with_capacity(plugins.len());
    for (idx, plugin) in plugins.iter().enumerate() {
        if index_of.insert(plugin.id(), idx).is_some() {
            return Err(ContractError::duplicate(plugin.id()).into());
        }
    }

    // Edge dep -> dependent; in_degree counts unresolved dependencies.
    let mut in_degree = vec![0usize; plugins.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); plugins.len()];
    let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); plugins.len()];

    for (idx, plugin) in plugins.iter().enumerate() {
        for dependency in plugin.dependencies() {
            let Some(&dep_idx) = index_of.get(dependency) else {
                return Err(PluginGraphError::MissingDependency {
                    plugin: plugin.id().clone(),
                    dependency: dependency.clone(),
                }
                .into());
            };
            dependents[dep_idx].push(idx);
            depends_on[idx].push(dep_idx);
            in_degree[idx] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(plugins.len());
    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != plugins.len() {
        let cycle = first_cycle(&in_degree, &depends_on)
            .into_iter()
            .map(|idx| plugins[idx].id().clone())
            .collect();
        return Err(PluginGraphError::CircularDependency { cycle }.into());
    }

    debug!(
        order = ?order.iter().map(|&i| plugins[i].id().as_str()).collect::<Vec<_>>(),
        "resolved plugin order"
    );
    Ok(order)
}

/// Walks unresolved dependency edges from the first unresolved plugin until a
/// plugin repeats. Every unresolved plugin has at least one unresolved
/// dependency, so the walk always closes.
fn first_cycle(in_degree: &[usize], depends_on: &[Vec<usize>]) -> Vec<usize> {
    let Some(start) = in_degree.iter().position(|&deg| deg > 0) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&next) = depends_on[current].iter().find(|&&dep| in_degree[dep] > 0) else {
            return path;
        };
        if let Some(&at) = position.get(&next) {
            return path.split_off(at);
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}
