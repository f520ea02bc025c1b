mod common;

use std::collections::HashMap;

use proptest::prelude::*;

use nucleus::plugin::resolve_order;
use nucleus::{NucleusError, Plugin, PluginGraphError, PluginId, Simulation};

fn announcing(id: &str, dependencies: &[&str]) -> Plugin {
    let mut builder = Plugin::builder(id);
    for dependency in dependencies {
        builder = builder.add_dependency(*dependency);
    }
    builder
        .set_initializer(|ctx| {
            let id = ctx.plugin_id().to_string();
            ctx.add_actor(move |actor| {
                actor.release_output(id);
                Ok(())
            });
            Ok(())
        })
        .build()
        .unwrap()
}

fn exploding(id: &str, dependencies: &[&str]) -> Plugin {
    let mut builder = Plugin::builder(id);
    for dependency in dependencies {
        builder = builder.add_dependency(*dependency);
    }
    builder
        .set_initializer(|_| panic!("initializer must not run"))
        .build()
        .unwrap()
}

#[test]
fn dependencies_initialize_first() {
    let collected = common::run_collecting(
        Simulation::builder()
            .add_plugin(announcing("reports", &["people", "regions"]))
            .add_plugin(announcing("people", &["regions"]))
            .add_plugin(announcing("regions", &[]))
            .add_plugin(announcing("weather", &[])),
    )
    .unwrap();

    assert_eq!(collected.lines, vec!["regions", "people", "reports", "weather"]);
}

#[test]
fn missing_dependency_names_both_plugins() {
    let err = Simulation::builder()
        .add_plugin(exploding("people", &["regions"]))
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        NucleusError::PluginGraph(PluginGraphError::MissingDependency {
            plugin: PluginId::new("people"),
            dependency: PluginId::new("regions"),
        })
    );
}

#[test]
fn cycle_is_rejected_before_any_initializer_runs() {
    let err = Simulation::builder()
        .add_plugin(exploding("root", &[]))
        .add_plugin(exploding("a", &["root", "c"]))
        .add_plugin(exploding("b", &["a"]))
        .add_plugin(exploding("c", &["b"]))
        .build()
        .unwrap_err();

    let NucleusError::PluginGraph(PluginGraphError::CircularDependency { cycle }) = &err else {
        panic!("expected a circular dependency, got {err:?}");
    };
    assert_eq!(cycle.len(), 3);
    assert!(!cycle.contains(&PluginId::new("root")));
    assert!(err.to_string().contains(" -> "));
}

proptest! {
    #[test]
    fn resolved_order_respects_every_edge(
        edges in proptest::collection::vec(any::<bool>(), 64),
        count in 1usize..8,
        rotation in 0usize..8,
    ) {
        let names: Vec<String> = (0..count).map(|i| format!("p{i}")).collect();
        let plugins: Vec<Plugin> = (0..count)
            .map(|k| (k + rotation) % count)
            .map(|i| {
                let dependencies: Vec<&str> = (0..i)
                    .filter(|&j| edges[i * 8 + j])
                    .map(|j| names[j].as_str())
                    .collect();
                announcing(&names[i], &dependencies)
            })
            .collect();

        let order = resolve_order(&plugins).unwrap();
        prop_assert_eq!(order.len(), count);

        let position: HashMap<&PluginId, usize> = order
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (plugins[idx].id(), pos))
            .collect();
        for plugin in &plugins {
            for dependency in plugin.dependencies() {
                prop_assert!(position[dependency] < position[plugin.id()]);
            }
        }
        prop_assert_eq!(resolve_order(&plugins).unwrap(), order);
    }
}
