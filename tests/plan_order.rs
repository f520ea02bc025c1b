mod common;

use proptest::prelude::*;

use nucleus::{PlanSpec, Plugin, Simulation};

fn scheduling(plans: Vec<(u8, i8)>) -> Plugin {
    Plugin::builder("scheduler")
        .set_initializer(move |ctx| {
            let plans = plans.clone();
            ctx.add_actor(move |actor| {
                for (idx, (time, priority)) in plans.into_iter().enumerate() {
                    let spec = PlanSpec::at(f64::from(time)).with_priority(i64::from(priority));
                    actor.add_plan(spec, move |actor| {
                        actor.release_output(idx.to_string());
                        Ok(())
                    })?;
                }
                Ok(())
            });
            Ok(())
        })
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn plans_fire_by_time_then_priority_then_arrival(
        plans in proptest::collection::vec((0u8..5, -2i8..3), 0..40),
    ) {
        let collected = common::run_collecting(Simulation::builder().add_plugin(scheduling(plans.clone()))).unwrap();

        let mut expected: Vec<usize> = (0..plans.len()).collect();
        expected.sort_by_key(|&idx| (plans[idx].0, plans[idx].1, idx));
        let expected: Vec<String> = expected.into_iter().map(|idx| idx.to_string()).collect();

        prop_assert_eq!(collected.lines, expected);
        prop_assert_eq!(collected.report.plans_executed, plans.len() as u64);
    }
}

#[test]
fn plans_scheduled_during_a_plan_run_after_it() {
    let plugin = Plugin::builder("nested")
        .set_initializer(|ctx| {
            ctx.add_actor(|actor| {
                actor.add_plan(1.0, |actor| {
                    actor.add_plan(PlanSpec::at(1.0).with_priority(-10), |actor| {
                        actor.release_output("nested".to_string());
                        Ok(())
                    })?;
                    actor.release_output("outer".to_string());
                    Ok(())
                })?;
                actor.add_plan(PlanSpec::at(1.0).with_priority(5), |actor| {
                    actor.release_output("sibling".to_string());
                    Ok(())
                })?;
                Ok(())
            });
            Ok(())
        })
        .build()
        .unwrap();

    let collected = common::run_collecting(Simulation::builder().add_plugin(plugin)).unwrap();
    assert_eq!(collected.lines, vec!["outer", "nested", "sibling"]);
}

#[test]
fn cancelled_plans_never_fire() {
    let plugin = Plugin::builder("cancel")
        .set_initializer(|ctx| {
            ctx.add_actor(|actor| {
                let doomed = actor.add_plan(3.0, |actor| {
                    actor.release_output("doomed".to_string());
                    Ok(())
                })?;
                actor.add_plan(1.0, move |actor| {
                    let cancelled = actor.cancel_plan(doomed);
                    actor.release_output(format!("cancelled {}", cancelled.is_some()));
                    actor.release_output(format!("still pending {}", actor.has_plan(doomed)));
                    Ok(())
                })?;
                Ok(())
            });
            Ok(())
        })
        .build()
        .unwrap();

    let collected = common::run_collecting(Simulation::builder().add_plugin(plugin)).unwrap();
    assert_eq!(collected.lines, vec!["cancelled true", "still pending false"]);
    assert!((collected.report.final_time - 1.0).abs() < f64::EPSILON);
}

#[test]
fn actors_cannot_cancel_each_others_plans() {
    let plugin = Plugin::builder("rivals")
        .set_initializer(|ctx| {
            ctx.add_actor(|actor| {
                actor.add_plan(2.0, |actor| {
                    actor.release_output("kept".to_string());
                    Ok(())
                })?;
                Ok(())
            });
            ctx.add_actor(|actor| {
                actor.add_plan(1.0, |actor| {
                    let stolen = actor.cancel_plan(nucleus::PlanId::new(0));
                    actor.release_output(format!("stolen {}", stolen.is_some()));
                    Ok(())
                })?;
                Ok(())
            });
            Ok(())
        })
        .build()
        .unwrap();

    let collected = common::run_collecting(Simulation::builder().add_plugin(plugin)).unwrap();
    assert_eq!(collected.lines, vec!["stolen false", "kept"]);
}
