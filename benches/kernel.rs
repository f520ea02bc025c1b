use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use nucleus::plan::PlanQueue;
use nucleus::{ActorId, Event, EventLabel, Experiment, LabelKey, Owner, PlanSpec, Plugin, Simulation};

#[derive(Debug)]
struct Ping {
    target: u64,
}

impl Event for Ping {
    fn primary_key(&self) -> Option<LabelKey> {
        Some(LabelKey::from(self.target))
    }
}

/// `listeners` actors, each subscribed by primary key, and one actor that
/// pings a random listener `pings` times.
fn ping_plugin(listeners: u64, pings: u32) -> Plugin {
    Plugin::builder("ping")
        .set_initializer(move |ctx| {
            for target in 0..listeners {
                ctx.add_actor(move |actor| actor.subscribe(EventLabel::by_primary_key::<Ping>(target), |_, _: &Ping| Ok(())));
            }
            ctx.add_actor(move |actor| {
                actor.add_plan(0.0, move |actor| {
                    for _ in 0..pings {
                        let target = actor.rng().gen_range(0..listeners);
                        actor.with_data_manager::<Pinger, _>(|_, ctx| {
                            ctx.publish(Ping { target });
                            Ok(())
                        })?;
                    }
                    Ok(())
                })?;
                Ok(())
            });
            ctx.add_data_manager(Pinger)?;
            Ok(())
        })
        .build()
        .unwrap()
}

struct Pinger;

impl nucleus::DataManager for Pinger {
    fn init(&mut self, _ctx: &mut nucleus::DataManagerContext<'_>) -> nucleus::NucleusResult<()> {
        Ok(())
    }
}

fn bench_plan_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_queue");
    for size in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("schedule_then_drain", size), &size, |b, &size| {
            b.iter_custom(|iters| {
                let mut rng = ChaCha8Rng::seed_from_u64(7);
                let specs: Vec<PlanSpec> = (0..size)
                    .map(|_| PlanSpec::at(rng.gen_range(0.0..100.0)).with_priority(rng.gen_range(-3..4)))
                    .collect();
                let owner = Owner::Actor(ActorId::new(0));

                let start = Instant::now();
                for _ in 0..iters {
                    let mut queue = PlanQueue::new();
                    for (idx, spec) in specs.iter().enumerate() {
                        queue.schedule(0.0, spec.clone(), owner, idx).unwrap();
                    }
                    while let Some(plan) = queue.pop() {
                        black_box(plan.payload);
                    }
                }
                start.elapsed()
            });
        });
    }
    group.finish();
}

fn bench_event_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_routing");
    for listeners in [10u64, 1_000] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(BenchmarkId::new("primary_key", listeners), &listeners, |b, &listeners| {
            b.iter(|| {
                let report = Simulation::builder()
                    .add_plugin(ping_plugin(listeners, 10_000))
                    .build()
                    .unwrap()
                    .execute()
                    .unwrap();
                black_box(report.events_published)
            });
        });
    }
    group.finish();
}

fn bench_experiment(c: &mut Criterion) {
    c.bench_function("experiment/16_scenarios_4_threads", |b| {
        b.iter(|| {
            let mut dimension = nucleus::FunctionalDimension::builder().add_meta_datum("level");
            for level in 0..16 {
                dimension = dimension.add_level(move |_| Ok(vec![level.to_string()]));
            }
            let report = Experiment::builder()
                .add_plugin(ping_plugin(10, 1_000))
                .add_dimension(dimension.build().unwrap())
                .set_thread_count(4)
                .build()
                .unwrap()
                .execute()
                .unwrap();
            black_box(report.succeeded.len())
        });
    });
}

criterion_group!(kernel, bench_plan_queue, bench_event_routing, bench_experiment);
criterion_main!(kernel);
