mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use common::{default_ticker, ticker_plugin, TickerData, TickerDataBuilder};
use nucleus::{
    BuilderState, ContractError, Experiment, ExperimentContext, ExecutionError, FunctionalDimension, NucleusError,
    NucleusResult, Plugin, PluginData, PluginDataBuilder, ScenarioId, ScenarioStatus, SimulationState,
};

#[derive(Debug, Clone, PartialEq)]
struct SettingsContent {
    rate: f64,
    vaccinate: bool,
}

impl Default for SettingsContent {
    fn default() -> Self {
        Self {
            rate: 1.0,
            vaccinate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Settings {
    content: Arc<SettingsContent>,
}

impl PluginData for Settings {
    fn clone_builder(&self) -> Box<dyn PluginDataBuilder> {
        Box::new(SettingsBuilder {
            state: BuilderState::sealed(Arc::clone(&self.content)),
        })
    }

    fn empty_builder(&self) -> Box<dyn PluginDataBuilder> {
        Box::new(SettingsBuilder {
            state: BuilderState::default(),
        })
    }
}

#[derive(Debug)]
struct SettingsBuilder {
    state: BuilderState<SettingsContent>,
}

impl SettingsBuilder {
    fn set_rate(&mut self, rate: f64) -> &mut Self {
        self.state.edit().rate = rate;
        self
    }

    fn set_vaccinate(&mut self, vaccinate: bool) -> &mut Self {
        self.state.edit().vaccinate = vaccinate;
        self
    }
}

impl PluginDataBuilder for SettingsBuilder {
    fn build(&mut self) -> NucleusResult<Arc<dyn PluginData>> {
        Ok(Arc::new(Settings {
            content: self.state.seal(),
        }))
    }
}

/// Reports its settings at time zero. Fails when vaccination is off and
/// `strict` is set.
fn settings_plugin(strict: bool) -> Plugin {
    Plugin::builder("settings")
        .add_plugin_data(Settings {
            content: Arc::new(SettingsContent::default()),
        })
        .set_initializer(move |ctx| {
            let settings = ctx.plugin_data::<Settings>()?;
            ctx.add_actor(move |actor| {
                actor.add_plan(0.0, move |actor| {
                    if strict && !settings.content.vaccinate {
                        return Err(ContractError::incompatible("vaccinate", "true", false).into());
                    }
                    let line = format!("{} {}", settings.content.rate, settings.content.vaccinate);
                    actor.release_output(line);
                    Ok(())
                })?;
                Ok(())
            });
            Ok(())
        })
        .build()
        .unwrap()
}

fn rate_dimension() -> FunctionalDimension {
    let mut builder = FunctionalDimension::builder().add_meta_datum("rate");
    for rate in [0.0, 0.25, 0.5] {
        builder = builder.add_level(move |ctx| {
            ctx.plugin_data_builder::<SettingsBuilder>()?.set_rate(rate);
            Ok(vec![rate.to_string()])
        });
    }
    builder.build().unwrap()
}

fn vaccinate_dimension() -> FunctionalDimension {
    let mut builder = FunctionalDimension::builder().add_meta_datum("vaccinate");
    for vaccinate in [true, false] {
        builder = builder.add_level(move |ctx| {
            ctx.plugin_data_builder::<SettingsBuilder>()?.set_vaccinate(vaccinate);
            Ok(vec![vaccinate.to_string()])
        });
    }
    builder.build().unwrap()
}

type Lines = Arc<Mutex<BTreeMap<ScenarioId, Vec<String>>>>;

fn collect_lines(lines: &Lines) -> impl FnOnce(&ExperimentContext) + 'static {
    let lines = Arc::clone(lines);
    move |ctx: &ExperimentContext| {
        ctx.subscribe_to_output::<String>(move |_, scenario_id, line| {
            lines.lock().unwrap().entry(scenario_id).or_default().push(line.clone());
        });
    }
}

#[test]
fn scenarios_follow_the_cartesian_product() {
    let lines: Lines = Arc::default();
    let meta = Arc::new(Mutex::new(Vec::new()));
    let meta_sink = Arc::clone(&meta);

    let report = Experiment::builder()
        .add_plugin(settings_plugin(false))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .add_experiment_context_consumer(collect_lines(&lines))
        .add_experiment_context_consumer(move |ctx: &ExperimentContext| {
            ctx.subscribe_to_experiment_close(move |ctx| {
                let mut meta = meta_sink.lock().unwrap();
                meta.push(ctx.experiment_meta_data().to_vec());
                for index in 0..ctx.scenario_count() {
                    meta.push(ctx.scenario_meta_data(ScenarioId::from(index)).unwrap().to_vec());
                }
            });
        })
        .set_thread_count(3)
        .build()
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(report.scenario_count, 6);
    assert!(report.is_success());

    let lines = lines.lock().unwrap();
    assert_eq!(lines[&ScenarioId::new(0)], vec!["0 true"]);
    assert_eq!(lines[&ScenarioId::new(1)], vec!["0 false"]);
    assert_eq!(lines[&ScenarioId::new(2)], vec!["0.25 true"]);
    assert_eq!(lines[&ScenarioId::new(5)], vec!["0.5 false"]);

    let meta = meta.lock().unwrap();
    assert_eq!(meta[0], vec!["rate", "vaccinate"]);
    assert_eq!(meta[1], vec!["0", "true"]);
    assert_eq!(meta[6], vec!["0.5", "false"]);
}

#[test]
fn every_scenario_opens_and_closes_once() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let report = Experiment::builder()
        .add_plugin(settings_plugin(false))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .add_experiment_context_consumer(move |ctx: &ExperimentContext| {
            let (open, close) = (Arc::clone(&sink), Arc::clone(&sink));
            ctx.subscribe_to_simulation_open(move |_, id| open.lock().unwrap().push(("open", id)));
            ctx.subscribe_to_simulation_close(move |_, id| close.lock().unwrap().push(("close", id)));
        })
        .set_thread_count(4)
        .build()
        .unwrap()
        .execute()
        .unwrap();

    let mut ids: Vec<ScenarioId> = report.succeeded.keys().copied().collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..6).map(ScenarioId::from).collect::<Vec<_>>());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 12);
    for id in ids {
        let open = events.iter().position(|e| *e == ("open", id)).unwrap();
        let close = events.iter().position(|e| *e == ("close", id)).unwrap();
        assert!(open < close);
        assert_eq!(events.iter().filter(|e| e.1 == id).count(), 2);
    }
}

#[test]
fn a_failing_scenario_does_not_stop_its_siblings() {
    let contexts: Arc<Mutex<Option<ExperimentContext>>> = Arc::default();
    let stash = Arc::clone(&contexts);

    let report = Experiment::builder()
        .add_plugin(settings_plugin(true))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .add_experiment_context_consumer(move |ctx: &ExperimentContext| {
            *stash.lock().unwrap() = Some(ctx.clone());
        })
        .set_thread_count(2)
        .build()
        .unwrap()
        .execute()
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(
        report.failed.keys().copied().collect::<Vec<_>>(),
        vec![ScenarioId::new(1), ScenarioId::new(3), ScenarioId::new(5)]
    );
    assert_eq!(
        report.succeeded.keys().copied().collect::<Vec<_>>(),
        vec![ScenarioId::new(0), ScenarioId::new(2), ScenarioId::new(4)]
    );

    let ctx = contexts.lock().unwrap().clone().unwrap();
    assert_eq!(ctx.scenarios_with_status(ScenarioStatus::Failed).len(), 3);
    assert_eq!(ctx.scenario_status(ScenarioId::new(4)), Some(ScenarioStatus::Succeeded));
}

#[test]
fn halt_on_exception_stops_starting_scenarios() {
    let contexts: Arc<Mutex<Option<ExperimentContext>>> = Arc::default();
    let stash = Arc::clone(&contexts);

    let err = Experiment::builder()
        .add_plugin(settings_plugin(true))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .add_experiment_context_consumer(move |ctx: &ExperimentContext| {
            *stash.lock().unwrap() = Some(ctx.clone());
        })
        .set_halt_on_exception(true)
        .build()
        .unwrap()
        .execute()
        .unwrap_err();

    assert!(matches!(
        err,
        NucleusError::Execution(ExecutionError::ScenarioFailed { scenario_id, .. }) if scenario_id == ScenarioId::new(1)
    ));
    let ctx = contexts.lock().unwrap().clone().unwrap();
    assert_eq!(ctx.scenarios_with_status(ScenarioStatus::Succeeded), vec![ScenarioId::new(0)]);
    assert_eq!(ctx.scenarios_with_status(ScenarioStatus::Ready).len(), 4);
}

#[test]
fn progress_log_skips_completed_scenarios() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("progress.jsonl");

    let first = Experiment::builder()
        .add_plugin(settings_plugin(false))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .set_progress_log(&log)
        .set_scenario_ids([ScenarioId::new(0), ScenarioId::new(2)])
        .build()
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(first.succeeded.len(), 2);
    assert_eq!(first.not_run.len(), 4);

    let lines: Lines = Arc::default();
    let second = Experiment::builder()
        .add_plugin(settings_plugin(false))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .add_experiment_context_consumer(collect_lines(&lines))
        .set_progress_log(&log)
        .set_continue_from_progress_log(true)
        .set_thread_count(2)
        .build()
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(second.previously_succeeded, vec![ScenarioId::new(0), ScenarioId::new(2)]);
    assert_eq!(
        second.succeeded.keys().copied().collect::<Vec<_>>(),
        vec![ScenarioId::new(1), ScenarioId::new(3), ScenarioId::new(4), ScenarioId::new(5)]
    );
    assert!(!lines.lock().unwrap().contains_key(&ScenarioId::new(0)));

    // A third run finds everything done.
    let third = Experiment::builder()
        .add_plugin(settings_plugin(false))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .set_progress_log(&log)
        .set_continue_from_progress_log(true)
        .build()
        .unwrap()
        .execute()
        .unwrap();
    assert!(third.succeeded.is_empty());
    assert_eq!(third.previously_succeeded.len(), 6);
}

#[test]
fn progress_log_of_another_experiment_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("progress.jsonl");

    Experiment::builder()
        .add_plugin(settings_plugin(false))
        .add_dimension(rate_dimension())
        .set_progress_log(&log)
        .build()
        .unwrap()
        .execute()
        .unwrap();

    let opened = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&opened);
    let err = Experiment::builder()
        .add_plugin(settings_plugin(false))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .add_experiment_context_consumer(move |ctx: &ExperimentContext| {
            ctx.subscribe_to_simulation_open(move |_, _| *flag.lock().unwrap() = true);
        })
        .set_progress_log(&log)
        .set_continue_from_progress_log(true)
        .build()
        .unwrap()
        .execute()
        .unwrap_err();

    assert!(matches!(
        err,
        NucleusError::Execution(ExecutionError::IncompatibleProgressLog { .. })
    ));
    assert!(!*opened.lock().unwrap());
}

fn interval_dimension() -> FunctionalDimension {
    let mut builder = FunctionalDimension::builder().add_meta_datum("interval");
    for interval in [1.0, 2.0] {
        builder = builder.add_level(move |ctx| {
            ctx.plugin_data_builder::<TickerDataBuilder>()?.set_interval(interval);
            Ok(vec![interval.to_string()])
        });
    }
    builder.build().unwrap()
}

fn ticker_lines(master_seed: u64) -> BTreeMap<ScenarioId, Vec<String>> {
    ticker_lines_from(master_seed, None)
}

fn ticker_lines_from(master_seed: u64, state: Option<Arc<SimulationState>>) -> BTreeMap<ScenarioId, Vec<String>> {
    let lines: Lines = Arc::default();
    let mut builder = Experiment::builder()
        .add_plugin(ticker_plugin(default_ticker()))
        .add_dimension(interval_dimension())
        .add_experiment_context_consumer(collect_lines(&lines))
        .set_master_seed(master_seed)
        .set_thread_count(2);
    if let Some(state) = state {
        builder = builder.set_simulation_state(state);
    }
    builder.build().unwrap().execute().unwrap();
    let lines = lines.lock().unwrap().clone();
    lines
}

fn draws(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.split(" draw ").nth(1).map(ToString::to_string))
        .collect()
}

#[test]
fn master_seed_fixes_every_scenario_stream() {
    let a = ticker_lines(17);
    let b = ticker_lines(17);
    let c = ticker_lines(18);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a[&ScenarioId::new(0)].len(), 10);
    assert!(a[&ScenarioId::new(0)][1].starts_with("2 tick 2 draw "));
    assert!(a[&ScenarioId::new(1)][0].starts_with("2 tick 1 "));
}

#[test]
fn halt_times_and_recorded_state_per_scenario() {
    let checkpoints = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&checkpoints);

    let report = Experiment::builder()
        .add_plugin(ticker_plugin(default_ticker()))
        .add_dimension(interval_dimension())
        .add_experiment_context_consumer(move |ctx: &ExperimentContext| {
            ctx.subscribe_to_plugin_data(move |_, scenario_id, data| {
                sink.lock().unwrap().push((scenario_id, Arc::clone(data)));
            });
        })
        .set_simulation_halt_time(3.0)
        .set_scenario_halt_time(ScenarioId::new(1), 5.0)
        .set_record_state(true)
        .set_thread_count(2)
        .build()
        .unwrap()
        .execute()
        .unwrap();

    let first = &report.succeeded[&ScenarioId::new(0)];
    let second = &report.succeeded[&ScenarioId::new(1)];
    assert!((first.final_time - 3.0).abs() < f64::EPSILON);
    assert!((second.final_time - 5.0).abs() < f64::EPSILON);
    assert_eq!(first.plans_executed, 3);
    assert_eq!(second.plans_executed, 2);

    let checkpoints = checkpoints.lock().unwrap();
    assert_eq!(checkpoints.len(), 4);
    for scenario in [ScenarioId::new(0), ScenarioId::new(1)] {
        let mine: Vec<_> = checkpoints.iter().filter(|(id, _)| *id == scenario).collect();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().any(|(_, data)| data.as_ref().is::<TickerData>()));
        assert!(mine.iter().any(|(_, data)| data.as_ref().is::<SimulationState>()));
    }
}

#[test]
fn shared_state_keeps_each_scenario_stream() {
    let mut stream = ChaCha8Rng::seed_from_u64(1234);
    stream.next_u64();
    let mut state = SimulationState::builder();
    state.set_rng(&stream);
    let state = state.build_state().unwrap();

    let lines = ticker_lines_from(17, Some(state));
    assert_ne!(
        draws(&lines[&ScenarioId::new(0)]),
        draws(&lines[&ScenarioId::new(1)])
    );
    assert_eq!(lines, ticker_lines(17));
}

type Checkpoints = Arc<Mutex<Vec<Arc<dyn PluginData>>>>;

fn single_ticker_run(
    ticker: TickerData,
    halt_time: Option<f64>,
    state: Option<Arc<SimulationState>>,
) -> (Vec<String>, Checkpoints) {
    let lines: Lines = Arc::default();
    let checkpoints: Checkpoints = Arc::default();
    let sink = Arc::clone(&checkpoints);
    let mut builder = Experiment::builder()
        .add_plugin(ticker_plugin(ticker))
        .add_experiment_context_consumer(collect_lines(&lines))
        .add_experiment_context_consumer(move |ctx: &ExperimentContext| {
            ctx.subscribe_to_plugin_data(move |_, _, data| sink.lock().unwrap().push(Arc::clone(data)));
        })
        .set_master_seed(5)
        .set_record_state(halt_time.is_some());
    if let Some(halt_time) = halt_time {
        builder = builder.set_simulation_halt_time(halt_time);
    }
    if let Some(state) = state {
        builder = builder.set_scenario_simulation_state(ScenarioId::new(0), state);
    }
    let report = builder.build().unwrap().execute().unwrap();
    assert!(report.is_success());
    let lines = lines.lock().unwrap().remove(&ScenarioId::new(0)).unwrap_or_default();
    (lines, checkpoints)
}

#[test]
fn scenario_state_resumes_exactly() {
    let (full, _) = single_ticker_run(default_ticker(), None, None);
    let (first, checkpoints) = single_ticker_run(default_ticker(), Some(4.5), None);

    let checkpoints = checkpoints.lock().unwrap().clone();
    let ticker: Arc<TickerData> = checkpoints
        .iter()
        .find_map(nucleus::plugin::downcast_plugin_data::<TickerData>)
        .unwrap();
    let state: Arc<SimulationState> = checkpoints
        .iter()
        .find_map(nucleus::plugin::downcast_plugin_data::<SimulationState>)
        .unwrap();

    let (second, _) = single_ticker_run(ticker.as_ref().clone(), None, Some(state));
    let mut stitched = first;
    stitched.extend(second);
    assert_eq!(stitched, full);
}

#[test]
fn panicking_context_callbacks_fail_only_their_scenario() {
    let contexts: Arc<Mutex<Option<ExperimentContext>>> = Arc::default();
    let stash = Arc::clone(&contexts);

    let report = Experiment::builder()
        .add_plugin(settings_plugin(false))
        .add_dimension(rate_dimension())
        .add_dimension(vaccinate_dimension())
        .add_experiment_context_consumer(move |ctx: &ExperimentContext| {
            *stash.lock().unwrap() = Some(ctx.clone());
            ctx.subscribe_to_simulation_open(|_, id| {
                if id == ScenarioId::new(2) {
                    panic!("open callback exploded");
                }
            });
            ctx.subscribe_to_simulation_close(|_, id| {
                if id == ScenarioId::new(1) {
                    panic!("close callback exploded");
                }
            });
        })
        .set_thread_count(2)
        .build()
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(
        report.failed.keys().copied().collect::<Vec<_>>(),
        vec![ScenarioId::new(1), ScenarioId::new(2)]
    );
    for err in report.failed.values() {
        assert!(matches!(
            err,
            NucleusError::Execution(ExecutionError::WorkerPanicked { message, .. }) if message.contains("exploded")
        ));
    }
    assert_eq!(
        report.succeeded.keys().copied().collect::<Vec<_>>(),
        [0, 3, 4, 5].into_iter().map(ScenarioId::new).collect::<Vec<_>>()
    );

    let ctx = contexts.lock().unwrap().clone().unwrap();
    assert_eq!(ctx.scenario_status(ScenarioId::new(1)), Some(ScenarioStatus::Failed));
    assert_eq!(ctx.scenario_status(ScenarioId::new(2)), Some(ScenarioStatus::Failed));
    assert_eq!(ctx.scenarios_with_status(ScenarioStatus::Succeeded).len(), 4);
}
