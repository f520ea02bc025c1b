//! Thread-safe view of a running experiment.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use crate::ids::ScenarioId;
use crate::plugin::data::PluginData;
use crate::simulation::Output;

/// Lifecycle of one scenario within an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioStatus {
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Recorded as succeeded by the progress log of an earlier run.
    PreviouslySucceeded,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::PreviouslySucceeded => write!(f, "previously succeeded"),
        }
    }
}

type ExperimentFn = dyn Fn(&ExperimentContext) + Send + Sync;
type ScenarioFn = dyn Fn(&ExperimentContext, ScenarioId) + Send + Sync;
type OutputFn = dyn Fn(&ExperimentContext, ScenarioId, &Output) + Send + Sync;

#[derive(Default)]
struct Subscribers {
    experiment_open: Vec<Arc<ExperimentFn>>,
    experiment_close: Vec<Arc<ExperimentFn>>,
    simulation_open: Vec<Arc<ScenarioFn>>,
    simulation_close: Vec<Arc<ScenarioFn>>,
    output: Vec<Arc<OutputFn>>,
}

struct Inner {
    experiment_meta_data: Vec<String>,
    scenario_meta_data: BTreeMap<ScenarioId, Vec<String>>,
    statuses: Mutex<Vec<ScenarioStatus>>,
    started: Instant,
    subscribers: RwLock<Subscribers>,
}

/// Shared handle to an experiment's progress and callbacks.
///
/// Consumers receive it once before the experiment opens and register
/// subscriptions on it. Callbacks for a given scenario run on that
/// scenario's worker thread, so callbacks of different scenarios may run at
/// the same time.
#[derive(Clone)]
pub struct ExperimentContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for ExperimentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentContext")
            .field("experiment_meta_data", &self.inner.experiment_meta_data)
            .field("scenario_count", &self.scenario_count())
            .finish_non_exhaustive()
    }
}

impl ExperimentContext {
    pub(crate) fn new(
        experiment_meta_data: Vec<String>,
        scenario_meta_data: BTreeMap<ScenarioId, Vec<String>>,
        scenario_count: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                experiment_meta_data,
                scenario_meta_data,
                statuses: Mutex::new(vec![ScenarioStatus::Ready; scenario_count]),
                started: Instant::now(),
                subscribers: RwLock::new(Subscribers::default()),
            }),
        }
    }

    fn subscribe(&self, add: impl FnOnce(&mut Subscribers)) {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        add(&mut subscribers);
    }

    fn snapshot<T: ?Sized>(&self, select: impl FnOnce(&Subscribers) -> &Vec<Arc<T>>) -> Vec<Arc<T>> {
        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        select(&subscribers).clone()
    }

    /// Called once before any scenario starts.
    pub fn subscribe_to_experiment_open(&self, callback: impl Fn(&ExperimentContext) + Send + Sync + 'static) {
        self.subscribe(|s| s.experiment_open.push(Arc::new(callback)));
    }

    /// Called once after every scenario has finished.
    pub fn subscribe_to_experiment_close(&self, callback: impl Fn(&ExperimentContext) + Send + Sync + 'static) {
        self.subscribe(|s| s.experiment_close.push(Arc::new(callback)));
    }

    /// Called on the scenario's worker before its simulation starts.
    pub fn subscribe_to_simulation_open(
        &self,
        callback: impl Fn(&ExperimentContext, ScenarioId) + Send + Sync + 'static,
    ) {
        self.subscribe(|s| s.simulation_open.push(Arc::new(callback)));
    }

    /// Called on the scenario's worker after its simulation ends, whether it
    /// succeeded or failed.
    pub fn subscribe_to_simulation_close(
        &self,
        callback: impl Fn(&ExperimentContext, ScenarioId) + Send + Sync + 'static,
    ) {
        self.subscribe(|s| s.simulation_close.push(Arc::new(callback)));
    }

    /// Receives every released output of type `T`.
    pub fn subscribe_to_output<T: Any>(
        &self,
        callback: impl Fn(&ExperimentContext, ScenarioId, &T) + Send + Sync + 'static,
    ) {
        self.subscribe(|s| {
            s.output.push(Arc::new(move |ctx: &ExperimentContext, scenario_id: ScenarioId, output: &Output| {
                if let Some(value) = output.downcast_ref::<T>() {
                    callback(ctx, scenario_id, value);
                }
            }));
        });
    }

    /// Receives every checkpoint plugin data value.
    pub fn subscribe_to_plugin_data(
        &self,
        callback: impl Fn(&ExperimentContext, ScenarioId, &Arc<dyn PluginData>) + Send + Sync + 'static,
    ) {
        self.subscribe(|s| {
            s.output.push(Arc::new(move |ctx: &ExperimentContext, scenario_id: ScenarioId, output: &Output| {
                if let Some(data) = output.plugin_data() {
                    callback(ctx, scenario_id, data);
                }
            }));
        });
    }

    pub(crate) fn open_experiment(&self) {
        for callback in self.snapshot(|s| &s.experiment_open) {
            callback(self);
        }
    }

    pub(crate) fn close_experiment(&self) {
        for callback in self.snapshot(|s| &s.experiment_close) {
            callback(self);
        }
    }

    pub(crate) fn open_simulation(&self, scenario_id: ScenarioId) {
        self.set_status(scenario_id, ScenarioStatus::Running);
        for callback in self.snapshot(|s| &s.simulation_open) {
            callback(self, scenario_id);
        }
    }

    pub(crate) fn close_simulation(&self, scenario_id: ScenarioId, status: ScenarioStatus) {
        self.set_status(scenario_id, status);
        for callback in self.snapshot(|s| &s.simulation_close) {
            callback(self, scenario_id);
        }
    }

    pub(crate) fn handle_output(&self, scenario_id: ScenarioId, output: &Output) {
        for callback in self.snapshot(|s| &s.output) {
            callback(self, scenario_id, output);
        }
    }

    pub(crate) fn set_status(&self, scenario_id: ScenarioId, status: ScenarioStatus) {
        let mut statuses = self.inner.statuses.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = statuses.get_mut(scenario_id.index()) {
            *slot = status;
        }
    }

    #[must_use]
    pub fn scenario_count(&self) -> usize {
        self.inner
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn scenario_status(&self, scenario_id: ScenarioId) -> Option<ScenarioStatus> {
        self.inner
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scenario_id.index())
            .copied()
    }

    /// Scenarios currently in `status`, in id order.
    #[must_use]
    pub fn scenarios_with_status(&self, status: ScenarioStatus) -> Vec<ScenarioId> {
        self.inner
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == status)
            .map(|(idx, _)| ScenarioId::from(idx))
            .collect()
    }

    /// Column names: every dimension's meta data, in dimension order.
    #[must_use]
    pub fn experiment_meta_data(&self) -> &[String] {
        &self.inner.experiment_meta_data
    }

    /// The scenario's level values, aligned with
    /// [`Self::experiment_meta_data`].
    #[must_use]
    pub fn scenario_meta_data(&self, scenario_id: ScenarioId) -> Option<&[String]> {
        self.inner
            .scenario_meta_data
            .get(&scenario_id)
            .map(Vec::as_slice)
    }

    /// Seconds since the experiment started.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.inner.started.elapsed().as_secs_f64()
    }
}
