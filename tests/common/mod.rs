#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rand::Rng;

use nucleus::{
    BuilderState, ContractError, DataManager, DataManagerContext, Event, LabelKey, NucleusResult, PlanData,
    PlanSpec, Plugin, PluginData, PluginDataBuilder, PrioritizedPlanData, Simulation, SimulationBuilder,
    SimulationReport, SimulationState, StateContext,
};

/// Published by the ticker on every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub count: u32,
    pub draw: u32,
}

impl Event for Tick {
    fn primary_key(&self) -> Option<LabelKey> {
        Some(LabelKey::from(self.count))
    }
}

/// Plan data marking a pending tick.
#[derive(Debug)]
pub struct TickPlan;

impl PlanData for TickPlan {}

#[derive(Debug, Clone, PartialEq)]
struct TickerContent {
    interval: f64,
    max_ticks: u32,
    count: u32,
    pending: Vec<(f64, i64, u64, bool)>,
}

impl Default for TickerContent {
    fn default() -> Self {
        Self {
            interval: 1.0,
            max_ticks: 10,
            count: 0,
            pending: Vec::new(),
        }
    }
}

/// The ticker plugin's data: its settings plus, in a checkpoint, its count
/// and pending ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerData {
    content: Arc<TickerContent>,
}

impl TickerData {
    pub fn builder() -> TickerDataBuilder {
        TickerDataBuilder {
            state: BuilderState::default(),
        }
    }

    pub fn interval(&self) -> f64 {
        self.content.interval
    }

    pub fn max_ticks(&self) -> u32 {
        self.content.max_ticks
    }

    pub fn count(&self) -> u32 {
        self.content.count
    }

    pub fn pending_ticks(&self) -> usize {
        self.content.pending.len()
    }
}

impl PluginData for TickerData {
    fn clone_builder(&self) -> Box<dyn PluginDataBuilder> {
        Box::new(TickerDataBuilder {
            state: BuilderState::sealed(Arc::clone(&self.content)),
        })
    }

    fn empty_builder(&self) -> Box<dyn PluginDataBuilder> {
        Box::new(TickerData::builder())
    }
}

#[derive(Debug)]
pub struct TickerDataBuilder {
    state: BuilderState<TickerContent>,
}

impl TickerDataBuilder {
    pub fn set_interval(&mut self, interval: f64) -> &mut Self {
        self.state.edit().interval = interval;
        self
    }

    pub fn set_max_ticks(&mut self, max_ticks: u32) -> &mut Self {
        self.state.edit().max_ticks = max_ticks;
        self
    }

    fn set_checkpoint(&mut self, count: u32, pending: &[PrioritizedPlanData]) -> &mut Self {
        let content = self.state.edit();
        content.count = count;
        content.pending = pending
            .iter()
            .map(|ppd| (ppd.time, ppd.priority, ppd.sequence, ppd.active))
            .collect();
        self
    }

    pub fn build_data(&mut self) -> NucleusResult<TickerData> {
        let content = self.state.seal_with(|c| {
            if c.interval > 0.0 {
                Ok(())
            } else {
                Err(ContractError::incompatible("tick interval", "a positive interval", c.interval))
            }
        })?;
        Ok(TickerData { content })
    }
}

impl PluginDataBuilder for TickerDataBuilder {
    fn build(&mut self) -> NucleusResult<Arc<dyn PluginData>> {
        Ok(Arc::new(self.build_data()?))
    }
}

/// Counts ticks, drawing one random number per tick.
pub struct Ticker {
    data: Arc<TickerData>,
    count: u32,
}

impl Ticker {
    fn tick(&mut self, ctx: &mut DataManagerContext<'_>) -> NucleusResult<()> {
        self.count += 1;
        let draw = ctx.rng().gen_range(0..1000);
        let line = format!("{} tick {} draw {}", ctx.time(), self.count, draw);
        ctx.release_output(line);
        ctx.publish(Tick {
            count: self.count,
            draw,
        });
        if self.count < self.data.max_ticks() {
            let next = PlanSpec::at(ctx.time() + self.data.interval()).with_plan_data(TickPlan);
            ctx.add_plan(next, Ticker::tick)?;
        }
        Ok(())
    }
}

impl DataManager for Ticker {
    fn init(&mut self, ctx: &mut DataManagerContext<'_>) -> NucleusResult<()> {
        if self.data.content.pending.is_empty() && self.count == 0 {
            let first = PlanSpec::at(self.data.interval()).with_plan_data(TickPlan);
            ctx.add_plan(first, Ticker::tick)?;
            return Ok(());
        }
        for &(time, priority, sequence, active) in &self.data.content.pending {
            let mut spec = PlanSpec::at(time)
                .with_priority(priority)
                .with_sequence(sequence)
                .with_plan_data(TickPlan);
            if !active {
                spec = spec.passive();
            }
            ctx.add_plan(spec, Ticker::tick)?;
        }
        Ok(())
    }

    fn record_state(&self, ctx: &mut StateContext<'_>) -> NucleusResult<()> {
        let pending = ctx.prioritized_plan_data::<TickPlan>();
        let mut builder = self.data.clone_builder();
        let builder = builder
            .downcast_mut::<TickerDataBuilder>()
            .ok_or_else(|| nucleus::NucleusError::internal("ticker builder type"))?;
        let data = builder.set_checkpoint(self.count, &pending).build_data()?;
        ctx.release_plugin_data(data)
    }
}

/// A ticker plugin built around `data`.
pub fn ticker_plugin(data: TickerData) -> Plugin {
    Plugin::builder("ticker")
        .add_plugin_data(data)
        .set_initializer(|ctx| {
            let data = ctx.plugin_data::<TickerData>()?;
            let count = data.count();
            ctx.add_data_manager(Ticker { data, count })?;
            Ok(())
        })
        .build()
        .unwrap()
}

pub fn default_ticker() -> TickerData {
    TickerData::builder().build_data().unwrap()
}

/// An actor that reports every tick it hears.
pub fn listener_plugin() -> Plugin {
    Plugin::builder("listener")
        .add_dependency("ticker")
        .set_initializer(|ctx| {
            ctx.add_actor(|actor| {
                actor.subscribe_to_type(|actor, tick: &Tick| {
                    let line = format!("{} heard {}", actor.time(), tick.count);
                    actor.release_output(line);
                    Ok(())
                })
            });
            Ok(())
        })
        .build()
        .unwrap()
}

/// Everything a single simulation released.
pub struct Collected {
    pub report: SimulationReport,
    pub lines: Vec<String>,
    pub plugin_data: Vec<Arc<dyn PluginData>>,
}

impl Collected {
    pub fn find<T: PluginData>(&self) -> Option<Arc<T>> {
        self.plugin_data.iter().find_map(nucleus::plugin::downcast_plugin_data::<T>)
    }

    pub fn simulation_state(&self) -> Arc<SimulationState> {
        self.find::<SimulationState>().expect("simulation state was released")
    }
}

pub fn run_collecting(builder: SimulationBuilder) -> NucleusResult<Collected> {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let plugin_data = Rc::new(RefCell::new(Vec::new()));
    let (line_sink, data_sink) = (Rc::clone(&lines), Rc::clone(&plugin_data));
    let report = builder
        .set_output_consumer(move |output| {
            if let Some(line) = output.downcast_ref::<String>() {
                line_sink.borrow_mut().push(line.clone());
            }
            if let Some(data) = output.plugin_data() {
                data_sink.borrow_mut().push(Arc::clone(data));
            }
        })
        .build()
        .and_then(Simulation::execute)?;
    let lines = lines.borrow().clone();
    let plugin_data = plugin_data.borrow().clone();
    Ok(Collected {
        report,
        lines,
        plugin_data,
    })
}
