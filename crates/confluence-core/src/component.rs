//! The component abstraction: static descriptors declaring a component's
//! interface, the three lifecycle hooks, and the [`ComponentAdapter`]
//! wrapping a user-supplied component behind a uniform facade.
//!
//! A component is a plain value presenting a [`ComponentDefinition`] and
//! implementing the [`Component`] trait; registration with the framework is
//! explicit, never discovered by introspection.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{Array2, ArrayD, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::ComponentFrame;
use crate::data::{ClimatologyFrequency, DataSet, FieldData};
use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::exchanger::Exchanger;
use crate::record::{RecordKind, RecordMethod, RecordRequests, RecordStream, StreamEntry};
use crate::space::LatLonGrid;
use crate::state::State;
use crate::time::{DateTime, TimeDomain};

/// The part of the coupled cycle a component simulates.
///
/// The declaration order is also the firing order of the driver within a
/// base-period iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    SurfaceLayer,
    SubSurface,
    OpenWater,
    NutrientSurfaceLayer,
    NutrientSubSurface,
    NutrientOpenWater,
    /// A peer outside the framework (e.g. the ocean); outwards aimed at it
    /// are buffered but never read.
    Ocean,
}

impl Category {
    /// The six simulated categories, in firing order.
    pub const ORDER: [Category; 6] = [
        Category::SurfaceLayer,
        Category::SubSurface,
        Category::OpenWater,
        Category::NutrientSurfaceLayer,
        Category::NutrientSubSurface,
        Category::NutrientOpenWater,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::SurfaceLayer => "surfacelayer",
            Category::SubSurface => "subsurface",
            Category::OpenWater => "openwater",
            Category::NutrientSurfaceLayer => "nutrientsurfacelayer",
            Category::NutrientSubSurface => "nutrientsubsurface",
            Category::NutrientOpenWater => "nutrientopenwater",
            Category::Ocean => "ocean",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfluenceError;

    fn from_str(s: &str) -> ConfluenceResult<Self> {
        match s {
            "surfacelayer" => Ok(Category::SurfaceLayer),
            "subsurface" => Ok(Category::SubSurface),
            "openwater" => Ok(Category::OpenWater),
            "nutrientsurfacelayer" => Ok(Category::NutrientSurfaceLayer),
            "nutrientsubsurface" => Ok(Category::NutrientSubSurface),
            "nutrientopenwater" => Ok(Category::NutrientOpenWater),
            "ocean" => Ok(Category::Ocean),
            other => Err(ConfluenceError::Config(format!(
                "unknown component category '{other}'"
            ))),
        }
    }
}

/// Lifecycle phase a component error was raised in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initialise,
    Run,
    Finalise,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initialise => "initialise",
            Phase::Run => "run",
            Phase::Finalise => "finalise",
        };
        write!(f, "{name}")
    }
}

/// Aggregation method of a transfer across space and time oversampling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Mean,
    Sum,
    Min,
    Max,
}

/// A transfer consumed by a component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InwardSpec {
    pub name: String,
    pub units: String,
    pub from: Category,
    pub method: TransferMethod,
    /// Required inwards fail wiring without a producer; optional ones
    /// receive a field of zeros instead.
    pub required: bool,
}

impl InwardSpec {
    pub fn new(name: &str, units: &str, from: Category, method: TransferMethod) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            from,
            method,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A transfer produced by a component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutwardSpec {
    pub name: String,
    pub units: String,
    pub to: Vec<Category>,
    pub method: TransferMethod,
}

impl OutwardSpec {
    pub fn new(name: &str, units: &str, to: &[Category], method: TransferMethod) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            to: to.to_vec(),
            method,
        }
    }
}

/// Kind of a driving-data input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Dynamic,
    Static,
    Climatologic(ClimatologyFrequency),
}

/// A driving-data input of a component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub units: String,
    pub kind: InputKind,
}

impl InputSpec {
    pub fn dynamic(name: &str, units: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            kind: InputKind::Dynamic,
        }
    }

    pub fn static_(name: &str, units: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            kind: InputKind::Static,
        }
    }

    pub fn climatologic(name: &str, units: &str, frequency: ClimatologyFrequency) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            kind: InputKind::Climatologic(frequency),
        }
    }
}

/// A parameter of a component, with an optional valid range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub units: String,
    pub valid_range: Option<(f64, f64)>,
}

impl ParameterSpec {
    pub fn new(name: &str, units: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            valid_range: None,
        }
    }

    pub fn with_valid_range(mut self, lo: f64, hi: f64) -> Self {
        self.valid_range = Some((lo, hi));
        self
    }
}

/// A constant of a component, with a mandatory default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantSpec {
    pub name: String,
    pub units: String,
    pub default: f64,
}

impl ConstantSpec {
    pub fn new(name: &str, units: &str, default: f64) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            default,
        }
    }
}

/// One division axis of a state, beyond the grid shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Divisions {
    Fixed(usize),
    /// Resolved from a constant value at initialisation.
    Constant(String),
}

/// A state of a component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    pub units: String,
    pub divisions: Vec<Divisions>,
}

impl StateSpec {
    /// A state shaped like the grid.
    pub fn new(name: &str, units: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            divisions: vec![],
        }
    }

    pub fn with_divisions(mut self, divisions: Vec<Divisions>) -> Self {
        self.divisions = divisions;
        self
    }
}

/// A bespoke output of a component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub units: String,
}

impl OutputSpec {
    pub fn new(name: &str, units: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
        }
    }
}

/// The full static descriptor of a component class.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub category: Category,
    pub inwards: Vec<InwardSpec>,
    pub outwards: Vec<OutwardSpec>,
    pub inputs: Vec<InputSpec>,
    pub parameters: Vec<ParameterSpec>,
    pub constants: Vec<ConstantSpec>,
    pub states: Vec<StateSpec>,
    pub outputs: Vec<OutputSpec>,
    /// History depth retained by the solver beyond the current step.
    pub solver_history: usize,
    pub requires_land_sea_mask: bool,
    pub requires_flow_direction: bool,
    pub requires_cell_area: bool,
}

impl ComponentDefinition {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            inwards: vec![],
            outwards: vec![],
            inputs: vec![],
            parameters: vec![],
            constants: vec![],
            states: vec![],
            outputs: vec![],
            solver_history: 1,
            requires_land_sea_mask: false,
            requires_flow_direction: false,
            requires_cell_area: false,
        }
    }

    pub fn outward(&self, name: &str) -> Option<&OutwardSpec> {
        self.outwards.iter().find(|o| o.name == name)
    }

    pub fn inward(&self, name: &str) -> Option<&InwardSpec> {
        self.inwards.iter().find(|i| i.name == name)
    }

    fn recordable(&self, name: &str) -> Option<(RecordKind, String, Vec<Divisions>)> {
        if let Some(o) = self.outputs.iter().find(|o| o.name == name) {
            return Some((RecordKind::Output, o.units.clone(), vec![]));
        }
        if let Some(o) = self.outward(name) {
            return Some((RecordKind::Outward, o.units.clone(), vec![]));
        }
        if let Some(s) = self.states.iter().find(|s| s.name == name) {
            return Some((RecordKind::State, s.units.clone(), s.divisions.clone()));
        }
        None
    }
}

/// Named grid fields, as passed between the adapter, the exchanger and the
/// component hooks. Lookups by undeclared names are programming errors and
/// panic.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Fields(IndexMap<String, Array2<f64>>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: String, value: Array2<f64>) {
        self.0.insert(name, value);
    }

    pub fn get(&self, name: &str) -> &Array2<f64> {
        self.0
            .get(name)
            .unwrap_or_else(|| panic!("no field '{name}' staged for this call"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parameter values, broadcast to the grid shape.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Parameters(IndexMap<String, Array2<f64>>);

impl Parameters {
    pub fn get(&self, name: &str) -> &Array2<f64> {
        self.0
            .get(name)
            .unwrap_or_else(|| panic!("no parameter '{name}' declared by this component"))
    }
}

/// Constant values, scalars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Constants(IndexMap<String, f64>);

impl Constants {
    pub fn get(&self, name: &str) -> f64 {
        *self
            .0
            .get(name)
            .unwrap_or_else(|| panic!("no constant '{name}' declared by this component"))
    }
}

/// The states of a component, by name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct States(IndexMap<String, State>);

impl States {
    pub fn get(&self, name: &str) -> &State {
        self.0
            .get(name)
            .unwrap_or_else(|| panic!("no state '{name}' declared by this component"))
    }

    pub fn get_mut(&mut self, name: &str) -> &mut State {
        self.0
            .get_mut(name)
            .unwrap_or_else(|| panic!("no state '{name}' declared by this component"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &State)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn increment(&mut self) {
        for state in self.0.values_mut() {
            state.increment();
        }
    }
}

/// Opaque per-component auxiliary storage, carried across dumps.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Shelf(pub IndexMap<String, ArrayD<f64>>);

/// Driving-data values staged for one `run` call: dynamic inputs sliced at
/// the current timestep, climatologic inputs at the current bucket, static
/// inputs as they are.
#[derive(Debug)]
pub struct StagedInputs<'a>(IndexMap<String, ArrayView2<'a, f64>>);

impl<'a> StagedInputs<'a> {
    pub fn get(&self, name: &str) -> &ArrayView2<'a, f64> {
        self.0
            .get(name)
            .unwrap_or_else(|| panic!("no input '{name}' staged for this call"))
    }
}

/// Context for the `initialise` hook.
pub struct InitialiseContext<'a> {
    pub grid: &'a LatLonGrid,
    pub states: &'a mut States,
    pub parameters: &'a Parameters,
    pub constants: &'a Constants,
    pub shelf: &'a mut Shelf,
    /// Whether state initial conditions were already set (from a dump or a
    /// previous run); hooks must then leave the states untouched.
    pub initialised_states: bool,
}

/// Context for the `run` hook.
pub struct RunContext<'a> {
    pub datetime: DateTime,
    pub step_seconds: i64,
    pub grid: &'a LatLonGrid,
    pub inwards: &'a Fields,
    pub inputs: &'a StagedInputs<'a>,
    pub parameters: &'a Parameters,
    pub constants: &'a Constants,
    pub states: &'a mut States,
    pub shelf: &'a mut Shelf,
}

/// Context for the `finalise` hook.
pub struct FinaliseContext<'a> {
    pub states: &'a States,
    pub parameters: &'a Parameters,
    pub constants: &'a Constants,
    pub shelf: &'a mut Shelf,
}

/// What a `run` call returns: the outward transfers for the exchanger and
/// the bespoke outputs for the records.
#[derive(Clone, Debug, Default)]
pub struct RunOutput {
    pub outwards: IndexMap<String, Array2<f64>>,
    pub outputs: IndexMap<String, Array2<f64>>,
}

/// An externally authored integrator for one part of the coupled cycle.
///
/// Hooks are expected to be pure functions of their declared inputs,
/// inwards, states, parameters and constants; determinism of the coupled
/// model depends on it. No I/O may occur during `run`.
pub trait Component: fmt::Debug + Send {
    /// The static descriptor of the component's interface.
    fn definition(&self) -> ComponentDefinition;

    /// Set initial conditions for the component states, unless
    /// `ctx.initialised_states` says they were already provided.
    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()>;

    /// Advance the component by one of its own timesteps.
    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput>;

    /// Release whatever the component holds; called once after the last
    /// timestep.
    fn finalise(&mut self, ctx: FinaliseContext) -> ConfluenceResult<()>;
}

/// Value of a parameter as supplied by the user: a scalar broadcast to the
/// grid, or a full field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Scalar(f64),
    Field(Array2<f64>),
}

/// Builder assembling and validating a [`ComponentAdapter`].
pub struct ComponentAdapterBuilder {
    component: Box<dyn Component>,
    saving_directory: PathBuf,
    timedomain: TimeDomain,
    spacedomain: Arc<LatLonGrid>,
    dataset: DataSet,
    parameters: IndexMap<String, (ParameterValue, String)>,
    constants: IndexMap<String, (f64, String)>,
    records: RecordRequests,
    io_slice: usize,
}

impl ComponentAdapterBuilder {
    pub fn with_dataset(mut self, dataset: DataSet) -> Self {
        self.dataset = dataset;
        self
    }

    pub fn with_parameter(mut self, name: &str, value: ParameterValue, units: &str) -> Self {
        self.parameters
            .insert(name.to_string(), (value, units.to_string()));
        self
    }

    pub fn with_constant(mut self, name: &str, value: f64, units: &str) -> Self {
        self.constants
            .insert(name.to_string(), (value, units.to_string()));
        self
    }

    pub fn with_records(mut self, records: RecordRequests) -> Self {
        self.records = records;
        self
    }

    /// Number of completed windows buffered in memory per record flush.
    pub fn with_io_slice(mut self, io_slice: usize) -> Self {
        self.io_slice = io_slice.max(1);
        self
    }

    pub fn build(self) -> ConfluenceResult<ComponentAdapter> {
        let definition = self.component.definition();
        let category = definition.category;

        check_spacedomain(&definition, &self.spacedomain)?;
        let constants = resolve_constants(&definition, &self.constants)?;
        let parameters = resolve_parameters(&definition, &self.parameters, &self.spacedomain)?;
        let states = instantiate_states(&definition, &constants, &self.spacedomain)?;
        check_dataset(&definition, &self.dataset, &self.spacedomain)?;
        let dynamic_offsets = dynamic_offsets(&definition, &self.dataset, &self.timedomain)?;

        // validate record requests against the recordable variables
        let mut stream_entries: IndexMap<i64, Vec<StreamEntry>> = IndexMap::new();
        for (name, windows) in &self.records {
            let (kind, units, divisions) =
                definition.recordable(name).ok_or_else(|| {
                    ConfluenceError::Config(format!(
                        "'{name}' is not recordable for the {category} component"
                    ))
                })?;
            let shape = state_shape(&self.spacedomain, &divisions, &constants)?;
            for (&window, methods) in windows {
                let methods = methods
                    .iter()
                    .map(|m| RecordMethod::from_str(m))
                    .collect::<ConfluenceResult<Vec<_>>>()?;
                stream_entries.entry(window).or_default().push(StreamEntry {
                    name: name.clone(),
                    kind,
                    units: units.clone(),
                    shape: shape.clone(),
                    methods,
                });
            }
        }
        let streams: Vec<RecordStream> = stream_entries
            .into_iter()
            .map(|(window, entries)| RecordStream::new(window, entries, self.io_slice))
            .collect();

        Ok(ComponentAdapter {
            component: self.component,
            definition,
            identifier: String::new(),
            saving_directory: self.saving_directory,
            timedomain: self.timedomain,
            spacedomain: self.spacedomain,
            dataset: self.dataset,
            dynamic_offsets,
            parameters,
            constants,
            states,
            shelf: Shelf::default(),
            streams,
            initialised_states: false,
        })
    }
}

/// Uniform facade around a user-supplied component: stages its inputs,
/// validates its results, folds its records, and carries its states.
pub struct ComponentAdapter {
    component: Box<dyn Component>,
    definition: ComponentDefinition,
    identifier: String,
    saving_directory: PathBuf,
    timedomain: TimeDomain,
    spacedomain: Arc<LatLonGrid>,
    dataset: DataSet,
    dynamic_offsets: IndexMap<String, usize>,
    parameters: Parameters,
    constants: Constants,
    states: States,
    shelf: Shelf,
    streams: Vec<RecordStream>,
    initialised_states: bool,
}

impl fmt::Debug for ComponentAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentAdapter")
            .field("category", &self.definition.category)
            .field("component", &self.component)
            .field("timedomain", &self.timedomain)
            .field("shape", &self.spacedomain.shape())
            .finish()
    }
}

impl ComponentAdapter {
    pub fn builder(
        component: Box<dyn Component>,
        saving_directory: impl Into<PathBuf>,
        timedomain: TimeDomain,
        spacedomain: Arc<LatLonGrid>,
    ) -> ComponentAdapterBuilder {
        ComponentAdapterBuilder {
            component,
            saving_directory: saving_directory.into(),
            timedomain,
            spacedomain,
            dataset: DataSet::new(),
            parameters: IndexMap::new(),
            constants: IndexMap::new(),
            records: IndexMap::new(),
            io_slice: 1,
        }
    }

    pub fn category(&self) -> Category {
        self.definition.category
    }

    pub fn definition(&self) -> &ComponentDefinition {
        &self.definition
    }

    pub fn timedomain(&self) -> &TimeDomain {
        &self.timedomain
    }

    pub fn spacedomain(&self) -> &Arc<LatLonGrid> {
        &self.spacedomain
    }

    pub fn saving_directory(&self) -> &Path {
        &self.saving_directory
    }

    pub fn states(&self) -> &States {
        &self.states
    }

    pub fn initialised_states(&self) -> bool {
        self.initialised_states
    }

    pub(crate) fn set_identifier(&mut self, identifier: &str) {
        self.identifier = identifier.to_string();
    }

    /// Swap the temporal dimension, e.g. for a spin-up sub-window. The
    /// driving data must cover the new period.
    pub(crate) fn set_timedomain(&mut self, timedomain: TimeDomain) -> ConfluenceResult<()> {
        self.dynamic_offsets = dynamic_offsets(&self.definition, &self.dataset, &timedomain)?;
        self.timedomain = timedomain;
        Ok(())
    }

    /// Prepare for a run under the given tag: set initial conditions if
    /// none were carried over, and open the record streams.
    pub(crate) fn initialise_run(&mut self, tag: &str) -> ConfluenceResult<()> {
        debug!(
            category = %self.definition.category,
            tag,
            "initialising component"
        );
        let ctx = InitialiseContext {
            grid: &self.spacedomain,
            states: &mut self.states,
            parameters: &self.parameters,
            constants: &self.constants,
            shelf: &mut self.shelf,
            initialised_states: self.initialised_states,
        };
        self.component.initialise(ctx).map_err(|e| component_error(
            Phase::Initialise,
            self.definition.category,
            self.timedomain.start(),
            e,
        ))?;
        self.initialised_states = true;

        if !self.timedomain.is_empty() {
            for stream in &mut self.streams {
                stream.initialise(&self.timedomain)?;
                stream.create_files(
                    &self.saving_directory,
                    &self.identifier,
                    self.definition.category,
                    tag,
                )?;
            }
        }
        Ok(())
    }

    /// Advance the component by its own timestep `step_index`, reading its
    /// inwards from the exchanger and publishing its outwards back.
    pub(crate) fn run_step(
        &mut self,
        step_index: usize,
        exchanger: &mut Exchanger,
    ) -> ConfluenceResult<()> {
        let datetime = self.timedomain.datetime_at(step_index);
        let category = self.definition.category;

        // stage driving data for this step
        let mut staged = IndexMap::new();
        for input in &self.definition.inputs {
            let variable = self
                .dataset
                .get(&input.name)
                .expect("dataset validated at construction");
            let view = match input.kind {
                InputKind::Dynamic => {
                    variable.dynamic_at(self.dynamic_offsets[&input.name] + step_index)
                }
                InputKind::Static => variable.static_values().view(),
                InputKind::Climatologic(frequency) => {
                    let (values, _) = variable.climatology();
                    let bucket = frequency.bucket(datetime, self.timedomain.calendar());
                    values.index_axis(ndarray::Axis(0), bucket)
                }
            };
            staged.insert(input.name.clone(), view);
        }
        let inputs = StagedInputs(staged);

        // read inwards from the exchanger
        let mut inwards = Fields::new();
        for inward in &self.definition.inwards {
            inwards.insert(inward.name.clone(), exchanger.retrieve(&inward.name, category)?);
        }

        let ctx = RunContext {
            datetime,
            step_seconds: self.timedomain.step_seconds(),
            grid: &self.spacedomain,
            inwards: &inwards,
            inputs: &inputs,
            parameters: &self.parameters,
            constants: &self.constants,
            states: &mut self.states,
            shelf: &mut self.shelf,
        };
        let output = self
            .component
            .run(ctx)
            .map_err(|e| component_error(Phase::Run, category, datetime, e))?;

        self.validate_run_output(&output, datetime)?;

        // fold recorded variables before the state window slides
        for stream in &mut self.streams {
            stream.update(&self.states, &output.outwards, &output.outputs)?;
        }

        // publish outwards to the exchanger
        for outward in &self.definition.outwards {
            exchanger.publish(category, &outward.name, &output.outwards[&outward.name])?;
        }

        self.states.increment();
        Ok(())
    }

    /// Close the run: flush nothing (slices complete by construction) and
    /// hand control to the component's own `finalise`.
    pub(crate) fn finalise_run(&mut self) -> ConfluenceResult<()> {
        let ctx = FinaliseContext {
            states: &self.states,
            parameters: &self.parameters,
            constants: &self.constants,
            shelf: &mut self.shelf,
        };
        self.component.finalise(ctx).map_err(|e| {
            component_error(
                Phase::Finalise,
                self.definition.category,
                self.timedomain.end(),
                e,
            )
        })
    }

    /// Checkpoint frame of this component at the given datetime.
    pub(crate) fn frame(&self, datetime: DateTime) -> ComponentFrame {
        ComponentFrame {
            timestamp: datetime.timestamp(self.timedomain.calendar()),
            datetime,
            states: self
                .states
                .0
                .iter()
                .map(|(name, state)| (name.clone(), state.window().to_vec()))
                .collect(),
            shelf: self.shelf.0.clone(),
            streams: self.streams.iter().map(RecordStream::snapshot).collect(),
        }
    }

    /// Restore states, shelf and record streams from a checkpoint frame.
    /// The record files are truncated back to the restored position so a
    /// resumed run reproduces them exactly.
    pub(crate) fn restore(&mut self, frame: &ComponentFrame, tag: &str) -> ConfluenceResult<()> {
        for (name, window) in &frame.states {
            let spec_exists = self.definition.states.iter().any(|s| &s.name == name);
            if !spec_exists {
                return Err(ConfluenceError::Config(format!(
                    "dump carries unknown state '{name}' for the {} component",
                    self.definition.category
                )));
            }
            self.states
                .0
                .insert(name.clone(), State::from_slices(window.clone()));
        }
        for spec in &self.definition.states {
            if !frame.states.contains_key(&spec.name) {
                return Err(ConfluenceError::Config(format!(
                    "initial conditions for {} component state '{}' not in dump",
                    self.definition.category, spec.name
                )));
            }
        }
        self.shelf = Shelf(frame.shelf.clone());
        self.initialised_states = true;

        for (stream, snapshot) in self.streams.iter_mut().zip(&frame.streams) {
            stream.initialise(&self.timedomain)?;
            stream.attach_files(
                &self.saving_directory,
                &self.identifier,
                self.definition.category,
                tag,
            );
            stream.restore(snapshot)?;
        }

        // the initialise hook runs again so the component can rebuild any
        // internal scaffolding, but must leave the restored states alone
        let ctx = InitialiseContext {
            grid: &self.spacedomain,
            states: &mut self.states,
            parameters: &self.parameters,
            constants: &self.constants,
            shelf: &mut self.shelf,
            initialised_states: true,
        };
        self.component.initialise(ctx).map_err(|e| {
            component_error(
                Phase::Initialise,
                self.definition.category,
                frame.datetime,
                e,
            )
        })
    }

    /// Path of this component's dump file for the given run tag.
    pub(crate) fn dump_path(&self, tag: &str) -> PathBuf {
        self.saving_directory.join(format!(
            "{}_{}_{}_dump.bin",
            self.identifier, self.definition.category, tag
        ))
    }

    /// Path of the record file of one recorded variable at one window.
    pub fn record_path(&self, tag: &str, variable: &str, window_seconds: i64) -> PathBuf {
        crate::record::record_file_path(
            &self.saving_directory,
            &self.identifier,
            self.definition.category,
            tag,
            variable,
            window_seconds,
        )
    }

    fn validate_run_output(&self, output: &RunOutput, datetime: DateTime) -> ConfluenceResult<()> {
        let shape = self.spacedomain.shape();
        let expect_field = |name: &str, value: Option<&Array2<f64>>| -> ConfluenceResult<()> {
            let value = value.ok_or_else(|| {
                component_error(
                    Phase::Run,
                    self.definition.category,
                    datetime,
                    ConfluenceError::Config(format!("declared variable '{name}' not returned")),
                )
            })?;
            if value.dim() != shape {
                return Err(ConfluenceError::Shape {
                    name: name.to_string(),
                    expected: vec![shape.0, shape.1],
                    actual: value.shape().to_vec(),
                });
            }
            for j in 0..shape.0 {
                for i in 0..shape.1 {
                    if self.spacedomain.is_valid_cell(j, i) && value[[j, i]].is_nan() {
                        return Err(component_error(
                            Phase::Run,
                            self.definition.category,
                            datetime,
                            ConfluenceError::Config(format!(
                                "'{name}' is NaN on valid cell ({j}, {i})"
                            )),
                        ));
                    }
                }
            }
            Ok(())
        };

        for outward in &self.definition.outwards {
            expect_field(&outward.name, output.outwards.get(&outward.name))?;
        }
        for declared in &self.definition.outputs {
            expect_field(&declared.name, output.outputs.get(&declared.name))?;
        }
        Ok(())
    }
}

fn component_error(
    phase: Phase,
    category: Category,
    datetime: DateTime,
    cause: ConfluenceError,
) -> ConfluenceError {
    match cause {
        // already classified errors keep their taxonomy
        e @ (ConfluenceError::Shape { .. } | ConfluenceError::Units { .. }) => e,
        e => ConfluenceError::Component {
            phase,
            category,
            datetime,
            cause: e.to_string(),
        },
    }
}

fn check_spacedomain(
    definition: &ComponentDefinition,
    grid: &LatLonGrid,
) -> ConfluenceResult<()> {
    if definition.requires_land_sea_mask && grid.land_sea_mask().is_none() {
        return Err(ConfluenceError::Config(format!(
            "'land_sea_mask' must be set in the spacedomain of the {} component",
            definition.category
        )));
    }
    if definition.requires_flow_direction && grid.flow_direction().is_none() {
        return Err(ConfluenceError::Config(format!(
            "'flow_direction' must be set in the spacedomain of the {} component",
            definition.category
        )));
    }
    Ok(())
}

fn resolve_constants(
    definition: &ComponentDefinition,
    supplied: &IndexMap<String, (f64, String)>,
) -> ConfluenceResult<Constants> {
    for name in supplied.keys() {
        if !definition.constants.iter().any(|c| &c.name == name) {
            return Err(ConfluenceError::Config(format!(
                "constant '{name}' not declared by the {} component",
                definition.category
            )));
        }
    }
    let mut constants = IndexMap::new();
    for spec in &definition.constants {
        let value = match supplied.get(&spec.name) {
            Some((value, units)) => {
                if units.trim() != spec.units.trim() {
                    return Err(ConfluenceError::Units {
                        name: spec.name.clone(),
                        expected: spec.units.clone(),
                        actual: units.clone(),
                    });
                }
                *value
            }
            None => spec.default,
        };
        constants.insert(spec.name.clone(), value);
    }
    Ok(Constants(constants))
}

fn resolve_parameters(
    definition: &ComponentDefinition,
    supplied: &IndexMap<String, (ParameterValue, String)>,
    grid: &LatLonGrid,
) -> ConfluenceResult<Parameters> {
    let shape = grid.shape();
    let mut parameters = IndexMap::new();
    for spec in &definition.parameters {
        let (value, units) = supplied.get(&spec.name).ok_or_else(|| {
            ConfluenceError::Config(format!(
                "value missing for parameter '{}' of the {} component",
                spec.name, definition.category
            ))
        })?;
        if units.trim() != spec.units.trim() {
            return Err(ConfluenceError::Units {
                name: spec.name.clone(),
                expected: spec.units.clone(),
                actual: units.clone(),
            });
        }
        let field = match value {
            ParameterValue::Scalar(v) => Array2::from_elem(shape, *v),
            ParameterValue::Field(f) => {
                if f.dim() != shape {
                    return Err(ConfluenceError::Shape {
                        name: spec.name.clone(),
                        expected: vec![shape.0, shape.1],
                        actual: f.shape().to_vec(),
                    });
                }
                f.clone()
            }
        };
        if let Some((lo, hi)) = spec.valid_range {
            if field.iter().any(|&v| v < lo || v > hi) {
                return Err(ConfluenceError::Config(format!(
                    "parameter '{}' outside its valid range [{lo}, {hi}]",
                    spec.name
                )));
            }
        }
        parameters.insert(spec.name.clone(), field);
    }
    Ok(Parameters(parameters))
}

fn state_shape(
    grid: &LatLonGrid,
    divisions: &[Divisions],
    constants: &Constants,
) -> ConfluenceResult<Vec<usize>> {
    let (ny, nx) = grid.shape();
    let mut shape = vec![ny, nx];
    for division in divisions {
        let n = match division {
            Divisions::Fixed(n) => *n,
            Divisions::Constant(name) => {
                let value = constants.0.get(name).ok_or_else(|| {
                    ConfluenceError::Config(format!(
                        "no constant '{name}' to size a state division axis"
                    ))
                })?;
                *value as usize
            }
        };
        if n == 0 {
            return Err(ConfluenceError::Config(
                "state division axes must be greater than zero".to_string(),
            ));
        }
        // an axis of one adds nothing
        if n > 1 {
            shape.push(n);
        }
    }
    Ok(shape)
}

fn instantiate_states(
    definition: &ComponentDefinition,
    constants: &Constants,
    grid: &LatLonGrid,
) -> ConfluenceResult<States> {
    let mut states = IndexMap::new();
    for spec in &definition.states {
        let shape = state_shape(grid, &spec.divisions, constants)?;
        states.insert(
            spec.name.clone(),
            State::zeros(&shape, definition.solver_history),
        );
    }
    Ok(States(states))
}

fn check_dataset(
    definition: &ComponentDefinition,
    dataset: &DataSet,
    grid: &LatLonGrid,
) -> ConfluenceResult<()> {
    for input in &definition.inputs {
        let variable = dataset.get(&input.name).ok_or_else(|| {
            ConfluenceError::Config(format!(
                "no data '{}' available in the dataset of the {} component",
                input.name, definition.category
            ))
        })?;
        if variable.units.trim() != input.units.trim() {
            return Err(ConfluenceError::Units {
                name: input.name.clone(),
                expected: input.units.clone(),
                actual: variable.units.clone(),
            });
        }
        if variable.grid_shape() != grid.shape() {
            return Err(ConfluenceError::Shape {
                name: input.name.clone(),
                expected: vec![grid.shape().0, grid.shape().1],
                actual: vec![variable.grid_shape().0, variable.grid_shape().1],
            });
        }
        let kind_error = || {
            ConfluenceError::Config(format!(
                "variable '{}' in the dataset does not have the declared kind",
                input.name
            ))
        };
        match (input.kind, &variable.data) {
            (InputKind::Dynamic, FieldData::Dynamic { .. }) => {}
            (InputKind::Static, FieldData::Static { .. }) => {}
            (
                InputKind::Climatologic(frequency),
                FieldData::Climatologic {
                    values,
                    frequency: file_frequency,
                },
            ) => {
                if *file_frequency != frequency || values.dim().0 != frequency.length() {
                    return Err(ConfluenceError::Config(format!(
                        "climatologic input '{}' does not carry {frequency} buckets",
                        input.name
                    )));
                }
            }
            _ => return Err(kind_error()),
        }
    }
    Ok(())
}

fn dynamic_offsets(
    definition: &ComponentDefinition,
    dataset: &DataSet,
    timedomain: &TimeDomain,
) -> ConfluenceResult<IndexMap<String, usize>> {
    let mut offsets = IndexMap::new();
    for input in &definition.inputs {
        if input.kind == InputKind::Dynamic {
            let variable = dataset.get(&input.name).ok_or_else(|| {
                ConfluenceError::Config(format!("no data '{}' in dataset", input.name))
            })?;
            offsets.insert(input.name.clone(), variable.dynamic_offset(timedomain)?);
        }
    }
    Ok(offsets)
}
