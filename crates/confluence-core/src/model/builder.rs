//! Model builder: compatibility checks and transfer wiring.

use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use ndarray::Array2;
use petgraph::graph::{Graph, NodeIndex};
use tracing::info;

use crate::clock::Clock;
use crate::component::{Category, ComponentAdapter};
use crate::config::ModelConfig;
use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::exchanger::Exchanger;

use super::driver::Model;

/// Assembles a [`Model`] from component adapters.
///
/// The builder checks that every pair of components covers the same region
/// with whole-cell-matched grids and the same period with whole-multiple
/// timesteps, then wires every declared transfer. Any violation aborts
/// construction.
pub struct ModelBuilder {
    identifier: String,
    saving_directory: PathBuf,
    adapters: Vec<ComponentAdapter>,
    initial_transfers: Option<IndexMap<String, Array2<f64>>>,
    config: Option<ModelConfig>,
}

impl ModelBuilder {
    pub fn new(identifier: &str, saving_directory: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.to_string(),
            saving_directory: saving_directory.into(),
            adapters: vec![],
            initial_transfers: None,
            config: None,
        }
    }

    /// Register a component with the model.
    pub fn with_component(mut self, adapter: ComponentAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Seed the exchanger buffers from explicit initial transfer values
    /// instead of zeros.
    pub fn with_initial_transfers(
        mut self,
        initial_transfers: IndexMap<String, Array2<f64>>,
    ) -> Self {
        self.initial_transfers = Some(initial_transfers);
        self
    }

    /// Seed the exchanger buffers from a file of time-invariant fields,
    /// one per transfer name, each on its producer grid.
    pub fn with_initial_transfers_file(
        self,
        path: &std::path::Path,
    ) -> ConfluenceResult<Self> {
        let file = crate::data::FieldFile::read(path)?;
        let mut initial = IndexMap::new();
        for variable in &file.variables {
            match &variable.data {
                crate::data::FieldData::Static { values } => {
                    initial.insert(variable.name.clone(), values.clone());
                }
                _ => {
                    return Err(ConfluenceError::Config(format!(
                        "initial transfer '{}' must be a time-invariant field",
                        variable.name
                    )))
                }
            }
        }
        Ok(self.with_initial_transfers(initial))
    }

    /// Attach the configuration document the model was built from, for the
    /// configuration round-trip.
    pub(crate) fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> ConfluenceResult<Model> {
        // order the components by firing order, one per category
        for category in Category::ORDER {
            let count = self
                .adapters
                .iter()
                .filter(|a| a.category() == category)
                .count();
            if count > 1 {
                return Err(ConfluenceError::Config(format!(
                    "more than one {category} component registered"
                )));
            }
        }
        let mut adapters: IndexMap<Category, ComponentAdapter> = IndexMap::new();
        let mut pool = self.adapters;
        for category in Category::ORDER {
            if let Some(position) = pool.iter().position(|a| a.category() == category) {
                let mut adapter = pool.remove(position);
                adapter.set_identifier(&self.identifier);
                adapters.insert(category, adapter);
            }
        }
        if let Some(stray) = pool.first() {
            return Err(ConfluenceError::Config(format!(
                "cannot register a component of category {}",
                stray.category()
            )));
        }
        if adapters.is_empty() {
            return Err(ConfluenceError::Config(
                "a model needs at least one component".to_string(),
            ));
        }

        // spatial compatibility: same region, whole-cell-matched resolutions
        let categories: Vec<Category> = adapters.keys().copied().collect();
        for (n, &c1) in categories.iter().enumerate() {
            for &c2 in &categories[n + 1..] {
                let g1 = adapters[&c1].spacedomain();
                let g2 = adapters[&c2].spacedomain();
                if !g1.spans_same_region_as(g2) {
                    return Err(ConfluenceError::Config(format!(
                        "spacedomains of components {c1} and {c2} do not span the same region"
                    )));
                }
                if !g1.is_matched_in(g2) && !g2.is_matched_in(g1) {
                    return Err(ConfluenceError::Config(format!(
                        "spacedomains of components {c1} and {c2} cannot be matched \
                         onto one another"
                    )));
                }
            }
        }

        // temporal compatibility and the base-period clock
        let timedomains = adapters
            .iter()
            .map(|(category, adapter)| (*category, adapter.timedomain().clone()))
            .collect();
        let clock = Clock::build(&timedomains)?;

        // wire the transfers; this is where WiringError surfaces
        let mut exchanger = Exchanger::build(&adapters)?;
        if let Some(initial) = &self.initial_transfers {
            exchanger.set_initial_transfers(initial)?;
        }

        // coupling graph, for inspection and DOT rendering
        let mut graph: Graph<Category, String> = Graph::new();
        let mut nodes: IndexMap<Category, NodeIndex> = IndexMap::new();
        for category in adapters.keys() {
            nodes.insert(*category, graph.add_node(*category));
        }
        for (category, adapter) in &adapters {
            for outward in &adapter.definition().outwards {
                for target in &outward.to {
                    if let Some(&to) = nodes.get(target) {
                        graph.add_edge(nodes[category], to, outward.name.clone());
                    }
                }
            }
        }

        fs::create_dir_all(&self.saving_directory)
            .map_err(|e| ConfluenceError::io(&self.saving_directory, e))?;
        for adapter in adapters.values() {
            fs::create_dir_all(adapter.saving_directory())
                .map_err(|e| ConfluenceError::io(adapter.saving_directory(), e))?;
        }

        info!(
            identifier = %self.identifier,
            components = adapters.len(),
            transfers = exchanger.transfer_names().count(),
            "model built"
        );

        Ok(Model::assemble(
            self.identifier,
            self.saving_directory,
            adapters,
            exchanger,
            clock,
            graph,
            self.config,
        ))
    }
}
