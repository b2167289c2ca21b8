//! Scenario expansion and status tracking.
//!
//! A scenario is one fully-resolved combination of dimension levels. Ids
//! are ordinal positions in the cross-product, enumerated
//! lexicographically over dimension order (the last dimension varies
//! fastest) — stable for a given set and order of dimensions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::NucleusResult;
use crate::plugin::{Plugin, PluginDataSet};

use super::dimension::{Dimension, LevelContext};

/// Lifecycle status of a scenario.
///
/// Monotonic: `Ready → Running → {Succeeded, Failed}`, never regressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Expanded but not yet started.
    Ready,
    /// A worker is executing it.
    Running,
    /// Reached a normal close.
    Succeeded,
    /// Aborted by an error; the cause is recorded.
    Failed,
}

impl ScenarioStatus {
    /// Whether this is a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One expanded scenario: its id, level assignment, and metadata.
#[derive(Debug)]
pub(crate) struct Scenario {
    pub(crate) id: usize,
    pub(crate) level_indices: Vec<usize>,
    pub(crate) metadata: Vec<String>,
}

/// Expands the dimension cross-product into scenarios, applying each
/// scenario's level closures to a fresh clone of the plugin data.
///
/// Zero dimensions yield exactly one scenario; a dimension with zero
/// levels collapses the product to zero scenarios.
pub(crate) fn expand_scenarios(
    dimensions: &[Dimension],
    plugins: &[Arc<Plugin>],
) -> NucleusResult<Vec<(Scenario, PluginDataSet)>> {
    let count = dimensions
        .iter()
        .map(Dimension::level_count)
        .product::<usize>();

    let mut scenarios = Vec::with_capacity(count);
    for id in 0..count {
        let level_indices = level_indices_for(dimensions, id);
        let mut data = PluginDataSet::from_plugins(plugins);
        let mut metadata = Vec::new();
        for (dimension, &level) in dimensions.iter().zip(&level_indices) {
            let mut ctx = LevelContext::new(&mut data);
            metadata.extend(dimension.apply_level(level, &mut ctx)?);
        }
        scenarios.push((
            Scenario {
                id,
                level_indices,
                metadata,
            },
            data,
        ));
    }
    Ok(scenarios)
}

/// The level index per dimension for a scenario id: the last dimension
/// varies fastest.
fn level_indices_for(dimensions: &[Dimension], id: usize) -> Vec<usize> {
    let mut indices = vec![0; dimensions.len()];
    let mut divisor = 1;
    for (slot, dimension) in dimensions.iter().enumerate().rev() {
        let levels = dimension.level_count();
        indices[slot] = (id / divisor) % levels;
        divisor *= levels;
    }
    indices
}
