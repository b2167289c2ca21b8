//! Dimensions: named axes of parameter variation.
//!
//! A dimension declares metadata column names and an ordered list of
//! levels. Each level is a closure that adjusts the scenario's cloned
//! plugin data and returns one metadata value per declared column. The
//! experiment's scenario space is the cross-product of all dimensions'
//! levels.

use std::sync::Arc;

use crate::error::{ExperimentError, NucleusResult};
use crate::plugin::PluginDataSet;

/// A level closure: mutates the scenario's plugin data, returns the
/// level's metadata values.
pub type LevelAction = dyn Fn(&mut LevelContext<'_>) -> NucleusResult<Vec<String>> + Send + Sync;

/// The context a level closure runs against: the scenario's cloned
/// plugin data, mutable.
pub struct LevelContext<'a> {
    data: &'a mut PluginDataSet,
}

impl<'a> LevelContext<'a> {
    pub(crate) fn new(data: &'a mut PluginDataSet) -> Self {
        Self { data }
    }

    /// Retrieves the unique plugin data payload of type `T`.
    ///
    /// # Errors
    ///
    /// `PluginError::UnknownPluginData` / `PluginError::AmbiguousPluginData`.
    pub fn plugin_data<T: std::any::Any>(&self) -> NucleusResult<&T> {
        Ok(self.data.get::<T>()?)
    }

    /// Retrieves the unique plugin data payload of type `T`, mutably.
    ///
    /// # Errors
    ///
    /// `PluginError::UnknownPluginData` / `PluginError::AmbiguousPluginData`.
    pub fn plugin_data_mut<T: std::any::Any>(&mut self) -> NucleusResult<&mut T> {
        Ok(self.data.get_mut::<T>()?)
    }
}

/// A named axis with an ordered list of levels.
///
/// # Examples
///
/// ```
/// use nucleus::Dimension;
///
/// #[derive(Clone)]
/// struct GrowthRate(f64);
///
/// let dimension = Dimension::builder("growth")
///     .metadata("rate")
///     .level(|ctx| {
///         ctx.plugin_data_mut::<GrowthRate>()?.0 = 0.01;
///         Ok(vec!["0.01".to_string()])
///     })
///     .level(|ctx| {
///         ctx.plugin_data_mut::<GrowthRate>()?.0 = 0.05;
///         Ok(vec!["0.05".to_string()])
///     })
///     .build();
///
/// assert_eq!(dimension.level_count(), 2);
/// ```
pub struct Dimension {
    name: String,
    metadata_names: Vec<String>,
    levels: Vec<Arc<LevelAction>>,
}

impl Dimension {
    /// Starts building a dimension with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DimensionBuilder {
        DimensionBuilder {
            name: name.into(),
            metadata_names: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// The dimension's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared metadata column names.
    #[must_use]
    pub fn metadata_names(&self) -> &[String] {
        &self.metadata_names
    }

    /// Number of levels.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Applies the level at `index` to a scenario's plugin data and
    /// returns its metadata values.
    ///
    /// # Errors
    ///
    /// `ExperimentError::DimensionMetadataMismatch` when the level returns
    /// a different number of values than the dimension declared, plus
    /// whatever the level closure itself returns.
    pub(crate) fn apply_level(
        &self,
        index: usize,
        ctx: &mut LevelContext<'_>,
    ) -> NucleusResult<Vec<String>> {
        let values = (self.levels[index])(ctx)?;
        if values.len() != self.metadata_names.len() {
            return Err(ExperimentError::DimensionMetadataMismatch {
                dimension: self.name.clone(),
                expected: self.metadata_names.len(),
                actual: values.len(),
            }
            .into());
        }
        Ok(values)
    }
}

impl std::fmt::Debug for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dimension")
            .field("name", &self.name)
            .field("metadata_names", &self.metadata_names)
            .field("levels", &self.levels.len())
            .finish()
    }
}

/// Builder for [`Dimension`].
pub struct DimensionBuilder {
    name: String,
    metadata_names: Vec<String>,
    levels: Vec<Arc<LevelAction>>,
}

impl DimensionBuilder {
    /// Declares a metadata column; every level must return one value per
    /// declared column.
    #[must_use]
    pub fn metadata(mut self, name: impl Into<String>) -> Self {
        self.metadata_names.push(name.into());
        self
    }

    /// Appends a level.
    #[must_use]
    pub fn level(
        mut self,
        action: impl Fn(&mut LevelContext<'_>) -> NucleusResult<Vec<String>> + Send + Sync + 'static,
    ) -> Self {
        self.levels.push(Arc::new(action));
        self
    }

    /// Finalizes the dimension.
    #[must_use]
    pub fn build(self) -> Dimension {
        Dimension {
            name: self.name,
            metadata_names: self.metadata_names,
            levels: self.levels,
        }
    }
}
