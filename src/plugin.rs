//! Plugins: the unit of composition for simulations.
//!
//! A plugin bundles data payloads, a dependency set, and an initializer
//! closure. Dependencies must form a DAG; duplicate ids, unknown
//! dependencies, and cycles are fatal before any scenario runs.
//! Initializers run in a topological order, so every dependency's
//! initializer completes before its dependents'.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::engine::Context;
use crate::error::{NucleusResult, PluginError};
use crate::registry::{ActorId, DataManager, DataManagerId};

/// Identifier of a plugin within an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(String);

impl PluginId {
    /// Creates a plugin id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A configuration payload carried by a plugin.
///
/// Payloads are cloned once per scenario, so dimension levels can vary
/// them without touching the prototypes. Any `Clone + Send + Sync`
/// value qualifies through the blanket implementation.
pub trait PluginData: Any + Send + Sync {
    /// Clones the payload behind its trait object.
    fn clone_box(&self) -> Box<dyn PluginData>;

    /// Upcasts for typed retrieval.
    fn as_any(&self) -> &dyn Any;

    /// Upcasts for typed mutation.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Clone + Send + Sync> PluginData for T {
    fn clone_box(&self) -> Box<dyn PluginData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Initializer closure type.
pub type PluginInitializer = dyn Fn(&mut PluginContext<'_>) -> NucleusResult<()> + Send + Sync;

/// A plugin definition: id, dependencies, data payloads, initializer.
pub struct Plugin {
    id: PluginId,
    dependencies: BTreeSet<PluginId>,
    data: Vec<Box<dyn PluginData>>,
    initializer: Option<Arc<PluginInitializer>>,
}

impl Plugin {
    /// Starts building a plugin with the given id.
    #[must_use]
    pub fn builder(id: impl Into<PluginId>) -> PluginBuilder {
        PluginBuilder {
            id: id.into(),
            dependencies: BTreeSet::new(),
            data: Vec::new(),
            initializer: None,
        }
    }

    /// The plugin's id.
    #[must_use]
    pub const fn id(&self) -> &PluginId {
        &self.id
    }

    /// The plugin's declared dependencies.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<PluginId> {
        &self.dependencies
    }

    /// Clones this plugin's data payloads for one scenario.
    #[must_use]
    pub fn clone_data(&self) -> Vec<Box<dyn PluginData>> {
        self.data.iter().map(|d| (**d).clone_box()).collect()
    }

    pub(crate) fn run_initializer(&self, ctx: &mut PluginContext<'_>) -> NucleusResult<()> {
        match &self.initializer {
            Some(init) => init(ctx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("data_payloads", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Plugin`].
pub struct PluginBuilder {
    id: PluginId,
    dependencies: BTreeSet<PluginId>,
    data: Vec<Box<dyn PluginData>>,
    initializer: Option<Arc<PluginInitializer>>,
}

impl PluginBuilder {
    /// Declares a dependency on another plugin.
    #[must_use]
    pub fn dependency(mut self, id: impl Into<PluginId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// Attaches a data payload.
    #[must_use]
    pub fn data(mut self, payload: impl PluginData) -> Self {
        self.data.push(Box::new(payload));
        self
    }

    /// Sets the initializer closure.
    #[must_use]
    pub fn initializer(
        mut self,
        init: impl Fn(&mut PluginContext<'_>) -> NucleusResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.initializer = Some(Arc::new(init));
        self
    }

    /// Finalizes the plugin.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::EmptyPluginId` for a blank id.
    pub fn build(self) -> Result<Plugin, PluginError> {
        if self.id.as_str().trim().is_empty() {
            return Err(PluginError::EmptyPluginId);
        }
        Ok(Plugin {
            id: self.id,
            dependencies: self.dependencies,
            data: self.data,
            initializer: self.initializer,
        })
    }
}

/// The per-scenario collection of cloned plugin data payloads.
///
/// Payloads from every plugin share one namespace; retrieval is by
/// concrete type and must be unique.
#[derive(Default)]
pub struct PluginDataSet {
    payloads: Vec<Box<dyn PluginData>>,
}

impl PluginDataSet {
    /// Clones the payloads of the given plugins, in declaration order.
    #[must_use]
    pub fn from_plugins(plugins: &[Arc<Plugin>]) -> Self {
        Self {
            payloads: plugins.iter().flat_map(|p| p.clone_data()).collect(),
        }
    }

    /// Retrieves the unique payload of type `T`.
    ///
    /// # Errors
    ///
    /// - `PluginError::UnknownPluginData` if no payload has type `T`.
    /// - `PluginError::AmbiguousPluginData` if several do.
    pub fn get<T: Any>(&self) -> Result<&T, PluginError> {
        let mut found = self
            .payloads
            .iter()
            .filter_map(|p| (**p).as_any().downcast_ref::<T>());
        let Some(payload) = found.next() else {
            return Err(PluginError::UnknownPluginData {
                type_name: std::any::type_name::<T>().to_string(),
            });
        };
        if found.next().is_some() {
            return Err(PluginError::AmbiguousPluginData {
                type_name: std::any::type_name::<T>().to_string(),
            });
        }
        Ok(payload)
    }

    /// Retrieves the unique payload of type `T` mutably.
    ///
    /// # Errors
    ///
    /// Same conditions as [`PluginDataSet::get`].
    pub fn get_mut<T: Any>(&mut self) -> Result<&mut T, PluginError> {
        let count = self
            .payloads
            .iter()
            .filter(|p| (**p).as_any().is::<T>())
            .count();
        if count == 0 {
            return Err(PluginError::UnknownPluginData {
                type_name: std::any::type_name::<T>().to_string(),
            });
        }
        if count > 1 {
            return Err(PluginError::AmbiguousPluginData {
                type_name: std::any::type_name::<T>().to_string(),
            });
        }
        Ok(self
            .payloads
            .iter_mut()
            .find_map(|p| p.as_any_mut().downcast_mut::<T>())
            .expect("payload disappeared between count and fetch"))
    }

    /// Number of payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// The context handed to plugin initializers.
///
/// Exposes sibling plugin data, actor registration, data-manager
/// registration, and the underlying simulation context.
pub struct PluginContext<'a> {
    ctx: &'a Context,
    data: &'a PluginDataSet,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(ctx: &'a Context, data: &'a PluginDataSet) -> Self {
        Self { ctx, data }
    }

    /// Retrieves the unique plugin data payload of type `T`, from any
    /// plugin in the simulation.
    ///
    /// # Errors
    ///
    /// `PluginError::UnknownPluginData` / `PluginError::AmbiguousPluginData`
    /// per [`PluginDataSet::get`].
    pub fn plugin_data<T: Any>(&self) -> NucleusResult<&T> {
        Ok(self.data.get::<T>()?)
    }

    /// Registers an actor; its `init` closure runs immediately with a
    /// context bound to the new actor.
    ///
    /// # Errors
    ///
    /// Propagates whatever the actor's `init` returns.
    pub fn add_actor(
        &self,
        init: impl FnOnce(&Context) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<ActorId> {
        self.ctx.add_actor(init)
    }

    /// Registers a data manager and runs its `init` exactly once.
    ///
    /// # Errors
    ///
    /// Propagates whatever the manager's `init` returns.
    pub fn add_data_manager<M: DataManager>(&self, manager: M) -> NucleusResult<DataManagerId> {
        self.ctx.register_data_manager(manager)
    }

    /// The simulation context this plugin is initializing under.
    #[must_use]
    pub const fn context(&self) -> &Context {
        self.ctx
    }
}

/// Computes a topological initialization order over the plugins.
///
/// The order is deterministic: among plugins whose dependencies are all
/// satisfied, declaration order wins.
///
/// # Errors
///
/// - `PluginError::DuplicatePluginId` for a repeated id.
/// - `PluginError::MissingPluginDependency` for an unknown dependency.
/// - `PluginError::CyclicPluginDependencies` when no valid order exists.
pub fn initialization_order(plugins: &[Arc<Plugin>]) -> Result<Vec<usize>, PluginError> {
    let mut seen = BTreeSet::new();
    for plugin in plugins {
        if !seen.insert(plugin.id().clone()) {
            return Err(PluginError::DuplicatePluginId {
                id: plugin.id().to_string(),
            });
        }
    }
    for plugin in plugins {
        for dependency in plugin.dependencies() {
            if !seen.contains(dependency) {
                return Err(PluginError::MissingPluginDependency {
                    plugin: plugin.id().to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }
    }

    let mut order = Vec::with_capacity(plugins.len());
    let mut initialized: BTreeSet<&PluginId> = BTreeSet::new();
    let mut remaining: Vec<usize> = (0..plugins.len()).collect();
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|&idx| {
            plugins[idx]
                .dependencies()
                .iter()
                .all(|d| initialized.contains(d))
        });
        let Some(pos) = ready else {
            let involved = remaining
                .iter()
                .map(|&idx| plugins[idx].id().to_string())
                .collect();
            return Err(PluginError::CyclicPluginDependencies { involved });
        };
        let idx = remaining.remove(pos);
        initialized.insert(plugins[idx].id());
        order.push(idx);
    }
    Ok(order)
}
