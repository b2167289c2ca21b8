//! The context handle surfaced to actor and data-manager code.
//!
//! A context is a cheap handle — an engine reference plus the owning
//! planner's identity — valid for the duration of one callback. Domain
//! code receives a fresh context per callback and must not stash it
//! beyond the callback's scope.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use chrono::NaiveDate;

use crate::error::NucleusResult;
use crate::event::EventFilter;
use crate::plan::{Plan, PlanKey, PlannerId, PlannerKind};
use crate::registry::{ActorId, DataManager, DataManagerId, ManagerClass};
use crate::snapshot::{PlanRecord, QueueSnapshot};

use super::Kernel;

/// Handle binding one planner to its running scenario.
///
/// All planning, subscription, lookup, and output operations of actor and
/// data-manager code go through this type.
#[derive(Clone)]
pub struct Context {
    kernel: Rc<RefCell<Kernel>>,
    owner: PlannerId,
}

impl Context {
    pub(crate) fn new(kernel: Rc<RefCell<Kernel>>, owner: PlannerId) -> Self {
        Self { kernel, owner }
    }

    /// The planner this context is bound to.
    #[must_use]
    pub const fn owner(&self) -> PlannerId {
        self.owner
    }

    /// The current simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.kernel.borrow().queue.current_time()
    }

    /// The current calendar date, if the scenario's clock is anchored.
    #[must_use]
    pub fn date(&self) -> Option<NaiveDate> {
        self.kernel.borrow().queue.clock().date()
    }

    /// The running scenario's id.
    #[must_use]
    pub fn scenario_id(&self) -> usize {
        self.kernel.borrow().scenario_id
    }

    /// The running scenario's dimension-level metadata.
    #[must_use]
    pub fn scenario_metadata(&self) -> std::sync::Arc<Vec<String>> {
        std::sync::Arc::clone(&self.kernel.borrow().scenario_metadata)
    }

    // ── Planning ─────────────────────────────────────────────────────

    /// Schedules an active plan.
    ///
    /// # Errors
    ///
    /// `PlanningError` kinds per [`crate::PlanningQueue::add`].
    pub fn add_plan(
        &self,
        time: f64,
        action: impl FnOnce(&Context) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.schedule(Plan::new(time, action))
    }

    /// Schedules an active plan under a key unique to this planner.
    ///
    /// # Errors
    ///
    /// `PlanningError` kinds per [`crate::PlanningQueue::add`].
    pub fn add_keyed_plan(
        &self,
        time: f64,
        key: impl Into<PlanKey>,
        action: impl FnOnce(&Context) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.schedule(Plan::new(time, action).keyed(key))
    }

    /// Schedules a passive plan: it never keeps the scenario alive.
    ///
    /// # Errors
    ///
    /// `PlanningError` kinds per [`crate::PlanningQueue::add`].
    pub fn add_passive_plan(
        &self,
        time: f64,
        action: impl FnOnce(&Context) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.schedule(Plan::new(time, action).passive())
    }

    /// Schedules a passive plan under a key unique to this planner.
    ///
    /// # Errors
    ///
    /// `PlanningError` kinds per [`crate::PlanningQueue::add`].
    pub fn add_passive_keyed_plan(
        &self,
        time: f64,
        key: impl Into<PlanKey>,
        action: impl FnOnce(&Context) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<()> {
        self.schedule(Plan::new(time, action).passive().keyed(key))
    }

    /// Schedules an explicitly constructed plan, rebinding its owner to
    /// this context's planner.
    ///
    /// # Errors
    ///
    /// `PlanningError` kinds per [`crate::PlanningQueue::add`].
    pub fn schedule(&self, plan: Plan) -> NucleusResult<()> {
        let plan = plan.owned_by(self.owner);
        self.kernel.borrow_mut().queue.add(plan)?;
        Ok(())
    }

    /// A record view of this planner's queued plan under `key`.
    ///
    /// # Errors
    ///
    /// `PlanningError::EmptyPlanKey` for a blank key.
    pub fn get_plan(&self, key: &PlanKey) -> NucleusResult<Option<PlanRecord>> {
        Ok(self.kernel.borrow().queue.record(self.owner, key)?)
    }

    /// The scheduled time of this planner's queued plan under `key`.
    ///
    /// # Errors
    ///
    /// `PlanningError::EmptyPlanKey` for a blank key.
    pub fn get_plan_time(&self, key: &PlanKey) -> NucleusResult<Option<f64>> {
        Ok(self.kernel.borrow().queue.peek_time(self.owner, key)?)
    }

    /// This planner's queued plan keys, in extraction order.
    #[must_use]
    pub fn get_plan_keys(&self) -> Vec<PlanKey> {
        self.kernel.borrow().queue.keys(self.owner)
    }

    /// Removes and returns this planner's queued plan under `key`.
    ///
    /// The removed plan's action never runs unless rescheduled.
    ///
    /// # Errors
    ///
    /// `PlanningError::EmptyPlanKey` for a blank key.
    pub fn remove_plan(&self, key: &PlanKey) -> NucleusResult<Option<Plan>> {
        Ok(self.kernel.borrow_mut().queue.remove(self.owner, key)?)
    }

    /// Captures the scenario's complete planning-queue state.
    ///
    /// From a simulation-close handler after a halt, this records every
    /// plan the halt discarded — enough to reconstruct a queue at the
    /// halt point via [`crate::PlanningQueue::from_snapshot`].
    #[must_use]
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.kernel.borrow().queue.snapshot()
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Subscribes this planner to events of type `E` matching `filter`.
    pub fn subscribe<E: 'static>(
        &self,
        filter: EventFilter<E>,
        handler: impl FnMut(&Context, &E) -> NucleusResult<()> + 'static,
    ) {
        self.kernel
            .borrow_mut()
            .router
            .subscribe(self.owner, filter, handler);
    }

    /// Removes this planner's subscriptions whose filter equals `filter`.
    pub fn unsubscribe<E: 'static>(&self, filter: &EventFilter<E>) {
        self.kernel
            .borrow_mut()
            .router
            .unsubscribe(self.owner, filter);
    }

    /// Whether any subscriber is registered for events of type `E`.
    #[must_use]
    pub fn has_subscribers<E: 'static>(&self) -> bool {
        self.kernel.borrow().router.has_subscribers::<E>()
    }

    /// Publishes an event, dispatching synchronously to every matching
    /// handler in registration order before returning.
    ///
    /// # Errors
    ///
    /// The first handler error aborts dispatch and propagates.
    pub fn publish<E: 'static>(&self, event: &E) -> NucleusResult<()> {
        let any: &dyn Any = event;
        let matched = self
            .kernel
            .borrow()
            .router
            .matches_for(std::any::TypeId::of::<E>(), any);
        for (subscriber, handler) in matched {
            let ctx = Context::new(Rc::clone(&self.kernel), subscriber);
            (handler.borrow_mut())(&ctx, any)?;
        }
        Ok(())
    }

    /// Registers a handler to run once after the scenario's plan loop
    /// stops, before `execute` returns. Handlers run in registration
    /// order.
    pub fn subscribe_to_simulation_close(
        &self,
        handler: impl FnOnce(&Context) -> NucleusResult<()> + 'static,
    ) {
        self.kernel
            .borrow_mut()
            .close_handlers
            .push((self.owner, Box::new(handler)));
    }

    // ── Output ───────────────────────────────────────────────────────

    /// Delivers a value to the configured output sink, synchronously.
    ///
    /// Dropped silently when no sink is configured.
    pub fn release_output(&self, value: impl Any + Send) {
        let sink = self.kernel.borrow().output.clone();
        if let Some(sink) = sink {
            (sink.borrow_mut())(Box::new(value));
        }
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Looks up the unique data manager of concrete type `M`.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownDataManagerClass` /
    /// `RegistryError::AmbiguousDataManagerClass` per
    /// [`crate::DataManagerRegistry::get`].
    pub fn get_data_manager<M: DataManager>(&self) -> NucleusResult<Rc<RefCell<M>>> {
        Ok(self.kernel.borrow().managers.get::<M>()?)
    }

    /// Looks up the unique data manager assignable to a class token.
    ///
    /// # Errors
    ///
    /// `RegistryError` kinds per [`crate::DataManagerRegistry::get_by_class`].
    pub fn get_data_manager_by_class(
        &self,
        class: ManagerClass,
    ) -> NucleusResult<Rc<RefCell<dyn DataManager>>> {
        Ok(self.kernel.borrow().managers.get_by_class(class)?)
    }

    /// Registers an actor; its `init` closure runs immediately with a
    /// context bound to the new actor.
    ///
    /// # Errors
    ///
    /// Propagates whatever `init` returns.
    pub fn add_actor(
        &self,
        init: impl FnOnce(&Context) -> NucleusResult<()> + 'static,
    ) -> NucleusResult<ActorId> {
        let id = self.kernel.borrow_mut().actors.add();
        let ctx = Context::new(
            Rc::clone(&self.kernel),
            PlannerId::new(PlannerKind::Actor, id.raw()),
        );
        init(&ctx)?;
        Ok(id)
    }

    /// Removes an actor, retiring its id and purging its event
    /// subscriptions. Its queued plans are not cancelled.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownActorId` for a dead or never-allocated id.
    pub fn remove_actor(&self, id: ActorId) -> NucleusResult<()> {
        let mut kernel = self.kernel.borrow_mut();
        kernel.actors.remove(id)?;
        kernel
            .router
            .purge_subscriber(PlannerId::new(PlannerKind::Actor, id.raw()));
        Ok(())
    }

    /// Whether the id refers to a live actor.
    #[must_use]
    pub fn actor_exists(&self, id: ActorId) -> bool {
        self.kernel.borrow().actors.exists(id)
    }

    /// Stops the scenario cooperatively: the current plan action
    /// completes, then all remaining queued plans are discarded.
    pub fn halt(&self) {
        self.kernel.borrow_mut().halted = true;
    }

    pub(crate) fn register_data_manager<M: DataManager>(
        &self,
        manager: M,
    ) -> NucleusResult<DataManagerId> {
        let (id, dynamic) = {
            let mut kernel = self.kernel.borrow_mut();
            let id = kernel.managers.register(manager);
            let dynamic = kernel
                .managers
                .by_id(id)
                .expect("freshly registered manager missing");
            (id, dynamic)
        };
        let ctx = Context::new(
            Rc::clone(&self.kernel),
            PlannerId::new(PlannerKind::DataManager, id.raw()),
        );
        dynamic.borrow_mut().init(&ctx)?;
        Ok(id)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
