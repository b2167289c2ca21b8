//! Subscription storage and match resolution for published events.
//!
//! The router owns subscriber registrations keyed by event type. Matching
//! handlers are resolved in registration order; the engine invokes them
//! synchronously, so a `publish` observed by domain code has completed
//! dispatch by the time it returns.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::Context;
use crate::error::NucleusResult;
use crate::plan::PlannerId;

use super::filter::{EventFilter, FilterSpec};

/// A registered handler, shared so dispatch can run while the router
/// itself is not borrowed.
pub(crate) type HandlerCell = Rc<RefCell<dyn FnMut(&Context, &dyn Any) -> NucleusResult<()>>>;

struct Subscription {
    subscriber: PlannerId,
    spec: FilterSpec,
    matcher: Rc<dyn Fn(&dyn Any) -> bool>,
    handler: HandlerCell,
}

/// Subscriber registrations keyed by event type and filter.
#[derive(Default)]
pub struct EventRouter {
    subscriptions: HashMap<TypeId, Vec<Subscription>>,
}

impl EventRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for events of type `E` matching `filter`.
    ///
    /// Handlers registered for the same event type are invoked in
    /// registration order.
    pub fn subscribe<E: 'static>(
        &mut self,
        subscriber: PlannerId,
        filter: EventFilter<E>,
        mut handler: impl FnMut(&Context, &E) -> NucleusResult<()> + 'static,
    ) {
        let spec = filter.spec();
        let match_filter = filter.clone();
        let matcher: Rc<dyn Fn(&dyn Any) -> bool> = Rc::new(move |event| {
            event
                .downcast_ref::<E>()
                .is_some_and(|e| match_filter.matches(e))
        });
        let erased: HandlerCell = Rc::new(RefCell::new(
            move |ctx: &Context, event: &dyn Any| -> NucleusResult<()> {
                let event = event
                    .downcast_ref::<E>()
                    .expect("event type mismatch in dispatch");
                handler(ctx, event)
            },
        ));
        self.subscriptions
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscription {
                subscriber,
                spec,
                matcher,
                handler: erased,
            });
    }

    /// Removes the subscriber's registrations whose filter equals `filter`.
    ///
    /// Matching is by filter value, not handler identity; other
    /// subscribers holding an equal filter are unaffected. Removing a
    /// filter that was never registered is a no-op.
    pub fn unsubscribe<E: 'static>(&mut self, subscriber: PlannerId, filter: &EventFilter<E>) {
        let spec = filter.spec();
        if let Some(subs) = self.subscriptions.get_mut(&TypeId::of::<E>()) {
            subs.retain(|s| !(s.subscriber == subscriber && s.spec == spec));
        }
    }

    /// Removes every registration held by the given subscriber.
    pub fn purge_subscriber(&mut self, subscriber: PlannerId) {
        for subs in self.subscriptions.values_mut() {
            subs.retain(|s| s.subscriber != subscriber);
        }
    }

    /// Whether any subscriber is registered for events of type `E`.
    #[must_use]
    pub fn has_subscribers<E: 'static>(&self) -> bool {
        self.subscriptions
            .get(&TypeId::of::<E>())
            .is_some_and(|subs| !subs.is_empty())
    }

    /// Total registrations, across all event types.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }

    /// Resolves the handlers matching an event, in registration order.
    ///
    /// Handler cells are cloned out so the caller can invoke them after
    /// releasing its borrow of the router — handlers may re-enter the
    /// router to subscribe, unsubscribe, or publish further events.
    pub(crate) fn matches_for(
        &self,
        event_type: TypeId,
        event: &dyn Any,
    ) -> Vec<(PlannerId, HandlerCell)> {
        self.subscriptions
            .get(&event_type)
            .map(|subs| {
                subs.iter()
                    .filter(|s| (s.matcher)(event))
                    .map(|s| (s.subscriber, Rc::clone(&s.handler)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("subscription_count", &self.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::filter::FieldValue;
    use crate::plan::PlannerKind;

    struct Arrival {
        region: i64,
    }

    fn planner(id: u64) -> PlannerId {
        PlannerId::new(PlannerKind::Actor, id)
    }

    fn region_filter(region: i64) -> EventFilter<Arrival> {
        EventFilter::<Arrival>::builder()
            .field("region", |e: &Arrival| FieldValue::Int(e.region), region)
            .build()
    }

    #[test]
    fn test_matches_resolve_in_registration_order() {
        let mut router = EventRouter::new();
        router.subscribe(planner(2), EventFilter::<Arrival>::any(), |_, _| Ok(()));
        router.subscribe(planner(0), EventFilter::<Arrival>::any(), |_, _| Ok(()));
        router.subscribe(planner(1), EventFilter::<Arrival>::any(), |_, _| Ok(()));

        let event = Arrival { region: 5 };
        let matched = router.matches_for(TypeId::of::<Arrival>(), &event);
        let order: Vec<u64> = matched.iter().map(|(p, _)| p.id).collect();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[test]
    fn test_filter_narrows_matches() {
        let mut router = EventRouter::new();
        router.subscribe(planner(0), region_filter(3), |_, _| Ok(()));
        router.subscribe(planner(1), region_filter(4), |_, _| Ok(()));

        let event = Arrival { region: 3 };
        let matched = router.matches_for(TypeId::of::<Arrival>(), &event);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0, planner(0));
    }

    #[test]
    fn test_unsubscribe_matches_by_filter_equality() {
        let mut router = EventRouter::new();
        router.subscribe(planner(0), region_filter(3), |_, _| Ok(()));
        router.subscribe(planner(1), region_filter(3), |_, _| Ok(()));

        // An equal-but-distinct filter value removes only planner 0's
        // registration.
        router.unsubscribe(planner(0), &region_filter(3));

        let event = Arrival { region: 3 };
        let matched = router.matches_for(TypeId::of::<Arrival>(), &event);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0, planner(1));
    }

    #[test]
    fn test_unsubscribe_unknown_filter_is_noop() {
        let mut router = EventRouter::new();
        router.subscribe(planner(0), region_filter(3), |_, _| Ok(()));
        router.unsubscribe(planner(0), &region_filter(9));
        assert_eq!(router.subscription_count(), 1);
    }

    #[test]
    fn test_purge_subscriber_removes_all_registrations() {
        let mut router = EventRouter::new();
        router.subscribe(planner(0), region_filter(3), |_, _| Ok(()));
        router.subscribe(planner(0), EventFilter::<Arrival>::any(), |_, _| Ok(()));
        router.subscribe(planner(1), region_filter(3), |_, _| Ok(()));

        router.purge_subscriber(planner(0));
        assert_eq!(router.subscription_count(), 1);
    }

    #[test]
    fn test_has_subscribers() {
        let mut router = EventRouter::new();
        assert!(!router.has_subscribers::<Arrival>());
        router.subscribe(planner(0), EventFilter::<Arrival>::any(), |_, _| Ok(()));
        assert!(router.has_subscribers::<Arrival>());
        router.unsubscribe(planner(0), &EventFilter::<Arrival>::any());
        assert!(!router.has_subscribers::<Arrival>());
    }
}
