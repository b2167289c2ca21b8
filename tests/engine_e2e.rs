use std::sync::{Arc, Mutex};

use nucleus::{
    Context, DataManager, EventFilter, FieldValue, ManagerClass, NucleusError, NucleusResult,
    PlanKey, Plugin, SimulationConfig, SimulationEngine,
};

/// Infection counts per region, driven by plans and events.
struct InfectionLedger {
    initialized: bool,
    by_region: std::collections::HashMap<i64, u64>,
}

impl InfectionLedger {
    fn new() -> Self {
        Self {
            initialized: false,
            by_region: std::collections::HashMap::new(),
        }
    }
}

impl DataManager for InfectionLedger {
    fn init(&mut self, _ctx: &Context) -> NucleusResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn classes(&self) -> Vec<ManagerClass> {
        vec![ManagerClass::new("infection_ledger")]
    }
}

#[derive(Clone)]
struct Infection {
    region: i64,
    severe: bool,
}

fn region_filter(region: i64) -> EventFilter<Infection> {
    EventFilter::<Infection>::builder()
        .field("region", |e: &Infection| FieldValue::Int(e.region), region)
        .build()
}

#[test]
fn data_manager_initializes_before_any_plan_and_events_route_by_filter() {
    let people = Plugin::builder("people")
        .initializer(|ctx| {
            ctx.add_data_manager(InfectionLedger::new())?;
            Ok(())
        })
        .build()
        .unwrap();

    let outbreak = Plugin::builder("outbreak")
        .dependency("people")
        .initializer(|ctx| {
            // A watcher counting only region-2 infections.
            ctx.add_actor(|watcher| {
                watcher.subscribe(region_filter(2), |c, event: &Infection| {
                    let ledger = c.get_data_manager::<InfectionLedger>()?;
                    assert!(ledger.borrow().is_initialized());
                    *ledger
                        .borrow_mut()
                        .by_region
                        .entry(event.region)
                        .or_insert(0) += 1;
                    Ok(())
                });
                Ok(())
            })?;
            // A broad observer counting everything.
            ctx.add_actor(|observer| {
                observer.subscribe(EventFilter::<Infection>::any(), |c, _event| {
                    let ledger = c.get_data_manager::<InfectionLedger>()?;
                    *ledger.borrow_mut().by_region.entry(-1).or_insert(0) += 1;
                    Ok(())
                });
                Ok(())
            })?;
            // The driver publishes three infections across two regions.
            ctx.add_actor(|driver| {
                driver.add_plan(1.0, |c| {
                    c.publish(&Infection {
                        region: 2,
                        severe: false,
                    })?;
                    c.publish(&Infection {
                        region: 2,
                        severe: true,
                    })?;
                    c.publish(&Infection {
                        region: 7,
                        severe: false,
                    })?;
                    Ok(())
                })
            })?;
            // Verify at close.
            ctx.add_actor(|verifier| {
                verifier.subscribe_to_simulation_close(|c| {
                    let ledger = c.get_data_manager::<InfectionLedger>()?;
                    let ledger = ledger.borrow();
                    assert_eq!(ledger.by_region.get(&2), Some(&2));
                    assert_eq!(ledger.by_region.get(&-1), Some(&3));
                    assert_eq!(ledger.by_region.get(&7), None);
                    Ok(())
                });
                Ok(())
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let mut engine = SimulationEngine::new(SimulationConfig::default());
    engine.add_plugin(people);
    engine.add_plugin(outbreak);
    let report = engine.execute().unwrap();
    assert_eq!(report.plans_executed, 1);
}

#[test]
fn predicate_conjunction_gates_delivery() {
    let delivered: Arc<Mutex<Vec<(i64, bool)>>> = Arc::default();
    let seen = Arc::clone(&delivered);

    let plugin = Plugin::builder("conjunction")
        .initializer(move |ctx| {
            let seen = Arc::clone(&seen);
            ctx.add_actor(move |actor| {
                let filter = EventFilter::<Infection>::builder()
                    .field("region", |e: &Infection| FieldValue::Int(e.region), 2i64)
                    .field("severe", |e: &Infection| FieldValue::Bool(e.severe), true)
                    .build();
                actor.subscribe(filter, move |_, event| {
                    seen.lock().unwrap().push((event.region, event.severe));
                    Ok(())
                });
                Ok(())
            })?;
            ctx.add_actor(|driver| {
                driver.add_plan(1.0, |c| {
                    c.publish(&Infection {
                        region: 2,
                        severe: true,
                    })?;
                    c.publish(&Infection {
                        region: 2,
                        severe: false,
                    })?;
                    c.publish(&Infection {
                        region: 3,
                        severe: true,
                    })?;
                    Ok(())
                })
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let mut engine = SimulationEngine::new(SimulationConfig::default());
    engine.add_plugin(plugin);
    engine.execute().unwrap();
    assert_eq!(*delivered.lock().unwrap(), vec![(2, true)]);
}

#[test]
fn unsubscribing_an_equal_filter_stops_delivery_without_affecting_others() {
    let counts: Arc<Mutex<(u32, u32)>> = Arc::default();
    let counts_out = Arc::clone(&counts);

    let plugin = Plugin::builder("unsub")
        .initializer(move |ctx| {
            let counts = Arc::clone(&counts_out);
            ctx.add_actor(move |first| {
                let counts = Arc::clone(&counts);
                first.subscribe(region_filter(2), move |_, _| {
                    counts.lock().unwrap().0 += 1;
                    Ok(())
                });
                // After the first wave, drop the subscription by value
                // equality.
                first.add_plan(1.5, |c| {
                    c.unsubscribe(&region_filter(2));
                    Ok(())
                })
            })?;
            let counts = Arc::clone(&counts_out);
            ctx.add_actor(move |second| {
                let counts = Arc::clone(&counts);
                second.subscribe(region_filter(2), move |_, _| {
                    counts.lock().unwrap().1 += 1;
                    Ok(())
                });
                Ok(())
            })?;
            ctx.add_actor(|driver| {
                let wave = |c: &Context| {
                    c.publish(&Infection {
                        region: 2,
                        severe: false,
                    })
                };
                driver.add_plan(1.0, wave)?;
                driver.add_plan(2.0, wave)?;
                Ok(())
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let mut engine = SimulationEngine::new(SimulationConfig::default());
    engine.add_plugin(plugin);
    engine.execute().unwrap();
    // The first actor saw only the first wave; the second saw both.
    assert_eq!(*counts.lock().unwrap(), (1, 2));
}

#[test]
fn keyed_plan_lifecycle_remove_then_readd() {
    let plugin = Plugin::builder("keys")
        .initializer(|ctx| {
            ctx.add_actor(|actor| {
                let key = PlanKey::new("census");
                actor.add_keyed_plan(5.0, key.clone(), |_| {
                    panic!("removed plan must never run")
                })?;
                assert_eq!(actor.get_plan_time(&key)?, Some(5.0));
                assert_eq!(actor.get_plan_keys(), vec![key.clone()]);

                let record = actor.get_plan(&key)?.unwrap();
                assert_eq!(record.time, 5.0);
                assert!(record.active);

                let removed = actor.remove_plan(&key)?;
                assert!(removed.is_some());
                assert_eq!(actor.get_plan_time(&key)?, None);

                // The key is free again.
                actor.add_keyed_plan(6.0, key.clone(), |c| {
                    assert_eq!(c.time(), 6.0);
                    Ok(())
                })?;
                Ok(())
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let mut engine = SimulationEngine::new(SimulationConfig::default());
    engine.add_plugin(plugin);
    let report = engine.execute().unwrap();
    assert_eq!(report.plans_executed, 1);
    assert_eq!(report.final_time, 6.0);
}

#[test]
fn removed_actor_stops_receiving_events_but_keeps_queued_plans() {
    let ran: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let ran_out = Arc::clone(&ran);

    let plugin = Plugin::builder("removal")
        .initializer(move |ctx| {
            let ran = Arc::clone(&ran_out);
            let doomed = ctx.add_actor({
                let ran = Arc::clone(&ran);
                move |actor| {
                    let events = Arc::clone(&ran);
                    actor.subscribe(EventFilter::<Infection>::any(), move |_, _| {
                        events.lock().unwrap().push("event");
                        Ok(())
                    });
                    let plans = Arc::clone(&ran);
                    actor.add_plan(3.0, move |_| {
                        plans.lock().unwrap().push("late plan");
                        Ok(())
                    })
                }
            })?;
            ctx.add_actor(move |driver| {
                driver.add_plan(1.0, move |c| {
                    assert!(c.actor_exists(doomed));
                    c.remove_actor(doomed)?;
                    assert!(!c.actor_exists(doomed));
                    // A second removal is a contract violation.
                    assert!(matches!(
                        c.remove_actor(doomed),
                        Err(NucleusError::Registry(_))
                    ));
                    // Events no longer reach the removed actor.
                    c.publish(&Infection {
                        region: 1,
                        severe: false,
                    })?;
                    Ok(())
                })
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let mut engine = SimulationEngine::new(SimulationConfig::default());
    engine.add_plugin(plugin);
    let report = engine.execute().unwrap();
    // The queued plan is not cancelled by removal.
    assert_eq!(*ran.lock().unwrap(), vec!["late plan"]);
    assert_eq!(report.plans_executed, 2);
}

#[test]
fn class_token_lookup_resolves_through_context() {
    let plugin = Plugin::builder("classes")
        .initializer(|ctx| {
            ctx.add_data_manager(InfectionLedger::new())?;
            ctx.add_actor(|actor| {
                actor.add_plan(1.0, |c| {
                    let by_class =
                        c.get_data_manager_by_class(ManagerClass::new("infection_ledger"))?;
                    assert!(by_class.borrow().is_initialized());
                    assert!(matches!(
                        c.get_data_manager_by_class(ManagerClass::new("missing")),
                        Err(NucleusError::Registry(_))
                    ));
                    Ok(())
                })
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let mut engine = SimulationEngine::new(SimulationConfig::default());
    engine.add_plugin(plugin);
    engine.execute().unwrap();
}

#[test]
fn halted_scenario_state_survives_a_snapshot_round_trip() {
    use nucleus::{Plan, PlanningQueue};

    let snapshot: Arc<Mutex<Option<nucleus::QueueSnapshot>>> = Arc::default();
    let captured = Arc::clone(&snapshot);

    let plugin = Plugin::builder("checkpoint")
        .initializer(move |ctx| {
            let captured = Arc::clone(&captured);
            ctx.add_actor(move |actor| {
                actor.schedule(
                    Plan::new(5.0, |_| Ok(()))
                        .keyed("vaccinate")
                        .with_payload(serde_json::json!({"step": "vaccinate"})),
                )?;
                actor.add_plan(7.0, |_| Ok(()))?;
                actor.add_plan(2.0, |c| {
                    c.halt();
                    Ok(())
                })?;
                actor.subscribe_to_simulation_close(move |c| {
                    // After the halt, discarded plans are still queued
                    // when close handlers run.
                    *captured.lock().unwrap() = Some(c.queue_snapshot());
                    Ok(())
                });
                Ok(())
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let mut engine = SimulationEngine::new(SimulationConfig::default());
    engine.add_plugin(plugin);
    let report = engine.execute().unwrap();
    assert!(report.halted);
    assert_eq!(report.final_time, 2.0);

    let snapshot = snapshot.lock().unwrap().take().unwrap();
    assert_eq!(snapshot.start_time, 2.0);
    assert_eq!(snapshot.plan_count(), 2);

    // Rebuild a queue at the halt point; the rehydrator sees the payload.
    let payloads: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
    let seen = Arc::clone(&payloads);
    let mut queue = PlanningQueue::from_snapshot(&snapshot, move |record| {
        seen.lock().unwrap().push(record.payload.clone());
        Ok(Box::new(|_| Ok(())))
    })
    .unwrap();
    assert_eq!(queue.current_time(), 2.0);
    let times: Vec<f64> = std::iter::from_fn(|| queue.pop_next().map(|p| p.time())).collect();
    assert_eq!(times, vec![5.0, 7.0]);
    assert!(payloads
        .lock()
        .unwrap()
        .contains(&serde_json::json!({"step": "vaccinate"})));
}

#[test]
fn calendar_anchored_clock_is_visible_to_plans() {
    let base = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let plugin = Plugin::builder("calendar")
        .initializer(|ctx| {
            ctx.add_actor(|actor| {
                actor.add_plan(3.5, |c| {
                    assert_eq!(c.date(), chrono::NaiveDate::from_ymd_opt(2024, 3, 4));
                    Ok(())
                })
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let mut engine = SimulationEngine::new(SimulationConfig {
        base_date: Some(base),
        ..SimulationConfig::default()
    });
    engine.add_plugin(plugin);
    engine.execute().unwrap();
}
