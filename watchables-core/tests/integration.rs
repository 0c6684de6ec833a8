//! End-to-end scenarios exercising the full reactive value graph: plain
//! fields and derived values, atomic multi-field commits, diamond-shaped
//! dependency graphs, equality damping, throttling, and listener
//! garbage collection.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use watchables_core::{
    equality_gate, DerivedValue, Field, Listener, ManualClock, Throttled, Watchable,
};

#[test]
fn basic_propagation() {
    let f = Field::new(0);
    let f_clone = f.clone();
    let d = DerivedValue::new(move |watch, _prev| Ok(watch.watch(&f_clone)? * 2));

    assert_eq!(d.read().unwrap(), 0);
    f.set(3).commit().unwrap();
    assert_eq!(d.read().unwrap(), 6);
}

#[test]
fn atomic_group_commit_fires_listener_exactly_once_with_fully_consistent_state() {
    let first = Field::new("Bob".to_string());
    let last = Field::new("Doe".to_string());

    let first_c = first.clone();
    let last_c = last.clone();
    let full = DerivedValue::new(move |watch, _prev| {
        Ok(format!("{} {}", watch.watch(&first_c)?, watch.watch(&last_c)?))
    });
    assert_eq!(full.read().unwrap(), "Bob Doe");

    let readings: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let readings_clone = readings.clone();
    let full_for_listener = full.clone();
    let listener: Listener = Rc::new(move || {
        readings_clone
            .borrow_mut()
            .push(full_for_listener.read().unwrap());
    });
    let _h = full.subscribe_change(&listener);

    first
        .set("John".to_string())
        .chain(last.set("Smith".to_string()))
        .commit()
        .unwrap();

    assert_eq!(*readings.borrow(), vec!["John Smith".to_string()]);
}

#[test]
fn diamond_dependency_is_consistent_and_fires_once() {
    let s0 = Field::new(1);

    let s0a = s0.clone();
    let s1 = DerivedValue::new(move |w, _| w.watch(&s0a));

    let s0b = s0.clone();
    let s1a = s1.clone();
    let s2 = DerivedValue::new(move |w, _| Ok(w.watch(&s0b)? + w.watch::<i32, _>(&s1a)?));

    let s0c = s0.clone();
    let s1b = s1.clone();
    let s2a = s2.clone();
    let s3 = DerivedValue::new(move |w, _| {
        Ok(w.watch(&s0c)? + w.watch::<i32, _>(&s1b)? + w.watch::<i32, _>(&s2a)?)
    });

    let s0d = s0.clone();
    let s1c = s1.clone();
    let s2b = s2.clone();
    let s3a = s3.clone();
    let s4 = DerivedValue::new(move |w, _| {
        Ok(w.watch(&s0d)?
            + w.watch::<i32, _>(&s1c)?
            + w.watch::<i32, _>(&s2b)?
            + w.watch::<i32, _>(&s3a)?)
    });

    assert_eq!(s4.read().unwrap(), 8);

    let fires = Rc::new(RefCell::new(0));
    let fires_clone = fires.clone();
    let observed: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));
    let observed_clone = observed.clone();
    let s4_for_listener = s4.clone();
    let listener: Listener = Rc::new(move || {
        *fires_clone.borrow_mut() += 1;
        *observed_clone.borrow_mut() = Some(s4_for_listener.read().unwrap());
    });
    let _h = s4.subscribe_change(&listener);

    s0.set(2).commit().unwrap();

    assert_eq!(*fires.borrow(), 1);
    assert_eq!(*observed.borrow(), Some(16));
    assert_eq!(s4.read().unwrap(), 16);
}

#[test]
fn equality_gate_damps_a_structurally_equal_burst() {
    let xs = Field::new(vec![1, 2]);
    let gate = equality_gate(xs.clone(), |a: &Vec<i32>, b: &Vec<i32>| a == b);

    let calls = Rc::new(RefCell::new(0));
    let calls_clone = calls.clone();
    let gate_clone = gate.clone();
    let doubling = DerivedValue::new(move |watch, _prev| {
        *calls_clone.borrow_mut() += 1;
        Ok(watch
            .watch::<Vec<i32>, _>(&gate_clone)?
            .iter()
            .map(|x| x * 2)
            .collect::<Vec<_>>())
    });

    assert_eq!(doubling.read().unwrap(), vec![2, 4]);
    assert_eq!(*calls.borrow(), 1);

    xs.set(vec![1, 2]).commit().unwrap();
    // Field's own default equality already treats this as a no-op, so
    // neither the gate nor the downstream derived value ever sees dirty.
    assert_eq!(doubling.read().unwrap(), vec![2, 4]);
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn throttle_timing_matches_the_documented_sequence() {
    let f = Field::new(0);
    let clock = ManualClock::new();
    let t = Throttled::new(f.clone(), Duration::from_millis(50), Rc::new(clock.clone()));

    assert_eq!(t.read().unwrap(), 0);

    f.set(1).commit().unwrap();
    assert_eq!(t.read().unwrap(), 1);

    f.set(2).commit().unwrap();
    assert_eq!(t.read().unwrap(), 1);

    clock.advance(Duration::from_millis(50));
    assert_eq!(t.read().unwrap(), 2);
}

#[test]
fn throttle_collapses_a_continuous_burst_into_exactly_four_dispatches() {
    let f = Field::new(0);
    let clock = ManualClock::new();
    let t = Throttled::new(f.clone(), Duration::from_millis(85), Rc::new(clock.clone()));
    t.read().unwrap();

    let dirty_count = Rc::new(RefCell::new(0));
    let dirty_count_clone = dirty_count.clone();
    let listener: Listener = Rc::new(move || *dirty_count_clone.borrow_mut() += 1);
    let _h = t.subscribe_dirty(&listener);

    for i in 1..=7 {
        f.set(i).commit().unwrap();
        clock.advance(Duration::from_millis(30));
    }
    clock.advance(Duration::from_millis(200));

    // 7 raw updates at a 30ms cadence against an 85ms period collapse into
    // exactly 4 dispatches from `t`, per the documented scenario.
    assert_eq!(*dirty_count.borrow(), 4);
    assert_eq!(t.read().unwrap(), 7);
}

#[test]
fn listener_garbage_collection_drops_subscriber_count_to_zero() {
    let f = Field::new(1);
    assert_eq!(f.dirty_subscriber_count(), 0);

    {
        let listener: Listener = Rc::new(|| {});
        let _h = f.subscribe_dirty(&listener);
        assert_eq!(f.dirty_subscriber_count(), 1);
        // `listener` drops at the end of this scope; the registry only
        // ever held a `Weak` reference to it.
    }

    // Force pruning: any call that iterates the subscriber set retires
    // collected weak slots.
    assert_eq!(f.dirty_subscriber_count(), 0);
}

#[test]
fn unreachable_derived_chain_releases_its_upstream_subscription() {
    let source = Field::new(1);
    assert_eq!(source.dirty_subscriber_count(), 0);

    {
        let source_clone = source.clone();
        let derived = DerivedValue::new(move |w, _| w.watch(&source_clone));
        derived.read().unwrap();

        let listener: Listener = Rc::new(|| {});
        let _h = derived.subscribe_dirty(&listener);
        assert_eq!(source.dirty_subscriber_count(), 1);
        // `derived` drops here along with its subscription to `source`.
    }

    // `dirty_subscriber_count` prunes collected weak slots as it counts.
    assert_eq!(source.dirty_subscriber_count(), 0);
}
