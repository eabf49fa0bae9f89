//! Collector behavior: liveness, finalizers, pools and pause control.

use sable_vm::{GcColor, Runtime, Value};

#[test]
fn values_on_the_stack_survive_collection() {
    let mut rt = Runtime::new();
    let keeper = rt.table_new(0, 1);
    rt.push_string("important");
    rt.table_rawsetfield(-2, "data").unwrap();

    rt.gc_collect();

    assert_ne!(rt.heap().color(keeper), GcColor::Free);
    let data = rt.heap().table_get_str(keeper, "data");
    match data {
        Value::String(s) => assert_eq!(rt.heap().string(s).view(), "important"),
        other => panic!("data is {other:?}"),
    }
}

#[test]
fn unreachable_objects_are_collected() {
    let mut rt = Runtime::new();
    let baseline = rt.heap().object_count();

    for i in 0..100 {
        rt.table_new(2, 0);
        rt.push_integer(i);
        rt.table_rawsetfield(-2, "n").unwrap();
        rt.pop(1);
    }
    assert!(rt.heap().object_count() > baseline);

    rt.gc_collect();
    // The temporaries are unreachable; pooled objects are also emptied by a
    // full collection.
    assert_eq!(rt.heap().object_count(), baseline);
    assert_eq!(rt.heap().pooled_count(), 0);
}

#[test]
fn pinned_values_survive_until_unpinned() {
    let mut rt = Runtime::new();
    let t = rt.table_new(0, 0);
    rt.pop(1);
    let pin = rt.pin(Value::Table(t));

    rt.gc_collect();
    assert_ne!(rt.heap().color(t), GcColor::Free);

    rt.unpin(pin);
    rt.gc_collect();
    assert_eq!(rt.heap().color(t), GcColor::Free);
}

#[test]
fn finalizer_runs_once_and_object_dies_next_cycle() {
    fn finalizer(rt: &mut Runtime) -> sable_core::Result<usize> {
        rt.get_global("finalized");
        let n = rt.to_integer(-1).unwrap_or(0);
        rt.pop(1);
        rt.push_integer(n + 1);
        rt.set_global("finalized");
        Ok(0)
    }

    let mut rt = Runtime::new();
    rt.push_integer(0);
    rt.set_global("finalized");

    let userdata = rt.userdata_new(4, 1);
    rt.table_new(0, 1);
    rt.push_cfunction(finalizer);
    rt.table_rawsetfield(-2, "__gc").unwrap();
    rt.metatable_set(-2).unwrap();
    // Drop the only reference.
    rt.pop(1);

    rt.gc_collect();
    rt.get_global("finalized");
    assert_eq!(rt.to_integer(-1), Some(1));
    rt.pop(1);
    // Resurrected for finalization: still not destroyed.
    assert_ne!(rt.heap().color(userdata), GcColor::Free);

    rt.gc_collect();
    rt.get_global("finalized");
    assert_eq!(rt.to_integer(-1), Some(1), "finalizer must not run twice");
    rt.pop(1);
    assert_eq!(rt.heap().color(userdata), GcColor::Free);
}

#[test]
fn incremental_steps_make_progress_without_a_full_stop() {
    let mut rt = Runtime::new();
    let baseline = rt.heap().object_count();

    for _ in 0..500 {
        rt.table_new(0, 0);
        rt.pop(1);
    }
    let created = rt.heap().object_count();
    assert!(created >= baseline + 500);

    // Force debt and step until the collector returns to idle.
    rt.heap_mut().set_threshold(1);
    for _ in 0..10_000 {
        rt.gc_step();
        if rt.heap().gc_phase() == sable_vm::GcPhase::Idle
            && rt.heap().object_count() <= baseline
        {
            break;
        }
    }
    assert!(rt.heap().object_count() + rt.heap().pooled_count() < created);
}

#[test]
fn paused_collector_does_no_work() {
    let mut rt = Runtime::new();
    for _ in 0..50 {
        rt.table_new(0, 0);
        rt.pop(1);
    }
    let before = rt.heap().object_count();

    rt.heap_mut().set_threshold(1);
    rt.heap_mut().gc_pause();
    for _ in 0..100 {
        rt.gc_step();
    }
    assert_eq!(rt.heap().object_count(), before);

    rt.heap_mut().gc_resume();
    rt.gc_collect();
    assert!(rt.heap().object_count() < before);
}

#[test]
fn string_pool_reuses_freed_strings() {
    let mut rt = Runtime::new();
    // Create garbage strings, collect incrementally (pooling applies on
    // sweep, not on gc_collect which drains pools).
    for i in 0..64 {
        rt.push_string(&format!("garbage-{i}"));
        rt.pop(1);
    }
    rt.heap_mut().set_threshold(1);
    for _ in 0..10_000 {
        rt.gc_step();
        if rt.heap().gc_phase() == sable_vm::GcPhase::Idle && rt.heap().pooled_count() > 0 {
            break;
        }
    }
    assert!(rt.heap().pooled_count() > 0, "sweep should pool freed strings");

    let pooled_before = rt.heap().pooled_count();
    rt.push_string("fresh");
    assert!(rt.heap().pooled_count() < pooled_before);
    assert_eq!(rt.to_str(-1), Some("fresh"));
}
