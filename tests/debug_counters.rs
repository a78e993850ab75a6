#![cfg(feature = "unstable-debug-counters")]

use chaintable::{GlobalDebugCounters, HashTable};
use crossbeam_epoch::Owned;

fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}

// Keep this the only test in this file; the counters are global.
#[test]
fn retired_generations_and_values_are_reclaimed() {
    let before = GlobalDebugCounters::current();

    {
        let table = HashTable::with_capacity(1);

        for i in 0..1000 {
            table.put(i, i.to_string());
        }
        for i in 0..1000 {
            table.put(i, format!("updated {i}"));
        }
        for i in (0..1000).step_by(2) {
            assert_eq!(table.remove(&i), Some(format!("updated {i}")));
        }

        let during = GlobalDebugCounters::current();
        assert!(during.generation_creation_count - before.generation_creation_count >= 10);
    }

    run_deferred();

    let after = GlobalDebugCounters::current();

    let created = after.generation_creation_count - before.generation_creation_count;
    let dropped = after.generation_drop_count - before.generation_drop_count;
    assert_eq!(created, dropped);
    assert_eq!(
        after.generation_allocation_bytes - before.generation_allocation_bytes,
        after.generation_release_bytes - before.generation_release_bytes
    );

    let created = after.value_node_creation_count - before.value_node_creation_count;
    let dropped = after.value_node_drop_count - before.value_node_drop_count;
    assert_eq!(created, dropped);
}
