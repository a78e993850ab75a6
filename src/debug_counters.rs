use crossbeam_utils::atomic::AtomicCell;
use once_cell::sync::Lazy;

/// Counts of the internal objects that have been created and dropped by all
/// tables in the process.
#[derive(Clone, Debug)]
pub struct GlobalDebugCounters {
    pub generation_creation_count: u64,
    pub generation_allocation_bytes: u64,
    pub generation_drop_count: u64,
    pub generation_release_bytes: u64,
    pub value_node_creation_count: u64,
    pub value_node_drop_count: u64,
}

impl GlobalDebugCounters {
    pub fn current() -> Self {
        InternalGlobalDebugCounters::current()
    }
}

static COUNTERS: Lazy<InternalGlobalDebugCounters> =
    Lazy::new(InternalGlobalDebugCounters::default);

#[derive(Default)]
pub(crate) struct InternalGlobalDebugCounters {
    generation_creation_count: AtomicCell<u64>,
    generation_allocation_bytes: AtomicCell<u64>,
    generation_drop_count: AtomicCell<u64>,
    generation_release_bytes: AtomicCell<u64>,
    value_node_creation_count: AtomicCell<u64>,
    value_node_drop_count: AtomicCell<u64>,
}

impl InternalGlobalDebugCounters {
    fn current() -> GlobalDebugCounters {
        let c = &COUNTERS;
        GlobalDebugCounters {
            generation_creation_count: c.generation_creation_count.load(),
            generation_allocation_bytes: c.generation_allocation_bytes.load(),
            generation_drop_count: c.generation_drop_count.load(),
            generation_release_bytes: c.generation_release_bytes.load(),
            value_node_creation_count: c.value_node_creation_count.load(),
            value_node_drop_count: c.value_node_drop_count.load(),
        }
    }

    pub(crate) fn generation_created(byte_size: u64) {
        COUNTERS.generation_creation_count.fetch_add(1);
        COUNTERS.generation_allocation_bytes.fetch_add(byte_size);
    }

    pub(crate) fn generation_dropped(byte_size: u64) {
        COUNTERS.generation_drop_count.fetch_add(1);
        COUNTERS.generation_release_bytes.fetch_add(byte_size);
    }

    pub(crate) fn value_node_created() {
        COUNTERS.value_node_creation_count.fetch_add(1);
    }

    pub(crate) fn value_node_dropped() {
        COUNTERS.value_node_drop_count.fetch_add(1);
    }
}
