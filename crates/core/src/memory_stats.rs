//! Cross-thread memory statistics registry.
//!
//! The interpreter proper is single-threaded and cooperative (spec §5), but
//! diagnostics (SIGQUIT dump, at-exit report) run from a separate signal
//! handler thread and must read the interpreter thread's arena/pool numbers
//! without synchronizing with it. We keep the teacher's registry shape for
//! this: each thread claims an exclusive slot with a single CAS and updates
//! it with plain atomic stores; the diagnostics thread only ever reads.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              MemoryStatsRegistry (global)               │
//! ├─────────────────────────────────────────────────────────┤
//! │ slots: [MemorySlot; MAX_THREADS]                        │
//! │                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐             │
//! │  │ Slot 0 (Thread A)│  │ Slot 1 (Thread B)│  ...        │
//! │  │ thread_id: u64   │  │ thread_id: u64   │             │
//! │  │ arena_bytes: u64 │  │ arena_bytes: u64 │             │
//! │  │ stub_free:  u64  │  │ stub_free:  u64  │             │
//! │  │ stub_allocs: u64 │  │ stub_allocs: u64 │             │
//! │  └──────────────────┘  └──────────────────┘             │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of threads we can track. One interpreter plus a handful
/// of embedder worker threads each hosting their own instance; generous
/// headroom over the single-threaded-per-instance model (spec §5).
const MAX_THREADS: usize = 16;

/// Statistics for a single thread's memory usage.
#[derive(Debug)]
pub struct MemorySlot {
    /// Thread ID (0 = slot is free).
    pub thread_id: AtomicU64,
    /// Bytes currently held by the thread's scratch arena.
    pub arena_bytes: AtomicU64,
    /// Free-list node count across all stub pools.
    pub stub_free_count: AtomicU64,
    /// Total stub pool capacity (allocated + free).
    pub stub_capacity: AtomicU64,
    /// Lifetime counter of stub allocations handed out.
    pub stub_allocations: AtomicU64,
    /// This thread's trampoline tick counter, last time it was reported.
    pub tick: AtomicU64,
    /// Levels currently pushed on this thread's trampoline stack.
    pub active_levels: AtomicU64,
    /// High-water mark of `active_levels` for this thread.
    pub peak_levels: AtomicU64,
    /// Unix epoch seconds at which the current `Trampoline::run` call
    /// started, or 0 if this thread's trampoline is idle. Read by the
    /// watchdog to detect an evaluation that has been running
    /// continuously for longer than its configured threshold.
    pub run_started_secs: AtomicU64,
}

impl MemorySlot {
    const fn new() -> Self {
        Self {
            thread_id: AtomicU64::new(0),
            arena_bytes: AtomicU64::new(0),
            stub_free_count: AtomicU64::new(0),
            stub_capacity: AtomicU64::new(0),
            stub_allocations: AtomicU64::new(0),
            tick: AtomicU64::new(0),
            active_levels: AtomicU64::new(0),
            peak_levels: AtomicU64::new(0),
            run_started_secs: AtomicU64::new(0),
        }
    }
}

/// Global registry for cross-thread memory statistics.
pub struct MemoryStatsRegistry {
    slots: Box<[MemorySlot]>,
    /// Count of threads that couldn't get a slot.
    pub overflow_count: AtomicU64,
}

impl MemoryStatsRegistry {
    fn new(capacity: usize) -> Self {
        let slots: Vec<MemorySlot> = (0..capacity).map(|_| MemorySlot::new()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Register the current thread, returning the slot it claimed.
    pub fn register(&self) -> Option<usize> {
        let thread_id = current_thread_id();

        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .thread_id
                .compare_exchange(0, thread_id, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(idx);
            }
        }

        self.overflow_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    #[inline]
    pub fn update_arena(&self, slot_idx: usize, arena_bytes: usize) {
        if let Some(slot) = self.slots.get(slot_idx) {
            slot.arena_bytes
                .store(arena_bytes as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn update_stub_pool(&self, slot_idx: usize, free_count: usize, capacity: usize) {
        if let Some(slot) = self.slots.get(slot_idx) {
            slot.stub_free_count
                .store(free_count as u64, Ordering::Relaxed);
            slot.stub_capacity.store(capacity as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn increment_stub_allocations(&self, slot_idx: usize) {
        if let Some(slot) = self.slots.get(slot_idx) {
            slot.stub_allocations.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn update_trampoline(&self, slot_idx: usize, tick: u64, active_levels: u64, peak_levels: u64) {
        if let Some(slot) = self.slots.get(slot_idx) {
            slot.tick.store(tick, Ordering::Relaxed);
            slot.active_levels.store(active_levels, Ordering::Relaxed);
            slot.peak_levels.store(peak_levels, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_run_started(&self, slot_idx: usize, epoch_secs: u64) {
        if let Some(slot) = self.slots.get(slot_idx) {
            slot.run_started_secs.store(epoch_secs, Ordering::Relaxed);
        }
    }

    /// Threads whose trampoline has been continuously running since
    /// before `now_secs - threshold_secs`, as `(thread_id, running_secs)`.
    pub fn stuck_threads(&self, now_secs: u64, threshold_secs: u64) -> Vec<(u64, u64)> {
        let mut stuck = Vec::new();
        for slot in self.slots.iter() {
            let thread_id = slot.thread_id.load(Ordering::Acquire);
            if thread_id == 0 {
                continue;
            }
            let started = slot.run_started_secs.load(Ordering::Relaxed);
            if started == 0 {
                continue;
            }
            let running_secs = now_secs.saturating_sub(started);
            if running_secs > threshold_secs {
                stuck.push((thread_id, running_secs));
            }
        }
        stuck
    }

    /// Aggregate statistics across all registered threads.
    pub fn aggregate_stats(&self) -> AggregateMemoryStats {
        let mut total_arena_bytes: u64 = 0;
        let mut total_stub_free: u64 = 0;
        let mut total_stub_capacity: u64 = 0;
        let mut total_stub_allocations: u64 = 0;
        let mut active_threads: usize = 0;
        let mut total_ticks: u64 = 0;
        let mut total_active_levels: u64 = 0;
        let mut peak_levels: u64 = 0;

        for slot in self.slots.iter() {
            let thread_id = slot.thread_id.load(Ordering::Acquire);
            if thread_id > 0 {
                active_threads += 1;
                total_arena_bytes += slot.arena_bytes.load(Ordering::Relaxed);
                total_stub_free += slot.stub_free_count.load(Ordering::Relaxed);
                total_stub_capacity += slot.stub_capacity.load(Ordering::Relaxed);
                total_stub_allocations += slot.stub_allocations.load(Ordering::Relaxed);
                total_ticks += slot.tick.load(Ordering::Relaxed);
                total_active_levels += slot.active_levels.load(Ordering::Relaxed);
                peak_levels = peak_levels.max(slot.peak_levels.load(Ordering::Relaxed));
            }
        }

        AggregateMemoryStats {
            active_threads,
            total_arena_bytes,
            total_stub_free,
            total_stub_capacity,
            total_stub_allocations,
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
            total_ticks,
            total_active_levels,
            peak_levels,
        }
    }

    /// Per-thread statistics, for the SIGQUIT diagnostics dump.
    pub fn per_thread_stats(&self) -> impl Iterator<Item = ThreadMemoryStats> + '_ {
        self.slots.iter().filter_map(|slot| {
            let thread_id = slot.thread_id.load(Ordering::Acquire);
            if thread_id > 0 {
                Some(ThreadMemoryStats {
                    thread_id,
                    arena_bytes: slot.arena_bytes.load(Ordering::Relaxed),
                    stub_free_count: slot.stub_free_count.load(Ordering::Relaxed),
                    stub_capacity: slot.stub_capacity.load(Ordering::Relaxed),
                    stub_allocations: slot.stub_allocations.load(Ordering::Relaxed),
                    tick: slot.tick.load(Ordering::Relaxed),
                    active_levels: slot.active_levels.load(Ordering::Relaxed),
                    peak_levels: slot.peak_levels.load(Ordering::Relaxed),
                })
            } else {
                None
            }
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateMemoryStats {
    pub active_threads: usize,
    pub total_arena_bytes: u64,
    pub total_stub_free: u64,
    pub total_stub_capacity: u64,
    pub total_stub_allocations: u64,
    pub overflow_count: u64,
    pub total_ticks: u64,
    pub total_active_levels: u64,
    pub peak_levels: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ThreadMemoryStats {
    pub thread_id: u64,
    pub arena_bytes: u64,
    pub stub_free_count: u64,
    pub stub_capacity: u64,
    pub stub_allocations: u64,
    pub tick: u64,
    pub active_levels: u64,
    pub peak_levels: u64,
}

/// Global counter for generating unique thread IDs. Starts at 1 because 0
/// means "empty slot".
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THIS_THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THIS_THREAD_ID.with(|&id| id)
}

static MEMORY_REGISTRY: OnceLock<MemoryStatsRegistry> = OnceLock::new();

pub fn memory_registry() -> &'static MemoryStatsRegistry {
    MEMORY_REGISTRY.get_or_init(|| MemoryStatsRegistry::new(MAX_THREADS))
}

thread_local! {
    static SLOT_INDEX: std::cell::Cell<Option<usize>> = const { std::cell::Cell::new(None) };
}

/// Get or register the current thread's slot index.
pub fn get_or_register_slot() -> Option<usize> {
    SLOT_INDEX.with(|cell| {
        if let Some(idx) = cell.get() {
            Some(idx)
        } else {
            let idx = memory_registry().register();
            cell.set(idx);
            idx
        }
    })
}

#[inline]
pub fn update_arena_stats(arena_bytes: usize) {
    if let Some(idx) = SLOT_INDEX.with(|cell| cell.get()) {
        memory_registry().update_arena(idx, arena_bytes);
    }
}

#[inline]
pub fn update_stub_pool_stats(free_count: usize, capacity: usize) {
    if let Some(idx) = SLOT_INDEX.with(|cell| cell.get()) {
        memory_registry().update_stub_pool(idx, free_count, capacity);
    }
}

#[inline]
pub fn increment_stub_allocations() {
    if let Some(idx) = SLOT_INDEX.with(|cell| cell.get()) {
        memory_registry().increment_stub_allocations(idx);
    }
}

#[inline]
pub fn update_trampoline_stats(tick: u64, active_levels: u64, peak_levels: u64) {
    if let Some(idx) = SLOT_INDEX.with(|cell| cell.get()) {
        memory_registry().update_trampoline(idx, tick, active_levels, peak_levels);
    }
}

/// Mark this thread's trampoline as currently running (`epoch_secs != 0`)
/// or idle (`epoch_secs == 0`), for the watchdog's stuck-evaluation check.
#[inline]
pub fn set_run_started(epoch_secs: u64) {
    if let Some(idx) = SLOT_INDEX.with(|cell| cell.get()) {
        memory_registry().set_run_started(idx, epoch_secs);
    }
}
