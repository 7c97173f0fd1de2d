//! Fixed-capacity concurrent per-line statistics ring
//!
//! Open-addressed hash table mapping (file, line) to running call counts and
//! inclusive/exclusive durations. The table never grows: capacity is fixed at
//! session start so the hot path has a predictable memory footprint and a
//! bounded worst-case probe length. When every slot has been probed without
//! finding a home the record is dropped and counted, never propagated as an
//! error — surfacing it would mean allocating or blocking on the timing
//! critical path.
//!
//! The table is shared by every thread delivering line events and guarded by
//! a spin-wait exchange lock. Critical sections are O(probe length) with no
//! allocation, so spinning is cheaper than parking. `snapshot_and_clear`
//! holds the same lock for its entire duration, so a dump never observes a
//! half-updated table.
//!
//! # Timing model
//!
//! `delta_ns` for a line event is the elapsed time since the *previous* line
//! event on the whole event stream (a single last-timestamp marker lives in
//! the session, not per thread). A genuinely parallel event source would
//! misattribute cross-thread gaps; the event source must be a single logical
//! stream, e.g. a globally serialized interpreter.

use crate::error::Result;
use crate::intern::FileId;
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default ring capacity: 64Ki slots
pub const DEFAULT_RING_CAPACITY: usize = 64 * 1024;

/// Accumulated statistics for one (file, line) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    pub file: FileId,
    pub line: u32,
    pub calls: u32,
    pub inclusive_ns: u64,
    pub exclusive_ns: u64,
}

// A slot is empty iff calls == 0: every occupied slot is initialized with
// calls = 1 and only ever incremented.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    file: u32,
    line: u32,
    calls: u32,
    inc_ns: u64,
    exc_ns: u64,
}

struct Ring {
    slots: Vec<Slot>,
    mask: usize,
    dropped: u64,
}

/// Spin-wait exchange lock over the ring
///
/// Exchange-acquire to take, store-release to free, exactly the discipline
/// of the C spinlock this replaces. Held only across O(1)-ish probe work or
/// the dump-time snapshot.
struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `locked`; a guard exists only
// while the flag is held.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    fn lock(&self) -> SpinGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
        SpinGuard { lock: self }
    }
}

struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> std::ops::Deref for SpinGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the flag is held for the guard's lifetime.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> std::ops::DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the flag is held for the guard's lifetime.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Fixed-capacity concurrent line-statistics aggregator
pub struct LineAggregator {
    ring: SpinLock<Ring>,
    capacity: usize,
}

impl LineAggregator {
    /// Allocate a ring with the given slot count
    ///
    /// Capacity must be a power of two (probe indices are masked, not
    /// modulo'd). Allocation is fallible: this is the one large allocation
    /// of a session and the caller is told when it cannot be satisfied.
    pub fn new(capacity: usize) -> Result<Self> {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two"
        );
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize(capacity, Slot::default());
        Ok(Self {
            ring: SpinLock::new(Ring {
                slots,
                mask: capacity - 1,
                dropped: 0,
            }),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Accumulate `delta_ns` against (file, line)
    ///
    /// Linear probing from the FNV hash of the key. First observation
    /// initializes the slot with calls = 1; later ones increment the count
    /// and add the delta to both timing fields (a bare line has no nested
    /// timing of its own, so inclusive == exclusive here). A full table
    /// drops the event and bumps the drop counter.
    pub fn record_line(&self, file: FileId, line: u32, delta_ns: u64) {
        let mut ring = self.ring.lock();
        let mask = ring.mask;
        let mut idx = probe_start(file, line) & mask;
        for _ in 0..=mask {
            let slot = &mut ring.slots[idx];
            if slot.calls == 0 {
                *slot = Slot {
                    file: file.0,
                    line,
                    calls: 1,
                    inc_ns: delta_ns,
                    exc_ns: delta_ns,
                };
                return;
            }
            if slot.file == file.0 && slot.line == line {
                slot.calls += 1;
                slot.inc_ns += delta_ns;
                slot.exc_ns += delta_ns;
                return;
            }
            idx = (idx + 1) & mask;
        }
        ring.dropped += 1;
    }

    /// Drain every occupied slot, in table iteration order, and empty the ring
    ///
    /// The lock is held across the whole sweep so concurrent `record_line`
    /// calls either land entirely before or entirely after the snapshot.
    pub fn snapshot_and_clear(&self) -> Vec<LineRecord> {
        let mut ring = self.ring.lock();
        let mut records = Vec::new();
        for slot in &mut ring.slots {
            if slot.calls == 0 {
                continue;
            }
            records.push(LineRecord {
                file: FileId(slot.file),
                line: slot.line,
                calls: slot.calls,
                inclusive_ns: slot.inc_ns,
                exclusive_ns: slot.exc_ns,
            });
            *slot = Slot::default();
        }
        records
    }

    /// Number of line events dropped because the ring was full
    pub fn dropped(&self) -> u64 {
        self.ring.lock().dropped
    }
}

impl std::fmt::Debug for LineAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineAggregator")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[inline]
fn probe_start(file: FileId, line: u32) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write_u32(file.0);
    hasher.write_u32(line);
    hasher.finish() as usize
}
