//! Profiling session lifecycle: start, event intake, final drain
//!
//! A [`Session`] owns every piece of aggregation state — ring, path
//! interner, code unit registry, call stack, call record sequence — for one
//! profiling run, from `start` to the consuming `end`. There is no ambient
//! mutable profile state beyond a process-wide guard that forbids two
//! overlapping sessions; attempting a second start is an error, not a
//! silent no-op.
//!
//! Event intake runs synchronously on the host's execution path and never
//! blocks, allocates at most the interner's once-per-new-path entries, and
//! never fails: fidelity degradation (full ring, depth ceiling, unmatched
//! exit) is absorbed and counted. The only fallible operations are `start`
//! (ring allocation) and `end` (chunk construction and I/O).

use crate::aggregator::{LineAggregator, DEFAULT_RING_CAPACITY};
use crate::call_stack::{CallRecord, CallStackTracker, SourceLocation, DEFAULT_MAX_DEPTH};
use crate::error::{ProfileError, Result};
use crate::intern::PathInterner;
use crate::registry::{CodeUnitRegistry, UnitDescriptor};
use crate::writer::{TraceSnapshot, TraceWriter, WriterMode};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

// Releases the process-wide session slot when dropped, whatever path the
// session took to get there.
#[derive(Debug)]
struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// Where a call was issued from, as the event source sees it
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    pub file: &'a str,
    pub line: u32,
}

/// The code unit being entered, as the event source sees it
#[derive(Debug, Clone, Copy)]
pub struct CodeUnit<'a> {
    pub file: &'a str,
    pub start_line: u32,
    pub end_line: u32,
    pub name: &'a str,
}

/// Session parameters; defaults suit a typical interpreter workload
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub output_path: PathBuf,
    /// Session start timestamp, same clock as event timestamps
    pub start_time_ns: u64,
    pub mode: WriterMode,
    pub ring_capacity: usize,
    pub max_stack_depth: usize,
}

impl SessionConfig {
    pub fn new(output_path: impl Into<PathBuf>, start_time_ns: u64) -> Self {
        Self {
            output_path: output_path.into(),
            start_time_ns,
            mode: WriterMode::Full,
            ring_capacity: DEFAULT_RING_CAPACITY,
            max_stack_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn mode(mut self, mode: WriterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }
}

/// One profiling run's aggregation state
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    aggregator: LineAggregator,
    interner: PathInterner,
    registry: CodeUnitRegistry,
    call_stack: CallStackTracker,
    calls: Vec<CallRecord>,
    // Single global last-line-event marker; the event source is one logical
    // stream, so one marker suffices.
    last_line_ns: u64,
    _guard: ActiveGuard,
}

impl Session {
    /// Begin a profiling session
    ///
    /// Fails with [`ProfileError::SessionActive`] while another session is
    /// live, and with [`ProfileError::Allocation`] when the ring cannot be
    /// allocated (in which case the slot is released again).
    pub fn start(config: SessionConfig) -> Result<Self> {
        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(ProfileError::SessionActive);
        }
        let guard = ActiveGuard;
        let aggregator = LineAggregator::new(config.ring_capacity)?;
        let call_stack = CallStackTracker::new(config.max_stack_depth);
        info!(
            output = %config.output_path.display(),
            ring_capacity = config.ring_capacity,
            max_stack_depth = config.max_stack_depth,
            "profiling session started"
        );
        Ok(Self {
            config,
            aggregator,
            interner: PathInterner::new(),
            registry: CodeUnitRegistry::new(),
            call_stack,
            calls: Vec::new(),
            last_line_ns: 0,
            _guard: guard,
        })
    }

    /// A line of `path` executed at `now_ns`
    ///
    /// The accumulated delta is the gap since the previous line event on the
    /// stream; the very first line event contributes zero time.
    pub fn line_event(&mut self, path: &str, line: u32, now_ns: u64) {
        let delta = if self.last_line_ns == 0 {
            0
        } else {
            now_ns.saturating_sub(self.last_line_ns)
        };
        self.last_line_ns = now_ns;
        let file = self.interner.intern(path);
        self.aggregator.record_line(file, line, delta);
    }

    /// A call into `unit` began at `now_ns`
    pub fn call_enter(&mut self, caller: Option<CallSite<'_>>, unit: CodeUnit<'_>, now_ns: u64) {
        let caller = caller.map(|site| SourceLocation {
            file: self.interner.intern(site.file),
            line: site.line,
        });
        let unit_file = self.interner.intern(unit.file);
        let unit_id = self.registry.identify(&UnitDescriptor {
            file: unit_file,
            start_line: unit.start_line,
            end_line: unit.end_line,
            name: unit.name,
        });
        self.call_stack.enter(caller, unit_id, now_ns);
    }

    /// The innermost call completed at `now_ns`
    ///
    /// Unmatched exits are tolerated as no-ops.
    pub fn call_exit(&mut self, now_ns: u64) {
        if let Some(record) = self.call_stack.exit(now_ns) {
            self.calls.push(record);
        }
    }

    /// Line events dropped so far because the ring was full
    pub fn dropped_lines(&self) -> u64 {
        self.aggregator.dropped()
    }

    /// Call entries dropped so far at the depth ceiling
    pub fn dropped_frames(&self) -> u64 {
        self.call_stack.dropped()
    }

    /// Final drain: snapshot every component and write the trace
    ///
    /// Consuming `self` makes a second drain unrepresentable; all state is
    /// released after the writer finishes (or fails). Aggregation stops by
    /// construction — the session is gone.
    pub fn end(self) -> Result<()> {
        let Self {
            config,
            aggregator,
            interner,
            registry,
            call_stack,
            calls,
            _guard,
            ..
        } = self;

        let lines = aggregator.snapshot_and_clear();
        let snapshot = TraceSnapshot {
            files: interner.file_table(),
            definitions: registry.into_definitions(),
            calls,
            lines,
            start_time_ns: config.start_time_ns,
            dropped_lines: aggregator.dropped(),
            dropped_frames: call_stack.dropped(),
        };
        TraceWriter::new(config.mode).write_file(&config.output_path, &snapshot)?;
        info!(
            output = %config.output_path.display(),
            lines = snapshot.lines.len(),
            calls = snapshot.calls.len(),
            units = snapshot.definitions.len(),
            dropped_lines = snapshot.dropped_lines,
            dropped_frames = snapshot.dropped_frames,
            "profiling session ended"
        );
        Ok(())
    }
}
