//! Shadow call stack: enter/exit events to inclusive/exclusive call records
//!
//! Tracks in-flight calls on a bounded, pre-allocated stack. Completing a
//! frame yields one [`CallRecord`] and folds the frame's inclusive duration
//! into its parent's child-time accumulator, which is how exclusive (self)
//! time propagates transitively through arbitrary nesting.
//!
//! Nesting deeper than the configured maximum is silently not tracked: the
//! over-depth call gets no frame and no record. With interned `FileId`s the
//! untracked caller location is a pair of `Copy` integers, so there is
//! nothing to leak, only a drop counter to bump.
//!
//! Not thread-safe by design: call events must arrive as a single logical
//! stream. A parallel event source needs one tracker per execution context,
//! merging record sequences at dump time.

use crate::intern::FileId;
use crate::registry::CodeUnitId;
use serde::{Deserialize, Serialize};

/// Default maximum tracked call depth
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// A caller's position: which file and line issued the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: FileId,
    pub line: u32,
}

/// One completed call, emitted in completion (post) order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call site; `None` for the outermost frame
    pub caller: Option<SourceLocation>,
    pub unit: CodeUnitId,
    pub inclusive_ns: u64,
    pub exclusive_ns: u64,
}

#[derive(Debug, Clone, Copy)]
struct CallFrame {
    caller: Option<SourceLocation>,
    unit: CodeUnitId,
    start_ns: u64,
    child_ns: u64,
}

/// Bounded-depth tracker of in-flight calls
#[derive(Debug)]
pub struct CallStackTracker {
    frames: Vec<CallFrame>,
    max_depth: usize,
    // Enters observed while at max depth and not yet matched by an exit.
    // Keeps truncation from mispairing exits against ancestor frames.
    overflow: usize,
    dropped: u64,
}

impl CallStackTracker {
    /// Create a tracker with frame storage pre-allocated to `max_depth`
    pub fn new(max_depth: usize) -> Self {
        assert!(max_depth > 0, "max call depth must be at least 1");
        Self {
            frames: Vec::with_capacity(max_depth),
            max_depth,
            overflow: 0,
            dropped: 0,
        }
    }

    /// Current nesting depth of tracked calls
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of calls not tracked because the stack was at max depth
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Begin tracking a call entered at `now_ns`
    ///
    /// At max depth the call is not tracked: no frame is pushed, no record
    /// will ever be emitted for it, and its eventual exit is absorbed
    /// without touching the tracked frames. Returns whether the call is
    /// being tracked.
    pub fn enter(
        &mut self,
        caller: Option<SourceLocation>,
        unit: CodeUnitId,
        now_ns: u64,
    ) -> bool {
        if self.frames.len() >= self.max_depth {
            self.overflow += 1;
            self.dropped += 1;
            return false;
        }
        self.frames.push(CallFrame {
            caller,
            unit,
            start_ns: now_ns,
            child_ns: 0,
        });
        true
    }

    /// Complete the innermost tracked call at `now_ns`
    ///
    /// Exits matching an untracked over-depth enter are absorbed. Returns
    /// `None` on a genuinely unmatched exit (empty stack), which is
    /// tolerated: event sources legitimately emit imperfectly paired events
    /// around process teardown.
    pub fn exit(&mut self, now_ns: u64) -> Option<CallRecord> {
        if self.overflow > 0 {
            self.overflow -= 1;
            return None;
        }
        let frame = self.frames.pop()?;
        let inclusive_ns = now_ns.saturating_sub(frame.start_ns);
        let exclusive_ns = inclusive_ns.saturating_sub(frame.child_ns);
        if let Some(parent) = self.frames.last_mut() {
            parent.child_ns += inclusive_ns;
        }
        Some(CallRecord {
            caller: frame.caller,
            unit: frame.unit,
            inclusive_ns,
            exclusive_ns,
        })
    }
}
