//! Trazar - In-process line and call profiler core
//!
//! This library provides the aggregation and serialization core of a
//! line-level execution profiler: a fixed-capacity concurrent per-line
//! statistics ring, a shadow call stack producing inclusive/exclusive call
//! records, a code unit registry, and a writer for the NYTProf-compatible
//! chunked binary trace format. Hooking the host runtime's tracing
//! mechanism, path filtering policy, and report generation live outside
//! this crate; it consumes timestamped events and produces a trace file.

pub mod aggregator;
pub mod call_stack;
pub mod clock;
pub mod error;
pub mod filter;
pub mod intern;
pub mod reader;
pub mod registry;
pub mod session;
pub mod writer;

pub use error::{ProfileError, Result};
pub use session::{CallSite, CodeUnit, Session, SessionConfig};
pub use writer::WriterMode;
