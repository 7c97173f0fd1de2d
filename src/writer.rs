//! Binary trace writer: chunked NYTProf-compatible container
//!
//! Layout, bit-exact:
//!
//! ```text
//! header   : "NYTPROF\0"  u32le major=5  u32le minor=0       (16 bytes)
//! chunk    : tag (1 ASCII byte)  u32le payload length  payload
//!   H      : u32le major, u32le minor                        (full mode)
//!   A      : NUL-terminated "key=value" ASCII strings        (full mode)
//!   F      : { u32 id, u32 flags, u32 size, u32 mtime, path\0 }*
//!   D      : { u32 unit, u32 file, u32 start, u32 end, name\0 }*  (full)
//!   C      : { u32 file, u32 line, u32 unit, u64 inc, u64 exc }*  (full)
//!   S      : { u32 file, u32 line, u32 calls, u64 inc, u64 exc }*
//!   E      : empty, always last in a valid file
//! ```
//!
//! All multi-byte fields are little-endian. Duration fields are ticks: input
//! nanoseconds divided by 100, truncating. A file whose last chunk is not
//! `E` is truncated and must be rejected by readers; the writer deliberately
//! produces exactly that shape when chunk construction fails mid-dump, so an
//! allocation failure can never yield a parseable-but-wrong trace.

use crate::aggregator::LineRecord;
use crate::call_stack::CallRecord;
use crate::clock::{ns_to_ticks, TICKS_PER_SEC};
use crate::error::Result;
use crate::intern::FileEntry;
use crate::registry::Definition;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Container magic: 7 ASCII bytes plus NUL
pub const MAGIC: &[u8; 8] = b"NYTPROF\0";
/// Container format major version
pub const FORMAT_MAJOR: u32 = 5;
/// Container format minor version
pub const FORMAT_MINOR: u32 = 0;

/// Chunk tags
pub mod tag {
    pub const SUBHEADER: u8 = b'H';
    pub const ATTRIBUTES: u8 = b'A';
    pub const FILES: u8 = b'F';
    pub const DEFINITIONS: u8 = b'D';
    pub const CALLS: u8 = b'C';
    pub const STATEMENTS: u8 = b'S';
    pub const END: u8 = b'E';
}

/// Which chunk set the writer emits
///
/// The format has two observed shapes: a minimal line-only trace (no call
/// graph, no sub-header) and a full call-graph trace. They are two modes of
/// one writer, selected explicitly rather than inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMode {
    /// `F` and `S` chunks only; header + `E` alone when there are no stats
    LineOnly,
    /// `H`, `A`, `F`, `D`, `C`, `S` chunks
    Full,
}

/// Everything the writer consumes: the end-of-session snapshot
#[derive(Debug, Clone, Default)]
pub struct TraceSnapshot {
    pub files: Vec<FileEntry>,
    pub definitions: Vec<Definition>,
    pub calls: Vec<CallRecord>,
    pub lines: Vec<LineRecord>,
    /// Session start timestamp, same unit as event timestamps
    pub start_time_ns: u64,
    /// Line events dropped by a full ring (fidelity signal)
    pub dropped_lines: u64,
    /// Call entries not tracked past the depth ceiling (fidelity signal)
    pub dropped_frames: u64,
}

/// Chunked trace encoder
#[derive(Debug, Clone, Copy)]
pub struct TraceWriter {
    mode: WriterMode,
}

impl TraceWriter {
    pub fn new(mode: WriterMode) -> Self {
        Self { mode }
    }

    /// Serialize the snapshot to `path`
    ///
    /// I/O errors propagate. On a chunk-construction allocation failure the
    /// file is closed as-is, without a trailing `E` chunk, so readers see a
    /// truncated trace rather than a silently incomplete one.
    pub fn write_file(&self, path: &Path, snapshot: &TraceSnapshot) -> Result<()> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        self.write_to(&mut out, snapshot)?;
        out.flush()?;
        Ok(())
    }

    /// Serialize the snapshot to any byte sink
    pub fn write_to<W: Write>(&self, out: &mut W, snapshot: &TraceSnapshot) -> Result<()> {
        out.write_all(MAGIC)?;
        out.write_all(&FORMAT_MAJOR.to_le_bytes())?;
        out.write_all(&FORMAT_MINOR.to_le_bytes())?;

        if self.mode == WriterMode::LineOnly && snapshot.lines.is_empty() {
            // Nothing to report: minimal valid container
            write_chunk(out, tag::END, &[])?;
            return Ok(());
        }

        if self.mode == WriterMode::Full {
            let mut h = Vec::new();
            h.try_reserve_exact(8)?;
            h.extend_from_slice(&FORMAT_MAJOR.to_le_bytes());
            h.extend_from_slice(&FORMAT_MINOR.to_le_bytes());
            write_chunk(out, tag::SUBHEADER, &h)?;

            write_chunk(out, tag::ATTRIBUTES, &encode_attributes(snapshot)?)?;
        }

        write_chunk(out, tag::FILES, &encode_files(&snapshot.files)?)?;

        if self.mode == WriterMode::Full {
            write_chunk(out, tag::DEFINITIONS, &encode_definitions(&snapshot.definitions)?)?;
            write_chunk(out, tag::CALLS, &encode_calls(&snapshot.calls)?)?;
        }

        write_chunk(out, tag::STATEMENTS, &encode_lines(&snapshot.lines)?)?;
        write_chunk(out, tag::END, &[])?;
        Ok(())
    }
}

fn write_chunk<W: Write>(out: &mut W, tag: u8, payload: &[u8]) -> Result<()> {
    debug!(tag = %(tag as char), len = payload.len(), "write chunk");
    out.write_all(&[tag])?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(payload)?;
    Ok(())
}

fn encode_attributes(snapshot: &TraceSnapshot) -> Result<Vec<u8>> {
    let attrs = format!(
        "ticks_per_sec={TICKS_PER_SEC}\0start_time={}\0dropped_lines={}\0dropped_frames={}\0",
        snapshot.start_time_ns, snapshot.dropped_lines, snapshot.dropped_frames,
    );
    let mut buf = Vec::new();
    buf.try_reserve_exact(attrs.len())?;
    buf.extend_from_slice(attrs.as_bytes());
    Ok(buf)
}

fn encode_files(files: &[FileEntry]) -> Result<Vec<u8>> {
    let len: usize = files.iter().map(|f| 16 + f.path.len() + 1).sum();
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    for f in files {
        buf.extend_from_slice(&f.id.to_le_bytes());
        buf.extend_from_slice(&f.flags.to_le_bytes());
        buf.extend_from_slice(&f.size.to_le_bytes());
        buf.extend_from_slice(&f.mtime.to_le_bytes());
        buf.extend_from_slice(f.path.as_bytes());
        buf.push(0);
    }
    Ok(buf)
}

fn encode_definitions(defs: &[Definition]) -> Result<Vec<u8>> {
    let len: usize = defs.iter().map(|d| 16 + d.name.len() + 1).sum();
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    for d in defs {
        buf.extend_from_slice(&d.id.0.to_le_bytes());
        buf.extend_from_slice(&d.file.0.to_le_bytes());
        buf.extend_from_slice(&d.start_line.to_le_bytes());
        buf.extend_from_slice(&d.end_line.to_le_bytes());
        buf.extend_from_slice(d.name.as_bytes());
        buf.push(0);
    }
    Ok(buf)
}

fn encode_calls(calls: &[CallRecord]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(calls.len() * 28)?;
    for c in calls {
        // Outermost frames have no call site; encoded as file 0, line 0
        let (fid, line) = match c.caller {
            Some(site) => (site.file.0, site.line),
            None => (0, 0),
        };
        buf.extend_from_slice(&fid.to_le_bytes());
        buf.extend_from_slice(&line.to_le_bytes());
        buf.extend_from_slice(&c.unit.0.to_le_bytes());
        buf.extend_from_slice(&ns_to_ticks(c.inclusive_ns).to_le_bytes());
        buf.extend_from_slice(&ns_to_ticks(c.exclusive_ns).to_le_bytes());
    }
    Ok(buf)
}

fn encode_lines(lines: &[LineRecord]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(lines.len() * 28)?;
    for l in lines {
        buf.extend_from_slice(&l.file.0.to_le_bytes());
        buf.extend_from_slice(&l.line.to_le_bytes());
        buf.extend_from_slice(&l.calls.to_le_bytes());
        buf.extend_from_slice(&ns_to_ticks(l.inclusive_ns).to_le_bytes());
        buf.extend_from_slice(&ns_to_ticks(l.exclusive_ns).to_le_bytes());
    }
    Ok(buf)
}
