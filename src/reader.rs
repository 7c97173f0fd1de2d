//! Minimal trace parser for verification and round-trip checks
//!
//! Parses the chunked container back into structured form. This is not a
//! report generator; it exists so embedders (and the test suite) can check
//! that a trace on disk is complete and framed correctly. Duration fields
//! come back in ticks, the format's native unit, not nanoseconds.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::writer::{tag, FORMAT_MAJOR, FORMAT_MINOR, MAGIC};

#[derive(Error, Debug)]
pub enum TraceReadError {
    #[error("bad magic")]
    BadMagic,

    #[error("unsupported version {0}.{1}")]
    BadVersion(u32, u32),

    #[error("truncated trace: {0}")]
    Truncated(&'static str),

    #[error("malformed {chunk} chunk: {reason}")]
    BadChunk { chunk: char, reason: &'static str },

    #[error("unknown chunk tag {0:?}")]
    UnknownTag(char),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceReadError>;

/// File-table entry as parsed from an `F` chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: u32,
    pub flags: u32,
    pub size: u32,
    pub mtime: u32,
    pub path: String,
}

/// Definition as parsed from a `D` chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefInfo {
    pub unit: u32,
    pub file: u32,
    pub start_line: u32,
    pub end_line: u32,
    pub name: String,
}

/// Call record as parsed from a `C` chunk (durations in ticks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    pub file: u32,
    pub line: u32,
    pub unit: u32,
    pub inclusive_ticks: u64,
    pub exclusive_ticks: u64,
}

/// Per-line statistic as parsed from an `S` chunk (durations in ticks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatInfo {
    pub file: u32,
    pub line: u32,
    pub calls: u32,
    pub inclusive_ticks: u64,
    pub exclusive_ticks: u64,
}

/// Fully parsed trace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedTrace {
    pub major: u32,
    pub minor: u32,
    /// Sub-header versions from the `H` chunk, when present
    pub subheader: Option<(u32, u32)>,
    pub attributes: HashMap<String, String>,
    pub files: Vec<FileInfo>,
    pub definitions: Vec<DefInfo>,
    pub calls: Vec<CallInfo>,
    pub lines: Vec<StatInfo>,
}

/// Parse a trace from raw bytes
///
/// Fails on bad magic or version, on any framing violation, and on a stream
/// that ends without an `E` chunk — the writer's contract is that a missing
/// end marker means the dump did not complete.
pub fn parse(data: &[u8]) -> Result<ParsedTrace> {
    if data.len() < 16 {
        return Err(TraceReadError::Truncated("header"));
    }
    if &data[..8] != MAGIC {
        return Err(TraceReadError::BadMagic);
    }
    let major = u32_at(data, 8);
    let minor = u32_at(data, 12);
    if (major, minor) != (FORMAT_MAJOR, FORMAT_MINOR) {
        return Err(TraceReadError::BadVersion(major, minor));
    }

    let mut trace = ParsedTrace {
        major,
        minor,
        ..Default::default()
    };
    let mut offset = 16;
    let mut ended = false;
    while offset < data.len() {
        let tok = data[offset];
        offset += 1;
        if offset + 4 > data.len() {
            return Err(TraceReadError::Truncated("chunk length"));
        }
        let len = u32_at(data, offset) as usize;
        offset += 4;
        if offset + len > data.len() {
            return Err(TraceReadError::Truncated("chunk payload"));
        }
        let payload = &data[offset..offset + len];
        offset += len;

        match tok {
            tag::SUBHEADER => {
                if len != 8 {
                    return Err(bad('H', "length must be 8"));
                }
                trace.subheader = Some((u32_at(payload, 0), u32_at(payload, 4)));
            }
            tag::ATTRIBUTES => parse_attributes(payload, &mut trace.attributes)?,
            tag::FILES => parse_files(payload, &mut trace.files)?,
            tag::DEFINITIONS => parse_definitions(payload, &mut trace.definitions)?,
            tag::CALLS => parse_calls(payload, &mut trace.calls)?,
            tag::STATEMENTS => parse_stats(payload, &mut trace.lines)?,
            tag::END => {
                if len != 0 {
                    return Err(bad('E', "payload must be empty"));
                }
                ended = true;
                break;
            }
            other => return Err(TraceReadError::UnknownTag(other as char)),
        }
    }
    if !ended {
        return Err(TraceReadError::Truncated("missing E chunk"));
    }
    Ok(trace)
}

/// Read and parse a trace file from disk
pub fn read_file(path: &Path) -> Result<ParsedTrace> {
    let data = std::fs::read(path)?;
    parse(&data)
}

/// Check a trace file for well-formedness, returning its chunk count
///
/// Walks the raw chunk framing without interpreting payloads: magic and
/// version must match, every chunk must be fully present, and the stream
/// must end with `E`.
pub fn verify(path: &Path) -> Result<usize> {
    let data = std::fs::read(path)?;
    if data.len() < 16 {
        return Err(TraceReadError::Truncated("header"));
    }
    if &data[..8] != MAGIC {
        return Err(TraceReadError::BadMagic);
    }
    let (major, minor) = (u32_at(&data, 8), u32_at(&data, 12));
    if (major, minor) != (FORMAT_MAJOR, FORMAT_MINOR) {
        return Err(TraceReadError::BadVersion(major, minor));
    }
    let mut offset = 16;
    let mut chunks = 0;
    loop {
        if offset >= data.len() {
            return Err(TraceReadError::Truncated("missing E chunk"));
        }
        let tok = data[offset];
        offset += 1;
        if offset + 4 > data.len() {
            return Err(TraceReadError::Truncated("chunk length"));
        }
        let len = u32_at(&data, offset) as usize;
        offset += 4;
        if offset + len > data.len() {
            return Err(TraceReadError::Truncated("chunk payload"));
        }
        offset += len;
        chunks += 1;
        if tok == tag::END {
            return Ok(chunks);
        }
    }
}

fn bad(chunk: char, reason: &'static str) -> TraceReadError {
    TraceReadError::BadChunk { chunk, reason }
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().expect("4 bytes"))
}

fn u64_at(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"))
}

fn parse_attributes(payload: &[u8], attrs: &mut HashMap<String, String>) -> Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    if *payload.last().expect("non-empty") != 0 {
        return Err(bad('A', "attributes not NUL terminated"));
    }
    for item in payload[..payload.len() - 1].split(|&b| b == 0) {
        let text = std::str::from_utf8(item).map_err(|_| bad('A', "non-ASCII attribute"))?;
        let (key, value) = text
            .split_once('=')
            .ok_or_else(|| bad('A', "attribute without '='"))?;
        attrs.insert(key.to_string(), value.to_string());
    }
    Ok(())
}

// Fixed prefix followed by a NUL-terminated string, repeated
fn parse_prefixed_strings(
    payload: &[u8],
    chunk: char,
    mut record: impl FnMut(&[u8], String),
) -> Result<()> {
    let mut p = 0;
    while p < payload.len() {
        if p + 16 > payload.len() {
            return Err(bad(chunk, "truncated record prefix"));
        }
        let prefix = &payload[p..p + 16];
        p += 16;
        let end = payload[p..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| bad(chunk, "unterminated string"))?;
        let text = std::str::from_utf8(&payload[p..p + end])
            .map_err(|_| bad(chunk, "invalid UTF-8"))?
            .to_string();
        p += end + 1;
        record(prefix, text);
    }
    Ok(())
}

fn parse_files(payload: &[u8], files: &mut Vec<FileInfo>) -> Result<()> {
    parse_prefixed_strings(payload, 'F', |prefix, path| {
        files.push(FileInfo {
            id: u32_at(prefix, 0),
            flags: u32_at(prefix, 4),
            size: u32_at(prefix, 8),
            mtime: u32_at(prefix, 12),
            path,
        });
    })
}

fn parse_definitions(payload: &[u8], defs: &mut Vec<DefInfo>) -> Result<()> {
    parse_prefixed_strings(payload, 'D', |prefix, name| {
        defs.push(DefInfo {
            unit: u32_at(prefix, 0),
            file: u32_at(prefix, 4),
            start_line: u32_at(prefix, 8),
            end_line: u32_at(prefix, 12),
            name,
        });
    })
}

fn parse_calls(payload: &[u8], calls: &mut Vec<CallInfo>) -> Result<()> {
    if payload.len() % 28 != 0 {
        return Err(bad('C', "length not a multiple of 28"));
    }
    for rec in payload.chunks_exact(28) {
        calls.push(CallInfo {
            file: u32_at(rec, 0),
            line: u32_at(rec, 4),
            unit: u32_at(rec, 8),
            inclusive_ticks: u64_at(rec, 12),
            exclusive_ticks: u64_at(rec, 20),
        });
    }
    Ok(())
}

fn parse_stats(payload: &[u8], lines: &mut Vec<StatInfo>) -> Result<()> {
    if payload.len() % 28 != 0 {
        return Err(bad('S', "length not a multiple of 28"));
    }
    for rec in payload.chunks_exact(28) {
        lines.push(StatInfo {
            file: u32_at(rec, 0),
            line: u32_at(rec, 4),
            calls: u32_at(rec, 8),
            inclusive_ticks: u64_at(rec, 12),
            exclusive_ticks: u64_at(rec, 20),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{TraceSnapshot, TraceWriter, WriterMode};

    #[test]
    fn test_parse_minimal_container() {
        let mut buf = Vec::new();
        TraceWriter::new(WriterMode::LineOnly)
            .write_to(&mut buf, &TraceSnapshot::default())
            .unwrap();
        let trace = parse(&buf).unwrap();
        assert!(trace.lines.is_empty());
        assert!(trace.subheader.is_none());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let buf = b"NOTPROF\0\x05\0\0\0\0\0\0\0E\0\0\0\0";
        assert!(matches!(parse(buf), Err(TraceReadError::BadMagic)));
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&9u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[b'E', 0, 0, 0, 0]);
        assert!(matches!(parse(&buf), Err(TraceReadError::BadVersion(9, 0))));
    }

    #[test]
    fn test_missing_end_marker_rejected() {
        let mut buf = Vec::new();
        TraceWriter::new(WriterMode::LineOnly)
            .write_to(&mut buf, &TraceSnapshot::default())
            .unwrap();
        // Strip the E chunk: what an aborted dump leaves behind
        buf.truncate(16);
        assert!(matches!(
            parse(&buf),
            Err(TraceReadError::Truncated("missing E chunk"))
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(b'S');
        buf.extend_from_slice(&28u32.to_le_bytes());
        buf.extend_from_slice(&[0; 10]);
        assert!(matches!(
            parse(&buf),
            Err(TraceReadError::Truncated("chunk payload"))
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(b'Z');
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(parse(&buf), Err(TraceReadError::UnknownTag('Z'))));
    }
}
