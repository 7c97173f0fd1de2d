//! Path interning: stable small-integer file identities
//!
//! The aggregator and registry key on a `FileId` rather than on path strings
//! or host-runtime object identity. Interning happens once per distinct path,
//! off the per-event hot path for every event after the first touching that
//! file, and removes any dependency on the host runtime guaranteeing one
//! canonical interned object per path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::UNIX_EPOCH;

/// File-table flags value for a traced source file
///
/// The format uses a single flags value for every traced source file
/// (0x10, "has source").
pub const FILE_FLAGS: u32 = 0x10;

/// Dense identifier for an interned source path, starting at 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

/// One file-table entry handed to the trace writer at dump time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: u32,
    pub flags: u32,
    pub size: u32,
    pub mtime: u32,
    pub path: String,
}

/// Interning table mapping canonical path strings to `FileId`s
#[derive(Debug, Default)]
pub struct PathInterner {
    ids: HashMap<String, FileId>,
    paths: Vec<String>,
}

impl PathInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a path, returning its stable id
    ///
    /// Idempotent: the same path always yields the same id for the
    /// interner's lifetime.
    pub fn intern(&mut self, path: &str) -> FileId {
        if let Some(&id) = self.ids.get(path) {
            return id;
        }
        let id = FileId(self.paths.len() as u32);
        self.ids.insert(path.to_string(), id);
        self.paths.push(path.to_string());
        id
    }

    /// Path for a previously interned id
    pub fn path(&self, id: FileId) -> Option<&str> {
        self.paths.get(id.0 as usize).map(String::as_str)
    }

    /// Number of distinct paths interned
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Build the ordered file table for the trace writer
    ///
    /// Size and mtime come from a stat of each path at dump time; files that
    /// no longer stat (deleted, synthetic names) get zeros rather than
    /// failing the dump.
    pub fn file_table(&self) -> Vec<FileEntry> {
        self.paths
            .iter()
            .enumerate()
            .map(|(id, path)| {
                let (size, mtime) = stat_file(path);
                FileEntry {
                    id: id as u32,
                    flags: FILE_FLAGS,
                    size,
                    mtime,
                    path: path.clone(),
                }
            })
            .collect()
    }
}

fn stat_file(path: &str) -> (u32, u32) {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let size = meta.len() as u32;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0);
            (size, mtime)
        }
        Err(_) => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_intern_assigns_dense_ids() {
        let mut interner = PathInterner::new();
        assert_eq!(interner.intern("a.py"), FileId(0));
        assert_eq!(interner.intern("b.py"), FileId(1));
        assert_eq!(interner.intern("c.py"), FileId(2));
        assert_eq!(interner.len(), 3);
    }

    #[test]
    fn test_intern_idempotent() {
        let mut interner = PathInterner::new();
        let a = interner.intern("a.py");
        let b = interner.intern("b.py");
        assert_eq!(interner.intern("a.py"), a);
        assert_eq!(interner.intern("b.py"), b);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_path_lookup() {
        let mut interner = PathInterner::new();
        let id = interner.intern("/tmp/script.py");
        assert_eq!(interner.path(id), Some("/tmp/script.py"));
        assert_eq!(interner.path(FileId(99)), None);
    }

    #[test]
    fn test_file_table_missing_file_gets_zeros() {
        let mut interner = PathInterner::new();
        interner.intern("/nonexistent/definitely/not/here.py");
        let table = interner.file_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].id, 0);
        assert_eq!(table[0].flags, FILE_FLAGS);
        assert_eq!(table[0].size, 0);
        assert_eq!(table[0].mtime, 0);
    }

    #[test]
    fn test_file_table_stats_real_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"x = 1\n").unwrap();
        file.flush().unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut interner = PathInterner::new();
        interner.intern(&path);
        let table = interner.file_table();
        assert_eq!(table[0].size, 6);
        assert!(table[0].mtime > 0);
        assert_eq!(table[0].path, path);
    }
}
