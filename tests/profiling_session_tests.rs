//! End-to-end session scenarios: events in, verified trace out

use serial_test::serial;
use std::path::PathBuf;
use trazar::reader;
use trazar::{CallSite, CodeUnit, ProfileError, Session, SessionConfig, WriterMode};

fn temp_out() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trazar.out");
    (dir, path)
}

fn module(file: &str) -> CodeUnit<'_> {
    CodeUnit {
        file,
        start_line: 1,
        end_line: 1,
        name: "<module>",
    }
}

#[test]
#[serial]
fn line_deltas_aggregate_per_line() {
    let (_dir, path) = temp_out();
    let mut session =
        Session::start(SessionConfig::new(&path, 0).mode(WriterMode::LineOnly)).unwrap();

    // Deltas 5, 7, 3 on line 10 and 2, 4 on line 20, interleaved. The first
    // event anchors the stream clock and contributes zero.
    session.line_event("a.py", 10, 1_000);
    session.line_event("a.py", 10, 1_500);
    session.line_event("a.py", 20, 1_700);
    session.line_event("a.py", 10, 2_000);
    session.line_event("a.py", 20, 2_400);
    session.end().unwrap();

    let trace = reader::read_file(&path).unwrap();
    assert_eq!(trace.lines.len(), 2);
    let line10 = trace.lines.iter().find(|l| l.line == 10).unwrap();
    let line20 = trace.lines.iter().find(|l| l.line == 20).unwrap();

    assert_eq!(line10.calls, 3);
    assert_eq!(line10.inclusive_ticks, 8); // (0 + 500 + 300) ns -> 8 ticks
    assert_eq!(line10.exclusive_ticks, 8);
    assert_eq!(line20.calls, 2);
    assert_eq!(line20.inclusive_ticks, 6); // (200 + 400) ns -> 6 ticks
    assert_eq!(line20.exclusive_ticks, 6);
}

#[test]
#[serial]
fn nested_calls_split_inclusive_and_exclusive() {
    let (_dir, path) = temp_out();
    let mut session = Session::start(SessionConfig::new(&path, 0)).unwrap();

    session.call_enter(None, module("a.py"), 0);
    session.call_enter(
        Some(CallSite {
            file: "a.py",
            line: 3,
        }),
        CodeUnit {
            file: "a.py",
            start_line: 10,
            end_line: 12,
            name: "inner",
        },
        1_000,
    );
    session.call_exit(3_000); // inner: inclusive 2000ns
    session.call_exit(5_000); // module: inclusive 5000ns, exclusive 3000ns
    session.end().unwrap();

    let trace = reader::read_file(&path).unwrap();
    assert_eq!(trace.calls.len(), 2);

    let inner = &trace.calls[0];
    assert_eq!(inner.unit, 2);
    assert_eq!(inner.inclusive_ticks, 20);
    assert_eq!(inner.exclusive_ticks, 20);
    assert_eq!(inner.line, 3);

    let outer = &trace.calls[1];
    assert_eq!(outer.unit, 1);
    assert_eq!(outer.inclusive_ticks, 50);
    assert_eq!(outer.exclusive_ticks, 30);
}

#[test]
#[serial]
fn repeated_calls_reuse_unit_ids() {
    let (_dir, path) = temp_out();
    let mut session = Session::start(SessionConfig::new(&path, 0)).unwrap();

    let unit = CodeUnit {
        file: "a.py",
        start_line: 5,
        end_line: 7,
        name: "hot",
    };
    for i in 0..3u64 {
        session.call_enter(None, unit, i * 100);
        session.call_exit(i * 100 + 50);
    }
    session.end().unwrap();

    let trace = reader::read_file(&path).unwrap();
    assert_eq!(trace.definitions.len(), 1);
    assert_eq!(trace.calls.len(), 3);
    assert!(trace.calls.iter().all(|c| c.unit == 1));
}

#[test]
#[serial]
fn depth_ceiling_caps_emitted_records() {
    let (_dir, path) = temp_out();
    let mut session =
        Session::start(SessionConfig::new(&path, 0).max_stack_depth(4)).unwrap();

    let unit = CodeUnit {
        file: "deep.py",
        start_line: 1,
        end_line: 2,
        name: "recurse",
    };
    for depth in 0..10u64 {
        session.call_enter(None, unit, depth);
    }
    for depth in 0..10u64 {
        session.call_exit(100 + depth);
    }
    session.end().unwrap();

    let trace = reader::read_file(&path).unwrap();
    assert_eq!(trace.calls.len(), 4);
    assert_eq!(trace.attributes.get("dropped_frames").unwrap(), "6");
}

#[test]
#[serial]
fn ring_exhaustion_reported_in_attributes() {
    let (_dir, path) = temp_out();
    let mut session =
        Session::start(SessionConfig::new(&path, 0).ring_capacity(8)).unwrap();

    for line in 1..=20 {
        session.line_event("big.py", line, u64::from(line) * 10);
    }
    session.end().unwrap();

    let trace = reader::read_file(&path).unwrap();
    assert_eq!(trace.lines.len(), 8);
    assert_eq!(trace.attributes.get("dropped_lines").unwrap(), "12");
}

#[test]
#[serial]
fn multiple_files_share_one_file_table() {
    let (_dir, path) = temp_out();
    let mut session =
        Session::start(SessionConfig::new(&path, 0).mode(WriterMode::LineOnly)).unwrap();

    session.line_event("a.py", 1, 10);
    session.line_event("b.py", 1, 20);
    session.line_event("a.py", 2, 30);
    session.end().unwrap();

    let trace = reader::read_file(&path).unwrap();
    assert_eq!(trace.files.len(), 2);
    let ids: Vec<u32> = trace.files.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(trace.files[0].path, "a.py");
    assert_eq!(trace.files[1].path, "b.py");
    // Lines reference the interned ids
    assert!(trace.lines.iter().any(|l| l.file == 1 && l.line == 1));
}

#[test]
#[serial]
fn second_session_after_end_is_allowed() {
    let (_dir, path) = temp_out();
    Session::start(SessionConfig::new(&path, 0))
        .unwrap()
        .end()
        .unwrap();
    let again = Session::start(SessionConfig::new(&path, 0));
    assert!(again.is_ok());
    again.unwrap().end().unwrap();
}

#[test]
#[serial]
fn overlapping_session_start_fails() {
    let (_dir, path) = temp_out();
    let live = Session::start(SessionConfig::new(&path, 0)).unwrap();
    assert!(matches!(
        Session::start(SessionConfig::new(&path, 0)),
        Err(ProfileError::SessionActive)
    ));
    live.end().unwrap();
}

#[test]
#[serial]
fn top_level_inclusive_sum_bounded_by_session_span() {
    let (_dir, path) = temp_out();
    let mut session = Session::start(SessionConfig::new(&path, 0)).unwrap();

    let unit = CodeUnit {
        file: "a.py",
        start_line: 1,
        end_line: 1,
        name: "step",
    };
    // Three sequential top-level calls inside a 10_000ns session span
    let spans = [(0, 2_000), (3_000, 4_500), (5_000, 10_000)];
    for (start, end) in spans {
        session.call_enter(None, unit, start);
        session.call_exit(end);
    }
    session.end().unwrap();

    let trace = reader::read_file(&path).unwrap();
    let total: u64 = trace.calls.iter().map(|c| c.inclusive_ticks).sum();
    assert!(total <= 100); // 10_000ns -> 100 ticks
    assert_eq!(total, 20 + 15 + 50);
}
