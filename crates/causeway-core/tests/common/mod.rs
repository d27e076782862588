//! Common fixtures for causeway-core integration tests.
//!
//! Builds small interchange files with predictable content so tests can reason about
//! record positions, edges and citations.

#![allow(dead_code)]

use causeway_core::interchange::to_json;
use causeway_core::{AssertionRecord, RelationshipDegree};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Record `i` of a fixture set: `Subject i (S{i}) -> Object i (O{i})` with two citations
pub fn sample_record(i: usize) -> AssertionRecord {
    let degree = match i % 3 {
        0 => RelationshipDegree::First,
        1 => RelationshipDegree::Second,
        _ => RelationshipDegree::Third,
    };
    AssertionRecord::new(
        format!("Subject {}", i),
        format!("S{}", i),
        format!("Object {}", i),
        format!("O{}", i),
    )
    .with_degree(degree)
    .with_citation(
        format!("{}", 10_000 + i),
        [format!("Subject {} raises the risk of object {}.", i, i)],
    )
    // Shared across every record, so compact forms deduplicate it
    .with_citation("99999", ["A shared review sentence."])
}

pub fn sample_records(n: usize) -> Vec<AssertionRecord> {
    (0..n).map(sample_record).collect()
}

/// Write `n` fixture records to `dir/name`
pub fn write_source(dir: &Path, name: &str, n: usize) -> PathBuf {
    let path = dir.join(name);
    let bytes = to_json(&sample_records(n), true).expect("serialize fixture");
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

/// Write `n` records, replacing record `bad` with a balanced but invalid JSON object
pub fn write_source_with_malformed(dir: &Path, name: &str, n: usize, bad: usize) -> PathBuf {
    write_source_with_raw(
        dir,
        name,
        n,
        bad,
        r#"{"subject_name": "Broken" "subject_cui": "X"}"#,
    )
}

/// Write `n` records, replacing record `bad` with an object whose quotes do not pair up
pub fn write_source_with_unbalanced(dir: &Path, name: &str, n: usize, bad: usize) -> PathBuf {
    write_source_with_raw(
        dir,
        name,
        n,
        bad,
        r#"{"subject_name": "Broken, "subject_cui": "X"}"#,
    )
}

/// Write `n` records, replacing record `bad` with `raw` verbatim
pub fn write_source_with_raw(
    dir: &Path,
    name: &str,
    n: usize,
    bad: usize,
    raw: &str,
) -> PathBuf {
    let mut items = Vec::with_capacity(n);
    for i in 0..n {
        if i == bad {
            items.push(raw.to_string());
        } else {
            let record = to_json(&[sample_record(i)], false).expect("serialize fixture");
            let text = String::from_utf8(record).expect("utf8");
            // Strip the surrounding array brackets
            items.push(text[1..text.len() - 1].to_string());
        }
    }
    let path = dir.join(name);
    std::fs::write(&path, format!("[\n{}\n]\n", items.join(",\n"))).expect("write fixture");
    path
}

/// Move a file's modification time `secs` seconds from now
pub fn set_mtime_offset(path: &Path, secs: i64) {
    let now = SystemTime::now();
    let time = if secs >= 0 {
        now + Duration::from_secs(secs as u64)
    } else {
        now - Duration::from_secs(secs.unsigned_abs())
    };
    File::options()
        .write(true)
        .open(path)
        .expect("open fixture")
        .set_modified(time)
        .expect("set mtime");
}
