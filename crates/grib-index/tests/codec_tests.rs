//! Round-trip and corruption tests for the persisted index format.

use grib_common::{DecodeContext, GribError};
use grib_index::{Index, KeySpec};
use grib_message::StandardTables;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use test_utils::{concat_messages, MessageBuilder};

fn write_messages(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("messages.grib2");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&concat_messages(&[
        MessageBuilder::new().with_parameter(0, 0).with_level(100, 85_000).build(),
        MessageBuilder::new().with_parameter(0, 0).with_level(100, 50_000).build(),
        MessageBuilder::new().with_parameter(3, 4).with_level(100, 85_000).build(),
    ]))
    .unwrap();
    path
}

fn build(path: &PathBuf) -> Index {
    Index::build(
        DecodeContext::shared(),
        Arc::new(StandardTables::new()),
        path,
        KeySpec::parse_list("shortName,level:l").unwrap(),
    )
    .unwrap()
}

fn reload(path: &PathBuf) -> grib_common::GribResult<Index> {
    Index::read(
        DecodeContext::shared(),
        Arc::new(StandardTables::new()),
        path,
    )
}

/// Enumerate offsets for a given selection.
fn matching_offsets(index: &mut Index, short_name: &str, level: i64) -> Vec<u64> {
    index.select_string("shortName", short_name).unwrap();
    index.select_long("level", level).unwrap();
    index
        .handles()
        .map(|h| h.unwrap().message_offset().unwrap())
        .collect()
}

#[test]
fn test_round_trip_preserves_queries_and_enumeration() {
    let dir = TempDir::new().unwrap();
    let source = write_messages(&dir);
    let mut original = build(&source);

    let index_path = dir.path().join("messages.gbx");
    original.write(&index_path).unwrap();
    let mut reloaded = reload(&index_path).unwrap();

    assert_eq!(reloaded.source(), source.as_path());
    assert_eq!(reloaded.row_count(), original.row_count());
    for key in ["shortName", "level"] {
        assert_eq!(reloaded.size(key).unwrap(), original.size(key).unwrap());
        assert_eq!(reloaded.values(key).unwrap(), original.values(key).unwrap());
        assert_eq!(reloaded.kind(key).unwrap(), original.kind(key).unwrap());
    }

    // Identical selections enumerate the identical sequence.
    assert_eq!(
        matching_offsets(&mut original, "t", 850),
        matching_offsets(&mut reloaded, "t", 850)
    );
    assert_eq!(
        matching_offsets(&mut original, "z", 850),
        matching_offsets(&mut reloaded, "z", 850)
    );
}

#[test]
fn test_reloaded_index_starts_unselected() {
    let dir = TempDir::new().unwrap();
    let source = write_messages(&dir);
    let index_path = dir.path().join("messages.gbx");

    let mut original = build(&source);
    original.select_string("shortName", "t").unwrap();
    original.select_long("level", 850).unwrap();
    original.write(&index_path).unwrap();

    let mut reloaded = reload(&index_path).unwrap();
    assert!(matches!(
        reloaded.next_handle(),
        Err(GribError::MissingKey(_))
    ));
}

#[test]
fn test_bad_magic() {
    let dir = TempDir::new().unwrap();
    let source = write_messages(&dir);
    let index_path = dir.path().join("messages.gbx");
    build(&source).write(&index_path).unwrap();

    let mut bytes = std::fs::read(&index_path).unwrap();
    bytes[0..4].copy_from_slice(b"NOPE");
    std::fs::write(&index_path, &bytes).unwrap();

    assert!(matches!(
        reload(&index_path),
        Err(GribError::CorruptedIndex(reason)) if reason.contains("magic")
    ));
}

#[test]
fn test_flipped_byte_fails_checksum() {
    let dir = TempDir::new().unwrap();
    let source = write_messages(&dir);
    let index_path = dir.path().join("messages.gbx");
    build(&source).write(&index_path).unwrap();

    let mut bytes = std::fs::read(&index_path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xFF;
    std::fs::write(&index_path, &bytes).unwrap();

    assert!(matches!(
        reload(&index_path),
        Err(GribError::CorruptedIndex(reason)) if reason.contains("checksum")
    ));
}

#[test]
fn test_truncated_file() {
    let dir = TempDir::new().unwrap();
    let source = write_messages(&dir);
    let index_path = dir.path().join("messages.gbx");
    build(&source).write(&index_path).unwrap();

    let mut bytes = std::fs::read(&index_path).unwrap();
    bytes.truncate(bytes.len() - 12);
    std::fs::write(&index_path, &bytes).unwrap();

    assert!(matches!(
        reload(&index_path),
        Err(GribError::CorruptedIndex(_))
    ));
}

#[test]
fn test_unsupported_version() {
    let dir = TempDir::new().unwrap();
    let source = write_messages(&dir);
    let index_path = dir.path().join("messages.gbx");
    build(&source).write(&index_path).unwrap();

    // Patch the version and recompute the checksum so only the version
    // check can fail.
    let mut bytes = std::fs::read(&index_path).unwrap();
    bytes[4..6].copy_from_slice(&99u16.to_be_bytes());
    let body_end = bytes.len() - 4;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[4..body_end]);
    let crc = hasher.finalize();
    bytes[body_end..].copy_from_slice(&crc.to_be_bytes());
    std::fs::write(&index_path, &bytes).unwrap();

    assert!(matches!(
        reload(&index_path),
        Err(GribError::CorruptedIndex(reason)) if reason.contains("version")
    ));
}

#[test]
fn test_missing_index_file() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        reload(&dir.path().join("absent.gbx")),
        Err(GribError::FileNotFound(_))
    ));
}

#[test]
fn test_moved_source_file_fails_at_enumeration_not_load() {
    let dir = TempDir::new().unwrap();
    let source = write_messages(&dir);
    let index_path = dir.path().join("messages.gbx");
    build(&source).write(&index_path).unwrap();

    std::fs::remove_file(&source).unwrap();

    // Load succeeds: the index is a record of past extraction.
    let mut reloaded = reload(&index_path).unwrap();
    assert_eq!(reloaded.row_count(), 3);
    assert_eq!(reloaded.size("shortName").unwrap(), 2);

    // Only re-decoding a matching message touches the source.
    reloaded.select_string("shortName", "t").unwrap();
    reloaded.select_long("level", 850).unwrap();
    assert!(matches!(
        reloaded.next_handle(),
        Err(GribError::FileNotFound(_))
    ));
}
