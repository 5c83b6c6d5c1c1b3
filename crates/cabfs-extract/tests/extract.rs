//! End-to-end extraction over a synthetic encrypted tree
//!
//! Builds a real container, lays files out at their sharded locations, and
//! drives the full pipeline: keyring discovery, manifest walk, decryption,
//! and per-item accounting.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use cabfs_core::ManifestNode;
use cabfs_extract::pipeline::KEYRING_NAME;
use cabfs_extract::{shard_path, ExtractOptions, Extractor, PathObfuscator};
use cabfs_keyring::fixtures::ContainerBuilder;
use cabfs_keyring::{seal, KEY_SIZE};

const OWNER: &str = "05";

fn write_at(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// A tree with two content keys: index 0 for metadata, index 1 for payloads.
fn setup(root: &Path) -> ContainerBuilder {
    let mut builder = ContainerBuilder::new(OWNER, "2.1.7", vec![0x3Bu8; 16]);
    builder.add_key([0x5Au8; KEY_SIZE]);
    builder.add_key([0xC4u8; KEY_SIZE]);

    let mut obfuscator = PathObfuscator::new(OWNER);
    write_at(root, &obfuscator.obfuscate(KEYRING_NAME), &builder.build());
    builder
}

fn dir(name: &str, children: Vec<ManifestNode>) -> ManifestNode {
    ManifestNode::Dir {
        name: name.to_string(),
        children,
    }
}

fn file(name: &str, digest: Option<Vec<u8>>, key: Option<u32>) -> ManifestNode {
    ManifestNode::File {
        name: name.to_string(),
        storage_digest: digest,
        key_index: key,
    }
}

#[test]
fn test_extract_end_to_end() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let builder = setup(src.path());

    // Encrypted payload at its logical path, key index 1.
    let payload = b"BGM track data, several blocks of it".repeat(97);
    let mut framed = Vec::new();
    seal(&mut framed, &builder.content_key(1), &payload).unwrap();
    write_at(src.path(), "sound/bgm_001.bin", &framed);

    // Plaintext entry stored at an obfuscated location.
    let digest: Vec<u8> = (40u8..60).collect();
    write_at(
        src.path(),
        &shard_path(&digest).unwrap(),
        b"plain configuration",
    );

    let manifest = dir(
        "",
        vec![
            dir("sound", vec![file("bgm_001.bin", None, Some(1))]),
            file("settings.ini", Some(digest), None),
            file("ghost.bin", None, None),
        ],
    );

    let source = builder.key_source();
    let mut extractor = Extractor::open(src.path(), &source).unwrap();
    let summary = extractor
        .extract(&manifest, dest.path(), &ExtractOptions::default())
        .unwrap();

    assert_eq!(summary.extracted, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.missing, 1, "absent source must be counted, not fatal");
    assert!(!summary.canceled);

    let out = std::fs::read(dest.path().join("sound/bgm_001.bin")).unwrap();
    assert_eq!(out, payload);
    let out = std::fs::read(dest.path().join("settings.ini")).unwrap();
    assert_eq!(out, b"plain configuration");
    assert!(!dest.path().join("ghost.bin").exists());
}

#[test]
fn test_extract_single_file_fixture() {
    // The minimal scenario: one directory, one encrypted file, no override.
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let mut builder = ContainerBuilder::new(OWNER, "1.0.0", vec![0x77u8; 16]);
    builder.add_key([0x08u8; KEY_SIZE]);
    builder.add_key([0x99u8; KEY_SIZE]);
    let mut obfuscator = PathObfuscator::new(OWNER);
    write_at(
        src.path(),
        &obfuscator.obfuscate(KEYRING_NAME),
        &builder.build(),
    );

    let plaintext = b"known plaintext fixture";
    let mut framed = Vec::new();
    seal(&mut framed, &builder.content_key(1), plaintext).unwrap();
    write_at(src.path(), "docs/manual.txt", &framed);

    let manifest = dir(
        "",
        vec![dir("docs", vec![file("manual.txt", None, Some(1))])],
    );

    let source = builder.key_source();
    let mut extractor = Extractor::open(src.path(), &source).unwrap();
    let summary = extractor
        .extract(&manifest, dest.path(), &ExtractOptions::default())
        .unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(
        std::fs::read(dest.path().join("docs/manual.txt")).unwrap(),
        plaintext
    );
}

#[test]
fn test_key_index_zero_passes_through() {
    // Index 0 marks an entry as stored unencrypted; the bytes on disk are
    // already the fixture.
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let mut builder = ContainerBuilder::new(OWNER, "1.0.0", vec![0x10u8; 16]);
    builder.add_key([0xEEu8; KEY_SIZE]);
    let mut obfuscator = PathObfuscator::new(OWNER);
    write_at(
        src.path(),
        &obfuscator.obfuscate(KEYRING_NAME),
        &builder.build(),
    );

    write_at(src.path(), "plain/readme.txt", b"stored in the clear");
    let manifest = dir(
        "",
        vec![dir("plain", vec![file("readme.txt", None, Some(0))])],
    );

    let source = builder.key_source();
    let mut extractor = Extractor::open(src.path(), &source).unwrap();
    let summary = extractor
        .extract(&manifest, dest.path(), &ExtractOptions::default())
        .unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.failed + summary.missing, 0);
    assert_eq!(
        std::fs::read(dest.path().join("plain/readme.txt")).unwrap(),
        b"stored in the clear"
    );
}

#[test]
fn test_bad_key_index_counts_as_failed() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let builder = setup(src.path());

    write_at(src.path(), "data.bin", b"whatever");
    let manifest = dir("", vec![file("data.bin", None, Some(9))]);

    let source = builder.key_source();
    let mut extractor = Extractor::open(src.path(), &source).unwrap();
    let summary = extractor
        .extract(&manifest, dest.path(), &ExtractOptions::default())
        .unwrap();

    // Key resolution errors are surfaced per item, not swallowed and not
    // fatal to the walk.
    assert_eq!(summary.extracted, 0);
    assert_eq!(summary.failed, 1);
    assert!(!dest.path().join("data.bin").exists());
}

#[test]
fn test_cancellation_stops_the_walk() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let builder = setup(src.path());

    write_at(src.path(), "a.bin", b"a");
    write_at(src.path(), "b.bin", b"b");
    let manifest = dir(
        "",
        vec![file("a.bin", None, None), file("b.bin", None, None)],
    );

    let cancel = Arc::new(AtomicBool::new(true));
    let options = ExtractOptions {
        workers: 1,
        cancel: Arc::clone(&cancel),
    };

    let source = builder.key_source();
    let mut extractor = Extractor::open(src.path(), &source).unwrap();
    let summary = extractor.extract(&manifest, dest.path(), &options).unwrap();

    assert!(summary.canceled);
    assert_eq!(summary.extracted, 0);
    assert!(cancel.load(Ordering::Relaxed));
}

#[test]
fn test_read_obfuscated_metadata() {
    let src = TempDir::new().unwrap();
    let builder = setup(src.path());

    // The file list is stored obfuscated and encrypted under key index 0.
    let listing = b"<fileinfo/>";
    let mut framed = Vec::new();
    seal(&mut framed, &builder.content_key(0), listing).unwrap();
    let mut obfuscator = PathObfuscator::new(OWNER);
    write_at(src.path(), &obfuscator.obfuscate("file.inf"), &framed);

    let source = builder.key_source();
    let mut extractor = Extractor::open(src.path(), &source).unwrap();

    let bytes = extractor.read_obfuscated("file.inf", Some(0)).unwrap();
    assert_eq!(bytes, listing);

    // Raw read of the container itself.
    let raw = extractor.read_obfuscated(KEYRING_NAME, None).unwrap();
    assert_eq!(raw, builder.build());
}
