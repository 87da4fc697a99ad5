//! Unit tests for the archive coordinator and its codecs

use backup_orchestrator::codecs::CompressionType;
use backup_orchestrator::managers::ArchiveCoordinator;
use backup_orchestrator::ArchiveError;
use rstest::rstest;
use std::fs;
use std::path::Path;
use test_utils::{create_sample_tree, tree_files, TestContext};

#[rstest]
#[case("shop.sql.gz", Some(CompressionType::Gzip))]
#[case("SITE.TAR.GZ", Some(CompressionType::Gzip))]
#[case("site.tgz", Some(CompressionType::Gzip))]
#[case("site.Zip", Some(CompressionType::Zip))]
#[case("shop.sql", None)]
#[case("shop.dump", None)]
fn test_detect_compression_type(#[case] name: &str, #[case] expected: Option<CompressionType>) {
    assert_eq!(ArchiveCoordinator::detect_compression_type(Path::new(name)), expected);
}

#[test]
fn test_gzip_file_round_trip() {
    let ctx = TestContext::new();
    let source = ctx.create_file("shop.sql", "INSERT INTO t VALUES (1);\n");
    let target = ctx.temp_dir().join("shop.sql.gz");
    let archive = ArchiveCoordinator::with_default_codecs();

    let compressed = archive.compress(&source, &target, "gzip", true).unwrap();
    assert_eq!(compressed, target);
    assert!(!source.exists(), "source should be removed");

    let out = ctx.create_subdir("out");
    let restored = archive.decompress(&compressed, Some(&out), true).unwrap();
    assert_eq!(fs::read_to_string(restored).unwrap(), "INSERT INTO t VALUES (1);\n");
    assert!(compressed.exists(), "original kept");
}

#[test]
fn test_gzip_directory_goes_through_tar() {
    let ctx = TestContext::new();
    let source = ctx.create_subdir("site");
    create_sample_tree(&source).unwrap();
    let archive = ArchiveCoordinator::with_default_codecs();

    let compressed = archive
        .compress(&source, &ctx.temp_dir().join("site.gz"), "gzip", false)
        .unwrap();
    assert!(compressed.to_string_lossy().ends_with("site.tar.gz"));
    assert!(source.exists(), "source kept when not asked to remove it");

    // No intermediate tar left behind
    let leftovers: Vec<_> = ctx
        .entries(ctx.temp_dir())
        .into_iter()
        .filter(|n| n.ends_with(".tar"))
        .collect();
    assert!(leftovers.is_empty(), "found {:?}", leftovers);

    let out = ctx.create_subdir("out");
    let restored = archive.decompress(&compressed, Some(&out), true).unwrap();
    assert_eq!(tree_files(&restored), tree_files(&source));
}

#[test]
fn test_zip_directory_round_trip() {
    let ctx = TestContext::new();
    let source = ctx.create_subdir("site");
    create_sample_tree(&source).unwrap();
    let archive = ArchiveCoordinator::with_default_codecs();

    let compressed = archive
        .compress(&source, &ctx.temp_dir().join("site.zip"), "zip", true)
        .unwrap();
    assert!(!source.exists());

    let out = ctx.create_subdir("out");
    let restored = archive.decompress(&compressed, Some(&out), true).unwrap();
    assert_eq!(
        fs::read_to_string(restored.join("data").join("records.txt")).unwrap(),
        "alpha\nbeta\n"
    );
}

#[test]
fn test_uncompressed_input_passes_through() {
    let ctx = TestContext::new();
    let source = ctx.create_file("shop.dump", "binary");
    let archive = ArchiveCoordinator::with_default_codecs();

    assert_eq!(archive.decompress(&source, None, true).unwrap(), source);
}

#[test]
fn test_unknown_codec_is_rejected() {
    let ctx = TestContext::new();
    let source = ctx.create_file("shop.sql", "x");
    let archive = ArchiveCoordinator::with_default_codecs();

    let err = archive
        .compress(&source, &ctx.temp_dir().join("shop.rar"), "rar", true)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::UnsupportedCompression(_)));
    assert!(source.exists(), "source untouched on failure");
}

#[test]
fn test_unregistered_codec_is_unavailable() {
    let ctx = TestContext::new();
    let source = ctx.create_file("shop.sql", "x");
    let archive = ArchiveCoordinator::new();

    let err = archive
        .compress(&source, &ctx.temp_dir().join("shop.zip"), "zip", true)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::CompressionAdapterUnavailable(_)));
}
