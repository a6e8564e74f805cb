// tests/manifest_fixture.rs

use forex_bot::manifest::{check_manifest_file, normalize_name, parse_manifest, ManifestError};
use std::collections::HashSet;
use std::path::PathBuf;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/requirements.txt")
}

#[test]
fn test_fixture_manifest_is_valid() {
    let manifest = check_manifest_file(fixture()).unwrap();
    assert_eq!(manifest.groups.len(), 9);
    assert_eq!(manifest.groups[0].title.as_deref(), Some("MetaTrader integration"));

    let torch = manifest.get("torch").unwrap();
    assert_eq!(torch.name, "torch");
    assert_eq!(torch.version, "2.0.1");

    let mut seen = HashSet::new();
    for req in manifest.requirements() {
        assert!(seen.insert(normalize_name(&req.name)), "duplicate {}", req.name);
    }
    assert_eq!(seen.len(), manifest.len());
}

#[test]
fn test_fixture_renders_back_to_itself() {
    let text = std::fs::read_to_string(fixture()).unwrap();
    let manifest = parse_manifest(&text).unwrap();
    assert_eq!(manifest.render(), text);
}

#[test]
fn test_appended_duplicate_is_rejected() {
    let mut text = std::fs::read_to_string(fixture()).unwrap();
    text.push_str("\nNumPy==1.26.0\n");
    match parse_manifest(&text) {
        Err(ManifestError::DuplicatePackage { name, first_line, .. }) => {
            assert_eq!(name, "NumPy");
            assert_eq!(first_line, 6);
        }
        other => panic!("expected duplicate error, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let path = fixture().with_file_name("missing.txt");
    assert!(matches!(check_manifest_file(path), Err(ManifestError::Io(_))));
}
