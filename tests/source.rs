use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use content_warehouse::error::WarehouseError;
use content_warehouse::source::SourceRegistry;

#[test]
fn load_all_reads_descriptors_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("mirror-eu.json"),
        r#"{
            "name": "European mirror",
            "priority": 2,
            "expires": 600,
            "base_url": "https://mirror-eu.example.com/content",
            "max_concurrent": 4
        }"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("cache.json"),
        r#"{"base_url": "https://cache.example.com"}"#,
    )
    .unwrap();
    fs::write(dir.path().join("README.txt"), "not a descriptor").unwrap();

    let registry = SourceRegistry::load_all(dir.path()).unwrap();
    assert_eq!(registry.len(), 2);

    // Id defaults to the file stem.
    let mirror = registry.get(&"mirror-eu".parse().unwrap()).unwrap();
    assert_eq!(mirror.name(), "European mirror");
    assert_eq!(mirror.priority(), 2);
    assert_eq!(mirror.expires(), Duration::from_secs(600));
    assert_eq!(mirror.max_concurrent(), Some(4));

    let cache = registry.get(&"cache".parse().unwrap()).unwrap();
    assert_eq!(cache.priority(), 0);
    assert_eq!(cache.expires(), Duration::from_secs(86_400));
    assert_eq!(cache.max_concurrent(), None);
}

#[test]
fn disabled_descriptors_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("offline.json"),
        r#"{"enabled": false, "base_url": "https://offline.example.com"}"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("online.json"),
        r#"{"base_url": "https://online.example.com"}"#,
    )
    .unwrap();

    let registry = SourceRegistry::load_all(dir.path()).unwrap();
    assert_eq!(registry.len(), 1);
    assert!(registry.get(&"online".parse().unwrap()).is_some());
}

#[test]
fn explicit_id_overrides_file_stem_and_duplicates_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("one.json"),
        r#"{"id": "mirror", "base_url": "https://one.example.com"}"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("two.json"),
        r#"{"id": "mirror", "base_url": "https://two.example.com"}"#,
    )
    .unwrap();

    let err = SourceRegistry::load_all(dir.path()).unwrap_err();
    assert_matches!(err, WarehouseError::DuplicateSource(id) if id == "mirror");
}

#[test]
fn descriptor_without_base_url_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), r#"{"priority": 1}"#).unwrap();

    let err = SourceRegistry::load_all(dir.path()).unwrap_err();
    assert_matches!(err, WarehouseError::DescriptorBaseUrl { .. });
}

#[test]
fn malformed_descriptor_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), "{not json").unwrap();

    let err = SourceRegistry::load_all(dir.path()).unwrap_err();
    assert_matches!(err, WarehouseError::DescriptorParse { .. });
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let err = SourceRegistry::load_all(&missing).unwrap_err();
    assert_matches!(err, WarehouseError::DescriptorDir(_));
}
