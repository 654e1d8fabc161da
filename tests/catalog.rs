use std::time::Duration;

use camino::Utf8PathBuf;

use content_warehouse::catalog::{Catalog, CatalogEntry};
use content_warehouse::domain::{SourceId, UnitKey};

fn entry(source: &str, unit: &str, ttl_secs: u64) -> CatalogEntry {
    CatalogEntry::new(
        source.parse().unwrap(),
        unit.parse().unwrap(),
        format!("https://{source}.example.com/{unit}.rpm"),
        Duration::from_secs(ttl_secs),
    )
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("state").join("catalog.json")).unwrap();

    let mut catalog = Catalog::load(&path).unwrap();
    assert!(catalog.is_empty());

    let source: SourceId = "mirror".parse().unwrap();
    catalog.replace_source(
        &source,
        vec![entry("mirror", "pkg-1", 3600), entry("mirror", "pkg-2", 3600)],
    );
    catalog.save().unwrap();

    let reloaded = Catalog::load(&path).unwrap();
    assert_eq!(reloaded.entry_count(), 2);
    let unit: UnitKey = "pkg-1".parse().unwrap();
    let found = reloaded.find(&source, &unit).unwrap();
    assert_eq!(found.url, "https://mirror.example.com/pkg-1.rpm");
}

#[test]
fn stale_entries_survive_persistence_but_never_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("catalog.json")).unwrap();

    let mut catalog = Catalog::load(&path).unwrap();
    let source: SourceId = "mirror".parse().unwrap();
    catalog.replace_source(&source, vec![entry("mirror", "pkg-1", 0)]);
    catalog.save().unwrap();

    let mut reloaded = Catalog::load(&path).unwrap();
    assert_eq!(reloaded.entry_count(), 1);
    assert!(!reloaded.has_entries(&source));
    assert!(reloaded.find(&source, &"pkg-1".parse().unwrap()).is_none());

    reloaded.purge_expired();
    assert_eq!(reloaded.entry_count(), 0);
}

#[test]
fn in_memory_catalog_save_is_a_noop() {
    let mut catalog = Catalog::new();
    catalog.replace_source(
        &"mirror".parse().unwrap(),
        vec![entry("mirror", "pkg-1", 3600)],
    );
    catalog.save().unwrap();
}
