use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{SourceId, UnitKey};
use crate::error::WarehouseError;

/// One catalog fact: source `source_id` can supply unit `unit_key` at `url`,
/// believed until `expires`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub source_id: SourceId,
    pub unit_key: UnitKey,
    pub url: String,
    pub written: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn new(source_id: SourceId, unit_key: UnitKey, url: impl Into<String>, ttl: Duration) -> Self {
        let written = Utc::now();
        let delta = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires = written
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            source_id,
            unit_key,
            url: url.into(),
            written,
            expires,
        }
    }

    pub fn is_fresh(&self) -> bool {
        Utc::now() < self.expires
    }
}

/// TTL-cached index of which content source can supply which unit.
///
/// Entries are arena-mapped per source id so a whole source's knowledge can be
/// replaced or purged in one step. At most one entry exists per
/// (source id, unit key) pair; last write wins.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: BTreeMap<SourceId, BTreeMap<UnitKey, CatalogEntry>>,
    path: Option<Utf8PathBuf>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a catalog bound to `path`. A missing file yields an empty catalog
    /// that will be created on the first `save`.
    pub fn load(path: &Utf8Path) -> Result<Self, WarehouseError> {
        if !path.as_std_path().exists() {
            return Ok(Self {
                entries: BTreeMap::new(),
                path: Some(path.to_owned()),
            });
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| WarehouseError::CatalogRead(path.as_std_path().to_path_buf()))?;
        let flat: Vec<CatalogEntry> = serde_json::from_str(&content)
            .map_err(|err| WarehouseError::CatalogParse(err.to_string()))?;

        let mut entries: BTreeMap<SourceId, BTreeMap<UnitKey, CatalogEntry>> = BTreeMap::new();
        for entry in flat {
            entries
                .entry(entry.source_id.clone())
                .or_default()
                .insert(entry.unit_key.clone(), entry);
        }
        Ok(Self {
            entries,
            path: Some(path.to_owned()),
        })
    }

    /// Write the catalog to its bound path, atomically. A no-op for unbound
    /// (in-memory) catalogs.
    pub fn save(&self) -> Result<(), WarehouseError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let parent = path
            .parent()
            .ok_or_else(|| WarehouseError::Filesystem("invalid catalog path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| WarehouseError::Filesystem(err.to_string()))?;

        let flat: Vec<&CatalogEntry> = self
            .entries
            .values()
            .flat_map(|units| units.values())
            .collect();
        let content = serde_json::to_vec_pretty(&flat)
            .map_err(|err| WarehouseError::CatalogParse(err.to_string()))?;

        let mut temp = tempfile::Builder::new()
            .prefix("catalog")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| WarehouseError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| WarehouseError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| WarehouseError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Replace every entry contributed by `source_id`; stale units the source
    /// no longer advertises disappear with the old arena.
    pub fn replace_source(&mut self, source_id: &SourceId, entries: Vec<CatalogEntry>) {
        let mut units = BTreeMap::new();
        for entry in entries {
            units.insert(entry.unit_key.clone(), entry);
        }
        self.entries.insert(source_id.clone(), units);
    }

    /// Fresh entry for (source, unit), if the catalog knows one.
    pub fn find(&self, source_id: &SourceId, unit_key: &UnitKey) -> Option<&CatalogEntry> {
        self.entries
            .get(source_id)?
            .get(unit_key)
            .filter(|entry| entry.is_fresh())
    }

    /// Whether at least one fresh entry exists for `source_id`.
    pub fn has_entries(&self, source_id: &SourceId) -> bool {
        self.entries
            .get(source_id)
            .map(|units| units.values().any(CatalogEntry::is_fresh))
            .unwrap_or(false)
    }

    pub fn purge_expired(&mut self) {
        let now = Utc::now();
        for units in self.entries.values_mut() {
            units.retain(|_, entry| now < entry.expires);
        }
        self.entries.retain(|_, units| !units.is_empty());
    }

    /// Drop entries whose source id is no longer registered.
    pub fn purge_orphans(&mut self, valid_ids: &BTreeSet<SourceId>) {
        self.entries.retain(|id, _| valid_ids.contains(id));
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(|units| units.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SourceId {
        s.parse().unwrap()
    }

    fn key(s: &str) -> UnitKey {
        s.parse().unwrap()
    }

    fn entry(source: &str, unit: &str, ttl_secs: u64) -> CatalogEntry {
        CatalogEntry::new(
            id(source),
            key(unit),
            format!("https://{source}.example.com/{unit}"),
            Duration::from_secs(ttl_secs),
        )
    }

    #[test]
    fn fresh_lookup_and_expiry() {
        let mut catalog = Catalog::new();
        catalog.replace_source(&id("mirror"), vec![entry("mirror", "pkg-1", 3600)]);
        assert!(catalog.find(&id("mirror"), &key("pkg-1")).is_some());
        assert!(catalog.has_entries(&id("mirror")));

        // Zero TTL is stale the moment it is written.
        catalog.replace_source(&id("mirror"), vec![entry("mirror", "pkg-1", 0)]);
        assert!(catalog.find(&id("mirror"), &key("pkg-1")).is_none());
        assert!(!catalog.has_entries(&id("mirror")));
    }

    #[test]
    fn replace_is_atomic_not_merge() {
        let mut catalog = Catalog::new();
        catalog.replace_source(
            &id("mirror"),
            vec![entry("mirror", "pkg-1", 3600), entry("mirror", "pkg-2", 3600)],
        );
        catalog.replace_source(&id("mirror"), vec![entry("mirror", "pkg-2", 3600)]);

        assert!(catalog.find(&id("mirror"), &key("pkg-1")).is_none());
        assert!(catalog.find(&id("mirror"), &key("pkg-2")).is_some());
        assert_eq!(catalog.entry_count(), 1);
    }

    #[test]
    fn purge_expired_drops_stale_arenas() {
        let mut catalog = Catalog::new();
        catalog.replace_source(&id("stale"), vec![entry("stale", "pkg-1", 0)]);
        catalog.replace_source(&id("live"), vec![entry("live", "pkg-1", 3600)]);

        catalog.purge_expired();
        assert!(!catalog.has_entries(&id("stale")));
        assert!(catalog.has_entries(&id("live")));
        assert_eq!(catalog.entry_count(), 1);
    }

    #[test]
    fn purge_orphans_keeps_registered_sources() {
        let mut catalog = Catalog::new();
        catalog.replace_source(&id("kept"), vec![entry("kept", "pkg-1", 3600)]);
        catalog.replace_source(&id("gone"), vec![entry("gone", "pkg-1", 3600)]);

        let valid: BTreeSet<SourceId> = [id("kept")].into_iter().collect();
        catalog.purge_orphans(&valid);

        assert!(catalog.has_entries(&id("kept")));
        assert!(!catalog.has_entries(&id("gone")));
    }
}
