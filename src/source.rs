use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::SourceId;
use crate::error::WarehouseError;

const DEFAULT_EXPIRES_SECS: u64 = 86_400;

/// One alternate content source: where it lives, how eagerly it is tried, and
/// how long its catalog entries stay fresh. Built once at registry load and
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct ContentSource {
    id: SourceId,
    name: Option<String>,
    priority: u32,
    expires: Duration,
    base_url: String,
    max_concurrent: Option<usize>,
}

impl ContentSource {
    pub fn new(
        id: SourceId,
        priority: u32,
        expires: Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: None,
            priority,
            expires,
            base_url: base_url.into(),
            max_concurrent: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn expires(&self) -> Duration {
        self.expires
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent
    }

    /// Resolve a source-relative address against `base_url`. Absolute
    /// addresses pass through untouched.
    pub fn unit_url(&self, address: &str) -> String {
        if address.starts_with("http://") || address.starts_with("https://") {
            return address.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            address.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct SourceDescriptor {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: u32,
    #[serde(default = "default_expires")]
    expires: u64,
    base_url: Option<String>,
    #[serde(default)]
    max_concurrent: Option<usize>,
}

fn default_enabled() -> bool {
    true
}

fn default_expires() -> u64 {
    DEFAULT_EXPIRES_SECS
}

/// The set of registered content sources, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceId, ContentSource>,
}

impl SourceRegistry {
    /// Load every `*.json` descriptor in `dir`. Descriptors without an `id`
    /// field take the file stem; disabled descriptors are skipped.
    pub fn load_all(dir: &Path) -> Result<Self, WarehouseError> {
        let entries =
            fs::read_dir(dir).map_err(|_| WarehouseError::DescriptorDir(dir.to_path_buf()))?;

        let mut sources = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| WarehouseError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let content = fs::read_to_string(&path)
                .map_err(|_| WarehouseError::DescriptorDir(dir.to_path_buf()))?;
            let descriptor: SourceDescriptor =
                serde_json::from_str(&content).map_err(|err| WarehouseError::DescriptorParse {
                    path: path.clone(),
                    message: err.to_string(),
                })?;
            if !descriptor.enabled {
                tracing::debug!(path = %path.display(), "skipping disabled content source");
                continue;
            }
            let raw_id = match descriptor.id {
                Some(id) => id,
                None => path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_default(),
            };
            let id: SourceId = raw_id.parse()?;
            let base_url = descriptor
                .base_url
                .ok_or_else(|| WarehouseError::DescriptorBaseUrl { path: path.clone() })?;
            let mut source = ContentSource::new(
                id,
                descriptor.priority,
                Duration::from_secs(descriptor.expires),
                base_url,
            );
            if let Some(name) = descriptor.name {
                source = source.with_name(name);
            }
            if let Some(max_concurrent) = descriptor.max_concurrent {
                source = source.with_max_concurrent(max_concurrent);
            }
            sources.push(source);
        }

        Self::from_sources(sources)
    }

    pub fn from_sources(sources: Vec<ContentSource>) -> Result<Self, WarehouseError> {
        let mut map = BTreeMap::new();
        for source in sources {
            let id = source.id().clone();
            if map.insert(id.clone(), source).is_some() {
                return Err(WarehouseError::DuplicateSource(id.as_str().to_string()));
            }
        }
        Ok(Self { sources: map })
    }

    pub fn get(&self, id: &SourceId) -> Option<&ContentSource> {
        self.sources.get(id)
    }

    /// Sources in dispatch order: ascending priority, ties broken by id.
    pub fn ordered(&self) -> Vec<&ContentSource> {
        let mut ordered: Vec<&ContentSource> = self.sources.values().collect();
        ordered.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.id().cmp(b.id()))
        });
        ordered
    }

    pub fn ids(&self) -> impl Iterator<Item = &SourceId> {
        self.sources.keys()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, priority: u32) -> ContentSource {
        ContentSource::new(
            id.parse().unwrap(),
            priority,
            Duration::from_secs(3600),
            format!("https://{id}.example.com/content"),
        )
    }

    #[test]
    fn ordered_by_priority_then_id() {
        let registry = SourceRegistry::from_sources(vec![
            source("charlie", 1),
            source("alpha", 2),
            source("bravo", 1),
        ])
        .unwrap();

        let ids: Vec<&str> = registry
            .ordered()
            .iter()
            .map(|s| s.id().as_str())
            .collect();
        assert_eq!(ids, vec!["bravo", "charlie", "alpha"]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = SourceRegistry::from_sources(vec![source("dup", 0), source("dup", 1)])
            .unwrap_err();
        assert!(matches!(err, WarehouseError::DuplicateSource(id) if id == "dup"));
    }

    #[test]
    fn unit_url_join() {
        let s = source("mirror", 0);
        assert_eq!(
            s.unit_url("/packages/zsh.rpm"),
            "https://mirror.example.com/content/packages/zsh.rpm"
        );
        assert_eq!(
            s.unit_url("https://elsewhere.example.com/zsh.rpm"),
            "https://elsewhere.example.com/zsh.rpm"
        );
    }
}
