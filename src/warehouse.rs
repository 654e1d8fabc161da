use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::catalog::{Catalog, CatalogEntry};
use crate::domain::SourceId;
use crate::error::WarehouseError;
use crate::events::{EventBridge, Listener, notify};
use crate::manifest::ManifestClient;
use crate::request::Request;
use crate::source::SourceRegistry;
use crate::transport::{DownloadJob, Transport, TransportFactory};

/// Outcome of refreshing one source's catalog entries.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub source_id: SourceId,
    pub units: usize,
    pub errors: Vec<String>,
}

impl RefreshReport {
    pub fn new(source_id: SourceId, units: usize) -> Self {
        Self {
            source_id,
            units,
            errors: Vec::new(),
        }
    }

    pub fn failed(source_id: SourceId, error: impl Into<String>) -> Self {
        Self {
            source_id,
            units: 0,
            errors: vec![error.into()],
        }
    }

    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The failover download orchestrator.
///
/// Owns the content-source registry and the catalog for its lifetime. Each
/// download run walks rounds of collated batches: every still-unsatisfied
/// request advances one candidate per round, batches are grouped per source,
/// and the primary source is only ever reached after every alternate has been
/// exhausted.
pub struct Warehouse<M: ManifestClient, F: TransportFactory> {
    sources: SourceRegistry,
    catalog: Mutex<Catalog>,
    manifest: M,
    transports: F,
    listener: Option<Box<dyn Listener>>,
    cancelled: AtomicBool,
}

impl<M: ManifestClient, F: TransportFactory> Warehouse<M, F> {
    pub fn new(sources: SourceRegistry, catalog: Catalog, manifest: M, transports: F) -> Self {
        Self {
            sources,
            catalog: Mutex::new(catalog),
            manifest,
            transports,
            listener: None,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_listener(mut self, listener: Box<dyn Listener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Request cooperative cancellation. Checked before each source refresh,
    /// before each collation round, and on every transport event delivery.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Download each request from the best available source, falling back
    /// through alternates in priority order and finally to `primary`.
    ///
    /// Per-unit failures never surface here; they accumulate on the requests
    /// and reach the caller through the listener. At most one success or one
    /// terminal failure notification fires per request per run.
    pub fn download(&self, primary: &dyn Transport, requests: &mut [Request]) {
        self.reset();
        self.refresh(false);
        {
            let catalog = self.catalog();
            for request in requests.iter_mut() {
                request.find_sources(&self.sources, &catalog);
            }
        }
        while !self.is_cancelled() {
            let collated = collated(requests);
            if collated.is_empty() {
                // Every request either succeeded or ran out of sources.
                break;
            }
            for (source_id, jobs) in collated {
                let held: Box<dyn Transport>;
                let active: &dyn Transport = if source_id.is_primary() {
                    primary
                } else {
                    let Some(source) = self.sources.get(&source_id) else {
                        self.fail_batch(requests, &jobs, "content source no longer registered");
                        continue;
                    };
                    match self.transports.transport_for(source) {
                        Ok(transport) => {
                            held = transport;
                            held.as_ref()
                        }
                        Err(err) => {
                            tracing::error!(source = %source_id, error = %err, "downloader unavailable");
                            self.fail_batch(requests, &jobs, &err.to_string());
                            continue;
                        }
                    }
                };
                tracing::debug!(source = %source_id, jobs = jobs.len(), "dispatching batch");
                let mut bridge = EventBridge::new(
                    &self.cancelled,
                    self.listener.as_deref(),
                    active,
                    requests,
                );
                active.download(&jobs, &mut bridge);
            }
        }
    }

    fn fail_batch(&self, requests: &mut [Request], jobs: &[DownloadJob], message: &str) {
        for job in jobs {
            let Some(request) = requests.get_mut(job.request) else {
                continue;
            };
            request.record_error(message);
            if !request.has_source() {
                if let Some(listener) = self.listener.as_deref() {
                    notify("download_failed", || listener.download_failed(request));
                }
            }
        }
    }

    /// Rebuild catalog entries from each source's remote manifest. Sources
    /// with fresh entries are skipped unless `force`; per-source failures
    /// become error-bearing reports without stopping the rest. Expired
    /// entries are purged at the end, cancelled or not.
    pub fn refresh(&self, force: bool) -> Vec<RefreshReport> {
        let mut reports = Vec::new();
        for source in self.sources.ordered() {
            if self.is_cancelled() {
                tracing::debug!("refresh cancelled");
                break;
            }
            if !force && self.catalog().has_entries(source.id()) {
                continue;
            }
            match self.manifest.fetch_manifest(source) {
                Ok(manifest) => {
                    let entries: Vec<CatalogEntry> = manifest
                        .units
                        .into_iter()
                        .map(|unit| {
                            CatalogEntry::new(
                                source.id().clone(),
                                unit.key,
                                source.unit_url(&unit.path),
                                source.expires(),
                            )
                        })
                        .collect();
                    let report = RefreshReport::new(source.id().clone(), entries.len());
                    self.catalog().replace_source(source.id(), entries);
                    tracing::info!(source = %source.id(), units = report.units, "catalog refreshed");
                    reports.push(report);
                }
                Err(err) => {
                    tracing::error!(source = %source.id(), error = %err, "refresh failed");
                    reports.push(RefreshReport::failed(source.id().clone(), err.to_string()));
                }
            }
        }
        self.catalog().purge_expired();
        reports
    }

    /// Drop catalog entries contributed by sources that are no longer
    /// registered. Run after a registry reload.
    pub fn purge_orphans(&self) {
        let valid: BTreeSet<SourceId> = self.sources.ids().cloned().collect();
        self.catalog().purge_orphans(&valid);
    }

    pub fn purge_expired(&self) {
        self.catalog().purge_expired();
    }

    pub fn catalog_entry_count(&self) -> usize {
        self.catalog().entry_count()
    }

    /// Save the catalog to its bound path, if any.
    pub fn persist(&self) -> Result<(), WarehouseError> {
        self.catalog().save()
    }
}

/// Group the current round's pending transfers by their next candidate
/// source. Requests already downloaded or out of candidates drop out; an
/// empty collation ends the run.
fn collated(requests: &mut [Request]) -> BTreeMap<SourceId, Vec<DownloadJob>> {
    let mut collated: BTreeMap<SourceId, Vec<DownloadJob>> = BTreeMap::new();
    for (index, request) in requests.iter_mut().enumerate() {
        let Some(candidate) = request.next_source() else {
            continue;
        };
        collated
            .entry(candidate.source_id)
            .or_default()
            .push(DownloadJob {
                url: candidate.url,
                destination: request.destination().to_path_buf(),
                request: index,
            });
    }
    collated
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::source::ContentSource;

    use super::*;

    fn registry(specs: &[(&str, u32)]) -> SourceRegistry {
        SourceRegistry::from_sources(
            specs
                .iter()
                .map(|(id, priority)| {
                    ContentSource::new(
                        id.parse().unwrap(),
                        *priority,
                        Duration::from_secs(3600),
                        format!("https://{id}.example.com"),
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    fn advertise(catalog: &mut Catalog, source: &str, unit: &str) {
        let source_id: SourceId = source.parse().unwrap();
        catalog.replace_source(
            &source_id,
            vec![CatalogEntry::new(
                source_id.clone(),
                unit.parse().unwrap(),
                format!("https://{source}.example.com/{unit}"),
                Duration::from_secs(3600),
            )],
        );
    }

    #[test]
    fn collation_groups_by_next_candidate_source() {
        let registry = registry(&[("a", 1), ("b", 2)]);
        let mut catalog = Catalog::new();
        advertise(&mut catalog, "a", "pkg-1");
        advertise(&mut catalog, "b", "pkg-2");

        let mut requests = vec![
            Request::new(
                "pkg-1".parse().unwrap(),
                "https://primary.example.com/pkg-1",
                "/tmp/pkg-1",
            ),
            Request::new(
                "pkg-2".parse().unwrap(),
                "https://primary.example.com/pkg-2",
                "/tmp/pkg-2",
            ),
        ];
        for request in requests.iter_mut() {
            request.find_sources(&registry, &catalog);
        }

        let collated = collated(&mut requests);
        let sources: Vec<&str> = collated.keys().map(|id| id.as_str()).collect();
        assert_eq!(sources, vec!["a", "b"]);
        assert_eq!(collated[&"a".parse::<SourceId>().unwrap()][0].request, 0);
        assert_eq!(collated[&"b".parse::<SourceId>().unwrap()][0].request, 1);
    }

    #[test]
    fn collation_skips_satisfied_requests() {
        let registry = registry(&[("a", 1)]);
        let mut catalog = Catalog::new();
        advertise(&mut catalog, "a", "pkg-1");

        let mut requests = vec![Request::new(
            "pkg-1".parse().unwrap(),
            "https://primary.example.com/pkg-1",
            "/tmp/pkg-1",
        )];
        requests[0].find_sources(&registry, &catalog);
        requests[0].mark_downloaded();

        let collated = collated(&mut requests);
        assert!(collated.is_empty());
    }
}
