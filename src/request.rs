use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::Catalog;
use crate::domain::{SourceId, UnitKey};
use crate::error::WarehouseError;
use crate::source::SourceRegistry;

/// A (source, address) pair a request may attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source_id: SourceId,
    pub url: String,
}

/// One content unit to fetch, and the fallback state that walks its candidate
/// sources.
///
/// Candidates are strictly ordered by ascending source priority with the
/// primary appended last; the cursor only ever moves forward. A request whose
/// `downloaded` flag is set is never reconsidered.
#[derive(Debug)]
pub struct Request {
    unit_key: UnitKey,
    url: String,
    destination: PathBuf,
    downloaded: bool,
    errors: Vec<String>,
    candidates: Vec<Candidate>,
    cursor: usize,
}

impl Request {
    pub fn new(unit_key: UnitKey, url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            unit_key,
            url: url.into(),
            destination: destination.into(),
            downloaded: false,
            errors: Vec::new(),
            candidates: Vec::new(),
            cursor: 0,
        }
    }

    pub fn unit_key(&self) -> &UnitKey {
        &self.unit_key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn downloaded(&self) -> bool {
        self.downloaded
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub(crate) fn mark_downloaded(&mut self) {
        self.downloaded = true;
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Build the candidate list: every registered source with a fresh catalog
    /// entry for this unit, in ascending (priority, id) order, then the
    /// primary source with the original url as guaranteed last resort.
    pub fn find_sources(&mut self, registry: &SourceRegistry, catalog: &Catalog) {
        self.candidates.clear();
        self.cursor = 0;
        for source in registry.ordered() {
            if let Some(entry) = catalog.find(source.id(), &self.unit_key) {
                self.candidates.push(Candidate {
                    source_id: source.id().clone(),
                    url: entry.url.clone(),
                });
            }
        }
        self.candidates.push(Candidate {
            source_id: SourceId::primary(),
            url: self.url.clone(),
        });
    }

    /// The next untried candidate, advancing the cursor past it. `None` once
    /// the list is exhausted, and immediately after a successful download.
    pub fn next_source(&mut self) -> Option<Candidate> {
        if self.downloaded {
            return None;
        }
        let candidate = self.candidates.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(candidate)
    }

    /// Whether an untried candidate remains. A failure with no remaining
    /// candidate is terminal.
    pub fn has_source(&self) -> bool {
        self.cursor < self.candidates.len()
    }
}

#[derive(Debug, Deserialize)]
struct RequestEntry {
    unit: String,
    url: String,
    destination: String,
}

/// Load a request list from a JSON file of `{unit, url, destination}` rows,
/// resolving destinations against `dest_dir`.
pub fn load_requests(path: &Path, dest_dir: &Path) -> Result<Vec<Request>, WarehouseError> {
    let content = fs::read_to_string(path)
        .map_err(|_| WarehouseError::RequestListRead(path.to_path_buf()))?;
    let entries: Vec<RequestEntry> = serde_json::from_str(&content)
        .map_err(|err| WarehouseError::RequestListParse(err.to_string()))?;
    entries
        .into_iter()
        .map(|entry| {
            let unit: UnitKey = entry.unit.parse()?;
            Ok(Request::new(unit, entry.url, dest_dir.join(entry.destination)))
        })
        .collect()
}
