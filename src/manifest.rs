use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::UnitKey;
use crate::error::WarehouseError;
use crate::source::ContentSource;

pub const MANIFEST_FILE: &str = "manifest.json";

/// A source's advertised inventory: the units it can supply and where each one
/// lives relative to the source base url.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub units: Vec<ManifestUnit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestUnit {
    pub key: UnitKey,
    pub path: String,
}

pub trait ManifestClient: Send + Sync {
    fn fetch_manifest(&self, source: &ContentSource) -> Result<Manifest, WarehouseError>;
}

impl<C: ManifestClient + ?Sized> ManifestClient for std::sync::Arc<C> {
    fn fetch_manifest(&self, source: &ContentSource) -> Result<Manifest, WarehouseError> {
        (**self).fetch_manifest(source)
    }
}

#[derive(Clone)]
pub struct ManifestHttpClient {
    client: Client,
}

impl ManifestHttpClient {
    pub fn new() -> Result<Self, WarehouseError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("content-warehouse/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| WarehouseError::ManifestHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| WarehouseError::ManifestHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ManifestClient for ManifestHttpClient {
    fn fetch_manifest(&self, source: &ContentSource) -> Result<Manifest, WarehouseError> {
        let url = source.unit_url(MANIFEST_FILE);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| WarehouseError::ManifestHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "manifest request failed".to_string());
            return Err(WarehouseError::ManifestStatus {
                source_id: source.id().as_str().to_string(),
                status,
                message,
            });
        }
        response
            .json::<Manifest>()
            .map_err(|err| WarehouseError::ManifestParse {
                source_id: source.id().as_str().to_string(),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_manifest_json() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"units": [{"key": "rpm:zsh-5.0.2", "path": "packages/zsh.rpm"}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.units.len(), 1);
        assert_eq!(manifest.units[0].key.as_str(), "rpm:zsh-5.0.2");
        assert_eq!(manifest.units[0].path, "packages/zsh.rpm");
    }
}
