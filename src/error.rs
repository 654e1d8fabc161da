use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WarehouseError {
    #[error("invalid content source id: {0}")]
    InvalidSourceId(String),

    #[error("invalid unit key: {0}")]
    InvalidUnitKey(String),

    #[error("duplicate content source id: {0}")]
    DuplicateSource(String),

    #[error("failed to read source descriptors at {0}")]
    DescriptorDir(PathBuf),

    #[error("failed to parse source descriptor {path}: {message}")]
    DescriptorParse { path: PathBuf, message: String },

    #[error("descriptor {path} has no base_url")]
    DescriptorBaseUrl { path: PathBuf },

    #[error("unknown content source: {0}")]
    UnknownSource(String),

    #[error("manifest request failed: {0}")]
    ManifestHttp(String),

    #[error("manifest for {source_id} returned status {status}: {message}")]
    ManifestStatus {
        source_id: String,
        status: u16,
        message: String,
    },

    #[error("malformed manifest from {source_id}: {message}")]
    ManifestParse { source_id: String, message: String },

    #[error("failed to read catalog at {0}")]
    CatalogRead(PathBuf),

    #[error("failed to parse catalog: {0}")]
    CatalogParse(String),

    #[error("downloader setup failed: {0}")]
    TransportInit(String),

    #[error("transport setup failed for {source_id}: {message}")]
    TransportSetup { source_id: String, message: String },

    #[error("failed to read request list at {0}")]
    RequestListRead(PathBuf),

    #[error("failed to parse request list: {0}")]
    RequestListParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
