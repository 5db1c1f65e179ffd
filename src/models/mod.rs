mod archive;
mod download;
mod ingest;
mod layout;
mod manager;
mod metadata;
mod service;

#[cfg(test)]
pub(crate) mod fixtures;

pub use archive::extract_zip;
pub use download::{
    resolve_download_url, CancelToken, FetchError, Fetcher, HttpFetcher, PackageSource,
};
pub use ingest::{IngestError, IngestErrorKind, IngestOptions, Ingestor};
pub use layout::{classify, normalize, DuplicatePolicy, PackageLayout, Thresholds};
pub use manager::{ModelEntry, ModelStore, NameReservation, RESERVED_FILES};
pub use metadata::compute_sha256;
pub use service::{IngestEvent, IngestJob, IngestService};

pub const WEIGHTS_EXTENSION: &str = ".pth";
pub const INDEX_EXTENSION: &str = ".index";
