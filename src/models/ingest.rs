use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use zip::result::ZipError;

use crate::core::events::{self, ProgressReporter};

use super::{
    archive::extract_zip,
    download::{filename_from_url, resolve_download_url, CancelToken, FetchError, Fetcher},
    layout::{classify, normalize, DuplicatePolicy, Thresholds},
    manager::{ModelEntry, ModelStore},
    PackageSource,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("`{0}` is not a valid model name; use a non-empty name without path separators")]
    InvalidName(String),
    #[error("Voice model directory {0} already exists! Choose a different name for your voice model.")]
    NameCollision(String),
    #[error(
        "staging directory {} already exists; another ingestion is running or a failed attempt was kept there for inspection",
        .0.display()
    )]
    StagingBusy(PathBuf),
    #[error("failed to download {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("{} is not a valid zip archive: {source}", archive.display())]
    CorruptArchive {
        archive: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("archive entry `{0}` points outside the model directory")]
    UnsafeEntry(String),
    #[error("No .pth model file was found in the extracted zip. Please check {}.", staging.display())]
    MissingWeightsFile { staging: PathBuf },
    #[error("archive holds {} qualifying {kind} files, expected one", candidates.len())]
    AmbiguousPackage {
        kind: &'static str,
        candidates: Vec<PathBuf>,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("ingestion cancelled")]
    Cancelled,
}

/// Coarse classification of [`IngestError`] for callers deciding how to
/// present or retry a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IngestErrorKind {
    InvalidName,
    NameCollision,
    FetchFailed,
    CorruptArchive,
    MissingWeightsFile,
    AmbiguousPackage,
    IoFailure,
    Cancelled,
}

impl IngestError {
    #[must_use]
    pub fn kind(&self) -> IngestErrorKind {
        match self {
            IngestError::InvalidName(_) => IngestErrorKind::InvalidName,
            IngestError::NameCollision(_) | IngestError::StagingBusy(_) => {
                IngestErrorKind::NameCollision
            }
            IngestError::FetchFailed { .. } => IngestErrorKind::FetchFailed,
            IngestError::CorruptArchive { .. } | IngestError::UnsafeEntry(_) => {
                IngestErrorKind::CorruptArchive
            }
            IngestError::MissingWeightsFile { .. } => IngestErrorKind::MissingWeightsFile,
            IngestError::AmbiguousPackage { .. } => IngestErrorKind::AmbiguousPackage,
            IngestError::Io { .. } => IngestErrorKind::IoFailure,
            IngestError::Cancelled => IngestErrorKind::Cancelled,
        }
    }
}

pub(crate) trait IoContext<T> {
    fn io_context<F>(self, context: F) -> Result<T, IngestError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F>(self, context: F) -> Result<T, IngestError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| IngestError::Io {
            context: context(),
            source,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestOptions {
    #[serde(flatten)]
    pub thresholds: Thresholds,
    pub duplicate_policy: DuplicatePolicy,
    /// Leave the staging directory on disk after a failure so it can be
    /// inspected. Cancelled ingestions are always cleaned up.
    pub keep_failed_staging: bool,
}

enum Archive {
    Downloaded(NamedTempFile),
    Local(PathBuf),
}

impl Archive {
    fn path(&self) -> &Path {
        match self {
            Archive::Downloaded(file) => file.path(),
            Archive::Local(path) => path.as_path(),
        }
    }
}

/// Turns model packages into installed [`ModelEntry`]s.
pub struct Ingestor<F> {
    store: Arc<ModelStore>,
    fetcher: F,
    options: IngestOptions,
    download_dir: Option<PathBuf>,
}

impl<F: Fetcher> Ingestor<F> {
    pub fn new(store: Arc<ModelStore>, fetcher: F, options: IngestOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
            download_dir: None,
        }
    }

    /// Puts downloaded archives in `dir` instead of the system temp directory.
    #[must_use]
    pub fn with_download_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.download_dir = dir;
        self
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Installs the package behind `source` as model `name`.
    ///
    /// Nothing becomes visible under `name` unless every step succeeds. The
    /// name is held for the whole call, so concurrent ingestions of the same
    /// name cannot both pass the collision check.
    pub fn ingest(
        &self,
        source: &PackageSource,
        name: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<ModelEntry, IngestError> {
        let reservation = self.store.reserve(name)?;
        let span = tracing::info_span!("ingest", model = name);
        let _guard = span.enter();

        let archive = match source {
            PackageSource::Url(raw) => {
                progress.report(
                    events::FRACTION_FETCH_START,
                    &events::downloading_message(name),
                );
                Archive::Downloaded(self.download(raw, cancel)?)
            }
            PackageSource::Local(path) => {
                fs::metadata(path).io_context(|| format!("open archive {}", path.display()))?;
                Archive::Local(path.clone())
            }
        };

        progress.report(events::FRACTION_EXTRACT_START, events::MESSAGE_EXTRACTING);
        let staging = reservation.create_staging()?;
        let prepared = self.prepare(archive.path(), &staging, cancel);
        drop(archive);

        let committed = prepared
            .and_then(|()| {
                ModelEntry::inspect(name, &staging)
                    .io_context(|| format!("inspect staged model {}", staging.display()))
            })
            .and_then(|entry| {
                if cancel.is_cancelled() {
                    return Err(IngestError::Cancelled);
                }
                let dir = reservation.commit()?;
                Ok(entry.relocate(&dir))
            });
        let entry = match committed {
            Ok(entry) => entry,
            Err(error) => {
                self.discard(&staging, &error);
                return Err(error);
            }
        };

        tracing::info!(
            weights = %entry.weights.display(),
            index = ?entry.index,
            "installed voice model"
        );
        progress.report(
            events::FRACTION_DONE,
            &events::installed_message(name, source.is_remote()),
        );
        Ok(entry)
    }

    fn download(&self, raw: &str, cancel: &CancelToken) -> Result<NamedTempFile, IngestError> {
        let url = resolve_download_url(raw).map_err(|source| IngestError::FetchFailed {
            url: raw.to_string(),
            source,
        })?;
        let suffix = filename_from_url(&url)
            .filter(|name| name.ends_with(".zip"))
            .map(|_| ".zip")
            .unwrap_or(".download");
        let mut builder = tempfile::Builder::new();
        builder.prefix("aicover-").suffix(suffix);
        let created = match &self.download_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = created.io_context(|| "create download file".to_string())?;

        tracing::info!(%url, "downloading model package");
        let bytes = self
            .fetcher
            .fetch(&url, &mut file, cancel)
            .map_err(|source| match source {
                FetchError::Cancelled => IngestError::Cancelled,
                source => IngestError::FetchFailed {
                    url: url.to_string(),
                    source,
                },
            })?;
        tracing::info!(bytes, "download complete");
        Ok(file)
    }

    fn prepare(
        &self,
        archive: &Path,
        staging: &Path,
        cancel: &CancelToken,
    ) -> Result<(), IngestError> {
        extract_zip(archive, staging, cancel)?;
        let layout = classify(
            staging,
            &self.options.thresholds,
            self.options.duplicate_policy,
        )?;
        normalize(staging, &layout)?;
        Ok(())
    }

    fn discard(&self, staging: &Path, error: &IngestError) {
        let cancelled = matches!(error, IngestError::Cancelled);
        if self.options.keep_failed_staging && !cancelled {
            tracing::warn!(
                staging = %staging.display(),
                "ingestion failed ({error}), staging directory kept for inspection"
            );
            return;
        }
        if let Err(remove_error) = fs::remove_dir_all(staging) {
            if remove_error.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    staging = %staging.display(),
                    "failed to remove staging directory: {remove_error}"
                );
            }
        }
    }
}
