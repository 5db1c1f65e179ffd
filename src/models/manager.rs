use std::{
    collections::HashSet,
    fs, io,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ingest::IngestError, metadata::compute_sha256, INDEX_EXTENSION, WEIGHTS_EXTENSION};

/// Support files that live next to the voice models but are not models.
pub const RESERVED_FILES: &[&str] = &["hubert_base.pt", "MODELS.txt", "public_models.json", "rmvpe.pt"];

const STAGING_DIR: &str = ".staging";

/// An installed voice model: one directory holding the weights file and an
/// optional index file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub name: String,
    pub dir: PathBuf,
    pub weights: PathBuf,
    pub weights_size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_size_bytes: Option<u64>,
    pub checksum: String,
}

impl ModelEntry {
    /// Reads the top level of an installed model directory.
    pub fn inspect(name: &str, dir: &Path) -> io::Result<Self> {
        let mut weights = None;
        let mut index = None;
        let mut names: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        names.sort();

        for path in names {
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if file_name.ends_with(WEIGHTS_EXTENSION) {
                weights = Some(path);
            } else if file_name.ends_with(INDEX_EXTENSION) {
                index = Some(path);
            }
        }

        let weights = weights.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no {WEIGHTS_EXTENSION} file in {}", dir.display()),
            )
        })?;
        let weights_size_bytes = fs::metadata(&weights)?.len();
        let index_size_bytes = match &index {
            Some(path) => Some(fs::metadata(path)?.len()),
            None => None,
        };
        let checksum = compute_sha256(&weights)?;

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            weights,
            weights_size_bytes,
            index,
            index_size_bytes,
            checksum,
        })
    }

    /// Re-roots the entry after its directory was moved to `dir`.
    #[must_use]
    pub(crate) fn relocate(self, dir: &Path) -> Self {
        let rebase = |path: PathBuf| {
            let rest = path.strip_prefix(&self.dir).map(Path::to_path_buf);
            match rest {
                Ok(rest) => dir.join(rest),
                Err(_) => path,
            }
        };
        let weights = rebase(self.weights.clone());
        let index = self.index.clone().map(rebase);
        Self {
            dir: dir.to_path_buf(),
            weights,
            index,
            ..self
        }
    }
}

/// The directory of installed voice models.
///
/// Each model lives in `root/<name>`. In-flight ingestions extract into
/// `root/.staging/<name>` and only appear under their final name once
/// committed.
#[derive(Debug)]
pub struct ModelStore {
    root: PathBuf,
    in_flight: Mutex<HashSet<String>>,
}

impl ModelStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create model directory {}", root.display()))?;
        Ok(Self {
            root,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    #[must_use]
    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    #[must_use]
    pub fn staging_path(&self, name: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry_path(name).exists()
    }

    /// Installed model names, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("list model directory {}", self.root.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.context("read model directory entry")?;
            if !entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || RESERVED_FILES.contains(&name.as_str()) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    pub fn entry(&self, name: &str) -> Result<Option<ModelEntry>> {
        validate_name(name)?;
        let dir = self.entry_path(name);
        if !dir.is_dir() {
            return Ok(None);
        }
        let entry = ModelEntry::inspect(name, &dir)
            .with_context(|| format!("inspect model {name}"))?;
        Ok(Some(entry))
    }

    /// Claims `name` for one ingestion. Fails if the model is already
    /// installed or another ingestion holds the name.
    pub fn reserve(&self, name: &str) -> Result<NameReservation<'_>, IngestError> {
        validate_name(name)?;
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains(name) || self.contains(name) {
            return Err(IngestError::NameCollision(name.to_string()));
        }
        in_flight.insert(name.to_string());
        Ok(NameReservation {
            store: self,
            name: name.to_string(),
        })
    }

    fn release(&self, name: &str) {
        self.in_flight.lock().remove(name);
    }
}

/// Exclusive claim on a model name, released when dropped.
#[derive(Debug)]
pub struct NameReservation<'a> {
    store: &'a ModelStore,
    name: String,
}

impl NameReservation<'_> {
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        self.store.staging_path(&self.name)
    }

    /// Creates the staging directory. Fails instead of merging when it
    /// already exists.
    pub fn create_staging(&self) -> Result<PathBuf, IngestError> {
        let staging = self.staging_path();
        if let Some(parent) = staging.parent() {
            fs::create_dir_all(parent).map_err(|source| IngestError::Io {
                context: format!("create {}", parent.display()),
                source,
            })?;
        }
        match fs::create_dir(&staging) {
            Ok(()) => Ok(staging),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                Err(IngestError::StagingBusy(staging))
            }
            Err(source) => Err(IngestError::Io {
                context: format!("create {}", staging.display()),
                source,
            }),
        }
    }

    /// Publishes the staging directory under the reserved name.
    pub fn commit(&self) -> Result<PathBuf, IngestError> {
        let staging = self.staging_path();
        let target = self.store.entry_path(&self.name);
        // Best effort against other processes: a plain rename can still replace
        // an empty directory created between this check and the move.
        if target.exists() {
            return Err(IngestError::NameCollision(self.name.clone()));
        }
        fs::rename(&staging, &target).map_err(|source| IngestError::Io {
            context: format!("move {} to {}", staging.display(), target.display()),
            source,
        })?;
        Ok(target)
    }
}

impl Drop for NameReservation<'_> {
    fn drop(&mut self) {
        self.store.release(&self.name);
    }
}

/// A model name must be usable as exactly one directory under the store.
pub(crate) fn validate_name(name: &str) -> Result<(), IngestError> {
    let invalid = || IngestError::InvalidName(name.to_string());
    if name.trim().is_empty() || name.trim() != name || name.starts_with('.') {
        return Err(invalid());
    }
    if RESERVED_FILES.contains(&name) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(invalid()),
    }
}
