use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::{
    ingest::{IngestError, IoContext},
    INDEX_EXTENSION, WEIGHTS_EXTENSION,
};

pub const DEFAULT_WEIGHTS_MIN_BYTES: u64 = 40 * 1024 * 1024;
pub const DEFAULT_INDEX_MIN_BYTES: u64 = 100 * 1024;

/// Minimum sizes a file has to exceed before it counts as weights or index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Thresholds {
    pub weights_min_bytes: u64,
    pub index_min_bytes: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            weights_min_bytes: DEFAULT_WEIGHTS_MIN_BYTES,
            index_min_bytes: DEFAULT_INDEX_MIN_BYTES,
        }
    }
}

/// What to do when a package holds several qualifying files of one kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    #[default]
    LastWins,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    pub weights: PathBuf,
    pub index: Option<PathBuf>,
}

/// Walks the whole extracted tree and picks the weights and index files.
///
/// The walk visits entries sorted by file name, so "last wins" is stable for
/// a given archive.
pub fn classify(
    root: &Path,
    thresholds: &Thresholds,
    policy: DuplicatePolicy,
) -> Result<PackageLayout, IngestError> {
    let mut weights = Vec::new();
    let mut indexes = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry
            .map_err(io::Error::from)
            .io_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let size = entry
            .metadata()
            .map_err(io::Error::from)
            .io_context(|| format!("stat {}", entry.path().display()))?
            .len();

        if name.ends_with(INDEX_EXTENSION) && size > thresholds.index_min_bytes {
            indexes.push(entry.path().to_path_buf());
        }
        if name.ends_with(WEIGHTS_EXTENSION) && size > thresholds.weights_min_bytes {
            weights.push(entry.path().to_path_buf());
        }
    }

    let weights = pick("weights", weights, policy)?.ok_or_else(|| {
        IngestError::MissingWeightsFile {
            staging: root.to_path_buf(),
        }
    })?;
    let index = pick("index", indexes, policy)?;

    Ok(PackageLayout { weights, index })
}

fn pick(
    kind: &'static str,
    mut candidates: Vec<PathBuf>,
    policy: DuplicatePolicy,
) -> Result<Option<PathBuf>, IngestError> {
    if candidates.len() > 1 {
        match policy {
            DuplicatePolicy::Reject => {
                return Err(IngestError::AmbiguousPackage { kind, candidates });
            }
            DuplicatePolicy::LastWins => {
                tracing::warn!(
                    kind,
                    count = candidates.len(),
                    chosen = ?candidates.last(),
                    "package holds several qualifying files, keeping the last one"
                );
            }
        }
    }
    Ok(candidates.pop())
}

/// Moves the chosen files to the top of `root` (keeping their file names) and
/// deletes everything else. Returns the flattened layout.
pub fn normalize(root: &Path, layout: &PackageLayout) -> Result<PackageLayout, IngestError> {
    let weights = hoist(root, &layout.weights)?;
    let index = match &layout.index {
        Some(index) => Some(hoist(root, index)?),
        None => None,
    };

    let entries = fs::read_dir(root).io_context(|| format!("list {}", root.display()))?;
    for entry in entries {
        let entry = entry.io_context(|| format!("list {}", root.display()))?;
        let path = entry.path();
        if path == weights || Some(&path) == index.as_ref() {
            continue;
        }
        let file_type = entry
            .file_type()
            .io_context(|| format!("stat {}", path.display()))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.io_context(|| format!("remove {}", path.display()))?;
    }

    Ok(PackageLayout { weights, index })
}

fn hoist(root: &Path, file: &Path) -> Result<PathBuf, IngestError> {
    let name = file
        .file_name()
        .ok_or_else(|| IngestError::Io {
            context: format!("{} has no file name", file.display()),
            source: io::ErrorKind::InvalidInput.into(),
        })?;
    let target = root.join(name);
    if target != file {
        fs::rename(file, &target)
            .io_context(|| format!("move {} to {}", file.display(), target.display()))?;
    }
    Ok(target)
}
