use std::{
    fs::{self, File},
    io,
    path::Path,
};

use zip::read::ZipArchive;

use super::{
    download::CancelToken,
    ingest::{IngestError, IoContext},
};

/// Unpacks every entry of the zip at `archive_path` into the existing
/// directory `destination`. Returns the number of files written.
///
/// Entries whose names would land outside `destination` (absolute paths,
/// `..` components) reject the whole archive.
pub fn extract_zip(
    archive_path: &Path,
    destination: &Path,
    cancel: &CancelToken,
) -> Result<usize, IngestError> {
    let file = File::open(archive_path)
        .io_context(|| format!("open archive {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file).map_err(|source| IngestError::CorruptArchive {
        archive: archive_path.to_path_buf(),
        source,
    })?;

    let mut written = 0;
    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let mut entry = archive
            .by_index(i)
            .map_err(|source| IngestError::CorruptArchive {
                archive: archive_path.to_path_buf(),
                source,
            })?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| IngestError::UnsafeEntry(entry.name().to_string()))?;
        let dest = destination.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&dest)
                .io_context(|| format!("create directory {}", dest.display()))?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut outfile =
            File::create(&dest).io_context(|| format!("create file {}", dest.display()))?;
        io::copy(&mut entry, &mut outfile).map_err(|source| {
            // Decompression failures surface through `Read` as io errors.
            if source.kind() == io::ErrorKind::InvalidData {
                IngestError::CorruptArchive {
                    archive: archive_path.to_path_buf(),
                    source: zip::result::ZipError::Io(source),
                }
            } else {
                IngestError::Io {
                    context: format!("write {}", dest.display()),
                    source,
                }
            }
        })?;
        written += 1;
    }

    tracing::debug!(
        archive = %archive_path.display(),
        files = written,
        "extracted archive"
    );
    Ok(written)
}
