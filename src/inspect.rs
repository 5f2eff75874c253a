//! Reading existing archives: listing entries, locating the archive inside
//! a polyglot, and extracting selected entries.

use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::io::{LocalFileReader, ReadAt};
use crate::payload::ArchivePayload;
use crate::zip::{ArchiveLayout, FormatError, ZipExtractor, ZipFileEntry};

/// Read-only view of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntryDescriptor {
    pub name: String,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    /// `None` when the stored DOS timestamp is not a valid date.
    pub last_modified: Option<NaiveDateTime>,
    pub is_directory: bool,
}

impl ArchiveEntryDescriptor {
    /// Space saved by compression, in percent.
    ///
    /// Negative when compression expanded the entry; never clamped.
    pub fn compression_ratio_percent(&self) -> i64 {
        if self.uncompressed_size == 0 {
            return 0;
        }
        let kept = self.compressed_size as f64 / self.uncompressed_size as f64;
        (100.0 * (1.0 - kept)).round() as i64
    }
}

impl From<&ZipFileEntry> for ArchiveEntryDescriptor {
    fn from(entry: &ZipFileEntry) -> Self {
        Self {
            name: entry.file_name.clone(),
            uncompressed_size: entry.uncompressed_size,
            compressed_size: entry.compressed_size,
            last_modified: entry.last_modified(),
            is_directory: entry.is_directory,
        }
    }
}

/// One requested entry that could not be extracted.
#[derive(Debug)]
pub struct EntryFailure {
    pub name: String,
    pub error: Error,
}

/// Outcome of [`extract`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Entries present in the archive and fully written.
    pub extracted: usize,
    pub failures: Vec<EntryFailure>,
}

impl ExtractReport {
    pub fn first_error(&self) -> Option<&Error> {
        self.failures.first().map(|f| &f.error)
    }
}

/// List the entries of the archive at `archive_path`, in directory order.
///
/// Works on polyglots too: whatever precedes the archive is skipped.
pub fn list_entries(archive_path: &Path) -> Result<Vec<ArchiveEntryDescriptor>> {
    let extractor = open(archive_path)?;
    let entries = extractor
        .list_files()
        .map_err(|e| Error::format(archive_path, e))?;
    debug!(archive = %archive_path.display(), entries = entries.len(), "listed archive");
    Ok(entries.iter().map(ArchiveEntryDescriptor::from).collect())
}

/// List the entries of a payload that has not been written anywhere yet.
pub fn list_payload_entries(payload: &ArchivePayload) -> Result<Vec<ArchiveEntryDescriptor>> {
    let extractor = ZipExtractor::new(payload.as_bytes());
    let entries = extractor
        .list_files()
        .map_err(|e| Error::format(Path::new("<payload>"), e))?;
    Ok(entries.iter().map(ArchiveEntryDescriptor::from).collect())
}

/// Where the trailing archive begins inside `path`.
pub fn locate_archive(path: &Path) -> Result<ArchiveLayout> {
    open(path)?.layout().map_err(|e| Error::format(path, e))
}

/// Extract the entries named in `names` into `destination`.
///
/// Nested entry names recreate their directories. Names not present in the
/// archive are skipped. An entry that would land outside `destination`
/// fails with [`Error::PathTraversal`] and the remaining entries are still
/// extracted. Existing files are overwritten.
///
/// A requested name held by more than one entry is refused with
/// [`Error::DuplicateEntryName`] before anything is written.
pub fn extract<I, S>(archive_path: &Path, names: I, destination: &Path) -> Result<ExtractReport>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let wanted: HashSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
    let extractor = open(archive_path)?;
    let entries = extractor
        .list_files()
        .map_err(|e| Error::format(archive_path, e))?;

    let mut requested = HashSet::new();
    for entry in entries.iter().filter(|e| wanted.contains(&e.file_name)) {
        if !requested.insert(entry.file_name.as_str()) {
            return Err(Error::DuplicateEntryName(entry.file_name.clone()));
        }
    }

    fs::create_dir_all(destination).at(destination)?;

    let mut report = ExtractReport::default();
    let mut found = HashSet::new();
    for entry in entries.iter().filter(|e| wanted.contains(&e.file_name)) {
        found.insert(entry.file_name.as_str());
        match extract_entry(&extractor, entry, archive_path, destination) {
            Ok(target) => {
                debug!(name = %entry.file_name, target = %target.display(), "extracted");
                report.extracted += 1;
            }
            Err(error) => {
                warn!(name = %entry.file_name, %error, "entry not extracted");
                report.failures.push(EntryFailure {
                    name: entry.file_name.clone(),
                    error,
                });
            }
        }
    }

    for missing in wanted.iter().filter(|n| !found.contains(n.as_str())) {
        debug!(name = %missing, "requested entry not in archive");
    }
    info!(
        archive = %archive_path.display(),
        destination = %destination.display(),
        extracted = report.extracted,
        failed = report.failures.len(),
        "extraction finished"
    );
    Ok(report)
}

fn open(path: &Path) -> Result<ZipExtractor<LocalFileReader>> {
    let reader = LocalFileReader::new(path).map_err(|e| Error::open_archive(path, e))?;
    Ok(ZipExtractor::new(reader))
}

fn extract_entry<R: ReadAt>(
    extractor: &ZipExtractor<R>,
    entry: &ZipFileEntry,
    archive_path: &Path,
    destination: &Path,
) -> Result<PathBuf> {
    let target = resolve_entry_path(destination, &entry.file_name)?;

    if entry.is_directory {
        fs::create_dir_all(&target).at(&target)?;
        return Ok(target);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }

    let mut out = BufWriter::new(File::create(&target).at(&target)?);
    let written = extractor
        .extract_to_writer(entry, &mut out)
        .and_then(|_| out.flush().map_err(Into::into));
    if let Err(e) = written {
        drop(out);
        // Best effort; the entry is reported as failed either way
        let _ = fs::remove_file(&target);
        return Err(match e {
            FormatError::Io(source)
                if !matches!(
                    source.kind(),
                    io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
                ) =>
            {
                Error::io(&target, source)
            }
            other => Error::format(archive_path, other),
        });
    }
    Ok(target)
}

/// Map an entry name to a path under `destination`.
///
/// Both `/` and `\` separate components. `.` is dropped and `..` pops a
/// component; popping past the root, an absolute name or a drive prefix
/// is a traversal attempt.
pub fn resolve_entry_path(destination: &Path, name: &str) -> Result<PathBuf> {
    let traversal = || Error::PathTraversal(name.to_string());

    if name.starts_with('/') || name.starts_with('\\') {
        return Err(traversal());
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop().ok_or_else(traversal)?;
            }
            part if is_drive_prefixed(part) => return Err(traversal()),
            part => {
                // Anything the platform would read as more than a plain name
                let mut components = Path::new(part).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(_)), None) => parts.push(part),
                    _ => return Err(traversal()),
                }
            }
        }
    }

    if parts.is_empty() {
        return Err(traversal());
    }
    Ok(parts.iter().fold(destination.to_path_buf(), |acc, p| acc.join(p)))
}

/// `C:`, `c:file` and the like, which Windows resolves outside any base.
fn is_drive_prefixed(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
