//! Building ZIP archives from `(archive name, source path)` pairs.
//!
//! [`build`] produces an in-memory payload for the polyglot writers;
//! [`create_zip`] streams the same archive straight to disk.

use chrono::{DateTime, Datelike, Local, Timelike};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, Metadata};
use std::io::{self, BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, IoResultExt, Result};

/// One file to place in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    /// Name inside the archive; may contain `/` for nested entries.
    pub archive_name: String,
    pub source_path: PathBuf,
}

impl PayloadEntry {
    pub fn new(archive_name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_name: archive_name.into(),
            source_path: source_path.into(),
        }
    }
}

/// A serialized ZIP archive, complete with its central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePayload(Vec<u8>);

impl ArchivePayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Build a deflate-compressed archive of `entries` in memory.
///
/// Every source must be an existing regular file; the first one that is
/// not aborts the build before anything is compressed.
pub fn build(entries: &[PayloadEntry]) -> Result<ArchivePayload> {
    let sources = check_entries(entries)?;
    let cursor = write_entries(entries, &sources, Cursor::new(Vec::new()))?;
    let payload = ArchivePayload(cursor.into_inner());
    info!(
        entries = entries.len(),
        bytes = payload.len(),
        "built archive payload"
    );
    Ok(payload)
}

/// Build an archive of `entries` directly into `output`.
///
/// Sources are validated before `output` is created, so a missing source
/// never leaves an empty or partial archive behind.
pub fn create_zip(entries: &[PayloadEntry], output: &Path) -> Result<()> {
    let sources = check_entries(entries)?;
    let file = File::create(output).at(output)?;
    let mut sink = write_entries(entries, &sources, BufWriter::new(file))?;
    sink.flush().at(output)?;
    info!(entries = entries.len(), output = %output.display(), "created zip");
    Ok(())
}

/// Derive archive names from file names, keeping them unique.
///
/// A later file whose name was already taken gets a numeric suffix before
/// its extension (`photo.jpg`, `photo-2.jpg`, ...).
pub fn entries_from_paths<P: AsRef<Path>>(paths: &[P]) -> Vec<PayloadEntry> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut entries = Vec::with_capacity(paths.len());

    for path in paths {
        let path = path.as_ref();
        let base = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let mut name = base.clone();
        if taken.contains(&name) {
            let (stem, ext) = match base.rfind('.') {
                Some(dot) if dot > 0 => (&base[..dot], &base[dot..]),
                _ => (base.as_str(), ""),
            };
            let counter = next_suffix.entry(base.clone()).or_insert(1);
            loop {
                *counter += 1;
                name = format!("{stem}-{counter}{ext}");
                if !taken.contains(&name) {
                    break;
                }
            }
            debug!(original = %base, renamed = %name, "archive name collision");
        }
        taken.insert(name.clone());
        entries.push(PayloadEntry::new(name, path));
    }

    entries
}

/// Check sources exist and names are unique; returns each source's metadata.
fn check_entries(entries: &[PayloadEntry]) -> Result<Vec<Metadata>> {
    let mut seen = HashSet::with_capacity(entries.len());
    let mut sources = Vec::with_capacity(entries.len());

    for entry in entries {
        let meta = match fs::metadata(&entry.source_path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(Error::SourceNotFound(entry.source_path.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::SourceNotFound(entry.source_path.clone()));
            }
            Err(e) => return Err(Error::io(&entry.source_path, e)),
        };
        if !seen.insert(entry.archive_name.as_str()) {
            return Err(Error::DuplicateEntryName(entry.archive_name.clone()));
        }
        sources.push(meta);
    }

    Ok(sources)
}

fn write_entries<W: Write + Seek>(
    entries: &[PayloadEntry],
    sources: &[Metadata],
    sink: W,
) -> Result<W> {
    let mut writer = ZipWriter::new(sink);

    for (entry, meta) in entries.iter().zip(sources) {
        let mut options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(meta.len() >= u32::MAX as u64);
        if let Some(stamp) = dos_timestamp(meta) {
            options = options.last_modified_time(stamp);
        }

        let mut source = File::open(&entry.source_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::SourceNotFound(entry.source_path.clone())
            } else {
                Error::io(&entry.source_path, e)
            }
        })?;

        writer.start_file(entry.archive_name.as_str(), options)?;
        let copied = io::copy(&mut source, &mut writer).at(&entry.source_path)?;
        debug!(name = %entry.archive_name, bytes = copied, "added entry");
    }

    Ok(writer.finish()?)
}

/// The file's modification time in local time, at DOS precision.
///
/// `None` when the time is unavailable or outside the DOS range
/// (1980-2107); the codec's default stamp is used then.
fn dos_timestamp(meta: &Metadata) -> Option<zip::DateTime> {
    let modified: DateTime<Local> = meta.modified().ok()?.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(modified.year()).ok()?,
        modified.month() as u8,
        modified.day() as u8,
        modified.hour() as u8,
        modified.minute() as u8,
        modified.second() as u8,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::list_payload_entries;
    use tempfile::tempdir;

    #[test]
    fn payload_lists_entries_in_input_order() {
        let dir = tempdir().unwrap();
        let b = dir.path().join("b.txt");
        let a = dir.path().join("a.txt");
        fs::write(&b, b"bee").unwrap();
        fs::write(&a, b"ay").unwrap();

        let payload = build(&[
            PayloadEntry::new("docs/b.txt", &b),
            PayloadEntry::new("a.txt", &a),
        ])
        .unwrap();

        let entries = list_payload_entries(&payload).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["docs/b.txt", "a.txt"]);
        assert_eq!(entries[0].uncompressed_size, 3);
    }

    #[test]
    fn missing_source_aborts_the_build() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("present.txt");
        fs::write(&present, b"x").unwrap();
        let missing = dir.path().join("missing.txt");

        let err = build(&[
            PayloadEntry::new("present.txt", &present),
            PayloadEntry::new("missing.txt", &missing),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(p) if p == missing));
    }

    #[test]
    fn directories_are_not_sources() {
        let dir = tempdir().unwrap();
        let err = build(&[PayloadEntry::new("d", dir.path())]).unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        fs::write(&a, b"x").unwrap();
        let err = build(&[PayloadEntry::new("same", &a), PayloadEntry::new("same", &a)])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateEntryName(name) if name == "same"));
    }

    #[test]
    fn create_zip_leaves_no_output_on_missing_source() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.zip");
        let err = create_zip(&[PayloadEntry::new("x", dir.path().join("nope"))], &out);
        assert!(err.is_err());
        assert!(!out.exists());
    }

    #[test]
    fn colliding_file_names_get_suffixes() {
        let entries = entries_from_paths(&[
            "one/photo.jpg",
            "two/photo.jpg",
            "three/photo.jpg",
            "README",
            "other/README",
        ]);
        let names: Vec<_> = entries.iter().map(|e| e.archive_name.as_str()).collect();
        assert_eq!(
            names,
            ["photo.jpg", "photo-2.jpg", "photo-3.jpg", "README", "README-2"]
        );
        assert_eq!(entries[1].source_path, PathBuf::from("two/photo.jpg"));
    }

    #[test]
    fn suffixes_skip_names_already_taken() {
        let entries = entries_from_paths(&["a/x-2.txt", "b/x.txt", "c/x.txt"]);
        let names: Vec<_> = entries.iter().map(|e| e.archive_name.as_str()).collect();
        assert_eq!(names, ["x-2.txt", "x.txt", "x-3.txt"]);
    }
}
