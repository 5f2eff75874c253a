//! Removing entries from an existing archive.
//!
//! The archive is rewritten into a temporary sibling and renamed over the
//! original only once the rewrite has fully succeeded. Until then the
//! original is never opened for writing; on failure the temporary file is
//! removed and the original stays as it was.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::{ZipArchive, ZipWriter};

use crate::error::{Error, IoResultExt, Result};
use crate::io::{LocalFileReader, OffsetWriter};
use crate::zip::{ArchiveLayout, ZipParser};

/// Outcome of [`delete_entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditSummary {
    pub removed: usize,
    pub kept: usize,
    /// False when nothing matched and the file was left untouched.
    pub rewritten: bool,
}

/// Delete every entry whose name is in `names` from the archive.
///
/// Names that are not in the archive are ignored; deleting everything
/// leaves a valid empty archive. Kept entries are copied with their
/// original compressed bytes, and the archive comment and any bytes in
/// front of the archive (a polyglot's primary part) are preserved.
///
/// Archives holding two entries with the same name are refused with
/// [`Error::DuplicateEntryName`], since which of them a name refers to is
/// ambiguous. Every other failure is reported as [`Error::EditFailed`].
pub fn delete_entries<I, S>(archive_path: &Path, names: I) -> Result<EditSummary>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let doomed: HashSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();

    let (layout, entry_names) = read_directory(archive_path)?;
    let total = entry_names.len();

    let mut seen = HashSet::with_capacity(total);
    for name in &entry_names {
        if !seen.insert(name.as_str()) {
            return Err(Error::DuplicateEntryName(name.clone()));
        }
    }

    let removed = entry_names.iter().filter(|n| doomed.contains(*n)).count();
    if removed == 0 {
        debug!(archive = %archive_path.display(), "no requested entry present; archive untouched");
        return Ok(EditSummary {
            removed: 0,
            kept: total,
            rewritten: false,
        });
    }

    rewrite_without(archive_path, &layout, &doomed)
        .map_err(|e| Error::edit_failed(archive_path, e))?;

    let summary = EditSummary {
        removed,
        kept: total - removed,
        rewritten: true,
    };
    info!(
        archive = %archive_path.display(),
        removed = summary.removed,
        kept = summary.kept,
        "deleted entries"
    );
    Ok(summary)
}

fn read_directory(archive_path: &Path) -> Result<(ArchiveLayout, Vec<String>)> {
    let reader = LocalFileReader::new(archive_path)
        .map_err(|e| Error::edit_failed(archive_path, Error::open_archive(archive_path, e)))?;
    let parser = ZipParser::new(reader);
    let listing = parser
        .layout()
        .and_then(|layout| Ok((layout, parser.list_files_in(&layout)?)));
    let (layout, entries) =
        listing.map_err(|e| Error::edit_failed(archive_path, Error::format(archive_path, e)))?;
    Ok((layout, entries.into_iter().map(|e| e.file_name).collect()))
}

/// Write the archive minus `doomed` into a sibling temp file, then rename
/// it over `archive_path`. The temp file is deleted on every error path
/// when `NamedTempFile` drops.
fn rewrite_without(
    archive_path: &Path,
    layout: &ArchiveLayout,
    doomed: &HashSet<String>,
) -> Result<()> {
    let dir = match archive_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .at(dir)?;
    debug!(temp = %tmp.path().display(), "rewriting archive");

    // Bytes in front of the archive (polyglot primary or stub)
    let mut prefix = File::open(archive_path).at(archive_path)?.take(layout.archive_offset);
    io::copy(&mut prefix, &mut tmp).at(tmp.path())?;

    let source = File::open(archive_path).at(archive_path)?;
    let mut archive = ZipArchive::new(source)?;
    let comment = archive.comment().to_vec();

    // Offsets in the new directory stay relative to the archive start
    let shifted = OffsetWriter::new(tmp).at(archive_path)?;
    let mut writer = ZipWriter::new(shifted);
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        if doomed.contains(entry.name()) {
            debug!(name = entry.name(), "dropping entry");
            continue;
        }
        writer.raw_copy_file(entry)?;
    }
    writer.set_raw_comment(comment.into_boxed_slice());
    let tmp: NamedTempFile = writer.finish()?.into_inner();

    tmp.as_file().sync_all().at(tmp.path())?;
    let permissions = fs::metadata(archive_path).at(archive_path)?.permissions();
    fs::set_permissions(tmp.path(), permissions).at(tmp.path())?;

    tmp.persist(archive_path)
        .map_err(|e| Error::io(archive_path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::list_entries;
    use crate::payload::{PayloadEntry, create_zip};
    use crate::zip::ZipParser;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn archive_with(dir: &Path, names: &[&str]) -> std::path::PathBuf {
        let entries: Vec<_> = names
            .iter()
            .map(|name| {
                let src = dir.join(format!("src-{}", name.replace('/', "_")));
                fs::write(&src, format!("contents of {name}")).unwrap();
                PayloadEntry::new(*name, src)
            })
            .collect();
        let out = dir.join("archive.zip");
        create_zip(&entries, &out).unwrap();
        out
    }

    fn names(path: &Path) -> Vec<String> {
        list_entries(path).unwrap().into_iter().map(|e| e.name).collect()
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    /// `(name, crc, compressed bytes)` for every entry, read straight from
    /// the file.
    fn raw_entries(path: &Path) -> Vec<(String, u32, Vec<u8>)> {
        let bytes = fs::read(path).unwrap();
        let parser = ZipParser::new(bytes.as_slice());
        parser
            .list_files()
            .unwrap()
            .into_iter()
            .map(|entry| {
                let start = parser.get_data_offset(&entry).unwrap() as usize;
                let end = start + entry.compressed_size as usize;
                (entry.file_name, entry.crc32, bytes[start..end].to_vec())
            })
            .collect()
    }

    #[test]
    fn deletes_only_named_entries() {
        let dir = tempdir().unwrap();
        let archive = archive_with(dir.path(), &["a.txt", "b.txt", "sub/c.txt"]);

        let summary = delete_entries(&archive, ["b.txt", "not-there"]).unwrap();

        assert_eq!(summary.removed, 1);
        assert_eq!(summary.kept, 2);
        assert_eq!(names(&archive), ["a.txt", "sub/c.txt"]);
    }

    #[test]
    fn no_temp_files_are_left_behind() {
        let dir = tempdir().unwrap();
        let archive = archive_with(dir.path(), &["a.txt", "b.txt"]);
        delete_entries(&archive, ["a.txt"]).unwrap();

        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn unmatched_names_leave_the_file_byte_identical() {
        let dir = tempdir().unwrap();
        let archive = archive_with(dir.path(), &["a.txt"]);
        let before = fs::read(&archive).unwrap();

        let summary = delete_entries(&archive, Vec::<String>::new()).unwrap();

        assert!(!summary.rewritten);
        assert_eq!(fs::read(&archive).unwrap(), before);
    }

    #[test]
    fn corrupt_archive_is_an_edit_failure_and_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        fs::write(&path, b"definitely not a zip file").unwrap();

        let err = delete_entries(&path, ["x"]).unwrap_err();

        match err {
            Error::EditFailed { source, .. } => {
                assert!(matches!(*source, Error::CorruptArchive { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fs::read(&path).unwrap(), b"definitely not a zip file");
    }

    #[test]
    fn missing_archive_is_an_edit_failure() {
        let dir = tempdir().unwrap();
        let err = delete_entries(&dir.path().join("nope.zip"), ["x"]).unwrap_err();
        assert!(matches!(err, Error::EditFailed { .. }));
    }

    #[test]
    fn kept_entries_keep_their_compressed_bytes() {
        let dir = tempdir().unwrap();
        let archive = archive_with(dir.path(), &["a.txt", "b.txt", "sub/c.txt"]);
        let mut expected = raw_entries(&archive);
        expected.remove(1);

        delete_entries(&archive, ["b.txt"]).unwrap();

        assert_eq!(raw_entries(&archive), expected);
    }

    #[test]
    fn archive_comment_survives() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("commented.zip");
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for name in ["a.txt", "b.txt"] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(name.as_bytes()).unwrap();
        }
        writer.set_comment("hello comment");
        fs::write(&archive, writer.finish().unwrap().into_inner()).unwrap();

        delete_entries(&archive, ["a.txt"]).unwrap();

        let reopened = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(reopened.comment(), b"hello comment");
        assert_eq!(names(&archive), ["b.txt"]);
    }

    #[test]
    fn duplicate_names_in_the_archive_are_refused() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("dup.zip");
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for name in ["a.txt", "b.txt"] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(b"same").unwrap();
        }
        let mut bytes = writer.finish().unwrap().into_inner();
        // The writer refuses duplicates, so rename the second entry in place
        for i in 0..bytes.len() - 5 {
            if &bytes[i..i + 5] == b"b.txt" {
                bytes[i..i + 5].copy_from_slice(b"a.txt");
            }
        }
        fs::write(&archive, &bytes).unwrap();

        let err = delete_entries(&archive, ["a.txt"]).unwrap_err();

        assert!(matches!(err, Error::DuplicateEntryName(name) if name == "a.txt"));
        assert_eq!(fs::read(&archive).unwrap(), bytes);
    }

    #[test]
    fn failed_rewrite_leaves_original_and_no_temp_file() {
        let dir = tempdir().unwrap();
        let archive = archive_with(dir.path(), &["a.txt", "b.txt"]);

        // Break the local header of the entry that would be copied; the
        // central directory still lists it, so the rewrite starts and fails
        let mut bytes = fs::read(&archive).unwrap();
        let kept = ZipParser::new(bytes.as_slice()).list_files().unwrap().remove(1);
        bytes[kept.lfh_offset as usize] = b'X';
        fs::write(&archive, &bytes).unwrap();

        let err = delete_entries(&archive, ["a.txt"]).unwrap_err();

        assert!(matches!(err, Error::EditFailed { .. }));
        assert_eq!(fs::read(&archive).unwrap(), bytes);
        assert!(temp_files(dir.path()).is_empty());
    }
}
