//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Work out how many foreign bytes precede the archive
//! 4. Read the Central Directory to get metadata for all files
//! 5. For extraction, read each file's Local File Header and data

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::io::ReadAt;

use super::FormatError;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// How far before the ZIP64 locator a record with extensible data is
/// looked for.
const MAX_EXTENSIBLE_SIZE: u64 = 65536;

/// Low-level ZIP file parser.
///
/// Generic over the reader so the same code walks archives on disk and
/// payload buffers still in memory.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let entries = parser.list_files()?;
/// for entry in entries {
///     let offset = parser.get_data_offset(&entry)?;
///     // Read file data from offset...
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: R,
    /// Total size of the source in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: R) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature. The search runs
    /// from the tail, so signature-like bytes inside a primary file in
    /// front of the archive are never reached first.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, absolute offset of EOCD in the source).
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64), FormatError> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(FormatError::Invalid("not a zip archive: too short"));
        }

        // Common case: no archive comment, EOCD is the last 22 bytes
        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        // Search backwards for EOCD signature (PK\x05\x06). A record whose
        // comment accounts for exactly the remaining bytes wins; failing
        // that, the last record whose comment fits, with junk after it.
        let candidates: Vec<usize> = (0..=buf.len() - EndOfCentralDirectory::SIZE)
            .rev()
            .filter(|&i| &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE)
            .collect();
        let remaining = |i: usize| buf.len() - i - EndOfCentralDirectory::SIZE;
        let comment_len = |i: usize| u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

        let found = candidates
            .iter()
            .find(|&&i| comment_len(i) == remaining(i))
            .or_else(|| candidates.iter().find(|&&i| comment_len(i) <= remaining(i)));
        if let Some(&i) = found {
            let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
            return Ok((eocd, search_start + i as u64));
        }

        Err(FormatError::Invalid(
            "not a zip archive: end of central directory not found",
        ))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// # Returns
    ///
    /// The parsed record and its absolute offset in the source. The offset
    /// stored in the locator is relative to the archive start, which is not
    /// known yet for a polyglot, so the record is first looked for where it
    /// ends right at the locator. Only then is the stored offset trusted.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<(Zip64EOCD, u64), FormatError> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or(FormatError::Invalid("zip64 locator missing"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;
        if locator.disk_with_eocd64 != 0 || locator.total_disks > 1 {
            return Err(FormatError::Invalid("multi-disk archives are not supported"));
        }

        let window = (MAX_EXTENSIBLE_SIZE + Zip64EOCD::MIN_SIZE as u64).min(locator_offset);
        let window_start = locator_offset - window;
        let mut buf = vec![0u8; window as usize];
        self.reader.read_exact_at(window_start, &mut buf)?;

        if buf.len() >= Zip64EOCD::MIN_SIZE {
            for i in (0..=buf.len() - Zip64EOCD::MIN_SIZE).rev() {
                if !Zip64EOCD::has_signature(&buf[i..]) {
                    continue;
                }
                let record = Zip64EOCD::from_bytes(&buf[i..])?;
                if record.total_len() == Some((buf.len() - i) as u64) {
                    return Ok((record, window_start + i as u64));
                }
            }
        }

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;
        Ok((Zip64EOCD::from_bytes(&eocd64_buf)?, locator.eocd64_offset))
    }

    /// Locate the archive inside the source.
    ///
    /// The central directory ends where the EOCD (or ZIP64 EOCD) begins.
    /// Comparing that position with the stored `cd_offset + cd_size` gives
    /// the number of bytes prepended to the archive.
    pub fn layout(&self) -> Result<ArchiveLayout, FormatError> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let (cd_offset, cd_size, total_entries, cd_end) = if eocd.is_zip64() {
            let (eocd64, eocd64_offset) = self.read_zip64_eocd(eocd_offset)?;
            if eocd64.disk_number != 0 || eocd64.disk_with_cd != 0 {
                return Err(FormatError::Invalid("multi-disk archives are not supported"));
            }
            (
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
                eocd64_offset,
            )
        } else {
            if eocd.disk_number != 0 || eocd.disk_with_cd != 0 {
                return Err(FormatError::Invalid("multi-disk archives are not supported"));
            }
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
            )
        };

        let archive_offset = cd_offset
            .checked_add(cd_size)
            .and_then(|recorded_end| cd_end.checked_sub(recorded_end))
            .ok_or(FormatError::Invalid(
                "central directory extends past end of central directory record",
            ))?;

        Ok(ArchiveLayout {
            archive_offset,
            cd_offset: cd_offset + archive_offset,
            cd_size,
            total_entries,
            eocd_offset,
            comment_len: eocd.comment_len,
        })
    }

    /// List all files in the ZIP archive, in central directory order.
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>, FormatError> {
        let layout = self.layout()?;
        self.list_files_in(&layout)
    }

    /// List entries for an already computed layout.
    pub fn list_files_in(&self, layout: &ArchiveLayout) -> Result<Vec<ZipFileEntry>, FormatError> {
        // Read the entire Central Directory in one go
        let mut cd_data = vec![0u8; layout.cd_size as usize];
        self.reader.read_exact_at(layout.cd_offset, &mut cd_data)?;

        // Never trust the entry count for preallocation
        let plausible = layout.cd_size / CDFH_MIN_SIZE as u64;
        let mut entries = Vec::with_capacity(layout.total_entries.min(plausible) as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..layout.total_entries {
            let entry = self.parse_cdfh(&mut cursor, layout.archive_offset)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    ///
    /// `archive_offset` is added to the stored local header offset so the
    /// returned entry points at absolute positions in the source.
    fn parse_cdfh(
        &self,
        cursor: &mut Cursor<&[u8]>,
        archive_offset: u64,
    ) -> Result<ZipFileEntry, FormatError> {
        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(FormatError::Invalid("invalid central directory file header"));
        }

        // Read fixed-size header fields
        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        // Lossy: non-UTF8 names still list and extract
        let file_name = String::from_utf8_lossy(&file_name_bytes).into_owned();

        let is_directory = file_name.ends_with('/');

        // ZIP64 extended information lives in extra field 0x0001
        let extra_field_end = cursor.position() + extra_field_length as u64;

        while cursor.position() + 4 <= extra_field_end {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()?;
            let field_end = cursor.position() + field_size as u64;

            if header_id == 0x0001 {
                // Fields are present only if corresponding header field is 0xFFFFFFFF
                if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    compressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    lfh_offset = cursor.read_u64::<LittleEndian>()?;
                }
            }
            cursor.set_position(field_end);
        }

        cursor.set_position(extra_field_end);
        cursor.set_position(cursor.position() + file_comment_length as u64);
        if cursor.position() > cursor.get_ref().len() as u64 {
            return Err(FormatError::Invalid("central directory header is truncated"));
        }

        Ok(ZipFileEntry {
            file_name,
            compression_method: CompressionMethod::from_u16(compression_method),
            flags,
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset: lfh_offset.saturating_add(archive_offset),
            last_mod_time,
            last_mod_date,
            is_directory,
        })
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header has variable-length fields (filename, extra
    /// field) that may differ from the Central Directory entry, so the
    /// header itself is read to find where the data begins.
    pub fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64, FormatError> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf)?;

        // Verify LFH signature (PK\x03\x04)
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(FormatError::Invalid("invalid local file header"));
        }

        let mut cursor = Cursor::new(&lfh_buf[26..]);
        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}
