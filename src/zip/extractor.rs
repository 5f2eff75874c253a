use flate2::CrcReader;
use flate2::read::DeflateDecoder;
use std::io::{self, Read, Write};

use crate::io::{ReadAt, SectionReader};

use super::FormatError;
use super::parser::ZipParser;
use super::structures::{ArchiveLayout, CompressionMethod, ZipFileEntry};

/// ZIP entry extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    pub fn layout(&self) -> Result<ArchiveLayout, FormatError> {
        self.parser.layout()
    }

    /// List all files in the archive
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>, FormatError> {
        self.parser.list_files()
    }

    /// Decode an entry into `out`, returning the number of bytes written.
    ///
    /// Data is streamed through the decoder, never buffered whole, and the
    /// decoded stream is checked against the directory's CRC-32 and size.
    pub fn extract_to_writer<W: Write + ?Sized>(
        &self,
        entry: &ZipFileEntry,
        out: &mut W,
    ) -> Result<u64, FormatError> {
        if entry.is_encrypted() {
            return Err(FormatError::Encrypted);
        }

        let data_offset = self.parser.get_data_offset(entry)?;
        let data_end = data_offset.checked_add(entry.compressed_size);
        if data_end.is_none_or(|end| end > self.parser.size()) {
            return Err(FormatError::Invalid("entry data runs past the end of the archive"));
        }

        let raw = SectionReader::new(self.parser.reader(), data_offset, entry.compressed_size);
        match entry.compression_method {
            CompressionMethod::Stored => copy_verified(raw, entry, out),
            CompressionMethod::Deflate => copy_verified(DeflateDecoder::new(raw), entry, out),
            CompressionMethod::Unknown(method) => Err(FormatError::UnsupportedMethod(method)),
        }
    }
}

/// Copy decoded entry data, checking its length and CRC-32.
fn copy_verified<D: Read, W: Write + ?Sized>(
    decoded: D,
    entry: &ZipFileEntry,
    out: &mut W,
) -> Result<u64, FormatError> {
    // Bound the output so a lying size field cannot inflate forever
    let mut checked = CrcReader::new(decoded.take(entry.uncompressed_size.saturating_add(1)));
    let written = io::copy(&mut checked, out)?;

    if written != entry.uncompressed_size {
        return Err(FormatError::Size {
            expected: entry.uncompressed_size,
            actual: written,
        });
    }
    let actual = checked.crc().sum();
    if actual != entry.crc32 {
        return Err(FormatError::Checksum {
            expected: entry.crc32,
            actual,
        });
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::CompressionMethod as Method;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn archive(method: Method, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, data) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn decode(extractor: &ZipExtractor<&[u8]>, entry: &ZipFileEntry) -> Result<Vec<u8>, FormatError> {
        let mut buf = Vec::new();
        extractor.extract_to_writer(entry, &mut buf)?;
        Ok(buf)
    }

    #[test]
    fn deflated_entry_round_trips() {
        let text = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        let data = archive(Method::Deflated, &[("fox.txt", text.as_slice())]);
        let extractor = ZipExtractor::new(data.as_slice());

        let entries = extractor.list_files().unwrap();
        assert!(entries[0].compressed_size < entries[0].uncompressed_size);
        assert_eq!(decode(&extractor, &entries[0]).unwrap(), text);
    }

    #[test]
    fn stored_entry_behind_a_prefix() {
        let mut data = b"#!/bin/sh\nexit 0\n".to_vec();
        data.extend_from_slice(&archive(Method::Stored, &[("a.bin", &b"\x00\x01\x02"[..])]));
        let extractor = ZipExtractor::new(data.as_slice());

        let entries = extractor.list_files().unwrap();
        assert_eq!(decode(&extractor, &entries[0]).unwrap(), b"\x00\x01\x02");
    }

    #[test]
    fn corrupted_data_fails_the_crc_check() {
        let mut data = archive(Method::Stored, &[("a.txt", &b"hello world"[..])]);
        let extractor = ZipExtractor::new(data.as_slice());
        let entry = extractor.list_files().unwrap().remove(0);
        let offset = extractor.parser.get_data_offset(&entry).unwrap() as usize;
        drop(extractor);

        data[offset] ^= 0xFF;
        let extractor = ZipExtractor::new(data.as_slice());
        assert!(matches!(
            decode(&extractor, &entry),
            Err(FormatError::Checksum { .. })
        ));
    }

    #[test]
    fn unknown_methods_are_refused() {
        let data = archive(Method::Stored, &[("a.txt", &b"x"[..])]);
        let extractor = ZipExtractor::new(data.as_slice());
        let mut entry = extractor.list_files().unwrap().remove(0);
        entry.compression_method = CompressionMethod::Unknown(99);
        assert!(matches!(
            decode(&extractor, &entry),
            Err(FormatError::UnsupportedMethod(99))
        ));
    }
}
