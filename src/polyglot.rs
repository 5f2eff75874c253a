//! Composing a primary byte stream with a trailing ZIP payload.
//!
//! ZIP readers find the archive by scanning backwards for the end of
//! central directory record, so whatever precedes the payload is ignored
//! by them. Both strategies rely on that; neither checks that the primary
//! format tolerates trailing bytes.
//!
//! Writes are not atomic: a failure part way leaves whatever was written
//! at the output path, and the caller must recreate it before use.

use encoding_rs::{EncoderResult, Encoding, UTF_16BE, UTF_16LE};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::payload::ArchivePayload;

/// How the primary part of a polyglot is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionStrategy {
    /// Primary file bytes verbatim, then the payload.
    AppendAfterPrimary,
    /// Newline-terminated interpreter stub text, then the payload.
    StubPlusZip,
}

impl CompositionStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            CompositionStrategy::AppendAfterPrimary => "ZIP-last",
            CompositionStrategy::StubPlusZip => "Script+ZIP",
        }
    }
}

/// Result of encoding stub text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStub {
    pub bytes: Vec<u8>,
    /// Characters the encoding could not represent, written as `?`.
    pub replaced: usize,
}

/// Outcome of [`write_stub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubReport {
    pub bytes_written: u64,
    /// Stub length including its trailing newline; the payload starts here.
    pub stub_len: u64,
    pub replaced_chars: usize,
}

/// Stream `primary` to `output`, then append `payload`.
///
/// Returns the total number of bytes written.
pub fn write_append(primary: &Path, payload: &ArchivePayload, output: &Path) -> Result<u64> {
    let mut source = match File::open(primary) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::PrimaryNotFound(primary.to_path_buf()));
        }
        Err(e) => return Err(Error::io(primary, e)),
    };
    if !source.metadata().at(primary)?.is_file() {
        return Err(Error::PrimaryNotFound(primary.to_path_buf()));
    }
    // Creating the output first would truncate the primary
    if same_file(primary, output) {
        return Err(Error::io(
            output,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "output path is the primary file",
            ),
        ));
    }

    let mut out = BufWriter::new(File::create(output).at(output)?);
    let primary_len = io::copy(&mut source, &mut out).at(output)?;
    out.write_all(payload.as_bytes()).at(output)?;
    out.flush().at(output)?;

    let total = primary_len + payload.len() as u64;
    info!(
        primary = %primary.display(),
        output = %output.display(),
        primary_bytes = primary_len,
        payload_bytes = payload.len(),
        "wrote appended polyglot"
    );
    Ok(total)
}

/// Write `stub_text` (exactly one trailing newline) followed by `payload`.
///
/// Characters `encoding` cannot represent are replaced, never fatal.
pub fn write_stub(
    stub_text: &str,
    payload: &ArchivePayload,
    output: &Path,
    encoding: &'static Encoding,
) -> Result<StubReport> {
    let stub = encode_stub(stub_text, encoding);
    if stub.replaced > 0 {
        warn!(
            encoding = encoding.name(),
            replaced = stub.replaced,
            "stub text had unmappable characters"
        );
    }

    let mut out = BufWriter::new(File::create(output).at(output)?);
    out.write_all(&stub.bytes).at(output)?;
    out.write_all(payload.as_bytes()).at(output)?;
    out.flush().at(output)?;

    let report = StubReport {
        bytes_written: (stub.bytes.len() + payload.len()) as u64,
        stub_len: stub.bytes.len() as u64,
        replaced_chars: stub.replaced,
    };
    info!(
        output = %output.display(),
        stub_bytes = report.stub_len,
        payload_bytes = payload.len(),
        "wrote stub polyglot"
    );
    Ok(report)
}

/// Persist `payload` as the whole output; the "primary" is the archive.
pub fn write_zip_only(payload: &ArchivePayload, output: &Path) -> Result<()> {
    fs::write(output, payload.as_bytes()).at(output)?;
    info!(output = %output.display(), bytes = payload.len(), "wrote zip");
    Ok(())
}

/// Copy `output` to `<output>.zip` so tools that pick a handler by
/// extension open it as an archive.
pub fn copy_zip_sibling(output: &Path) -> Result<PathBuf> {
    let mut sibling = output.as_os_str().to_owned();
    sibling.push(".zip");
    let sibling = PathBuf::from(sibling);
    fs::copy(output, &sibling).at(&sibling)?;
    Ok(sibling)
}

/// Encode stub text, guaranteeing exactly one trailing newline is added
/// when absent and none when present.
///
/// UTF-16LE and UTF-16BE are written without a byte order mark.
pub fn encode_stub(text: &str, encoding: &'static Encoding) -> EncodedStub {
    let text: Cow<'_, str> = if text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{text}\n"))
    };

    if encoding == UTF_16LE || encoding == UTF_16BE {
        let bytes = text
            .encode_utf16()
            .flat_map(|unit| {
                if encoding == UTF_16LE {
                    unit.to_le_bytes()
                } else {
                    unit.to_be_bytes()
                }
            })
            .collect();
        return EncodedStub { bytes, replaced: 0 };
    }

    let mut bytes = Vec::with_capacity(text.len());
    let mut replaced = 0;

    let mut encoder = encoding.new_encoder();
    let mut buf = [0u8; 4096];
    let mut rest: &str = &text;
    loop {
        let (result, read, written) =
            encoder.encode_from_utf8_without_replacement(rest, &mut buf, true);
        bytes.extend_from_slice(&buf[..written]);
        rest = &rest[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(_) => {
                replaced += 1;
                bytes.push(b'?');
            }
        }
    }

    EncodedStub { bytes, replaced }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{PayloadEntry, build};
    use tempfile::tempdir;

    fn sample_payload(dir: &Path) -> ArchivePayload {
        let src = dir.join("note.txt");
        fs::write(&src, b"payload note").unwrap();
        build(&[PayloadEntry::new("note.txt", &src)]).unwrap()
    }

    #[test]
    fn append_is_plain_concatenation() {
        let dir = tempdir().unwrap();
        let payload = sample_payload(dir.path());
        let primary = dir.path().join("cover.jpg");
        fs::write(&primary, b"\xFF\xD8\xFF\xE0fake jpeg\xFF\xD9").unwrap();
        let output = dir.path().join("out.jpg");

        let total = write_append(&primary, &payload, &output).unwrap();

        let mut expected = fs::read(&primary).unwrap();
        expected.extend_from_slice(payload.as_bytes());
        assert_eq!(fs::read(&output).unwrap(), expected);
        assert_eq!(total, expected.len() as u64);
    }

    #[test]
    fn append_requires_a_primary() {
        let dir = tempdir().unwrap();
        let payload = sample_payload(dir.path());
        let missing = dir.path().join("missing.pdf");
        let err = write_append(&missing, &payload, &dir.path().join("o")).unwrap_err();
        assert!(matches!(err, Error::PrimaryNotFound(p) if p == missing));
    }

    #[test]
    fn append_refuses_to_overwrite_its_primary() {
        let dir = tempdir().unwrap();
        let payload = sample_payload(dir.path());
        let primary = dir.path().join("doc.pdf");
        fs::write(&primary, b"%PDF-1.4").unwrap();
        assert!(write_append(&primary, &payload, &primary).is_err());
        assert_eq!(fs::read(&primary).unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn newline_is_added_once() {
        let with = encode_stub("echo hi\n", encoding_rs::UTF_8);
        let without = encode_stub("echo hi", encoding_rs::UTF_8);
        assert_eq!(with.bytes, b"echo hi\n");
        assert_eq!(without.bytes, b"echo hi\n");
        assert_eq!(encode_stub("", encoding_rs::UTF_8).bytes, b"\n");
    }

    #[test]
    fn unmappable_characters_become_question_marks() {
        let stub = encode_stub("rem caf\u{e9} \u{2603}", encoding_rs::WINDOWS_1252);
        assert_eq!(stub.bytes, b"rem caf\xE9 ?\n");
        assert_eq!(stub.replaced, 1);
    }

    #[test]
    fn utf16_stubs_keep_their_byte_order() {
        let le = Encoding::for_label(b"utf-16le").unwrap();
        let be = Encoding::for_label(b"utf-16be").unwrap();
        assert_eq!(encode_stub("ab", le).bytes, [b'a', 0, b'b', 0, b'\n', 0]);
        assert_eq!(encode_stub("ab\n", be).bytes, [0, b'a', 0, b'b', 0, b'\n']);
        assert_eq!(encode_stub("\u{2603}", le).bytes, [0x03, 0x26, b'\n', 0]);
        assert_eq!(encode_stub("ab", le).replaced, 0);
    }

    #[test]
    fn long_stubs_span_encoder_buffers() {
        let text = "x".repeat(10_000);
        let stub = encode_stub(&text, encoding_rs::WINDOWS_1252);
        assert_eq!(stub.bytes.len(), 10_001);
        assert_eq!(stub.replaced, 0);
    }

    #[test]
    fn stub_output_is_stub_then_payload() {
        let dir = tempdir().unwrap();
        let payload = sample_payload(dir.path());
        let output = dir.path().join("run.sh");

        let report =
            write_stub("#!/bin/sh\nexit 0", &payload, &output, encoding_rs::UTF_8).unwrap();

        let written = fs::read(&output).unwrap();
        assert_eq!(&written[..report.stub_len as usize], b"#!/bin/sh\nexit 0\n");
        assert_eq!(&written[report.stub_len as usize..], payload.as_bytes());
        assert_eq!(report.bytes_written, written.len() as u64);
    }

    #[test]
    fn zip_only_writes_the_payload_verbatim() {
        let dir = tempdir().unwrap();
        let payload = sample_payload(dir.path());
        let output = dir.path().join("only.zip");
        write_zip_only(&payload, &output).unwrap();
        assert_eq!(fs::read(&output).unwrap(), payload.as_bytes());

        let sibling = copy_zip_sibling(&output).unwrap();
        assert_eq!(sibling, dir.path().join("only.zip.zip"));
        assert_eq!(fs::read(sibling).unwrap(), payload.as_bytes());
    }
}
