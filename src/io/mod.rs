mod local;
mod memory;

pub use local::LocalFileReader;

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Trait for random access reading from a data source
pub trait ReadAt {
    /// Read data at the specified offset into the buffer
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely from `offset`, failing with `UnexpectedEof`
    /// when the source ends first.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(offset, buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source ends before offset {}", offset + buf.len() as u64),
                    ));
                }
                Ok(n) => {
                    offset += n as u64;
                    buf = &mut buf[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<R: ReadAt + ?Sized> ReadAt for &R {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// Sequential `Read` over the byte range `[start, end)` of a [`ReadAt`].
pub struct SectionReader<'a, R: ReadAt + ?Sized> {
    source: &'a R,
    pos: u64,
    end: u64,
}

impl<'a, R: ReadAt + ?Sized> SectionReader<'a, R> {
    pub fn new(source: &'a R, start: u64, len: u64) -> Self {
        Self {
            source,
            pos: start,
            end: start.saturating_add(len),
        }
    }
}

impl<R: ReadAt + ?Sized> Read for SectionReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.source.read_at(self.pos, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "entry data runs past the end of the source",
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}

/// A `Write + Seek` whose positions start at `base` bytes into `inner`.
///
/// Lets an archive writer record offsets relative to the archive start
/// while the underlying file keeps a prefix in front of it.
pub struct OffsetWriter<W> {
    inner: W,
    base: u64,
}

impl<W: Seek> OffsetWriter<W> {
    /// Wraps `inner`, taking its current position as offset zero.
    pub fn new(mut inner: W) -> io::Result<Self> {
        let base = inner.stream_position()?;
        Ok(Self { inner, base })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for OffsetWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Seek> Seek for OffsetWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            SeekFrom::Start(n) => SeekFrom::Start(self.base.checked_add(n).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflows")
            })?),
            other => other,
        };
        let absolute = self.inner.seek(pos)?;
        absolute.checked_sub(self.base).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before the archive start")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out at most three bytes per call.
    struct Trickle(Vec<u8>);

    impl ReadAt for Trickle {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            let data: &[u8] = &self.0;
            let n = buf.len().min(3);
            data.read_at(offset, &mut buf[..n])
        }

        fn size(&self) -> u64 {
            self.0.len() as u64
        }
    }

    #[test]
    fn read_exact_at_loops_over_short_reads() {
        let src = Trickle((0u8..20).collect());
        let mut buf = [0u8; 10];
        src.read_exact_at(5, &mut buf).unwrap();
        assert_eq!(buf, [5, 6, 7, 8, 9, 10, 11, 12, 13, 14]);
    }

    #[test]
    fn read_exact_at_reports_eof() {
        let src = Trickle(vec![1, 2, 3]);
        let mut buf = [0u8; 4];
        let err = src.read_exact_at(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn section_reader_stops_at_section_end() {
        let data: &[u8] = b"prefix-BODY-suffix";
        let mut section = SectionReader::new(data, 7, 4);
        let mut out = String::new();
        section.read_to_string(&mut out).unwrap();
        assert_eq!(out, "BODY");
    }

    #[test]
    fn offset_writer_hides_the_prefix() {
        let mut cursor = io::Cursor::new(Vec::new());
        cursor.write_all(b"PREFIX").unwrap();

        let mut shifted = OffsetWriter::new(cursor).unwrap();
        assert_eq!(shifted.stream_position().unwrap(), 0);
        shifted.write_all(b"abcd").unwrap();
        assert_eq!(shifted.stream_position().unwrap(), 4);
        shifted.seek(SeekFrom::Start(1)).unwrap();
        shifted.write_all(b"X").unwrap();
        assert!(shifted.seek(SeekFrom::Current(-10)).is_err());

        assert_eq!(shifted.into_inner().into_inner(), b"PREFIXaXcd");
    }
}
