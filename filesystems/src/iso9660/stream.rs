// File content streaming over one or more extents.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// A contiguous run of file bytes inside the image, or a sparse run of zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Absolute byte offset inside the image; unused for sparse extents.
    pub offset: u64,
    pub length: u64,
    pub sparse: bool,
}

impl Extent {
    pub fn data(offset: u64, length: u64) -> Self {
        Self { offset, length, sparse: false }
    }

    pub fn sparse(length: u64) -> Self {
        Self { offset: 0, length, sparse: true }
    }
}

/// Read every byte of the given extents into memory.
pub fn read_extents<R: Read + Seek>(reader: &mut R, extents: &[Extent]) -> io::Result<Vec<u8>> {
    let total: u64 = extents.iter().map(|e| e.length).sum();
    let mut data = Vec::with_capacity(total as usize);
    for extent in extents {
        if extent.sparse {
            data.resize(data.len() + extent.length as usize, 0);
            continue;
        }
        reader.seek(SeekFrom::Start(extent.offset))?;
        let start = data.len();
        data.resize(start + extent.length as usize, 0);
        reader.read_exact(&mut data[start..])?;
    }
    Ok(data)
}

/// `Read + Seek` view of a file whose content is spread over extents.
pub struct ExtentStream {
    file: File,
    extents: Vec<Extent>,
    len: u64,
    pos: u64,
}

impl ExtentStream {
    pub fn new(file: File, extents: Vec<Extent>, len: u64) -> Self {
        Self { file, extents, len, pos: 0 }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Extent containing `pos`, with the offset of `pos` inside it.
    fn locate(&self, pos: u64) -> Option<(Extent, u64)> {
        let mut start = 0u64;
        for extent in &self.extents {
            if pos < start + extent.length {
                return Some((*extent, pos - start));
            }
            start += extent.length;
        }
        None
    }
}

impl Read for ExtentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }

        let (extent, within) = match self.locate(self.pos) {
            Some(found) => found,
            None => return Ok(0),
        };

        let available = (extent.length - within).min(self.len - self.pos);
        let want = (buf.len() as u64).min(available) as usize;

        let read = if extent.sparse {
            buf[..want].fill(0);
            want
        } else {
            self.file.seek(SeekFrom::Start(extent.offset + within))?;
            self.file.read(&mut buf[..want])?
        };

        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for ExtentStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => self.len as i128 + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn backing_file(content: &[u8]) -> (tempfile::NamedTempFile, File) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        let file = File::open(tmp.path()).unwrap();
        (tmp, file)
    }

    #[test]
    fn test_stream_spans_extents_and_sparse_runs() {
        let (_tmp, file) = backing_file(b"0123456789abcdef");
        let extents = vec![Extent::data(10, 3), Extent::sparse(2), Extent::data(2, 4)];
        let mut stream = ExtentStream::new(file, extents, 9);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc\0\x002345");
    }

    #[test]
    fn test_seek_end_reports_length_and_partial_reads() {
        let (_tmp, file) = backing_file(b"0123456789");
        let mut stream = ExtentStream::new(file, vec![Extent::data(0, 10)], 10);

        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 10);
        assert_eq!(stream.seek(SeekFrom::Start(7)).unwrap(), 7);
        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"789");
        assert!(stream.seek(SeekFrom::Current(-20)).is_err());
    }

    #[test]
    fn test_read_extents_concatenates() {
        let mut cursor = std::io::Cursor::new(b"hello world".to_vec());
        let data = read_extents(&mut cursor, &[Extent::data(6, 5), Extent::sparse(1), Extent::data(0, 5)]).unwrap();
        assert_eq!(data, b"world\0hello");
    }
}
