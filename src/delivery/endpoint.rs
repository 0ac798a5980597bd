//! Delivery endpoints
//!
//! Blocking, positioned I/O. Several reader actors may call
//! [`Source::read_at`] concurrently, so implementations serialize access
//! internally where the underlying handle needs it.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Where delivered bytes come from
pub trait Source: Send + Sync {
    /// Read into `buf` starting at stream `offset`. Returns the number of
    /// bytes read; 0 means end of stream.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total size, if known up front
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// Where delivered bytes go
pub trait Sink: Send + Sync {
    /// Write all of `data` at stream `offset`
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Called once after the last block was written successfully
    fn finish(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Local file opened for reading
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            file: Mutex::new(file),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        loop {
            match file.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.size)
    }
}

/// Local file created (or truncated) for writing
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    fn finish(&self) -> io::Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()
    }
}

/// In-memory source
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl Source for MemorySource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// In-memory sink; gaps between writes are zero-filled
#[derive(Debug, Default)]
pub struct MemorySink {
    data: Mutex<Vec<u8>>,
    finished: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Bytes {
        Bytes::from(self.data.lock().clone())
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }
}

impl Sink for MemorySink {
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = start + data.len();
        let mut buf = self.data.lock();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn finish(&self) -> io::Result<()> {
        *self.finished.lock() = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads_at_offset() {
        let source = MemorySource::new(&b"hello world"[..]);
        let mut buf = [0u8; 5];
        assert_eq!(source.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(source.read_at(9, &mut buf).unwrap(), 2);
        assert_eq!(source.read_at(11, &mut buf).unwrap(), 0);
        assert_eq!(source.size_hint(), Some(11));
    }

    #[test]
    fn test_memory_sink_out_of_order() {
        let sink = MemorySink::new();
        sink.write_at(4, b"efgh").unwrap();
        sink.write_at(0, b"abcd").unwrap();
        assert_eq!(&sink.contents()[..], b"abcdefgh");
        assert!(!sink.is_finished());
        sink.finish().unwrap();
        assert!(sink.is_finished());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("transferbuf_endpoint_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let src_path = dir.join("src.bin");
        let dst_path = dir.join("dst.bin");
        std::fs::write(&src_path, b"0123456789").unwrap();

        let source = FileSource::open(&src_path).unwrap();
        let sink = FileSink::create(&dst_path).unwrap();
        assert_eq!(source.size_hint(), Some(10));

        let mut buf = [0u8; 4];
        let n = source.read_at(6, &mut buf).unwrap();
        sink.write_at(6, &buf[..n]).unwrap();
        let n = source.read_at(0, &mut buf[..]).unwrap();
        sink.write_at(0, &buf[..n]).unwrap();
        sink.finish().unwrap();

        let written = std::fs::read(&dst_path).unwrap();
        assert_eq!(&written[..4], b"0123");
        assert_eq!(&written[6..], b"6789");

        std::fs::remove_dir_all(dir).ok();
    }
}
