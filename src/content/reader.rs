use crate::storage::error::{StorageError, StorageResult};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Sized random-access reader over one committed blob
#[derive(Debug)]
pub struct BlobReader {
    file: File,
    size: u64,
}

impl BlobReader {
    pub(crate) fn open(path: &Path) -> StorageResult<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!("blob {}", path.display())))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read into `buf` starting at `offset`; short only at end of blob
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut read = 0;
        while read < buf.len() {
            let n = read_at(&self.file, &mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    /// Sequential reader over `[offset, offset + len)`
    pub fn section(&self, offset: u64, len: u64) -> SectionReader<'_> {
        SectionReader {
            reader: self,
            pos: offset,
            end: offset.saturating_add(len).min(self.size),
        }
    }

    pub fn close(self) -> StorageResult<()> {
        drop(self.file);
        Ok(())
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

pub struct SectionReader<'a> {
    reader: &'a BlobReader,
    pos: u64,
    end: u64,
}

impl Read for SectionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }
        let max = ((self.end - self.pos) as usize).min(buf.len());
        let n = self.reader.read_at(&mut buf[..max], self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}
