use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use super::{SharedStream, lock};

/// A bounded window over a shared base stream, with its own cursor.
///
/// Reads clamp to the declared size; reads at or past the end return zero
/// bytes. Writes that spill past the end are silently discarded (NAND
/// TWL-MBR pre-region writes depend on this), and a write that starts at or
/// past the end reports zero bytes written without erroring. Seeking beyond
/// the end is allowed.
pub struct SubFile {
    base: SharedStream,
    offset: u64,
    size: u64,
    pos: u64,
}

impl SubFile {
    pub fn new(base: SharedStream, offset: u64, size: u64) -> Self {
        SubFile {
            base,
            offset,
            size,
            pos: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn base(&self) -> &SharedStream {
        &self.base
    }

    /// Reads the entire window into memory.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; self.size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

impl Clone for SubFile {
    /// An independent cursor over the same window.
    fn clone(&self) -> Self {
        SubFile {
            base: Arc::clone(&self.base),
            offset: self.offset,
            size: self.size,
            pos: 0,
        }
    }
}

impl Read for SubFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.size - self.pos) as usize);
        let mut base = lock(&self.base);
        base.seek(SeekFrom::Start(self.offset + self.pos))?;
        let n = base.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for SubFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            // Entirely out of bounds: report nothing written, no error.
            return Ok(0);
        }
        let keep = buf.len().min((self.size - self.pos) as usize);
        {
            let mut base = lock(&self.base);
            base.seek(SeekFrom::Start(self.offset + self.pos))?;
            base.write_all(&buf[..keep])?;
        }
        // The spill past the end, if any, is discarded but still counted so
        // callers streaming across the boundary do not error out.
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.base).flush()
    }
}

impl Seek for SubFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.size.checked_add_signed(n),
            SeekFrom::Current(n) => self.pos.checked_add_signed(n),
        };
        match target {
            Some(t) => {
                self.pos = t;
                Ok(t)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of sub-file",
            )),
        }
    }
}

impl PartialEq for SubFile {
    /// Two sub-files are the same view if they window the same base at the
    /// same place, regardless of cursor position.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.base, &other.base)
            && self.offset == other.offset
            && self.size == other.size
    }
}

impl Eq for SubFile {}

impl Hash for SubFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.base) as *const () as usize).hash(state);
        self.offset.hash(state);
        self.size.hash(state);
    }
}

impl fmt::Debug for SubFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubFile")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("pos", &self.pos)
            .finish()
    }
}
