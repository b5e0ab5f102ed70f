use std::io::{self, Read, Seek, SeekFrom, Write};

use super::RandomAccess;

/// Read-only concatenation of an ordered list of streams.
///
/// The cursor is a virtual offset spanning all components; reads cross
/// component boundaries transparently. The ExeFS reader uses this to present
/// one logical stream over regions that decrypt under different keys.
pub struct ConcatFile {
    parts: Vec<Part>,
    /// starts[i] is the virtual offset of part i; starts[len] is the total.
    starts: Vec<u64>,
    pos: u64,
}

struct Part {
    stream: Box<dyn RandomAccess>,
    size: u64,
}

impl ConcatFile {
    pub fn new(parts: Vec<(Box<dyn RandomAccess>, u64)>) -> Self {
        let mut starts = Vec::with_capacity(parts.len() + 1);
        let mut total = 0u64;
        for (_, size) in &parts {
            starts.push(total);
            total += size;
        }
        starts.push(total);
        ConcatFile {
            parts: parts
                .into_iter()
                .map(|(stream, size)| Part { stream, size })
                .collect(),
            starts,
            pos: 0,
        }
    }

    pub fn len(&self) -> u64 {
        *self.starts.last().unwrap_or(&0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the component containing `pos`, found on the prefix sums.
    fn locate(&self, pos: u64) -> Option<usize> {
        if pos >= self.len() {
            return None;
        }
        match self.starts.binary_search(&pos) {
            Ok(i) if i < self.parts.len() => Some(i),
            Ok(i) => Some(i - 1),
            Err(i) => Some(i - 1),
        }
    }
}

impl Read for ConcatFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some(idx) = self.locate(self.pos) else {
                break;
            };
            let intra = self.pos - self.starts[idx];
            let part = &mut self.parts[idx];
            let want = (buf.len() - filled).min((part.size - intra) as usize);
            part.stream.seek(SeekFrom::Start(intra))?;
            let n = part.stream.read(&mut buf[filled..filled + want])?;
            if n == 0 {
                break;
            }
            filled += n;
            self.pos += n as u64;
        }
        Ok(filled)
    }
}

impl Write for ConcatFile {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "concatenated streams are read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for ConcatFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.len().checked_add_signed(n),
            SeekFrom::Current(n) => self.pos.checked_add_signed(n),
        };
        match target {
            Some(t) => {
                self.pos = t;
                Ok(t)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of concatenated stream",
            )),
        }
    }
}
