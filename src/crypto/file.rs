use std::io::{self, Read, Seek, SeekFrom, Write};

use super::cipher::{CbcCipher, CtrCipher};

/// A seekable view that decrypts AES-CTR data on the way out and re-encrypts
/// on the way in. Position `o` in this view maps to position `o` of the
/// wrapped stream; the keystream is addressed by absolute offset, so random
/// access costs nothing.
pub struct CtrFile<S> {
    inner: S,
    cipher: CtrCipher,
    pos: u64,
}

impl<S> CtrFile<S> {
    /// Wraps `inner`, which is taken to be positioned at its start.
    pub fn new(inner: S, cipher: CtrCipher) -> Self {
        CtrFile {
            inner,
            cipher,
            pos: 0,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: Read + Seek> Read for CtrFile<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply(self.pos, &mut buf[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: Write + Seek> Write for CtrFile<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut enc = buf.to_vec();
        self.cipher.apply(self.pos, &mut enc);
        let n = self.inner.write(&enc)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for CtrFile<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let p = self.inner.seek(pos)?;
        self.pos = p;
        Ok(p)
    }
}

/// A seekable AES-CBC view.
///
/// Reads are random-access: the IV for an interior block is the previous
/// ciphertext block, re-fetched from the wrapped stream, and reads clamp to
/// the full-block span available underneath. Writes must be 16-byte aligned
/// in both offset and length; what a misaligned caller would mean is not
/// well-defined under CBC.
pub struct CbcFile<S> {
    inner: S,
    cipher: CbcCipher,
    pos: u64,
}

impl<S> CbcFile<S> {
    /// Wraps `inner`, which is taken to be positioned at its start.
    pub fn new(inner: S, cipher: CbcCipher) -> Self {
        CbcFile {
            inner,
            cipher,
            pos: 0,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read + Seek> CbcFile<S> {
    /// IV in effect for the block starting at aligned offset `block_start`.
    fn iv_for(&mut self, block_start: u64) -> io::Result<[u8; 16]> {
        if block_start == 0 {
            return Ok(self.cipher.iv());
        }
        let mut iv = [0u8; 16];
        self.inner.seek(SeekFrom::Start(block_start - 16))?;
        self.inner.read_exact(&mut iv)?;
        Ok(iv)
    }
}

impl<S: Read + Seek> Read for CbcFile<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let start = self.pos;
        let aligned = start & !15;
        let skip = (start - aligned) as usize;
        let span = (skip + buf.len()).div_ceil(16) * 16;

        let iv = self.iv_for(aligned)?;

        let mut ct = vec![0u8; span];
        self.inner.seek(SeekFrom::Start(aligned))?;
        let mut got = 0;
        while got < span {
            let n = self.inner.read(&mut ct[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        let full = got & !15;
        if full <= skip {
            return Ok(0);
        }
        ct.truncate(full);
        self.cipher.with_iv(iv).decrypt(&mut ct)?;

        let avail = (full - skip).min(buf.len());
        buf[..avail].copy_from_slice(&ct[skip..skip + avail]);
        self.pos += avail as u64;
        // Keep the underlying cursor in step for relative seeks.
        self.inner.seek(SeekFrom::Start(self.pos))?;
        Ok(avail)
    }
}

impl<S: Read + Write + Seek> Write for CbcFile<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos % 16 != 0 || buf.len() % 16 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "CBC writes must be block-aligned",
            ));
        }
        let iv = self.iv_for(self.pos)?;
        let mut enc = buf.to_vec();
        self.cipher.with_iv(iv).encrypt(&mut enc)?;
        self.inner.seek(SeekFrom::Start(self.pos))?;
        let n = self.inner.write(&enc)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for CbcFile<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let p = self.inner.seek(pos)?;
        self.pos = p;
        Ok(p)
    }
}
