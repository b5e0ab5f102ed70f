//! The ExeFS reader: ten named entries behind a 0x200-byte header, plus the
//! backward-LZSS decompressor for `.code`.
//!
//! Inside an NCCH the `.code` entry may decrypt under the secondary
//! (possibly seeded) key while everything else, header included, uses the
//! primary key. The reader therefore holds up to two decrypted views over
//! the same region and `open` hands out the correctly keyed one.

use std::io::{Read, Seek, SeekFrom};

use binrw::BinRead;
use sha2::{Digest, Sha256};

use crate::error::{CtrioError, CtrioResult};
use crate::io::{ConcatFile, RandomAccess, SharedStream, SubFile};
use crate::models::exefs::{EXEFS_HEADER_SIZE, ExefsEntry, ExefsHeader};

pub struct ExefsReader {
    header: ExefsHeader,
    primary: SharedStream,
    /// Present only when `.code` uses a different key.
    secondary: Option<SharedStream>,
}

impl ExefsReader {
    /// Builds a reader over already-decrypted views of the ExeFS region.
    pub(crate) fn with_views(
        primary: SharedStream,
        secondary: Option<SharedStream>,
    ) -> CtrioResult<Self> {
        let mut header_region = SubFile::new(primary.clone(), 0, EXEFS_HEADER_SIZE);
        let header = ExefsHeader::read(&mut header_region)?;
        Ok(ExefsReader {
            header,
            primary,
            secondary,
        })
    }

    /// Opens an ExeFS that needs no decryption, e.g. the NAND essentials
    /// backup.
    pub fn new(stream: SharedStream) -> CtrioResult<Self> {
        Self::with_views(stream, None)
    }

    pub fn header(&self) -> &ExefsHeader {
        &self.header
    }

    /// Names of the used entries, in slot order.
    pub fn entries(&self) -> Vec<String> {
        self.header
            .entries
            .iter()
            .filter(|e| e.is_used())
            .map(|e| e.name_str().to_string())
            .collect()
    }

    fn entry(&self, name: &str) -> CtrioResult<(usize, &ExefsEntry)> {
        self.header
            .entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.is_used() && e.name_str() == name)
            .ok_or(CtrioError::InvalidHeader {
                kind: "ExeFS entry",
                offset: 0,
            })
    }

    /// The view `name` decrypts under: `.code` goes to the secondary key
    /// when one is in play.
    fn view_for(&self, name: &str) -> &SharedStream {
        match (&self.secondary, name) {
            (Some(secondary), ".code") => secondary,
            _ => &self.primary,
        }
    }

    /// Opens one entry as an independent seekable stream.
    pub fn open(&self, name: &str) -> CtrioResult<SubFile> {
        let (_, entry) = self.entry(name)?;
        Ok(SubFile::new(
            self.view_for(name).clone(),
            EXEFS_HEADER_SIZE + entry.offset as u64,
            entry.size as u64,
        ))
    }

    /// Recomputes an entry's SHA-256 and compares it with the reverse-indexed
    /// hash table.
    pub fn verify(&self, name: &str) -> CtrioResult<bool> {
        let (index, _) = self.entry(name)?;
        let data = self.open(name)?.read_all()?;
        let digest = Sha256::digest(&data);
        Ok(digest.as_slice() == self.header.hash_for(index))
    }

    /// One logical decrypted byte-stream spanning the header and every
    /// entry, stitching the split-key `.code` window in between
    /// primary-keyed stretches.
    pub fn open_decrypted(&self) -> CtrioResult<ConcatFile> {
        let total = self.total_size();
        let Some(secondary) = &self.secondary else {
            let whole = SubFile::new(self.primary.clone(), 0, total);
            return Ok(ConcatFile::new(vec![(
                Box::new(whole) as Box<dyn RandomAccess>,
                total,
            )]));
        };
        let (_, code) = self.entry(".code")?;
        let code_start = EXEFS_HEADER_SIZE + code.offset as u64;
        let code_end = code_start + code.size as u64;

        let mut parts: Vec<(Box<dyn RandomAccess>, u64)> = Vec::new();
        parts.push((
            Box::new(SubFile::new(self.primary.clone(), 0, code_start)),
            code_start,
        ));
        parts.push((
            Box::new(SubFile::new(secondary.clone(), code_start, code.size as u64)),
            code.size as u64,
        ));
        if code_end < total {
            parts.push((
                Box::new(SubFile::new(self.primary.clone(), code_end, total - code_end)),
                total - code_end,
            ));
        }
        Ok(ConcatFile::new(parts))
    }

    fn total_size(&self) -> u64 {
        EXEFS_HEADER_SIZE
            + self
                .header
                .entries
                .iter()
                .filter(|e| e.is_used())
                .map(|e| e.offset as u64 + e.size as u64)
                .max()
                .unwrap_or(0)
    }

    /// Reads `.code` and undoes the backward-LZSS compression.
    pub fn decompress_code(&self) -> CtrioResult<Vec<u8>> {
        let mut code = self.open(".code")?;
        code.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        code.read_to_end(&mut data)?;
        decompress_lzss_backward(&data)
    }
}

/// Nintendo's backward LZSS, as used for `.code`: an eight-byte footer at
/// the end gives the encoded-region extent and the growth, and decompression
/// walks from the end with 8 flag bits per group and 12-bit-offset /
/// 4-bit-length back-references.
pub fn decompress_lzss_backward(data: &[u8]) -> CtrioResult<Vec<u8>> {
    let fail = CtrioError::CodeDecompressionFailed;
    if data.len() < 8 {
        return Err(fail("input shorter than the footer"));
    }
    let len = data.len();
    let extra = u32::from_le_bytes(data[len - 4..len].try_into().unwrap()) as usize;
    let word = u32::from_le_bytes(data[len - 8..len - 4].try_into().unwrap());
    let footer_len = (word >> 24) as usize;
    let enc_len = (word & 0x00FF_FFFF) as usize;

    if extra == 0 {
        // Not compressed at all; the payload is the file minus the footer.
        return Ok(data[..len - 8].to_vec());
    }
    if footer_len < 8 || enc_len > len || footer_len > enc_len {
        return Err(fail("footer extents out of range"));
    }

    let raw_len = len - enc_len;
    let out_len = len + extra;
    let mut out = vec![0u8; out_len];
    out[..raw_len].copy_from_slice(&data[..raw_len]);

    // pak walks down through the encoded bytes, dst down through the output.
    let mut pak = len - footer_len;
    let mut dst = out_len;
    let mut flags = 0u8;
    let mut mask = 0u8;

    while dst > raw_len {
        if mask == 0 {
            if pak <= raw_len {
                return Err(fail("ran out of flag bytes"));
            }
            pak -= 1;
            flags = data[pak];
            mask = 0x80;
        }
        if flags & mask == 0 {
            if pak <= raw_len {
                return Err(fail("ran out of literal bytes"));
            }
            pak -= 1;
            dst -= 1;
            out[dst] = data[pak];
        } else {
            if pak < raw_len + 2 {
                return Err(fail("truncated back-reference"));
            }
            pak -= 1;
            let hi = data[pak] as usize;
            pak -= 1;
            let lo = data[pak] as usize;
            let pair = (hi << 8) | lo;
            let count = (pair >> 12) + 3;
            let disp = (pair & 0xFFF) + 3;
            if count > dst - raw_len {
                return Err(fail("back-reference underruns the output"));
            }
            for _ in 0..count {
                dst -= 1;
                if dst + disp >= out_len {
                    return Err(fail("back-reference overruns the output"));
                }
                out[dst] = out[dst + disp];
            }
        }
        mask >>= 1;
    }

    Ok(out)
}
