//! The NCCH reader: parses the per-content container header and hands out
//! decrypted views of the ExHeader, ExeFS, RomFS, logo and plain regions,
//! each under the keyslot and counter its region demands.

use std::io::{Seek, SeekFrom};

use binrw::BinRead;
use byteorder::{BigEndian, ByteOrder};
use log::debug;
use sha2::{Digest, Sha256};

use crate::crypto::{KeyEngine, KeyType, slot};
use crate::error::{CtrioError, CtrioResult};
use crate::exefs::ExefsReader;
use crate::io::{RandomAccess, SharedStream, SubFile, shared};
use crate::models::ncch::{NCCH_MAGIC, NcchHeader};
use crate::romfs::RomfsReader;
use crate::seeddb;

/// Region tags that form byte 8 of a region's AES counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcchSection {
    ExHeader = 1,
    ExeFs = 2,
    RomFs = 3,
}

/// Counter for a region: program id (big-endian) || section tag || zeros.
pub(crate) fn region_counter(program_id: u64, section: NcchSection) -> u128 {
    let mut counter = [0u8; 16];
    BigEndian::write_u64(&mut counter[0..8], program_id);
    counter[8] = section as u8;
    u128::from_be_bytes(counter)
}

/// Derives the seeded secondary KeyY:
/// `SHA-256(primary KeyY || program id BE || seed)[0..16]`.
pub(crate) fn seeded_key_y(key_y: [u8; 16], program_id: u64, seed: [u8; 16]) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(key_y);
    hasher.update(program_id.to_be_bytes());
    hasher.update(seed);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[0..16]);
    out
}

/// The stored verification word for a seed: the first four bytes of
/// `SHA-256(seed || program id LE)`, read big-endian.
pub(crate) fn seed_check_word(seed: [u8; 16], program_id: u64) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(program_id.to_le_bytes());
    BigEndian::read_u32(&hasher.finalize()[0..4])
}

fn secondary_slot(crypto_method: u8) -> Option<u8> {
    match crypto_method {
        0x00 => Some(slot::NCCH),
        0x01 => Some(slot::NCCH_70),
        0x0A => Some(slot::NCCH_93),
        0x0B => Some(slot::NCCH_96),
        _ => None,
    }
}

impl std::fmt::Debug for NcchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NcchReader")
            .field("offset", &self.offset)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

pub struct NcchReader {
    base: SharedStream,
    /// Where the NCCH starts within `base`; non-zero inside CIA/CCI.
    offset: u64,
    header: NcchHeader,
    engine: KeyEngine,
    unit: u64,
    /// Normal keys for the primary and secondary regions; `None` when the
    /// content is flagged no-crypto.
    primary_key: Option<[u8; 16]>,
    secondary_key: Option<[u8; 16]>,
}

impl NcchReader {
    /// Opens an NCCH at `offset` within `base`. A seed passed here overrides
    /// the registry lookup for seeded contents.
    pub fn new(
        base: SharedStream,
        offset: u64,
        engine: &KeyEngine,
        seed: Option<[u8; 16]>,
    ) -> CtrioResult<Self> {
        let mut header_region = SubFile::new(base.clone(), offset, 0x200);
        let header = NcchHeader::read(&mut header_region)?;
        if header.magic != NCCH_MAGIC {
            return Err(CtrioError::InvalidHeader {
                kind: "NCCH",
                offset: offset + 0x100,
            });
        }

        let mut engine = engine.clone();
        let unit = header.content_unit_size();

        let (primary_key, secondary_key) = if header.is_plain() {
            debug!("NCCH {:016x} is not encrypted", header.program_id);
            (None, None)
        } else if header.uses_fixed_key() {
            let fixed = if header.is_system_title() {
                slot::FIXED_SYSTEM_KEY
            } else {
                slot::ZERO_KEY
            };
            debug!(
                "NCCH {:016x} uses fixed-key crypto (slot 0x{fixed:02X})",
                header.program_id
            );
            let key = engine.keyslot_normal(fixed)?;
            (Some(key), Some(key))
        } else {
            let key_y = header.key_y();
            engine.set_keyslot_bytes(KeyType::Y, slot::NCCH, key_y);
            let primary = engine.keyslot_normal(slot::NCCH)?;

            let sec_slot =
                secondary_slot(header.crypto_method()).ok_or(CtrioError::InvalidHeader {
                    kind: "NCCH crypto method",
                    offset: offset + 0x188 + 3,
                })?;
            let sec_key_y = if header.uses_seed() {
                let seed = match seed.or_else(|| seeddb::get_seed(header.program_id)) {
                    Some(s) => s,
                    None => return Err(CtrioError::SeedNotFound(header.program_id)),
                };
                if seed_check_word(seed, header.program_id) != header.seed_check {
                    return Err(CtrioError::InvalidHeader {
                        kind: "NCCH seed check",
                        offset: offset + 0x114,
                    });
                }
                debug!("NCCH {:016x} uses seed crypto", header.program_id);
                seeded_key_y(key_y, header.program_id, seed)
            } else {
                key_y
            };
            engine.set_keyslot_bytes(KeyType::Y, sec_slot, sec_key_y);
            let secondary = engine.keyslot_normal(sec_slot)?;
            (Some(primary), Some(secondary))
        };

        Ok(NcchReader {
            base,
            offset,
            header,
            engine,
            unit,
            primary_key,
            secondary_key,
        })
    }

    /// Opens an NCCH taking ownership of a plain stream.
    pub fn from_stream<S: RandomAccess + 'static>(
        stream: S,
        engine: &KeyEngine,
        seed: Option<[u8; 16]>,
    ) -> CtrioResult<Self> {
        Self::new(shared(stream), 0, engine, seed)
    }

    pub fn header(&self) -> &NcchHeader {
        &self.header
    }

    pub fn program_id(&self) -> u64 {
        self.header.program_id
    }

    pub fn partition_id(&self) -> u64 {
        self.header.partition_id
    }

    pub fn product_code(&self) -> String {
        let raw = &self.header.product_code;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    pub fn is_encrypted(&self) -> bool {
        self.primary_key.is_some()
    }

    /// Whether the ExeFS `.code` entry decrypts under a different key than
    /// the rest of the ExeFS.
    fn split_exefs_key(&self) -> bool {
        match (self.primary_key, self.secondary_key) {
            (Some(p), Some(s)) => p != s,
            _ => false,
        }
    }

    fn region(&self, offset_units: u32, size_units: u32) -> SubFile {
        SubFile::new(
            self.base.clone(),
            self.offset + offset_units as u64 * self.unit,
            size_units as u64 * self.unit,
        )
    }

    fn cipher_view(
        &self,
        region: SubFile,
        key: Option<[u8; 16]>,
        section: NcchSection,
    ) -> Box<dyn RandomAccess> {
        match key {
            Some(key) => {
                let ctr = region_counter(self.header.program_id, section);
                Box::new(crate::crypto::file::CtrFile::new(
                    region,
                    crate::crypto::cipher::CtrCipher::new(key, ctr, false),
                ))
            }
            None => Box::new(region),
        }
    }

    /// The extended header region (header plus access descriptor),
    /// decrypted under the primary key.
    pub fn open_exheader(&self) -> CtrioResult<Box<dyn RandomAccess>> {
        if self.header.exheader_size == 0 {
            return Err(CtrioError::InvalidHeader {
                kind: "NCCH exheader",
                offset: self.offset + 0x180,
            });
        }
        let region = SubFile::new(
            self.base.clone(),
            self.offset + 0x200,
            self.header.exheader_size as u64 * 2,
        );
        Ok(self.cipher_view(region, self.primary_key, NcchSection::ExHeader))
    }

    /// The logo region; never encrypted.
    pub fn open_logo(&self) -> CtrioResult<SubFile> {
        Ok(self.region(self.header.logo_offset, self.header.logo_size))
    }

    /// The plain region; never encrypted.
    pub fn open_plain(&self) -> CtrioResult<SubFile> {
        Ok(self.region(self.header.plain_offset, self.header.plain_size))
    }

    pub fn open_exefs(&self) -> CtrioResult<ExefsReader> {
        if self.header.exefs_size == 0 {
            return Err(CtrioError::InvalidHeader {
                kind: "NCCH exefs",
                offset: self.offset + 0x1A0,
            });
        }
        let region = self.region(self.header.exefs_offset, self.header.exefs_size);
        let primary = self.cipher_view(region.clone(), self.primary_key, NcchSection::ExeFs);
        let secondary = if self.split_exefs_key() {
            Some(self.cipher_view(region, self.secondary_key, NcchSection::ExeFs))
        } else {
            None
        };
        ExefsReader::with_views(shared(primary), secondary.map(shared))
    }

    pub fn open_romfs(&self) -> CtrioResult<RomfsReader> {
        let view = self.open_romfs_stream()?;
        RomfsReader::new(shared(view))
    }

    /// The raw decrypted RomFS region (IVFC wrapper included), for callers
    /// that want the bytes rather than the filesystem.
    pub fn open_romfs_stream(&self) -> CtrioResult<Box<dyn RandomAccess>> {
        if self.header.romfs_size == 0 {
            return Err(CtrioError::InvalidHeader {
                kind: "NCCH romfs",
                offset: self.offset + 0x1B0,
            });
        }
        let region = self.region(self.header.romfs_offset, self.header.romfs_size);
        Ok(self.cipher_view(region, self.secondary_key, NcchSection::RomFs))
    }

    /// The SMDH held in the `icon` ExeFS entry, when present.
    pub fn open_smdh(&self) -> CtrioResult<crate::models::smdh::Smdh> {
        let exefs = self.open_exefs()?;
        let mut icon = exefs.open("icon")?;
        icon.seek(SeekFrom::Start(0))?;
        crate::smdh::read_smdh(&mut icon)
    }
}
