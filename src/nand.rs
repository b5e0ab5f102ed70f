//! The NAND reader: NCSD parsing, per-partition counter derivation, the
//! TWL/CTR keyslot split, and the GM9-style embedded essentials backup.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use binrw::BinRead;
use log::{debug, warn};
use sha1::{Digest, Sha1};

use crate::constants::{MEDIA_UNIT, NAND_FALLBACK_CTR};
use crate::crypto::file::CtrFile;
use crate::crypto::{KeyEngine, slot};
use crate::error::{CtrioError, CtrioResult};
use crate::exefs::ExefsReader;
use crate::io::{RandomAccess, SharedStream, SubFile, lock, shared};
use crate::models::ncsd::{
    CRYPT_TYPE_CTR_NEW, CRYPT_TYPE_TWL, FS_TYPE_AGB_SAVE, FS_TYPE_FIRM, FS_TYPE_NONE,
    FS_TYPE_NORMAL, NCSD_MAGIC, NcsdHeader,
};

/// Semantic section ids. Physical slots 0-7 are addressed separately via
/// [`NandReader::open_partition_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NandSection {
    /// The 0x200-byte NCSD header, raw.
    Header,
    /// The decrypted TWL MBR window (0x1BE-0x1FF of the TWL view).
    TwlMbr,
    TwlNand,
    AgbSave,
    Firm0,
    Firm1,
    CtrNand,
    /// Keyslot 0x11 with counter 0 is documented for this sector, but no
    /// trusted vector exists; the bytes are exposed raw.
    Sector0x96,
    /// Anything past the NCSD image size (GM9 bonus drive), raw.
    BonusVolume,
}

const SECTOR_0X96_OFFSET: u64 = 0x96 * MEDIA_UNIT;
const TWL_MBR_OFFSET: u64 = 0x1BE;
const TWL_MBR_SIZE: u64 = 0x42;

#[derive(Debug, Clone, Copy)]
struct PartitionSlot {
    section: NandSection,
    offset: u64,
    size: u64,
    keyslot: u8,
}

/// One decoded TWL MBR partition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwlPartition {
    pub partition_type: u8,
    pub offset: u64,
    pub size: u64,
}

/// Explicit overrides for material normally pulled from the embedded
/// essentials backup.
#[derive(Debug, Default)]
pub struct NandOpts {
    pub cid: Option<[u8; 16]>,
    pub otp: Option<Vec<u8>>,
    pub movable: Option<Vec<u8>>,
}

pub struct NandReader {
    base: SharedStream,
    header: NcsdHeader,
    engine: KeyEngine,
    ctr_base: u128,
    file_size: u64,
    image_size: u64,
    partitions: Vec<Option<PartitionSlot>>,
    essentials: Option<ExefsReader>,
    movable: Option<Vec<u8>>,
}

fn essentials_entry(essentials: &Option<ExefsReader>, name: &str) -> Option<Vec<u8>> {
    let exefs = essentials.as_ref()?;
    let mut file = exefs.open(name).ok()?;
    file.read_all().ok()
}

impl NandReader {
    pub fn new(base: SharedStream, engine: &KeyEngine, opts: NandOpts) -> CtrioResult<Self> {
        let mut header_region = SubFile::new(base.clone(), 0, 0x200);
        let header = NcsdHeader::read(&mut header_region)?;
        if header.magic != NCSD_MAGIC {
            return Err(CtrioError::InvalidHeader {
                kind: "NAND NCSD",
                offset: 0x100,
            });
        }

        let file_size = lock(&base).seek(SeekFrom::End(0))?;
        let image_size = header.image_size as u64 * MEDIA_UNIT;

        // GM9 backups embed an ExeFS with nand_cid / otp / movable right
        // after the header.
        let essentials = ExefsReader::new(shared(SubFile::new(base.clone(), 0x200, 0x2000))).ok();

        let mut engine = engine.clone();
        if let Some(otp) = opts.otp.or_else(|| essentials_entry(&essentials, "otp")) {
            if let Err(err) = engine.setup_keys_from_otp(&otp) {
                warn!("NAND OTP ingestion failed: {err}");
            }
        }
        let movable = opts
            .movable
            .or_else(|| essentials_entry(&essentials, "movable"));
        if let Some(movable) = &movable {
            if let Err(err) = engine.setup_sd_key_from_movable(movable) {
                warn!("NAND movable.sed ingestion failed: {err}");
            }
        }

        let cid = opts.cid.or_else(|| {
            essentials_entry(&essentials, "nand_cid").and_then(|raw| raw.get(0..16).map(|s| {
                let mut cid = [0u8; 16];
                cid.copy_from_slice(s);
                cid
            }))
        });
        let ctr_base = match cid {
            Some(cid) => {
                u128::from_be_bytes(Sha1::digest(cid)[0..16].try_into().expect("sha1 width"))
            }
            None => {
                warn!("no NAND CID available; falling back to the default counter");
                NAND_FALLBACK_CTR
            }
        };

        let mut partitions = Vec::with_capacity(8);
        let mut firm_count = 0usize;
        let mut twl_seen = false;
        for i in 0..8 {
            let record = header.partition_table[i];
            let fs_type = header.partition_fs_types[i];
            let crypt_type = header.partition_crypt_types[i];
            if fs_type == FS_TYPE_NONE || record.length == 0 {
                partitions.push(None);
                continue;
            }
            let (section, keyslot) = match (fs_type, crypt_type) {
                (_, CRYPT_TYPE_TWL) if !twl_seen => {
                    twl_seen = true;
                    (NandSection::TwlNand, slot::TWL_NAND)
                }
                (FS_TYPE_FIRM, _) => {
                    firm_count += 1;
                    (
                        if firm_count == 1 {
                            NandSection::Firm0
                        } else {
                            NandSection::Firm1
                        },
                        slot::FIRM,
                    )
                }
                (FS_TYPE_AGB_SAVE, _) => (NandSection::AgbSave, slot::FIRM),
                (FS_TYPE_NORMAL, CRYPT_TYPE_CTR_NEW) => {
                    (NandSection::CtrNand, slot::CTR_NAND_NEW)
                }
                (FS_TYPE_NORMAL, _) => (NandSection::CtrNand, slot::FIRM),
                _ => {
                    debug!("NAND partition {i} has unknown fs/crypt {fs_type}/{crypt_type}");
                    partitions.push(None);
                    continue;
                }
            };
            partitions.push(Some(PartitionSlot {
                section,
                offset: record.offset as u64 * MEDIA_UNIT,
                size: record.length as u64 * MEDIA_UNIT,
                keyslot,
            }));
        }

        Ok(NandReader {
            base,
            header,
            engine,
            ctr_base,
            file_size,
            image_size,
            partitions,
            essentials,
            movable,
        })
    }

    pub fn from_file(path: &Path, engine: &KeyEngine, opts: NandOpts) -> CtrioResult<Self> {
        let file = File::options().read(true).write(true).open(path)
            .or_else(|_| File::open(path))?;
        Self::new(shared(file), engine, opts)
    }

    pub fn header(&self) -> &NcsdHeader {
        &self.header
    }

    pub fn engine(&self) -> &KeyEngine {
        &self.engine
    }

    pub fn ctr_base(&self) -> u128 {
        self.ctr_base
    }

    /// The embedded essentials backup, when one parsed.
    pub fn essentials(&self) -> Option<&ExefsReader> {
        self.essentials.as_ref()
    }

    /// The movable.sed blob from the essentials (or the explicit override).
    pub fn movable_sed(&self) -> Option<&[u8]> {
        self.movable.as_deref()
    }

    /// Smallest file size that holds every partition.
    pub fn min_size(&self) -> u64 {
        self.partitions
            .iter()
            .flatten()
            .map(|p| p.offset + p.size)
            .max()
            .unwrap_or(0)
    }

    /// The whole backing file, raw.
    pub fn open_raw(&self) -> SubFile {
        SubFile::new(self.base.clone(), 0, self.file_size)
    }

    fn slot_for(&self, section: NandSection) -> CtrioResult<PartitionSlot> {
        self.partitions
            .iter()
            .flatten()
            .find(|p| p.section == section)
            .copied()
            .ok_or(CtrioError::InvalidHeader {
                kind: "NAND partition table",
                offset: 0x110,
            })
    }

    fn open_slot(&self, part: PartitionSlot) -> CtrioResult<NandPartFile> {
        let region = SubFile::new(self.base.clone(), part.offset, part.size);
        let cipher = self
            .engine
            .create_ctr_cipher(part.keyslot, self.ctr_base.wrapping_add((part.offset / 16) as u128))?;
        let protected_prefix = if part.section == NandSection::TwlNand {
            // The NCSD header shares these sectors; writes below the TWL MBR
            // are dropped.
            TWL_MBR_OFFSET
        } else {
            0
        };
        Ok(NandPartFile {
            inner: CtrFile::new(region, cipher),
            size: part.size,
            protected_prefix,
            pos: 0,
        })
    }

    /// Opens a physical partition slot (0-7) as its decrypted view.
    pub fn open_partition_index(&self, index: usize) -> CtrioResult<NandPartFile> {
        let part = self
            .partitions
            .get(index)
            .copied()
            .flatten()
            .ok_or(CtrioError::InvalidHeader {
                kind: "NAND partition table",
                offset: 0x110,
            })?;
        self.open_slot(part)
    }

    /// Opens a section by semantic id.
    pub fn open_section(&self, section: NandSection) -> CtrioResult<Box<dyn RandomAccess>> {
        match section {
            NandSection::Header => {
                Ok(Box::new(SubFile::new(self.base.clone(), 0, MEDIA_UNIT)))
            }
            NandSection::Sector0x96 => Ok(Box::new(SubFile::new(
                self.base.clone(),
                SECTOR_0X96_OFFSET,
                MEDIA_UNIT,
            ))),
            NandSection::BonusVolume => {
                if self.file_size <= self.image_size {
                    return Err(CtrioError::InvalidHeader {
                        kind: "GM9 bonus volume",
                        offset: self.image_size,
                    });
                }
                Ok(Box::new(SubFile::new(
                    self.base.clone(),
                    self.image_size,
                    self.file_size - self.image_size,
                )))
            }
            NandSection::TwlMbr => {
                let twl = self.open_slot(self.slot_for(NandSection::TwlNand)?)?;
                Ok(Box::new(SubFile::new(
                    shared(twl),
                    TWL_MBR_OFFSET,
                    TWL_MBR_SIZE,
                )))
            }
            other => Ok(Box::new(self.open_slot(self.slot_for(other)?)?)),
        }
    }

    /// Decodes the four TWL MBR records, verifying the 0x55AA signature.
    pub fn twl_mbr(&self) -> CtrioResult<[Option<TwlPartition>; 4]> {
        let mut raw = [0u8; TWL_MBR_SIZE as usize];
        let mut view = self.open_section(NandSection::TwlMbr)?;
        view.seek(SeekFrom::Start(0))?;
        view.read_exact(&mut raw)?;
        if raw[0x40] != 0x55 || raw[0x41] != 0xAA {
            return Err(CtrioError::InvalidHeader {
                kind: "TWL MBR",
                offset: TWL_MBR_OFFSET,
            });
        }
        let mut out = [None; 4];
        for (i, slot_out) in out.iter_mut().enumerate() {
            let record = &raw[i * 16..i * 16 + 16];
            let partition_type = record[4];
            if partition_type == 0 {
                continue;
            }
            let lba = u32::from_le_bytes(record[8..12].try_into().expect("record width"));
            let sectors = u32::from_le_bytes(record[12..16].try_into().expect("record width"));
            *slot_out = Some(TwlPartition {
                partition_type,
                offset: lba as u64 * MEDIA_UNIT,
                size: sectors as u64 * MEDIA_UNIT,
            });
        }
        Ok(out)
    }

    /// Opens TWL MBR partition `index` inside the decrypted TWL view.
    pub fn open_twl_partition(&self, index: usize) -> CtrioResult<SubFile> {
        let records = self.twl_mbr()?;
        let record = records
            .get(index)
            .copied()
            .flatten()
            .ok_or(CtrioError::InvalidHeader {
                kind: "TWL MBR",
                offset: TWL_MBR_OFFSET,
            })?;
        let twl = self.open_slot(self.slot_for(NandSection::TwlNand)?)?;
        Ok(SubFile::new(shared(twl), record.offset, record.size))
    }

    /// The CTRNAND filesystem view, skipping the leading 0x200 bytes so the
    /// cursor lands on the FAT MBR.
    pub fn open_ctr_partition(&self) -> CtrioResult<SubFile> {
        let part = self.slot_for(NandSection::CtrNand)?;
        let view = self.open_slot(part)?;
        Ok(SubFile::new(shared(view), MEDIA_UNIT, part.size - MEDIA_UNIT))
    }
}

/// A decrypted partition view enforcing the NAND write rules: writes below
/// the protected prefix are silently dropped, and a write that runs over the
/// partition end is refused as a cross-partition write.
pub struct NandPartFile {
    inner: CtrFile<SubFile>,
    size: u64,
    protected_prefix: u64,
    pos: u64,
}

impl NandPartFile {
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for NandPartFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.seek(SeekFrom::Start(self.pos))?;
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for NandPartFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len() as u64;
        if self.pos >= self.size {
            return Ok(0);
        }
        if self.pos + len > self.size {
            return Err(io::Error::other(CtrioError::CrossPartitionWrite));
        }
        let skip = self
            .protected_prefix
            .saturating_sub(self.pos)
            .min(len) as usize;
        if skip < buf.len() {
            self.inner
                .seek(SeekFrom::Start(self.pos + skip as u64))?;
            self.inner.write_all(&buf[skip..])?;
        }
        self.pos += len;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for NandPartFile {
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
                "seek before start of partition",
            )),
        }
    }
}
