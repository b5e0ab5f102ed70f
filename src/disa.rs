//! DISA/DIFF outer containers: enough parsing to hand out the active
//! partition's IVFC level-4 payload as a seekable view, plus the
//! double-buffered table commit that flips the active flag.

use std::fs::File;
use std::io::SeekFrom;
use std::path::Path;

use binrw::BinRead;
use sha2::{Digest, Sha256};

use crate::error::{CtrioError, CtrioResult};
use crate::io::{SharedStream, SubFile, lock, shared};
use crate::models::disa::{
    DIFF_ACTIVE_FLAG_OFFSET, DIFF_MAGIC, DISA_ACTIVE_FLAG_OFFSET, DISA_MAGIC, DifiEntry,
    DiffHeader, DisaHeader, IvfcDescriptor, OUTER_HEADER_OFFSET,
};

/// Where one partition's level-4 payload sits in the file.
#[derive(Debug, Clone, Copy)]
struct PartitionView {
    offset: u64,
    size: u64,
}

fn parse_partition_view(
    table: &[u8],
    desc_offset: u64,
    partition_offset: u64,
) -> CtrioResult<PartitionView> {
    let entry_bytes = table
        .get(desc_offset as usize..)
        .ok_or(CtrioError::InvalidIvfc)?;
    let difi =
        DifiEntry::read(&mut std::io::Cursor::new(entry_bytes)).map_err(|_| CtrioError::InvalidIvfc)?;
    if difi.magic != *b"DIFI" {
        return Err(CtrioError::InvalidIvfc);
    }
    let ivfc_bytes = entry_bytes
        .get(difi.ivfc_offset as usize..)
        .ok_or(CtrioError::InvalidIvfc)?;
    let ivfc = IvfcDescriptor::read(&mut std::io::Cursor::new(ivfc_bytes))
        .map_err(|_| CtrioError::InvalidIvfc)?;
    if ivfc.magic != *b"IVFC" {
        return Err(CtrioError::InvalidIvfc);
    }
    let level4 = ivfc.levels[3];
    let offset = if difi.external_ivfc_level4 != 0 {
        partition_offset + difi.external_level4_offset
    } else {
        partition_offset + level4.offset
    };
    Ok(PartitionView {
        offset,
        size: level4.size,
    })
}

/// A DISA save container.
pub struct DisaFile {
    base: SharedStream,
    header: DisaHeader,
    table: Vec<u8>,
    partition_a: PartitionView,
    partition_b: Option<PartitionView>,
}

impl DisaFile {
    pub fn new(base: SharedStream) -> CtrioResult<Self> {
        let mut header_region = SubFile::new(base.clone(), OUTER_HEADER_OFFSET, 0x100);
        let header = DisaHeader::read(&mut header_region)?;
        if header.magic != DISA_MAGIC {
            return Err(CtrioError::InvalidHeader {
                kind: "DISA",
                offset: OUTER_HEADER_OFFSET,
            });
        }

        let table_offset = if header.active_table & 1 == 0 {
            header.primary_table_offset
        } else {
            header.secondary_table_offset
        };
        let mut table_region = SubFile::new(base.clone(), table_offset, header.table_size);
        let table = table_region.read_all()?;
        if table.len() as u64 != header.table_size {
            return Err(CtrioError::InvalidIvfc);
        }
        if Sha256::digest(&table).as_slice() != header.table_hash {
            return Err(CtrioError::InvalidIvfc);
        }

        let partition_a =
            parse_partition_view(&table, header.save_a_desc_offset, header.partition_a_offset)?;
        let partition_b = if header.partition_count > 1 {
            Some(parse_partition_view(
                &table,
                header.save_b_desc_offset,
                header.partition_b_offset,
            )?)
        } else {
            None
        };

        Ok(DisaFile {
            base,
            header,
            table,
            partition_a,
            partition_b,
        })
    }

    pub fn from_file(path: &Path) -> CtrioResult<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Self::new(shared(file))
    }

    pub fn header(&self) -> &DisaHeader {
        &self.header
    }

    /// 0 when the primary table is live, 1 for the secondary.
    pub fn active_table(&self) -> u8 {
        self.header.active_table & 1
    }

    pub fn partition_count(&self) -> u32 {
        self.header.partition_count
    }

    /// The active IVFC level-4 payload of partition A (the save data).
    pub fn open_level4(&self) -> SubFile {
        SubFile::new(self.base.clone(), self.partition_a.offset, self.partition_a.size)
    }

    /// Partition B's payload, present on two-partition saves.
    pub fn open_level4_b(&self) -> Option<SubFile> {
        self.partition_b
            .map(|p| SubFile::new(self.base.clone(), p.offset, p.size))
    }

    /// Commits the table into the inactive slot and flips the active flag.
    ///
    /// Write order is hash-then-flag with a flush between, so a crash leaves
    /// either the old or the new state fully intact.
    pub fn commit(&mut self) -> CtrioResult<()> {
        let new_active = (self.header.active_table & 1) ^ 1;
        let table_offset = if new_active == 0 {
            self.header.primary_table_offset
        } else {
            self.header.secondary_table_offset
        };
        let hash: [u8; 32] = Sha256::digest(&self.table).into();

        {
            let mut base = lock(&self.base);
            base.seek(SeekFrom::Start(table_offset))?;
            base.write_all(&self.table)?;
            base.seek(SeekFrom::Start(OUTER_HEADER_OFFSET + 0x6C))?;
            base.write_all(&hash)?;
            base.flush()?;
            base.seek(SeekFrom::Start(DISA_ACTIVE_FLAG_OFFSET))?;
            base.write_all(&[new_active])?;
            base.flush()?;
        }

        self.header.active_table = new_active;
        self.header.table_hash = hash;
        Ok(())
    }
}

/// A DIFF extdata container; same discipline as DISA with one partition.
pub struct DiffFile {
    base: SharedStream,
    header: DiffHeader,
    table: Vec<u8>,
    partition: PartitionView,
}

impl DiffFile {
    pub fn new(base: SharedStream) -> CtrioResult<Self> {
        let mut header_region = SubFile::new(base.clone(), OUTER_HEADER_OFFSET, 0x100);
        let header = DiffHeader::read(&mut header_region)?;
        if header.magic != DIFF_MAGIC {
            return Err(CtrioError::InvalidHeader {
                kind: "DIFF",
                offset: OUTER_HEADER_OFFSET,
            });
        }

        let table_offset = if header.active_table & 1 == 0 {
            header.primary_table_offset
        } else {
            header.secondary_table_offset
        };
        let mut table_region = SubFile::new(base.clone(), table_offset, header.table_size);
        let table = table_region.read_all()?;
        if table.len() as u64 != header.table_size
            || Sha256::digest(&table).as_slice() != header.table_hash
        {
            return Err(CtrioError::InvalidIvfc);
        }

        let partition = parse_partition_view(&table, 0, header.partition_offset)?;

        Ok(DiffFile {
            base,
            header,
            table,
            partition,
        })
    }

    pub fn from_file(path: &Path) -> CtrioResult<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Self::new(shared(file))
    }

    pub fn header(&self) -> &DiffHeader {
        &self.header
    }

    pub fn active_table(&self) -> u8 {
        self.header.active_table & 1
    }

    pub fn open_level4(&self) -> SubFile {
        SubFile::new(self.base.clone(), self.partition.offset, self.partition.size)
    }

    pub fn commit(&mut self) -> CtrioResult<()> {
        let new_active = (self.header.active_table & 1) ^ 1;
        let table_offset = if new_active == 0 {
            self.header.primary_table_offset
        } else {
            self.header.secondary_table_offset
        };
        let hash: [u8; 32] = Sha256::digest(&self.table).into();

        {
            let mut base = lock(&self.base);
            base.seek(SeekFrom::Start(table_offset))?;
            base.write_all(&self.table)?;
            base.seek(SeekFrom::Start(OUTER_HEADER_OFFSET + 0x34))?;
            base.write_all(&hash)?;
            base.flush()?;
            base.seek(SeekFrom::Start(DIFF_ACTIVE_FLAG_OFFSET))?;
            base.write_all(&[new_active])?;
            base.flush()?;
        }

        self.header.active_table = new_active;
        self.header.table_hash = hash;
        Ok(())
    }
}
