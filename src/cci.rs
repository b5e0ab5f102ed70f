//! The CCI (game card image) reader: an NCSD header over up to eight NCCH
//! partitions, none encrypted at the container level.

use std::fs::File;
use std::path::Path;

use binrw::BinRead;
use log::debug;

use crate::constants::CCI_PARTITION_NAMES;
use crate::crypto::KeyEngine;
use crate::error::{CtrioError, CtrioResult};
use crate::io::{SharedStream, SubFile, shared};
use crate::models::ncsd::{NCSD_MAGIC, NcsdHeader};
use crate::ncch::NcchReader;

pub struct CciReader {
    header: NcsdHeader,
    media_unit: u64,
    /// One slot per partition record; `None` where the record is empty.
    partitions: Vec<Option<NcchReader>>,
}

impl CciReader {
    pub fn new(base: SharedStream, engine: &KeyEngine) -> CtrioResult<Self> {
        let mut header_region = SubFile::new(base.clone(), 0, 0x200);
        let header = NcsdHeader::read(&mut header_region)?;
        if header.magic != NCSD_MAGIC {
            return Err(CtrioError::InvalidHeader {
                kind: "NCSD",
                offset: 0x100,
            });
        }
        let media_unit = header.cci_media_unit();

        let mut partitions = Vec::with_capacity(8);
        for (i, record) in header.partition_table.iter().enumerate() {
            if record.length == 0 {
                partitions.push(None);
                continue;
            }
            debug!(
                "parsing {} NCCH at media unit {}",
                CCI_PARTITION_NAMES[i], record.offset
            );
            let reader = NcchReader::new(
                base.clone(),
                record.offset as u64 * media_unit,
                engine,
                None,
            )?;
            partitions.push(Some(reader));
        }

        Ok(CciReader {
            header,
            media_unit,
            partitions,
        })
    }

    pub fn from_file(path: &Path, engine: &KeyEngine) -> CtrioResult<Self> {
        let file = File::open(path)?;
        Self::new(shared(file), engine)
    }

    pub fn header(&self) -> &NcsdHeader {
        &self.header
    }

    pub fn media_unit(&self) -> u64 {
        self.media_unit
    }

    pub fn partition(&self, index: usize) -> Option<&NcchReader> {
        self.partitions.get(index).and_then(|p| p.as_ref())
    }

    /// The executable content (partition 0).
    pub fn main_partition(&self) -> Option<&NcchReader> {
        self.partition(0)
    }

    /// `(index, reader)` for every populated partition.
    pub fn contents(&self) -> Vec<(usize, &NcchReader)> {
        self.partitions
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|r| (i, r)))
            .collect()
    }
}
