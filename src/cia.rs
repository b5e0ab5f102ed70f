//! The CIA reader: walks the 64-byte-aligned section layout, unwraps the
//! title key from the ticket, and yields one NCCH reader per good content.

use std::fs::File;
use std::path::Path;

use binrw::BinRead;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};

use crate::constants::COMMON_KEY_YS;
use crate::crypto::{KeyEngine, KeyType, slot};
use crate::error::{CtrioError, CtrioResult};
use crate::io::{RandomAccess, SharedStream, SubFile, shared};
use crate::models::cia::CiaHeader;
use crate::models::ticket::Ticket;
use crate::models::title_metadata::{ContentChunkRecord, TitleMetadata};
use crate::ncch::NcchReader;
use crate::util::align_64;

/// What the TMD records about one content, next to its reader (absent when
/// that content failed to parse).
#[derive(Debug, Clone)]
pub struct CiaContentInfo {
    pub index: u16,
    pub id: u32,
    pub size: u64,
    pub encrypted: bool,
}

pub struct CiaReader {
    header: CiaHeader,
    ticket: Ticket,
    tmd: TitleMetadata,
    title_key: [u8; 16],
    contents: Vec<(CiaContentInfo, Option<NcchReader>)>,
}

/// Unwraps the ticket's title key: AES-CBC under keyslot 0x3D with the
/// common keyY picked by the ticket, IV = title id || zeros.
pub(crate) fn decrypt_title_key(engine: &KeyEngine, ticket: &Ticket) -> CtrioResult<[u8; 16]> {
    let index = ticket.ticket_data.common_key_index as usize;
    let key_y = COMMON_KEY_YS
        .get(index)
        .copied()
        .ok_or(CtrioError::InvalidHeader {
            kind: "ticket common key index",
            offset: 0,
        })?;
    let mut engine = engine.clone();
    engine.set_keyslot_bytes(KeyType::Y, slot::COMMON_KEY, key_y);

    let mut iv = [0u8; 16];
    BigEndian::write_u64(&mut iv[0..8], ticket.ticket_data.title_id);

    let mut key = ticket.ticket_data.title_key;
    engine
        .create_cbc_cipher(slot::COMMON_KEY, iv)?
        .decrypt(&mut key)?;
    Ok(key)
}

/// IV for a CBC-encrypted content: content index, big-endian, then zeros.
pub(crate) fn content_iv(index: u16) -> [u8; 16] {
    let mut iv = [0u8; 16];
    BigEndian::write_u16(&mut iv[0..2], index);
    iv
}

/// Builds the decrypted-or-raw stream for one content region and tries to
/// parse it as an NCCH.
pub(crate) fn open_content(
    region: SubFile,
    record: &ContentChunkRecord,
    engine: &KeyEngine,
) -> CtrioResult<NcchReader> {
    let stream: Box<dyn RandomAccess> = if record.content_type.is_encrypted() {
        Box::new(engine.create_cbc_io(
            slot::DECRYPTED_TITLEKEY,
            region,
            content_iv(record.content_index),
        )?)
    } else {
        Box::new(region)
    };
    NcchReader::new(shared(stream), 0, engine, None)
}

impl CiaReader {
    pub fn new(base: SharedStream, engine: &KeyEngine) -> CtrioResult<Self> {
        let mut header_region = SubFile::new(base.clone(), 0, 0x2020);
        let header = CiaHeader::read(&mut header_region)?;
        if header.header_size != 0x2020 {
            return Err(CtrioError::InvalidHeader {
                kind: "CIA",
                offset: 0,
            });
        }

        let cert_offset = align_64(header.header_size as u64);
        let ticket_offset = align_64(cert_offset + header.cert_chain_size as u64);
        let tmd_offset = align_64(ticket_offset + header.ticket_size as u64);
        let content_offset = align_64(tmd_offset + header.tmd_size as u64);

        let mut ticket_region =
            SubFile::new(base.clone(), ticket_offset, header.ticket_size as u64);
        let ticket = Ticket::read(&mut ticket_region)?;

        let mut tmd_region = SubFile::new(base.clone(), tmd_offset, header.tmd_size as u64);
        let tmd = TitleMetadata::from_reader(&mut tmd_region)?;

        let title_key = decrypt_title_key(engine, &ticket)?;
        let mut engine = engine.clone();
        engine.set_keyslot_bytes(KeyType::Normal, slot::DECRYPTED_TITLEKEY, title_key);
        debug!(
            "CIA title {:016x}: {} content(s)",
            tmd.title_id(),
            tmd.content_count()
        );

        let mut contents = Vec::new();
        let mut cursor = content_offset;
        for record in &tmd.content_chunk_records {
            let info = CiaContentInfo {
                index: record.content_index,
                id: record.content_id,
                size: record.content_size,
                encrypted: record.content_type.is_encrypted(),
            };
            let region = SubFile::new(base.clone(), cursor, record.content_size);
            cursor += align_64(record.content_size);

            // A damaged content must not hide its siblings.
            let reader = match open_content(region, record, &engine) {
                Ok(reader) => Some(reader),
                Err(err) => {
                    warn!(
                        "CIA content {:08x} (index {}) is unreadable: {err}",
                        record.content_id, record.content_index
                    );
                    None
                }
            };
            contents.push((info, reader));
        }

        Ok(CiaReader {
            header,
            ticket,
            tmd,
            title_key,
            contents,
        })
    }

    pub fn from_file(path: &Path, engine: &KeyEngine) -> CtrioResult<Self> {
        let file = File::open(path)?;
        Self::new(shared(file), engine)
    }

    pub fn header(&self) -> &CiaHeader {
        &self.header
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn tmd(&self) -> &TitleMetadata {
        &self.tmd
    }

    pub fn title_key(&self) -> [u8; 16] {
        self.title_key
    }

    pub fn title_id(&self) -> u64 {
        self.tmd.title_id()
    }

    /// All contents in TMD order, readers included where parsing succeeded.
    pub fn contents(&self) -> &[(CiaContentInfo, Option<NcchReader>)] {
        &self.contents
    }

    /// The reader for the content with the given TMD index.
    pub fn content(&self, index: u16) -> Option<&NcchReader> {
        self.contents
            .iter()
            .find(|(info, _)| info.index == index)
            .and_then(|(_, reader)| reader.as_ref())
    }
}
