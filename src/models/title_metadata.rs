use std::io::{Read, Seek, SeekFrom};

use binrw::{BinRead, BinWrite};

use crate::error::CtrioResult;
use crate::models::signature::{SignatureData, SignatureType};

/// Title Metadata: the signed manifest of a title's contents. Counts are
/// little-endian where noted, ids big-endian; `bytes()` reproduces the
/// parsed input byte-exactly.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TitleMetadata {
    /// The hash for the signature is calculated over the header.
    pub signature_data: SignatureData,

    pub header: TitleMetadataHeader,

    /// 64 records; usually only the first is in use.
    #[br(count = 64)]
    pub content_info_records: Vec<ContentInfoRecord>,

    /// One record per content, as counted by the header.
    #[br(count = header.content_count)]
    pub content_chunk_records: Vec<ContentChunkRecord>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TitleMetadataHeader {
    #[br(count = 0x40)]
    pub signature_issuer: Vec<u8>,

    pub version: u8,

    pub ca_crl_version: u8,

    pub signer_crl_version: u8,

    pub reserved1: u8,

    pub system_version: u64,

    pub title_id: u64,

    pub title_type: u32,

    pub group_id: u16,

    /// Bytes, little-endian (also the SRL public save data size).
    #[brw(little)]
    pub save_data_size: u32,

    /// Bytes, little-endian.
    #[brw(little)]
    pub srl_private_save_data_size: u32,

    pub reserved2: u32,

    pub srl_flag: u8,

    #[br(count = 0x31)]
    pub reserved3: Vec<u8>,

    pub access_rights: u32,

    pub title_version: u16,

    pub content_count: u16,

    pub boot_content: u16,

    pub padding: u16,

    /// SHA-256 over the content info records.
    #[br(count = 0x20)]
    pub content_info_records_hash: Vec<u8>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentInfoRecord {
    pub content_index_offset: u16,

    pub content_command_count: u16,

    /// SHA-256 of the next `content_command_count` chunk records not yet
    /// hashed.
    #[br(count = 0x20)]
    pub hash: Vec<u8>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentChunkRecord {
    pub content_id: u32,

    pub content_index: u16,

    pub content_type: ContentType,

    pub content_size: u64,

    /// SHA-256 of the (decrypted) content.
    #[br(count = 0x20)]
    pub hash: Vec<u8>,
}

/// Content chunk flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentType(pub u16);

impl ContentType {
    pub const ENCRYPTED: u16 = 0x0001;
    pub const DISC: u16 = 0x0002;
    pub const CFM: u16 = 0x0004;
    pub const OPTIONAL: u16 = 0x4000;
    pub const SHARED: u16 = 0x8000;

    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn is_optional(&self) -> bool {
        self.0 & Self::OPTIONAL != 0
    }

    pub fn is_shared(&self) -> bool {
        self.0 & Self::SHARED != 0
    }

    pub fn set_encrypted(&mut self, encrypted: bool) {
        if encrypted {
            self.0 |= Self::ENCRYPTED;
        } else {
            self.0 &= !Self::ENCRYPTED;
        }
    }
}

impl TitleMetadata {
    /// Parses a TMD, mapping an out-of-enum signature tag to
    /// [`crate::CtrioError::InvalidSignatureType`] instead of a generic
    /// parse error.
    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> CtrioResult<Self> {
        let start = reader.stream_position()?;
        let raw_tag = {
            let mut tag = [0u8; 4];
            reader.read_exact(&mut tag)?;
            u32::from_be_bytes(tag)
        };
        SignatureType::from_u32(raw_tag)?;
        reader.seek(SeekFrom::Start(start))?;
        Ok(TitleMetadata::read(reader)?)
    }

    /// Re-serializes; byte-exact for anything `from_reader` accepted.
    pub fn bytes(&self) -> CtrioResult<Vec<u8>> {
        let mut buf = std::io::Cursor::new(Vec::new());
        self.write(&mut buf)?;
        Ok(buf.into_inner())
    }

    pub fn title_id(&self) -> u64 {
        self.header.title_id
    }

    pub fn content_count(&self) -> u16 {
        self.header.content_count
    }
}

impl TitleMetadataHeader {
    /// A minimal valid header for the given title and content count.
    pub fn stub(title_id: u64, content_count: u16) -> Self {
        TitleMetadataHeader {
            signature_issuer: vec![0; 0x40],
            version: 1,
            ca_crl_version: 0,
            signer_crl_version: 0,
            reserved1: 0,
            system_version: 0,
            title_id,
            title_type: 0x00040010,
            group_id: 0,
            save_data_size: 0,
            srl_private_save_data_size: 0,
            reserved2: 0,
            srl_flag: 0,
            reserved3: vec![0; 0x31],
            access_rights: 0,
            title_version: 0,
            content_count,
            boot_content: 0,
            padding: 0,
            content_info_records_hash: vec![0; 0x20],
        }
    }
}
