use binrw::{BinRead, BinWrite};

/// The IVFC wrapper in front of a RomFS level-3 region.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct IvfcHeader {
    /// `"IVFC"`
    pub magic: [u8; 4],

    /// 0x10000 for RomFS.
    pub version: u32,

    pub master_hash_size: u32,

    pub level1: IvfcLevel,
    pub level2: IvfcLevel,
    pub level3: IvfcLevel,

    pub reserved: u32,

    pub optional_info_size: u32,
}

#[derive(Debug, Clone, Copy, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct IvfcLevel {
    /// Logical offset within the hash-chain address space.
    pub offset: u64,
    pub size: u64,
    /// log2 of the verification block size.
    pub block_size_log: u32,
    pub reserved: u32,
}

pub const IVFC_MAGIC: [u8; 4] = *b"IVFC";
pub const IVFC_ROMFS_VERSION: u32 = 0x10000;

impl IvfcHeader {
    /// Physical offset of the level-3 region: the master hashes follow this
    /// header, and level 3 starts at the next level-3 block boundary.
    pub fn level3_physical_offset(&self) -> u64 {
        let block = 1u64 << self.level3.block_size_log;
        crate::util::align(0x60 + self.master_hash_size as u64, block)
    }
}

/// The level-3 directory/file table header; all offsets are relative to the
/// start of level 3.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct Level3Header {
    /// 0x28.
    pub header_size: u32,

    pub dir_hash_offset: u32,
    pub dir_hash_size: u32,

    pub dir_meta_offset: u32,
    pub dir_meta_size: u32,

    pub file_hash_offset: u32,
    pub file_hash_size: u32,

    pub file_meta_offset: u32,
    pub file_meta_size: u32,

    pub file_data_offset: u32,
}

pub const LEVEL3_HEADER_SIZE: u32 = 0x28;

/// A directory metadata record. Offsets of 0xFFFFFFFF mean "none".
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct DirEntry {
    pub parent: u32,
    pub sibling: u32,
    pub first_child: u32,
    pub first_file: u32,
    pub hash_next: u32,
    pub name_len: u32,
    /// UTF-16LE, `name_len` bytes.
    #[br(count = name_len)]
    pub name: Vec<u8>,
}

/// A file metadata record.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct FileEntry {
    pub parent: u32,
    pub sibling: u32,
    /// Offset within the file-data region.
    pub data_offset: u64,
    pub data_size: u64,
    pub hash_next: u32,
    pub name_len: u32,
    #[br(count = name_len)]
    pub name: Vec<u8>,
}

/// "no entry" marker in the hash buckets and sibling chains.
pub const ROMFS_NO_ENTRY: u32 = 0xFFFF_FFFF;

/// The chained-hash function the directory and file lookup tables use.
pub fn romfs_name_hash(parent_offset: u32, name_utf16: &[u16]) -> u32 {
    let mut hash = parent_offset ^ 123456789;
    for &unit in name_utf16 {
        hash = (hash >> 5 | hash << 27) ^ u32::from(unit);
    }
    hash
}

pub fn encode_name_utf16le(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() * 2);
    for unit in name.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

pub fn decode_name_utf16le(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).ok()
}
