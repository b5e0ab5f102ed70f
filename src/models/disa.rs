use binrw::{BinRead, BinWrite};

/// The DISA outer header, at file offset 0x100. Two copies of the partition
/// table exist; the one-byte `active_table` flag selects which is live.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct DisaHeader {
    /// `"DISA"`
    pub magic: [u8; 4],

    /// 0x40000.
    pub version: u32,

    pub partition_count: u32,

    pub padding1: u32,

    pub secondary_table_offset: u64,
    pub primary_table_offset: u64,
    pub table_size: u64,

    /// Offsets of the partition descriptors inside the table.
    pub save_a_desc_offset: u64,
    pub save_a_desc_size: u64,
    pub save_b_desc_offset: u64,
    pub save_b_desc_size: u64,

    pub partition_a_offset: u64,
    pub partition_a_size: u64,
    pub partition_b_offset: u64,
    pub partition_b_size: u64,

    /// 0 selects the primary table, 1 the secondary. Byte 0x168 of the file.
    pub active_table: u8,

    pub padding2: [u8; 3],

    /// SHA-256 of the active partition table.
    pub table_hash: [u8; 32],

    #[br(count = 0x74)]
    pub reserved: Vec<u8>,
}

pub const DISA_MAGIC: [u8; 4] = *b"DISA";
pub const DISA_VERSION: u32 = 0x40000;

/// Absolute file offset of the DISA/DIFF outer header.
pub const OUTER_HEADER_OFFSET: u64 = 0x100;

/// Absolute file offset of the DISA active-table byte.
pub const DISA_ACTIVE_FLAG_OFFSET: u64 = 0x168;

/// The DIFF outer header, same position and discipline as DISA but a single
/// partition.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct DiffHeader {
    /// `"DIFF"`
    pub magic: [u8; 4],

    /// 0x30000.
    pub version: u32,

    pub secondary_table_offset: u64,
    pub primary_table_offset: u64,
    pub table_size: u64,

    pub partition_offset: u64,
    pub partition_size: u64,

    /// Byte 0x130 of the file.
    pub active_table: u8,

    pub padding: [u8; 3],

    pub table_hash: [u8; 32],

    pub unique_id: u64,

    #[br(count = 0xA4)]
    pub reserved: Vec<u8>,
}

pub const DIFF_MAGIC: [u8; 4] = *b"DIFF";
pub const DIFF_VERSION: u32 = 0x30000;
pub const DIFF_ACTIVE_FLAG_OFFSET: u64 = 0x130;

/// A DIFI partition descriptor inside the partition table.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct DifiEntry {
    /// `"DIFI"`
    pub magic: [u8; 4],

    /// 0x10000.
    pub version: u32,

    /// IVFC descriptor location, relative to this entry.
    pub ivfc_offset: u64,
    pub ivfc_size: u64,

    pub dpfs_offset: u64,
    pub dpfs_size: u64,

    pub hash_offset: u64,
    pub hash_size: u64,

    /// Non-zero when IVFC level 4 lives outside the DPFS tree, at
    /// `external_level4_offset` within the partition.
    pub external_ivfc_level4: u8,

    pub dpfs_level1_selector: u8,

    pub padding: u16,

    pub external_level4_offset: u64,
}

pub const DIFI_MAGIC: [u8; 4] = *b"DIFI";
pub const DIFI_VERSION: u32 = 0x10000;

/// The save-data IVFC descriptor (version 0x20000): four levels.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct IvfcDescriptor {
    /// `"IVFC"`
    pub magic: [u8; 4],

    /// 0x20000.
    pub version: u32,

    pub master_hash_size: u64,

    pub levels: [IvfcDescLevel; 4],

    pub descriptor_size: u64,
}

#[derive(Debug, Clone, Copy, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct IvfcDescLevel {
    pub offset: u64,
    pub size: u64,
    pub block_size_log: u32,
    pub reserved: u32,
}

pub const IVFC_SAVE_VERSION: u32 = 0x20000;
