use binrw::{BinRead, BinWrite};

/// The 0x200-byte NCSD header shared by game card images (CCI) and NAND.
/// Partition offsets and lengths are in media units; for NAND the unit is
/// fixed at 0x200, for CCI it is `0x200 << partition_flags[6]`.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct NcsdHeader {
    #[br(count = 0x100)]
    pub signature: Vec<u8>,

    /// `"NCSD"`
    pub magic: [u8; 4],

    /// Image size in media units.
    pub image_size: u32,

    /// Zero for NAND, the title id for game cards.
    pub media_id: u64,

    /// Filesystem type per partition (0 = none, 1 = normal, 3 = FIRM,
    /// 4 = AGB save).
    pub partition_fs_types: [u8; 8],

    /// Encryption type per partition; on NAND 1 = TWL, 2 = CTR,
    /// 3 = New-3DS CTR.
    pub partition_crypt_types: [u8; 8],

    pub partition_table: [NcsdPartition; 8],

    /// Card-only fields below; all zero on NAND.
    #[br(count = 0x20)]
    pub exheader_hash: Vec<u8>,

    pub additional_header_size: u32,

    pub sector_zero_offset: u32,

    /// partition_flags[6] is the media-unit shift on game cards.
    pub partition_flags: [u8; 8],

    pub partition_id_table: [u64; 8],

    #[br(count = 0x30)]
    pub reserved: Vec<u8>,
}

/// One partition record: offset and length in media units.
#[derive(Debug, Clone, Copy, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct NcsdPartition {
    pub offset: u32,
    pub length: u32,
}

pub const NCSD_MAGIC: [u8; 4] = *b"NCSD";

/// Partition filesystem types.
pub const FS_TYPE_NONE: u8 = 0;
pub const FS_TYPE_NORMAL: u8 = 1;
pub const FS_TYPE_FIRM: u8 = 3;
pub const FS_TYPE_AGB_SAVE: u8 = 4;

/// NAND partition encryption types.
pub const CRYPT_TYPE_TWL: u8 = 1;
pub const CRYPT_TYPE_CTR: u8 = 2;
pub const CRYPT_TYPE_CTR_NEW: u8 = 3;

impl NcsdHeader {
    pub fn empty() -> Self {
        NcsdHeader {
            signature: vec![0; 0x100],
            magic: NCSD_MAGIC,
            image_size: 0,
            media_id: 0,
            partition_fs_types: [0; 8],
            partition_crypt_types: [0; 8],
            partition_table: [NcsdPartition::default(); 8],
            exheader_hash: vec![0; 0x20],
            additional_header_size: 0,
            sector_zero_offset: 0,
            partition_flags: [0; 8],
            partition_id_table: [0; 8],
            reserved: vec![0; 0x30],
        }
    }

    /// Media unit for a game card image, from the flag byte at 0x188+6.
    pub fn cci_media_unit(&self) -> u64 {
        0x200u64 << self.partition_flags[6]
    }
}
