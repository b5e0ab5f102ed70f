use binrw::{BinRead, BinWrite};

/// The 0x200-byte NCCH header. Offsets and sizes are in media units
/// (`0x200 << flags[6]`).
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct NcchHeader {
    /// RSA-2048 signature over the header; its first sixteen bytes double as
    /// the primary KeyY.
    #[br(count = 0x100)]
    pub signature: Vec<u8>,

    /// `"NCCH"`
    pub magic: [u8; 4],

    pub content_size: u32,

    pub partition_id: u64,

    pub maker_code: u16,

    pub version: u16,

    /// First word of `SHA-256(seed || program id)`, stored for seed
    /// verification.
    pub seed_check: u32,

    pub program_id: u64,

    #[br(count = 0x10)]
    pub reserved1: Vec<u8>,

    #[br(count = 0x20)]
    pub logo_hash: Vec<u8>,

    pub product_code: [u8; 0x10],

    #[br(count = 0x20)]
    pub exheader_hash: Vec<u8>,

    /// Bytes, not media units. The region on disk is twice this (the access
    /// descriptor follows the extended header).
    pub exheader_size: u32,

    pub reserved2: u32,

    /// flags[3] selects the secondary keyslot, flags[6] the content unit
    /// size, flags[7] the crypto options.
    pub flags: [u8; 8],

    pub plain_offset: u32,
    pub plain_size: u32,

    pub logo_offset: u32,
    pub logo_size: u32,

    pub exefs_offset: u32,
    pub exefs_size: u32,
    pub exefs_hash_size: u32,
    pub reserved3: u32,

    pub romfs_offset: u32,
    pub romfs_size: u32,
    pub romfs_hash_size: u32,
    pub reserved4: u32,

    #[br(count = 0x20)]
    pub exefs_super_hash: Vec<u8>,

    #[br(count = 0x20)]
    pub romfs_super_hash: Vec<u8>,
}

pub const NCCH_MAGIC: [u8; 4] = *b"NCCH";

/// flags[7] bits.
pub const NCCH_FLAG_FIXED_KEY: u8 = 0x01;
pub const NCCH_FLAG_NO_CRYPTO: u8 = 0x04;
pub const NCCH_FLAG_USES_SEED: u8 = 0x20;

impl NcchHeader {
    pub fn content_unit_size(&self) -> u64 {
        0x200u64 << self.flags[6]
    }

    pub fn uses_fixed_key(&self) -> bool {
        self.flags[7] & NCCH_FLAG_FIXED_KEY != 0
    }

    pub fn is_plain(&self) -> bool {
        self.flags[7] & NCCH_FLAG_NO_CRYPTO != 0
    }

    pub fn uses_seed(&self) -> bool {
        self.flags[7] & NCCH_FLAG_USES_SEED != 0
    }

    /// The crypto-method byte choosing the secondary keyslot.
    pub fn crypto_method(&self) -> u8 {
        self.flags[3]
    }

    /// The primary KeyY: the first sixteen signature bytes.
    pub fn key_y(&self) -> [u8; 16] {
        let mut y = [0u8; 16];
        y.copy_from_slice(&self.signature[0..16]);
        y
    }

    /// A system title keeps the fixed system key rather than the zero key
    /// under fixed-key crypto.
    pub fn is_system_title(&self) -> bool {
        (self.program_id >> 32) & 0x10 != 0
    }
}
