use hex_literal::hex;

/// Common keyYs for keyslot 0x3D, indexed by the ticket's common key index.
/// Used to unwrap the CBC-encrypted title key carried in tickets.
pub const COMMON_KEY_YS: [[u8; 16]; 6] = [
    hex!("64c5fd55dd3ad988325baaec5243db98"),
    hex!("4aaa3d0e27d4d728d0b1b433f0f9cbc8"),
    hex!("fbb0ef8cdbb0d8e453cd99344371697f"),
    hex!("25959b7ad0409f72684198ba2ecd7dc6"),
    hex!("7ada22caffc476cc8297a0c7ceeeeebe"),
    hex!("a5051ca1b37dcf3afbcf8cc1edd9ce02"),
];

/// Normal key for fixed-crypto system titles (synthetic keyslot 0x42).
pub const FIXED_SYSTEM_KEY: u128 = 109645209274529458878270608689136408907;

/// Key scrambler constant for the CTR keyslot family.
pub const SCRAMBLER_CTR: u128 = 42503689118608475533858958821215598218;

/// Key scrambler constant for the TWL keyslot family (slots 0x00-0x03).
pub const SCRAMBLER_TWL: u128 = 0xFFFE_FB4E_2959_0258_2A68_0F5F_1A4F_3E79;

/// Size of a full ARM9 BootROM dump. Only full dumps are accepted; the
/// protected half is the upper 0x8000 bytes.
pub const BOOT9_SIZE: usize = 0x10000;

/// Offset of the retail key area inside a full boot9 dump.
pub const BOOT9_KEY_AREA_RETAIL: usize = 0xD9E0;

/// Offset of the dev-unit key area inside a full boot9 dump.
pub const BOOT9_KEY_AREA_DEV: usize = 0xD6E0;

/// Size of the encrypted OTP region.
pub const OTP_SIZE: usize = 0x100;

/// Magic at the start of a correctly decrypted OTP.
pub const OTP_MAGIC: [u8; 4] = *b"OTP ";

/// Counter base used for NAND partitions when the image carries no CID.
pub const NAND_FALLBACK_CTR: u128 = 0xB934_0EE4_6E43_C22B_54A1_F2D4_8A23_BF71;

/// Smallest addressable unit in NCSD/NCCH images, before the per-image shift.
pub const MEDIA_UNIT: u64 = 0x200;

/// Names of the eight NCSD partitions of a game card image.
pub const CCI_PARTITION_NAMES: [&str; 8] = [
    "Main",
    "Manual",
    "Download Play",
    "Partition4",
    "Partition5",
    "Partition6",
    "N3DSUpdateData",
    "UpdateData",
];
