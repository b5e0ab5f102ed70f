//! A software model of the 3DS AES key engine: the keyslot bank, the key
//! scrambler, and the cipher factories the container readers draw from.
//!
//! Keyslots 0x00-0x03 are the TWL-mode family: the scrambler constant and
//! rotation differ, 128-bit integer inputs are little-endian, and the CTR
//! transform byte-reverses each block around the AES core. Slots 0x40-0x4F
//! are synthetic ids reserved by this library for derived or fixed keys.

pub mod cipher;
pub mod file;

use std::io::{Read, Seek};

use aes::cipher::KeyInit;
use sha2::{Digest, Sha256};

use crate::constants::{
    BOOT9_KEY_AREA_DEV, BOOT9_KEY_AREA_RETAIL, BOOT9_SIZE, FIXED_SYSTEM_KEY, OTP_MAGIC, OTP_SIZE,
    SCRAMBLER_CTR, SCRAMBLER_TWL,
};
use crate::error::{CtrioError, CtrioResult};
use cipher::{Aes128Cmac, CbcCipher, CtrCipher, EcbCipher};
use file::{CbcFile, CtrFile};

/// Which of the three key registers of a slot to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    X,
    Y,
    Normal,
}

/// Well-known keyslot ids. Slots at and above [`slot::DECRYPTED_TITLEKEY`]
/// do not exist in hardware; they are synthetic ids this library reserves
/// for derived and fixed keys.
pub mod slot {
    pub const TWL_NAND: u8 = 0x03;
    pub const CTR_NAND_OLD: u8 = 0x04;
    pub const CTR_NAND_NEW: u8 = 0x05;
    pub const FIRM: u8 = 0x06;
    pub const AGB_SAVE: u8 = 0x07;
    pub const SECTOR_0X96: u8 = 0x11;
    pub const NCCH_93: u8 = 0x18;
    pub const NCCH_96: u8 = 0x1B;
    pub const NCCH_70: u8 = 0x25;
    pub const NCCH: u8 = 0x2C;
    pub const SD_KEY: u8 = 0x34;
    pub const COMMON_KEY: u8 = 0x3D;

    pub const DECRYPTED_TITLEKEY: u8 = 0x40;
    pub const ZERO_KEY: u8 = 0x41;
    pub const FIXED_SYSTEM_KEY: u8 = 0x42;
    pub const NEW_KEY_SECTOR: u8 = 0x43;
    pub const UDS_LOCAL_WLAN_CCMP: u8 = 0x44;
}

const SLOT_COUNT: usize = 0x50;

#[derive(Debug, Clone, Copy, Default)]
struct KeySlot {
    x: Option<[u8; 16]>,
    y: Option<[u8; 16]>,
    normal: Option<[u8; 16]>,
}

fn is_twl_slot(slot: u8) -> bool {
    slot < 0x04
}

fn rol128(val: u128, r_bits: u32) -> u128 {
    let r_bits = r_bits % 128;
    (val << r_bits) | (val >> (128 - r_bits))
}

/// CTR-family scrambler: `rol((rol(X, 2) ^ Y) + C, 87)` over 2^128.
pub(crate) fn scramble_ctr(key_x: u128, key_y: u128) -> u128 {
    rol128((rol128(key_x, 2) ^ key_y).wrapping_add(SCRAMBLER_CTR), 87)
}

/// TWL-family scrambler: `rol((X ^ Y) + C, 42)` over little-endian ints.
pub(crate) fn scramble_twl(key_x: u128, key_y: u128) -> u128 {
    rol128((key_x ^ key_y).wrapping_add(SCRAMBLER_TWL), 42)
}

/// Canonicalises an SD-relative path and derives its AES-CTR IV: SHA-256
/// over the UTF-16-LE lowercase forward-slash form, first sixteen bytes
/// XOR-folded with the next sixteen, read big-endian.
pub fn sd_path_to_iv(path: &str) -> u128 {
    let mut norm = path.replace('\\', "/").to_lowercase();
    if !norm.starts_with('/') {
        norm.insert(0, '/');
    }
    let mut utf16le = Vec::with_capacity(norm.len() * 2);
    for unit in norm.encode_utf16() {
        utf16le.extend_from_slice(&unit.to_le_bytes());
    }
    let digest = Sha256::digest(&utf16le);
    let mut folded = [0u8; 16];
    for i in 0..16 {
        folded[i] = digest[i] ^ digest[i + 16];
    }
    u128::from_be_bytes(folded)
}

/// The keyslot bank plus the fixed material loaded from boot9 and OTP.
///
/// An engine is cheap to clone; container readers clone it so that keyslot
/// mutation inside one reader never leaks into another.
#[derive(Clone)]
pub struct KeyEngine {
    dev: bool,
    slots: [KeySlot; SLOT_COUNT],
    /// OTP CBC key and IV, available once boot9 is ingested.
    otp_cipher: Option<([u8; 16], [u8; 16])>,
    /// The decrypted OTP, kept for console-unique derivations.
    otp: Option<Vec<u8>>,
}

impl KeyEngine {
    pub fn new(dev: bool) -> Self {
        let mut engine = KeyEngine {
            dev,
            slots: [KeySlot::default(); SLOT_COUNT],
            otp_cipher: None,
            otp: None,
        };
        engine.set_keyslot_bytes(KeyType::Normal, slot::ZERO_KEY, [0u8; 16]);
        engine.set_keyslot_bytes(
            KeyType::Normal,
            slot::FIXED_SYSTEM_KEY,
            FIXED_SYSTEM_KEY.to_be_bytes(),
        );
        engine
    }

    pub fn is_dev(&self) -> bool {
        self.dev
    }

    /// Stores raw key bytes. Setting X or Y rederives the slot's normal key
    /// when its counterpart is present; setting Normal overrides any derived
    /// value.
    pub fn set_keyslot_bytes(&mut self, which: KeyType, slot: u8, key: [u8; 16]) {
        self.store_key(which, slot, key);
        if which != KeyType::Normal {
            self.derive_normal(slot);
        }
    }

    /// Stores a key without touching the normal key; callers batching many
    /// registers follow up with [`KeyEngine::update_normal_keys`].
    pub fn set_keyslot_bytes_deferred(&mut self, which: KeyType, slot: u8, key: [u8; 16]) {
        self.store_key(which, slot, key);
    }

    fn store_key(&mut self, which: KeyType, slot: u8, key: [u8; 16]) {
        let entry = &mut self.slots[slot as usize];
        match which {
            KeyType::X => entry.x = Some(key),
            KeyType::Y => entry.y = Some(key),
            KeyType::Normal => entry.normal = Some(key),
        }
    }

    /// Stores a key given as a 128-bit integer. For the TWL family the
    /// integer is a little-endian 128-bit number, as on the console.
    pub fn set_keyslot_int(&mut self, which: KeyType, slot: u8, key: u128) {
        let bytes = if is_twl_slot(slot) {
            key.to_le_bytes()
        } else {
            key.to_be_bytes()
        };
        self.set_keyslot_bytes(which, slot, bytes);
    }

    /// Rederives the normal key of every slot that has both X and Y.
    pub fn update_normal_keys(&mut self) {
        for slot in 0..SLOT_COUNT as u8 {
            self.derive_normal(slot);
        }
    }

    fn derive_normal(&mut self, slot: u8) {
        let entry = &mut self.slots[slot as usize];
        let (Some(x), Some(y)) = (entry.x, entry.y) else {
            return;
        };
        entry.normal = Some(if is_twl_slot(slot) {
            scramble_twl(u128::from_le_bytes(x), u128::from_le_bytes(y)).to_le_bytes()
        } else {
            scramble_ctr(u128::from_be_bytes(x), u128::from_be_bytes(y)).to_be_bytes()
        });
    }

    fn key(&self, slot: u8, which: KeyType) -> CtrioResult<[u8; 16]> {
        let entry = &self.slots[slot as usize];
        let (key, name) = match which {
            KeyType::X => (entry.x, "X"),
            KeyType::Y => (entry.y, "Y"),
            KeyType::Normal => (entry.normal, "normal"),
        };
        key.ok_or(CtrioError::KeyslotMissing { slot, which: name })
    }

    /// The slot's current KeyY, as container readers need it for seed
    /// derivation.
    pub fn keyslot_y(&self, slot: u8) -> CtrioResult<[u8; 16]> {
        self.key(slot, KeyType::Y)
    }

    pub fn keyslot_normal(&self, slot: u8) -> CtrioResult<[u8; 16]> {
        self.key(slot, KeyType::Normal)
    }

    pub fn create_ctr_cipher(&self, slot: u8, ctr: u128) -> CtrioResult<CtrCipher> {
        Ok(CtrCipher::new(
            self.keyslot_normal(slot)?,
            ctr,
            is_twl_slot(slot),
        ))
    }

    pub fn create_cbc_cipher(&self, slot: u8, iv: [u8; 16]) -> CtrioResult<CbcCipher> {
        Ok(CbcCipher::new(self.keyslot_normal(slot)?, iv))
    }

    pub fn create_ecb_cipher(&self, slot: u8) -> CtrioResult<EcbCipher> {
        Ok(EcbCipher::new(self.keyslot_normal(slot)?))
    }

    pub fn create_cmac_object(&self, slot: u8) -> CtrioResult<Aes128Cmac> {
        let key = self.keyslot_normal(slot)?;
        Ok(<Aes128Cmac as KeyInit>::new(&key.into()))
    }

    /// Wraps `base` in an AES-CTR view keyed by `slot`.
    pub fn create_ctr_io<S: Read + Seek>(
        &self,
        slot: u8,
        base: S,
        ctr: u128,
    ) -> CtrioResult<CtrFile<S>> {
        Ok(CtrFile::new(base, self.create_ctr_cipher(slot, ctr)?))
    }

    /// Wraps `base` in an AES-CBC view keyed by `slot`.
    pub fn create_cbc_io<S: Read + Seek>(
        &self,
        slot: u8,
        base: S,
        iv: [u8; 16],
    ) -> CtrioResult<CbcFile<S>> {
        Ok(CbcFile::new(base, self.create_cbc_cipher(slot, iv)?))
    }

    /// Ingests the fixed KeyX values of the protected ARM9 BootROM.
    ///
    /// Only a full 0x10000-byte dump is accepted. The key area holds ten
    /// KeyX values, each covering a block of four slots from 0x18 through
    /// 0x3F, followed by the OTP CBC key and IV.
    pub fn setup_keys_from_boot9(&mut self, boot9: &[u8]) -> CtrioResult<()> {
        if boot9.len() != BOOT9_SIZE {
            return Err(CtrioError::InvalidBoot9);
        }
        let area = if self.dev {
            BOOT9_KEY_AREA_DEV
        } else {
            BOOT9_KEY_AREA_RETAIL
        };
        for i in 0..10 {
            let mut key = [0u8; 16];
            key.copy_from_slice(&boot9[area + i * 16..area + i * 16 + 16]);
            for s in 0..4u8 {
                self.set_keyslot_bytes(KeyType::X, 0x18 + (i as u8) * 4 + s, key);
            }
        }
        let mut otp_key = [0u8; 16];
        let mut otp_iv = [0u8; 16];
        otp_key.copy_from_slice(&boot9[area + 0xA0..area + 0xB0]);
        otp_iv.copy_from_slice(&boot9[area + 0xB0..area + 0xC0]);
        self.otp_cipher = Some((otp_key, otp_iv));
        Ok(())
    }

    /// Decrypts the OTP blob and derives the console-unique keys through the
    /// SHA-256 chain: the NAND KeyX/KeyY pair for slots 0x04-0x07, the TWL
    /// NAND pair for slot 0x03, and the movable.sed SD KeyX for slot 0x34.
    pub fn setup_keys_from_otp(&mut self, otp: &[u8]) -> CtrioResult<()> {
        if otp.len() != OTP_SIZE {
            return Err(CtrioError::InvalidOtp);
        }
        let (key, iv) = self.otp_cipher.ok_or(CtrioError::InvalidBoot9)?;
        let mut dec = otp.to_vec();
        CbcCipher::new(key, iv).decrypt(&mut dec)?;
        if dec[0..4] != OTP_MAGIC {
            return Err(CtrioError::InvalidOtp);
        }

        let split = |digest: &[u8]| -> ([u8; 16], [u8; 16]) {
            let mut x = [0u8; 16];
            let mut y = [0u8; 16];
            x.copy_from_slice(&digest[0..16]);
            y.copy_from_slice(&digest[16..32]);
            (x, y)
        };

        let h1 = Sha256::digest(&dec[0..0x90]);
        let h2 = Sha256::digest(h1);
        let h3 = Sha256::digest(h2);
        let (nand_x, nand_y) = split(&h1);
        let (twl_x, twl_y) = split(&h2);
        let (sd_x, _) = split(&h3);

        for s in slot::CTR_NAND_OLD..=slot::AGB_SAVE {
            self.set_keyslot_bytes(KeyType::X, s, nand_x);
            self.set_keyslot_bytes(KeyType::Y, s, nand_y);
        }
        self.set_keyslot_bytes(KeyType::X, slot::TWL_NAND, twl_x);
        self.set_keyslot_bytes(KeyType::Y, slot::TWL_NAND, twl_y);
        self.set_keyslot_bytes(KeyType::X, slot::SD_KEY, sd_x);
        self.update_normal_keys();
        self.otp = Some(dec);
        Ok(())
    }

    /// The decrypted OTP, for callers doing further console-unique
    /// derivations of their own.
    pub fn otp_decrypted(&self) -> CtrioResult<&[u8]> {
        self.otp.as_deref().ok_or(CtrioError::MissingOtp)
    }

    /// Sets the SD KeyY (keyslot 0x34) straight from a 16-byte value.
    pub fn setup_sd_key(&mut self, key_y: [u8; 16]) {
        self.set_keyslot_bytes(KeyType::Y, slot::SD_KEY, key_y);
    }

    /// Pulls the SD KeyY out of a movable.sed image (offset 0x110).
    pub fn setup_sd_key_from_movable(&mut self, movable: &[u8]) -> CtrioResult<[u8; 16]> {
        if movable.len() < 0x120 {
            return Err(CtrioError::MissingMovableSed);
        }
        let mut key_y = [0u8; 16];
        key_y.copy_from_slice(&movable[0x110..0x120]);
        self.setup_sd_key(key_y);
        Ok(key_y)
    }
}
