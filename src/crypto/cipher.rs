use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{
    BlockDecrypt, BlockEncrypt, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
    StreamCipher, StreamCipherSeek,
};
use block_padding::NoPadding;
use std::io;

pub type Aes128Ctr = ctr::Ctr128BE<Aes128>;
pub type Aes128CbcEnc = cbc::Encryptor<Aes128>;
pub type Aes128CbcDec = cbc::Decryptor<Aes128>;
pub type Aes128Cmac = cmac::Cmac<Aes128>;

fn unaligned() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "data length not a multiple of 16")
}

/// AES-CTR keystream addressed by absolute byte offset.
///
/// The block counter for offset `o` is `base_ctr + o/16`; partial head and
/// tail blocks slice a full-block keystream. In TWL mode (keyslots
/// 0x00-0x03) the counter and the data of every 16-byte block are
/// byte-reversed around the AES call, matching the DSi-compatible half of
/// the hardware engine.
#[derive(Clone)]
pub struct CtrCipher {
    key: [u8; 16],
    base_ctr: u128,
    twl: bool,
}

impl CtrCipher {
    pub(crate) fn new(key: [u8; 16], base_ctr: u128, twl: bool) -> Self {
        CtrCipher { key, base_ctr, twl }
    }

    pub fn base_ctr(&self) -> u128 {
        self.base_ctr
    }

    /// XORs the keystream for `[offset, offset + data.len())` into `data`.
    /// Encryption and decryption are the same operation.
    pub fn apply(&self, offset: u64, data: &mut [u8]) {
        if data.is_empty() {
            return;
        }
        if self.twl {
            self.apply_twl(offset, data);
        } else {
            let mut cipher = Aes128Ctr::new(
                GenericArray::from_slice(&self.key),
                GenericArray::from_slice(&self.base_ctr.to_be_bytes()),
            );
            cipher.seek(offset);
            cipher.apply_keystream(data);
        }
    }

    fn apply_twl(&self, offset: u64, data: &mut [u8]) {
        let aes = Aes128::new(GenericArray::from_slice(&self.key));
        let mut block = self.base_ctr.wrapping_add((offset / 16) as u128);
        let mut skip = (offset % 16) as usize;
        let mut done = 0usize;
        while done < data.len() {
            let mut ks = GenericArray::from(block.to_le_bytes());
            aes.encrypt_block(&mut ks);
            let take = (16 - skip).min(data.len() - done);
            for j in 0..take {
                // Data blocks are reversed around the AES call, which folds
                // into a reversed keystream for the XOR.
                data[done + j] ^= ks[15 - (skip + j)];
            }
            done += take;
            skip = 0;
            block = block.wrapping_add(1);
        }
    }
}

/// One-shot AES-CBC over whole buffers. Buffers must be block-aligned.
#[derive(Clone)]
pub struct CbcCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl CbcCipher {
    pub(crate) fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        CbcCipher { key, iv }
    }

    pub fn iv(&self) -> [u8; 16] {
        self.iv
    }

    /// Same key, different IV. CBC random access needs this for every
    /// interior block.
    pub(crate) fn with_iv(&self, iv: [u8; 16]) -> CbcCipher {
        CbcCipher { key: self.key, iv }
    }

    pub fn decrypt(&self, data: &mut [u8]) -> io::Result<()> {
        Aes128CbcDec::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&self.iv),
        )
        .decrypt_padded_mut::<NoPadding>(data)
        .map_err(|_| unaligned())?;
        Ok(())
    }

    pub fn encrypt(&self, data: &mut [u8]) -> io::Result<()> {
        let len = data.len();
        Aes128CbcEnc::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&self.iv),
        )
        .encrypt_padded_mut::<NoPadding>(data, len)
        .map_err(|_| unaligned())?;
        Ok(())
    }
}

/// Block-aligned AES-ECB.
#[derive(Clone)]
pub struct EcbCipher {
    key: [u8; 16],
}

impl EcbCipher {
    pub(crate) fn new(key: [u8; 16]) -> Self {
        EcbCipher { key }
    }

    pub fn encrypt(&self, data: &mut [u8]) -> io::Result<()> {
        if data.len() % 16 != 0 {
            return Err(unaligned());
        }
        let aes = Aes128::new(GenericArray::from_slice(&self.key));
        for chunk in data.chunks_exact_mut(16) {
            aes.encrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }

    pub fn decrypt(&self, data: &mut [u8]) -> io::Result<()> {
        if data.len() % 16 != 0 {
            return Err(unaligned());
        }
        let aes = Aes128::new(GenericArray::from_slice(&self.key));
        for chunk in data.chunks_exact_mut(16) {
            aes.decrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }
}
