use binrw::{BinRead, BinWrite};

use crate::error::{CtrioError, CtrioResult};

/// Signature algorithm tag at the head of signed structures (TMD, ticket,
/// certificates). The tag decides how many signature and padding bytes
/// follow before the signed body starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u32)]
pub enum SignatureType {
    /// RSA_4096 SHA1 (not used on 3DS)
    Rsa4096Sha1 = 0x010000,

    /// RSA_2048 SHA1 (not used on 3DS)
    Rsa2048Sha1 = 0x010001,

    /// Elliptic curve with SHA1 (not used on 3DS)
    EllipticCurveSha1 = 0x010002,

    /// RSA_4096 SHA256
    Rsa4096Sha256 = 0x010003,

    /// RSA_2048 SHA256
    Rsa2048Sha256 = 0x010004,

    /// ECDSA with SHA256
    EcdsaSha256 = 0x010005,
}

impl SignatureType {
    /// Maps a raw tag, surfacing [`CtrioError::InvalidSignatureType`] for
    /// anything outside the enum.
    pub fn from_u32(raw: u32) -> CtrioResult<Self> {
        Ok(match raw {
            0x010000 => Self::Rsa4096Sha1,
            0x010001 => Self::Rsa2048Sha1,
            0x010002 => Self::EllipticCurveSha1,
            0x010003 => Self::Rsa4096Sha256,
            0x010004 => Self::Rsa2048Sha256,
            0x010005 => Self::EcdsaSha256,
            other => return Err(CtrioError::InvalidSignatureType(other)),
        })
    }

    pub fn signature_size(&self) -> usize {
        match self {
            Self::Rsa4096Sha1 | Self::Rsa4096Sha256 => 0x200,
            Self::Rsa2048Sha1 | Self::Rsa2048Sha256 => 0x100,
            Self::EllipticCurveSha1 | Self::EcdsaSha256 => 0x3C,
        }
    }

    /// RSA signatures are padded with 0x3C bytes, ECC with 0x40.
    pub fn padding_size(&self) -> usize {
        match self {
            Self::Rsa4096Sha1 | Self::Rsa4096Sha256 => 0x3C,
            Self::Rsa2048Sha1 | Self::Rsa2048Sha256 => 0x3C,
            Self::EllipticCurveSha1 | Self::EcdsaSha256 => 0x40,
        }
    }

    /// Total bytes from the tag to the start of the signed body.
    pub fn block_size(&self) -> usize {
        4 + self.signature_size() + self.padding_size()
    }
}

/// The signature block itself: tag, signature, alignment padding.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct SignatureData {
    #[brw(big)]
    pub signature_type: SignatureType,

    #[br(count = signature_type.signature_size())]
    pub signature: Vec<u8>,

    #[br(count = signature_type.padding_size())]
    pub padding: Vec<u8>,
}
