use thiserror::Error;

/// Every failure the library can surface, as one flat enum.
///
/// Parsers fail fast at the first invariant violation and carry the byte
/// offset where it happened when that is meaningful.
#[derive(Error, Debug)]
pub enum CtrioError {
    #[error("invalid {kind} header at offset 0x{offset:X}")]
    InvalidHeader { kind: &'static str, offset: u64 },

    #[error("unknown signature type 0x{0:08X}")]
    InvalidSignatureType(u32),

    #[error("malformed IVFC descriptor")]
    InvalidIvfc,

    #[error("keyslot 0x{slot:02X} has no {which} key")]
    KeyslotMissing { slot: u8, which: &'static str },

    #[error("operation requires OTP data but none is loaded")]
    MissingOtp,

    #[error("movable.sed missing or shorter than 0x120 bytes")]
    MissingMovableSed,

    #[error("no id0 directory matches the SD KeyY")]
    MissingId0,

    #[error("no id1 directory found inside id0")]
    MissingId1,

    #[error("title {0:016x} not found")]
    MissingTitle(u64),

    #[error("boot9 dump is not 0x10000 bytes or its keys are not loaded")]
    InvalidBoot9,

    #[error("OTP magic mismatch after decryption")]
    InvalidOtp,

    #[error("no seed registered for title {0:016x}")]
    SeedNotFound(u64),

    #[error("DSiWare exports use an unsupported encryption layer")]
    UnsupportedDsiWare,

    #[error("write crosses a NAND partition boundary")]
    CrossPartitionWrite,

    #[error(".code decompression failed: {0}")]
    CodeDecompressionFailed(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] binrw::Error),
}

pub type CtrioResult<T> = Result<T, CtrioError>;
