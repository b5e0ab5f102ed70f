use binrw::{BinRead, BinWrite};

/// The fixed 0x2020-byte CIA header. Section sizes follow in file order:
/// certificate chain, ticket, TMD, content, meta, each padded to a 64-byte
/// boundary.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct CiaHeader {
    pub header_size: u32,
    pub cia_type: u16,
    pub version: u16,
    pub cert_chain_size: u32,
    pub ticket_size: u32,
    pub tmd_size: u32,
    pub meta_size: u32,
    pub content_size: u64,
    /// One bit per possible content index, MSB-first within each byte.
    #[br(count = 0x2000)]
    pub content_index: Vec<u8>,
}

pub const CIA_HEADER_SIZE: u32 = 0x2020;

impl CiaHeader {
    pub fn new() -> Self {
        CiaHeader {
            header_size: CIA_HEADER_SIZE,
            cia_type: 0,
            version: 0,
            cert_chain_size: 0,
            ticket_size: 0,
            tmd_size: 0,
            meta_size: 0,
            content_size: 0,
            content_index: vec![0; 0x2000],
        }
    }

    pub fn set_content_index(&mut self, content_index: usize) {
        let byte_index = content_index / 8;
        let bit_index = 7 - (content_index % 8);
        if byte_index < self.content_index.len() {
            self.content_index[byte_index] |= 1 << bit_index;
        }
    }

    pub fn content_index_set(&self, content_index: usize) -> bool {
        let byte_index = content_index / 8;
        let bit_index = 7 - (content_index % 8);
        self.content_index
            .get(byte_index)
            .is_some_and(|b| b & (1 << bit_index) != 0)
    }
}

impl Default for CiaHeader {
    fn default() -> Self {
        Self::new()
    }
}
