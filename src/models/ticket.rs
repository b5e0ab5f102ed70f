use binrw::{BinRead, BinWrite};

use crate::models::signature::SignatureData;

/// A v1 ticket: the signed wrapper around the CBC-encrypted title key.
/// CIA files carry one inline; CDN trees ship it as `cetk`.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct Ticket {
    /// The signature covers the ticket data that follows it.
    pub signature_data: SignatureData,

    pub ticket_data: TicketData,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TicketData {
    #[br(count = 0x40)]
    pub issuer: Vec<u8>,

    #[br(count = 0x3C)]
    pub ecc_public_key: Vec<u8>,

    /// Always 1 on 3DS.
    pub version: u8,

    pub ca_crl_version: u8,

    pub signer_crl_version: u8,

    /// Title key, AES-CBC encrypted under the common key selected by
    /// `common_key_index`, IV = title id || zeros.
    pub title_key: [u8; 16],

    pub reserved1: u8,

    pub ticket_id: u64,

    pub console_id: u32,

    pub title_id: u64,

    pub reserved2: u16,

    pub ticket_title_version: u16,

    pub reserved3: u64,

    pub license_type: u8,

    /// Index into the common keyY table for keyslot 0x3D.
    pub common_key_index: u8,

    #[br(count = 0x2A)]
    pub reserved4: Vec<u8>,

    pub eshop_account_id: u32,

    pub reserved5: u8,

    pub audit: u8,

    #[br(count = 0x42)]
    pub reserved6: Vec<u8>,

    #[br(count = 0x40)]
    pub limits: Vec<u8>,

    pub content_index: ContentIndex,
}

/// Trailing variable-length content index block.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentIndex {
    pub header_word: u32,

    /// Total size of this block, including the two leading words.
    pub total_size: u32,

    #[br(count = total_size.saturating_sub(8) as usize)]
    pub data: Vec<u8>,
}

impl TicketData {
    /// A minimal, structurally valid ticket body for the given title.
    pub fn stub(title_id: u64, title_key: [u8; 16], common_key_index: u8) -> Self {
        TicketData {
            issuer: vec![0; 0x40],
            ecc_public_key: vec![0; 0x3C],
            version: 1,
            ca_crl_version: 0,
            signer_crl_version: 0,
            title_key,
            reserved1: 0,
            ticket_id: 0,
            console_id: 0,
            title_id,
            reserved2: 0,
            ticket_title_version: 0,
            reserved3: 0,
            license_type: 0,
            common_key_index,
            reserved4: vec![0; 0x2A],
            eshop_account_id: 0,
            reserved5: 0,
            audit: 0,
            reserved6: vec![0; 0x42],
            limits: vec![0; 0x40],
            content_index: ContentIndex {
                header_word: 0,
                total_size: 28,
                data: vec![0; 20],
            },
        }
    }
}
