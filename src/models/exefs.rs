use binrw::{BinRead, BinWrite};

/// The 0x200-byte ExeFS header: ten fixed-size file entries, padding, then
/// ten SHA-256 hashes stored in reverse order (the hash for entry 0 is the
/// last one). File data starts right after the header.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct ExefsHeader {
    pub entries: [ExefsEntry; 10],

    #[br(count = 0x20)]
    pub reserved: Vec<u8>,

    /// hashes[9 - i] belongs to entries[i].
    pub hashes: [[u8; 32]; 10],
}

/// One directory entry. An all-zero name marks an unused slot.
#[derive(Debug, Clone, Copy, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct ExefsEntry {
    pub name: [u8; 8],
    pub offset: u32,
    pub size: u32,
}

pub const EXEFS_HEADER_SIZE: u64 = 0x200;

impl ExefsEntry {
    pub fn new(name: &str, offset: u32, size: u32) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..name.len().min(8)].copy_from_slice(&name.as_bytes()[..name.len().min(8)]);
        ExefsEntry {
            name: bytes,
            offset,
            size,
        }
    }

    pub fn is_used(&self) -> bool {
        self.name != [0u8; 8]
    }

    /// The NUL-trimmed ASCII name.
    pub fn name_str(&self) -> &str {
        let end = self
            .name
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

impl ExefsHeader {
    pub fn empty() -> Self {
        ExefsHeader {
            entries: [ExefsEntry::default(); 10],
            reserved: vec![0; 0x20],
            hashes: [[0; 32]; 10],
        }
    }

    pub fn entry(&self, name: &str) -> Option<&ExefsEntry> {
        self.entries
            .iter()
            .find(|e| e.is_used() && e.name_str() == name)
    }

    /// The hash recorded for entry index `i`, honouring the reverse order.
    pub fn hash_for(&self, i: usize) -> &[u8; 32] {
        &self.hashes[9 - i]
    }

    pub fn set_hash_for(&mut self, i: usize, hash: [u8; 32]) {
        self.hashes[9 - i] = hash;
    }
}
