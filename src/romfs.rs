//! The RomFS reader: IVFC detection, level-3 table parsing, and O(1)
//! hash-table path lookup exposed through [`ReadOnlyFs`].

use std::io::Read;

use binrw::BinRead;

use crate::error::{CtrioError, CtrioResult};
use crate::fs::{FileInfo, ReadOnlyFs, normalize};
use crate::io::{RandomAccess, SharedStream, SubFile};
use crate::models::romfs::{
    DirEntry, FileEntry, IVFC_MAGIC, IvfcHeader, Level3Header, ROMFS_NO_ENTRY, decode_name_utf16le,
    romfs_name_hash,
};

pub struct RomfsReader {
    base: SharedStream,
    /// Offset of the level-3 region within `base`.
    lvl3_offset: u64,
    header: Level3Header,
    dir_meta: Vec<u8>,
    file_meta: Vec<u8>,
    dir_buckets: Vec<u32>,
    file_buckets: Vec<u32>,
    case_insensitive: bool,
}

enum Node {
    Dir(u32),
    File(u32),
}

impl RomfsReader {
    pub fn new(base: SharedStream) -> CtrioResult<Self> {
        Self::with_case_insensitivity(base, false)
    }

    /// A case-insensitive reader lowercases every path component before
    /// hashing and comparison.
    pub fn with_case_insensitivity(base: SharedStream, case_insensitive: bool) -> CtrioResult<Self> {
        let mut probe = SubFile::new(base.clone(), 0, 4);
        let mut magic = [0u8; 4];
        probe.read_exact(&mut magic)?;

        let lvl3_offset = if magic == IVFC_MAGIC {
            let mut header_region = SubFile::new(base.clone(), 0, 0x5C);
            let ivfc = IvfcHeader::read(&mut header_region)?;
            ivfc.level3_physical_offset()
        } else {
            0
        };

        let mut lvl3 = SubFile::new(base.clone(), lvl3_offset, 0x28);
        let header = Level3Header::read(&mut lvl3)?;
        if header.header_size != 0x28 {
            return Err(CtrioError::InvalidHeader {
                kind: "RomFS level 3",
                offset: lvl3_offset,
            });
        }

        let read_region = |offset: u32, size: u32| -> CtrioResult<Vec<u8>> {
            let mut region = SubFile::new(base.clone(), lvl3_offset + offset as u64, size as u64);
            let data = region.read_all()?;
            if data.len() != size as usize {
                return Err(CtrioError::InvalidHeader {
                    kind: "RomFS table",
                    offset: lvl3_offset + offset as u64,
                });
            }
            Ok(data)
        };

        let dir_meta = read_region(header.dir_meta_offset, header.dir_meta_size)?;
        let file_meta = read_region(header.file_meta_offset, header.file_meta_size)?;
        let dir_buckets = to_buckets(&read_region(header.dir_hash_offset, header.dir_hash_size)?);
        let file_buckets =
            to_buckets(&read_region(header.file_hash_offset, header.file_hash_size)?);
        if dir_buckets.is_empty() || file_buckets.is_empty() {
            return Err(CtrioError::InvalidHeader {
                kind: "RomFS hash table",
                offset: lvl3_offset + header.dir_hash_offset as u64,
            });
        }

        Ok(RomfsReader {
            base,
            lvl3_offset,
            header,
            dir_meta,
            file_meta,
            dir_buckets,
            file_buckets,
            case_insensitive,
        })
    }

    fn dir_entry(&self, offset: u32) -> CtrioResult<DirEntry> {
        let slice = self.dir_meta.get(offset as usize..).ok_or(CtrioError::InvalidHeader {
            kind: "RomFS dir entry",
            offset: offset as u64,
        })?;
        Ok(DirEntry::read(&mut std::io::Cursor::new(slice))?)
    }

    fn file_entry(&self, offset: u32) -> CtrioResult<FileEntry> {
        let slice = self.file_meta.get(offset as usize..).ok_or(CtrioError::InvalidHeader {
            kind: "RomFS file entry",
            offset: offset as u64,
        })?;
        Ok(FileEntry::read(&mut std::io::Cursor::new(slice))?)
    }

    fn fold_name(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    fn entry_name_matches(&self, entry_name: &[u8], wanted: &str) -> bool {
        match decode_name_utf16le(entry_name) {
            Some(name) => self.fold_name(&name) == wanted,
            None => false,
        }
    }

    /// Hash-chain lookup of a directory child. In case-insensitive mode a
    /// hash miss falls back to scanning the parent's sibling chain, since
    /// stored names hash under their original case.
    fn find_dir(&self, parent: u32, name: &str) -> CtrioResult<Option<u32>> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let bucket = romfs_name_hash(parent, &units) % self.dir_buckets.len() as u32;
        let mut cursor = self.dir_buckets[bucket as usize];
        while cursor != ROMFS_NO_ENTRY {
            let entry = self.dir_entry(cursor)?;
            if entry.parent == parent && self.entry_name_matches(&entry.name, name) {
                return Ok(Some(cursor));
            }
            cursor = entry.hash_next;
        }
        if self.case_insensitive {
            let mut child = self.dir_entry(parent)?.first_child;
            while child != ROMFS_NO_ENTRY {
                let entry = self.dir_entry(child)?;
                if self.entry_name_matches(&entry.name, name) {
                    return Ok(Some(child));
                }
                child = entry.sibling;
            }
        }
        Ok(None)
    }

    fn find_file(&self, parent: u32, name: &str) -> CtrioResult<Option<u32>> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let bucket = romfs_name_hash(parent, &units) % self.file_buckets.len() as u32;
        let mut cursor = self.file_buckets[bucket as usize];
        while cursor != ROMFS_NO_ENTRY {
            let entry = self.file_entry(cursor)?;
            if entry.parent == parent && self.entry_name_matches(&entry.name, name) {
                return Ok(Some(cursor));
            }
            cursor = entry.hash_next;
        }
        if self.case_insensitive {
            let mut file = self.dir_entry(parent)?.first_file;
            while file != ROMFS_NO_ENTRY {
                let entry = self.file_entry(file)?;
                if self.entry_name_matches(&entry.name, name) {
                    return Ok(Some(file));
                }
                file = entry.sibling;
            }
        }
        Ok(None)
    }

    fn resolve(&self, path: &str) -> CtrioResult<Node> {
        let normalized = self.fold_name(&normalize(path));
        let mut dir: u32 = 0;
        let mut components = normalized.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                // Last component: a file wins, then a directory.
                if let Some(file) = self.find_file(dir, component)? {
                    return Ok(Node::File(file));
                }
                if let Some(sub) = self.find_dir(dir, component)? {
                    return Ok(Node::Dir(sub));
                }
                return Err(CtrioError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such RomFS entry: {path}"),
                )));
            }
            dir = self
                .find_dir(dir, component)?
                .ok_or_else(|| {
                    CtrioError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no such RomFS directory: {path}"),
                    ))
                })?;
        }
        Ok(Node::Dir(0))
    }

    fn file_data_region(&self, entry: &FileEntry) -> SubFile {
        SubFile::new(
            self.base.clone(),
            self.lvl3_offset + self.header.file_data_offset as u64 + entry.data_offset,
            entry.data_size,
        )
    }
}

fn to_buckets(raw: &[u8]) -> Vec<u32> {
    raw.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl ReadOnlyFs for RomfsReader {
    fn listdir(&self, path: &str) -> CtrioResult<Vec<String>> {
        let Node::Dir(dir_offset) = self.resolve(path)? else {
            return Err(CtrioError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("not a RomFS directory: {path}"),
            )));
        };
        let dir = self.dir_entry(dir_offset)?;
        let mut names = Vec::new();

        let mut child = dir.first_child;
        while child != ROMFS_NO_ENTRY {
            let entry = self.dir_entry(child)?;
            if let Some(name) = decode_name_utf16le(&entry.name) {
                names.push(name);
            }
            child = entry.sibling;
        }
        let mut file = dir.first_file;
        while file != ROMFS_NO_ENTRY {
            let entry = self.file_entry(file)?;
            if let Some(name) = decode_name_utf16le(&entry.name) {
                names.push(name);
            }
            file = entry.sibling;
        }
        Ok(names)
    }

    fn getinfo(&self, path: &str) -> CtrioResult<FileInfo> {
        match self.resolve(path)? {
            Node::Dir(_) => Ok(FileInfo {
                size: 0,
                is_dir: true,
            }),
            Node::File(offset) => {
                let entry = self.file_entry(offset)?;
                Ok(FileInfo {
                    size: entry.data_size,
                    is_dir: false,
                })
            }
        }
    }

    fn open(&self, path: &str) -> CtrioResult<Box<dyn RandomAccess>> {
        match self.resolve(path)? {
            Node::File(offset) => {
                let entry = self.file_entry(offset)?;
                Ok(Box::new(self.file_data_region(&entry)))
            }
            Node::Dir(_) => Err(CtrioError::Io(std::io::Error::new(
                std::io::ErrorKind::IsADirectory,
                format!("cannot open a RomFS directory: {path}"),
            ))),
        }
    }
}
