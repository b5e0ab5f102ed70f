//! The SD filesystem tree: `Nintendo 3DS/<id0>/<id1>`, where every file is
//! AES-CTR encrypted under keyslot 0x34 with an IV hashed from its own
//! relative path. Also assembles installed SD titles from their TMD plus
//! NCCH contents.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::crypto::file::CtrFile;
use crate::crypto::{KeyEngine, sd_path_to_iv, slot};
use crate::error::{CtrioError, CtrioResult};
use crate::fs::{FileInfo, ReadOnlyFs, normalize};
use crate::io::{RandomAccess, shared};
use crate::models::title_metadata::TitleMetadata;
use crate::ncch::NcchReader;

/// The id0 directory name for an SD KeyY: the first sixteen bytes of its
/// SHA-256, read as four little-endian words and hex-formatted.
pub(crate) fn id0_hex(sd_key_y: [u8; 16]) -> String {
    let digest = Sha256::digest(sd_key_y);
    let mut words = [0u8; 16];
    for (word, chunk) in words.chunks_exact_mut(4).zip(digest[0..16].chunks_exact(4)) {
        word.copy_from_slice(&u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_be_bytes());
    }
    hex::encode(words)
}

fn is_hex32(name: &str) -> bool {
    name.len() == 32 && name.chars().all(|c| c.is_ascii_hexdigit())
}

/// The root of an SD card image directory: locates the id0 matching the SD
/// KeyY and enumerates its id1 directories.
pub struct SdRoot {
    id0_path: PathBuf,
    id0: String,
    id1s: Vec<String>,
    current: usize,
    engine: KeyEngine,
}

impl SdRoot {
    pub fn new(sd_path: &Path, sd_key_y: [u8; 16], engine: &KeyEngine) -> CtrioResult<Self> {
        let mut engine = engine.clone();
        engine.setup_sd_key(sd_key_y);

        let id0 = id0_hex(sd_key_y);
        let nintendo_dir = sd_path.join("Nintendo 3DS");
        if !nintendo_dir.is_dir() {
            return Err(CtrioError::MissingId0);
        }
        let id0_path = fs::read_dir(&nintendo_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.eq_ignore_ascii_case(&id0))
            })
            .ok_or(CtrioError::MissingId0)?;

        let mut id1s: Vec<String> = fs::read_dir(&id0_path)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| is_hex32(n))
            .collect();
        id1s.sort();
        if id1s.is_empty() {
            return Err(CtrioError::MissingId1);
        }
        debug!("SD root {id0}: {} id1 directories", id1s.len());

        Ok(SdRoot {
            id0_path,
            id0,
            id1s,
            current: 0,
            engine,
        })
    }

    /// Reads the SD KeyY out of a movable.sed blob first.
    pub fn from_movable(
        sd_path: &Path,
        movable: &[u8],
        engine: &KeyEngine,
    ) -> CtrioResult<Self> {
        if movable.len() < 0x120 {
            return Err(CtrioError::MissingMovableSed);
        }
        let mut key_y = [0u8; 16];
        key_y.copy_from_slice(&movable[0x110..0x120]);
        Self::new(sd_path, key_y, engine)
    }

    pub fn id0(&self) -> &str {
        &self.id0
    }

    pub fn id1s(&self) -> &[String] {
        &self.id1s
    }

    pub fn current_id1(&self) -> &str {
        &self.id1s[self.current]
    }

    pub fn set_current_id1(&mut self, id1: &str) -> CtrioResult<()> {
        self.current = self
            .id1s
            .iter()
            .position(|n| n.eq_ignore_ascii_case(id1))
            .ok_or(CtrioError::MissingId1)?;
        Ok(())
    }

    /// The per-id1 encrypted filesystem for the current id1.
    pub fn filesystem(&self) -> SdFilesystem {
        SdFilesystem {
            root: self.id0_path.join(self.current_id1()),
            engine: self.engine.clone(),
        }
    }

    pub fn open_title(&self, title_id: u64) -> CtrioResult<SdTitle> {
        self.filesystem().open_title(title_id)
    }
}

/// The contents of one id1 directory, decrypted on the fly.
pub struct SdFilesystem {
    root: PathBuf,
    engine: KeyEngine,
}

impl SdFilesystem {
    fn disk_path(&self, normalized: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in normalized.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }

    fn check_supported(normalized: &str) -> CtrioResult<()> {
        let first = normalized.split('/').next().unwrap_or("");
        if first.eq_ignore_ascii_case("Nintendo DSiWare") {
            return Err(CtrioError::UnsupportedDsiWare);
        }
        Ok(())
    }

    /// Opens a file read-only as a decrypted seekable stream.
    pub fn open(&self, path: &str) -> CtrioResult<CtrFile<File>> {
        self.open_with(path, false)
    }

    /// Opens a file, optionally read-write; writes re-encrypt in place.
    pub fn open_with(&self, path: &str, write: bool) -> CtrioResult<CtrFile<File>> {
        let normalized = normalize(path);
        Self::check_supported(&normalized)?;
        let file = File::options()
            .read(true)
            .write(write)
            .open(self.disk_path(&normalized))?;
        Ok(self
            .engine
            .create_ctr_io(slot::SD_KEY, file, sd_path_to_iv(&normalized))?)
    }

    /// Locates `title/<high>/<low>/content`, picks the TMD with the lowest
    /// numeric filename, and assembles the title's NCCH contents.
    pub fn open_title(&self, title_id: u64) -> CtrioResult<SdTitle> {
        let content_rel = format!(
            "title/{:08x}/{:08x}/content",
            (title_id >> 32) as u32,
            title_id as u32
        );
        let content_dir = self.disk_path(&content_rel);
        if !content_dir.is_dir() {
            return Err(CtrioError::MissingTitle(title_id));
        }

        let mut tmds: Vec<(u32, String)> = fs::read_dir(&content_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter_map(|name| {
                let stem = name.strip_suffix(".tmd")?;
                let id = u32::from_str_radix(stem, 16).ok()?;
                Some((id, name))
            })
            .collect();
        tmds.sort();
        let (_, tmd_name) = tmds.first().ok_or(CtrioError::MissingTitle(title_id))?;

        let mut tmd_stream = self.open(&format!("{content_rel}/{tmd_name}"))?;
        let tmd = TitleMetadata::from_reader(&mut tmd_stream)?;

        let mut contents = Vec::new();
        for record in &tmd.content_chunk_records {
            let app_rel = format!("{content_rel}/{:08x}.app", record.content_id);
            let reader = self
                .open(&app_rel)
                .and_then(|stream| NcchReader::new(shared(stream), 0, &self.engine, None));
            match reader {
                Ok(reader) => contents.push((record.content_index, Some(reader))),
                Err(err) => {
                    warn!(
                        "SD content {:08x} (index {}) is unreadable: {err}",
                        record.content_id, record.content_index
                    );
                    contents.push((record.content_index, None));
                }
            }
        }

        Ok(SdTitle { tmd, contents })
    }
}

impl ReadOnlyFs for SdFilesystem {
    fn listdir(&self, path: &str) -> CtrioResult<Vec<String>> {
        let normalized = normalize(path);
        let mut names = Vec::new();
        for entry in fs::read_dir(self.disk_path(&normalized))? {
            if let Some(name) = entry?.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn getinfo(&self, path: &str) -> CtrioResult<FileInfo> {
        let metadata = fs::metadata(self.disk_path(&normalize(path)))?;
        Ok(FileInfo {
            size: metadata.len(),
            is_dir: metadata.is_dir(),
        })
    }

    fn scandir(&self, path: &str) -> CtrioResult<Vec<(String, FileInfo)>> {
        // One readdir pass; the directory entries carry the metadata.
        let mut out = Vec::new();
        for entry in fs::read_dir(self.disk_path(&normalize(path)))? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let metadata = entry.metadata()?;
            out.push((
                name,
                FileInfo {
                    size: metadata.len(),
                    is_dir: metadata.is_dir(),
                },
            ));
        }
        Ok(out)
    }

    fn open(&self, path: &str) -> CtrioResult<Box<dyn RandomAccess>> {
        Ok(Box::new(SdFilesystem::open(self, path)?))
    }
}

/// An installed SD title: its TMD and one NCCH reader per readable content.
pub struct SdTitle {
    tmd: TitleMetadata,
    contents: Vec<(u16, Option<NcchReader>)>,
}

impl SdTitle {
    pub fn tmd(&self) -> &TitleMetadata {
        &self.tmd
    }

    pub fn contents(&self) -> &[(u16, Option<NcchReader>)] {
        &self.contents
    }

    pub fn content(&self, index: u16) -> Option<&NcchReader> {
        self.contents
            .iter()
            .find(|(i, _)| *i == index)
            .and_then(|(_, reader)| reader.as_ref())
    }
}
