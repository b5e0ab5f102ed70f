//! The CDN reader: a directory of raw update-server files (`tmd`, an
//! optional `cetk` ticket, and one file per content named by its hex id).

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use binrw::BinRead;
use log::{debug, warn};

use crate::cia::{decrypt_title_key, open_content};
use crate::crypto::{KeyEngine, KeyType, slot};
use crate::error::{CtrioError, CtrioResult};
use crate::io::{SubFile, shared};
use crate::models::ticket::Ticket;
use crate::models::title_metadata::TitleMetadata;
use crate::ncch::NcchReader;

/// Picks the TMD file inside a CDN directory: a bare `tmd` wins, otherwise
/// the `tmd.N` with the smallest numeric suffix.
pub(crate) fn find_tmd_file(dir: &Path) -> CtrioResult<PathBuf> {
    let mut candidates: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == "tmd" {
            return Ok(path);
        }
        if let Some(suffix) = name.strip_prefix("tmd.") {
            if let Ok(version) = suffix.parse::<u32>() {
                candidates.push((version, path));
            }
        }
    }
    candidates.sort_by_key(|(version, _)| *version);
    candidates
        .into_iter()
        .next()
        .map(|(_, path)| path)
        .ok_or_else(|| {
            CtrioError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no tmd file in {}", dir.display()),
            ))
        })
}

fn find_content_file(dir: &Path, content_id: u32) -> Option<PathBuf> {
    for name in [format!("{content_id:08x}"), format!("{content_id:08X}")] {
        let path = dir.join(name);
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

pub struct CdnReader {
    tmd: TitleMetadata,
    ticket: Option<Ticket>,
    title_key: Option<[u8; 16]>,
    contents: Vec<(u16, Option<NcchReader>)>,
}

impl CdnReader {
    /// Opens a CDN directory. An explicitly supplied decrypted title key
    /// overrides whatever `cetk` would yield.
    pub fn new(
        dir: &Path,
        engine: &KeyEngine,
        decrypted_title_key: Option<[u8; 16]>,
    ) -> CtrioResult<Self> {
        let tmd_path = find_tmd_file(dir)?;
        debug!("found TMD at {}", tmd_path.display());
        let mut tmd_file = File::open(&tmd_path)?;
        let tmd = TitleMetadata::from_reader(&mut tmd_file)?;

        let cetk_path = dir.join("cetk");
        let ticket = if cetk_path.is_file() {
            let mut cetk = File::open(&cetk_path)?;
            Some(Ticket::read(&mut cetk)?)
        } else {
            None
        };

        let title_key = match decrypted_title_key {
            Some(key) => Some(key),
            None => match &ticket {
                Some(ticket) => Some(decrypt_title_key(engine, ticket)?),
                None => None,
            },
        };

        let mut engine = engine.clone();
        if let Some(key) = title_key {
            engine.set_keyslot_bytes(KeyType::Normal, slot::DECRYPTED_TITLEKEY, key);
        }

        let mut contents = Vec::new();
        for record in &tmd.content_chunk_records {
            let reader = (|| -> CtrioResult<NcchReader> {
                let path = find_content_file(dir, record.content_id).ok_or_else(|| {
                    CtrioError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("content {:08x} missing", record.content_id),
                    ))
                })?;
                let size = path.metadata()?.len();
                let region = SubFile::new(shared(File::open(&path)?), 0, size);
                open_content(region, record, &engine)
            })();
            match reader {
                Ok(reader) => contents.push((record.content_index, Some(reader))),
                Err(err) => {
                    warn!(
                        "CDN content {:08x} (index {}) is unreadable: {err}",
                        record.content_id, record.content_index
                    );
                    contents.push((record.content_index, None));
                }
            }
        }

        Ok(CdnReader {
            tmd,
            ticket,
            title_key,
            contents,
        })
    }

    pub fn tmd(&self) -> &TitleMetadata {
        &self.tmd
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    pub fn title_key(&self) -> Option<[u8; 16]> {
        self.title_key
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
