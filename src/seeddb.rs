//! The seed registry: title id to 16-byte seed, with the `seeddb.bin`
//! on-disk format. Seeded NCCHs mix the seed into their secondary KeyY.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Mutex;

use binrw::{BinRead, BinWrite};
use lazy_static::lazy_static;
use log::debug;

use crate::error::CtrioResult;
use crate::util::config_dirs;

/// `seeddb.bin`: a little-endian count, 12 bytes of padding, then one
/// 32-byte entry per seed.
#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(little)]
pub struct SeedDatabase {
    pub seed_count: u32,
    #[brw(pad_before = 12)]
    #[br(count = seed_count)]
    pub seeds: Vec<SeedEntry>,
}

#[derive(BinRead, BinWrite, Debug, Clone, Copy)]
#[brw(little)]
pub struct SeedEntry {
    pub title_id: u64,

    pub seed: [u8; 16],

    #[brw(pad_after = 8)]
    _padding: (),
}

impl SeedEntry {
    pub fn new(title_id: u64, seed: [u8; 16]) -> Self {
        SeedEntry {
            title_id,
            seed,
            _padding: (),
        }
    }
}

/// An in-memory seed registry. One seed per title id; last write wins.
#[derive(Debug, Default)]
pub struct SeedDb {
    seeds: HashMap<u64, [u8; 16]>,
}

impl SeedDb {
    pub fn new() -> Self {
        SeedDb::default()
    }

    pub fn add_seed(&mut self, title_id: u64, seed: [u8; 16]) {
        self.seeds.insert(title_id, seed);
    }

    pub fn get(&self, title_id: u64) -> Option<[u8; 16]> {
        self.seeds.get(&title_id).copied()
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Merges entries from a `seeddb.bin` stream; returns how many were read.
    pub fn load<R: Read + Seek>(&mut self, reader: &mut R) -> CtrioResult<usize> {
        let db = SeedDatabase::read(reader)?;
        let n = db.seeds.len();
        for entry in db.seeds {
            self.add_seed(entry.title_id, entry.seed);
        }
        Ok(n)
    }

    /// Writes the registry out in `seeddb.bin` form, sorted by title id so
    /// the output is deterministic.
    pub fn save<W: Write + Seek>(&self, writer: &mut W) -> CtrioResult<()> {
        let mut seeds: Vec<SeedEntry> = self
            .seeds
            .iter()
            .map(|(&title_id, &seed)| SeedEntry::new(title_id, seed))
            .collect();
        seeds.sort_by_key(|e| e.title_id);
        let db = SeedDatabase {
            seed_count: seeds.len() as u32,
            seeds,
        };
        db.write(writer)?;
        Ok(())
    }

    pub fn load_from_file(&mut self, path: &Path) -> CtrioResult<usize> {
        let mut file = File::open(path)?;
        self.load(&mut file)
    }

    pub fn save_to_file(&self, path: &Path) -> CtrioResult<()> {
        let mut file = File::create(path)?;
        self.save(&mut file)
    }
}

lazy_static! {
    static ref DEFAULT_SEEDDB: Mutex<SeedDb> = Mutex::new(SeedDb::new());
}

/// Runs `f` against the process-wide default registry.
pub fn with_default_seeddb<T>(f: impl FnOnce(&mut SeedDb) -> T) -> T {
    let mut db = DEFAULT_SEEDDB.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut db)
}

/// Looks a title up in the default registry.
pub fn get_seed(title_id: u64) -> Option<[u8; 16]> {
    with_default_seeddb(|db| db.get(title_id))
}

/// Registers a seed in the default registry.
pub fn add_seed(title_id: u64, seed: [u8; 16]) {
    with_default_seeddb(|db| db.add_seed(title_id, seed));
}

/// Walks `SEEDDB_PATH` and then the platform config directories and merges
/// the first readable `seeddb.bin` into the default registry; later, less
/// specific directories are not consulted once one loads. Returns how many
/// entries were loaded.
pub fn load_default_seeddbs() -> usize {
    for dir in config_dirs() {
        let path = dir.join("seeddb.bin");
        if !path.is_file() {
            continue;
        }
        match with_default_seeddb(|db| db.load_from_file(&path)) {
            Ok(n) => {
                debug!("loaded {n} seeds from {}", path.display());
                return n;
            }
            Err(err) => debug!("skipping {}: {err}", path.display()),
        }
    }
    0
}
