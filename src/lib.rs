//! `ctrio` reads, decrypts, and (where the formats allow) writes Nintendo
//! 3DS console files and containers.
//!
//! The crate is built from two halves:
//!
//! * a software model of the console's AES key engine: the keyslot bank,
//!   the key scrambler, and seekable CTR/CBC stream views ([`crypto`]);
//! * a stack of container readers (CIA, CCI, CDN, NCCH, ExeFS, RomFS,
//!   NAND, DISA/DIFF, the SD tree, SMDH) composing bounded sub-views and
//!   cipher views over one shared base stream ([`io`]).
//!
//! Every reader hands out plain `Read + Write + Seek` streams, so nested
//! containers (an SMDH inside the ExeFS of an NCCH inside a CIA) cost one
//! `open` call per layer and decrypt lazily on access.
//!
//! ```no_run
//! use ctrio::{CiaReader, KeyEngine};
//!
//! # fn main() -> ctrio::CtrioResult<()> {
//! let mut engine = KeyEngine::new(false);
//! engine.setup_keys_from_boot9(&std::fs::read("boot9.bin")?)?;
//!
//! let cia = CiaReader::from_file("game.cia".as_ref(), &engine)?;
//! let smdh = cia.content(0).expect("content 0").open_smdh()?;
//! println!("{}", smdh.title(ctrio::models::smdh::Language::English).short_desc_str());
//! # Ok(())
//! # }
//! ```

pub mod cci;
pub mod cdn;
pub mod cia;
pub mod constants;
pub mod crypto;
pub mod disa;
pub mod error;
pub mod exefs;
pub mod fs;
pub mod io;
pub mod models;
pub mod nand;
pub mod ncch;
pub mod romfs;
pub mod sd;
pub mod seeddb;
pub mod smdh;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use cci::CciReader;
pub use cdn::CdnReader;
pub use cia::CiaReader;
pub use crypto::{KeyEngine, KeyType, sd_path_to_iv};
pub use disa::{DiffFile, DisaFile};
pub use error::{CtrioError, CtrioResult};
pub use exefs::ExefsReader;
pub use fs::ReadOnlyFs;
pub use nand::{NandReader, NandSection};
pub use ncch::NcchReader;
pub use romfs::RomfsReader;
pub use sd::{SdFilesystem, SdRoot, SdTitle};
pub use seeddb::SeedDb;
