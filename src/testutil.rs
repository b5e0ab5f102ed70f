//! Fixture builders shared by the per-module test suites. Everything is
//! deterministic; images are assembled with the same binrw models and
//! ciphers the readers consume, so a fixture failing to parse is a bug on
//! one side or the other.

use std::io::{Cursor, Seek, SeekFrom};

use binrw::{BinRead, BinWrite};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::cia::content_iv;
use crate::constants::{
    BOOT9_KEY_AREA_RETAIL, BOOT9_SIZE, COMMON_KEY_YS, OTP_MAGIC, OTP_SIZE,
};
use crate::crypto::cipher::CbcCipher;
use crate::crypto::{KeyEngine, KeyType, slot};
use crate::models::cia::CiaHeader;
use crate::models::disa::{
    DIFI_MAGIC, DIFI_VERSION, DISA_MAGIC, DISA_VERSION, DifiEntry, DisaHeader, IVFC_SAVE_VERSION,
    IvfcDescLevel, IvfcDescriptor,
};
use crate::models::exefs::{EXEFS_HEADER_SIZE, ExefsEntry, ExefsHeader};
use crate::models::ncch::{
    NCCH_FLAG_FIXED_KEY, NCCH_FLAG_NO_CRYPTO, NCCH_FLAG_USES_SEED, NCCH_MAGIC, NcchHeader,
};
use crate::models::ncsd::{
    CRYPT_TYPE_CTR, CRYPT_TYPE_CTR_NEW, CRYPT_TYPE_TWL, FS_TYPE_AGB_SAVE, FS_TYPE_FIRM,
    FS_TYPE_NORMAL, NcsdHeader, NcsdPartition,
};
use crate::models::romfs::{
    DirEntry, FileEntry, IVFC_MAGIC, IVFC_ROMFS_VERSION, IvfcHeader, IvfcLevel, Level3Header,
    ROMFS_NO_ENTRY, encode_name_utf16le, romfs_name_hash,
};
use crate::models::signature::{SignatureData, SignatureType};
use crate::models::smdh::{AppSettings, AppTitle, Language, REGION_FREE, SMDH_MAGIC, Smdh};
use crate::models::ticket::{Ticket, TicketData};
use crate::models::title_metadata::{
    ContentChunkRecord, ContentInfoRecord, ContentType, TitleMetadata, TitleMetadataHeader,
};
use crate::ncch::{NcchSection, region_counter, seed_check_word, seeded_key_y};
use crate::util::align_64;

pub const TEST_TITLE_KEY: [u8; 16] = [0xD0, 0x7B, 0x33, 0x7F, 0x9C, 0xA4, 0x38, 0x59, 0x32, 0xA2,
    0xE2, 0x57, 0x23, 0x23, 0x2E, 0xB9];

/// A full-size boot9 image with a deterministic retail key area.
pub fn fake_boot9() -> Vec<u8> {
    let mut boot9 = vec![0u8; BOOT9_SIZE];
    for (i, b) in boot9[BOOT9_KEY_AREA_RETAIL..BOOT9_KEY_AREA_RETAIL + 0xC0]
        .iter_mut()
        .enumerate()
    {
        *b = ((i * 7 + 13) % 256) as u8;
    }
    boot9
}

/// An engine with the fake boot9 ingested: KeyX for slots 0x18-0x3F and the
/// OTP cipher material are all present.
pub fn test_engine() -> KeyEngine {
    let mut engine = KeyEngine::new(false);
    engine.setup_keys_from_boot9(&fake_boot9()).unwrap();
    engine
}

/// The OTP cipher key and IV baked into [`fake_boot9`].
pub fn fake_otp_cipher() -> CbcCipher {
    let boot9 = fake_boot9();
    let mut key = [0u8; 16];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&boot9[BOOT9_KEY_AREA_RETAIL + 0xA0..BOOT9_KEY_AREA_RETAIL + 0xB0]);
    iv.copy_from_slice(&boot9[BOOT9_KEY_AREA_RETAIL + 0xB0..BOOT9_KEY_AREA_RETAIL + 0xC0]);
    CbcCipher::new(key, iv)
}

/// An encrypted OTP blob that decrypts to the right magic under the fake
/// boot9 keys.
pub fn fake_otp() -> Vec<u8> {
    let mut otp = vec![0u8; OTP_SIZE];
    otp[0..4].copy_from_slice(&OTP_MAGIC);
    for (i, b) in otp[4..].iter_mut().enumerate() {
        *b = ((i * 3 + 1) % 256) as u8;
    }
    fake_otp_cipher().encrypt(&mut otp).unwrap();
    otp
}

fn pad_to(buf: &mut Vec<u8>, alignment: usize) {
    while buf.len() % alignment != 0 {
        buf.push(0);
    }
}

/// A plain ExeFS image: entries packed at 0x200-aligned offsets, hashes
/// filled in.
pub fn build_exefs(entries: &[(&str, &[u8])]) -> Vec<u8> {
    assert!(entries.len() <= 10);
    let mut header = ExefsHeader::empty();
    let mut data = Vec::new();
    for (i, (name, content)) in entries.iter().enumerate() {
        let offset = data.len() as u32;
        header.entries[i] = ExefsEntry::new(name, offset, content.len() as u32);
        header.set_hash_for(i, Sha256::digest(content).into());
        data.extend_from_slice(content);
        pad_to(&mut data, 0x200);
    }
    let mut out = Cursor::new(Vec::new());
    header.write(&mut out).unwrap();
    let mut image = out.into_inner();
    image.extend_from_slice(&data);
    image
}

/// An SMDH with English title strings set.
pub fn build_smdh(short_desc: &str, publisher: &str) -> Vec<u8> {
    let mut titles: Vec<AppTitle> = (0..16).map(|_| AppTitle::blank()).collect();
    titles[Language::English as usize].set_short_desc(short_desc);
    titles[Language::English as usize].set_long_desc(short_desc);
    titles[Language::English as usize].set_publisher(publisher);
    let smdh = Smdh {
        magic: SMDH_MAGIC,
        version: 0,
        reserved1: 0,
        titles,
        settings: AppSettings {
            ratings: [0; 0x10],
            region_lockout: REGION_FREE,
            matchmaker_id: 0,
            matchmaker_bit_id: 0,
            flags: 0,
            eula_version: 0,
            reserved: 0,
            optimal_animation_frame: 0.0,
            cec_id: 0,
        },
        reserved2: 0,
        small_icon: vec![0; 0x240],
        large_icon: vec![0; 0x900],
    };
    let mut out = Cursor::new(Vec::new());
    smdh.write(&mut out).unwrap();
    out.into_inner()
}

// ---------------------------------------------------------------------------
// RomFS

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

struct RomfsDir {
    name: String,
    parent: usize,
    children: Vec<usize>,
    files: Vec<usize>,
}

struct RomfsFile {
    name: String,
    parent: usize,
    data: Vec<u8>,
}

/// A bare level-3 RomFS image (no IVFC wrapper) from `(path, contents)`
/// pairs. Paths may contain `/` separators; directories are created as
/// needed.
pub fn build_romfs_bare(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut dirs = vec![RomfsDir {
        name: String::new(),
        parent: 0,
        children: Vec::new(),
        files: Vec::new(),
    }];
    let mut file_nodes: Vec<RomfsFile> = Vec::new();

    for (path, data) in files {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let (name, dirs_part) = components.split_last().expect("empty path");
        let mut current = 0usize;
        for component in dirs_part {
            current = match dirs[current]
                .children
                .iter()
                .copied()
                .find(|&c| dirs[c].name == *component)
            {
                Some(existing) => existing,
                None => {
                    let idx = dirs.len();
                    dirs.push(RomfsDir {
                        name: component.to_string(),
                        parent: current,
                        children: Vec::new(),
                        files: Vec::new(),
                    });
                    dirs[current].children.push(idx);
                    idx
                }
            };
        }
        let file_idx = file_nodes.len();
        file_nodes.push(RomfsFile {
            name: name.to_string(),
            parent: current,
            data: data.to_vec(),
        });
        dirs[current].files.push(file_idx);
    }

    // Assign metadata offsets in creation order.
    let mut dir_offsets = Vec::with_capacity(dirs.len());
    let mut cursor = 0u32;
    for dir in &dirs {
        dir_offsets.push(cursor);
        cursor += (0x18 + align4(encode_name_utf16le(&dir.name).len())) as u32;
    }
    let dir_meta_size = cursor;

    let mut file_offsets = Vec::with_capacity(file_nodes.len());
    let mut cursor = 0u32;
    let mut data_cursor = 0u64;
    let mut data_offsets = Vec::with_capacity(file_nodes.len());
    for file in &file_nodes {
        file_offsets.push(cursor);
        cursor += (0x20 + align4(encode_name_utf16le(&file.name).len())) as u32;
        data_offsets.push(data_cursor);
        data_cursor += file.data.len() as u64;
        data_cursor = (data_cursor + 15) & !15;
    }
    let file_meta_size = cursor;

    let dir_bucket_count = (dirs.len() | 1).max(3);
    let file_bucket_count = (file_nodes.len() | 1).max(3);
    let mut dir_buckets = vec![ROMFS_NO_ENTRY; dir_bucket_count];
    let mut file_buckets = vec![ROMFS_NO_ENTRY; file_bucket_count];

    // Serialize directory entries, threading the hash chains.
    let mut dir_meta = Cursor::new(Vec::new());
    for (i, dir) in dirs.iter().enumerate() {
        let units: Vec<u16> = dir.name.encode_utf16().collect();
        let parent_offset = dir_offsets[dir.parent];
        let bucket = (romfs_name_hash(parent_offset, &units) % dir_bucket_count as u32) as usize;
        let entry = DirEntry {
            parent: parent_offset,
            sibling: sibling_of(&dirs[dir.parent].children, i, &dir_offsets),
            first_child: dir
                .children
                .first()
                .map_or(ROMFS_NO_ENTRY, |&c| dir_offsets[c]),
            first_file: dir
                .files
                .first()
                .map_or(ROMFS_NO_ENTRY, |&f| file_offsets[f]),
            hash_next: dir_buckets[bucket],
            name_len: encode_name_utf16le(&dir.name).len() as u32,
            name: encode_name_utf16le(&dir.name),
        };
        dir_buckets[bucket] = dir_offsets[i];
        entry.write(&mut dir_meta).unwrap();
        pad_cursor_to(&mut dir_meta, 4);
    }

    let mut file_meta = Cursor::new(Vec::new());
    let mut file_data = Vec::new();
    for (i, file) in file_nodes.iter().enumerate() {
        let units: Vec<u16> = file.name.encode_utf16().collect();
        let parent_offset = dir_offsets[file.parent];
        let bucket = (romfs_name_hash(parent_offset, &units) % file_bucket_count as u32) as usize;
        let entry = FileEntry {
            parent: parent_offset,
            sibling: sibling_of(&dirs[file.parent].files, i, &file_offsets),
            data_offset: data_offsets[i],
            data_size: file.data.len() as u64,
            hash_next: file_buckets[bucket],
            name_len: encode_name_utf16le(&file.name).len() as u32,
            name: encode_name_utf16le(&file.name),
        };
        file_buckets[bucket] = file_offsets[i];
        entry.write(&mut file_meta).unwrap();
        pad_cursor_to(&mut file_meta, 4);

        while (file_data.len() as u64) < data_offsets[i] {
            file_data.push(0);
        }
        file_data.extend_from_slice(&file.data);
    }

    let dir_hash_bytes: Vec<u8> = dir_buckets.iter().flat_map(|b| b.to_le_bytes()).collect();
    let file_hash_bytes: Vec<u8> = file_buckets.iter().flat_map(|b| b.to_le_bytes()).collect();

    let dir_hash_offset = 0x28u32;
    let dir_meta_offset = dir_hash_offset + dir_hash_bytes.len() as u32;
    let file_hash_offset = dir_meta_offset + dir_meta_size;
    let file_meta_offset = file_hash_offset + file_hash_bytes.len() as u32;
    let file_data_offset = file_meta_offset + file_meta_size;

    let header = Level3Header {
        header_size: 0x28,
        dir_hash_offset,
        dir_hash_size: dir_hash_bytes.len() as u32,
        dir_meta_offset,
        dir_meta_size,
        file_hash_offset,
        file_hash_size: file_hash_bytes.len() as u32,
        file_meta_offset,
        file_meta_size,
        file_data_offset,
    };

    let mut out = Cursor::new(Vec::new());
    header.write(&mut out).unwrap();
    let mut image = out.into_inner();
    image.extend_from_slice(&dir_hash_bytes);
    image.extend_from_slice(&dir_meta.into_inner());
    image.extend_from_slice(&file_hash_bytes);
    image.extend_from_slice(&file_meta.into_inner());
    image.extend_from_slice(&file_data);
    image
}

fn sibling_of(order: &[usize], node: usize, offsets: &[u32]) -> u32 {
    order
        .iter()
        .position(|&n| n == node)
        .and_then(|pos| order.get(pos + 1))
        .map_or(ROMFS_NO_ENTRY, |&next| offsets[next])
}

fn pad_cursor_to(cursor: &mut Cursor<Vec<u8>>, alignment: u64) {
    while cursor.get_ref().len() as u64 % alignment != 0 {
        cursor.get_mut().push(0);
    }
    cursor.seek(SeekFrom::End(0)).unwrap();
}

/// Wraps a bare level-3 image in an IVFC header at a 0x1000 block boundary.
pub fn wrap_ivfc(level3: &[u8]) -> Vec<u8> {
    let header = IvfcHeader {
        magic: IVFC_MAGIC,
        version: IVFC_ROMFS_VERSION,
        master_hash_size: 0x20,
        level1: IvfcLevel {
            offset: 0,
            size: 0x20,
            block_size_log: 12,
            reserved: 0,
        },
        level2: IvfcLevel {
            offset: 0x1000,
            size: 0x20,
            block_size_log: 12,
            reserved: 0,
        },
        level3: IvfcLevel {
            offset: 0x2000,
            size: level3.len() as u64,
            block_size_log: 12,
            reserved: 0,
        },
        reserved: 0,
        optional_info_size: 0,
    };
    let mut out = Cursor::new(Vec::new());
    header.write(&mut out).unwrap();
    let mut image = out.into_inner();
    pad_to(&mut image, 0x1000);
    image.extend_from_slice(level3);
    image
}

// ---------------------------------------------------------------------------
// NCCH

pub struct NcchSpec {
    pub program_id: u64,
    pub exheader: Vec<u8>,
    pub exefs: Vec<(String, Vec<u8>)>,
    pub romfs: Option<Vec<u8>>,
    pub fixed_key: bool,
    pub no_crypto: bool,
    pub seed: Option<[u8; 16]>,
    pub crypto_method: u8,
}

impl NcchSpec {
    pub fn with_exheader(exheader: Vec<u8>) -> Self {
        NcchSpec {
            program_id: 0x000400000BCFFF00,
            exheader,
            exefs: Vec::new(),
            romfs: None,
            fixed_key: false,
            no_crypto: false,
            seed: None,
            crypto_method: 0,
        }
    }
}

/// Assembles an encrypted NCCH image the way `NcchReader` expects to find
/// it: same key derivation, same counters.
pub fn build_ncch(engine: &KeyEngine, spec: &NcchSpec) -> Vec<u8> {
    const UNIT: u64 = 0x200;
    let units = |len: usize| -> u32 { (len as u64).div_ceil(UNIT) as u32 };

    let exheader = &spec.exheader;
    assert!(exheader.len() % 2 == 0);

    let exefs_plain = if spec.exefs.is_empty() {
        Vec::new()
    } else {
        let entries: Vec<(&str, &[u8])> = spec
            .exefs
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice()))
            .collect();
        let mut image = build_exefs(&entries);
        pad_to(&mut image, UNIT as usize);
        image
    };
    let romfs_plain = spec.romfs.clone().map(|mut image| {
        pad_to(&mut image, UNIT as usize);
        image
    });

    let exheader_end = 0x200 + exheader.len() as u64;
    let exefs_offset = crate::util::align(exheader_end, UNIT);
    let romfs_offset = exefs_offset + exefs_plain.len() as u64;
    let total = romfs_offset + romfs_plain.as_ref().map_or(0, |r| r.len() as u64);

    // A deterministic signature; its head doubles as the primary KeyY.
    let signature: Vec<u8> = (0..0x100u32).map(|i| ((i * 11 + 3) % 256) as u8).collect();
    let mut key_y = [0u8; 16];
    key_y.copy_from_slice(&signature[0..16]);

    let mut flags = [0u8; 8];
    flags[3] = spec.crypto_method;
    if spec.fixed_key {
        flags[7] |= NCCH_FLAG_FIXED_KEY;
    }
    if spec.no_crypto {
        flags[7] |= NCCH_FLAG_NO_CRYPTO;
    }
    if spec.seed.is_some() {
        flags[7] |= NCCH_FLAG_USES_SEED;
    }

    let header = NcchHeader {
        signature,
        magic: NCCH_MAGIC,
        content_size: units(total as usize),
        partition_id: spec.program_id,
        maker_code: 0x3030,
        version: 2,
        seed_check: spec
            .seed
            .map_or(0, |seed| seed_check_word(seed, spec.program_id)),
        program_id: spec.program_id,
        reserved1: vec![0; 0x10],
        logo_hash: vec![0; 0x20],
        product_code: *b"CTR-P-FIXT\0\0\0\0\0\0",
        exheader_hash: vec![0; 0x20],
        exheader_size: (exheader.len() / 2) as u32,
        reserved2: 0,
        flags,
        plain_offset: 0,
        plain_size: 0,
        logo_offset: 0,
        logo_size: 0,
        exefs_offset: (exefs_offset / UNIT) as u32,
        exefs_size: units(exefs_plain.len()),
        exefs_hash_size: 1,
        reserved3: 0,
        romfs_offset: (romfs_offset / UNIT) as u32,
        romfs_size: romfs_plain.as_ref().map_or(0, |r| units(r.len())),
        romfs_hash_size: 1,
        reserved4: 0,
        exefs_super_hash: vec![0; 0x20],
        romfs_super_hash: vec![0; 0x20],
    };

    // Resolve the primary and secondary normal keys like the reader does.
    let (primary, secondary) = if spec.no_crypto {
        (None, None)
    } else if spec.fixed_key {
        let fixed = if header.is_system_title() {
            slot::FIXED_SYSTEM_KEY
        } else {
            slot::ZERO_KEY
        };
        let key = engine.keyslot_normal(fixed).unwrap();
        (Some(key), Some(key))
    } else {
        let mut engine = engine.clone();
        engine.set_keyslot_bytes(KeyType::Y, slot::NCCH, key_y);
        let primary = engine.keyslot_normal(slot::NCCH).unwrap();
        let sec_slot = match spec.crypto_method {
            0x00 => slot::NCCH,
            0x01 => slot::NCCH_70,
            0x0A => slot::NCCH_93,
            0x0B => slot::NCCH_96,
            other => panic!("bad crypto method {other}"),
        };
        let sec_key_y = match spec.seed {
            Some(seed) => seeded_key_y(key_y, spec.program_id, seed),
            None => key_y,
        };
        engine.set_keyslot_bytes(KeyType::Y, sec_slot, sec_key_y);
        (Some(primary), Some(engine.keyslot_normal(sec_slot).unwrap()))
    };

    let encrypt = |key: Option<[u8; 16]>, section: NcchSection, data: &mut [u8]| {
        if let Some(key) = key {
            let ctr = region_counter(spec.program_id, section);
            crate::crypto::cipher::CtrCipher::new(key, ctr, false).apply(0, data);
        }
    };

    let mut image = Cursor::new(Vec::new());
    header.write(&mut image).unwrap();
    let mut image = image.into_inner();

    let mut exheader_enc = exheader.clone();
    encrypt(primary, NcchSection::ExHeader, &mut exheader_enc);
    image.extend_from_slice(&exheader_enc);
    pad_to(&mut image, UNIT as usize);

    if !exefs_plain.is_empty() {
        let mut exefs_enc = exefs_plain.clone();
        encrypt(primary, NcchSection::ExeFs, &mut exefs_enc);

        // `.code` re-encrypts under the secondary key when the keys differ.
        if primary != secondary {
            let parsed =
                ExefsHeader::read(&mut Cursor::new(&exefs_plain)).expect("fixture exefs header");
            if let Some(code) = parsed.entry(".code") {
                let start = (EXEFS_HEADER_SIZE + code.offset as u64) as usize;
                let end = start + code.size as usize;
                let mut window = exefs_plain[start..end].to_vec();
                let ctr = region_counter(spec.program_id, NcchSection::ExeFs);
                crate::crypto::cipher::CtrCipher::new(secondary.unwrap(), ctr, false)
                    .apply(start as u64, &mut window);
                exefs_enc[start..end].copy_from_slice(&window);
            }
        }
        image.extend_from_slice(&exefs_enc);
    }

    if let Some(romfs) = &romfs_plain {
        let mut romfs_enc = romfs.clone();
        encrypt(secondary, NcchSection::RomFs, &mut romfs_enc);
        image.extend_from_slice(&romfs_enc);
    }

    image
}

// ---------------------------------------------------------------------------
// CIA / CCI / CDN

pub struct CiaSpec {
    pub title_id: u64,
    /// `(content index, content id, ncch bytes)`.
    pub contents: Vec<(u16, u32, Vec<u8>)>,
    pub title_key: [u8; 16],
    pub encrypted: bool,
    pub common_key_index: u8,
}

impl CiaSpec {
    pub fn new(title_id: u64, contents: Vec<(u16, u32, Vec<u8>)>) -> Self {
        CiaSpec {
            title_id,
            contents,
            title_key: TEST_TITLE_KEY,
            encrypted: true,
            common_key_index: 0,
        }
    }

    pub fn with_title_key(mut self, key: [u8; 16]) -> Self {
        self.title_key = key;
        self
    }
}

fn encrypted_title_key(engine: &KeyEngine, spec: &CiaSpec) -> [u8; 16] {
    let mut engine = engine.clone();
    engine.set_keyslot_bytes(
        KeyType::Y,
        slot::COMMON_KEY,
        COMMON_KEY_YS[spec.common_key_index as usize],
    );
    let mut iv = [0u8; 16];
    iv[0..8].copy_from_slice(&spec.title_id.to_be_bytes());
    let mut key = spec.title_key;
    engine
        .create_cbc_cipher(slot::COMMON_KEY, iv)
        .unwrap()
        .encrypt(&mut key)
        .unwrap();
    key
}

fn build_ticket(engine: &KeyEngine, spec: &CiaSpec) -> Vec<u8> {
    let ticket = Ticket {
        signature_data: SignatureData {
            signature_type: SignatureType::Rsa2048Sha256,
            signature: vec![0xAA; 0x100],
            padding: vec![0; 0x3C],
        },
        ticket_data: TicketData::stub(
            spec.title_id,
            encrypted_title_key(engine, spec),
            spec.common_key_index,
        ),
    };
    let mut out = Cursor::new(Vec::new());
    ticket.write(&mut out).unwrap();
    out.into_inner()
}

pub fn build_tmd(spec: &CiaSpec) -> Vec<u8> {
    let tmd = TitleMetadata {
        signature_data: SignatureData {
            signature_type: SignatureType::Rsa2048Sha256,
            signature: vec![0xCC; 0x100],
            padding: vec![0; 0x3C],
        },
        header: TitleMetadataHeader::stub(spec.title_id, spec.contents.len() as u16),
        content_info_records: vec![
            ContentInfoRecord {
                content_index_offset: 0,
                content_command_count: spec.contents.len() as u16,
                hash: vec![0; 0x20],
            };
            64
        ],
        content_chunk_records: spec
            .contents
            .iter()
            .map(|(index, id, data)| ContentChunkRecord {
                content_id: *id,
                content_index: *index,
                content_type: ContentType(if spec.encrypted {
                    ContentType::ENCRYPTED
                } else {
                    0
                }),
                content_size: data.len() as u64,
                hash: Sha256::digest(data).to_vec(),
            })
            .collect(),
    };
    tmd.bytes().unwrap()
}

fn encrypt_content(engine: &KeyEngine, spec: &CiaSpec, index: u16, data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    if spec.encrypted {
        assert!(out.len() % 16 == 0);
        let mut engine = engine.clone();
        engine.set_keyslot_bytes(KeyType::Normal, slot::DECRYPTED_TITLEKEY, spec.title_key);
        engine
            .create_cbc_cipher(slot::DECRYPTED_TITLEKEY, content_iv(index))
            .unwrap()
            .encrypt(&mut out)
            .unwrap();
    }
    out
}

/// A complete CIA image: header, dummy cert chain, ticket, TMD, contents.
pub fn build_cia(engine: &KeyEngine, spec: &CiaSpec) -> Vec<u8> {
    let cert_chain = vec![0u8; 0xA00];
    let ticket = build_ticket(engine, spec);
    let tmd = build_tmd(spec);

    let mut header = CiaHeader::new();
    header.cert_chain_size = cert_chain.len() as u32;
    header.ticket_size = ticket.len() as u32;
    header.tmd_size = tmd.len() as u32;
    header.content_size = spec
        .contents
        .iter()
        .map(|(_, _, data)| align_64(data.len() as u64))
        .sum();
    for (index, _, _) in &spec.contents {
        header.set_content_index(*index as usize);
    }

    let mut image = Cursor::new(Vec::new());
    header.write(&mut image).unwrap();
    let mut image = image.into_inner();
    pad_to(&mut image, 64);
    image.extend_from_slice(&cert_chain);
    pad_to(&mut image, 64);
    image.extend_from_slice(&ticket);
    pad_to(&mut image, 64);
    image.extend_from_slice(&tmd);
    pad_to(&mut image, 64);
    for (index, _, data) in &spec.contents {
        image.extend_from_slice(&encrypt_content(engine, spec, *index, data));
        pad_to(&mut image, 64);
    }
    image
}

/// An NCSD card image with the given partitions (unit 0x200).
pub fn build_cci(partitions: &[Option<&[u8]>]) -> Vec<u8> {
    const UNIT: u64 = 0x200;
    let mut header = NcsdHeader::empty();
    header.media_id = 0x000400000BCFFF00;

    let mut blobs: Vec<(usize, Vec<u8>)> = Vec::new();
    let mut cursor = 1u32; // in units, after the header
    for (i, part) in partitions.iter().enumerate() {
        let Some(data) = part else { continue };
        let mut padded = data.to_vec();
        pad_to(&mut padded, UNIT as usize);
        header.partition_table[i] = NcsdPartition {
            offset: cursor,
            length: (padded.len() as u64 / UNIT) as u32,
        };
        header.partition_fs_types[i] = FS_TYPE_NORMAL;
        blobs.push((cursor as usize, padded));
        cursor += (blobs.last().unwrap().1.len() as u64 / UNIT) as u32;
    }
    header.image_size = cursor;

    let mut image = Cursor::new(Vec::new());
    header.write(&mut image).unwrap();
    let mut image = image.into_inner();
    for (offset_units, blob) in blobs {
        let offset = offset_units * UNIT as usize;
        if image.len() < offset {
            image.resize(offset, 0);
        }
        image.extend_from_slice(&blob);
    }
    image
}

/// A CDN directory on disk: `tmd`, optional `cetk`, and hex-named contents.
pub fn build_cdn_dir(
    engine: &KeyEngine,
    title_id: u64,
    contents: &[(u16, u32, &[u8])],
    with_cetk: bool,
) -> TempDir {
    let dir = TempDir::new().unwrap();
    let spec = CiaSpec::new(
        title_id,
        contents
            .iter()
            .map(|(index, id, data)| (*index, *id, data.to_vec()))
            .collect(),
    );
    std::fs::write(dir.path().join("tmd"), build_tmd(&spec)).unwrap();
    if with_cetk {
        std::fs::write(dir.path().join("cetk"), build_ticket(engine, &spec)).unwrap();
    }
    for (index, id, data) in contents {
        std::fs::write(
            dir.path().join(format!("{id:08x}")),
            encrypt_content(engine, &spec, *index, data),
        )
        .unwrap();
    }
    dir
}

// ---------------------------------------------------------------------------
// NAND

pub struct NandFixture {
    pub image: Vec<u8>,
    pub cid: [u8; 16],
    /// The engine after OTP ingestion; NAND keyslots ready.
    pub engine: KeyEngine,
}

pub struct NandBuildOpts {
    pub with_essentials: bool,
    pub corrupt_twl_mbr: bool,
    pub new3ds_ctrnand: bool,
    pub bonus: bool,
}

impl Default for NandBuildOpts {
    fn default() -> Self {
        NandBuildOpts {
            with_essentials: true,
            corrupt_twl_mbr: false,
            new3ds_ctrnand: false,
            bonus: false,
        }
    }
}

pub const NAND_TEST_CID: [u8; 16] = [
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E,
    0x1F,
];

/// Partition plan used by the NAND fixture, in media units of 0x200:
/// TWL at 0 (0x100 units), FIRM0/FIRM1/AGBSAVE at 0x100/0x108/0x110
/// (8 units each), CTRNAND at 0x118 (0x10 units).
pub const NAND_TWL_BYTES: u64 = 0x20000;
pub const NAND_CTR_OFFSET: u64 = 0x23000;
pub const NAND_CTR_BYTES: u64 = 0x2000;
pub const NAND_IMAGE_BYTES: u64 = 0x25000;

pub fn build_nand(boot9_engine: &KeyEngine, opts: &NandBuildOpts) -> NandFixture {
    let mut engine = boot9_engine.clone();
    let otp = fake_otp();
    engine.setup_keys_from_otp(&otp).unwrap();

    let cid = NAND_TEST_CID;
    let ctr_base = u128::from_be_bytes(Sha1::digest(cid)[0..16].try_into().unwrap());

    let mut image = vec![0u8; NAND_IMAGE_BYTES as usize];

    // TWL region: craft the decrypted view, then encrypt in place.
    let mut twl_dec = vec![0u8; NAND_TWL_BYTES as usize];
    // One MBR record: a partition of 0x20 sectors starting at sector 8.
    let record = &mut twl_dec[0x1BE..0x1CE];
    record[4] = 6; // partition type
    record[8..12].copy_from_slice(&8u32.to_le_bytes());
    record[12..16].copy_from_slice(&0x20u32.to_le_bytes());
    twl_dec[0x1FE] = 0x55;
    twl_dec[0x1FF] = 0xAA;
    // FAT-style boot sector at the partition start.
    twl_dec[0x1000] = 0xEB;
    twl_dec[0x1001] = 0x00;
    twl_dec[0x1003..0x100B].copy_from_slice(b"TWL FAT ");
    engine
        .create_ctr_cipher(slot::TWL_NAND, ctr_base)
        .unwrap()
        .apply(0, &mut twl_dec);
    image[0..NAND_TWL_BYTES as usize].copy_from_slice(&twl_dec);
    // The header write below clobbers sector 0; keep the encrypted MBR
    // window so it can be grafted back, as on a real console where the
    // signature bytes are crafted to decrypt into the MBR.
    let encrypted_mbr = image[0x1BE..0x200].to_vec();

    // The NCSD header overlays the first TWL sector.
    let mut header = NcsdHeader::empty();
    header.image_size = (NAND_IMAGE_BYTES / 0x200) as u32;
    header.partition_fs_types = [
        FS_TYPE_NORMAL,
        FS_TYPE_FIRM,
        FS_TYPE_FIRM,
        FS_TYPE_AGB_SAVE,
        FS_TYPE_NORMAL,
        0,
        0,
        0,
    ];
    header.partition_crypt_types = [
        CRYPT_TYPE_TWL,
        CRYPT_TYPE_CTR,
        CRYPT_TYPE_CTR,
        CRYPT_TYPE_CTR,
        if opts.new3ds_ctrnand {
            CRYPT_TYPE_CTR_NEW
        } else {
            CRYPT_TYPE_CTR
        },
        0,
        0,
        0,
    ];
    header.partition_table = [
        NcsdPartition { offset: 0, length: 0x100 },
        NcsdPartition { offset: 0x100, length: 8 },
        NcsdPartition { offset: 0x108, length: 8 },
        NcsdPartition { offset: 0x110, length: 8 },
        NcsdPartition { offset: 0x118, length: 0x10 },
        NcsdPartition::default(),
        NcsdPartition::default(),
        NcsdPartition::default(),
    ];
    let mut header_bytes = Cursor::new(Vec::new());
    header.write(&mut header_bytes).unwrap();
    image[0..0x200].copy_from_slice(header_bytes.get_ref());
    if !opts.corrupt_twl_mbr {
        image[0x1BE..0x200].copy_from_slice(&encrypted_mbr);
    }

    // Essentials backup right after the header.
    if opts.with_essentials {
        let mut movable = vec![0u8; 0x140];
        movable[0x110..0x120].copy_from_slice(&[0xA5; 16]);
        let essentials = build_exefs(&[
            ("nand_cid", &cid[..]),
            ("otp", &otp),
            ("movable", &movable),
        ]);
        image[0x200..0x200 + essentials.len()].copy_from_slice(&essentials);
    }

    // FIRM0 / FIRM1 / AGBSAVE under the CTR keyslot.
    for (offset, marker) in [
        (0x20000u64, b"FIRM0fixture...."),
        (0x21000, b"FIRM1fixture...."),
        (0x22000, b"AGBSAVEfixture.."),
    ] {
        let mut dec = vec![0u8; 0x1000];
        dec[0..16].copy_from_slice(marker);
        engine
            .create_ctr_cipher(slot::FIRM, ctr_base + (offset / 16) as u128)
            .unwrap()
            .apply(0, &mut dec);
        image[offset as usize..offset as usize + 0x1000].copy_from_slice(&dec);
    }

    // CTRNAND: a recognizable block after the 0x200 FAT-MBR skip.
    let ctr_slot = if opts.new3ds_ctrnand {
        slot::CTR_NAND_NEW
    } else {
        slot::FIRM
    };
    let mut ctr_dec = vec![0u8; NAND_CTR_BYTES as usize];
    ctr_dec[0x200..0x210].copy_from_slice(b"CTRNAND fixture!");
    engine
        .create_ctr_cipher(ctr_slot, ctr_base + (NAND_CTR_OFFSET / 16) as u128)
        .unwrap()
        .apply(0, &mut ctr_dec);
    image[NAND_CTR_OFFSET as usize..(NAND_CTR_OFFSET + NAND_CTR_BYTES) as usize]
        .copy_from_slice(&ctr_dec);

    if opts.bonus {
        let mut bonus = vec![0u8; 0x400];
        bonus[0..4].copy_from_slice(b"GM9B");
        image.extend_from_slice(&bonus);
    }

    NandFixture { image, cid, engine }
}

// ---------------------------------------------------------------------------
// DISA

/// Layout constants for the DISA fixture.
pub const DISA_TABLE_SIZE: u64 = 0x100;
pub const DISA_SECONDARY_TABLE: u64 = 0x200;
pub const DISA_PRIMARY_TABLE: u64 = 0x300;
pub const DISA_PARTITION_OFFSET: u64 = 0x2000;
pub const DISA_PARTITION_SIZE: u64 = 0x2000;
pub const DISA_LEVEL4_OFFSET: u64 = 0x1000;

/// A DISA save image whose active (primary) table points at an external
/// IVFC level 4 holding `payload`.
pub fn build_disa(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() as u64 <= DISA_PARTITION_SIZE - DISA_LEVEL4_OFFSET);

    let difi = DifiEntry {
        magic: DIFI_MAGIC,
        version: DIFI_VERSION,
        ivfc_offset: 0x44,
        ivfc_size: 0x78,
        dpfs_offset: 0,
        dpfs_size: 0,
        hash_offset: 0,
        hash_size: 0,
        external_ivfc_level4: 1,
        dpfs_level1_selector: 0,
        padding: 0,
        external_level4_offset: DISA_LEVEL4_OFFSET,
    };
    let mut levels = [IvfcDescLevel::default(); 4];
    levels[3] = IvfcDescLevel {
        offset: DISA_LEVEL4_OFFSET,
        size: payload.len() as u64,
        block_size_log: 12,
        reserved: 0,
    };
    let ivfc = IvfcDescriptor {
        magic: *b"IVFC",
        version: IVFC_SAVE_VERSION,
        master_hash_size: 0x20,
        levels,
        descriptor_size: 0x78,
    };

    let mut table = Cursor::new(Vec::new());
    difi.write(&mut table).unwrap();
    ivfc.write(&mut table).unwrap();
    let mut table = table.into_inner();
    table.resize(DISA_TABLE_SIZE as usize, 0);

    let header = DisaHeader {
        magic: DISA_MAGIC,
        version: DISA_VERSION,
        partition_count: 1,
        padding1: 0,
        secondary_table_offset: DISA_SECONDARY_TABLE,
        primary_table_offset: DISA_PRIMARY_TABLE,
        table_size: DISA_TABLE_SIZE,
        save_a_desc_offset: 0,
        save_a_desc_size: 0xBC,
        save_b_desc_offset: 0,
        save_b_desc_size: 0,
        partition_a_offset: DISA_PARTITION_OFFSET,
        partition_a_size: DISA_PARTITION_SIZE,
        partition_b_offset: 0,
        partition_b_size: 0,
        active_table: 0,
        padding2: [0; 3],
        table_hash: Sha256::digest(&table).into(),
        reserved: vec![0; 0x74],
    };

    let mut image = vec![0u8; (DISA_PARTITION_OFFSET + DISA_PARTITION_SIZE) as usize];
    let mut header_bytes = Cursor::new(Vec::new());
    header.write(&mut header_bytes).unwrap();
    image[0x100..0x200].copy_from_slice(header_bytes.get_ref());
    image[DISA_PRIMARY_TABLE as usize..(DISA_PRIMARY_TABLE + DISA_TABLE_SIZE) as usize]
        .copy_from_slice(&table);
    let payload_at = (DISA_PARTITION_OFFSET + DISA_LEVEL4_OFFSET) as usize;
    image[payload_at..payload_at + payload.len()].copy_from_slice(payload);
    image
}

/// A DIFF extdata image mirroring the DISA fixture layout.
pub fn build_diff(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() as u64 <= DISA_PARTITION_SIZE - DISA_LEVEL4_OFFSET);

    let difi = DifiEntry {
        magic: DIFI_MAGIC,
        version: DIFI_VERSION,
        ivfc_offset: 0x44,
        ivfc_size: 0x78,
        dpfs_offset: 0,
        dpfs_size: 0,
        hash_offset: 0,
        hash_size: 0,
        external_ivfc_level4: 1,
        dpfs_level1_selector: 0,
        padding: 0,
        external_level4_offset: DISA_LEVEL4_OFFSET,
    };
    let mut levels = [IvfcDescLevel::default(); 4];
    levels[3] = IvfcDescLevel {
        offset: DISA_LEVEL4_OFFSET,
        size: payload.len() as u64,
        block_size_log: 12,
        reserved: 0,
    };
    let ivfc = IvfcDescriptor {
        magic: *b"IVFC",
        version: IVFC_SAVE_VERSION,
        master_hash_size: 0x20,
        levels,
        descriptor_size: 0x78,
    };

    let mut table = Cursor::new(Vec::new());
    difi.write(&mut table).unwrap();
    ivfc.write(&mut table).unwrap();
    let mut table = table.into_inner();
    table.resize(DISA_TABLE_SIZE as usize, 0);

    let header = crate::models::disa::DiffHeader {
        magic: crate::models::disa::DIFF_MAGIC,
        version: crate::models::disa::DIFF_VERSION,
        secondary_table_offset: DISA_SECONDARY_TABLE,
        primary_table_offset: DISA_PRIMARY_TABLE,
        table_size: DISA_TABLE_SIZE,
        partition_offset: DISA_PARTITION_OFFSET,
        partition_size: DISA_PARTITION_SIZE,
        active_table: 0,
        padding: [0; 3],
        table_hash: Sha256::digest(&table).into(),
        unique_id: 0xFEEDC0DE,
        reserved: vec![0; 0xA4],
    };

    let mut image = vec![0u8; (DISA_PARTITION_OFFSET + DISA_PARTITION_SIZE) as usize];
    let mut header_bytes = Cursor::new(Vec::new());
    header.write(&mut header_bytes).unwrap();
    image[0x100..0x200].copy_from_slice(header_bytes.get_ref());
    image[DISA_PRIMARY_TABLE as usize..(DISA_PRIMARY_TABLE + DISA_TABLE_SIZE) as usize]
        .copy_from_slice(&table);
    let payload_at = (DISA_PARTITION_OFFSET + DISA_LEVEL4_OFFSET) as usize;
    image[payload_at..payload_at + payload.len()].copy_from_slice(payload);
    image
}

// ---------------------------------------------------------------------------
// SD tree

/// Creates `root/Nintendo 3DS/<id0>/<id1>` for the given SD KeyY and returns
/// the temp root plus the id1 path.
pub fn build_sd_tree(sd_key_y: [u8; 16]) -> (TempDir, std::path::PathBuf) {
    let root = TempDir::new().unwrap();
    let id0 = crate::sd::id0_hex(sd_key_y);
    let id1 = "00112233445566778899aabbccddeeff";
    let id1_path = root.path().join("Nintendo 3DS").join(&id0).join(id1);
    std::fs::create_dir_all(&id1_path).unwrap();
    (root, id1_path)
}

/// Writes one SD-encrypted file below an id1 directory.
pub fn write_sd_file(engine: &KeyEngine, id1_dir: &std::path::Path, rel: &str, plain: &[u8]) {
    let iv = crate::crypto::sd_path_to_iv(rel);
    let mut data = plain.to_vec();
    let cipher = engine.create_ctr_cipher(slot::SD_KEY, iv).unwrap();
    cipher.apply(0, &mut data);
    let path = id1_dir.join(rel.trim_start_matches('/'));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}
