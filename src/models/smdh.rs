use binrw::{BinRead, BinWrite};

/// SMDH: the icon-and-metadata blob found in the `icon` ExeFS entry and in
/// CIA meta sections. 0x36C0 bytes total.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct Smdh {
    /// `"SMDH"`
    pub magic: [u8; 4],

    pub version: u16,

    pub reserved1: u16,

    /// Sixteen language slots; see [`Language`] for the used indices.
    #[br(count = 16)]
    pub titles: Vec<AppTitle>,

    pub settings: AppSettings,

    pub reserved2: u64,

    /// 24x24 icon, tiled RGB565.
    #[br(count = 0x240)]
    pub small_icon: Vec<u16>,

    /// 48x48 icon, tiled RGB565.
    #[br(count = 0x900)]
    pub large_icon: Vec<u16>,
}

/// One 0x200-byte application title: UTF-16LE fixed-size fields.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct AppTitle {
    #[br(count = 0x40)]
    pub short_desc: Vec<u16>,

    #[br(count = 0x80)]
    pub long_desc: Vec<u16>,

    #[br(count = 0x40)]
    pub publisher: Vec<u16>,
}

/// The 0x30-byte application settings block.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct AppSettings {
    /// One rating byte per region body (CERO, ESRB, ...).
    pub ratings: [u8; 0x10],

    /// Region lockout bitfield; see the `REGION_*` constants.
    pub region_lockout: u32,

    pub matchmaker_id: u32,

    pub matchmaker_bit_id: u64,

    pub flags: u32,

    pub eula_version: u16,

    pub reserved: u16,

    pub optimal_animation_frame: f32,

    pub cec_id: u32,
}

pub const SMDH_MAGIC: [u8; 4] = *b"SMDH";

/// Region lockout bits.
pub const REGION_JAPAN: u32 = 0x01;
pub const REGION_NORTH_AMERICA: u32 = 0x02;
pub const REGION_EUROPE: u32 = 0x04;
pub const REGION_AUSTRALIA: u32 = 0x08;
pub const REGION_CHINA: u32 = 0x10;
pub const REGION_KOREA: u32 = 0x20;
pub const REGION_TAIWAN: u32 = 0x40;
pub const REGION_FREE: u32 = 0x7FFF_FFFF;

/// Title languages by slot index. Slots 12-15 are unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Language {
    Japanese = 0,
    English = 1,
    French = 2,
    German = 3,
    Italian = 4,
    Spanish = 5,
    SimplifiedChinese = 6,
    Korean = 7,
    Dutch = 8,
    Portuguese = 9,
    Russian = 10,
    TraditionalChinese = 11,
}

impl AppTitle {
    pub fn blank() -> Self {
        AppTitle {
            short_desc: vec![0; 0x40],
            long_desc: vec![0; 0x80],
            publisher: vec![0; 0x40],
        }
    }

    fn decode(units: &[u16]) -> String {
        let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
        String::from_utf16_lossy(&units[..end])
    }

    pub fn short_desc_str(&self) -> String {
        Self::decode(&self.short_desc)
    }

    pub fn long_desc_str(&self) -> String {
        Self::decode(&self.long_desc)
    }

    pub fn publisher_str(&self) -> String {
        Self::decode(&self.publisher)
    }

    pub fn set_short_desc(&mut self, text: &str) {
        Self::encode_into(&mut self.short_desc, text);
    }

    pub fn set_long_desc(&mut self, text: &str) {
        Self::encode_into(&mut self.long_desc, text);
    }

    pub fn set_publisher(&mut self, text: &str) {
        Self::encode_into(&mut self.publisher, text);
    }

    fn encode_into(field: &mut [u16], text: &str) {
        field.fill(0);
        for (slot, unit) in field.iter_mut().zip(text.encode_utf16()) {
            *slot = unit;
        }
    }
}

impl Smdh {
    pub fn title(&self, language: Language) -> &AppTitle {
        &self.titles[language as usize]
    }

    pub fn region_locked_to(&self, region_bit: u32) -> bool {
        self.settings.region_lockout & region_bit != 0
    }

    pub fn is_region_free(&self) -> bool {
        self.settings.region_lockout == REGION_FREE
    }
}
