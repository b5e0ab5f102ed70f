//! SMDH decoding: title strings, settings, and the tiled RGB565 icons.

use std::io::{Read, Seek};

use binrw::BinRead;

use crate::error::{CtrioError, CtrioResult};
use crate::models::smdh::{SMDH_MAGIC, Smdh};

/// Parses an SMDH from a stream, validating the magic.
pub fn read_smdh<R: Read + Seek>(reader: &mut R) -> CtrioResult<Smdh> {
    let smdh = Smdh::read(reader)?;
    if smdh.magic != SMDH_MAGIC {
        return Err(CtrioError::InvalidHeader {
            kind: "SMDH",
            offset: 0,
        });
    }
    Ok(smdh)
}

/// An icon decoded to rows of RGB888 pixels.
pub type IconPixels = Vec<Vec<[u8; 3]>>;

/// 8x8 tiles in row-major order; within each tile, pixels follow the Morton
/// (Z-order) curve. The low six bits of the in-tile index interleave as
/// x = bits 0,2,4 and y = bits 1,3,5.
fn detile(data: &[u16], dim: usize) -> IconPixels {
    let mut out = vec![vec![[0u8; 3]; dim]; dim];
    let tiles_per_row = dim / 8;
    for (i, &color) in data.iter().enumerate() {
        let tile = i / 64;
        let within = i % 64;
        let tx = (tile % tiles_per_row) * 8;
        let ty = (tile / tiles_per_row) * 8;
        let x = (within & 1) | ((within & 4) >> 1) | ((within & 16) >> 2);
        let y = ((within & 2) >> 1) | ((within & 8) >> 2) | ((within & 32) >> 3);
        out[ty + y][tx + x] = rgb565_to_rgb888(color);
    }
    out
}

pub fn rgb565_to_rgb888(color: u16) -> [u8; 3] {
    let r = ((color >> 11) & 0x1F) as u32;
    let g = ((color >> 5) & 0x3F) as u32;
    let b = (color & 0x1F) as u32;
    [
        (r * 255 / 31) as u8,
        (g * 255 / 63) as u8,
        (b * 255 / 31) as u8,
    ]
}

impl Smdh {
    /// The 24x24 icon as dense RGB888 rows.
    pub fn small_icon_pixels(&self) -> IconPixels {
        detile(&self.small_icon, 24)
    }

    /// The 48x48 icon as dense RGB888 rows.
    pub fn large_icon_pixels(&self) -> IconPixels {
        detile(&self.large_icon, 48)
    }
}
