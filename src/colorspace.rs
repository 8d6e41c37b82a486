#![forbid(unsafe_code)]

//! Colorspace tags and the conversions between them.
//!
//! Three spaces are supported: gamma-encoded sRGB (the default for every
//! byte-per-channel format), linear-light RGB, and OKLab. Conversions
//! operate in place on 3-channel float32 buffers; byte-form frames are
//! promoted to float first by [`Frame::set_pixelformat`].
//!
//! The sRGB transfer follows the IEC 61966-2-1 breakpoints exactly
//! (`0.04045` / `12.92`, `((x + 0.055) / 1.055)^2.4`). OKLab uses the
//! published matrix pair over linear RGB.
//!
//! [`Frame::set_pixelformat`]: crate::Frame::set_pixelformat

use std::sync::OnceLock;

use bytemuck::{bytes_of, pod_read_unaligned};

use crate::{PixelFormat, SixelError, SixelResult};

/// How the numeric channel values of a buffer relate to light.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Colorspace {
  /// sRGB gamma encoded. The default for all byte formats.
  #[default]
  Gamma,
  /// Linear-light RGB.
  Linear,
  /// OKLab: L in roughly 0..1, a/b roughly -0.5..0.5.
  Oklab,
}

/// sRGB-encoded value to linear light, both in 0.0 to 1.0.
#[inline]
#[must_use]
pub fn srgb_to_linear(value: f32) -> f32 {
  if value <= 0.04045 {
    value / 12.92
  } else {
    ((value + 0.055) / 1.055).powf(2.4)
  }
}

/// Linear light to sRGB encoding, both in 0.0 to 1.0.
#[inline]
#[must_use]
pub fn linear_to_srgb(value: f32) -> f32 {
  if value <= 0.0031308 {
    value * 12.92
  } else {
    1.055 * value.powf(1.0 / 2.4) - 0.055
  }
}

/// 256-entry decode table: sRGB byte to linear light on a 0..255 scale.
pub(crate) fn srgb_to_linear_lut() -> &'static [f32; 256] {
  static LUT: OnceLock<[f32; 256]> = OnceLock::new();
  LUT.get_or_init(|| {
    let mut table = [0.0f32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
      *slot = srgb_to_linear(i as f32 / 255.0) * 255.0;
    }
    table
  })
}

/// 256-entry encode table: rounded linear value (0..255 scale) to sRGB byte.
pub(crate) fn linear_to_srgb_lut() -> &'static [u8; 256] {
  static LUT: OnceLock<[u8; 256]> = OnceLock::new();
  LUT.get_or_init(|| {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
      let srgb = linear_to_srgb(i as f32 / 255.0) * 255.0;
      *slot = (srgb.clamp(0.0, 255.0) + 0.5) as u8;
    }
    table
  })
}

/// Linear RGB to OKLab, from the published forward matrices.
#[inline]
#[must_use]
pub fn linear_to_oklab(rgb: [f32; 3]) -> [f32; 3] {
  let [r, g, b] = rgb;
  let l = 0.412_221_470_8 * r + 0.536_332_536_3 * g + 0.051_445_992_9 * b;
  let m = 0.211_903_498_2 * r + 0.680_699_545_1 * g + 0.107_396_956_6 * b;
  let s = 0.088_302_461_9 * r + 0.281_718_837_6 * g + 0.629_978_700_5 * b;
  let l_ = l.cbrt();
  let m_ = m.cbrt();
  let s_ = s.cbrt();
  [
    0.210_454_255_3 * l_ + 0.793_617_785_0 * m_ - 0.004_072_046_8 * s_,
    1.977_998_495_1 * l_ - 2.428_592_205_0 * m_ + 0.450_593_709_9 * s_,
    0.025_904_037_1 * l_ + 0.782_771_766_2 * m_ - 0.808_675_766_0 * s_,
  ]
}

/// OKLab back to linear RGB, from the published inverse matrices.
#[inline]
#[must_use]
pub fn oklab_to_linear(lab: [f32; 3]) -> [f32; 3] {
  let [lightness, a, b] = lab;
  let l_ = lightness + 0.396_337_777_4 * a + 0.215_803_757_3 * b;
  let m_ = lightness - 0.105_561_345_8 * a - 0.063_854_172_8 * b;
  let s_ = lightness - 0.089_484_177_5 * a - 1.291_485_548_0 * b;
  let l = l_ * l_ * l_;
  let m = m_ * m_ * m_;
  let s = s_ * s_ * s_;
  [
    4.076_741_662_1 * l - 3.307_711_591_3 * m + 0.230_969_929_2 * s,
    -1.268_438_004_6 * l + 2.609_757_401_1 * m - 0.341_319_396_5 * s,
    -0.004_196_086_3 * l - 0.703_418_614_7 * m + 1.707_614_701_0 * s,
  ]
}

#[inline]
fn to_linear(pixel: [f32; 3], from: Colorspace) -> [f32; 3] {
  match from {
    Colorspace::Gamma => pixel.map(srgb_to_linear),
    Colorspace::Linear => pixel,
    Colorspace::Oklab => oklab_to_linear(pixel),
  }
}

#[inline]
fn from_linear(pixel: [f32; 3], to: Colorspace) -> [f32; 3] {
  match to {
    Colorspace::Gamma => pixel.map(linear_to_srgb),
    Colorspace::Linear => pixel,
    Colorspace::Oklab => linear_to_oklab(pixel),
  }
}

/// Converts a float32 pixel buffer between colorspaces, in place.
///
/// `pixels` holds native-endian `f32` triples in the layout described by
/// `format`. The conversion routes through linear light, so any of the nine
/// `(src, dst)` pairs works; `src == dst` is a no-op.
///
/// ## Failure
/// * `BadInput` when `format` is not a float32 form, or the buffer length
///   is not a whole number of pixels.
pub fn convert_colorspace(
  pixels: &mut [u8], format: PixelFormat, src: Colorspace, dst: Colorspace,
) -> SixelResult<()> {
  if !format.is_float() {
    return Err(SixelError::BadInput);
  }
  if pixels.len() % format.bytes_per_pixel() != 0 {
    return Err(SixelError::BadInput);
  }
  if src == dst {
    return Ok(());
  }
  for chunk in pixels.chunks_exact_mut(12) {
    let pixel = [
      pod_read_unaligned::<f32>(&chunk[0..4]),
      pod_read_unaligned::<f32>(&chunk[4..8]),
      pod_read_unaligned::<f32>(&chunk[8..12]),
    ];
    let converted = from_linear(to_linear(pixel, src), dst);
    chunk[0..4].copy_from_slice(bytes_of(&converted[0]));
    chunk[4..8].copy_from_slice(bytes_of(&converted[1]));
    chunk[8..12].copy_from_slice(bytes_of(&converted[2]));
  }
  Ok(())
}
