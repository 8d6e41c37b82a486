#![forbid(unsafe_code)]

//! Forward dithering: mapping pixels onto palette indices.
//!
//! Two families of methods share one driver. Error diffusion spreads each
//! pixel's quantization residual over unvisited neighbors through a fixed
//! weight kernel; ordered/pattern dithering perturbs each channel with a
//! procedural mask before the palette lookup and carries no state between
//! pixels. Serpentine scanning alternates row direction and mirrors the
//! kernel's column offsets so the diffused error always lands ahead of the
//! scan.
//!
//! The palette lookup keeps a short cache keyed by the 15-bit quantized
//! color. Two-entry palettes that are exactly black and white skip the
//! distance search entirely.

use log::debug;

use crate::{palette::PALETTE_MAX, SixelError, SixelResult};

/// Error-diffusion / pattern method selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DiffusionMethod {
  /// Defaults to no diffusion.
  #[default]
  Auto,
  /// Quantize directly, no error distribution.
  None,
  /// Atkinson's 6-term kernel, 3/4 error diffused.
  Atkinson,
  /// Floyd-Steinberg 4-term kernel.
  FS,
  /// Jarvis, Judice & Ninke 12-term kernel.
  JaJuNi,
  /// Stucki 12-term kernel.
  Stucki,
  /// Burkes 7-term kernel.
  Burkes,
  /// Procedural additive mask, variant A.
  ADither,
  /// Procedural additive mask, variant X.
  XDither,
}

/// Row traversal order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScanMethod {
  /// Defaults to raster order.
  #[default]
  Auto,
  /// Every row left to right.
  Raster,
  /// Alternate row direction to suppress directional artifacts.
  Serpentine,
}

/// Driver configuration for [`apply_palette`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DitherConfig {
  /// Diffusion or pattern method.
  pub diffusion: DiffusionMethod,
  /// Row traversal order.
  pub scan: ScanMethod,
  /// Use the cached fast lookup instead of the exhaustive search.
  pub optimize: bool,
  /// Re-index colors so the emitted palette only holds used entries.
  pub optimize_palette: bool,
  /// Multiplier biasing the lookup toward the red channel; 1 is neutral.
  pub complexion: i32,
}

impl Default for DitherConfig {
  fn default() -> Self {
    Self {
      diffusion: DiffusionMethod::Auto,
      scan: ScanMethod::Auto,
      optimize: true,
      optimize_palette: false,
      complexion: 1,
    }
  }
}

/// One diffusion tap: row offset, column offset, weight numerator and
/// denominator.
type Tap = (isize, isize, i32, i32);

/// Atkinson distributes six eighths and deliberately drops the rest.
const ATKINSON: &[Tap] = &[
  (0, 1, 1, 8),
  (0, 2, 1, 8),
  (1, -1, 1, 8),
  (1, 0, 1, 8),
  (1, 1, 1, 8),
  (2, 0, 1, 8),
];

const FS: &[Tap] = &[(0, 1, 7, 16), (1, -1, 3, 16), (1, 0, 5, 16), (1, 1, 1, 16)];

const JAJUNI: &[Tap] = &[
  (0, 1, 7, 48),
  (0, 2, 5, 48),
  (1, -2, 3, 48),
  (1, -1, 5, 48),
  (1, 0, 7, 48),
  (1, 1, 5, 48),
  (1, 2, 3, 48),
  (2, -2, 1, 48),
  (2, -1, 3, 48),
  (2, 0, 5, 48),
  (2, 1, 3, 48),
  (2, 2, 1, 48),
];

const STUCKI: &[Tap] = &[
  (0, 1, 8, 42),
  (0, 2, 4, 42),
  (1, -2, 2, 42),
  (1, -1, 4, 42),
  (1, 0, 8, 42),
  (1, 1, 4, 42),
  (1, 2, 2, 42),
  (2, -2, 1, 42),
  (2, -1, 2, 42),
  (2, 0, 4, 42),
  (2, 1, 2, 42),
  (2, 2, 1, 42),
];

const BURKES: &[Tap] = &[
  (0, 1, 8, 32),
  (0, 2, 4, 32),
  (1, -2, 2, 32),
  (1, -1, 4, 32),
  (1, 0, 8, 32),
  (1, 1, 4, 32),
  (1, 2, 2, 32),
];

fn kernel_for(method: DiffusionMethod) -> &'static [Tap] {
  match method {
    DiffusionMethod::Atkinson => ATKINSON,
    DiffusionMethod::FS => FS,
    DiffusionMethod::JaJuNi => JAJUNI,
    DiffusionMethod::Stucki => STUCKI,
    DiffusionMethod::Burkes => BURKES,
    _ => &[],
  }
}

/// Procedural mask A, in -1.0..1.0.
#[inline]
#[must_use]
pub fn mask_a(x: i32, y: i32, c: i32) -> f32 {
  ((((x + c * 67) + y * 236).wrapping_mul(119)) & 255) as f32 / 128.0 - 1.0
}

/// Procedural mask X, in roughly -1.0..1.0.
#[inline]
#[must_use]
pub fn mask_x(x: i32, y: i32, c: i32) -> f32 {
  ((((x + c * 29) ^ (y.wrapping_mul(149))).wrapping_mul(1234)) & 511) as f32 / 256.0
    - 1.0
}

/// Spreads `error` for channel `channel` of pixel `(x, y)` over the kernel,
/// mirrored horizontally when the row scans right to left.
#[allow(clippy::too_many_arguments)]
fn diffuse_error(
  data: &mut [u8], width: usize, height: usize, x: usize, y: usize, depth: usize,
  channel: usize, error: i32, kernel: &[Tap], direction: isize,
) {
  for &(dy, dx, numerator, denominator) in kernel {
    let nx = x as isize + dx * direction;
    let ny = y as isize + dy;
    if nx < 0 || nx >= width as isize || ny < 0 || ny >= height as isize {
      continue;
    }
    let offset = (ny as usize * width + nx as usize) * depth + channel;
    let value = i32::from(data[offset]) + error * numerator / denominator;
    data[offset] = value.clamp(0, 255) as u8;
  }
}

/// 15-bit quantized key used by the fast lookup cache.
#[inline]
fn cache_key(pixel: &[u8], depth: usize) -> usize {
  let mut hash = 0usize;
  for n in 0..depth {
    hash |= (usize::from(pixel[depth - 1 - n]) >> 3) << (n * 5);
  }
  hash
}

/// Exhaustive nearest-entry search with complexion bias on red.
fn lookup_normal(pixel: &[u8], depth: usize, palette: &[u8], reqcolor: usize,
  complexion: i32) -> usize {
  let mut result = 0usize;
  let mut diff = i32::MAX;
  for i in 0..reqcolor {
    let mut distant = 0i32;
    let r = i32::from(pixel[0]) - i32::from(palette[i * depth]);
    distant += r * r * complexion;
    for n in 1..depth {
      let d = i32::from(pixel[n]) - i32::from(palette[i * depth + n]);
      distant += d * d;
    }
    if distant < diff {
      diff = distant;
      result = i;
    }
  }
  result
}

/// Cached nearest-entry search; the cache stores `index + 1`, zero means
/// empty.
fn lookup_fast(pixel: &[u8], depth: usize, palette: &[u8], reqcolor: usize,
  cache: &mut [u16], complexion: i32) -> usize {
  let key = cache_key(pixel, depth);
  let cached = cache[key];
  if cached != 0 {
    return usize::from(cached) - 1;
  }
  let result = lookup_normal(pixel, depth, palette, reqcolor, complexion);
  cache[key] = (result + 1) as u16;
  result
}

fn lookup_mono_darkbg(pixel: &[u8], depth: usize, reqcolor: usize) -> usize {
  let distant: i32 = pixel[..depth].iter().map(|&v| i32::from(v)).sum();
  usize::from(distant >= 128 * reqcolor as i32)
}

fn lookup_mono_lightbg(pixel: &[u8], depth: usize, reqcolor: usize) -> usize {
  let distant: i32 = pixel[..depth].iter().map(|&v| i32::from(v)).sum();
  usize::from(distant < 128 * reqcolor as i32)
}

enum Lookup {
  Normal,
  Fast,
  MonoDark,
  MonoLight,
}

impl Lookup {
  fn choose(palette: &[u8], depth: usize, reqcolor: usize, optimize: bool) -> Self {
    if reqcolor == 2 && palette.len() >= depth * 2 {
      let sum1: i32 = palette[..depth].iter().map(|&v| i32::from(v)).sum();
      let sum2: i32 = palette[depth..depth * 2].iter().map(|&v| i32::from(v)).sum();
      if sum1 == 0 && sum2 == 255 * 3 {
        return Lookup::MonoDark;
      }
      if sum1 == 255 * 3 && sum2 == 0 {
        return Lookup::MonoLight;
      }
    }
    if optimize && depth == 3 {
      Lookup::Fast
    } else {
      Lookup::Normal
    }
  }

  fn run(&self, pixel: &[u8], depth: usize, palette: &[u8], reqcolor: usize,
    cache: &mut [u16], complexion: i32) -> usize {
    match self {
      Lookup::Normal => lookup_normal(pixel, depth, palette, reqcolor, complexion),
      Lookup::Fast => lookup_fast(pixel, depth, palette, reqcolor, cache, complexion),
      Lookup::MonoDark => lookup_mono_darkbg(pixel, depth, reqcolor),
      Lookup::MonoLight => lookup_mono_lightbg(pixel, depth, reqcolor),
    }
  }
}

/// Column walk for one row: `(start, end_exclusive_sentinel, step)`.
#[inline]
fn scanline_params(serpentine: bool, row: usize, limit: usize) -> (isize, isize, isize) {
  if serpentine && (row & 1) == 1 {
    (limit as isize - 1, -1, -1)
  } else {
    (0, limit as isize, 1)
  }
}

/// Tracks first-use reindexing when palette optimization is on.
struct Migration {
  map: [u16; PALETTE_MAX],
  new_palette: Vec<u8>,
  ncolors: usize,
}

impl Migration {
  fn new(depth: usize) -> Self {
    Self { map: [0; PALETTE_MAX], new_palette: vec![0; PALETTE_MAX * depth], ncolors: 0 }
  }

  /// Maps a palette index to its compacted slot, allocating on first use.
  fn translate(&mut self, color_index: usize, palette: &[u8], depth: usize) -> u8 {
    if self.map[color_index] == 0 {
      let slot = self.ncolors;
      self.new_palette[slot * depth..slot * depth + depth]
        .copy_from_slice(&palette[color_index * depth..color_index * depth + depth]);
      self.ncolors += 1;
      self.map[color_index] = self.ncolors as u16;
      slot as u8
    } else {
      (self.map[color_index] - 1) as u8
    }
  }
}

/// Quantizes `data` onto `palette`, writing one index per pixel.
///
/// `data` holds `depth` bytes per pixel and is clobbered by error
/// diffusion. With `optimize_palette` set, `palette` is rewritten in place
/// to contain only the entries actually used, in first-use order, and the
/// used count is returned; otherwise `reqcolor` is returned.
///
/// A caller-provided `cache` (32768 entries, zeroed) lets repeated frames
/// share lookup state; pass `None` to use a scratch cache.
///
/// ## Failure
/// * `BadArgument` when `reqcolor` is zero or `depth` unsupported.
/// * `BadInput` when the buffers are shorter than the dimensions require.
#[allow(clippy::too_many_arguments)]
pub fn apply_palette(
  result: &mut [u8], data: &mut [u8], width: usize, height: usize, depth: usize,
  palette: &mut Vec<u8>, reqcolor: usize, config: &DitherConfig,
  cache: Option<&mut [u16]>,
) -> SixelResult<usize> {
  if reqcolor < 1 || depth == 0 || depth > 4 {
    return Err(SixelError::BadArgument);
  }
  let pixel_count = width * height;
  if result.len() < pixel_count || data.len() < pixel_count * depth {
    return Err(SixelError::BadInput);
  }
  if palette.len() < reqcolor * depth {
    return Err(SixelError::BadInput);
  }
  let complexion = config.complexion.max(1);

  let use_mask =
    matches!(config.diffusion, DiffusionMethod::ADither | DiffusionMethod::XDither);
  let kernel = if depth != 3 { &[][..] } else { kernel_for(config.diffusion) };
  let lookup = Lookup::choose(palette, depth, reqcolor, config.optimize);
  let serpentine = config.scan == ScanMethod::Serpentine;

  let mut scratch_cache;
  let cache = match cache {
    Some(table) => table,
    None => {
      scratch_cache = vec![0u16; 1 << 15];
      &mut scratch_cache[..]
    }
  };

  let mut migration =
    if config.optimize_palette { Some(Migration::new(depth)) } else { None };
  let mut masked = [0u8; 4];

  for y in 0..height {
    let (start, end, step) = scanline_params(serpentine, y, width);
    let direction = step;
    let mut xi = start;
    while xi != end {
      let x = xi as usize;
      let pos = y * width + x;
      let color_index = if use_mask {
        for (d, slot) in masked[..depth].iter_mut().enumerate() {
          let mask = match config.diffusion {
            DiffusionMethod::ADither => mask_a(x as i32, y as i32, d as i32),
            _ => mask_x(x as i32, y as i32, d as i32),
          };
          let value = i32::from(data[pos * depth + d]) + (mask * 32.0) as i32;
          *slot = value.clamp(0, 255) as u8;
        }
        lookup.run(&masked[..depth], depth, palette, reqcolor, cache, complexion)
      } else {
        let pixel = &data[pos * depth..pos * depth + depth];
        lookup.run(pixel, depth, palette, reqcolor, cache, complexion)
      };

      result[pos] = match migration.as_mut() {
        Some(migration) => migration.translate(color_index, palette, depth),
        None => color_index as u8,
      };

      if !use_mask && !kernel.is_empty() {
        for n in 0..depth {
          let error = i32::from(data[pos * depth + n])
            - i32::from(palette[color_index * depth + n]);
          diffuse_error(data, width, height, x, y, depth, n, error, kernel, direction);
        }
      }
      xi += step;
    }
  }

  Ok(match migration {
    Some(migration) => {
      let ncolors = migration.ncolors;
      palette.clear();
      palette.extend_from_slice(&migration.new_palette[..ncolors * depth]);
      debug!("dither: palette optimized down to {ncolors} colors");
      ncolors
    }
    None => reqcolor,
  })
}
