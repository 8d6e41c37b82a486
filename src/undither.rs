#![forbid(unsafe_code)]

//! Post-decode reconstruction: smoothing a quantized image back toward the
//! natural image it was dithered from.
//!
//! A decoded SIXEL frame is indexed pixels over a small palette, full of
//! high-frequency dither noise. `k_undither` blends each pixel with its
//! eight neighbors, but only the neighbors whose palette entries are
//! *similar enough* to the center according to a score table built over the
//! palette, so real edges survive while dither speckle averages away. An
//! optional Prewitt edge gate raises the center weight (or disables
//! blending entirely) where the gradient says there is genuine detail.
//!
//! The `k_undither+` variant runs the best-effort [`refine`](crate::refine)
//! stage afterwards.

use log::debug;

use crate::{refine, SixelError, SixelResult};

/// Reconstruction method selection for decoded frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DequantizeMethod {
  /// Plain palette expansion, no smoothing.
  #[default]
  None,
  /// Similarity-guided neighbor blending.
  KUndither,
  /// Neighbor blending plus the YCbCr refine pass.
  KUnditherPlus,
}

/// Neighbor taps: column offset, row offset, and weight over 16.
const NEIGHBOR_OFFSETS: [(i32, i32, u32); 8] = [
  (-1, -1, 10),
  (0, -1, 16),
  (1, -1, 6),
  (-1, 0, 11),
  (1, 0, 11),
  (-1, 1, 6),
  (0, 1, 16),
  (1, 1, 10),
];

/// Palette-pair similarity scores with a triangular cache.
///
/// The score in `{0, 2, 4, 5, 7, 8}` measures how safely two palette
/// entries may blend: it compares the distance from their midpoint back to
/// the entries against the distance to the nearest *other* palette entry,
/// scaled by the caller's bias (percent). Zero forbids blending.
struct Similarity<'p> {
  palette: &'p [u8],
  ncolors: usize,
  cache: Vec<i8>,
  bias: i32,
}

#[inline]
fn color_diff(a: &[u8], b: &[u8]) -> u32 {
  let dr = i32::from(a[0]) - i32::from(b[0]);
  let dg = i32::from(a[1]) - i32::from(b[1]);
  let db = i32::from(a[2]) - i32::from(b[2]);
  (dr * dr + dg * dg + db * db) as u32
}

impl<'p> Similarity<'p> {
  fn new(palette: &'p [u8], ncolors: usize, bias: i32) -> SixelResult<Self> {
    let mut cache = Vec::new();
    cache.try_reserve_exact(ncolors * ncolors)?;
    cache.resize(ncolors * ncolors, -1);
    for i in 0..ncolors {
      cache[i * ncolors + i] = 7;
    }
    Ok(Self { palette, ncolors, cache, bias: bias.max(1) })
  }

  fn compare(&mut self, index1: usize, index2: usize) -> u32 {
    if index1 >= self.ncolors || index2 >= self.ncolors {
      return 0;
    }
    let (min_index, max_index) =
      if index1 <= index2 { (index1, index2) } else { (index2, index1) };
    let cache_pos = min_index * self.ncolors + max_index;
    let cached = self.cache[cache_pos];
    if cached >= 0 {
      return cached as u32;
    }

    let p1 = &self.palette[index1 * 3..index1 * 3 + 3];
    let p2 = &self.palette[index2 * 3..index2 * 3 + 3];
    let avg_color = [
      ((u16::from(p1[0]) + u16::from(p2[0])) >> 1) as u8,
      ((u16::from(p1[1]) + u16::from(p2[1])) >> 1) as u8,
      ((u16::from(p1[2]) + u16::from(p2[2])) >> 1) as u8,
    ];

    let distance = color_diff(&avg_color, p1);
    let scaled = u64::from(distance) * self.bias as u64 + 50;
    let base_distance = ((scaled / 100) as u32).max(1);

    let mut min_diff = u32::MAX;
    for i in 0..self.ncolors {
      if i == index1 || i == index2 {
        continue;
      }
      let diff = color_diff(&avg_color, &self.palette[i * 3..i * 3 + 3]);
      if diff < min_diff {
        min_diff = diff;
      }
    }
    if min_diff == u32::MAX {
      min_diff = base_distance * 2;
    }

    let min_diff = u64::from(min_diff);
    let base = u64::from(base_distance);
    let result: u32 = if min_diff >= base * 2 {
      5
    } else if min_diff >= base {
      8
    } else if min_diff * 6 >= base * 5 {
      7
    } else if min_diff * 4 >= base * 3 {
      7
    } else if min_diff * 3 >= base * 2 {
      5
    } else if min_diff * 5 >= base * 3 {
      7
    } else if min_diff * 2 >= base {
      4
    } else if min_diff * 3 >= base {
      2
    } else {
      0
    };
    self.cache[cache_pos] = result as i8;
    result
  }
}

#[inline]
fn clamped_gray(gray: &[i32], width: usize, height: usize, x: i32, y: i32) -> i32 {
  let cx = x.clamp(0, width as i32 - 1) as usize;
  let cy = y.clamp(0, height as i32 - 1) as usize;
  gray[cy * width + cx]
}

/// Prewitt gradient magnitude at `(x, y)`, scaled down by 256 and
/// saturated to `u16`.
fn prewitt_value(gray: &[i32], width: usize, height: usize, x: i32, y: i32) -> u16 {
  let top_prev = i64::from(clamped_gray(gray, width, height, x - 1, y - 1));
  let top_curr = i64::from(clamped_gray(gray, width, height, x, y - 1));
  let top_next = i64::from(clamped_gray(gray, width, height, x + 1, y - 1));
  let mid_prev = i64::from(clamped_gray(gray, width, height, x - 1, y));
  let mid_next = i64::from(clamped_gray(gray, width, height, x + 1, y));
  let bot_prev = i64::from(clamped_gray(gray, width, height, x - 1, y + 1));
  let bot_curr = i64::from(clamped_gray(gray, width, height, x, y + 1));
  let bot_next = i64::from(clamped_gray(gray, width, height, x + 1, y + 1));
  let gx = top_next - top_prev + mid_next - mid_prev + bot_next - bot_prev;
  let gy = bot_prev + bot_curr + bot_next - top_prev - top_curr - top_next;
  let magnitude = ((gx * gx + gy * gy) as u64) / 256;
  magnitude.min(65_535) as u16
}

/// Scales a threshold by the edge-strength percentage; stronger settings
/// shrink the thresholds so more pixels count as edges.
fn scale_threshold(base: u16, percent: i32) -> u16 {
  let percent = percent.max(1) as u64;
  let numerator = u64::from(base) * 100 + percent / 2;
  let scaled = (numerator / percent).max(1);
  scaled.min(u64::from(u16::MAX)) as u16
}

/// Similarity-guided neighbor blending over a decoded indexed image.
///
/// Reconstructs `RGB888` from `indexed_pixels` + `palette`, then replaces
/// each pixel with the weighted mean of itself and the neighbors whose
/// palette similarity to it is nonzero. `similarity_bias` (percent) widens
/// or narrows what counts as similar; `edge_strength` above zero enables
/// the Prewitt gate. With `enable_refine` the YCbCr refine pass runs on the
/// result (best effort).
///
/// ## Failure
/// * `BadInput` for empty dimensions, an empty palette, or an index buffer
///   shorter than `width * height`.
/// * `BadAllocation` when scratch buffers cannot be reserved.
#[allow(clippy::too_many_arguments)]
pub fn k_undither(
  indexed_pixels: &[u8], width: usize, height: usize, palette: &[u8], ncolors: usize,
  similarity_bias: i32, edge_strength: i32, enable_refine: bool,
) -> SixelResult<Vec<u8>> {
  if width == 0 || height == 0 || ncolors == 0 || palette.len() < ncolors * 3 {
    return Err(SixelError::BadInput);
  }
  let num_pixels = width * height;
  if indexed_pixels.len() < num_pixels {
    return Err(SixelError::BadInput);
  }

  let strong_threshold = scale_threshold(256, edge_strength);
  let detail_threshold = scale_threshold(160, edge_strength);
  let strong_threshold = strong_threshold.max(detail_threshold);

  let mut rgb = Vec::new();
  rgb.try_reserve_exact(num_pixels * 3)?;
  rgb.resize(num_pixels * 3, 0);
  let mut gray = Vec::new();
  gray.try_reserve_exact(num_pixels)?;
  gray.resize(num_pixels, 0i32);

  let mut similarity = Similarity::new(palette, ncolors, similarity_bias)?;

  let palette_index_at = |pos: usize| {
    let index = usize::from(indexed_pixels[pos]);
    if index >= ncolors {
      0
    } else {
      index
    }
  };

  // First pass: reconstruct RGB and the R+2G+B luminance map.
  for pos in 0..num_pixels {
    let color = &palette[palette_index_at(pos) * 3..palette_index_at(pos) * 3 + 3];
    rgb[pos * 3..pos * 3 + 3].copy_from_slice(color);
    gray[pos] =
      i32::from(color[0]) + i32::from(color[1]) * 2 + i32::from(color[2]);
  }

  for y in 0..height {
    for x in 0..width {
      let pos = y * width + x;
      let palette_index = palette_index_at(pos);

      let center_weight = if edge_strength > 0 {
        let gradient = prewitt_value(&gray, width, height, x as i32, y as i32);
        if gradient > strong_threshold {
          // A pronounced edge: leave the pixel untouched.
          continue;
        }
        if gradient > detail_threshold {
          24
        } else {
          8
        }
      } else {
        8
      };

      let base = pos * 3;
      let mut accum_r = u32::from(rgb[base]) * center_weight;
      let mut accum_g = u32::from(rgb[base + 1]) * center_weight;
      let mut accum_b = u32::from(rgb[base + 2]) * center_weight;
      let mut total_weight = center_weight;

      for &(dx, dy, numerator) in NEIGHBOR_OFFSETS.iter() {
        let nx = x as i32 + dx;
        let ny = y as i32 + dy;
        if nx < 0 || nx >= width as i32 || ny < 0 || ny >= height as i32 {
          continue;
        }
        let neighbor_pos = ny as usize * width + nx as usize;
        let neighbor_index = usize::from(indexed_pixels[neighbor_pos]);
        if neighbor_index >= ncolors {
          continue;
        }
        debug_assert!(numerator > 0);
        let weight = similarity.compare(palette_index, neighbor_index);
        if weight == 0 {
          continue;
        }
        let neighbor_color = &palette[neighbor_index * 3..neighbor_index * 3 + 3];
        accum_r += u32::from(neighbor_color[0]) * weight;
        accum_g += u32::from(neighbor_color[1]) * weight;
        accum_b += u32::from(neighbor_color[2]) * weight;
        total_weight += weight;
      }

      if total_weight > 0 {
        rgb[base] = (accum_r / total_weight) as u8;
        rgb[base + 1] = (accum_g / total_weight) as u8;
        rgb[base + 2] = (accum_b / total_weight) as u8;
      }
    }
  }

  if enable_refine {
    refine::post_undither_refine(&mut rgb, width, height, None);
  }
  Ok(rgb)
}

/// Dispatches a decoded frame through the configured reconstruction.
///
/// [`DequantizeMethod::None`] expands indices straight through the palette;
/// the other methods call [`k_undither`] with and without the refine pass.
#[allow(clippy::too_many_arguments)]
pub fn dequantize(
  method: DequantizeMethod, indexed_pixels: &[u8], width: usize, height: usize,
  palette: &[u8], ncolors: usize, similarity_bias: i32, edge_strength: i32,
) -> SixelResult<Vec<u8>> {
  match method {
    DequantizeMethod::None => {
      if width == 0 || height == 0 || ncolors == 0 || palette.len() < ncolors * 3 {
        return Err(SixelError::BadInput);
      }
      let num_pixels = width * height;
      if indexed_pixels.len() < num_pixels {
        return Err(SixelError::BadInput);
      }
      let mut rgb = Vec::new();
      rgb.try_reserve_exact(num_pixels * 3)?;
      for &index in indexed_pixels.iter().take(num_pixels) {
        let index = if usize::from(index) >= ncolors { 0 } else { usize::from(index) };
        rgb.extend_from_slice(&palette[index * 3..index * 3 + 3]);
      }
      Ok(rgb)
    }
    DequantizeMethod::KUndither => {
      debug!("dequantize: k_undither over {width}x{height}");
      k_undither(
        indexed_pixels,
        width,
        height,
        palette,
        ncolors,
        similarity_bias,
        edge_strength,
        false,
      )
    }
    DequantizeMethod::KUnditherPlus => {
      debug!("dequantize: k_undither+ over {width}x{height}");
      k_undither(
        indexed_pixels,
        width,
        height,
        palette,
        ncolors,
        similarity_bias,
        edge_strength,
        true,
      )
    }
  }
}
