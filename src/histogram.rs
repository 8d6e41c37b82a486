#![forbid(unsafe_code)]

//! Color histogram construction shared by both palette solvers.
//!
//! Pixels are quantized into buckets under a [`HistogramControl`] packing
//! policy, counted in a dense table, then exported as a sparse list of
//! [`ColorFreq`] entries with reconstructed representative tuples. The flow
//! is:
//!
//! 1. choose a sampling density from the quality mode,
//! 2. quantize each sampled pixel into the dense histogram space,
//! 3. build the sparse reference list and reconstruct representatives.

use log::debug;

use crate::{abort, reversible, AbortToken, QualityMode, SixelError, SixelResult};

/// Bucket-width policy for the histogram and the lookup cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LutPolicy {
  /// 5-bit coarse buckets, widened further for four-channel input.
  #[default]
  Auto,
  /// Force 5 bits per channel.
  FiveBit,
  /// 6 bits per channel for shallow depths.
  SixBit,
  /// The fixed policy used when an exact cache layout must be stable.
  CertLut,
  /// No bucketing at all: every distinct color is its own bucket.
  None,
}

/// How channel values quantize into histogram buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramControl {
  /// Bits dropped from each 8-bit channel.
  pub channel_shift: u32,
  /// Bits kept per channel (`8 - channel_shift`).
  pub channel_bits: u32,
  /// `(1 << channel_bits) - 1`.
  pub channel_mask: u32,
  /// Round with a full bucket instead of a half bucket, which keeps
  /// reversible-snapped inputs in stable buckets.
  pub reversible_rounding: bool,
}

impl HistogramControl {
  /// Resolves the packing policy for a given channel count.
  #[must_use]
  pub fn for_policy(depth: usize, policy: LutPolicy) -> Self {
    let mut shift = if depth > 3 { 3 } else { 2 };
    match policy {
      LutPolicy::FiveBit => shift = 3,
      LutPolicy::SixBit => shift = if depth > 3 { 3 } else { 2 },
      LutPolicy::None => shift = 0,
      LutPolicy::CertLut => shift = 2,
      LutPolicy::Auto => (),
    }
    let bits = 8 - shift;
    Self {
      channel_shift: shift,
      channel_bits: bits,
      channel_mask: (1 << bits) - 1,
      reversible_rounding: false,
    }
  }

  /// Quantizes one 8-bit channel sample into its bucket.
  #[inline]
  #[must_use]
  pub fn quantize(&self, sample: u8) -> u32 {
    if self.channel_shift == 0 {
      return u32::from(sample);
    }
    let rounding = if self.reversible_rounding {
      1 << self.channel_shift
    } else {
      1 << (self.channel_shift - 1)
    };
    ((u32::from(sample) + rounding) >> self.channel_shift).min(self.channel_mask)
  }

  /// Reconstructs the representative 8-bit value of a bucket.
  ///
  /// Mirrors Netpbm's midpoint rounding: the top bucket maps to 255 so
  /// white stays white, every other bucket reports its center.
  #[inline]
  #[must_use]
  pub fn reconstruct(&self, quantized: u32) -> u8 {
    let mut value = quantized << self.channel_shift;
    if quantized == self.channel_mask {
      value = 255;
    } else if self.channel_shift > 0 {
      value |= 1 << (self.channel_shift - 1);
    }
    value.min(255) as u8
  }

  /// Packs one pixel into a dense histogram index.
  ///
  /// Channels are processed in reverse order: the last input channel lands
  /// in the least significant bits.
  #[inline]
  #[must_use]
  pub fn pack(&self, pixel: &[u8], depth: usize) -> u32 {
    let mut packed = 0u32;
    for n in 0..depth {
      let sample = pixel[depth - 1 - n];
      let quantized = if self.channel_shift == 0 {
        u32::from(sample)
      } else {
        self.quantize(sample)
      };
      packed |= quantized << (n as u32 * self.channel_bits);
    }
    packed
  }

  /// Number of dense-table slots this control implies.
  #[must_use]
  pub fn dense_size(&self, depth: usize) -> usize {
    let exponent = depth as u32 * self.channel_bits;
    let mut size = 1usize;
    for _ in 0..exponent {
      if size > usize::MAX / 2 {
        return usize::MAX;
      }
      size <<= 1;
    }
    size
  }
}

/// One unique quantized color and how many sampled pixels hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorFreq {
  /// Sampled pixel count, saturating.
  pub count: u32,
  /// Reconstructed representative, one entry per channel.
  pub tuple: [u8; 4],
}

/// A sparse histogram plus the channel count its tuples use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
  /// Unique colors in first-seen order.
  pub entries: Vec<ColorFreq>,
  /// Channels per tuple (1, 3, or 4).
  pub depth: usize,
}

impl Histogram {
  /// Total sampled pixel weight.
  #[must_use]
  pub fn total_weight(&self) -> u64 {
    self.entries.iter().map(|e| u64::from(e.count)).sum()
  }
}

/// Samples per channel by quality mode.
fn max_sample_for(quality: QualityMode) -> usize {
  match quality {
    QualityMode::Low => 18_383,
    QualityMode::High => 1_118_383,
    QualityMode::Full | QualityMode::HighColor | QualityMode::Auto => 4_003_079,
  }
}

/// How often the sampling loop polls the abort token.
const ABORT_STRIDE: usize = 4096;

/// Builds the sparse histogram of `data`.
///
/// `data` holds `depth` bytes per pixel. When `use_reversible` is set,
/// sampled pixels snap to the reversible grid before bucketing and the
/// reconstructed representatives snap after, so the palette solvers only
/// ever see grid members.
///
/// ## Failure
/// * `BadArgument` when `depth` is zero or above four channels.
/// * `BadAllocation` when the dense table cannot be reserved.
/// * `Interrupted` when the abort token fires.
pub fn build_histogram(
  data: &[u8], depth: usize, quality: QualityMode, use_reversible: bool,
  policy: LutPolicy, token: Option<&AbortToken>,
) -> SixelResult<Histogram> {
  if depth == 0 || depth > 4 {
    return Err(SixelError::BadArgument);
  }
  let length = data.len();
  let max_sample = max_sample_for(quality);
  let mut step = length / depth / max_sample * depth;
  if step == 0 {
    step = depth;
  }

  debug!("histogram: sampling every {step} bytes of {length}");

  let mut control = HistogramControl::for_policy(depth, policy);
  control.reversible_rounding = use_reversible;
  let dense_size = control.dense_size(depth);
  let mut dense: Vec<u32> = Vec::new();
  dense.try_reserve_exact(dense_size)?;
  dense.resize(dense_size, 0);
  let mut seen_order: Vec<u32> = Vec::new();

  let mut reversible_pixel = [0u8; 4];
  let mut index = 0usize;
  let mut since_poll = 0usize;
  while index + depth <= length {
    if since_poll >= ABORT_STRIDE {
      abort::poll(token)?;
      since_poll = 0;
    }
    since_poll += 1;
    let pixel = &data[index..index + depth];
    let bucket = if use_reversible {
      for (slot, &sample) in reversible_pixel.iter_mut().zip(pixel.iter()) {
        *slot = reversible::reversible_value(sample);
      }
      control.pack(&reversible_pixel[..depth], depth)
    } else {
      control.pack(pixel, depth)
    } as usize;
    if dense[bucket] == 0 {
      seen_order.push(bucket as u32);
    }
    dense[bucket] = dense[bucket].saturating_add(1);
    index += step;
  }

  let mut entries = Vec::new();
  entries.try_reserve_exact(seen_order.len())?;
  for &bucket in seen_order.iter() {
    let count = dense[bucket as usize];
    if count == 0 {
      continue;
    }
    let mut tuple = [0u8; 4];
    for n in 0..depth {
      let component =
        (bucket >> (n as u32 * control.channel_bits)) & control.channel_mask;
      let mut reconstructed = control.reconstruct(component);
      if use_reversible {
        reconstructed = reversible::reversible_value(reconstructed);
      }
      tuple[depth - 1 - n] = reconstructed;
    }
    entries.push(ColorFreq { count, tuple });
  }

  debug!("histogram: {} colors found", entries.len());
  Ok(Histogram { entries, depth })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn packing_is_injective_on_distinct_quantized_colors() {
    let control = HistogramControl::for_policy(3, LutPolicy::FiveBit);
    let mut seen = std::collections::HashSet::new();
    for r in (0..256).step_by(8) {
      for g in (0..256).step_by(8) {
        for b in (0..256).step_by(8) {
          let q = [
            control.quantize(r as u8),
            control.quantize(g as u8),
            control.quantize(b as u8),
          ];
          let packed = control.pack(&[r as u8, g as u8, b as u8], 3);
          if !seen.insert(packed) {
            // A collision is only allowed when the quantized triple is
            // identical, which a fresh pack of the reconstruction proves.
            let back = [
              control.reconstruct(q[0]),
              control.reconstruct(q[1]),
              control.reconstruct(q[2]),
            ];
            assert_eq!(control.pack(&back, 3), packed);
          }
        }
      }
    }
  }

  #[test]
  fn reconstruct_maps_top_bucket_to_white() {
    let control = HistogramControl::for_policy(3, LutPolicy::FiveBit);
    assert_eq!(control.reconstruct(control.channel_mask), 255);
    assert_eq!(control.quantize(255), control.channel_mask);
  }

  #[test]
  fn exact_policy_keeps_every_color() {
    // The last input channel lands in the least significant bits.
    let control = HistogramControl::for_policy(3, LutPolicy::None);
    assert_eq!(control.channel_shift, 0);
    assert_eq!(control.pack(&[1, 2, 3], 3), (1 << 16) | (2 << 8) | 3);
  }

  #[test]
  fn histogram_counts_unique_colors() {
    let data = [
      255u8, 0, 0, //
      255, 0, 0, //
      0, 255, 0, //
      0, 0, 255,
    ];
    let hist =
      build_histogram(&data, 3, QualityMode::Full, false, LutPolicy::Auto, None)
        .unwrap();
    assert_eq!(hist.entries.len(), 3);
    assert_eq!(hist.total_weight(), 4);
    let red = hist.entries.iter().find(|e| e.tuple[0] > 200).unwrap();
    assert_eq!(red.count, 2);
  }

  #[test]
  fn zero_depth_is_bad_argument() {
    let r = build_histogram(&[], 0, QualityMode::Auto, false, LutPolicy::Auto, None);
    assert_eq!(r, Err(SixelError::BadArgument));
  }

  #[test]
  fn abort_token_interrupts_sampling() {
    let token = AbortToken::new();
    token.abort();
    let data = vec![0u8; 3 * ABORT_STRIDE * 2];
    let r = build_histogram(
      &data,
      3,
      QualityMode::Low,
      false,
      LutPolicy::Auto,
      Some(&token),
    );
    assert_eq!(r, Err(SixelError::Interrupted));
  }
}
