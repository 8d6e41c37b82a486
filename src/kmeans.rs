#![forbid(unsafe_code)]

//! The k-means++ palette quantizer.
//!
//! The pipeline runs in stages:
//!
//! ```txt
//! [sample collection] -> [k-means++ seeding] -> [Lloyd iteration]
//!                     -> [optional final merge] -> [palette export]
//! ```
//!
//! Sampling is a reservoir over the opaque pixels, capped at 50 000, so
//! arbitrarily large frames quantize in bounded memory. Seeding picks the
//! first center uniformly and the rest proportionally to squared distance
//! from the nearest existing center. Lloyd iterations keep exact
//! empty-cluster accounting: a starved cluster steals the sample farthest
//! from its own center, and the stolen sample's contribution moves between
//! the cluster sums without ever driving a weight negative.
//!
//! Randomness comes from a fixed-seed xorshift so palette output is
//! reproducible run to run.

use bytemuck::pod_read_unaligned;
use log::debug;

use crate::{
  abort,
  env::palette_env,
  histogram::ColorFreq,
  merge,
  palette::{quant_depth, Palette},
  AbortToken, PixelFormat, QualityMode, SixelError, SixelResult,
};

/// Reservoir capacity for pixel sampling.
const SAMPLE_LIMIT: usize = 50_000;

/// Small deterministic PRNG (xorshift64*), fixed-seeded so quantization is
/// reproducible.
struct XorShift64Star(u64);

impl XorShift64Star {
  fn new() -> Self {
    Self(0x9e37_79b9_7f4a_7c15)
  }

  #[inline]
  fn next_u64(&mut self) -> u64 {
    let mut x = self.0;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    self.0 = x;
    x.wrapping_mul(0x2545_f491_4f6c_dd1d)
  }

  #[inline]
  fn below(&mut self, bound: usize) -> usize {
    (self.next_u64() % bound as u64) as usize
  }

  #[inline]
  fn unit_f64(&mut self) -> f64 {
    (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
  }
}

/// Clamps a float32 channel in 0.0-1.0 and scales it to the 0-255 domain.
#[inline]
fn float_channel_to_u8_scale(value: f64) -> f64 {
  if !value.is_finite() || value <= 0.0 {
    0.0
  } else if value >= 1.0 {
    255.0
  } else {
    value * 255.0
  }
}

#[inline]
fn float_alpha_visible(alpha: f64) -> bool {
  alpha.is_finite() && alpha > 0.0
}

/// One opaque pixel as three solver-domain channels.
struct SampleSource<'d> {
  data: &'d [u8],
  channels: usize,
  pixel_stride: usize,
  is_float: bool,
}

impl<'d> SampleSource<'d> {
  fn pixel_count(&self) -> usize {
    self.data.len() / self.pixel_stride
  }

  /// Reads pixel `index`, `None` when it is fully transparent.
  fn read(&self, index: usize) -> Option<[f64; 3]> {
    let base = index * self.pixel_stride;
    if self.is_float {
      let channel = |n: usize| {
        f64::from(pod_read_unaligned::<f32>(&self.data[base + n * 4..base + n * 4 + 4]))
      };
      if self.channels == 4 && !float_alpha_visible(channel(3)) {
        return None;
      }
      Some([channel(0), channel(1), channel(2)])
    } else {
      if self.channels == 4 && self.data[base + 3] == 0 {
        return None;
      }
      Some([
        f64::from(self.data[base]),
        f64::from(self.data[base + 1]),
        f64::from(self.data[base + 2]),
      ])
    }
  }

  /// The pixel as packed 8-bit RGB, for the unique-color probe.
  fn read_packed_rgb(&self, index: usize) -> Option<u32> {
    let [r, g, b] = self.read(index)?;
    let (r, g, b) = if self.is_float {
      (
        (float_channel_to_u8_scale(r) + 0.5) as u32,
        (float_channel_to_u8_scale(g) + 0.5) as u32,
        (float_channel_to_u8_scale(b) + 0.5) as u32,
      )
    } else {
      (r as u32, g as u32, b as u32)
    };
    Some((r << 16) | (g << 8) | b)
  }
}

/// Counts unique opaque colors, stopping once `limit` is exceeded.
///
/// Returns `(unique_count, within_limit)`; the count saturates at
/// `limit + 1` so the caller only learns whether the merge stage can be
/// skipped, not the full tally.
fn count_unique_within_limit(source: &SampleSource<'_>, limit: usize) -> (usize, bool) {
  let mut seen = std::collections::HashSet::new();
  for index in 0..source.pixel_count() {
    let Some(packed) = source.read_packed_rgb(index) else { continue };
    seen.insert(packed);
    if seen.len() > limit {
      return (seen.len(), false);
    }
  }
  (seen.len(), true)
}

#[inline]
fn distance_sq(a: &[f64], b: &[f64]) -> f64 {
  let mut distance = 0.0;
  for (x, y) in a.iter().zip(b.iter()) {
    let diff = x - y;
    distance += diff * diff;
  }
  distance
}

/// One Lloyd pass: assignment, empty-cluster repair, center update.
///
/// Returns the total squared movement of the centers.
#[allow(clippy::too_many_arguments)]
fn lloyd_pass(
  samples: &[f64], sample_count: usize, k: usize, centers: &mut [f64],
  counts: &mut [u64], accum: &mut [f64], membership: &mut [usize],
  distance_cache: &mut [f64],
) -> f64 {
  counts[..k].fill(0);
  accum[..k * 3].fill(0.0);
  for sample_index in 0..sample_count {
    let sample = &samples[sample_index * 3..sample_index * 3 + 3];
    let mut best_index = 0;
    let mut best_distance = distance_sq(sample, &centers[0..3]);
    for center_index in 1..k {
      let distance =
        distance_sq(sample, &centers[center_index * 3..center_index * 3 + 3]);
      // Equal distances resolve to the most recently seeded center.
      if distance <= best_distance {
        best_distance = distance;
        best_index = center_index;
      }
    }
    membership[sample_index] = best_index;
    distance_cache[sample_index] = best_distance;
    counts[best_index] += 1;
    for channel in 0..3 {
      accum[best_index * 3 + channel] += sample[channel];
    }
  }
  // Starved clusters steal the globally worst-fitting sample. The stolen
  // sample's contribution is removed from its old cluster exactly, clamped
  // at zero, so no weight can underflow.
  for center_index in 0..k {
    if counts[center_index] != 0 {
      continue;
    }
    let mut farthest_distance = -1.0f64;
    let mut farthest_index = 0usize;
    for sample_index in 0..sample_count {
      if distance_cache[sample_index] > farthest_distance {
        farthest_distance = distance_cache[sample_index];
        farthest_index = sample_index;
      }
    }
    let old_cluster = membership[farthest_index];
    let farthest = &samples[farthest_index * 3..farthest_index * 3 + 3];
    if counts[old_cluster] > 0 {
      counts[old_cluster] -= 1;
      for channel in 0..3 {
        let slot = &mut accum[old_cluster * 3 + channel];
        *slot -= farthest[channel];
        if *slot < 0.0 {
          *slot = 0.0;
        }
      }
    }
    membership[farthest_index] = center_index;
    counts[center_index] = 1;
    for channel in 0..3 {
      accum[center_index * 3 + channel] = farthest[channel];
    }
    distance_cache[farthest_index] = 0.0;
  }
  let mut delta = 0.0;
  for center_index in 0..k {
    if counts[center_index] == 0 {
      continue;
    }
    for channel in 0..3 {
      let update =
        accum[center_index * 3 + channel] / counts[center_index] as f64;
      let diff = centers[center_index * 3 + channel] - update;
      delta += diff * diff;
      centers[center_index * 3 + channel] = update;
    }
  }
  delta
}

fn max_iterations_for(quality: QualityMode) -> u32 {
  match quality {
    QualityMode::Low => 6,
    QualityMode::High | QualityMode::HighColor => 24,
    QualityMode::Full => 48,
    QualityMode::Auto => 12,
  }
}

/// Builds a palette with k-means++ and writes the result into `palette`.
///
/// Returns the colormap entries (weight plus RGB tuple). An input with no
/// opaque pixels succeeds with an empty colormap and zero
/// `original_colors`.
pub(crate) fn build_palette_kmeans(
  palette: &mut Palette, data: &[u8], format: PixelFormat, token: Option<&AbortToken>,
) -> SixelResult<Vec<ColorFreq>> {
  let is_float = format == PixelFormat::RGBFLOAT32;
  let channels = if is_float {
    3
  } else {
    let depth = quant_depth(format)?;
    if depth != 3 && depth != 4 {
      return Err(SixelError::BadArgument);
    }
    depth
  };
  let pixel_stride = if is_float { channels * 4 } else { channels };
  let source = SampleSource { data, channels, pixel_stride, is_float };
  let pixel_count = source.pixel_count();
  palette.original_colors = 0;
  palette.entries_float32 = None;
  if pixel_count == 0 {
    return Ok(Vec::new());
  }

  let mut rng = XorShift64Star::new();
  let sample_cap = SAMPLE_LIMIT.min(pixel_count);
  let mut samples: Vec<f64> = Vec::new();
  samples.try_reserve_exact(sample_cap * 3)?;
  let mut valid_seen = 0usize;
  for index in 0..pixel_count {
    let Some(pixel) = source.read(index) else { continue };
    valid_seen += 1;
    if samples.len() < sample_cap * 3 {
      samples.extend_from_slice(&pixel);
    } else {
      let replace = rng.below(valid_seen);
      if replace < sample_cap {
        samples[replace * 3..replace * 3 + 3].copy_from_slice(&pixel);
      }
    }
  }
  palette.original_colors = valid_seen;
  let sample_count = samples.len() / 3;
  if sample_count == 0 {
    return Ok(Vec::new());
  }

  let reqcolors = palette.requested_colors.max(1);
  let resolved_merge = palette.final_merge_mode.resolve();
  let mut apply_merge = resolved_merge.is_active();
  if apply_merge {
    // When the image already fits in the requested palette the merge stage
    // would only smear exact colors together; probe and skip it.
    let (unique, within_limit) = count_unique_within_limit(&source, reqcolors);
    if within_limit {
      debug!("kmeans: {unique} unique colors fit the request, merge skipped");
      apply_merge = false;
    }
  }
  let mut overshoot = reqcolors;
  let mut refine_iterations = 0u32;
  if apply_merge {
    refine_iterations = merge::lloyd_iterations(resolved_merge);
    overshoot = merge::merge_target(reqcolors as u32, resolved_merge) as usize;
    debug!("kmeans: oversplitting to {overshoot} centers");
  }
  overshoot = overshoot.min(sample_count);
  let mut k = overshoot;
  if k == 0 {
    return Ok(Vec::new());
  }

  let mut centers = vec![0.0f64; k * 3];
  let mut distance_cache = vec![0.0f64; sample_count];
  let mut counts = vec![0u64; k];
  let mut accum = vec![0.0f64; k * 3];
  let mut membership = vec![0usize; sample_count];

  // k-means++ seeding: first center uniform, the rest weighted by squared
  // distance to the nearest chosen center.
  let first = rng.below(sample_count);
  centers[0..3].copy_from_slice(&samples[first * 3..first * 3 + 3]);
  for sample_index in 0..sample_count {
    distance_cache[sample_index] =
      distance_sq(&samples[sample_index * 3..sample_index * 3 + 3], &centers[0..3]);
  }
  for center_index in 1..k {
    abort::poll(token)?;
    let total_weight: f64 = distance_cache.iter().sum();
    let mut random_point =
      if total_weight > 0.0 { rng.unit_f64() * total_weight } else { 0.0 };
    let mut sample_index = 0usize;
    while sample_index + 1 < sample_count && random_point > distance_cache[sample_index]
    {
      random_point -= distance_cache[sample_index];
      sample_index += 1;
    }
    let chosen = samples[sample_index * 3..sample_index * 3 + 3].to_vec();
    centers[center_index * 3..center_index * 3 + 3].copy_from_slice(&chosen);
    for index in 0..sample_count {
      let distance = distance_sq(&samples[index * 3..index * 3 + 3], &chosen);
      if distance < distance_cache[index] {
        distance_cache[index] = distance;
      }
    }
  }

  let env = palette_env();
  let max_iterations =
    max_iterations_for(palette.quality_mode).clamp(1, env.kmeans_iter_max);
  let mut lloyd_threshold = env.kmeans_threshold;
  if is_float {
    // The threshold is in 0-255 squared units; float samples live in 0-1,
    // so the scale conversion must follow.
    lloyd_threshold /= 255.0 * 255.0;
  }
  for _ in 0..max_iterations {
    abort::poll(token)?;
    let delta = lloyd_pass(
      &samples,
      sample_count,
      k,
      &mut centers,
      &mut counts,
      &mut accum,
      &mut membership,
      &mut distance_cache,
    );
    if delta <= lloyd_threshold {
      break;
    }
  }

  if apply_merge && k > reqcolors {
    // The merge stage works in the 0-255 integer domain, so float channel
    // sums scale up on the way in and back down on the way out.
    let float_scale = 255.0f64;
    let mut merge_weights = counts.clone();
    let mut merge_sums = vec![0u64; k * 3];
    for index in 0..k * 3 {
      let mut component = accum[index];
      if is_float {
        component *= float_scale;
      }
      merge_sums[index] = component.max(0.0) as u64;
    }
    let cluster_total = merge::apply_merge(
      &mut merge_weights,
      &mut merge_sums,
      3,
      k,
      reqcolors as u32,
      resolved_merge,
      palette.use_reversible,
    )
    .clamp(1, reqcolors);
    k = cluster_total;
    counts[..k].copy_from_slice(&merge_weights[..k]);
    for index in 0..k * 3 {
      let mut restored = merge_sums[index] as f64;
      if is_float {
        restored /= float_scale;
      }
      accum[index] = restored;
    }
    for center_index in 0..k {
      if counts[center_index] == 0 {
        counts[center_index] = 1;
      }
      for channel in 0..3 {
        centers[center_index * 3 + channel] =
          accum[center_index * 3 + channel] / counts[center_index] as f64;
      }
    }
    for _ in 0..refine_iterations {
      abort::poll(token)?;
      let delta = lloyd_pass(
        &samples,
        sample_count,
        k,
        &mut centers,
        &mut counts,
        &mut accum,
        &mut membership,
        &mut distance_cache,
      );
      if delta <= lloyd_threshold {
        break;
      }
    }
  }

  let mut colormap: Vec<ColorFreq> = Vec::with_capacity(k);
  let mut float_entries: Vec<f32> = Vec::new();
  for center_index in 0..k {
    let mut tuple = [0u8; 4];
    for channel in 0..3 {
      let mut update = centers[center_index * 3 + channel];
      if is_float {
        float_entries.push(update.clamp(0.0, 1.0) as f32);
        update = float_channel_to_u8_scale(update);
      }
      tuple[channel] = (update.clamp(0.0, 255.0) + 0.5) as u8;
    }
    let weight = counts[center_index].min(u64::from(u32::MAX)) as u32;
    colormap.push(ColorFreq { count: weight, tuple });
  }

  if palette.force_palette && colormap.len() < reqcolors {
    // Pad by cycling over the surviving entries, most-populated first.
    let mut order: Vec<usize> = (0..colormap.len()).collect();
    order.sort_by(|&a, &b| colormap[b].count.cmp(&colormap[a].count).then(a.cmp(&b)));
    let mut source_index = 0usize;
    while colormap.len() < reqcolors {
      let chosen = order[source_index % order.len()];
      let repeat = colormap[chosen];
      if is_float {
        let base = chosen * 3;
        let copied = [float_entries[base], float_entries[base + 1], float_entries[base + 2]];
        float_entries.extend_from_slice(&copied);
      }
      colormap.push(repeat);
      source_index += 1;
    }
  }
  if is_float {
    palette.entries_float32 = Some(float_entries);
  }
  Ok(colormap)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rng_is_deterministic() {
    let mut a = XorShift64Star::new();
    let mut b = XorShift64Star::new();
    for _ in 0..16 {
      assert_eq!(a.next_u64(), b.next_u64());
    }
    let unit = a.unit_f64();
    assert!((0.0..1.0).contains(&unit));
  }

  #[test]
  fn unique_probe_stops_at_the_limit() {
    let mut data = Vec::new();
    for i in 0u8..32 {
      data.extend_from_slice(&[i, 0, 0]);
    }
    let source = SampleSource { data: &data, channels: 3, pixel_stride: 3, is_float: false };
    let (_, within) = count_unique_within_limit(&source, 8);
    assert!(!within);
    let (unique, within) = count_unique_within_limit(&source, 64);
    assert!(within);
    assert_eq!(unique, 32);
  }

  #[test]
  fn transparent_pixels_are_invisible_to_sampling() {
    let data = [
      10u8, 20, 30, 0, // fully transparent
      40, 50, 60, 255,
    ];
    let source = SampleSource { data: &data, channels: 4, pixel_stride: 4, is_float: false };
    assert!(source.read(0).is_none());
    assert_eq!(source.read(1), Some([40.0, 50.0, 60.0]));
  }

  #[test]
  fn lloyd_pass_repairs_empty_clusters() {
    // Two identical samples and k = 2: one cluster starves and must steal.
    let samples = [0.0f64, 0.0, 0.0, 100.0, 100.0, 100.0];
    let mut centers = vec![0.0f64, 0.0, 0.0, 500.0, 500.0, 500.0];
    let mut counts = vec![0u64; 2];
    let mut accum = vec![0.0f64; 6];
    let mut membership = vec![0usize; 2];
    let mut cache = vec![0.0f64; 2];
    lloyd_pass(
      &samples,
      2,
      2,
      &mut centers,
      &mut counts,
      &mut accum,
      &mut membership,
      &mut cache,
    );
    assert_eq!(counts, vec![1, 1]);
  }
}
