#![forbid(unsafe_code)]

//! The shared final-merge stage of the palette solvers.
//!
//! Both quantizers may *oversplit*: they produce more clusters than the
//! caller asked for (the oversplit factor comes from the environment
//! snapshot) and then reduce the set back down here, either by Ward
//! linkage or by a hierarchical weighted k-means. Keeping the reduction in
//! one module guarantees the median-cut and k-means pipelines observe
//! identical merge behavior.
//!
//! Cluster statistics travel as parallel `weights` / `sums` arrays (one
//! weight and `depth` channel sums per cluster), the exchange format both
//! solvers already maintain. [`apply_merge`] converts them to
//! [`FinalMergeCluster`]s, runs the reduction, and compacts the arrays in
//! place.

use log::debug;

use crate::{
  env::palette_env,
  histogram::Histogram,
  reversible::snap_channel,
};

/// How the oversplit cluster set is reduced back to the requested size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FinalMergeMode {
  /// Resolves to [`None`](FinalMergeMode::None); the single place that
  /// default may ever change is [`FinalMergeMode::resolve`].
  #[default]
  Auto,
  /// No oversplit, no reduction.
  None,
  /// Ward linkage: repeatedly merge the pair with the least within-cluster
  /// variance increase.
  Ward,
  /// Hierarchical weighted k-means seeded from the brightest clusters.
  HKMeans,
}

impl FinalMergeMode {
  /// Resolves `Auto` to the effective mode.
  ///
  /// Every consumer of the mode goes through this helper, so changing the
  /// `Auto` default is a one-line edit.
  #[inline]
  #[must_use]
  pub fn resolve(self) -> FinalMergeMode {
    match self {
      FinalMergeMode::Auto => FinalMergeMode::None,
      other => other,
    }
  }

  /// Does the resolved mode perform a reduction at all?
  #[inline]
  #[must_use]
  pub fn is_active(self) -> bool {
    matches!(self.resolve(), FinalMergeMode::Ward | FinalMergeMode::HKMeans)
  }
}

/// One cluster of the merge stage: a centroid plus its pixel weight.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FinalMergeCluster {
  /// Red centroid component, 0-255 scale.
  pub r: f64,
  /// Green centroid component.
  pub g: f64,
  /// Blue centroid component.
  pub b: f64,
  /// Pixel weight; zero marks a dead cluster.
  pub weight: f64,
}

impl FinalMergeCluster {
  #[inline]
  fn distance_sq(&self, other: &Self) -> f64 {
    let dr = self.r - other.r;
    let dg = self.g - other.g;
    let db = self.b - other.b;
    dr * dr + dg * dg + db * db
  }

  #[inline]
  fn clear(&mut self) {
    *self = Self::default();
  }
}

/// How many post-merge Lloyd passes to run for a resolved mode.
#[must_use]
pub fn lloyd_iterations(mode: FinalMergeMode) -> u32 {
  let env = palette_env();
  if let Some(overridden) = env.final_merge_additional_lloyd {
    return overridden;
  }
  match mode.resolve() {
    FinalMergeMode::HKMeans => 0,
    _ => 3,
  }
}

/// How many clusters to create before the merge reduces them.
///
/// Inactive modes pass `reqcolors` through untouched.
#[must_use]
pub fn merge_target(reqcolors: u32, mode: FinalMergeMode) -> u32 {
  if !mode.is_active() {
    return reqcolors;
  }
  let scaled = (f64::from(reqcolors) * palette_env().oversplit_factor) as u32;
  scaled.max(reqcolors).max(1)
}

fn merge_ward(clusters: &mut [FinalMergeCluster], target: u32) {
  let desired = target.max(1) as usize;
  let mut active = clusters.iter().filter(|c| c.weight > 0.0).count();
  if active <= desired {
    return;
  }
  while active > desired {
    let mut best: Option<(usize, usize)> = None;
    let mut best_cost = f64::MAX;
    for i in 0..clusters.len() {
      let wi = clusters[i].weight;
      if wi <= 0.0 {
        continue;
      }
      for j in (i + 1)..clusters.len() {
        let wj = clusters[j].weight;
        if wj <= 0.0 {
          continue;
        }
        let merged_weight = wi + wj;
        if merged_weight <= 0.0 {
          continue;
        }
        let cost = clusters[i].distance_sq(&clusters[j]) * wi * wj / merged_weight;
        if cost < best_cost {
          best_cost = cost;
          best = Some((i, j));
        }
      }
    }
    let Some((i, j)) = best else { break };
    let (wi, wj) = (clusters[i].weight, clusters[j].weight);
    let mut merged_weight = wi + wj;
    if merged_weight <= 0.0 {
      merged_weight = 1.0;
    }
    clusters[i] = FinalMergeCluster {
      r: (clusters[i].r * wi + clusters[j].r * wj) / merged_weight,
      g: (clusters[i].g * wi + clusters[j].g * wj) / merged_weight,
      b: (clusters[i].b * wi + clusters[j].b * wj) / merged_weight,
      weight: merged_weight,
    };
    clusters[j].clear();
    active -= 1;
  }
  for cluster in clusters.iter_mut() {
    if cluster.weight <= 0.0 {
      cluster.clear();
    }
  }
}

fn merge_hkmeans(clusters: &mut [FinalMergeCluster], target: u32, use_reversible: bool) {
  let env = palette_env();
  let resolved = target.max(1) as usize;
  let active = clusters.iter().filter(|c| c.weight > 0.0).count();
  if active <= resolved {
    return;
  }

  // Seed centroids by repeatedly pulling the brightest remaining cluster.
  let mut centroids: Vec<FinalMergeCluster> = Vec::with_capacity(resolved);
  for _ in 0..resolved {
    let mut best: Option<usize> = None;
    let mut brightest = -1.0f64;
    for (j, cluster) in clusters.iter().enumerate() {
      if cluster.weight <= 0.0 {
        continue;
      }
      let lumin = cluster.r * env.lumin_factor_r
        + cluster.g * env.lumin_factor_g
        + cluster.b * env.lumin_factor_b;
      if lumin > brightest {
        brightest = lumin;
        best = Some(j);
      }
    }
    let Some(j) = best else { break };
    centroids.push(clusters[j]);
    clusters[j].weight = 0.0;
  }
  for cluster in clusters.iter_mut() {
    if cluster.weight > 0.0 {
      cluster.r = snap_channel(cluster.r, use_reversible);
      cluster.g = snap_channel(cluster.g, use_reversible);
      cluster.b = snap_channel(cluster.b, use_reversible);
    }
  }

  for _ in 0..env.hkmeans_iter_max {
    let mut moved = 0.0f64;
    for i in 0..clusters.len() {
      if clusters[i].weight <= 0.0 {
        continue;
      }
      let mut best = None;
      let mut best_distance = f64::MAX;
      for (j, centroid) in centroids.iter().enumerate() {
        let distance = clusters[i].distance_sq(centroid);
        if distance < best_distance {
          best_distance = distance;
          best = Some(j);
        }
      }
      let Some(j) = best else { continue };
      let mut scale = centroids[j].weight + clusters[i].weight;
      if scale <= 0.0 {
        scale = 1.0;
      }
      centroids[j].r =
        (centroids[j].r * centroids[j].weight + clusters[i].r * clusters[i].weight)
          / scale;
      centroids[j].g =
        (centroids[j].g * centroids[j].weight + clusters[i].g * clusters[i].weight)
          / scale;
      centroids[j].b =
        (centroids[j].b * centroids[j].weight + clusters[i].b * clusters[i].weight)
          / scale;
      centroids[j].weight += clusters[i].weight;
      moved += best_distance;
    }
    moved /= clusters.len() as f64;
    if moved <= env.hkmeans_threshold {
      break;
    }
    for centroid in centroids.iter_mut() {
      centroid.r = snap_channel(centroid.r, use_reversible);
      centroid.g = snap_channel(centroid.g, use_reversible);
      centroid.b = snap_channel(centroid.b, use_reversible);
    }
  }

  let limit = (target as usize).min(centroids.len()).min(clusters.len());
  for (dst, src) in clusters.iter_mut().zip(centroids.iter().take(limit)) {
    *dst = *src;
  }
  for cluster in clusters.iter_mut().skip(limit) {
    cluster.clear();
  }
}

fn component_of(sums: &[u64], index: usize, depth: usize, weight: f64) -> [f64; 3] {
  let base = index * depth;
  let r = if depth > 0 { sums[base] as f64 / weight } else { 0.0 };
  let g = if depth > 1 { sums[base + 1] as f64 / weight } else { r };
  let b = if depth > 2 {
    sums[base + 2] as f64 / weight
  } else if depth > 1 {
    g
  } else {
    r
  };
  [r, g, b]
}

/// Reduces `cluster_count` clusters down to at most `target`, in place.
///
/// `weights[i]` holds cluster `i`'s pixel weight and
/// `sums[i * depth + plane]` its channel sums. On return the surviving
/// clusters are compacted to the front and the tail is zeroed; the survivor
/// count is returned. Inactive modes leave the arrays untouched.
pub fn apply_merge(
  weights: &mut [u64], sums: &mut [u64], depth: usize, cluster_count: usize,
  target: u32, mode: FinalMergeMode, use_reversible: bool,
) -> usize {
  if cluster_count == 0 {
    return 0;
  }
  let mut clusters: Vec<FinalMergeCluster> = Vec::with_capacity(cluster_count);
  for index in 0..cluster_count {
    let weight = weights[index] as f64;
    if weight <= 0.0 {
      clusters.push(FinalMergeCluster::default());
      continue;
    }
    let [r, g, b] = component_of(sums, index, depth, weight);
    clusters.push(FinalMergeCluster { r, g, b, weight });
  }
  match mode.resolve() {
    FinalMergeMode::Ward => merge_ward(&mut clusters, target),
    FinalMergeMode::HKMeans => merge_hkmeans(&mut clusters, target, use_reversible),
    _ => (),
  }

  let mut result = 0usize;
  let limit = (target as usize).min(cluster_count);
  for cluster in clusters.iter() {
    if result >= limit {
      break;
    }
    if cluster.weight <= 0.0 {
      continue;
    }
    write_back(weights, sums, depth, result, cluster);
    result += 1;
  }
  if result == 0 {
    write_back(weights, sums, depth, 0, &clusters[0]);
    result = 1;
  }
  for index in result..cluster_count {
    weights[index] = 0;
    for plane in 0..depth {
      sums[index * depth + plane] = 0;
    }
  }
  debug!("final merge: {cluster_count} clusters -> {result}");
  result
}

fn write_back(
  weights: &mut [u64], sums: &mut [u64], depth: usize, index: usize,
  cluster: &FinalMergeCluster,
) {
  let weight = cluster.weight.max(1.0);
  weights[index] = ((weight + 0.5) as u64).max(1);
  let used_weight = weights[index] as f64;
  for plane in 0..depth {
    let component = match plane {
      0 => cluster.r,
      1 => cluster.g,
      _ => cluster.b,
    }
    .clamp(0.0, 255.0);
    sums[index * depth + plane] = (component * used_weight + 0.5) as u64;
  }
}

/// Extra Lloyd passes over the full histogram after a merge.
///
/// Cluster statistics are re-derived by assigning every histogram entry to
/// its nearest current centroid; empty clusters inherit their centroid with
/// unit weight so no palette slot degenerates to black.
pub fn lloyd_histogram(
  histogram: &Histogram, cluster_count: usize, weights: &mut [u64], sums: &mut [u64],
  iterations: u32,
) {
  let depth = histogram.depth;
  if iterations == 0 || cluster_count == 0 || depth == 0 || histogram.entries.is_empty()
  {
    return;
  }
  let mut centers = vec![0.0f64; cluster_count * depth];
  for index in 0..cluster_count {
    let weight = weights[index];
    for plane in 0..depth {
      centers[index * depth + plane] = if weight > 0 {
        sums[index * depth + plane] as f64 / weight as f64
      } else {
        0.0
      };
    }
  }
  for _ in 0..iterations {
    weights[..cluster_count].fill(0);
    sums[..cluster_count * depth].fill(0);
    for entry in histogram.entries.iter() {
      if entry.count == 0 {
        continue;
      }
      let mut best = 0usize;
      let mut best_distance = f64::MAX;
      for index in 0..cluster_count {
        let mut distance = 0.0;
        for plane in 0..depth {
          let diff = f64::from(entry.tuple[plane]) - centers[index * depth + plane];
          distance += diff * diff;
        }
        if distance < best_distance {
          best_distance = distance;
          best = index;
        }
      }
      weights[best] += u64::from(entry.count);
      for plane in 0..depth {
        sums[best * depth + plane] +=
          u64::from(entry.tuple[plane]) * u64::from(entry.count);
      }
    }
    for index in 0..cluster_count {
      let weight = weights[index];
      if weight == 0 {
        continue;
      }
      for plane in 0..depth {
        centers[index * depth + plane] =
          sums[index * depth + plane] as f64 / weight as f64;
      }
    }
  }
  for index in 0..cluster_count {
    if weights[index] == 0 {
      for plane in 0..depth {
        let channel = centers[index * depth + plane].clamp(0.0, 255.0);
        sums[index * depth + plane] = (channel + 0.5) as u64;
      }
      weights[index] = 1;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn auto_resolves_to_none() {
    assert_eq!(FinalMergeMode::Auto.resolve(), FinalMergeMode::None);
    assert!(!FinalMergeMode::Auto.is_active());
    assert!(FinalMergeMode::Ward.is_active());
  }

  #[test]
  fn merge_target_passthrough_when_inactive() {
    assert_eq!(merge_target(16, FinalMergeMode::None), 16);
    assert_eq!(merge_target(16, FinalMergeMode::Auto), 16);
    // With the default 1.81 factor, 16 requested colors oversplit to 28.
    assert_eq!(merge_target(16, FinalMergeMode::Ward), 28);
    assert!(merge_target(1, FinalMergeMode::Ward) >= 1);
  }

  #[test]
  fn ward_merges_the_closest_pair_first() {
    // Two near-black clusters and one far white cluster; reducing to two
    // must merge the near pair into their weighted mean.
    let mut weights = [4u64, 4, 8];
    let mut sums = [4 * 10, 4 * 10, 4 * 10, 4 * 14, 4 * 14, 4 * 14, 8 * 250, 8 * 250,
      8 * 250];
    let survivors =
      apply_merge(&mut weights, &mut sums, 3, 3, 2, FinalMergeMode::Ward, false);
    assert_eq!(survivors, 2);
    assert_eq!(weights[0], 8);
    // merged mean of 10 and 14 at equal weight is 12
    assert_eq!(sums[0] / weights[0], 12);
    assert_eq!(weights[1], 8);
    assert_eq!(sums[3] / weights[1], 250);
    assert_eq!(weights[2], 0);
  }

  #[test]
  fn hkmeans_seeds_from_the_brightest() {
    let mut weights = [1u64, 1, 1, 1];
    let mut sums = [
      0, 0, 0, //
      60, 60, 60, //
      120, 120, 120, //
      255, 255, 255,
    ];
    let survivors =
      apply_merge(&mut weights, &mut sums, 3, 4, 2, FinalMergeMode::HKMeans, false);
    assert_eq!(survivors, 2);
    // The brightest clusters seeded the centroids, so slot 0 stays bright.
    assert!(sums[0] / weights[0] >= 120);
  }

  #[test]
  fn empty_cluster_after_lloyd_keeps_its_centroid() {
    let histogram = Histogram {
      entries: vec![crate::histogram::ColorFreq { count: 4, tuple: [200, 0, 0, 0] }],
      depth: 3,
    };
    let mut weights = [4u64, 0];
    let mut sums = [800, 0, 0, 0, 0, 0];
    lloyd_histogram(&histogram, 2, &mut weights, &mut sums, 2);
    assert_eq!(weights[1], 1);
  }
}
