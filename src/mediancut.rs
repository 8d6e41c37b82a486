#![forbid(unsafe_code)]

//! The Heckbert median-cut quantizer.
//!
//! Classic recursive box subdivision over the color histogram: the
//! highest-population box is split at the pixel-weighted median of its
//! widest dimension until enough boxes exist, then each box collapses to a
//! representative color. When a final merge is active the splitter
//! deliberately overshoots and the shared merge stage reduces the boxes
//! back down.

use log::debug;

use crate::{
  abort,
  env::palette_env,
  histogram::{ColorFreq, Histogram},
  merge::{self, FinalMergeMode},
  palette::{MethodForLargest, MethodForRep},
  reversible, AbortToken, SixelError, SixelResult,
};

#[derive(Debug, Clone, Copy)]
struct ColorBox {
  /// First histogram entry of the box.
  start: usize,
  /// Number of histogram entries in the box.
  colors: usize,
  /// Total pixel count in the box.
  sum: u64,
}

fn find_box_boundaries(
  entries: &[ColorFreq], depth: usize, bx: &ColorBox,
) -> ([u8; 4], [u8; 4]) {
  let mut minval = [0u8; 4];
  let mut maxval = [0u8; 4];
  let first = &entries[bx.start];
  minval[..depth].copy_from_slice(&first.tuple[..depth]);
  maxval[..depth].copy_from_slice(&first.tuple[..depth]);
  for entry in &entries[bx.start + 1..bx.start + bx.colors] {
    for plane in 0..depth {
      let v = entry.tuple[plane];
      minval[plane] = minval[plane].min(v);
      maxval[plane] = maxval[plane].max(v);
    }
  }
  (minval, maxval)
}

fn largest_by_norm(minval: &[u8; 4], maxval: &[u8; 4], depth: usize) -> usize {
  let mut largest_dimension = 0;
  let mut largest_spread = 0u8;
  for plane in 0..depth {
    let spread = maxval[plane] - minval[plane];
    if spread > largest_spread {
      largest_dimension = plane;
      largest_spread = spread;
    }
  }
  largest_dimension
}

fn largest_by_luminosity(minval: &[u8; 4], maxval: &[u8; 4], depth: usize) -> usize {
  let env = palette_env();
  let weights = [env.lumin_factor_r, env.lumin_factor_g, env.lumin_factor_b];
  let mut largest_dimension = 0;
  let mut largest_spread = 0.0f64;
  for plane in 0..depth {
    let mut spread = f64::from(maxval[plane] - minval[plane]);
    if plane < 3 {
      spread *= weights[plane];
    }
    if spread > largest_spread {
      largest_dimension = plane;
      largest_spread = spread;
    }
  }
  largest_dimension
}

/// Splits box `bi` at the pixel-weighted median of its widest dimension.
fn split_box(
  boxes: &mut Vec<ColorBox>, bi: usize, entries: &mut [ColorFreq], depth: usize,
  method_for_largest: MethodForLargest,
) -> SixelResult<()> {
  let bx = boxes[bi];
  let (minval, maxval) = find_box_boundaries(entries, depth, &bx);
  let largest_dimension = match method_for_largest {
    MethodForLargest::Auto | MethodForLargest::Norm => {
      largest_by_norm(&minval, &maxval, depth)
    }
    MethodForLargest::Lum => largest_by_luminosity(&minval, &maxval, depth),
  };

  let range = &mut entries[bx.start..bx.start + bx.colors];
  range.sort_by_key(|entry| entry.tuple[largest_dimension]);

  // Walk entries until about half the *pixels* sit below the cut.
  let mut lowersum = u64::from(range[0].count);
  let mut i = 1;
  while i < bx.colors - 1 && lowersum < bx.sum / 2 {
    lowersum += u64::from(range[i].count);
    i += 1;
  }
  let median_index = i;

  boxes[bi].colors = median_index;
  boxes[bi].sum = lowersum;
  boxes.push(ColorBox {
    start: bx.start + median_index,
    colors: bx.colors - median_index,
    sum: bx.sum - lowersum,
  });
  boxes.sort_by(|a, b| b.sum.cmp(&a.sum));
  Ok(())
}

fn center_box(entries: &[ColorFreq], depth: usize, bx: &ColorBox) -> [u8; 4] {
  let (minval, maxval) = find_box_boundaries(entries, depth, bx);
  let mut tuple = [0u8; 4];
  for plane in 0..depth {
    tuple[plane] =
      ((u16::from(minval[plane]) + u16::from(maxval[plane])) / 2) as u8;
  }
  tuple
}

fn average_colors(entries: &[ColorFreq], depth: usize, bx: &ColorBox) -> [u8; 4] {
  let mut tuple = [0u8; 4];
  for plane in 0..depth {
    let sum: u64 = entries[bx.start..bx.start + bx.colors]
      .iter()
      .map(|e| u64::from(e.tuple[plane]))
      .sum();
    tuple[plane] = (sum / bx.colors as u64) as u8;
  }
  tuple
}

fn average_pixels(entries: &[ColorFreq], depth: usize, bx: &ColorBox) -> [u8; 4] {
  let slice = &entries[bx.start..bx.start + bx.colors];
  let n: u64 = slice.iter().map(|e| u64::from(e.count)).sum();
  let mut tuple = [0u8; 4];
  for plane in 0..depth {
    let sum: u64 =
      slice.iter().map(|e| u64::from(e.tuple[plane]) * u64::from(e.count)).sum();
    tuple[plane] = if n != 0 { (sum / n) as u8 } else { 0 };
  }
  tuple
}

fn colormap_from_boxes(
  boxes: &[ColorBox], entries: &[ColorFreq], depth: usize, method_for_rep: MethodForRep,
  use_reversible: bool,
) -> Vec<ColorFreq> {
  let mut colormap = Vec::with_capacity(boxes.len());
  for bx in boxes.iter() {
    let mut tuple = match method_for_rep {
      MethodForRep::CenterBox => center_box(entries, depth, bx),
      MethodForRep::AverageColors => average_colors(entries, depth, bx),
      MethodForRep::Auto | MethodForRep::AveragePixels => {
        average_pixels(entries, depth, bx)
      }
    };
    if use_reversible {
      reversible::snap_palette(&mut tuple[..depth]);
    }
    colormap.push(ColorFreq { count: bx.sum.min(u64::from(u32::MAX)) as u32, tuple });
  }
  colormap
}

/// Converts merged cluster statistics into colormap entries.
fn clusters_to_colormap(
  weights: &[u64], sums: &[u64], depth: usize, cluster_count: usize,
  use_reversible: bool,
) -> Vec<ColorFreq> {
  let mut colormap = Vec::with_capacity(cluster_count);
  for index in 0..cluster_count {
    let weight = weights[index].max(1);
    let mut tuple = [0u8; 4];
    for plane in 0..depth {
      let component =
        (sums[index * depth + plane] as f64 / weight as f64).clamp(0.0, 255.0);
      tuple[plane] = (component + 0.5) as u8;
    }
    if use_reversible {
      reversible::snap_palette(&mut tuple[..depth]);
    }
    colormap.push(ColorFreq { count: weight.min(u64::from(u32::MAX)) as u32, tuple });
  }
  colormap
}

/// Reduces a histogram to at most `newcolors` representative colors.
///
/// The histogram entries are reordered in place by the splitting passes.
pub(crate) fn mediancut(
  histogram: &mut Histogram, newcolors: u32, method_for_largest: MethodForLargest,
  method_for_rep: MethodForRep, use_reversible: bool, final_merge_mode: FinalMergeMode,
  token: Option<&AbortToken>,
) -> SixelResult<Vec<ColorFreq>> {
  let depth = histogram.depth;
  let size = histogram.entries.len();
  if size == 0 || newcolors == 0 {
    return Err(SixelError::BadArgument);
  }
  let resolved = final_merge_mode.resolve();
  let apply_merge = resolved.is_active();
  let sum = histogram.total_weight();

  let mut working_colors = newcolors as usize;
  if apply_merge {
    working_colors = (merge::merge_target(newcolors, resolved) as usize).min(size);
    debug!("median cut: oversplitting to {working_colors} boxes");
  }
  working_colors = working_colors.max(1);

  let mut boxes = Vec::with_capacity(working_colors);
  boxes.push(ColorBox { start: 0, colors: size, sum });
  let mut multicolor_boxes_exist = size > 1;
  while boxes.len() < working_colors && multicolor_boxes_exist {
    abort::poll(token)?;
    match boxes.iter().position(|b| b.colors >= 2) {
      Some(bi) => {
        split_box(&mut boxes, bi, &mut histogram.entries, depth, method_for_largest)?
      }
      None => multicolor_boxes_exist = false,
    }
  }

  if apply_merge && boxes.len() > newcolors as usize {
    let mut cluster_weight = vec![0u64; boxes.len()];
    let mut cluster_sums = vec![0u64; boxes.len() * depth];
    for (bi, bx) in boxes.iter().enumerate() {
      for entry in &histogram.entries[bx.start..bx.start + bx.colors] {
        let value = u64::from(entry.count);
        cluster_weight[bi] += value;
        for plane in 0..depth {
          cluster_sums[bi * depth + plane] += u64::from(entry.tuple[plane]) * value;
        }
      }
    }
    let mut cluster_total = merge::apply_merge(
      &mut cluster_weight,
      &mut cluster_sums,
      depth,
      boxes.len(),
      newcolors,
      resolved,
      use_reversible,
    );
    cluster_total = cluster_total.clamp(1, newcolors as usize);
    let iteration_limit = merge::lloyd_iterations(resolved);
    if iteration_limit > 0 {
      merge::lloyd_histogram(
        histogram,
        cluster_total,
        &mut cluster_weight,
        &mut cluster_sums,
        iteration_limit,
      );
    }
    Ok(clusters_to_colormap(
      &cluster_weight,
      &cluster_sums,
      depth,
      cluster_total,
      use_reversible,
    ))
  } else {
    Ok(colormap_from_boxes(
      &boxes,
      &histogram.entries,
      depth,
      method_for_rep,
      use_reversible,
    ))
  }
}
