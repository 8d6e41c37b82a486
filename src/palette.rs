#![forbid(unsafe_code)]

//! Palette objects and the quantizer front door.
//!
//! A [`Palette`] bundles the solver configuration with its output: call
//! [`Palette::generate`] with raw pixels and the configured quantizer fills
//! in the entries. The two algorithms (median cut and k-means++) are
//! selected by [`QuantizeModel`]; both end in the shared final-merge stage
//! and both honor the same histogram, snapping, and force-completion rules,
//! so the choice only changes how the initial clusters form.

use log::debug;

use crate::{
  histogram::{self, ColorFreq, Histogram, LutPolicy},
  kmeans,
  mediancut::mediancut,
  merge::FinalMergeMode,
  reversible, AbortToken, PixelFormat, SixelError, SixelResult,
};

/// Most entries a SIXEL palette can carry.
pub const PALETTE_MAX: usize = 256;

/// How the median-cut splitter picks the dimension to cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MethodForLargest {
  /// Defaults to [`Norm`](MethodForLargest::Norm).
  #[default]
  Auto,
  /// Compare raw channel spreads.
  Norm,
  /// Weight channel spreads by luminance.
  Lum,
}

/// How a median-cut box collapses to its representative color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MethodForRep {
  /// Defaults to [`AveragePixels`](MethodForRep::AveragePixels).
  #[default]
  Auto,
  /// Midpoint of the box extents.
  CenterBox,
  /// Unweighted mean of the box's colors.
  AverageColors,
  /// Pixel-count-weighted mean.
  AveragePixels,
}

/// Trade quantization quality against time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QualityMode {
  /// A middle ground chosen by the library.
  #[default]
  Auto,
  /// Sparse sampling, few solver iterations.
  Low,
  /// Dense sampling.
  High,
  /// Exhaustive sampling.
  Full,
  /// Tuned for high-color output devices.
  HighColor,
}

/// Which quantization algorithm builds the palette.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QuantizeModel {
  /// Defaults to [`Heckbert`](QuantizeModel::Heckbert).
  #[default]
  Auto,
  /// Median-cut box subdivision.
  Heckbert,
  /// k-means++ seeded Lloyd iteration.
  KMeans,
}

/// A palette plus the configuration that produced it.
#[derive(Debug, Clone)]
pub struct Palette {
  /// `entry_count * 3` bytes, R then G then B.
  pub entries: Vec<u8>,
  /// Parallel float palette, present after quantizing float32 input.
  pub entries_float32: Option<Vec<f32>>,
  /// Number of valid entries.
  pub entry_count: usize,
  /// How many colors the caller asked for.
  pub requested_colors: usize,
  /// Unique colors observed in the source (sampled).
  pub original_colors: usize,
  /// Channels per entry; always 3 for the RGB pipeline.
  pub depth: usize,
  /// Split-dimension selection for median cut.
  pub method_for_largest: MethodForLargest,
  /// Representative selection for median cut.
  pub method_for_rep: MethodForRep,
  /// Sampling density and iteration caps.
  pub quality_mode: QualityMode,
  /// Pad the palette up to `requested_colors` entries.
  pub force_palette: bool,
  /// Keep every channel value on the reversible tone grid.
  pub use_reversible: bool,
  /// Algorithm selection.
  pub quantize_model: QuantizeModel,
  /// Oversplit-and-reduce configuration.
  pub final_merge_mode: FinalMergeMode,
  /// Histogram bucket policy.
  pub lut_policy: LutPolicy,
}

impl Default for Palette {
  fn default() -> Self {
    Self {
      entries: Vec::new(),
      entries_float32: None,
      entry_count: 0,
      requested_colors: PALETTE_MAX,
      original_colors: 0,
      depth: 3,
      method_for_largest: MethodForLargest::Auto,
      method_for_rep: MethodForRep::Auto,
      quality_mode: QualityMode::Auto,
      force_palette: false,
      use_reversible: false,
      quantize_model: QuantizeModel::Auto,
      final_merge_mode: FinalMergeMode::Auto,
      lut_policy: LutPolicy::Auto,
    }
  }
}

/// Channels the quantizer sees for a byte-form pixel format.
pub(crate) fn quant_depth(format: PixelFormat) -> SixelResult<usize> {
  if format.is_float() {
    return Err(SixelError::BadArgument);
  }
  Ok(match format.bytes_per_pixel() {
    1 => 1,
    2 => 2,
    3 => 3,
    4 => 4,
    _ => return Err(SixelError::BadArgument),
  })
}

/// Pads a colormap up to `reqcolors` entries.
///
/// The padding repeats the histogram's highest-count colors (count
/// descending, first-seen order breaking ties) and cycles over the palette
/// itself once the histogram runs dry.
pub(crate) fn force_palette_completion(
  colormap: &mut Vec<ColorFreq>, reqcolors: usize, histogram: &Histogram,
) {
  if colormap.len() >= reqcolors {
    return;
  }
  let mut order: Vec<usize> = (0..histogram.entries.len()).collect();
  order.sort_by(|&a, &b| {
    histogram.entries[b].count.cmp(&histogram.entries[a].count).then(a.cmp(&b))
  });
  let mut candidate = 0usize;
  while colormap.len() < reqcolors && candidate < order.len() {
    colormap.push(histogram.entries[order[candidate]]);
    candidate += 1;
  }
  if colormap.is_empty() {
    colormap.push(ColorFreq { count: 0, tuple: [0u8; 4] });
  }
  let mut source = 0usize;
  while colormap.len() < reqcolors {
    let repeated = colormap[source];
    colormap.push(repeated);
    source += 1;
  }
}

impl Palette {
  /// Makes a palette with default configuration.
  #[inline]
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Builds the palette entries from raw pixel data.
  ///
  /// `data` is a tightly packed buffer in `format`; for the k-means model
  /// the float32 forms are accepted too. On success `entries`,
  /// `entry_count`, and `original_colors` are filled in.
  ///
  /// ## Failure
  /// * `BadArgument` for pixel formats the selected solver cannot sample.
  /// * `BadAllocation`, `Interrupted` from the stages below, unchanged.
  pub fn generate(
    &mut self, data: &[u8], format: PixelFormat, token: Option<&AbortToken>,
  ) -> SixelResult<()> {
    if self.requested_colors == 0 {
      self.requested_colors = 1;
    }
    if self.requested_colors > PALETTE_MAX {
      self.requested_colors = PALETTE_MAX;
    }
    self.entries_float32 = None;
    let resolved_model = match self.quantize_model {
      QuantizeModel::Auto | QuantizeModel::Heckbert => QuantizeModel::Heckbert,
      QuantizeModel::KMeans => QuantizeModel::KMeans,
    };
    let colormap = match resolved_model {
      QuantizeModel::KMeans => kmeans::build_palette_kmeans(self, data, format, token)?,
      _ => self.generate_heckbert(data, format, token)?,
    };
    self.entry_count = colormap.len();
    self.depth = 3;
    self.entries.clear();
    self.entries.try_reserve_exact(self.entry_count * 3)?;
    for entry in colormap.iter() {
      self.entries.extend_from_slice(&entry.tuple[..3]);
    }
    if self.use_reversible {
      reversible::snap_palette(&mut self.entries);
    }
    debug!(
      "palette: {} entries ({} unique colors seen)",
      self.entry_count, self.original_colors
    );
    Ok(())
  }

  /// The median-cut pipeline: histogram, split, merge, completion.
  fn generate_heckbert(
    &mut self, data: &[u8], format: PixelFormat, token: Option<&AbortToken>,
  ) -> SixelResult<Vec<ColorFreq>> {
    let depth = quant_depth(format)?;
    let mut hist = histogram::build_histogram(
      data,
      depth,
      self.quality_mode,
      self.use_reversible,
      self.lut_policy,
      token,
    )?;
    self.original_colors = hist.entries.len();

    let mut colormap = if hist.entries.len() <= self.requested_colors {
      debug!("palette: image already fits in {} colors", self.requested_colors);
      let mut colormap = hist.entries.clone();
      if self.use_reversible {
        for entry in colormap.iter_mut() {
          reversible::snap_palette(&mut entry.tuple[..depth]);
        }
      }
      colormap
    } else {
      debug!("palette: choosing {} colors...", self.requested_colors);
      mediancut(
        &mut hist,
        self.requested_colors as u32,
        self.method_for_largest,
        self.method_for_rep,
        self.use_reversible,
        self.final_merge_mode,
        token,
      )?
    };
    if self.force_palette {
      force_palette_completion(&mut colormap, self.requested_colors, &hist);
    }
    // Gray input reconstructs a single channel; widen to RGB tuples.
    if depth == 1 {
      for entry in colormap.iter_mut() {
        entry.tuple[1] = entry.tuple[0];
        entry.tuple[2] = entry.tuple[0];
      }
    }
    Ok(colormap)
  }
}
