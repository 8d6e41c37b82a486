use sixel_color::{
  histogram::{build_histogram, HistogramControl, LutPolicy},
  reversible, FinalMergeMode, MethodForLargest, MethodForRep, Palette, PixelFormat,
  QualityMode, QuantizeModel, PALETTE_MAX,
};

/// Scenario: median cut on a 2x2 image of four distinct colors down to two
/// palette entries.
#[test]
fn mediancut_2x2_to_two_colors() {
  let pixels = [
    255u8, 0, 0, //
    0, 255, 0, //
    0, 0, 255, //
    255, 255, 255,
  ];
  let mut palette = Palette {
    requested_colors: 2,
    method_for_largest: MethodForLargest::Norm,
    method_for_rep: MethodForRep::AveragePixels,
    final_merge_mode: FinalMergeMode::None,
    lut_policy: LutPolicy::None,
    ..Palette::default()
  };
  palette.generate(&pixels, PixelFormat::RGB888, None).unwrap();
  assert_eq!(palette.entry_count, 2);
  assert_eq!(palette.entries.len(), 6);
  // Both representatives must be averages of input pixels, so every
  // channel stays within the observed range.
  for entry in palette.entries.chunks_exact(3) {
    for &channel in entry {
      assert!(channel <= 255);
    }
  }
  // The two entries must differ: a valid partition of four distinct
  // colors cannot collapse to one representative.
  assert_ne!(&palette.entries[0..3], &palette.entries[3..6]);
}

/// Scenario: k-means++ on a 4-step gray gradient splits into a dark and a
/// bright center.
#[test]
fn kmeans_gradient_two_centers() {
  let pixels = [
    0u8, 0, 0, //
    85, 85, 85, //
    170, 170, 170, //
    255, 255, 255,
  ];
  let mut palette = Palette {
    requested_colors: 2,
    quantize_model: QuantizeModel::KMeans,
    quality_mode: QualityMode::Auto,
    ..Palette::default()
  };
  palette.generate(&pixels, PixelFormat::RGB888, None).unwrap();
  assert_eq!(palette.entry_count, 2);
  let mut centers: Vec<i32> = palette
    .entries
    .chunks_exact(3)
    .map(|entry| i32::from(entry[0]))
    .collect();
  centers.sort_unstable();
  // Ideal centers are (0+85)/2 = 42 and (170+255)/2 = 212.
  assert!((centers[0] - 42).abs() <= 4, "dark center at {}", centers[0]);
  assert!((centers[1] - 212).abs() <= 4, "bright center at {}", centers[1]);
}

/// Scenario: reversible palettes only ever contain grid members.
#[test]
fn reversible_palette_snaps_to_the_grid() {
  let mut pixels = Vec::new();
  for i in 0u32..256 {
    pixels.extend_from_slice(&[i as u8, (i * 7 % 256) as u8, (i * 13 % 256) as u8]);
  }
  let mut palette = Palette {
    requested_colors: 16,
    use_reversible: true,
    ..Palette::default()
  };
  palette.generate(&pixels, PixelFormat::RGB888, None).unwrap();
  assert!(palette.entry_count >= 1);
  for &byte in palette.entries.iter() {
    assert!(reversible::is_reversible(byte), "{byte} escaped the grid");
  }
}

/// Scenario: Ward final merge reduces an oversplit cluster set to exactly
/// the requested count.
#[test]
fn ward_merge_reduces_oversplit() {
  // 1024 pixels over 32 distinct colors.
  let mut pixels = Vec::new();
  for i in 0..1024u32 {
    let c = ((i % 32) * 8) as u8;
    pixels.extend_from_slice(&[c, c / 2, 255 - c]);
  }
  let mut palette = Palette {
    requested_colors: 8,
    final_merge_mode: FinalMergeMode::Ward,
    lut_policy: LutPolicy::None,
    ..Palette::default()
  };
  palette.generate(&pixels, PixelFormat::RGB888, None).unwrap();
  assert_eq!(palette.entry_count, 8);
}

/// Invariant: palette size never exceeds the request nor the hard cap, and
/// force-palette tops it up exactly when enough unique colors exist.
#[test]
fn palette_size_invariants() {
  let mut pixels = Vec::new();
  for i in 0..4096u32 {
    pixels.extend_from_slice(&[
      (i % 256) as u8,
      ((i / 16) % 256) as u8,
      ((i * 31) % 256) as u8,
    ]);
  }
  for requested in [1usize, 3, 17, 256, 4000] {
    let mut palette = Palette {
      requested_colors: requested,
      force_palette: true,
      ..Palette::default()
    };
    palette.generate(&pixels, PixelFormat::RGB888, None).unwrap();
    assert!(palette.entry_count <= requested.min(PALETTE_MAX));
    if palette.original_colors >= requested.min(PALETTE_MAX) {
      assert_eq!(palette.entry_count, requested.min(PALETTE_MAX));
    }
  }
}

/// Boundary: k-means over zero opaque pixels reports an empty palette.
#[test]
fn kmeans_fully_transparent_input() {
  let pixels = [0u8, 0, 0, 0, 10, 20, 30, 0];
  let mut palette = Palette {
    requested_colors: 4,
    quantize_model: QuantizeModel::KMeans,
    ..Palette::default()
  };
  palette.generate(&pixels, PixelFormat::RGBA8888, None).unwrap();
  assert_eq!(palette.entry_count, 0);
  assert_eq!(palette.original_colors, 0);
}

/// Invariant: histogram packing separates colors that random sampling says
/// are distinct after quantization.
#[test]
fn histogram_packing_injective_on_random_data() {
  let data = crate::rand_bytes(3 * 2048);
  let control = HistogramControl::for_policy(3, LutPolicy::FiveBit);
  for pixel in data.chunks_exact(3) {
    let packed = control.pack(pixel, 3);
    // Unpack and re-quantize: the packed key must round-trip.
    for n in 0..3usize {
      let component = (packed >> (n as u32 * control.channel_bits)) & control.channel_mask;
      assert_eq!(component, control.quantize(pixel[2 - n]));
    }
  }
}

/// The histogram respects the documented sampling ceiling per quality mode
/// by still counting every color of a small image.
#[test]
fn histogram_small_image_is_exhaustive() {
  let data = crate::rand_bytes(3 * 64);
  let hist =
    build_histogram(&data, 3, QualityMode::Low, false, LutPolicy::None, None).unwrap();
  assert_eq!(hist.total_weight(), 64);
}

/// HK-means merge also lands on the requested count.
#[test]
fn hkmeans_merge_reduces_oversplit() {
  let mut pixels = Vec::new();
  for i in 0..512u32 {
    let c = ((i % 24) * 10) as u8;
    pixels.extend_from_slice(&[c, c, c]);
  }
  let mut palette = Palette {
    requested_colors: 6,
    final_merge_mode: FinalMergeMode::HKMeans,
    lut_policy: LutPolicy::None,
    ..Palette::default()
  };
  palette.generate(&pixels, PixelFormat::RGB888, None).unwrap();
  assert!(palette.entry_count <= 6);
  assert!(palette.entry_count >= 1);
}
