use sixel_color::dither::{apply_palette, DiffusionMethod, DitherConfig, ScanMethod};

fn config(diffusion: DiffusionMethod, scan: ScanMethod) -> DitherConfig {
  DitherConfig { diffusion, scan, ..DitherConfig::default() }
}

/// Scenario: Floyd-Steinberg over a uniform mid-gray block on a
/// black/white palette must produce a mix of indices, not a flat field.
#[test]
fn floyd_steinberg_dithers_mid_gray() {
  let mut palette = vec![0u8, 0, 0, 255, 255, 255];
  let mut data = vec![128u8; 2 * 2 * 3];
  let mut result = vec![0u8; 4];
  apply_palette(
    &mut result,
    &mut data,
    2,
    2,
    3,
    &mut palette,
    2,
    &config(DiffusionMethod::FS, ScanMethod::Raster),
    None,
  )
  .unwrap();
  let first = result[0];
  assert!(
    result.iter().any(|&index| index != first),
    "dither produced a flat field: {result:?}"
  );
}

/// Round trip: when the palette covers every image color and diffusion is
/// off, quantize-then-expand is pixel identical.
#[test]
fn exact_palette_round_trips_losslessly() {
  let colors: [[u8; 3]; 4] = [[250, 10, 10], [10, 250, 10], [10, 10, 250], [99, 99, 99]];
  let mut palette: Vec<u8> = colors.iter().flatten().copied().collect();
  let source: Vec<u8> = [3usize, 1, 0, 2, 2, 1, 0, 3]
    .iter()
    .flat_map(|&i| colors[i])
    .collect();
  let mut data = source.clone();
  let mut result = vec![0u8; 8];
  apply_palette(
    &mut result,
    &mut data,
    4,
    2,
    3,
    &mut palette,
    4,
    &config(DiffusionMethod::None, ScanMethod::Raster),
    None,
  )
  .unwrap();
  let expanded: Vec<u8> =
    result.iter().flat_map(|&i| colors[usize::from(i)]).collect();
  assert_eq!(expanded, source);
}

/// Invariant: every emitted index addresses a palette entry.
#[test]
fn indices_stay_in_range() {
  let mut palette = vec![0u8, 0, 0, 128, 128, 128, 255, 255, 255];
  let mut data: Vec<u8> = (0..16 * 16 * 3).map(|i| (i * 37 % 256) as u8).collect();
  let mut result = vec![0u8; 16 * 16];
  let ncolors = apply_palette(
    &mut result,
    &mut data,
    16,
    16,
    3,
    &mut palette,
    3,
    &DitherConfig {
      diffusion: DiffusionMethod::Atkinson,
      optimize_palette: true,
      ..DitherConfig::default()
    },
    None,
  )
  .unwrap();
  assert!(ncolors >= 1 && ncolors <= 3);
  for &index in result.iter() {
    assert!(usize::from(index) < ncolors, "index {index} >= {ncolors}");
  }
}

/// Serpentine scanning changes the traversal but still quantizes every
/// pixel to its nearest entry when diffusion is off.
#[test]
fn serpentine_without_diffusion_matches_raster() {
  let mut palette = vec![0u8, 0, 0, 255, 255, 255];
  let source: Vec<u8> =
    (0..6 * 3 * 3).map(|i| if (i / 9) % 2 == 0 { 20u8 } else { 230 }).collect();

  let mut raster_data = source.clone();
  let mut raster = vec![0u8; 18];
  apply_palette(
    &mut raster,
    &mut raster_data,
    6,
    3,
    3,
    &mut palette.clone(),
    2,
    &config(DiffusionMethod::None, ScanMethod::Raster),
    None,
  )
  .unwrap();

  let mut serp_data = source.clone();
  let mut serpentine = vec![0u8; 18];
  apply_palette(
    &mut serpentine,
    &mut serp_data,
    6,
    3,
    3,
    &mut palette,
    2,
    &config(DiffusionMethod::None, ScanMethod::Serpentine),
    None,
  )
  .unwrap();

  assert_eq!(raster, serpentine);
}

/// The ordered masks perturb lookups deterministically: the same call
/// twice gives the same indices.
#[test]
fn pattern_dither_is_deterministic() {
  // Off-pure endpoints keep the monochrome shortcut out of the way.
  let mut palette = vec![10u8, 10, 10, 245, 245, 245];
  let source = vec![128u8; 8 * 8 * 3];
  let mut first = vec![0u8; 64];
  let mut second = vec![0u8; 64];
  for result in [&mut first, &mut second] {
    let mut data = source.clone();
    apply_palette(
      result,
      &mut data,
      8,
      8,
      3,
      &mut palette.clone(),
      2,
      &config(DiffusionMethod::ADither, ScanMethod::Raster),
      None,
    )
    .unwrap();
  }
  assert_eq!(first, second);
  let ones = first.iter().filter(|&&i| i == 1).count();
  assert!(ones > 0 && ones < 64, "mask produced a flat field");
}

/// Zero requested colors is rejected up front.
#[test]
fn zero_reqcolor_is_bad_argument() {
  let mut palette = vec![0u8, 0, 0];
  let mut data = vec![0u8; 3];
  let mut result = vec![0u8; 1];
  let r = apply_palette(
    &mut result,
    &mut data,
    1,
    1,
    3,
    &mut palette,
    0,
    &DitherConfig::default(),
    None,
  );
  assert_eq!(r, Err(sixel_color::SixelError::BadArgument));
}
