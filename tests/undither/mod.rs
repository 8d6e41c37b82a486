use sixel_color::codec::{DecodedRaw, DecoderOptions};
use sixel_color::undither::{dequantize, k_undither, DequantizeMethod};
use sixel_color::SixelError;

/// Scenario: a uniform block reconstructs to exactly its palette color.
#[test]
fn uniform_block_is_reproduced_exactly() {
  let mut palette = vec![0u8; 6 * 3];
  palette[5 * 3..5 * 3 + 3].copy_from_slice(&[100, 150, 200]);
  let indexed = vec![5u8; 16];
  let rgb = k_undither(&indexed, 4, 4, &palette, 6, 100, 200, false).unwrap();
  assert_eq!(rgb.len(), 4 * 4 * 3);
  for pixel in rgb.chunks_exact(3) {
    assert_eq!(pixel, &[100, 150, 200]);
  }
}

/// A checkerboard of two blendable colors smooths toward their midpoint
/// while staying inside the original range.
#[test]
fn checkerboard_smooths_between_the_pair() {
  let palette = vec![40u8, 40, 40, 200, 200, 200];
  let mut indexed = Vec::new();
  for y in 0..8 {
    for x in 0..8 {
      indexed.push(((x + y) % 2) as u8);
    }
  }
  let rgb = k_undither(&indexed, 8, 8, &palette, 2, 100, 0, false).unwrap();
  let mut moved = false;
  for pixel in rgb.chunks_exact(3) {
    assert!(pixel[0] >= 40 && pixel[0] <= 200);
    if pixel[0] != 40 && pixel[0] != 200 {
      moved = true;
    }
  }
  assert!(moved, "no blending happened at all");
}

/// With maximum edge strength the thresholds collapse and strong edges are
/// left untouched.
#[test]
fn hard_edge_survives_strong_gating() {
  // Left half black, right half white; the palette has a third entry at
  // the midpoint so the pair may not blend.
  let palette = vec![0u8, 0, 0, 255, 255, 255, 128, 128, 128];
  let mut indexed = Vec::new();
  for _y in 0..4 {
    for x in 0..8 {
      indexed.push(u8::from(x >= 4));
    }
  }
  let rgb = k_undither(&indexed, 8, 4, &palette, 3, 100, 1000, false).unwrap();
  for (pos, pixel) in rgb.chunks_exact(3).enumerate() {
    let want = if pos % 8 >= 4 { 255 } else { 0 };
    assert_eq!(pixel[0], want, "pixel {pos} moved");
  }
}

/// `k_undither+` is best effort: the refine stage may adjust values but
/// must keep a flat field flat within rounding.
#[test]
fn refine_keeps_flat_fields_flat() {
  let mut palette = vec![0u8; 3];
  palette.copy_from_slice(&[120, 120, 120]);
  let indexed = vec![0u8; 6 * 6];
  let rgb = dequantize(
    DequantizeMethod::KUnditherPlus,
    &indexed,
    6,
    6,
    &palette,
    1,
    100,
    0,
  )
  .unwrap();
  for &byte in rgb.iter() {
    assert!((i16::from(byte) - 120).abs() <= 1, "{byte}");
  }
}

/// Dispatch: the `None` method expands indices through the palette.
#[test]
fn dequantize_none_expands_the_palette() {
  let palette = [10u8, 11, 12, 20, 21, 22];
  let rgb =
    dequantize(DequantizeMethod::None, &[1, 0], 2, 1, &palette, 2, 100, 0).unwrap();
  assert_eq!(rgb, [20, 21, 22, 10, 11, 12]);
}

/// Boundary: bad inputs are rejected, not mangled.
#[test]
fn bad_inputs_are_rejected() {
  let palette = [0u8, 0, 0];
  assert_eq!(
    k_undither(&[0], 0, 1, &palette, 1, 100, 0, false),
    Err(SixelError::BadInput)
  );
  assert_eq!(
    k_undither(&[0], 1, 1, &palette, 0, 100, 0, false),
    Err(SixelError::BadInput)
  );
  assert_eq!(
    k_undither(&[0], 2, 2, &palette, 1, 100, 0, false),
    Err(SixelError::BadInput)
  );
}

/// Decoder options carry the reconstruction settings across the codec
/// boundary.
#[test]
fn decoder_options_drive_the_post_processing() {
  let raw = DecodedRaw {
    indices: vec![0, 1, 1, 0],
    width: 2,
    height: 2,
    palette: vec![5, 6, 7, 50, 60, 70],
    ncolors: 2,
  };
  let plain = DecoderOptions::default().post_process(&raw).unwrap();
  assert_eq!(plain.len(), 12);
  assert_eq!(&plain[0..3], &[5, 6, 7]);
  let smoothed = DecoderOptions {
    dequantize: DequantizeMethod::KUndither,
    ..DecoderOptions::default()
  }
  .post_process(&raw)
  .unwrap();
  assert_eq!(smoothed.len(), 12);
}

/// Out-of-range indices clamp to entry zero instead of panicking.
#[test]
fn out_of_range_indices_fall_back_to_entry_zero() {
  let palette = [33u8, 44, 55];
  let rgb = dequantize(DequantizeMethod::None, &[9, 0], 2, 1, &palette, 1, 100, 0)
    .unwrap();
  assert_eq!(rgb, [33, 44, 55, 33, 44, 55]);
}
