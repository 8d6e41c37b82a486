use sixel_color::{
  convert_colorspace, Colorspace, Frame, PixelFormat, ResampleMethod, Resampler,
  SixelError, SixelResult, HEIGHT_LIMIT, WIDTH_LIMIT,
};

fn rgb_frame(width: usize, height: usize, pixels: Vec<u8>) -> Frame {
  let mut frame = Frame::new();
  frame.init(pixels, width, height, PixelFormat::RGB888, None, 0).unwrap();
  frame
}

/// Boundary: zero or over-limit dimensions are rejected everywhere.
#[test]
fn dimension_limits_are_enforced() {
  let mut frame = Frame::new();
  for (w, h) in [(0usize, 4usize), (4, 0), (WIDTH_LIMIT + 1, 1), (1, HEIGHT_LIMIT + 1)]
  {
    let r = frame.init(vec![0; 16], w, h, PixelFormat::RGB888, None, 0);
    assert_eq!(r, Err(SixelError::BadInput), "({w}, {h})");
  }
  let mut frame = rgb_frame(2, 2, vec![0; 12]);
  assert_eq!(frame.clip(0, 0, 0, 1), Err(SixelError::BadInput));
  assert_eq!(frame.clip(0, 0, 3, 1), Err(SixelError::BadInput));
}

/// Invariant: format conversion is idempotent once the format matches.
#[test]
fn set_pixelformat_twice_is_a_no_op() {
  let mut frame = rgb_frame(2, 2, vec![7, 20, 90, 120, 9, 33, 250, 128, 0, 1, 2, 3]);
  frame.set_pixelformat(PixelFormat::OKLABFLOAT32).unwrap();
  let snapshot = frame.pixels().to_vec();
  frame.set_pixelformat(PixelFormat::OKLABFLOAT32).unwrap();
  assert_eq!(frame.pixels(), &snapshot[..]);
  assert_eq!(frame.colorspace(), Colorspace::Oklab);
}

/// Round trip: stripping alpha without a background keeps the RGB bytes.
#[test]
fn strip_alpha_preserves_rgb_channels() {
  let mut frame = Frame::new();
  let pixels = vec![
    1u8, 2, 3, 77, //
    200, 100, 50, 0, //
    9, 8, 7, 255,
  ];
  frame.init(pixels, 3, 1, PixelFormat::RGBA8888, None, 0).unwrap();
  frame.strip_alpha(None).unwrap();
  assert_eq!(frame.pixelformat(), PixelFormat::RGB888);
  assert_eq!(frame.pixels(), &[1, 2, 3, 200, 100, 50, 9, 8, 7]);
}

/// Round trip: every colorspace pair recovers the original bytes within
/// one least-significant bit.
#[test]
fn colorspace_round_trips_within_one_lsb() {
  let spaces =
    [Colorspace::Gamma, Colorspace::Linear, Colorspace::Oklab];
  // A strided sweep of the cube plus the exact endpoints.
  let mut samples: Vec<[u8; 3]> = Vec::new();
  for r in (0u16..256).step_by(17) {
    for g in (0u16..256).step_by(17) {
      for b in (0u16..256).step_by(17) {
        samples.push([r as u8, g as u8, b as u8]);
      }
    }
  }
  samples.push([255, 255, 255]);
  samples.push([0, 0, 0]);
  samples.push([255, 0, 255]);

  for &a in spaces.iter() {
    for &b in spaces.iter() {
      let mut buffer = Vec::with_capacity(samples.len() * 12);
      for rgb in samples.iter() {
        for &channel in rgb {
          buffer.extend_from_slice(&(f32::from(channel) / 255.0).to_ne_bytes());
        }
      }
      // The buffer always starts gamma encoded; route it a -> b -> a and
      // back to gamma for comparison.
      convert_colorspace(&mut buffer, PixelFormat::RGBFLOAT32, Colorspace::Gamma, a)
        .unwrap();
      convert_colorspace(&mut buffer, PixelFormat::float_format_for(a), a, b).unwrap();
      convert_colorspace(&mut buffer, PixelFormat::float_format_for(b), b, a).unwrap();
      convert_colorspace(
        &mut buffer,
        PixelFormat::float_format_for(a),
        a,
        Colorspace::Gamma,
      )
      .unwrap();
      for (i, rgb) in samples.iter().enumerate() {
        for (c, &want) in rgb.iter().enumerate() {
          let offset = (i * 3 + c) * 4;
          let value =
            f32::from_ne_bytes(buffer[offset..offset + 4].try_into().unwrap());
          let got = (value.clamp(0.0, 1.0) * 255.0 + 0.5) as i32;
          assert!(
            (got - i32::from(want)).abs() <= 1,
            "{a:?} -> {b:?} channel {c}: {got} vs {want}"
          );
        }
      }
    }
  }
}

/// A stub resampler proving the frame side of the scale contract: RGB888
/// input, pre-sized output.
struct NearestStub;

impl Resampler for NearestStub {
  fn scale(
    &self, dst: &mut [u8], src: &[u8], src_w: usize, src_h: usize, depth: usize,
    dst_w: usize, dst_h: usize, _method: ResampleMethod,
  ) -> SixelResult<()> {
    assert_eq!(depth, 3);
    for y in 0..dst_h {
      let sy = y * src_h / dst_h;
      for x in 0..dst_w {
        let sx = x * src_w / dst_w;
        let s = (sy * src_w + sx) * depth;
        let d = (y * dst_w + x) * depth;
        dst[d..d + depth].copy_from_slice(&src[s..s + depth]);
      }
    }
    Ok(())
  }
}

#[test]
fn resize_goes_through_the_resampler() {
  let mut frame = rgb_frame(2, 1, vec![10, 10, 10, 200, 200, 200]);
  frame.resize(4, 1, ResampleMethod::Nearest, &NearestStub).unwrap();
  assert_eq!(frame.width(), 4);
  assert_eq!(
    frame.pixels(),
    &[10, 10, 10, 10, 10, 10, 200, 200, 200, 200, 200, 200]
  );
}

#[test]
fn clip_normalizes_sub_byte_formats_first() {
  let mut frame = Frame::new();
  // 8x1 single-bit gray: 1010_1010.
  frame.init(vec![0b1010_1010], 8, 1, PixelFormat::G1, None, 0).unwrap();
  frame.clip(1, 0, 4, 1).unwrap();
  assert_eq!(frame.pixelformat(), PixelFormat::G8);
  assert_eq!(frame.pixels(), &[0, 255, 0, 255]);
}
