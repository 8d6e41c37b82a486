#![forbid(unsafe_code)]

//! The frame: a pixel buffer plus the metadata that travels with it.
//!
//! A [`Frame`] owns its pixels and knows their [`PixelFormat`] and
//! [`Colorspace`]. All mutation goes through the scalar operations below
//! (`set_pixelformat`, `resize`, `clip`, `strip_alpha`), each of which
//! keeps the buffer-length invariant:
//!
//! ```txt
//! pixels.len() == width * height * pixelformat.bytes_per_pixel()
//! ```
//!
//! Animation metadata (delay, frame number, loop count) is carried for
//! multi-frame sources and is purely informational to this crate.

use bytemuck::{bytes_of, pod_read_unaligned};

use crate::{
  colorspace::convert_colorspace, pixel_formats::normalize, status, Colorspace,
  PixelFormat, ResampleMethod, Resampler, SixelError, SixelResult,
};

/// Largest width the pipeline will process.
pub const WIDTH_LIMIT: usize = 1_000_000;
/// Largest height the pipeline will process.
pub const HEIGHT_LIMIT: usize = 1_000_000;

/// An owned image frame.
#[derive(Debug, Clone, Default)]
pub struct Frame {
  width: usize,
  height: usize,
  pixelformat: PixelFormat,
  colorspace: Colorspace,
  pixels: Vec<u8>,
  palette: Option<Vec<u8>>,
  ncolors: usize,
  transparent: i32,
  delay: i32,
  frame_no: i32,
  loop_count: i32,
  multiframe: bool,
}

fn check_dimensions(width: usize, height: usize) -> SixelResult<()> {
  if width == 0 || width > WIDTH_LIMIT {
    status::set_additional_message("frame: width is zero or above the limit.");
    return Err(SixelError::BadInput);
  }
  if height == 0 || height > HEIGHT_LIMIT {
    status::set_additional_message("frame: height is zero or above the limit.");
    return Err(SixelError::BadInput);
  }
  Ok(())
}

impl Frame {
  /// Makes an empty, zero-dimension frame.
  #[inline]
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Initializes the frame with a pixel buffer.
  ///
  /// The buffer is stored as-is; conversions happen lazily when an
  /// operation needs another form. An oversized buffer is truncated to the
  /// exact length the format requires.
  ///
  /// ## Failure
  /// * `BadInput` if a dimension is zero or above the limit, the buffer is
  ///   shorter than the format requires, or a palette-indexed format comes
  ///   without a palette.
  pub fn init(
    &mut self, mut pixels: Vec<u8>, width: usize, height: usize,
    pixelformat: PixelFormat, palette: Option<Vec<u8>>, ncolors: usize,
  ) -> SixelResult<()> {
    check_dimensions(width, height)?;
    match (&palette, pixelformat.is_palette()) {
      (None, true) => {
        status::set_additional_message("frame: palette format without a palette.");
        return Err(SixelError::BadInput);
      }
      (Some(entries), true) => {
        if entries.len() < ncolors * 3 {
          status::set_additional_message("frame: palette shorter than ncolors * 3.");
          return Err(SixelError::BadInput);
        }
      }
      _ => (),
    }
    let expected = match pixelformat.bits_per_pixel() {
      bits @ (1 | 2 | 4) => (width * bits + 7) / 8 * height,
      _ => width * height * pixelformat.bytes_per_pixel(),
    };
    if pixels.len() < expected {
      status::set_additional_message("frame: pixel buffer shorter than the format.");
      return Err(SixelError::BadInput);
    }
    pixels.truncate(expected);
    self.width = width;
    self.height = height;
    self.pixelformat = pixelformat;
    self.colorspace = pixelformat.colorspace();
    self.pixels = pixels;
    self.palette = if pixelformat.is_palette() { palette } else { None };
    self.ncolors = if pixelformat.is_palette() { ncolors } else { 0 };
    Ok(())
  }

  /// Image width in pixels.
  #[inline]
  #[must_use]
  pub fn width(&self) -> usize {
    self.width
  }

  /// Image height in pixels.
  #[inline]
  #[must_use]
  pub fn height(&self) -> usize {
    self.height
  }

  /// Current storage format of the pixels.
  #[inline]
  #[must_use]
  pub fn pixelformat(&self) -> PixelFormat {
    self.pixelformat
  }

  /// Current colorspace of the pixels.
  #[inline]
  #[must_use]
  pub fn colorspace(&self) -> Colorspace {
    self.colorspace
  }

  /// Borrow of the raw pixel bytes.
  #[inline]
  #[must_use]
  pub fn pixels(&self) -> &[u8] {
    &self.pixels
  }

  /// Borrow of the palette, when the frame is palette-indexed.
  #[inline]
  #[must_use]
  pub fn palette(&self) -> Option<&[u8]> {
    self.palette.as_deref()
  }

  /// Number of palette entries.
  #[inline]
  #[must_use]
  pub fn ncolors(&self) -> usize {
    self.ncolors
  }

  /// Palette slot rendered as transparent, `-1` for none.
  #[inline]
  #[must_use]
  pub fn transparent(&self) -> i32 {
    self.transparent
  }

  /// Sets the transparent palette slot (`-1` for none).
  #[inline]
  pub fn set_transparent(&mut self, transparent: i32) {
    self.transparent = transparent;
  }

  /// Frame delay in the source's time base.
  #[inline]
  #[must_use]
  pub fn delay(&self) -> i32 {
    self.delay
  }

  /// Sets the frame delay.
  #[inline]
  pub fn set_delay(&mut self, delay: i32) {
    self.delay = delay;
  }

  /// Index of this frame within a multi-frame source.
  #[inline]
  #[must_use]
  pub fn frame_no(&self) -> i32 {
    self.frame_no
  }

  /// Sets the frame index.
  #[inline]
  pub fn set_frame_no(&mut self, frame_no: i32) {
    self.frame_no = frame_no;
  }

  /// Loop count of the source animation.
  #[inline]
  #[must_use]
  pub fn loop_count(&self) -> i32 {
    self.loop_count
  }

  /// Sets the loop count.
  #[inline]
  pub fn set_loop_count(&mut self, loop_count: i32) {
    self.loop_count = loop_count;
  }

  /// Whether the source had more than one frame.
  #[inline]
  #[must_use]
  pub fn multiframe(&self) -> bool {
    self.multiframe
  }

  /// Marks the frame as part of a multi-frame source.
  #[inline]
  pub fn set_multiframe(&mut self, multiframe: bool) {
    self.multiframe = multiframe;
  }

  /// Converts the pixels to another storage format, in place.
  ///
  /// Setting the format the frame already has is a no-op. Otherwise the
  /// conversion composes up to three steps: normalize away palette/packed
  /// storage, promote to float32 if the target is a float form, and run the
  /// colorspace conversion when the source and target tags differ.
  ///
  /// Supported targets are `RGB888`, the three float32 forms, and (for
  /// frames that are already palette-indexed) the palette forms.
  ///
  /// ## Failure
  /// * `BadInput` for a palette frame without palette data.
  /// * `FeatureError` for target formats with no conversion path.
  pub fn set_pixelformat(&mut self, pixelformat: PixelFormat) -> SixelResult<()> {
    if pixelformat == self.pixelformat {
      return Ok(());
    }
    if self.pixels.is_empty() {
      self.pixelformat = pixelformat;
      self.colorspace = pixelformat.colorspace();
      return Ok(());
    }
    if pixelformat.is_palette() {
      if !self.pixelformat.is_palette() {
        status::set_additional_message(
          "frame: cannot convert direct color back to a palette form.",
        );
        return Err(SixelError::FeatureError);
      }
      self.canonicalize()?;
      return Ok(());
    }
    match pixelformat {
      PixelFormat::RGB888 => self.convert_to_rgb888()?,
      PixelFormat::RGBFLOAT32
      | PixelFormat::LINEARRGBFLOAT32
      | PixelFormat::OKLABFLOAT32 => {
        if self.pixelformat.is_palette() {
          self.convert_to_rgb888()?;
        }
        if !self.pixelformat.is_float() {
          self.promote_to_float()?;
        }
        let target_colorspace = pixelformat.colorspace();
        if target_colorspace != self.colorspace {
          convert_colorspace(
            &mut self.pixels,
            self.pixelformat,
            self.colorspace,
            target_colorspace,
          )?;
        }
        self.pixelformat = pixelformat;
        self.colorspace = target_colorspace;
      }
      _ => {
        status::set_additional_message("frame: unsupported target pixel format.");
        return Err(SixelError::FeatureError);
      }
    }
    Ok(())
  }

  /// Scales the frame with the supplied resampler.
  ///
  /// The frame is forced to `RGB888` first; the resampler only ever sees
  /// tightly packed RGB bytes.
  ///
  /// ## Failure
  /// * `BadInput` for out-of-range target dimensions.
  /// * whatever the resampler returns, unchanged.
  pub fn resize(
    &mut self, width: usize, height: usize, method: ResampleMethod,
    resampler: &dyn Resampler,
  ) -> SixelResult<()> {
    check_dimensions(width, height)?;
    if width == self.width && height == self.height {
      return Ok(());
    }
    self.convert_to_rgb888()?;
    let mut scaled = Vec::new();
    scaled.try_reserve_exact(width * height * 3)?;
    scaled.resize(width * height * 3, 0);
    resampler.scale(
      &mut scaled,
      &self.pixels,
      self.width,
      self.height,
      3,
      width,
      height,
      method,
    )?;
    self.pixels = scaled;
    self.width = width;
    self.height = height;
    Ok(())
  }

  /// Crops the frame to the rectangle `(x, y, width, height)`, in place.
  ///
  /// ## Failure
  /// * `BadInput` when the rectangle is empty, over the limits, or not
  ///   contained in the frame.
  /// * `BadArgument` for pixel formats the in-place crop cannot handle.
  pub fn clip(
    &mut self, x: usize, y: usize, width: usize, height: usize,
  ) -> SixelResult<()> {
    check_dimensions(width, height)?;
    if x + width > self.width || y + height > self.height {
      status::set_additional_message("frame: clip rectangle outside the frame.");
      return Err(SixelError::BadInput);
    }
    // Sub-byte packed forms widen before the row moves so every pixel is
    // byte addressable.
    if matches!(
      self.pixelformat,
      PixelFormat::PAL1
        | PixelFormat::PAL2
        | PixelFormat::PAL4
        | PixelFormat::G1
        | PixelFormat::G2
        | PixelFormat::G4
    ) {
      self.canonicalize()?;
    }
    match self.pixelformat {
      PixelFormat::PAL8
      | PixelFormat::G8
      | PixelFormat::RGB888
      | PixelFormat::RGBFLOAT32 => (),
      _ => {
        status::set_additional_message("frame: pixel format not supported by clip.");
        return Err(SixelError::BadArgument);
      }
    }
    let depth = self.pixelformat.bytes_per_pixel();
    let src_stride = self.width * depth;
    let dst_stride = width * depth;
    for row in 0..height {
      let src_start = (y + row) * src_stride + x * depth;
      self.pixels.copy_within(src_start..src_start + dst_stride, row * dst_stride);
    }
    self.pixels.truncate(height * dst_stride);
    self.width = width;
    self.height = height;
    Ok(())
  }

  /// Removes the alpha channel, leaving `RGB888`.
  ///
  /// With a background color, each channel is blended as
  /// `(in * a + bg * (255 - a)) >> 8`; without one the alpha bytes are
  /// simply dropped. Formats without alpha are left untouched.
  pub fn strip_alpha(&mut self, bgcolor: Option<[u8; 3]>) -> SixelResult<()> {
    if !self.pixelformat.has_alpha() {
      return Ok(());
    }
    let Some((r_off, g_off, b_off, Some(a_off))) = self.pixelformat.channel_order()
    else {
      // GA88/AG88 route through the normalizer, which drops alpha itself.
      self.convert_to_rgb888()?;
      return Ok(());
    };
    let mut out = Vec::new();
    out.try_reserve_exact(self.width * self.height * 3)?;
    match bgcolor {
      Some(bg) => {
        for pixel in self.pixels.chunks_exact(4) {
          let a = u32::from(pixel[a_off]);
          for (channel, bg_channel) in [pixel[r_off], pixel[g_off], pixel[b_off]]
            .into_iter()
            .zip(bg)
          {
            let blended =
              (u32::from(channel) * a + u32::from(bg_channel) * (0xff - a)) >> 8;
            out.push(blended as u8);
          }
        }
      }
      None => {
        for pixel in self.pixels.chunks_exact(4) {
          out.push(pixel[r_off]);
          out.push(pixel[g_off]);
          out.push(pixel[b_off]);
        }
      }
    }
    self.pixels = out;
    self.pixelformat = PixelFormat::RGB888;
    self.colorspace = Colorspace::Gamma;
    Ok(())
  }

  /// Rewrites the buffer into its canonical form (`PAL8`, `G8`, `RGB888`,
  /// or an unchanged float form).
  fn canonicalize(&mut self) -> SixelResult<()> {
    if self.pixelformat.normalized() == self.pixelformat {
      return Ok(());
    }
    let (converted, format) =
      normalize(&self.pixels, self.pixelformat, self.width, self.height)?;
    self.pixels = converted;
    self.pixelformat = format;
    if !format.is_float() {
      self.colorspace = Colorspace::Gamma;
    }
    Ok(())
  }

  /// Flattens the frame to gamma `RGB888`, whatever it currently holds.
  fn convert_to_rgb888(&mut self) -> SixelResult<()> {
    self.canonicalize()?;
    match self.pixelformat {
      PixelFormat::RGB888 => Ok(()),
      PixelFormat::PAL8 => {
        let palette = self.palette.as_deref().ok_or_else(|| {
          status::set_additional_message("frame: palette data is missing.");
          SixelError::BadInput
        })?;
        let mut out = Vec::new();
        out.try_reserve_exact(self.width * self.height * 3)?;
        for &index in self.pixels.iter() {
          let base = usize::from(index) * 3;
          match palette.get(base..base + 3) {
            Some(rgb) => out.extend_from_slice(rgb),
            None => out.extend_from_slice(&[0, 0, 0]),
          }
        }
        self.pixels = out;
        self.pixelformat = PixelFormat::RGB888;
        Ok(())
      }
      PixelFormat::G8 => {
        let mut out = Vec::new();
        out.try_reserve_exact(self.width * self.height * 3)?;
        for &gray in self.pixels.iter() {
          out.extend_from_slice(&[gray, gray, gray]);
        }
        self.pixels = out;
        self.pixelformat = PixelFormat::RGB888;
        Ok(())
      }
      PixelFormat::RGBFLOAT32
      | PixelFormat::LINEARRGBFLOAT32
      | PixelFormat::OKLABFLOAT32 => {
        convert_colorspace(
          &mut self.pixels,
          self.pixelformat,
          self.colorspace,
          Colorspace::Gamma,
        )?;
        let mut out = Vec::new();
        out.try_reserve_exact(self.width * self.height * 3)?;
        for chunk in self.pixels.chunks_exact(4) {
          let value = pod_read_unaligned::<f32>(chunk);
          out.push((value.clamp(0.0, 1.0) * 255.0 + 0.5) as u8);
        }
        self.pixels = out;
        self.pixelformat = PixelFormat::RGB888;
        self.colorspace = Colorspace::Gamma;
        Ok(())
      }
      _ => {
        status::set_additional_message("frame: canonicalization left an odd format.");
        Err(SixelError::LogicError)
      }
    }
  }

  /// Widens gamma `RGB888` bytes into `RGBFLOAT32` in 0.0 to 1.0.
  fn promote_to_float(&mut self) -> SixelResult<()> {
    self.convert_to_rgb888()?;
    let mut out = Vec::new();
    out.try_reserve_exact(self.pixels.len() * 4)?;
    for &byte in self.pixels.iter() {
      let value = f32::from(byte) / 255.0;
      out.extend_from_slice(bytes_of(&value));
    }
    self.pixels = out;
    self.pixelformat = PixelFormat::RGBFLOAT32;
    self.colorspace = Colorspace::Gamma;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rgb_frame(width: usize, height: usize, pixels: &[u8]) -> Frame {
    let mut frame = Frame::new();
    frame
      .init(pixels.to_vec(), width, height, PixelFormat::RGB888, None, 0)
      .unwrap();
    frame
  }

  #[test]
  fn init_rejects_bad_dimensions() {
    let mut frame = Frame::new();
    let r = frame.init(vec![0; 3], 0, 1, PixelFormat::RGB888, None, 0);
    assert_eq!(r, Err(SixelError::BadInput));
    let r = frame.init(vec![0; 3], WIDTH_LIMIT + 1, 1, PixelFormat::RGB888, None, 0);
    assert_eq!(r, Err(SixelError::BadInput));
  }

  #[test]
  fn init_requires_palette_for_palette_formats() {
    let mut frame = Frame::new();
    let r = frame.init(vec![0; 4], 2, 2, PixelFormat::PAL8, None, 0);
    assert_eq!(r, Err(SixelError::BadInput));
  }

  #[test]
  fn set_pixelformat_is_idempotent() {
    let mut frame = rgb_frame(2, 1, &[1, 2, 3, 4, 5, 6]);
    frame.set_pixelformat(PixelFormat::RGBFLOAT32).unwrap();
    let snapshot = frame.pixels().to_vec();
    frame.set_pixelformat(PixelFormat::RGBFLOAT32).unwrap();
    assert_eq!(frame.pixels(), &snapshot[..]);
  }

  #[test]
  fn float_round_trip_preserves_bytes() {
    let source = [0u8, 1, 2, 64, 128, 200, 254, 255, 33];
    let mut frame = rgb_frame(3, 1, &source);
    frame.set_pixelformat(PixelFormat::LINEARRGBFLOAT32).unwrap();
    assert_eq!(frame.colorspace(), Colorspace::Linear);
    frame.set_pixelformat(PixelFormat::RGB888).unwrap();
    for (got, want) in frame.pixels().iter().zip(source.iter()) {
      assert!(
        (i16::from(*got) - i16::from(*want)).abs() <= 1,
        "{got} vs {want}"
      );
    }
  }

  #[test]
  fn clip_extracts_the_rectangle() {
    #[rustfmt::skip]
    let pixels = [
      0, 0, 0,  1, 1, 1,  2, 2, 2,
      3, 3, 3,  4, 4, 4,  5, 5, 5,
      6, 6, 6,  7, 7, 7,  8, 8, 8,
    ];
    let mut frame = rgb_frame(3, 3, &pixels);
    frame.clip(1, 1, 2, 2).unwrap();
    assert_eq!(frame.width(), 2);
    assert_eq!(frame.height(), 2);
    assert_eq!(frame.pixels(), &[4, 4, 4, 5, 5, 5, 7, 7, 7, 8, 8, 8]);
  }

  #[test]
  fn strip_alpha_discards_when_no_background() {
    let mut frame = Frame::new();
    frame
      .init(
        vec![10, 20, 30, 200, 40, 50, 60, 100],
        2,
        1,
        PixelFormat::RGBA8888,
        None,
        0,
      )
      .unwrap();
    frame.strip_alpha(None).unwrap();
    assert_eq!(frame.pixelformat(), PixelFormat::RGB888);
    assert_eq!(frame.pixels(), &[10, 20, 30, 40, 50, 60]);
  }

  #[test]
  fn strip_alpha_blends_against_background() {
    let mut frame = Frame::new();
    frame.init(vec![255, 10, 20, 30], 1, 1, PixelFormat::ARGB8888, None, 0).unwrap();
    frame.strip_alpha(Some([0, 0, 0])).unwrap();
    // alpha 255: (v * 255) >> 8 == v - 1 for v > 0 under the blend math.
    assert_eq!(frame.pixels(), &[9, 19, 29]);
  }

  #[test]
  fn palette_frame_flattens_through_its_palette() {
    let mut frame = Frame::new();
    frame
      .init(
        vec![0b01_10_00_11],
        4,
        1,
        PixelFormat::PAL2,
        Some(vec![0, 0, 0, 10, 10, 10, 20, 20, 20, 30, 30, 30]),
        4,
      )
      .unwrap();
    frame.set_pixelformat(PixelFormat::RGB888).unwrap();
    assert_eq!(
      frame.pixels(),
      &[10, 10, 10, 20, 20, 20, 0, 0, 0, 30, 30, 30]
    );
  }
}
