#![forbid(unsafe_code)]

//! The consumed resampler capability.
//!
//! Scaling itself lives outside this crate; [`Frame::resize`] only prepares
//! an RGB888 buffer and hands it to whatever [`Resampler`] the caller wires
//! in.
//!
//! [`Frame::resize`]: crate::Frame::resize

use crate::SixelResult;

/// Resampling filter selection passed through to the resampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResampleMethod {
  /// Nearest neighbor.
  #[default]
  Nearest,
  /// Bilinear filtering.
  Bilinear,
  /// Bicubic filtering.
  Bicubic,
  /// Lanczos windowed sinc, 2 lobes.
  Lanczos2,
  /// Lanczos windowed sinc, 3 lobes.
  Lanczos3,
  /// Lanczos windowed sinc, 4 lobes.
  Lanczos4,
}

/// An image scaler the frame layer can delegate to.
///
/// The core only ever invokes this on tightly packed RGB888 buffers:
/// `depth` is the bytes per pixel (3), `dst` is pre-sized to
/// `dst_w * dst_h * depth`.
pub trait Resampler {
  /// Scales `src` into `dst`.
  #[allow(clippy::too_many_arguments)]
  fn scale(
    &self, dst: &mut [u8], src: &[u8], src_w: usize, src_h: usize, depth: usize,
    dst_w: usize, dst_h: usize, method: ResampleMethod,
  ) -> SixelResult<()>;
}
