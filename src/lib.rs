#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! The color and output pipeline of a SIXEL graphics stack.
//!
//! SIXEL is DEC's terminal bitmap format: six vertical pixels per byte per
//! band, carried inside a DCS escape sequence. This crate owns everything
//! between "an RGB(A) frame" and "indexed pixels plus a palette", and the
//! inverse path from a quantized decode back toward a natural image:
//!
//! * [`Frame`] / [`PixelFormat`] / [`Colorspace`] — the pixel buffer
//!   contract, with in-place format and colorspace conversions, clipping,
//!   scaling, and alpha stripping.
//! * [`histogram`] — the sampled color histogram both solvers share.
//! * [`Palette`] — median-cut and k-means++ quantizers behind one
//!   configuration, ending in a shared final-merge stage (Ward linkage or
//!   hierarchical weighted k-means), environment-tunable.
//! * [`dither`] — error diffusion and ordered/pattern dithering onto a
//!   palette, with serpentine scan and palette minimization.
//! * [`undither`] / [`refine`] — `k_undither` post-decode reconstruction:
//!   palette-similarity-guided neighbor blending with an optional YCbCr
//!   bilateral/sharpen refinement.
//!
//! Wire parsing, file loaders, and scaling kernels stay outside; the
//! [`codec`] and [`resample`] traits pin down those boundaries.
//!
//! ## Library design assumptions
//!
//! Every operation runs to completion on the calling thread; there are no
//! background tasks. Long solver loops accept an [`AbortToken`] and return
//! [`SixelError::Interrupted`] when it fires. Process-wide state is limited
//! to published-once read-only tables (the sRGB and reversible-tone LUTs,
//! the environment snapshot) and the best-effort diagnostic buffer in
//! [`status`].

mod error;
pub use error::*;

mod abort;
pub use abort::AbortToken;

pub mod status;

mod pixel_formats;
pub use pixel_formats::*;

mod colorspace;
pub use colorspace::{
  convert_colorspace, linear_to_oklab, linear_to_srgb, oklab_to_linear,
  srgb_to_linear, Colorspace,
};

mod frame;
pub use frame::{Frame, HEIGHT_LIMIT, WIDTH_LIMIT};

pub mod resample;
pub use resample::{ResampleMethod, Resampler};

pub mod codec;

pub mod histogram;
pub use histogram::LutPolicy;

mod env;
pub use env::{palette_env, PaletteEnv};

pub mod reversible;

mod merge;
pub use merge::{FinalMergeCluster, FinalMergeMode};

mod mediancut;
mod kmeans;

mod palette;
pub use palette::{
  MethodForLargest, MethodForRep, Palette, QualityMode, QuantizeModel, PALETTE_MAX,
};

pub mod dither;
pub use dither::{DiffusionMethod, DitherConfig, ScanMethod};

pub mod undither;
pub use undither::DequantizeMethod;

pub mod refine;
