#![forbid(unsafe_code)]

//! The consumed raw-codec boundary.
//!
//! Parsing and emitting the SIXEL escape-sequence wire format is not this
//! crate's job. These traits pin down the shape of the collaborator that
//! does: a decoder hands the color pipeline indexed pixels plus a palette,
//! and the encoder-emitter consumes the same pair after quantization.

use crate::{undither, DequantizeMethod, SixelResult};

/// Decoder-side configuration handed across the codec boundary.
///
/// The wire decoder itself consumes none of this; it exists so callers can
/// carry one value from argument parsing down to the post-processing
/// stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
  /// Reconstruction applied after the raw decode.
  pub dequantize: DequantizeMethod,
  /// Similarity bias percentage for `k_undither`, 0 to 1000.
  pub similarity_bias: i32,
  /// Edge gate strength percentage for `k_undither`, 0 disables the gate.
  pub edge_strength: i32,
  /// Longest-side target for thumbnail output; 0 keeps the full size.
  pub thumbnail_size: usize,
}

impl Default for DecoderOptions {
  fn default() -> Self {
    Self {
      dequantize: DequantizeMethod::None,
      similarity_bias: 100,
      edge_strength: 0,
      thumbnail_size: 0,
    }
  }
}

impl DecoderOptions {
  /// Runs the configured reconstruction over a raw decode result.
  pub fn post_process(&self, raw: &DecodedRaw) -> SixelResult<Vec<u8>> {
    undither::dequantize(
      self.dequantize,
      &raw.indices,
      raw.width,
      raw.height,
      &raw.palette,
      raw.ncolors,
      self.similarity_bias,
      self.edge_strength,
    )
  }
}

/// The output of a raw SIXEL decode: indexed pixels plus their palette.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedRaw {
  /// One palette index per pixel, row major.
  pub indices: Vec<u8>,
  /// Image width in pixels.
  pub width: usize,
  /// Image height in pixels.
  pub height: usize,
  /// `ncolors * 3` bytes, R then G then B.
  pub palette: Vec<u8>,
  /// Number of palette entries.
  pub ncolors: usize,
}

/// A raw SIXEL wire codec.
pub trait RawCodec {
  /// Decodes SIXEL bytes into indexed pixels and a palette.
  fn decode_raw(&self, bytes: &[u8]) -> SixelResult<DecodedRaw>;

  /// Decodes SIXEL bytes straight to RGBA8888, resolving the palette.
  fn decode_direct(&self, bytes: &[u8]) -> SixelResult<(Vec<u8>, usize, usize)>;

  /// Encodes indexed pixels plus a palette into SIXEL bytes.
  fn encode(
    &self, indices: &[u8], width: usize, height: usize, palette: &[u8], ncolors: usize,
  ) -> SixelResult<Vec<u8>>;
}
