#![forbid(unsafe_code)]

//! Environment overrides for the palette pipeline.
//!
//! All `SIXEL_PALETTE_*` variables are read exactly once, clamped into
//! their documented ranges, and published as an immutable [`PaletteEnv`]
//! snapshot. Both quantizers and the final-merge stage borrow the same
//! snapshot, so a variable can never be observed with two different values
//! within one process.

use std::sync::OnceLock;

/// The tuning knobs the environment may override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaletteEnv {
  /// Oversplit multiplier for the final-merge stage, clamped to `[1, 3]`.
  pub oversplit_factor: f64,
  /// Post-merge Lloyd pass override; `None` keeps the per-mode default
  /// (3 for Ward, 0 for HK-means).
  pub final_merge_additional_lloyd: Option<u32>,
  /// HK-means iteration cap, clamped to `[1, 30]`.
  pub hkmeans_iter_max: u32,
  /// HK-means convergence threshold, clamped to `[0, 0.5]`.
  pub hkmeans_threshold: f64,
  /// k-means iteration cap, clamped to `[1, 30]`.
  pub kmeans_iter_max: u32,
  /// k-means convergence threshold, clamped to `[0, 0.5]`.
  pub kmeans_threshold: f64,
  /// Red luminance weight.
  pub lumin_factor_r: f64,
  /// Green luminance weight.
  pub lumin_factor_g: f64,
  /// Blue luminance weight, derived as `1 - r - g` when overridden.
  pub lumin_factor_b: f64,
}

impl Default for PaletteEnv {
  fn default() -> Self {
    Self {
      oversplit_factor: 1.81,
      final_merge_additional_lloyd: None,
      hkmeans_iter_max: 20,
      hkmeans_threshold: 0.125,
      kmeans_iter_max: 20,
      kmeans_threshold: 0.125,
      lumin_factor_r: 0.2989,
      lumin_factor_g: 0.5866,
      lumin_factor_b: 0.1145,
    }
  }
}

fn parse_f64(name: &str, min: f64, max: f64) -> Option<f64> {
  let value = std::env::var(name).ok()?;
  let parsed: f64 = value.trim().parse().ok()?;
  if !parsed.is_finite() {
    return None;
  }
  Some(parsed.clamp(min, max))
}

fn parse_u32(name: &str, min: i64, max: i64) -> Option<u32> {
  let value = std::env::var(name).ok()?;
  let parsed: i64 = value.trim().parse().ok()?;
  Some(parsed.clamp(min, max) as u32)
}

fn load() -> PaletteEnv {
  let mut env = PaletteEnv::default();
  if let Some(factor) = parse_f64("SIXEL_PALETTE_OVERSPLIT_FACTOR", 1.0, 3.0) {
    env.oversplit_factor = factor;
  }
  env.final_merge_additional_lloyd =
    parse_u32("SIXEL_PALETTE_FINAL_MERGE_ADDITIONAL_LLOYD_ITER_COUNT", 0, 30);
  if let Some(cap) = parse_u32("SIXEL_PALETTE_FINAL_MERGE_HKMEANS_ITER_COUNT_MAX", 1, 30)
  {
    env.hkmeans_iter_max = cap;
  }
  if let Some(threshold) =
    parse_f64("SIXEL_PALETTE_FINAL_MERGE_HKMEANS_THRESHOLD", 0.0, 0.5)
  {
    env.hkmeans_threshold = threshold;
  }
  if let Some(cap) = parse_u32("SIXEL_PALETTE_KMEANS_ITER_COUNT_MAX", 1, 30) {
    env.kmeans_iter_max = cap;
  }
  if let Some(threshold) = parse_f64("SIXEL_PALETTE_KMEANS_THRESHOLD", 0.0, 0.5) {
    env.kmeans_threshold = threshold;
  }
  let r = parse_f64("SIXEL_PALETTE_LUMIN_FACTOR_R", 0.0, 1.0);
  let g = parse_f64("SIXEL_PALETTE_LUMIN_FACTOR_G", 0.0, 1.0);
  if r.is_some() || g.is_some() {
    let candidate_r = r.unwrap_or(env.lumin_factor_r);
    let candidate_g = g.unwrap_or(env.lumin_factor_g);
    let candidate_b = 1.0 - candidate_r - candidate_g;
    // A combination whose blue weight would go negative is ignored whole.
    if candidate_b >= 0.0 {
      env.lumin_factor_r = candidate_r;
      env.lumin_factor_g = candidate_g;
      env.lumin_factor_b = candidate_b;
    }
  }
  env
}

/// The process-wide snapshot, loaded on first use.
pub fn palette_env() -> &'static PaletteEnv {
  static SNAPSHOT: OnceLock<PaletteEnv> = OnceLock::new();
  SNAPSHOT.get_or_init(load)
}
