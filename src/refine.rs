#![forbid(unsafe_code)]

//! The best-effort refine stage behind `k_undither+`.
//!
//! The undithered RGB image moves into linear light through the shared
//! 256-entry LUTs, splits into YCbCr, and the luma plane runs a small
//! pipeline: a gradient-gated bilateral smoothing, then two rounds of
//! gaussian smooth, gate-blend, ReLU, and a weak sharpen, applied with
//! decreasing strength. Chroma passes through untouched, which keeps the
//! stage from shifting hue. The result re-encodes to sRGB through the
//! encode LUT.
//!
//! This stage is deliberately fallible-but-silent: if scratch buffers
//! cannot be allocated the input is simply left as it was, because a
//! slightly noisier image beats a failed decode.

use crate::colorspace::{linear_to_srgb_lut, srgb_to_linear_lut};

const GAUSSIAN_3X3: [f32; 9] = [
  0.0625, 0.1250, 0.0625, //
  0.1250, 0.2500, 0.1250, //
  0.0625, 0.1250, 0.0625,
];

const WEAK_SHARPEN_3X3: [f32; 9] = [
  -0.0625, -0.0625, -0.0625, //
  -0.0625, 1.5000, -0.0625, //
  -0.0625, -0.0625, -0.0625,
];

const SOBEL_GX: [f32; 9] = [
  -1.0, 0.0, 1.0, //
  -2.0, 0.0, 2.0, //
  -1.0, 0.0, 1.0,
];

const SOBEL_GY: [f32; 9] = [
  -1.0, -2.0, -1.0, //
  0.0, 0.0, 0.0, //
  1.0, 2.0, 1.0,
];

/// Range-kernel sigma of the bilateral pass, in linear-light units.
const SIGMA_R: f32 = 10.0;
/// Blend of the bilateral result against the original luma.
const BETA: f32 = 0.25;
/// Sharpen strengths for the two refinement rounds.
const ALPHA_1: f32 = 0.60;
const ALPHA_2: f32 = 0.40;
/// Gate attenuation for the smooth-blend steps.
const SMOOTH_GATE_SCALE: f32 = 0.96;

/// 3x3 convolution with clamped borders.
fn convolve3x3(kernel: &[f32; 9], dst: &mut [f32], src: &[f32], width: usize,
  height: usize) {
  for y in 0..height {
    for x in 0..width {
      let mut sum = 0.0f32;
      for ky in -1i32..=1 {
        let sy = (y as i32 + ky).clamp(0, height as i32 - 1) as usize;
        for kx in -1i32..=1 {
          let sx = (x as i32 + kx).clamp(0, width as i32 - 1) as usize;
          let kernel_index = ((ky + 1) * 3 + (kx + 1)) as usize;
          sum += src[sy * width + sx] * kernel[kernel_index];
        }
      }
      dst[y * width + x] = sum;
    }
  }
}

fn apply_relu(buffer: &mut [f32]) {
  for value in buffer.iter_mut() {
    if *value < 0.0 {
      *value = 0.0;
    }
  }
}

#[inline]
fn linear_to_srgb_byte(value: f32) -> u8 {
  let index = (value.clamp(0.0, 255.0) + 0.5) as usize;
  linear_to_srgb_lut()[index.min(255)]
}

fn try_buffer(len: usize) -> Option<Vec<f32>> {
  let mut buffer = Vec::new();
  buffer.try_reserve_exact(len).ok()?;
  buffer.resize(len, 0.0f32);
  Some(buffer)
}

/// Refines `rgb` in place; silently returns on empty input or allocation
/// failure.
///
/// `mask`, when given, is a per-pixel detail map in 0.0..1.0 that replaces
/// the Sobel gradient gate (1.0 = full detail, keep untouched).
pub fn post_undither_refine(
  rgb: &mut [u8], width: usize, height: usize, mask: Option<&[f32]>,
) {
  if width == 0 || height == 0 {
    return;
  }
  let num_pixels = width * height;
  if rgb.len() < num_pixels * 3 {
    return;
  }

  let Some(mut luma) = try_buffer(num_pixels) else { return };
  let Some(mut cb) = try_buffer(num_pixels) else { return };
  let Some(mut cr) = try_buffer(num_pixels) else { return };
  let Some(mut work0) = try_buffer(num_pixels) else { return };
  let Some(mut work1) = try_buffer(num_pixels) else { return };
  let Some(mut gate) = try_buffer(num_pixels) else { return };

  let decode = srgb_to_linear_lut();
  for i in 0..num_pixels {
    let base = i * 3;
    let r_lin = decode[usize::from(rgb[base])];
    let g_lin = decode[usize::from(rgb[base + 1])];
    let b_lin = decode[usize::from(rgb[base + 2])];
    let y_value = 0.2990 * r_lin + 0.5870 * g_lin + 0.1140 * b_lin;
    luma[i] = y_value;
    cb[i] = (b_lin - y_value) * 0.564383;
    cr[i] = (r_lin - y_value) * 0.713272;
  }

  match mask {
    Some(mask) if mask.len() >= num_pixels => {
      for i in 0..num_pixels {
        gate[i] = (1.0 - mask[i].clamp(0.0, 1.0)).max(0.0);
      }
    }
    _ => {
      let Some(mut gradient) = try_buffer(num_pixels) else { return };
      let mut max_grad = 0.0f32;
      for y in 0..height {
        for x in 0..width {
          let mut gx = 0.0f32;
          let mut gy = 0.0f32;
          for ky in -1i32..=1 {
            let sy = (y as i32 + ky).clamp(0, height as i32 - 1) as usize;
            for kx in -1i32..=1 {
              let sx = (x as i32 + kx).clamp(0, width as i32 - 1) as usize;
              let kernel_index = ((ky + 1) * 3 + (kx + 1)) as usize;
              let neighbor = luma[sy * width + sx];
              gx += neighbor * SOBEL_GX[kernel_index];
              gy += neighbor * SOBEL_GY[kernel_index];
            }
          }
          let magnitude = (gx * gx + gy * gy).sqrt();
          gradient[y * width + x] = magnitude;
          if magnitude > max_grad {
            max_grad = magnitude;
          }
        }
      }
      if max_grad <= 0.0 {
        max_grad = 1.0;
      }
      for i in 0..num_pixels {
        let value = (gradient[i] / max_grad).clamp(0.0, 1.0);
        gate[i] = 1.0 - value;
      }
    }
  }

  // Bilateral-ish smoothing of luma: gaussian in space, gaussian in range,
  // gated so edges keep their own weight.
  let inv_sigma_r2 = 1.0 / (2.0 * SIGMA_R * SIGMA_R);
  for y in 0..height {
    for x in 0..width {
      let idx = y * width + x;
      let center = luma[idx];
      let gate_value = gate[idx];
      let mut sum = 0.0f32;
      let mut weight_sum = 0.0f32;
      for ky in -1i32..=1 {
        let sy = (y as i32 + ky).clamp(0, height as i32 - 1) as usize;
        for kx in -1i32..=1 {
          let sx = (x as i32 + kx).clamp(0, width as i32 - 1) as usize;
          let kernel_index = ((ky + 1) * 3 + (kx + 1)) as usize;
          let gaussian_weight = GAUSSIAN_3X3[kernel_index];
          let neighbor = luma[sy * width + sx];
          let weight = if kx == 0 && ky == 0 {
            gaussian_weight
          } else {
            let diff = neighbor - center;
            gaussian_weight * gate_value * (-(diff * diff) * inv_sigma_r2).exp()
          };
          sum += neighbor * weight;
          weight_sum += weight;
        }
      }
      work0[idx] = if weight_sum <= 0.0 { center } else { sum / weight_sum };
    }
  }
  for i in 0..num_pixels {
    luma[i] = (1.0 - BETA) * luma[i] + BETA * work0[i];
  }

  for alpha in [ALPHA_1, ALPHA_2] {
    convolve3x3(&GAUSSIAN_3X3, &mut work0, &luma, width, height);
    for i in 0..num_pixels {
      let gate_value = gate[i] * SMOOTH_GATE_SCALE;
      work0[i] = gate_value * work0[i] + (1.0 - gate_value) * luma[i];
    }
    apply_relu(&mut work0);
    convolve3x3(&WEAK_SHARPEN_3X3, &mut work1, &work0, width, height);
    for i in 0..num_pixels {
      luma[i] += alpha * (work1[i] - luma[i]);
    }
  }

  for i in 0..num_pixels {
    let base = i * 3;
    let y_value = luma[i];
    let r_lin = y_value + 1.402000 * cr[i];
    let b_lin = y_value + 1.772000 * cb[i];
    let g_lin = y_value - 0.344136 * cb[i] - 0.714136 * cr[i];
    rgb[base] = linear_to_srgb_byte(r_lin);
    rgb[base + 1] = linear_to_srgb_byte(g_lin);
    rgb[base + 2] = linear_to_srgb_byte(b_lin);
  }
}
