//! Sequential CPU implementations used as correctness oracles.
//!
//! They follow the accelerator's quantization rules exactly: inputs are scaled on the way
//! in, sums are exact `i32`, and outputs go through [`scale_and_sat`].

use crate::arch::gemmini::numeric::{mvin_scale, mvin_scale_acc, scale_and_sat};
use crate::arch::gemmini::params::{AccT, Activation, ElemT};
use crate::op::{ConvParams, ConvShape, MatmulDims, MatmulParams, Pool, ResaddParams};

/// Raw accumulator result of a matmul, row-major `I × J`.
pub fn matmul_cpu_acc(
  dims: MatmulDims,
  a: &[ElemT],
  stride_a: usize,
  b: &[ElemT],
  stride_b: usize,
  d: Option<(&[AccT], usize)>,
  params: &MatmulParams,
) -> Vec<AccT> {
  let mut out = vec![0; dims.i * dims.j];
  for i in 0..dims.i {
    for j in 0..dims.j {
      let mut result = match d {
        Some((d, stride_d)) => {
          let bias_row = if params.repeating_bias { 0 } else { i };
          mvin_scale_acc(d[bias_row * stride_d + j], params.d_scale)
        },
        None => 0,
      };

      for k in 0..dims.k {
        let a_elem = if params.a_transpose { a[k * stride_a + i] } else { a[i * stride_a + k] };
        let b_elem = if params.b_transpose { b[j * stride_b + k] } else { b[k * stride_b + j] };
        result = result.wrapping_add(
          mvin_scale(a_elem, params.a_scale) as AccT * mvin_scale(b_elem, params.b_scale) as AccT,
        );
      }

      out[i * dims.j + j] = result;
    }
  }
  out
}

/// Scaled, saturated and activated matmul, row-major `I × J`.
pub fn matmul_cpu(
  dims: MatmulDims,
  a: &[ElemT],
  stride_a: usize,
  b: &[ElemT],
  stride_b: usize,
  d: Option<(&[AccT], usize)>,
  params: &MatmulParams,
) -> Vec<ElemT> {
  matmul_cpu_acc(dims, a, stride_a, b, stride_b, d, params)
    .into_iter()
    .map(|x| scale_and_sat(x, params.act, params.acc_scale, params.relu6_shift))
    .collect()
}

fn conv_pixel(
  shape: &ConvShape,
  input: &[ElemT],
  weights: &[ElemT],
  bias: Option<&[AccT]>,
  b: usize,
  orow: usize,
  ocol: usize,
  och: usize,
) -> AccT {
  let mut opixel = bias.map_or(0, |bias| bias[och]);
  let (in_dim, kdim) = (shape.in_dim as i64, shape.kernel_dim);

  for krow in 0..kdim {
    let irow = (orow * shape.stride + krow) as i64 - shape.padding as i64;
    for kcol in 0..kdim {
      let icol = (ocol * shape.stride + kcol) as i64 - shape.padding as i64;
      if irow < 0 || irow >= in_dim || icol < 0 || icol >= in_dim {
        continue;
      }
      let pixel = (b * shape.in_dim * shape.in_dim + irow as usize * shape.in_dim + icol as usize) * shape.in_channels;

      if shape.depthwise {
        let weight = weights[(krow * kdim + kcol) * shape.in_channels + och];
        opixel += weight as AccT * input[pixel + och] as AccT;
      } else {
        for kch in 0..shape.in_channels {
          let weight = weights[((krow * kdim + kcol) * shape.in_channels + kch) * shape.out_channels + och];
          opixel += weight as AccT * input[pixel + kch] as AccT;
        }
      }
    }
  }
  opixel
}

/// Convolution without pooling; output is `[batch][out_dim][out_dim][out_ch]`.
pub fn conv_cpu_without_pool(
  shape: &ConvShape,
  input: &[ElemT],
  weights: &[ElemT],
  bias: Option<&[AccT]>,
  params: &ConvParams,
) -> Vec<ElemT> {
  let od = shape.out_dim;
  let mut output = vec![0; shape.batch_size * od * od * shape.out_channels];
  for b in 0..shape.batch_size {
    for orow in 0..od {
      for ocol in 0..od {
        for och in 0..shape.out_channels {
          let opixel = conv_pixel(shape, input, weights, bias, b, orow, ocol, och);
          output[((b * od + orow) * od + ocol) * shape.out_channels + och] =
            scale_and_sat(opixel, params.act, params.acc_scale, params.relu6_shift);
        }
      }
    }
  }
  output
}

/// Max-pool an NHWC tensor. Padded positions count as zero.
pub fn pool(batch_size: usize, channels: usize, in_dim: usize, window: Pool, input: &[ElemT]) -> Vec<ElemT> {
  let out_dim = window.out_dim(in_dim);
  let mut output = vec![0; batch_size * out_dim * out_dim * channels];

  for b in 0..batch_size {
    for porow in 0..out_dim {
      for pocol in 0..out_dim {
        for ch in 0..channels {
          let mut value = ElemT::MIN;
          for wrow in 0..window.size {
            for wcol in 0..window.size {
              let orow = (porow * window.stride + wrow) as i64 - window.padding as i64;
              let ocol = (pocol * window.stride + wcol) as i64 - window.padding as i64;
              let elem = if orow < 0 || ocol < 0 || orow >= in_dim as i64 || ocol >= in_dim as i64 {
                0
              } else {
                input[((b * in_dim + orow as usize) * in_dim + ocol as usize) * channels + ch]
              };
              value = value.max(elem);
            }
          }
          output[((b * out_dim + porow) * out_dim + pocol) * channels + ch] = value;
        }
      }
    }
  }
  output
}

/// Convolution with the pool window evaluated inline, pixel by pixel.
pub fn conv_cpu(
  shape: &ConvShape,
  input: &[ElemT],
  weights: &[ElemT],
  bias: Option<&[AccT]>,
  params: &ConvParams,
) -> Vec<ElemT> {
  let Some(window) = params.pool else {
    return conv_cpu_without_pool(shape, input, weights, bias, params);
  };

  let od = shape.out_dim as i64;
  let pod = window.out_dim(shape.out_dim);
  let mut output = vec![0; shape.batch_size * pod * pod * shape.out_channels];

  for b in 0..shape.batch_size {
    for porow in 0..pod {
      for pocol in 0..pod {
        for poch in 0..shape.out_channels {
          let mut running_max: Option<ElemT> = None;
          for pwrow in 0..window.size {
            let orow = (porow * window.stride + pwrow) as i64 - window.padding as i64;
            for pwcol in 0..window.size {
              let ocol = (pocol * window.stride + pwcol) as i64 - window.padding as i64;
              let elem = if orow < 0 || orow >= od || ocol < 0 || ocol >= od {
                0
              } else {
                let opixel = conv_pixel(shape, input, weights, bias, b, orow as usize, ocol as usize, poch);
                scale_and_sat(opixel, params.act, params.acc_scale, params.relu6_shift)
              };
              running_max = Some(running_max.map_or(elem, |m| m.max(elem)));
            }
          }
          output[((b * pod + porow) * pod + pocol) * shape.out_channels + poch] = running_max.unwrap_or(0);
        }
      }
    }
  }
  output
}

/// Element-wise residual add of two `I × J` matrices.
pub fn resadd_cpu(i: usize, j: usize, a: &[ElemT], b: &[ElemT], params: &ResaddParams) -> Vec<ElemT> {
  let act = if params.relu { Activation::Relu } else { Activation::None };
  (0..i * j)
    .map(|idx| {
      let result = mvin_scale_acc(a[idx] as AccT, params.a_scale) + mvin_scale_acc(b[idx] as AccT, params.b_scale);
      scale_and_sat(result, act, params.c_scale, 0)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_matmul_cpu_with_repeating_bias() {
    let dims = MatmulDims::new(2, 2, 2);
    let a = [1, 2, 3, 4];
    let b = [5, 6, 7, 8];
    let d = [10, -10];
    let params = MatmulParams {
      repeating_bias: true,
      ..MatmulParams::default()
    };
    let c = matmul_cpu(dims, &a, 2, &b, 2, Some((&d, 2)), &params);
    assert_eq!(c, vec![29, 12, 53, 40]);
  }

  #[test]
  fn test_matmul_cpu_transposed_a() {
    let dims = MatmulDims::new(2, 1, 2);
    // A^T stored as K x I
    let at = [1, 3, 2, 4];
    let b = [1, 1];
    let params = MatmulParams {
      a_transpose: true,
      ..MatmulParams::default()
    };
    assert_eq!(matmul_cpu_acc(dims, &at, 2, &b, 1, None, &params), vec![3, 7]);
  }

  #[test]
  fn test_conv_cpu_padding_sees_zero() {
    // 1x1 input, 3x3 kernel, padding 1: only the centre tap hits data
    let shape = ConvShape::new(1, 1, 1, 1, 1, 1, 3);
    let weights = [1, 1, 1, 1, 5, 1, 1, 1, 1];
    let out = conv_cpu_without_pool(&shape, &[3], &weights, Some(&[2]), &ConvParams::default());
    assert_eq!(out, vec![17]);
  }

  #[test]
  fn test_fused_pool_matches_two_step() {
    let shape = ConvShape::new(1, 5, 2, 3, 1, 1, 3);
    let input: Vec<ElemT> = (0..shape.input_len()).map(|x| (x % 7) as ElemT - 3).collect();
    let weights: Vec<ElemT> = (0..shape.weight_len()).map(|x| (x % 5) as ElemT - 2).collect();
    let window = Pool {
      size: 3,
      stride: 2,
      padding: 1,
    };
    let params = ConvParams {
      pool: Some(window),
      ..ConvParams::default()
    };
    let fused = conv_cpu(&shape, &input, &weights, None, &params);
    let plain = conv_cpu_without_pool(&shape, &input, &weights, None, &params);
    assert_eq!(fused, pool(1, 3, shape.out_dim, window, &plain));
  }

  #[test]
  fn test_resadd_cpu_relu_floor() {
    let params = ResaddParams {
      relu: true,
      ..ResaddParams::default()
    };
    assert_eq!(resadd_cpu(1, 3, &[100, -5, 1], &[100, -5, 2], &params), vec![127, 0, 3]);
  }
}
