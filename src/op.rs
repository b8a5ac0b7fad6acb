//! Operation descriptors. One is built per top-level call and stays immutable for it.

use serde::{Deserialize, Serialize};

use crate::arch::gemmini::params::{
  AccScaleT, Activation, DramAddr, ScaleT, ACC_SCALE_IDENTITY, MVIN_SCALE_IDENTITY,
};
use crate::error::{GemtileError, Result};

/// Logical extents of `C[I][J] = A[I][K] · B[K][J] + D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatmulDims {
  pub i: usize,
  pub j: usize,
  pub k: usize,
}

impl MatmulDims {
  pub fn new(i: usize, j: usize, k: usize) -> Self {
    Self { i, j, k }
  }
}

/// Numeric and layout options of a matmul.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatmulParams {
  pub a_scale: ScaleT,
  pub b_scale: ScaleT,
  pub d_scale: ScaleT,
  pub act: Activation,
  pub acc_scale: AccScaleT,
  pub relu6_shift: u32,
  /// Broadcast bias row 0 to every output row
  pub repeating_bias: bool,
  pub a_transpose: bool,
  pub b_transpose: bool,
  /// Store `C` as raw `i32` accumulator values
  pub full_c: bool,
  /// `D` is stored as `i8` instead of `i32`
  pub low_d: bool,
}

impl Default for MatmulParams {
  fn default() -> Self {
    Self {
      a_scale: MVIN_SCALE_IDENTITY,
      b_scale: MVIN_SCALE_IDENTITY,
      d_scale: MVIN_SCALE_IDENTITY,
      act: Activation::None,
      acc_scale: ACC_SCALE_IDENTITY,
      relu6_shift: 0,
      repeating_bias: false,
      a_transpose: false,
      b_transpose: false,
      full_c: false,
      low_d: false,
    }
  }
}

impl MatmulParams {
  pub fn sizeof_c(&self) -> usize {
    if self.full_c {
      4
    } else {
      1
    }
  }

  pub fn sizeof_d(&self) -> usize {
    if self.low_d {
      1
    } else {
      4
    }
  }
}

/// Where a matmul's tensors live. Strides are in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulOperands {
  pub a: DramAddr,
  pub b: DramAddr,
  /// Bias; `None` disables it
  pub d: Option<DramAddr>,
  /// Output; `None` computes without storing
  pub c: Option<DramAddr>,
  pub stride_a: usize,
  pub stride_b: usize,
  pub stride_d: usize,
  pub stride_c: usize,
}

impl MatmulOperands {
  /// Densely packed operands for `dims`, honouring the transpose flags.
  pub fn packed(dims: MatmulDims, params: &MatmulParams, a: DramAddr, b: DramAddr, d: Option<DramAddr>, c: DramAddr) -> Self {
    Self {
      a,
      b,
      d,
      c: Some(c),
      stride_a: if params.a_transpose { dims.i } else { dims.k },
      stride_b: if params.b_transpose { dims.k } else { dims.j },
      stride_d: dims.j,
      stride_c: dims.j,
    }
  }
}

/// Max-pool window fused into the output store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
  pub size: usize,
  pub stride: usize,
  pub padding: usize,
}

impl Pool {
  /// Window used when pooling is disabled.
  pub const IDENTITY: Pool = Pool {
    size: 1,
    stride: 1,
    padding: 0,
  };

  pub fn out_dim(&self, in_dim: usize) -> usize {
    (in_dim + 2 * self.padding - self.size) / self.stride + 1
  }
}

/// Geometry of a convolution. Tensors are NHWC; weights are
/// `[krow][kcol][in_ch][out_ch]`, or `[krow][kcol][ch]` when depthwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvShape {
  pub batch_size: usize,
  pub in_dim: usize,
  pub in_channels: usize,
  pub out_channels: usize,
  pub out_dim: usize,
  pub stride: usize,
  pub padding: usize,
  pub kernel_dim: usize,
  #[serde(default)]
  pub depthwise: bool,
}

impl ConvShape {
  /// Shape with `out_dim` derived from the others.
  pub fn new(
    batch_size: usize,
    in_dim: usize,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    padding: usize,
    kernel_dim: usize,
  ) -> Self {
    let mut shape = Self {
      batch_size,
      in_dim,
      in_channels,
      out_channels,
      out_dim: 0,
      stride,
      padding,
      kernel_dim,
      depthwise: false,
    };
    shape.out_dim = shape.expected_out_dim();
    shape
  }

  /// Depthwise shape: one filter per channel.
  pub fn depthwise(batch_size: usize, in_dim: usize, channels: usize, stride: usize, padding: usize, kernel_dim: usize) -> Self {
    Self {
      depthwise: true,
      ..Self::new(batch_size, in_dim, channels, channels, stride, padding, kernel_dim)
    }
  }

  pub fn expected_out_dim(&self) -> usize {
    let padded = self.in_dim + 2 * self.padding;
    if self.stride == 0 || padded < self.kernel_dim {
      return 0;
    }
    (padded - self.kernel_dim) / self.stride + 1
  }

  /// Check the caller's `out_dim` against the shape it implies.
  pub fn validate(&self) -> Result<()> {
    if self.stride == 0 || self.kernel_dim == 0 || self.in_dim == 0 {
      return Err(GemtileError::configuration(format!(
        "stride {}, kernel {} and input dim {} must all be non-zero",
        self.stride, self.kernel_dim, self.in_dim
      )));
    }
    if self.batch_size == 0 || self.in_channels == 0 || self.out_channels == 0 {
      return Err(GemtileError::configuration("empty convolution"));
    }
    let expected = self.expected_out_dim();
    if expected != self.out_dim || expected == 0 {
      return Err(GemtileError::dimension("out_dim", expected, self.out_dim));
    }
    if self.depthwise && self.in_channels != self.out_channels {
      return Err(GemtileError::dimension("out_channels", self.in_channels, self.out_channels));
    }
    Ok(())
  }

  pub fn input_len(&self) -> usize {
    self.batch_size * self.in_dim * self.in_dim * self.in_channels
  }

  pub fn weight_len(&self) -> usize {
    let taps = self.kernel_dim * self.kernel_dim;
    if self.depthwise {
      taps * self.in_channels
    } else {
      taps * self.in_channels * self.out_channels
    }
  }

  pub fn output_len(&self, params: &ConvParams) -> usize {
    let pod = params.pool_out_dim(self.out_dim);
    self.batch_size * pod * pod * self.out_channels
  }
}

/// Numeric options of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvParams {
  pub act: Activation,
  pub acc_scale: AccScaleT,
  pub relu6_shift: u32,
  pub pool: Option<Pool>,
}

impl Default for ConvParams {
  fn default() -> Self {
    Self {
      act: Activation::None,
      acc_scale: ACC_SCALE_IDENTITY,
      relu6_shift: 0,
      pool: None,
    }
  }
}

impl ConvParams {
  /// Pool window in effect; the identity window when pooling is off.
  pub fn pool_window(&self) -> Pool {
    self.pool.unwrap_or(Pool::IDENTITY)
  }

  pub fn pool_out_dim(&self, out_dim: usize) -> usize {
    self.pool_window().out_dim(out_dim)
  }
}

/// Where a convolution's tensors live. All are densely packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvOperands {
  pub input: DramAddr,
  pub weights: DramAddr,
  /// `i32` per output channel
  pub bias: Option<DramAddr>,
  pub output: DramAddr,
}

/// Element-wise `C = act(scale_C · (scale_A · A + scale_B · B))` over `I × J` `i8` matrices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResaddParams {
  pub a_scale: ScaleT,
  pub b_scale: ScaleT,
  pub c_scale: AccScaleT,
  pub relu: bool,
}

impl Default for ResaddParams {
  fn default() -> Self {
    Self {
      a_scale: MVIN_SCALE_IDENTITY,
      b_scale: MVIN_SCALE_IDENTITY,
      c_scale: ACC_SCALE_IDENTITY,
      relu: false,
    }
  }
}
