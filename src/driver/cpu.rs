//! Host fallback for the CPU target: the reference routines read the operands out of host
//! memory and write the result back in place. Nothing is issued.

use crate::arch::gemmini::dram::Dram;
use crate::arch::gemmini::isa::Accelerator;
use crate::arch::gemmini::params::DramAddr;
use crate::error::{GemtileError, Result};
use crate::op::{ConvOperands, ConvParams, ConvShape, MatmulDims, MatmulOperands, MatmulParams, ResaddParams};
use crate::reference::{conv_cpu, matmul_cpu, resadd_cpu};

fn host<A: Accelerator>(acc: &mut A) -> Result<&mut Dram> {
  acc
    .host_memory()
    .ok_or_else(|| GemtileError::configuration("the CPU target needs a backend with host memory"))
}

/// Elements spanned by `rows` rows of `cols` elements, `stride` apart.
fn strided_len(rows: usize, cols: usize, stride: usize) -> usize {
  (rows - 1) * stride + cols
}

pub(crate) fn matmul<A: Accelerator>(
  acc: &mut A,
  dims: MatmulDims,
  operands: &MatmulOperands,
  params: &MatmulParams,
) -> Result<()> {
  let dram = host(acc)?;
  let Some(c) = operands.c else {
    return Ok(());
  };

  let a = dram.read_i8_vec(operands.a, strided_len(dims.i, dims.k, operands.stride_a));
  let b = dram.read_i8_vec(operands.b, strided_len(dims.k, dims.j, operands.stride_b));
  let d = operands.d.map(|d| {
    let rows = if params.repeating_bias { 1 } else { dims.i };
    dram.read_i32_vec(d, strided_len(rows, dims.j, operands.stride_d))
  });

  let out = matmul_cpu(
    dims,
    &a,
    operands.stride_a,
    &b,
    operands.stride_b,
    d.as_deref().map(|d| (d, operands.stride_d)),
    params,
  );
  for (row, values) in out.chunks(dims.j).enumerate() {
    dram.write_i8_slice(c + (row * operands.stride_c) as DramAddr, values);
  }
  log::debug!("matmul {:?} computed on the host", dims);
  Ok(())
}

pub(crate) fn conv<A: Accelerator>(
  acc: &mut A,
  shape: &ConvShape,
  params: &ConvParams,
  operands: &ConvOperands,
) -> Result<()> {
  let dram = host(acc)?;
  let input = dram.read_i8_vec(operands.input, shape.input_len());
  let weights = dram.read_i8_vec(operands.weights, shape.weight_len());
  let bias = operands.bias.map(|bias| dram.read_i32_vec(bias, shape.out_channels));

  let out = conv_cpu(shape, &input, &weights, bias.as_deref(), params);
  dram.write_i8_slice(operands.output, &out);
  log::debug!("conv {:?} computed on the host", shape);
  Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn resadd<A: Accelerator>(
  acc: &mut A,
  i: usize,
  j: usize,
  params: &ResaddParams,
  a: DramAddr,
  b: DramAddr,
  c: DramAddr,
) -> Result<()> {
  let dram = host(acc)?;
  let a = dram.read_i8_vec(a, i * j);
  let b = dram.read_i8_vec(b, i * j);
  dram.write_i8_slice(c, &resadd_cpu(i, j, &a, &b, params));
  Ok(())
}
