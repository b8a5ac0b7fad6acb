//! Seeded random workloads run end to end: tensors go into the simulator's memory, the
//! tiled operation runs, and the result is compared with the CPU oracle.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::arch::gemmini::isa::InstructionTrace;
use crate::arch::gemmini::params::{AccT, Dataflow, ElemT, HardwareCapacity};
use crate::arch::gemmini::Gemmini;
use crate::driver::{tiled_conv_auto, tiled_matmul_auto, tiled_resadd_auto};
use crate::error::Result;
use crate::op::{ConvOperands, ConvParams, ConvShape, MatmulDims, MatmulOperands, MatmulParams, ResaddParams};
use crate::reference::{conv_cpu, matmul_cpu, matmul_cpu_acc, resadd_cpu};
use crate::tiling::{ConvPlan, MatmulTile};

pub struct TensorGen {
  rng: StdRng,
}

impl TensorGen {
  pub fn new(seed: u64) -> Self {
    Self {
      rng: StdRng::seed_from_u64(seed),
    }
  }

  /// Small values keep sums well inside the saturation range.
  pub fn i8_tensor(&mut self, len: usize) -> Vec<ElemT> {
    (0..len).map(|_| self.rng.gen_range(-2..=2)).collect()
  }

  pub fn i32_tensor(&mut self, len: usize) -> Vec<AccT> {
    (0..len).map(|_| self.rng.gen_range(-16..=16)).collect()
  }
}

/// Outcome of one checked run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport<P> {
  pub plan: P,
  pub instructions: usize,
  pub elements: usize,
  pub mismatches: usize,
}

impl<P> RunReport<P> {
  pub fn passed(&self) -> bool {
    self.mismatches == 0
  }
}

fn mismatches<T: PartialEq + std::fmt::Debug>(expected: &[T], actual: &[T]) -> usize {
  let count = expected.iter().zip(actual).filter(|(e, a)| e != a).count();
  if let Some(at) = expected.iter().zip(actual).position(|(e, a)| e != a) {
    log::warn!(
      "{} of {} elements differ, first at {}: expected {:?}, got {:?}",
      count,
      expected.len(),
      at,
      expected[at],
      actual[at]
    );
  }
  count
}

pub fn run_matmul(
  cap: &HardwareCapacity,
  dims: MatmulDims,
  params: &MatmulParams,
  dataflow: Dataflow,
  with_bias: bool,
  seed: u64,
) -> Result<RunReport<MatmulTile>> {
  let mut gen = TensorGen::new(seed);
  let a = gen.i8_tensor(dims.i * dims.k);
  let b = gen.i8_tensor(dims.k * dims.j);
  let bias_rows = if params.repeating_bias { 1 } else { dims.i };
  let d: Vec<AccT> = if params.low_d {
    gen.i8_tensor(bias_rows * dims.j).into_iter().map(AccT::from).collect()
  } else {
    gen.i32_tensor(bias_rows * dims.j)
  };

  let mut gemmini = Gemmini::new(*cap);
  let a_addr = gemmini.dram.alloc_i8(&a);
  let b_addr = gemmini.dram.alloc_i8(&b);
  let d_addr = match (with_bias, params.low_d) {
    (false, _) => None,
    (true, true) => {
      let narrow: Vec<ElemT> = d.iter().map(|&x| x as ElemT).collect();
      Some(gemmini.dram.alloc_i8(&narrow))
    },
    (true, false) => Some(gemmini.dram.alloc_i32(&d)),
  };
  let c_addr = gemmini.dram.alloc(dims.i * dims.j * params.sizeof_c());

  let operands = MatmulOperands::packed(dims, params, a_addr, b_addr, d_addr, c_addr);
  let tile = tiled_matmul_auto(&mut gemmini, cap, dims, &operands, params, dataflow)?;

  let bias = with_bias.then_some((d.as_slice(), dims.j));
  let mismatches = if params.full_c {
    let expected = matmul_cpu_acc(dims, &a, operands.stride_a, &b, operands.stride_b, bias, params);
    mismatches(&expected, &gemmini.dram.read_i32_vec(c_addr, dims.i * dims.j))
  } else {
    let expected = matmul_cpu(dims, &a, operands.stride_a, &b, operands.stride_b, bias, params);
    mismatches(&expected, &gemmini.dram.read_i8_vec(c_addr, dims.i * dims.j))
  };

  Ok(RunReport {
    plan: tile,
    instructions: gemmini.issued(),
    elements: dims.i * dims.j,
    mismatches,
  })
}

pub fn run_conv(
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  dataflow: Dataflow,
  with_bias: bool,
  seed: u64,
) -> Result<RunReport<ConvPlan>> {
  shape.validate()?;
  let mut gen = TensorGen::new(seed);
  let input = gen.i8_tensor(shape.input_len());
  let weights = gen.i8_tensor(shape.weight_len());
  let bias = gen.i32_tensor(shape.out_channels);

  let mut gemmini = Gemmini::new(*cap);
  let operands = ConvOperands {
    input: gemmini.dram.alloc_i8(&input),
    weights: gemmini.dram.alloc_i8(&weights),
    bias: with_bias.then(|| gemmini.dram.alloc_i32(&bias)),
    output: gemmini.dram.alloc(shape.output_len(params)),
  };

  let plan = tiled_conv_auto(&mut gemmini, cap, shape, params, &operands, dataflow)?;

  let expected = conv_cpu(shape, &input, &weights, with_bias.then_some(bias.as_slice()), params);
  let actual = gemmini.dram.read_i8_vec(operands.output, expected.len());
  Ok(RunReport {
    plan,
    instructions: gemmini.issued(),
    elements: expected.len(),
    mismatches: mismatches(&expected, &actual),
  })
}

pub fn run_resadd(
  cap: &HardwareCapacity,
  i: usize,
  j: usize,
  params: &ResaddParams,
  dataflow: Dataflow,
  seed: u64,
) -> Result<RunReport<(usize, usize)>> {
  let mut gen = TensorGen::new(seed);
  let a = gen.i8_tensor(i * j);
  let b = gen.i8_tensor(i * j);

  let mut gemmini = Gemmini::new(*cap);
  let a_addr = gemmini.dram.alloc_i8(&a);
  let b_addr = gemmini.dram.alloc_i8(&b);
  let c_addr = gemmini.dram.alloc(i * j);
  let tile = tiled_resadd_auto(&mut gemmini, cap, i, j, params, a_addr, b_addr, c_addr, dataflow)?;

  let expected = resadd_cpu(i, j, &a, &b, params);
  Ok(RunReport {
    plan: tile,
    instructions: gemmini.issued(),
    elements: i * j,
    mismatches: mismatches(&expected, &gemmini.dram.read_i8_vec(c_addr, i * j)),
  })
}

/// Plan and issue a matmul without simulating it.
pub fn trace_matmul(
  cap: &HardwareCapacity,
  dims: MatmulDims,
  params: &MatmulParams,
  dataflow: Dataflow,
) -> Result<(MatmulTile, InstructionTrace)> {
  let mut trace = InstructionTrace::new();
  let operands = MatmulOperands::packed(dims, params, 0x1000, 0x2000, None, 0x3000);
  let tile = tiled_matmul_auto(&mut trace, cap, dims, &operands, params, dataflow)?;
  Ok((tile, trace))
}

/// Plan and issue a convolution without simulating it.
pub fn trace_conv(
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  dataflow: Dataflow,
) -> Result<(ConvPlan, InstructionTrace)> {
  let mut trace = InstructionTrace::new();
  let operands = ConvOperands {
    input: 0x1000,
    weights: 0x2000,
    bias: None,
    output: 0x3000,
  };
  let plan = tiled_conv_auto(&mut trace, cap, shape, params, &operands, dataflow)?;
  Ok((plan, trace))
}
