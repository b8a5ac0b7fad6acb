use crate::arch::gemmini::address::{AccMode, SpAddr};
use crate::arch::gemmini::isa::{Accelerator, Instruction, LoadChannel, SpOperand};
use crate::arch::gemmini::params::{DramAddr, HardwareCapacity};
use crate::op::{MatmulOperands, MatmulParams};

use super::config_ld;

/// One tile of a matmul with its operands already offset to the tile origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulTileJob {
  pub a: DramAddr,
  pub b: DramAddr,
  /// Bias rows for this tile; only the first reduction tile carries one
  pub d: Option<DramAddr>,
  /// Output; only the last reduction tile stores
  pub c: Option<DramAddr>,
  /// No earlier tile has written this output block yet
  pub first_reduction: bool,
  pub i: usize,
  pub j: usize,
  pub k: usize,
  pub pad_i: usize,
  pub pad_j: usize,
  pub pad_k: usize,
}

impl MatmulTileJob {
  /// Whether the first write into a fresh accumulator block must overwrite.
  fn overwrites(&self) -> bool {
    self.d.is_none() && self.first_reduction
  }
}

/// Output-stationary tile: D, B then A are moved in, and each output block is reduced in
/// place by one preload followed by a compute per `k` block.
pub(crate) fn os_tile<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  operands: &MatmulOperands,
  params: &MatmulParams,
  job: &MatmulTileJob,
) {
  let dim = cap.dim;
  let MatmulTileJob {
    i,
    j,
    k,
    pad_i,
    pad_j,
    pad_k,
    ..
  } = *job;

  let a_sp_addr_start = SpAddr::scratchpad(0);
  let b_sp_addr_start = SpAddr::scratchpad(cap.sp_rows() - k * j * dim);
  let d_sp_addr_start = SpAddr::accumulator(0, AccMode::Overwrite);
  let c_sp_addr_start = SpAddr::accumulator(0, AccMode::Accumulate).with_full_width(params.full_c);

  let a_blocks = k.min(cap.max_block_len());
  let b_blocks = j.min(cap.max_block_len());
  let d_blocks = j.min(cap.max_block_len_acc());

  let extent = |last: bool, pad: usize| dim - if last { pad } else { 0 };
  // Extent of a multi-block move; only the final block is trimmed
  let span = |start: usize, blocks: usize, total: usize, pad: usize| {
    blocks * dim - if start + blocks >= total { pad } else { 0 }
  };

  // Move-in D
  if let Some(d) = job.d {
    let sizeof_d = params.sizeof_d();
    let stride = if params.repeating_bias { 0 } else { operands.stride_d * sizeof_d };
    acc.issue(config_ld(LoadChannel::Ch0, stride, params.d_scale, params.low_d, cap));

    for ii in 0..i {
      let bias_row = if params.repeating_bias { 0 } else { ii };
      for jj in (0..j).step_by(d_blocks) {
        let blocks = d_blocks.min(j - jj);
        let dram = d + ((bias_row * dim * operands.stride_d + jj * dim) * sizeof_d) as DramAddr;
        let dst = d_sp_addr_start.offset((ii * j + jj) * dim);
        acc.issue(Instruction::Mvin {
          channel: LoadChannel::Ch0,
          dram,
          dst: SpOperand::new(dst, span(jj, blocks, j, pad_j), extent(ii == i - 1, pad_i)),
        });
      }
    }
  }

  // Move-in B
  acc.issue(config_ld(LoadChannel::Ch0, operands.stride_b, params.b_scale, false, cap));
  for jj in (0..j).step_by(b_blocks) {
    let blocks = b_blocks.min(j - jj);
    for kk in 0..k {
      let dram = job.b + (kk * dim * operands.stride_b + jj * dim) as DramAddr;
      let dst = b_sp_addr_start.offset((kk * j + jj) * dim);
      acc.issue(Instruction::Mvin {
        channel: LoadChannel::Ch0,
        dram,
        dst: SpOperand::new(dst, span(jj, blocks, j, pad_j), extent(kk == k - 1, pad_k)),
      });
    }
  }

  // Move-in A
  acc.issue(config_ld(LoadChannel::Ch0, operands.stride_a, params.a_scale, false, cap));
  for ii in 0..i {
    for kk in (0..k).step_by(a_blocks) {
      let blocks = a_blocks.min(k - kk);
      let dram = job.a + (ii * dim * operands.stride_a + kk * dim) as DramAddr;
      let dst = a_sp_addr_start.offset((ii * k + kk) * dim);
      acc.issue(Instruction::Mvin {
        channel: LoadChannel::Ch0,
        dram,
        dst: SpOperand::new(dst, span(kk, blocks, k, pad_k), extent(ii == i - 1, pad_i)),
      });
    }
  }

  for ii in 0..i {
    for jj in 0..j {
      let c_sp_addr = c_sp_addr_start.offset((ii * j + jj) * dim);
      let c_cols = extent(jj == j - 1, pad_j);
      let c_rows = extent(ii == i - 1, pad_i);

      for kk in 0..k {
        let a_sp_addr = a_sp_addr_start.offset((ii * k + kk) * dim);
        let b_sp_addr = b_sp_addr_start.offset((kk * j + jj) * dim);

        let mut out_sp_addr = if kk == k - 1 { c_sp_addr } else { SpAddr::GARBAGE };
        if job.overwrites() && kk == k - 1 {
          out_sp_addr = out_sp_addr.with_overwrite();
        }

        let k_ext = extent(kk == k - 1, pad_k);
        acc.issue(Instruction::Preload {
          bd: SpOperand::new(SpAddr::GARBAGE, dim, dim),
          c: SpOperand::new(out_sp_addr, c_cols, c_rows),
        });

        let a = SpOperand::new(a_sp_addr, k_ext, c_rows);
        let bd = SpOperand::new(b_sp_addr, c_cols, k_ext);
        if kk == 0 {
          acc.issue(Instruction::ComputePreloaded { a, bd });
        } else {
          acc.issue(Instruction::ComputeAccumulated { a, bd });
        }
      }
    }
  }

  // Move-out C
  if let Some(c) = job.c {
    let sizeof_c = params.sizeof_c();
    for ii in 0..i {
      for jj in 0..j {
        let dram = c + ((ii * dim * operands.stride_c + jj * dim) * sizeof_c) as DramAddr;
        let src = c_sp_addr_start.offset((ii * j + jj) * dim);
        acc.issue(Instruction::Mvout {
          dram,
          src: SpOperand::new(src, extent(jj == j - 1, pad_j), extent(ii == i - 1, pad_i)),
        });
      }
    }
  }
}

/// Weight-stationary tile: the whole tile is one hardware loop.
pub(crate) fn ws_tile<A: Accelerator>(acc: &mut A, operands: &MatmulOperands, params: &MatmulParams, job: &MatmulTileJob) {
  acc.issue(Instruction::LoopWsBounds {
    i: job.i as u16,
    j: job.j as u16,
    k: job.k as u16,
    pad_i: job.pad_i as u16,
    pad_j: job.pad_j as u16,
    pad_k: job.pad_k as u16,
  });
  acc.issue(Instruction::LoopWsAddrsAB { a: job.a, b: job.b });
  // Address 0 tells the loop the operand is absent
  acc.issue(Instruction::LoopWsAddrsDC {
    d: job.d.unwrap_or(0),
    c: job.c.unwrap_or(0),
  });
  acc.issue(Instruction::LoopWsStridesAB {
    a: operands.stride_a as u64,
    b: operands.stride_b as u64,
  });
  acc.issue(Instruction::LoopWsStridesDC {
    d: if params.repeating_bias { 0 } else { operands.stride_d as u64 },
    c: operands.stride_c as u64,
  });
  acc.issue(Instruction::LoopWs {
    ex_accumulate: !job.overwrites(),
    full_c: params.full_c,
    low_d: params.low_d,
    a_transpose: params.a_transpose,
    b_transpose: params.b_transpose,
  });
}
