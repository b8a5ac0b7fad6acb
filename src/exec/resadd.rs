use crate::arch::gemmini::address::{AccMode, SpAddr};
use crate::arch::gemmini::isa::{Accelerator, Instruction, LoadChannel, SpOperand};
use crate::arch::gemmini::params::{DramAddr, HardwareCapacity};
use crate::op::ResaddParams;

use super::config_ld;

/// One `i × j` block of a residual add. All three matrices share `row_stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResaddTileJob {
  pub a: DramAddr,
  pub b: DramAddr,
  pub c: DramAddr,
  pub i: usize,
  pub j: usize,
  pub row_stride: usize,
}

/// A lands in the accumulator scaled and overwriting, B is added on top of it, and the
/// sum leaves through the store path's scale and activation.
pub(crate) fn resadd_tile<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  params: &ResaddParams,
  job: &ResaddTileJob,
) {
  let dim = cap.dim;
  let ResaddTileJob { i, j, row_stride, .. } = *job;
  let blocks = (j / dim).clamp(1, cap.max_block_len());
  let rounded_up_j = cap.pad(j);

  let d_sp_addr_start = SpAddr::accumulator(0, AccMode::Overwrite);
  let c_sp_addr_start = SpAddr::accumulator(0, AccMode::Accumulate);

  let move_in = |acc: &mut A, dram: DramAddr, start: SpAddr| {
    for ii in (0..i).step_by(dim) {
      for jj in (0..j).step_by(blocks * dim) {
        let cols = (blocks * dim).min(j - jj);
        let rows = dim.min(i - ii);
        acc.issue(Instruction::Mvin {
          channel: LoadChannel::Ch0,
          dram: dram + (ii * row_stride + jj) as DramAddr,
          dst: SpOperand::new(start.offset(ii * (rounded_up_j / dim) + jj), cols, rows),
        });
      }
    }
  };

  acc.issue(config_ld(LoadChannel::Ch0, row_stride, params.a_scale, true, cap));
  move_in(acc, job.a, d_sp_addr_start);
  acc.issue(config_ld(LoadChannel::Ch0, row_stride, params.b_scale, true, cap));
  move_in(acc, job.b, c_sp_addr_start);

  for ii in (0..i).step_by(dim) {
    for jj in (0..j).step_by(dim) {
      acc.issue(Instruction::Mvout {
        dram: job.c + (ii * row_stride + jj) as DramAddr,
        src: SpOperand::new(d_sp_addr_start.offset(ii * (rounded_up_j / dim) + jj), dim.min(j - jj), dim.min(i - ii)),
      });
    }
  }
}
