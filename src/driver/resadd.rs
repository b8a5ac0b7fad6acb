use super::cpu;
use crate::arch::gemmini::isa::{Accelerator, Instruction};
use crate::arch::gemmini::params::{Activation, Dataflow, DramAddr, HardwareCapacity};
use crate::error::{ensure, GemtileError, Result};
use crate::exec::resadd::resadd_tile;
use crate::exec::ResaddTileJob;
use crate::op::ResaddParams;
use crate::pin::PinGuard;

/// Accumulator rows an `tile_i × tile_j` residual-add tile occupies.
pub fn resadd_acc_rows(tile_i: usize, tile_j: usize, cap: &HardwareCapacity) -> usize {
  cap.pad(tile_i) * cap.blocks(tile_j)
}

/// Largest tile whose A and B sum fits the accumulator; the longer side gives way first.
pub fn plan_resadd(i: usize, j: usize, cap: &HardwareCapacity) -> (usize, usize) {
  let (mut tile_i, mut tile_j) = (i, j);
  while resadd_acc_rows(tile_i, tile_j, cap) > cap.acc_rows {
    if tile_i > tile_j {
      tile_i -= 1;
    } else {
      tile_j -= 1;
    }
  }
  log::debug!("resadd {}x{}: tile {}x{}", i, j, tile_i, tile_j);
  (tile_i, tile_j)
}

/// `C = act(scale_C · (scale_A · A + scale_B · B))` over densely packed `i × j` matrices.
///
/// The sum is formed in the accumulator under WS, or on the host under [`Dataflow::CPU`].
#[allow(clippy::too_many_arguments)]
pub fn tiled_resadd<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  i: usize,
  j: usize,
  tile_i: usize,
  tile_j: usize,
  params: &ResaddParams,
  a: DramAddr,
  b: DramAddr,
  c: DramAddr,
  dataflow: Dataflow,
) -> Result<()> {
  cap.validate()?;
  ensure(i > 0 && j > 0, || format!("empty residual add {}x{}", i, j))?;
  ensure(tile_i > 0 && tile_j > 0 && tile_i <= i && tile_j <= j, || {
    format!("tile {}x{} does not fit the {}x{} operation", tile_i, tile_j, i, j)
  })?;
  let acc_rows = resadd_acc_rows(tile_i, tile_j, cap);
  ensure(acc_rows <= cap.acc_rows, || {
    format!("not enough accumulator space for a {}x{} tile: {} rows", tile_i, tile_j, acc_rows)
  })?;

  match dataflow {
    Dataflow::OS => Err(GemtileError::configuration("residual adds run under WS or on the CPU, not OS")),
    Dataflow::WS => {
      run(acc, cap, i, j, tile_i, tile_j, params, a, b, c);
      Ok(())
    },
    Dataflow::CPU => cpu::resadd(acc, i, j, params, a, b, c),
  }
}

#[allow(clippy::too_many_arguments)]
fn run<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  i: usize,
  j: usize,
  tile_i: usize,
  tile_j: usize,
  params: &ResaddParams,
  a: DramAddr,
  b: DramAddr,
  c: DramAddr,
) {
  let _pin = PinGuard::acquire();
  acc.issue(Instruction::ConfigStore {
    stride: j as u64,
    pool: None,
  });
  acc.issue(Instruction::ConfigEx {
    dataflow: Dataflow::WS,
    act: if params.relu { Activation::Relu } else { Activation::None },
    sys_shift: 0,
    acc_scale: params.c_scale,
    relu6_shift: 0,
    a_stride: 1,
    a_transpose: false,
    b_transpose: false,
  });

  for row in (0..i).step_by(tile_i) {
    for col in (0..j).step_by(tile_j) {
      let offset = (row * j + col) as DramAddr;
      let job = ResaddTileJob {
        a: a + offset,
        b: b + offset,
        c: c + offset,
        i: tile_i.min(i - row),
        j: tile_j.min(j - col),
        row_stride: j,
      };
      resadd_tile(acc, cap, params, &job);
    }
  }

  acc.issue(Instruction::Fence);
}

/// Plan with [`plan_resadd`] and run; returns the tile used.
#[allow(clippy::too_many_arguments)]
pub fn tiled_resadd_auto<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  i: usize,
  j: usize,
  params: &ResaddParams,
  a: DramAddr,
  b: DramAddr,
  c: DramAddr,
  dataflow: Dataflow,
) -> Result<(usize, usize)> {
  cap.validate()?;
  let (tile_i, tile_j) = plan_resadd(i, j, cap);
  tiled_resadd(acc, cap, i, j, tile_i, tile_j, params, a, b, c, dataflow)?;
  Ok((tile_i, tile_j))
}
