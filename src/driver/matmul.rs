use super::cpu;
use crate::arch::gemmini::isa::{Accelerator, Instruction, LoadChannel};
use crate::arch::gemmini::params::{Dataflow, DramAddr, HardwareCapacity};
use crate::error::Result;
use crate::exec::{config_ld, MatmulTileJob, OutputStationary, TileExecutor, WeightStationary};
use crate::op::{MatmulDims, MatmulOperands, MatmulParams};
use crate::pin::PinGuard;
use crate::tiling::{plan_matmul, validate_matmul_tile, MatmulTile};

/// `C = act(scale(A·B + D))` over the tile grid given by `tile`.
///
/// Nothing is issued unless the capacity, the tile and the mode all validate. Under
/// [`Dataflow::CPU`] the product is computed on the host and written to the same operands.
pub fn tiled_matmul<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  dims: MatmulDims,
  operands: &MatmulOperands,
  params: &MatmulParams,
  tile: MatmulTile,
  dataflow: Dataflow,
) -> Result<()> {
  cap.validate()?;
  validate_matmul_tile(dims, tile, dataflow, params, cap)?;
  if dataflow == Dataflow::OS && params.low_d && operands.d.is_some() {
    log::warn!("low_D under OS is loaded through the general move-in path");
  }

  let _pin = PinGuard::acquire();
  match dataflow {
    Dataflow::OS => run::<OutputStationary, A>(acc, cap, dims, operands, params, tile),
    Dataflow::WS => run::<WeightStationary, A>(acc, cap, dims, operands, params, tile),
    Dataflow::CPU => cpu::matmul(acc, dims, operands, params)?,
  }
  Ok(())
}

/// Plan the largest fitting tile, then run [`tiled_matmul`] with it.
pub fn tiled_matmul_auto<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  dims: MatmulDims,
  operands: &MatmulOperands,
  params: &MatmulParams,
  dataflow: Dataflow,
) -> Result<MatmulTile> {
  cap.validate()?;
  let tile = plan_matmul(dims, dataflow, cap);
  tiled_matmul(acc, cap, dims, operands, params, tile, dataflow)?;
  Ok(tile)
}

/// Tile count along one dimension, the extent of the last tile and the padding it carries.
fn grid(logical: usize, tile: usize, cap: &HardwareCapacity) -> (usize, usize, usize) {
  let padded = cap.pad(logical);
  let span = tile * cap.dim;
  let count = padded.div_ceil(span);
  let last = if padded % span == 0 { tile } else { (padded / cap.dim) % tile };
  (count, last, padded - logical)
}

fn run<E: TileExecutor, A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  dims: MatmulDims,
  operands: &MatmulOperands,
  params: &MatmulParams,
  tile: MatmulTile,
) {
  let dim = cap.dim;
  let sizeof_c = params.sizeof_c();
  let sizeof_d = params.sizeof_d();

  acc.issue(Instruction::ConfigEx {
    dataflow: E::DATAFLOW,
    act: params.act,
    sys_shift: 0,
    acc_scale: params.acc_scale,
    relu6_shift: params.relu6_shift,
    a_stride: 1,
    a_transpose: params.a_transpose,
    b_transpose: params.b_transpose,
  });
  acc.issue(Instruction::ConfigStore {
    stride: (operands.stride_c * sizeof_c) as u64,
    pool: None,
  });
  acc.issue(config_ld(LoadChannel::Ch0, operands.stride_a, params.a_scale, false, cap));
  acc.issue(config_ld(LoadChannel::Ch1, operands.stride_b, params.b_scale, false, cap));
  let d_stride = if params.repeating_bias { 0 } else { operands.stride_d * sizeof_d };
  acc.issue(config_ld(LoadChannel::Ch2, d_stride, params.d_scale, params.low_d, cap));

  let (i_tiles, last_i, pad_i) = grid(dims.i, tile.i, cap);
  let (j_tiles, last_j, pad_j) = grid(dims.j, tile.j, cap);
  let (k_tiles, last_k, pad_k) = grid(dims.k, tile.k, cap);
  log::debug!(
    "matmul {:?} as {}x{}x{} tiles of {:?} under {:?}",
    dims,
    i_tiles,
    j_tiles,
    k_tiles,
    tile,
    E::DATAFLOW
  );

  let at = |base: DramAddr, offset: usize| base + offset as DramAddr;

  for i0 in 0..i_tiles {
    for j0 in 0..j_tiles {
      for k0 in 0..k_tiles {
        let row = i0 * tile.i * dim;
        let col = j0 * tile.j * dim;
        let depth = k0 * tile.k * dim;

        let d = match operands.d {
          Some(d) if k0 == 0 => {
            let bias_row = if params.repeating_bias { 0 } else { row };
            Some(at(d, (bias_row * operands.stride_d + col) * sizeof_d))
          },
          _ => None,
        };
        let c = match operands.c {
          Some(c) if k0 == k_tiles - 1 => Some(at(c, (row * operands.stride_c + col) * sizeof_c)),
          _ => None,
        };
        let a = if params.a_transpose {
          at(operands.a, depth * operands.stride_a + row)
        } else {
          at(operands.a, row * operands.stride_a + depth)
        };
        let b = if params.b_transpose {
          at(operands.b, col * operands.stride_b + depth)
        } else {
          at(operands.b, depth * operands.stride_b + col)
        };

        let last_row = i0 == i_tiles - 1;
        let last_col = j0 == j_tiles - 1;
        let last_depth = k0 == k_tiles - 1;
        let job = MatmulTileJob {
          a,
          b,
          d,
          c,
          first_reduction: k0 == 0,
          i: if last_row { last_i } else { tile.i },
          j: if last_col { last_j } else { tile.j },
          k: if last_depth { last_k } else { tile.k },
          pad_i: if last_row { pad_i } else { 0 },
          pad_j: if last_col { pad_j } else { 0 },
          pad_k: if last_depth { pad_k } else { 0 },
        };
        E::matmul_tile(acc, cap, operands, params, &job);
      }
    }
  }

  acc.issue(Instruction::Fence);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemmini::isa::InstructionTrace;

  #[test]
  fn test_grid_tail() {
    let cap = HardwareCapacity::default();
    // 40 pads to 48 = 3 blocks; tiles of 2 blocks leave one block behind
    assert_eq!(grid(40, 2, &cap), (2, 1, 8));
    assert_eq!(grid(64, 2, &cap), (2, 2, 0));
    assert_eq!(grid(16, 4, &cap), (1, 1, 0));
  }

  #[test]
  fn test_single_trailing_fence() {
    let cap = HardwareCapacity::default();
    let dims = MatmulDims::new(40, 40, 40);
    let params = MatmulParams::default();
    let operands = MatmulOperands::packed(dims, &params, 0x1000, 0x2000, None, 0x3000);
    for dataflow in [Dataflow::OS, Dataflow::WS] {
      let mut trace = InstructionTrace::new();
      tiled_matmul(&mut trace, &cap, dims, &operands, &params, MatmulTile::new(2, 1, 2), dataflow).unwrap();
      assert_eq!(trace.fence_count(), 1);
      assert!(trace.instructions().last().unwrap().is_fence());
    }
  }

  #[test]
  fn test_invalid_tile_issues_nothing() {
    let cap = HardwareCapacity::default();
    let dims = MatmulDims::new(20, 20, 20);
    let params = MatmulParams::default();
    let operands = MatmulOperands::packed(dims, &params, 0x1000, 0x2000, None, 0x3000);
    let mut trace = InstructionTrace::new();
    let err = tiled_matmul(&mut trace, &cap, dims, &operands, &params, MatmulTile::new(3, 1, 1), Dataflow::WS).unwrap_err();
    assert!(err.is_configuration());
    assert!(trace.is_empty());
  }

  #[test]
  fn test_bias_only_on_first_reduction_tile() {
    let cap = HardwareCapacity::default();
    let dims = MatmulDims::new(16, 16, 48);
    let params = MatmulParams::default();
    let operands = MatmulOperands::packed(dims, &params, 0x1000, 0x2000, Some(0x4000), 0x3000);
    let mut trace = InstructionTrace::new();
    tiled_matmul(&mut trace, &cap, dims, &operands, &params, MatmulTile::new(1, 1, 1), Dataflow::WS).unwrap();

    let dc: Vec<_> = trace
      .instructions()
      .iter()
      .filter_map(|insn| match insn {
        Instruction::LoopWsAddrsDC { d, c } => Some((*d, *c)),
        _ => None,
      })
      .collect();
    assert_eq!(dc, vec![(0x4000, 0), (0, 0), (0, 0x3000)]);
  }
}
