use serde::{Deserialize, Serialize};

use crate::arch::gemmini::params::{Dataflow, HardwareCapacity, MAX_FIELD_EXTENT};
use crate::error::{ensure, Result};
use crate::op::{MatmulDims, MatmulParams};

/// Matmul tile extents, in `dim`-sized blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatmulTile {
  pub i: usize,
  pub j: usize,
  pub k: usize,
}

impl MatmulTile {
  pub fn new(i: usize, j: usize, k: usize) -> Self {
    Self { i, j, k }
  }

  /// Scratchpad rows holding the A and B operands.
  pub fn spad_rows(&self, dim: usize) -> usize {
    (self.i * self.k + self.k * self.j) * dim
  }

  /// Accumulator rows holding C.
  pub fn acc_rows(&self, dim: usize) -> usize {
    self.i * self.j * dim
  }
}

/// Scratchpad and accumulator rows one matmul tile may occupy under `dataflow`.
pub fn matmul_budget(dataflow: Dataflow, cap: &HardwareCapacity) -> (usize, usize) {
  if dataflow.double_buffered() {
    (cap.sp_rows() / 2, cap.acc_rows / 2)
  } else {
    (cap.sp_rows(), cap.acc_rows)
  }
}

/// Largest tile that fits the buffering mode.
///
/// Starts from a square accumulator footprint and a reduction depth filling half of the
/// scratchpad, then grows J, I and K one block at a time, in that order, until none of
/// them can grow.
pub fn plan_matmul(dims: MatmulDims, dataflow: Dataflow, cap: &HardwareCapacity) -> MatmulTile {
  let dim = cap.dim;
  let (i_blocks, j_blocks, k_blocks) = (cap.blocks(dims.i), cap.blocks(dims.j), cap.blocks(dims.k));

  let (partition_rows, acc_rows) = if dataflow.double_buffered() {
    (cap.sp_rows() / 4, cap.acc_rows / 2)
  } else {
    (cap.sp_rows() / 2, cap.acc_rows)
  };
  let mats_in_partition = partition_rows / dim;
  let max_tile_i_j = ((acc_rows / dim) as f64).sqrt() as usize;
  let max_tile_k = mats_in_partition / max_tile_i_j.max(1);

  let mut tile = MatmulTile::new(
    i_blocks.min(max_tile_i_j).max(1),
    j_blocks.min(max_tile_i_j).max(1),
    k_blocks.min(max_tile_k).max(1),
  );

  let (max_spad_rows, max_acc_rows) = matmul_budget(dataflow, cap);
  let fits = |t: MatmulTile| t.spad_rows(dim) <= max_spad_rows && t.acc_rows(dim) <= max_acc_rows;

  // A lopsided capacity can make the square seed too big for the scratchpad; a valid
  // capacity always holds 1x1x1
  while !fits(tile) && tile != MatmulTile::new(1, 1, 1) {
    if tile.k > 1 {
      tile.k -= 1;
    } else if tile.i >= tile.j {
      tile.i -= 1;
    } else {
      tile.j -= 1;
    }
  }

  loop {
    let mut increased = false;

    let grown = MatmulTile { j: tile.j + 1, ..tile };
    if fits(grown) && grown.j <= j_blocks {
      tile = grown;
      increased = true;
    }

    let grown = MatmulTile { i: tile.i + 1, ..tile };
    if fits(grown) && grown.i <= i_blocks {
      tile = grown;
      increased = true;
    }

    // K never touches the accumulator
    let grown = MatmulTile { k: tile.k + 1, ..tile };
    if grown.spad_rows(dim) <= max_spad_rows && grown.k <= k_blocks {
      tile = grown;
      increased = true;
    }

    if !increased {
      break;
    }
  }

  log::debug!("matmul {:?} under {:?}: tile {:?}", dims, dataflow, tile);
  tile
}

/// Reject a tile or mode the accelerator cannot be programmed with.
pub fn validate_matmul_tile(
  dims: MatmulDims,
  tile: MatmulTile,
  dataflow: Dataflow,
  params: &MatmulParams,
  cap: &HardwareCapacity,
) -> Result<()> {
  let dim = cap.dim;
  ensure(dims.i > 0 && dims.j > 0 && dims.k > 0, || format!("empty matmul {:?}", dims))?;
  ensure(tile.i > 0 && tile.j > 0 && tile.k > 0, || format!("tile {:?} has a non-positive extent", tile))?;

  for (name, extent, logical) in [("I", tile.i, dims.i), ("J", tile.j, dims.j), ("K", tile.k, dims.k)] {
    ensure(extent * dim <= cap.pad(logical), || {
      format!("tile_{} is too large ({} * {} > {})", name, extent, dim, cap.pad(logical))
    })?;
    ensure(extent <= MAX_FIELD_EXTENT, || {
      format!("tile_{} = {} does not fit the loop bound field", name, extent)
    })?;
  }

  let (max_spad_rows, max_acc_rows) = matmul_budget(dataflow, cap);
  ensure(tile.spad_rows(dim) <= max_spad_rows, || {
    format!("not enough scratchpad for A and B: {} > {} rows", tile.spad_rows(dim), max_spad_rows)
  })?;
  ensure(tile.acc_rows(dim) <= max_acc_rows, || {
    format!("not enough accumulator for C: {} > {} rows", tile.acc_rows(dim), max_acc_rows)
  })?;

  let transposed = params.a_transpose || params.b_transpose;
  match dataflow {
    Dataflow::OS => ensure(!transposed, || {
      format!(
        "OS matmul does not support a_transpose={}, b_transpose={}",
        params.a_transpose, params.b_transpose
      )
    }),
    Dataflow::WS => ensure(!(params.a_transpose && params.b_transpose), || {
      "WS matmul cannot transpose both operands".to_string()
    }),
    Dataflow::CPU => ensure(!transposed && !params.full_c && !params.low_d, || {
      format!(
        "CPU matmul does not support a_transpose={}, b_transpose={}, full_C={}, low_D={}",
        params.a_transpose, params.b_transpose, params.full_c, params.low_d
      )
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_fits(dims: MatmulDims, dataflow: Dataflow, cap: &HardwareCapacity) {
    let tile = plan_matmul(dims, dataflow, cap);
    let (spad, acc) = matmul_budget(dataflow, cap);
    assert!(tile.spad_rows(cap.dim) <= spad, "{tile:?}");
    assert!(tile.acc_rows(cap.dim) <= acc, "{tile:?}");
    assert!(tile.i * cap.dim <= cap.pad(dims.i));
    assert!(tile.j * cap.dim <= cap.pad(dims.j));
    assert!(tile.k * cap.dim <= cap.pad(dims.k));
    assert!(validate_matmul_tile(dims, tile, dataflow, &MatmulParams::default(), cap).is_ok());
  }

  #[test]
  fn test_plan_respects_capacity() {
    let cap = HardwareCapacity::default();
    for &(i, j, k) in &[(1, 1, 1), (17, 33, 5), (512, 512, 512), (1000, 64, 3000), (16, 4096, 16)] {
      assert_fits(MatmulDims::new(i, j, k), Dataflow::WS, &cap);
      assert_fits(MatmulDims::new(i, j, k), Dataflow::OS, &cap);
    }
  }

  #[test]
  fn test_plan_fits_smallest_valid_capacity() {
    let cap = HardwareCapacity {
      dim: 16,
      bank_num: 1,
      bank_rows: 64,
      acc_rows: 32,
      max_bytes: 64,
    };
    assert!(cap.validate().is_ok());
    for &(i, j, k) in &[(16, 16, 16), (1, 1, 1), (100, 70, 300)] {
      for dataflow in [Dataflow::WS, Dataflow::OS, Dataflow::CPU] {
        assert_fits(MatmulDims::new(i, j, k), dataflow, &cap);
      }
    }

    // square accumulator footprint wider than the scratchpad can feed
    let lopsided = HardwareCapacity {
      acc_rows: 1024,
      ..cap
    };
    assert_fits(MatmulDims::new(200, 200, 200), Dataflow::WS, &lopsided);
    assert_fits(MatmulDims::new(200, 200, 200), Dataflow::OS, &lopsided);

    let cramped = HardwareCapacity {
      bank_rows: 16,
      acc_rows: 16,
      ..cap
    };
    assert!(cramped.validate().unwrap_err().is_configuration());
  }

  #[test]
  fn test_plan_default_instance() {
    // 1024 acc rows: 64 blocks, 32 when double buffered
    let cap = HardwareCapacity::default();
    let tile = plan_matmul(MatmulDims::new(512, 512, 512), Dataflow::WS, &cap);
    assert_eq!(tile.i * tile.j, 30);
    assert_eq!(tile.k, 32);
    let tile = plan_matmul(MatmulDims::new(512, 512, 512), Dataflow::OS, &cap);
    assert_eq!(tile.i * tile.j, 64);
  }

  #[test]
  fn test_small_matmul_is_one_tile() {
    let cap = HardwareCapacity::default();
    let tile = plan_matmul(MatmulDims::new(20, 7, 40), Dataflow::WS, &cap);
    assert_eq!(tile, MatmulTile::new(2, 1, 3));
  }

  #[test]
  fn test_plan_is_deterministic() {
    let cap = HardwareCapacity::default();
    let dims = MatmulDims::new(300, 200, 700);
    assert_eq!(plan_matmul(dims, Dataflow::WS, &cap), plan_matmul(dims, Dataflow::WS, &cap));
  }

  #[test]
  fn test_oversized_tile_is_rejected() {
    let cap = HardwareCapacity::default();
    let dims = MatmulDims::new(64, 64, 64);
    let params = MatmulParams::default();
    let err = validate_matmul_tile(dims, MatmulTile::new(5, 1, 1), Dataflow::WS, &params, &cap).unwrap_err();
    assert!(err.is_configuration());
    let err = validate_matmul_tile(dims, MatmulTile::new(0, 1, 1), Dataflow::WS, &params, &cap).unwrap_err();
    assert!(err.is_configuration());
  }

  #[test]
  fn test_transpose_combinations() {
    let cap = HardwareCapacity::default();
    let dims = MatmulDims::new(16, 16, 16);
    let tile = MatmulTile::new(1, 1, 1);
    let a_t = MatmulParams {
      a_transpose: true,
      ..MatmulParams::default()
    };
    let both = MatmulParams {
      b_transpose: true,
      ..a_t
    };
    assert!(validate_matmul_tile(dims, tile, Dataflow::WS, &a_t, &cap).is_ok());
    assert!(validate_matmul_tile(dims, tile, Dataflow::OS, &a_t, &cap).is_err());
    assert!(validate_matmul_tile(dims, tile, Dataflow::WS, &both, &cap).is_err());
    assert!(validate_matmul_tile(dims, tile, Dataflow::CPU, &a_t, &cap).is_err());
  }

  #[test]
  fn test_cpu_rejects_wide_operands() {
    let cap = HardwareCapacity::default();
    let dims = MatmulDims::new(16, 16, 16);
    let tile = MatmulTile::new(1, 1, 1);
    for params in [
      MatmulParams {
        full_c: true,
        ..MatmulParams::default()
      },
      MatmulParams {
        low_d: true,
        ..MatmulParams::default()
      },
    ] {
      let err = validate_matmul_tile(dims, tile, Dataflow::CPU, &params, &cap).unwrap_err();
      assert!(err.is_configuration());
    }
    assert!(validate_matmul_tile(dims, tile, Dataflow::CPU, &MatmulParams::default(), &cap).is_ok());
  }
}
