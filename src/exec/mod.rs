//! Per-tile instruction sequences.
//!
//! A [`TileExecutor`] is picked once per operation from the requested [`Dataflow`]; every
//! tile of that operation then goes through the same monomorphized code.

pub mod conv;
pub mod matmul;
pub mod resadd;

use crate::arch::gemmini::isa::{Accelerator, Instruction, LoadChannel};
use crate::arch::gemmini::params::{Dataflow, HardwareCapacity, ScaleT};
use crate::error::{GemtileError, Result};
use crate::op::{ConvShape, MatmulOperands, MatmulParams};
use crate::tiling::ConvTile;

pub use conv::{ConvKernel, ConvTileJob};
pub use matmul::MatmulTileJob;
pub use resadd::ResaddTileJob;

pub trait TileExecutor {
  const DATAFLOW: Dataflow;

  /// Issue load, compute and store instructions for one matmul tile.
  fn matmul_tile<A: Accelerator>(
    acc: &mut A,
    cap: &HardwareCapacity,
    operands: &MatmulOperands,
    params: &MatmulParams,
    job: &MatmulTileJob,
  );

  /// Convolution kernel this dataflow runs `shape` with.
  fn conv_kernel(shape: &ConvShape, tile: &ConvTile, cap: &HardwareCapacity) -> Result<ConvKernel>;
}

/// Software-unrolled preload/compute pairs; the partial sum stays in the array.
pub struct OutputStationary;

/// Weights stay in the array while inputs stream through.
pub struct WeightStationary;

impl TileExecutor for OutputStationary {
  const DATAFLOW: Dataflow = Dataflow::OS;

  fn matmul_tile<A: Accelerator>(
    acc: &mut A,
    cap: &HardwareCapacity,
    operands: &MatmulOperands,
    params: &MatmulParams,
    job: &MatmulTileJob,
  ) {
    matmul::os_tile(acc, cap, operands, params, job)
  }

  fn conv_kernel(_shape: &ConvShape, _tile: &ConvTile, _cap: &HardwareCapacity) -> Result<ConvKernel> {
    Err(GemtileError::configuration("convolutions do not support the OS dataflow"))
  }
}

impl TileExecutor for WeightStationary {
  const DATAFLOW: Dataflow = Dataflow::WS;

  fn matmul_tile<A: Accelerator>(
    acc: &mut A,
    _cap: &HardwareCapacity,
    operands: &MatmulOperands,
    params: &MatmulParams,
    job: &MatmulTileJob,
  ) {
    matmul::ws_tile(acc, operands, params, job)
  }

  fn conv_kernel(shape: &ConvShape, tile: &ConvTile, cap: &HardwareCapacity) -> Result<ConvKernel> {
    Ok(ConvKernel::select(shape, tile, cap))
  }
}

/// Load-channel configuration with plain `dim`-row blocks and no pixel packing.
pub(crate) fn config_ld(
  channel: LoadChannel,
  stride: usize,
  scale: ScaleT,
  shrunk: bool,
  cap: &HardwareCapacity,
) -> Instruction {
  Instruction::ConfigLoad {
    channel,
    stride: stride as u64,
    scale,
    shrunk,
    block_stride: cap.dim as u16,
    pixels_per_row: 1,
  }
}
