use super::cpu;
use crate::arch::gemmini::isa::{Accelerator, Instruction};
use crate::arch::gemmini::params::{AccT, Dataflow, DramAddr, HardwareCapacity};
use crate::error::{GemtileError, Result};
use crate::exec::conv::ConvExecutor;
use crate::exec::{ConvTileJob, OutputStationary, TileExecutor, WeightStationary};
use crate::op::{ConvOperands, ConvParams, ConvShape};
use crate::pin::PinGuard;
use crate::tiling::conv::validate_pool;
use crate::tiling::{plan_conv, validate_conv_tile, ConvPlan, ConvTile, GrowthPolicy};

/// Convolution, optionally fused with max-pooling, over the tile grid given by `tile`.
///
/// Shapes, pool and tile are checked before the first instruction is issued, under every
/// dataflow including [`Dataflow::CPU`].
#[allow(clippy::too_many_arguments)]
pub fn tiled_conv<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  operands: &ConvOperands,
  tile: &ConvTile,
  weight_banks: usize,
  dataflow: Dataflow,
) -> Result<()> {
  cap.validate()?;
  shape.validate()?;
  validate_pool(shape, params)?;
  validate_conv_tile(shape, params, tile, weight_banks, cap)?;

  match dataflow {
    Dataflow::OS => run::<OutputStationary, A>(acc, cap, shape, params, operands, tile, weight_banks),
    Dataflow::WS => run::<WeightStationary, A>(acc, cap, shape, params, operands, tile, weight_banks),
    Dataflow::CPU => cpu::conv(acc, shape, params, operands),
  }
}

/// Classify the shape, plan its tile and run it.
pub fn tiled_conv_auto<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  operands: &ConvOperands,
  dataflow: Dataflow,
) -> Result<ConvPlan> {
  cap.validate()?;
  shape.validate()?;
  let policy = GrowthPolicy::classify(shape, cap);
  tiled_conv_auto_with(acc, cap, shape, params, operands, policy, dataflow)
}

/// Plan with an explicit growth policy and run.
pub fn tiled_conv_auto_with<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  operands: &ConvOperands,
  policy: GrowthPolicy,
  dataflow: Dataflow,
) -> Result<ConvPlan> {
  cap.validate()?;
  let plan = plan_conv(shape, params, policy, cap)?;
  tiled_conv(acc, cap, shape, params, operands, &plan.tile, plan.weight_banks, dataflow)?;
  Ok(plan)
}

pub fn tiled_conv_dw_auto<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  operands: &ConvOperands,
  dataflow: Dataflow,
) -> Result<ConvPlan> {
  if !shape.depthwise {
    return Err(GemtileError::configuration("depthwise tiling needs a depthwise shape"));
  }
  tiled_conv_auto_with(acc, cap, shape, params, operands, GrowthPolicy::Depthwise, dataflow)
}

pub fn tiled_conv_first_layer_auto<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  operands: &ConvOperands,
  dataflow: Dataflow,
) -> Result<ConvPlan> {
  if shape.depthwise {
    return Err(GemtileError::configuration("first-layer tiling does not apply to depthwise shapes"));
  }
  tiled_conv_auto_with(acc, cap, shape, params, operands, GrowthPolicy::FirstLayer, dataflow)
}

/// Large-channel tiling; input channels are split too once one kernel's weights outgrow two banks.
pub fn tiled_conv_large_channel_auto<A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  operands: &ConvOperands,
  dataflow: Dataflow,
) -> Result<ConvPlan> {
  if shape.depthwise {
    return Err(GemtileError::configuration("large-channel tiling does not apply to depthwise shapes"));
  }
  let policy = match GrowthPolicy::classify(shape, cap) {
    GrowthPolicy::DeepChannel => GrowthPolicy::DeepChannel,
    _ => GrowthPolicy::LargeChannel,
  };
  tiled_conv_auto_with(acc, cap, shape, params, operands, policy, dataflow)
}

/// Spatial part of a tile job at `(b, porow, pocol)`: extents, padding and the input
/// pointer at channel 0.
fn spatial_job(
  shape: &ConvShape,
  params: &ConvParams,
  tile: &ConvTile,
  input: DramAddr,
  b: usize,
  porow: usize,
  pocol: usize,
) -> ConvTileJob {
  let pool = params.pool_window();
  let pool_out_dim = params.pool_out_dim(shape.out_dim);
  let batches = tile.batches.min(shape.batch_size - b);
  let porows = tile.porows.min(pool_out_dim - porow);
  let pocols = tile.pocols.min(pool_out_dim - pocol);

  let (out_dim, in_dim) = (shape.out_dim as i64, shape.in_dim as i64);
  let (stride, padding, kdim) = (shape.stride as i64, shape.padding as i64, shape.kernel_dim as i64);

  let orow = (porow * pool.stride) as i64 - pool.padding as i64;
  let ocol = (pocol * pool.stride) as i64 - pool.padding as i64;
  let orows = (porows * pool.stride + pool.size - 1) as i64;
  let ocols = (pocols * pool.stride + pool.size - 1) as i64;

  let pupad = (-orow).max(0);
  let pdpad = (orow + orows - out_dim).max(0);
  let plpad = (-ocol).max(0);
  let prpad = (ocol + ocols - out_dim).max(0);

  let irow = orow.max(0) * stride - padding;
  let icol = ocol.max(0) * stride - padding;
  let irows = (orows - pupad - pdpad - 1) * stride + kdim;
  let icols = (ocols - plpad - prpad - 1) * stride + kdim;

  let upad = (-irow).max(0);
  let dpad = (irow + irows - in_dim).max(0);
  let lpad = (-icol).max(0);
  let rpad = (icol + icols - in_dim).max(0);

  let pixel = ((b as i64 * in_dim + irow + upad) * in_dim + icol + lpad) * shape.in_channels as i64;

  ConvTileJob {
    batches,
    porows,
    pocols,
    lpad: lpad as usize,
    rpad: rpad as usize,
    upad: upad as usize,
    dpad: dpad as usize,
    plpad: plpad as usize,
    prpad: prpad as usize,
    pupad: pupad as usize,
    pdpad: pdpad as usize,
    input: input + pixel as DramAddr,
    ..ConvTileJob::default()
  }
}

fn run<E: TileExecutor, A: Accelerator>(
  acc: &mut A,
  cap: &HardwareCapacity,
  shape: &ConvShape,
  params: &ConvParams,
  operands: &ConvOperands,
  tile: &ConvTile,
  weight_banks: usize,
) -> Result<()> {
  let kernel = E::conv_kernel(shape, tile, cap)?;
  let _pin = PinGuard::acquire();

  let exec = ConvExecutor {
    shape,
    params,
    cap,
    kernel,
    weight_banks,
  };
  exec.configure(acc);

  let pool_out_dim = params.pool_out_dim(shape.out_dim);
  let (in_channels, out_channels) = (shape.in_channels, shape.out_channels);
  let sizeof_bias = std::mem::size_of::<AccT>();
  let output_at = |b: usize, porow: usize, pocol: usize, poch: usize| {
    operands.output + (((b * pool_out_dim + porow) * pool_out_dim + pocol) * out_channels + poch) as DramAddr
  };
  let bias_at = |poch: usize| operands.bias.map(|bias| bias + (poch * sizeof_bias) as DramAddr);

  log::debug!("conv {:?} with {:?} kernel and tile {:?}", shape, kernel, tile);

  if kernel.weights_resident(shape, tile) {
    for poch in (0..out_channels).step_by(tile.pochs) {
      let pochs = tile.pochs.min(out_channels - poch);
      exec.load_weights(acc, operands.weights + poch as DramAddr, pochs, in_channels);

      for b in (0..shape.batch_size).step_by(tile.batches) {
        for porow in (0..pool_out_dim).step_by(tile.porows) {
          for pocol in (0..pool_out_dim).step_by(tile.pocols) {
            let spatial = spatial_job(shape, params, tile, operands.input, b, porow, pocol);
            let job = ConvTileJob {
              pochs,
              kchs: in_channels,
              weights: None,
              bias: bias_at(poch),
              output: Some(output_at(b, porow, pocol, poch)),
              first_reduction: true,
              ..spatial
            };
            exec.run_tile(acc, &job);
          }
        }
      }
    }
  } else if shape.depthwise {
    for b in (0..shape.batch_size).step_by(tile.batches) {
      for porow in (0..pool_out_dim).step_by(tile.porows) {
        for pocol in (0..pool_out_dim).step_by(tile.pocols) {
          let spatial = spatial_job(shape, params, tile, operands.input, b, porow, pocol);
          for ch in 0..in_channels {
            let job = ConvTileJob {
              pochs: 1,
              kchs: 1,
              input: spatial.input + ch as DramAddr,
              weights: Some(operands.weights + ch as DramAddr),
              bias: bias_at(ch),
              output: Some(output_at(b, porow, pocol, ch)),
              first_reduction: true,
              ..spatial
            };
            exec.run_tile(acc, &job);
          }
        }
      }
    }
  } else {
    for b in (0..shape.batch_size).step_by(tile.batches) {
      for porow in (0..pool_out_dim).step_by(tile.porows) {
        for pocol in (0..pool_out_dim).step_by(tile.pocols) {
          let spatial = spatial_job(shape, params, tile, operands.input, b, porow, pocol);
          for poch in (0..out_channels).step_by(tile.pochs) {
            let pochs = tile.pochs.min(out_channels - poch);
            for kch in (0..in_channels).step_by(tile.kchs) {
              let kchs = tile.kchs.min(in_channels - kch);
              let first = kch == 0;
              let last = kch + kchs >= in_channels;
              let job = ConvTileJob {
                pochs,
                kchs,
                input: spatial.input + kch as DramAddr,
                weights: Some(operands.weights + (kch * out_channels + poch) as DramAddr),
                bias: if first { bias_at(poch) } else { None },
                output: if last { Some(output_at(b, porow, pocol, poch)) } else { None },
                first_reduction: first,
                ..spatial
              };
              exec.run_tile(acc, &job);
            }
          }
        }
      }
    }
  }

  acc.issue(Instruction::Fence);
  Ok(())
}
