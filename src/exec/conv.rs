use serde::{Deserialize, Serialize};

use crate::arch::gemmini::address::{AccMode, SpAddr};
use crate::arch::gemmini::isa::{Accelerator, Instruction, LoadChannel, PoolConfig, SpOperand};
use crate::arch::gemmini::params::{AccT, Dataflow, DramAddr, HardwareCapacity, MVIN_SCALE_IDENTITY};
use crate::op::{ConvParams, ConvShape, Pool};
use crate::tiling::ConvTile;

use super::config_ld;

/// How a convolution tile is laid out in the scratchpad and walked by compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvKernel {
  /// One scratchpad row per input pixel, compute strided over it
  Standard,
  /// `kcols` neighbouring pixels packed into one scratchpad row
  FirstLayer,
  /// 1x1 strided kernel; inputs are gathered compactly and read densely
  Downsample,
  /// One channel at a time
  Depthwise,
}

impl ConvKernel {
  pub fn select(shape: &ConvShape, tile: &ConvTile, cap: &HardwareCapacity) -> Self {
    if shape.depthwise {
      ConvKernel::Depthwise
    } else if shape.kernel_dim == 1 && shape.stride > 1 && shape.padding == 0 {
      ConvKernel::Downsample
    } else if shape.kernel_dim > 1
      && shape.in_channels * shape.kernel_dim <= cap.dim
      && tile.kchs == shape.in_channels
    {
      ConvKernel::FirstLayer
    } else {
      ConvKernel::Standard
    }
  }

  /// Scratchpad rows between the inputs of two neighbouring output pixels.
  pub fn a_stride(self, shape: &ConvShape) -> usize {
    match self {
      ConvKernel::Downsample => 1,
      _ => shape.stride,
    }
  }

  /// Whether one weight load can serve every spatial tile of an output-channel tile.
  pub fn weights_resident(self, shape: &ConvShape, tile: &ConvTile) -> bool {
    matches!(self, ConvKernel::Standard | ConvKernel::Downsample) && tile.kchs == shape.in_channels
  }
}

/// One convolution tile with its DRAM pointers offset to the tile origin.
///
/// `lpad`..`dpad` count zero input pixels around the tile, `plpad`..`pdpad` count
/// pre-pool output pixels the pool window hangs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvTileJob {
  pub batches: usize,
  pub porows: usize,
  pub pocols: usize,
  pub pochs: usize,
  pub kchs: usize,
  pub lpad: usize,
  pub rpad: usize,
  pub upad: usize,
  pub dpad: usize,
  pub plpad: usize,
  pub prpad: usize,
  pub pupad: usize,
  pub pdpad: usize,
  /// First in-bounds input pixel of the tile, at its first input channel
  pub input: DramAddr,
  /// `None` when the weights are already resident
  pub weights: Option<DramAddr>,
  pub bias: Option<DramAddr>,
  pub output: Option<DramAddr>,
  pub first_reduction: bool,
}

/// Scratchpad geometry of one tile.
struct TileGeometry {
  orows: usize,
  ocols: usize,
  irows: usize,
  icols: usize,
}

/// Issues the instructions of every tile of one convolution.
pub struct ConvExecutor<'a> {
  pub shape: &'a ConvShape,
  pub params: &'a ConvParams,
  pub cap: &'a HardwareCapacity,
  pub kernel: ConvKernel,
  pub weight_banks: usize,
}

impl<'a> ConvExecutor<'a> {
  fn pool(&self) -> Pool {
    self.params.pool_window()
  }

  fn dim(&self) -> usize {
    self.cap.dim
  }

  fn weights_sp_addr_start(&self) -> SpAddr {
    SpAddr::scratchpad((self.cap.bank_num - self.weight_banks) * self.cap.bank_rows)
  }

  /// DRAM bytes between two input rows moved in back to back.
  fn input_row_stride(&self) -> usize {
    match self.kernel {
      ConvKernel::Downsample => self.shape.stride * self.shape.in_channels,
      _ => self.shape.in_channels,
    }
  }

  fn input_config(&self, stride: usize) -> Instruction {
    Instruction::ConfigLoad {
      channel: LoadChannel::Ch0,
      stride: stride as u64,
      scale: MVIN_SCALE_IDENTITY,
      shrunk: false,
      block_stride: self.dim() as u16,
      pixels_per_row: match self.kernel {
        ConvKernel::FirstLayer => self.shape.kernel_dim as u8,
        _ => 1,
      },
    }
  }

  /// Per-operation configuration: dataflow, store stride and the three load channels.
  pub fn configure<A: Accelerator>(&self, acc: &mut A) {
    let out_channels = self.shape.out_channels;
    acc.issue(Instruction::ConfigEx {
      dataflow: Dataflow::WS,
      act: self.params.act,
      sys_shift: 0,
      acc_scale: self.params.acc_scale,
      relu6_shift: self.params.relu6_shift,
      a_stride: self.kernel.a_stride(self.shape) as u16,
      a_transpose: false,
      b_transpose: false,
    });
    acc.issue(Instruction::ConfigStore {
      stride: out_channels as u64,
      pool: None,
    });
    acc.issue(self.input_config(self.input_row_stride()));
    let weight_stride = if self.shape.depthwise { self.shape.in_channels } else { out_channels };
    acc.issue(config_ld(LoadChannel::Ch1, weight_stride, MVIN_SCALE_IDENTITY, false, self.cap));
    // Every bias row repeats the same channel vector
    acc.issue(config_ld(LoadChannel::Ch2, 0, MVIN_SCALE_IDENTITY, false, self.cap));
  }

  fn geometry(&self, job: &ConvTileJob) -> TileGeometry {
    let pool = self.pool();
    let kdim = self.shape.kernel_dim;
    let orows = job.porows * pool.stride + pool.size - 1 - job.pupad - job.pdpad;
    let ocols = job.pocols * pool.stride + pool.size - 1 - job.plpad - job.prpad;
    let (irows, icols) = match self.kernel {
      ConvKernel::Downsample => (orows, ocols),
      _ => (
        (orows - 1) * self.shape.stride + kdim,
        (ocols - 1) * self.shape.stride + kdim,
      ),
    };
    TileGeometry {
      orows,
      ocols,
      irows,
      icols,
    }
  }

  /// Move in the weights of `pochs` output channels by `kchs` input channels.
  pub fn load_weights<A: Accelerator>(&self, acc: &mut A, weights: DramAddr, pochs: usize, kchs: usize) {
    let dim = self.dim();
    let kdim = self.shape.kernel_dim;
    let start = self.weights_sp_addr_start();

    for och in (0..pochs).step_by(dim) {
      let j = dim.min(pochs - och);
      for krow in 0..kdim {
        for kcol in 0..kdim {
          for kch in (0..kchs).step_by(dim) {
            let k = dim.min(kchs - kch);
            let tap = krow * kdim + kcol;
            let dram = if self.shape.depthwise {
              weights + (tap * self.shape.in_channels) as DramAddr
            } else {
              weights + ((tap * self.shape.in_channels + kch) * self.shape.out_channels + och) as DramAddr
            };
            let sp = start.offset((och / dim) * kdim * kdim * kchs + tap * kchs + kch);
            acc.issue(Instruction::Mvin {
              channel: LoadChannel::Ch1,
              dram,
              dst: SpOperand::new(sp, j, k),
            });
          }
        }
      }
    }
  }

  fn load_bias<A: Accelerator>(&self, acc: &mut A, job: &ConvTileJob, geo: &TileGeometry, bias: DramAddr) {
    let dim = self.dim();
    let d_sp_addr_start = SpAddr::accumulator(0, AccMode::Overwrite);

    for b in 0..job.batches {
      for orow in 0..geo.orows {
        for ocol in (0..geo.ocols).step_by(dim) {
          let i = dim.min(geo.ocols - ocol);
          for och in (0..job.pochs).step_by(dim) {
            let j = dim.min(job.pochs - och);
            let row = (och / dim) * job.batches * geo.orows * geo.ocols + b * geo.orows * geo.ocols + orow * geo.ocols + ocol;
            acc.issue(Instruction::Mvin {
              channel: LoadChannel::Ch2,
              dram: bias + (och * std::mem::size_of::<AccT>()) as DramAddr,
              dst: SpOperand::new(d_sp_addr_start.offset(row), j, i),
            });
          }
        }
      }
    }
  }

  /// Zero-padded input rows. Out-of-bounds pixels are moved in from the zero buffer.
  fn load_input<A: Accelerator>(&self, acc: &mut A, job: &ConvTileJob, geo: &TileGeometry) {
    let dim = self.dim() as i64;
    let in_dim = self.shape.in_dim as i64;
    let pixel = self.shape.in_channels as i64;
    let (irows, icols) = (geo.irows as i64, geo.icols as i64);
    let (lpad, rpad, upad, dpad) = (job.lpad as i64, job.rpad as i64, job.upad as i64, job.dpad as i64);
    let irows_unpadded = irows - upad - dpad;
    let icols_unpadded = icols - lpad - rpad;
    let ichs = job.kchs as i64;
    let row_stride = self.input_row_stride();

    for b in 0..job.batches as i64 {
      for irow in -upad..irows_unpadded + dpad {
        let irow_padded = irow + upad;
        let mut icol = -lpad;

        while icol < icols_unpadded + rpad {
          let i = if icol < 0 {
            dim.min(-icol)
          } else if icol >= icols_unpadded {
            dim.min(icols_unpadded + rpad - icol)
          } else {
            dim.min(icols_unpadded - icol)
          };
          let icol_padded = icol + lpad;
          let is_zeros = irow < 0 || irow >= irows_unpadded || icol < 0 || icol >= icols_unpadded;

          if is_zeros {
            acc.issue(self.input_config(0));
          }
          for ich in (0..ichs).step_by(dim as usize) {
            let k = dim.min(ichs - ich);
            let dram = if is_zeros {
              0
            } else {
              job.input + (((b * in_dim + irow) * in_dim + icol) * pixel + ich) as DramAddr
            };
            let row = (ich / dim) * job.batches as i64 * irows * icols + b * irows * icols + irow_padded * icols + icol_padded;
            acc.issue(Instruction::Mvin {
              channel: LoadChannel::Ch0,
              dram,
              dst: SpOperand::new(SpAddr::scratchpad(row as usize), k as usize, i as usize),
            });
          }
          if is_zeros {
            acc.issue(self.input_config(row_stride));
          }

          icol += i;
        }
      }
    }
  }

  /// Strided gather of a 1x1 kernel's inputs into a dense block.
  fn gather_input<A: Accelerator>(&self, acc: &mut A, job: &ConvTileJob, geo: &TileGeometry) {
    let dim = self.dim();
    let (in_dim, stride, pixel) = (self.shape.in_dim, self.shape.stride, self.shape.in_channels);

    for b in 0..job.batches {
      for orow in 0..geo.orows {
        for ocol in (0..geo.ocols).step_by(dim) {
          let i = dim.min(geo.ocols - ocol);
          for ich in (0..job.kchs).step_by(dim) {
            let k = dim.min(job.kchs - ich);
            let dram = job.input + (((b * in_dim + orow * stride) * in_dim + ocol * stride) * pixel + ich) as DramAddr;
            let row = (ich / dim) * job.batches * geo.orows * geo.ocols + b * geo.orows * geo.ocols + orow * geo.ocols + ocol;
            acc.issue(Instruction::Mvin {
              channel: LoadChannel::Ch0,
              dram,
              dst: SpOperand::new(SpAddr::scratchpad(row), k, i),
            });
          }
        }
      }
    }
  }

  fn compute<A: Accelerator>(&self, acc: &mut A, job: &ConvTileJob, geo: &TileGeometry) {
    let dim = self.dim();
    let kdim = self.shape.kernel_dim;
    let stride = self.shape.stride;
    let b_sp_addr_start = self.weights_sp_addr_start();
    let c_sp_addr_start = SpAddr::accumulator(0, AccMode::Accumulate);
    let overwrites = job.bias.is_none() && job.first_reduction;

    // First-layer rows already hold a whole kernel row of pixels
    let (kcol_step, packed) = match self.kernel {
      ConvKernel::FirstLayer => (kdim, kdim),
      _ => (1, 1),
    };

    for b in 0..job.batches {
      for orow in 0..geo.orows {
        for ocol in (0..geo.ocols).step_by(dim) {
          let i = dim.min(geo.ocols - ocol);
          for och in (0..job.pochs).step_by(dim) {
            let j = dim.min(job.pochs - och);
            let c_row =
              (och / dim) * job.batches * geo.orows * geo.ocols + b * geo.orows * geo.ocols + orow * geo.ocols + ocol;
            let c_sp_addr = c_sp_addr_start.offset(c_row);

            for krow in 0..kdim {
              for kcol in (0..kdim).step_by(kcol_step) {
                for kch in (0..job.kchs).step_by(dim) {
                  let k = dim.min(job.kchs - kch) * packed;
                  let a_row = match self.kernel {
                    ConvKernel::Downsample => {
                      (kch / dim) * job.batches * geo.orows * geo.ocols + b * geo.orows * geo.ocols + orow * geo.ocols + ocol
                    },
                    _ => {
                      let irow = orow * stride + krow;
                      let icol = ocol * stride + kcol;
                      (kch / dim) * job.batches * geo.irows * geo.icols + b * geo.irows * geo.icols + irow * geo.icols + icol
                    },
                  };
                  let b_sp_addr =
                    b_sp_addr_start.offset((och / dim) * kdim * kdim * job.kchs + (krow * kdim + kcol) * job.kchs + kch);

                  let out_sp_addr = if overwrites && krow == 0 && kcol == 0 && kch == 0 {
                    c_sp_addr.with_overwrite()
                  } else {
                    c_sp_addr
                  };

                  acc.issue(Instruction::Preload {
                    bd: SpOperand::new(b_sp_addr, j, k),
                    c: SpOperand::new(out_sp_addr, j, i),
                  });
                  acc.issue(Instruction::ComputePreloaded {
                    a: SpOperand::new(SpAddr::scratchpad(a_row), k, i),
                    bd: SpOperand::new(SpAddr::GARBAGE, j, i),
                  });
                }
              }
            }
          }
        }
      }
    }
  }

  fn store<A: Accelerator>(&self, acc: &mut A, job: &ConvTileJob, geo: &TileGeometry, output: DramAddr) {
    let dim = self.dim();
    let out_dim = self.shape.out_dim;
    let pixel = self.shape.out_channels;
    let c_sp_addr_start = SpAddr::accumulator(0, AccMode::Accumulate);

    let Some(pool) = self.params.pool else {
      for b in 0..job.batches {
        for orow in 0..geo.orows {
          for ocol in (0..geo.ocols).step_by(dim) {
            let i = dim.min(geo.ocols - ocol);
            for och in (0..job.pochs).step_by(dim) {
              let j = dim.min(job.pochs - och);
              let c_row =
                (och / dim) * job.batches * geo.orows * geo.ocols + b * geo.orows * geo.ocols + orow * geo.ocols + ocol;
              acc.issue(Instruction::Mvout {
                dram: output + (((b * out_dim + orow) * out_dim + ocol) * pixel + och) as DramAddr,
                src: SpOperand::new(c_sp_addr_start.offset(c_row), j, i),
              });
            }
          }
        }
      }
      return;
    };

    let pool_out_dim = pool.out_dim(out_dim);
    acc.issue(Instruction::ConfigStore {
      stride: pixel as u64,
      pool: Some(PoolConfig {
        size: pool.size as u8,
        stride: pool.stride as u8,
        out_dim: pool_out_dim as u8,
        porows: job.porows as u8,
        pocols: job.pocols as u8,
        orows: geo.orows as u8,
        ocols: geo.ocols as u8,
        upad: job.pupad as u8,
        lpad: job.plpad as u8,
      }),
    });
    acc.issue(Instruction::Fence);

    for b in 0..job.batches {
      for poch in (0..job.pochs).step_by(dim) {
        let channels = dim.min(job.pochs - poch);
        let c_row = (poch / dim) * job.batches * geo.orows * geo.ocols + b * geo.orows * geo.ocols;
        acc.issue(Instruction::Mvout {
          dram: output + (b * pool_out_dim * pool_out_dim * pixel + poch) as DramAddr,
          src: SpOperand::new(c_sp_addr_start.offset(c_row), channels, 0),
        });
      }
    }

    acc.issue(Instruction::ConfigStore {
      stride: pixel as u64,
      pool: None,
    });
    acc.issue(Instruction::Fence);
  }

  /// Bias, inputs and weights in; compute; outputs out.
  pub fn run_tile<A: Accelerator>(&self, acc: &mut A, job: &ConvTileJob) {
    let geo = self.geometry(job);

    if let Some(bias) = job.bias {
      self.load_bias(acc, job, &geo, bias);
    }
    match self.kernel {
      ConvKernel::Downsample => self.gather_input(acc, job, &geo),
      _ => self.load_input(acc, job, &geo),
    }
    if let Some(weights) = job.weights {
      self.load_weights(acc, weights, job.pochs, job.kchs);
    }

    self.compute(acc, job, &geo);

    if let Some(output) = job.output {
      self.store(acc, job, &geo, output);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemmini::isa::InstructionTrace;

  fn executor<'a>(shape: &'a ConvShape, params: &'a ConvParams, cap: &'a HardwareCapacity) -> ConvExecutor<'a> {
    let tile = ConvTile::full(shape, params);
    ConvExecutor {
      shape,
      params,
      cap,
      kernel: ConvKernel::select(shape, &tile, cap),
      weight_banks: 1,
    }
  }

  #[test]
  fn test_kernel_selection() {
    let cap = HardwareCapacity::default();
    let rgb = ConvShape::new(1, 32, 3, 16, 1, 1, 3);
    let tile = ConvTile::full(&rgb, &ConvParams::default());
    assert_eq!(ConvKernel::select(&rgb, &tile, &cap), ConvKernel::FirstLayer);
    let partial = ConvTile { kchs: 2, ..tile };
    assert_eq!(ConvKernel::select(&rgb, &partial, &cap), ConvKernel::Standard);

    let ds = ConvShape::new(1, 32, 64, 128, 2, 0, 1);
    let tile = ConvTile::full(&ds, &ConvParams::default());
    assert_eq!(ConvKernel::select(&ds, &tile, &cap), ConvKernel::Downsample);
    assert_eq!(ConvKernel::Downsample.a_stride(&ds), 1);
    assert!(ConvKernel::Downsample.weights_resident(&ds, &tile));
  }

  #[test]
  fn test_padded_border_reads_zero_buffer() {
    let cap = HardwareCapacity::default();
    let shape = ConvShape::new(1, 4, 16, 16, 1, 1, 3);
    let params = ConvParams::default();
    let exec = executor(&shape, &params, &cap);
    let job = ConvTileJob {
      batches: 1,
      porows: 4,
      pocols: 4,
      pochs: 16,
      kchs: 16,
      lpad: 1,
      rpad: 1,
      upad: 1,
      dpad: 1,
      input: 0x1000,
      weights: Some(0x2000),
      output: Some(0x3000),
      first_reduction: true,
      ..ConvTileJob::default()
    };
    let mut trace = InstructionTrace::new();
    exec.run_tile(&mut trace, &job);

    let mvins: Vec<_> = trace
      .instructions()
      .iter()
      .filter_map(|insn| match insn {
        Instruction::Mvin {
          channel: LoadChannel::Ch0,
          dram,
          dst,
        } => Some((*dram, *dst)),
        _ => None,
      })
      .collect();
    // every padded row is left pad, body, right pad
    assert_eq!(mvins.len(), 6 * 3);
    assert_eq!(mvins[0], (0, SpOperand::new(SpAddr::scratchpad(0), 16, 1)));
    assert_eq!(mvins[1], (0, SpOperand::new(SpAddr::scratchpad(1), 16, 4)));
    assert_eq!(mvins[3], (0, SpOperand::new(SpAddr::scratchpad(6), 16, 1)));
    assert_eq!(mvins[4], (0x1000, SpOperand::new(SpAddr::scratchpad(7), 16, 4)));

    let first_preload = trace.instructions().iter().find_map(|insn| match insn {
      Instruction::Preload { c, .. } => Some(c.addr),
      _ => None,
    });
    assert!(!first_preload.unwrap().accumulates());
  }

  #[test]
  fn test_pooled_store_is_fenced() {
    let cap = HardwareCapacity::default();
    let shape = ConvShape::new(1, 8, 16, 16, 1, 1, 3);
    let params = ConvParams {
      pool: Some(Pool {
        size: 2,
        stride: 2,
        padding: 0,
      }),
      ..ConvParams::default()
    };
    let exec = executor(&shape, &params, &cap);
    let job = ConvTileJob {
      batches: 1,
      porows: 4,
      pocols: 4,
      pochs: 16,
      kchs: 16,
      lpad: 1,
      rpad: 1,
      upad: 1,
      dpad: 1,
      input: 0x1000,
      weights: Some(0x2000),
      output: Some(0x3000),
      first_reduction: true,
      ..ConvTileJob::default()
    };
    let mut trace = InstructionTrace::new();
    exec.run_tile(&mut trace, &job);

    let tail = &trace.instructions()[trace.len() - 4..];
    assert!(matches!(tail[0], Instruction::Fence));
    assert!(matches!(tail[1], Instruction::Mvout { .. }));
    assert_eq!(tail[2], Instruction::ConfigStore { stride: 16, pool: None });
    assert!(matches!(tail[3], Instruction::Fence));
  }
}
