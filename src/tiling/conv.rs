use serde::{Deserialize, Serialize};

use crate::arch::gemmini::params::HardwareCapacity;
use crate::error::{ensure, GemtileError, Result};
use crate::op::{ConvParams, ConvShape, Pool};

/// Widest pooled-store extent the store configuration can describe.
pub const MAX_POOL_EXTENT: usize = 0xFF;
/// Largest pool window, stride or padding the store configuration can describe.
pub const MAX_POOL_PARAM: usize = 0b11;

/// Convolution tile extents. Spatial extents count pooled output pixels, channel extents
/// count channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvTile {
  pub batches: usize,
  pub porows: usize,
  pub pocols: usize,
  pub pochs: usize,
  pub krows: usize,
  pub kcols: usize,
  pub kchs: usize,
}

impl ConvTile {
  /// The whole operation as a single tile.
  pub fn full(shape: &ConvShape, params: &ConvParams) -> Self {
    let pool_out_dim = params.pool_out_dim(shape.out_dim);
    Self {
      batches: shape.batch_size,
      porows: pool_out_dim,
      pocols: pool_out_dim,
      pochs: shape.out_channels,
      krows: shape.kernel_dim,
      kcols: shape.kernel_dim,
      kchs: shape.in_channels,
    }
  }

  /// Pre-pool output rows and cols covered by the tile.
  pub fn output_extent(&self, pool: Pool) -> (usize, usize) {
    (
      self.porows * pool.stride + pool.size - 1,
      self.pocols * pool.stride + pool.size - 1,
    )
  }

  pub fn input_rows(&self, stride: usize, pool: Pool, dim: usize) -> usize {
    let (orows, ocols) = self.output_extent(pool);
    let irows = orows * stride + self.krows - 1;
    let icols = ocols * stride + self.kcols - 1;
    self.kchs.div_ceil(dim) * self.batches * irows * icols
  }

  pub fn weight_rows(&self, dim: usize) -> usize {
    self.pochs.div_ceil(dim) * self.kcols * self.krows * self.kchs
  }

  pub fn acc_rows(&self, pool: Pool, dim: usize) -> usize {
    let (orows, ocols) = self.output_extent(pool);
    self.pochs.div_ceil(dim) * self.batches * orows * ocols
  }
}

/// Order in which tile extents give way to memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrowthPolicy {
  /// Output channels first, then the spatial extent
  General,
  /// One channel at a time; spatial extent, then batch
  Depthwise,
  /// Few input channels packed across kernel columns
  FirstLayer,
  /// Weights take two banks; the largest of batch and spatial extent shrinks
  LargeChannel,
  /// Input channels are tiled as well
  DeepChannel,
}

impl GrowthPolicy {
  /// Pick the policy matching which dimension dominates memory pressure.
  pub fn classify(shape: &ConvShape, cap: &HardwareCapacity) -> Self {
    let taps = shape.kernel_dim * shape.kernel_dim;
    let och_block_rows = taps * shape.in_channels;

    if shape.depthwise {
      GrowthPolicy::Depthwise
    } else if shape.kernel_dim > 1 && shape.in_channels * shape.kernel_dim <= cap.dim {
      GrowthPolicy::FirstLayer
    } else if och_block_rows > 2 * cap.bank_rows {
      GrowthPolicy::DeepChannel
    } else if och_block_rows * shape.out_channels.div_ceil(cap.dim) > cap.bank_rows {
      GrowthPolicy::LargeChannel
    } else {
      GrowthPolicy::General
    }
  }

  /// Scratchpad banks reserved for weights.
  pub fn weight_banks(self, shape: &ConvShape) -> usize {
    match self {
      GrowthPolicy::General | GrowthPolicy::Depthwise | GrowthPolicy::FirstLayer => 1,
      GrowthPolicy::LargeChannel => 2,
      GrowthPolicy::DeepChannel => {
        if shape.in_channels > 500 {
          3
        } else {
          2
        }
      },
    }
  }
}

/// Tile extents chosen for one convolution together with the bank split they assume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvPlan {
  pub policy: GrowthPolicy,
  pub tile: ConvTile,
  pub weight_banks: usize,
}

/// Validate the pool window against what the store configuration can carry.
pub fn validate_pool(shape: &ConvShape, params: &ConvParams) -> Result<()> {
  let Some(pool) = params.pool else {
    return Ok(());
  };
  ensure(pool.size > 0 && pool.stride > 0, || format!("pool {:?} has a zero window or stride", pool))?;
  ensure(
    pool.size <= MAX_POOL_PARAM && pool.stride <= MAX_POOL_PARAM && pool.padding <= MAX_POOL_PARAM,
    || format!("pool {:?} exceeds the store configuration's 2-bit fields", pool),
  )?;
  ensure(pool.padding < pool.size, || format!("pool padding {} swallows the window {}", pool.padding, pool.size))?;
  ensure(shape.out_dim + 2 * pool.padding >= pool.size, || {
    format!("pool window {} is larger than the padded output {}", pool.size, shape.out_dim + 2 * pool.padding)
  })?;
  let pool_out_dim = pool.out_dim(shape.out_dim);
  ensure(pool_out_dim <= MAX_POOL_EXTENT, || {
    format!("pooled output dim {} exceeds the store configuration's 8-bit field", pool_out_dim)
  })
}

/// Mutable search state shared by every growth policy.
struct Search<'a> {
  shape: &'a ConvShape,
  pool: Pool,
  cap: &'a HardwareCapacity,
  tile: ConvTile,
  och_floor: usize,
  kch_floor: usize,
  weight_budget: usize,
  input_budget: usize,
}

impl<'a> Search<'a> {
  fn acc(&self) -> usize {
    self.tile.acc_rows(self.pool, self.cap.dim)
  }

  fn weight(&self) -> usize {
    self.tile.weight_rows(self.cap.dim)
  }

  fn input(&self) -> usize {
    self.tile.input_rows(self.shape.stride, self.pool, self.cap.dim)
  }

  fn stuck(&self, what: &str) -> GemtileError {
    GemtileError::configuration(format!(
      "no tile of {:?} fits the {}: reached {:?}",
      self.shape, what, self.tile
    ))
  }

  fn shrink_och(&mut self) -> Result<()> {
    if self.och_floor <= 1 {
      return Err(self.stuck("weight or accumulator budget"));
    }
    self.och_floor -= 1;
    self.tile.pochs = self.och_floor * self.cap.dim;
    Ok(())
  }

  fn shrink_kch(&mut self) -> Result<()> {
    if self.kch_floor <= 1 {
      return Err(self.stuck("input channel budget"));
    }
    self.kch_floor -= 1;
    self.tile.kchs = self.kch_floor * self.cap.dim;
    Ok(())
  }

  fn shrink_spatial(&mut self) -> Result<()> {
    if self.tile.porows <= 1 || self.tile.pocols <= 1 {
      return Err(self.stuck("accumulator"));
    }
    self.tile.porows -= 1;
    self.tile.pocols -= 1;
    Ok(())
  }

  fn shrink_batch(&mut self) -> Result<()> {
    if self.tile.batches <= 1 {
      return Err(self.stuck("accumulator"));
    }
    self.tile.batches -= 1;
    Ok(())
  }

  /// Decrement the largest of batch, rows and cols; the first one wins ties.
  fn shrink_largest(&mut self, what: &str) -> Result<()> {
    let t = self.tile;
    if t.batches.max(t.porows).max(t.pocols) <= 1 {
      return Err(self.stuck(what));
    }
    if t.batches >= t.porows && t.batches >= t.pocols {
      self.tile.batches -= 1;
    } else if t.porows >= t.pocols {
      self.tile.porows -= 1;
    } else {
      self.tile.pocols -= 1;
    }
    Ok(())
  }

  /// Like `shrink_largest`, with input channels competing too while they can shrink.
  fn shrink_largest_with_kch(&mut self) -> Result<()> {
    let t = self.tile;
    let mut best = (t.batches, 0);
    for (value, idx) in [(t.porows, 1), (t.pocols, 2)] {
      if value > best.0 {
        best = (value, idx);
      }
    }
    if self.kch_floor > 1 && t.kchs > best.0 {
      best = (t.kchs, 4);
    }
    match best.1 {
      4 => self.shrink_kch(),
      _ if best.0 <= 1 => Err(self.stuck("input budget")),
      0 => {
        self.tile.batches -= 1;
        Ok(())
      },
      1 => {
        self.tile.porows -= 1;
        Ok(())
      },
      _ => {
        self.tile.pocols -= 1;
        Ok(())
      },
    }
  }

  fn fit_weights(&mut self, mut step: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
    while self.weight() > self.weight_budget {
      step(self)?;
    }
    Ok(())
  }

  fn fit_acc(&mut self, mut step: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
    while self.acc() > self.cap.acc_rows {
      step(self)?;
    }
    Ok(())
  }

  fn fit_input(&mut self, mut step: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
    while self.input() > self.input_budget {
      step(self)?;
    }
    Ok(())
  }

  fn run(&mut self, policy: GrowthPolicy) -> Result<()> {
    match policy {
      GrowthPolicy::General => {
        self.fit_weights(Self::shrink_och)?;
        self.fit_acc(Self::shrink_spatial)?;
      },
      GrowthPolicy::Depthwise => {
        self.fit_acc(|s| if s.tile.porows != 1 { s.shrink_spatial() } else { s.shrink_batch() })?;
      },
      GrowthPolicy::FirstLayer => {
        self.fit_acc(|s| {
          if s.tile.porows != 1 {
            s.shrink_spatial()
          } else if s.tile.pochs >= s.tile.batches {
            s.shrink_och()
          } else {
            s.shrink_batch()
          }
        })?;
        self.fit_weights(Self::shrink_och)?;
      },
      GrowthPolicy::LargeChannel => {
        self.fit_weights(Self::shrink_och)?;
        self.fit_acc(|s| s.shrink_largest("accumulator"))?;
        self.fit_input(|s| s.shrink_largest("input budget"))?;
      },
      GrowthPolicy::DeepChannel => {
        self.fit_weights(|s| if s.kch_floor > s.och_floor { s.shrink_kch() } else { s.shrink_och() })?;
        self.fit_acc(|s| {
          if s.tile.porows <= 7 {
            if s.tile.batches > 1 {
              s.shrink_batch()
            } else {
              s.shrink_och()
            }
          } else if s.tile.batches * 2 < s.tile.porows {
            s.shrink_spatial()
          } else {
            s.shrink_batch()
          }
        })?;
        self.fit_input(Self::shrink_largest_with_kch)?;
      },
    }
    self.fit_input(|s| s.shrink_largest("input budget"))
  }
}

/// Search the tile extents for `shape` under `policy`.
pub fn plan_conv(
  shape: &ConvShape,
  params: &ConvParams,
  policy: GrowthPolicy,
  cap: &HardwareCapacity,
) -> Result<ConvPlan> {
  shape.validate()?;
  validate_pool(shape, params)?;

  let weight_banks = policy.weight_banks(shape);
  ensure(weight_banks < cap.bank_num, || {
    format!("{:?} needs {} weight banks but only {} banks exist", policy, weight_banks, cap.bank_num)
  })?;

  let pool = params.pool_window();
  let mut tile = ConvTile::full(shape, params);
  if policy == GrowthPolicy::Depthwise {
    tile.pochs = 1;
    tile.kchs = 1;
  }

  let mut search = Search {
    shape,
    pool,
    cap,
    tile,
    och_floor: tile.pochs / cap.dim + 1,
    kch_floor: tile.kchs / cap.dim + 1,
    weight_budget: weight_banks * cap.bank_rows,
    input_budget: (cap.bank_num - weight_banks) * cap.bank_rows,
  };
  search.run(policy)?;

  let mut tile = search.tile;
  tile.pochs = tile.pochs.min(shape.out_channels);
  tile.kchs = tile.kchs.min(shape.in_channels);
  if params.pool.is_some() {
    let max_porows = (MAX_POOL_EXTENT + 1 - pool.size) / pool.stride;
    tile.porows = tile.porows.min(max_porows);
    tile.pocols = tile.pocols.min(max_porows);
  }

  log::debug!("conv {:?} under {:?}: tile {:?}, {} weight banks", shape, policy, tile, weight_banks);
  Ok(ConvPlan {
    policy,
    tile,
    weight_banks,
  })
}

/// Reject a convolution tile the accelerator cannot hold.
pub fn validate_conv_tile(
  shape: &ConvShape,
  params: &ConvParams,
  tile: &ConvTile,
  weight_banks: usize,
  cap: &HardwareCapacity,
) -> Result<()> {
  let pool = params.pool_window();
  let pool_out_dim = params.pool_out_dim(shape.out_dim);

  ensure(
    [tile.batches, tile.porows, tile.pocols, tile.pochs, tile.kchs].iter().all(|&x| x > 0),
    || format!("tile {:?} has a non-positive extent", tile),
  )?;
  ensure(
    tile.batches <= shape.batch_size
      && tile.porows <= pool_out_dim
      && tile.pocols <= pool_out_dim
      && tile.pochs <= shape.out_channels
      && tile.kchs <= shape.in_channels,
    || format!("tile {:?} exceeds the operation {:?}", tile, shape),
  )?;
  ensure(tile.krows == shape.kernel_dim && tile.kcols == shape.kernel_dim, || {
    format!("kernel extents {}x{} must cover the whole {}x{} kernel", tile.krows, tile.kcols, shape.kernel_dim, shape.kernel_dim)
  })?;
  if shape.depthwise {
    ensure(tile.pochs == 1 && tile.kchs == 1, || "depthwise tiles hold one channel".to_string())?;
  }
  ensure(weight_banks > 0 && weight_banks < cap.bank_num, || {
    format!("{} weight banks leave no room for inputs in {} banks", weight_banks, cap.bank_num)
  })?;

  let dim = cap.dim;
  let weight_rows = tile.weight_rows(dim);
  ensure(weight_rows <= weight_banks * cap.bank_rows, || {
    format!("not enough scratchpad space to store weights: {} rows", weight_rows)
  })?;
  let input_rows = tile.input_rows(shape.stride, pool, dim);
  ensure(input_rows <= (cap.bank_num - weight_banks) * cap.bank_rows, || {
    format!("not enough scratchpad space to store inputs: {} rows", input_rows)
  })?;
  let acc_rows = tile.acc_rows(pool, dim);
  ensure(acc_rows <= cap.acc_rows, || {
    format!("not enough accumulator space to store outputs: {} rows", acc_rows)
  })?;

  if params.pool.is_some() {
    let (orows, ocols) = tile.output_extent(pool);
    ensure(orows <= MAX_POOL_EXTENT && ocols <= MAX_POOL_EXTENT, || {
      format!("pooled tile covers {}x{} outputs, more than the store configuration holds", orows, ocols)
    })?;
  }
  Ok(())
}
