//! Functional model of the accelerator: a scratchpad, an accumulator, a `dim`×`dim`
//! processing array and a DMA view of host memory. Instructions execute in issue order.

use super::address::SpAddr;
use super::dram::Dram;
use super::isa::{Accelerator, Instruction, LoadChannel, PoolConfig, RawInstruction, SpOperand};
use super::numeric::{mvin_scale, mvin_scale_acc, rounding_right_shift, scale_and_sat};
use super::params::{
  AccScaleT, AccT, Activation, Dataflow, DramAddr, ElemT, HardwareCapacity, RegT, ScaleT, ACC_SCALE_IDENTITY,
  ELEM_T_MAX, ELEM_T_MIN, LOAD_STATES, MVIN_SCALE_IDENTITY,
};

pub struct GemminiState {
  // Address and configuration
  pub preload: SpOperand,
  pub output: SpOperand,

  // Dataflow and activation
  pub mode: Dataflow,
  pub act: Activation,
  pub sys_shift: u32,
  pub acc_scale: AccScaleT,
  pub relu6_shift: u32,
  pub a_stride: u16,
  pub c_stride: u16,
  pub a_transpose: bool,
  pub b_transpose: bool,

  // Load/store configuration
  pub load_strides: [RegT; LOAD_STATES],
  pub load_block_strides: [u16; LOAD_STATES],
  pub load_shrunks: [bool; LOAD_STATES],
  pub load_scales: [ScaleT; LOAD_STATES],
  pub pixels_per_rows: [u8; LOAD_STATES],
  pub store_stride: RegT,
  pub pool: Option<PoolConfig>,

  // Loop WS configuration
  pub loop_ws_i: u16,
  pub loop_ws_j: u16,
  pub loop_ws_k: u16,
  pub loop_ws_pad_i: u16,
  pub loop_ws_pad_j: u16,
  pub loop_ws_pad_k: u16,
  pub loop_ws_a: DramAddr,
  pub loop_ws_b: DramAddr,
  pub loop_ws_d: DramAddr,
  pub loop_ws_c: DramAddr,
  pub loop_ws_a_stride: u64,
  pub loop_ws_b_stride: u64,
  pub loop_ws_d_stride: u64,
  pub loop_ws_c_stride: u64,

  // Memories
  pub spad: Vec<Vec<ElemT>>,
  pub accumulator: Vec<Vec<AccT>>,
  pub pe_state: Vec<Vec<AccT>>,
}

impl GemminiState {
  pub fn new(cap: &HardwareCapacity) -> Self {
    let unset = SpOperand::new(SpAddr::GARBAGE, 0, 0);
    Self {
      preload: unset,
      output: unset,
      mode: Dataflow::OS,
      act: Activation::None,
      sys_shift: 0,
      acc_scale: ACC_SCALE_IDENTITY,
      relu6_shift: 0,
      a_stride: 1,
      c_stride: 1,
      a_transpose: false,
      b_transpose: false,
      load_strides: [0; LOAD_STATES],
      load_block_strides: [cap.dim as u16; LOAD_STATES],
      load_shrunks: [false; LOAD_STATES],
      load_scales: [MVIN_SCALE_IDENTITY; LOAD_STATES],
      pixels_per_rows: [1; LOAD_STATES],
      store_stride: cap.dim as RegT,
      pool: None,
      loop_ws_i: 0,
      loop_ws_j: 0,
      loop_ws_k: 0,
      loop_ws_pad_i: 0,
      loop_ws_pad_j: 0,
      loop_ws_pad_k: 0,
      loop_ws_a: 0,
      loop_ws_b: 0,
      loop_ws_d: 0,
      loop_ws_c: 0,
      loop_ws_a_stride: 0,
      loop_ws_b_stride: 0,
      loop_ws_d_stride: 0,
      loop_ws_c_stride: 0,
      spad: vec![vec![0; cap.dim]; cap.sp_rows()],
      accumulator: vec![vec![0; cap.dim]; cap.acc_rows],
      pe_state: vec![vec![0; cap.dim]; cap.dim],
    }
  }
}

pub struct Gemmini {
  pub state: GemminiState,
  pub dram: Dram,
  cap: HardwareCapacity,
  issued: usize,
}

impl Gemmini {
  pub fn new(cap: HardwareCapacity) -> Self {
    log::info!("Gemmini model configured with:");
    log::info!("    dim = {}", cap.dim);
    log::info!("    scratchpad = {} banks x {} rows", cap.bank_num, cap.bank_rows);
    log::info!("    accumulator = {} rows", cap.acc_rows);
    Self {
      state: GemminiState::new(&cap),
      dram: Dram::new(),
      cap,
      issued: 0,
    }
  }

  pub fn capacity(&self) -> &HardwareCapacity {
    &self.cap
  }

  /// Number of instructions executed so far.
  pub fn issued(&self) -> usize {
    self.issued
  }

  pub fn reset(&mut self) {
    self.state = GemminiState::new(&self.cap);
  }

  pub fn execute(&mut self, funct: u64, xs1: RegT, xs2: RegT) {
    let raw = RawInstruction { funct, rs1: xs1, rs2: xs2 };
    match raw.decode() {
      Some(insn) => self.execute_insn(insn),
      None => log::error!("GEMMINI: encountered unknown instruction with funct: {}", funct),
    }
  }

  fn execute_insn(&mut self, insn: Instruction) {
    self.issued += 1;
    match insn {
      Instruction::ConfigEx {
        dataflow,
        act,
        sys_shift,
        acc_scale,
        relu6_shift,
        a_stride,
        a_transpose,
        b_transpose,
      } => {
        self.state.mode = dataflow;
        self.state.act = act;
        self.state.sys_shift = sys_shift;
        self.state.acc_scale = acc_scale;
        self.state.relu6_shift = relu6_shift;
        self.state.a_stride = a_stride;
        self.state.a_transpose = a_transpose;
        self.state.b_transpose = b_transpose;
        log::info!(
          "GEMMINI: config_ex - set mode to {:?}, activation to {:?}, acc scale to {:?}, a stride to {}, a transpose to {:?}, b transpose to {:?}",
          dataflow,
          act,
          acc_scale,
          a_stride,
          a_transpose,
          b_transpose
        );
      },
      Instruction::ConfigLoad {
        channel,
        stride,
        scale,
        shrunk,
        block_stride,
        pixels_per_row,
      } => {
        let id = channel.index();
        self.state.load_strides[id] = stride;
        self.state.load_scales[id] = scale;
        self.state.load_shrunks[id] = shrunk;
        self.state.load_block_strides[id] = block_stride;
        self.state.pixels_per_rows[id] = pixels_per_row.max(1);
        log::info!(
          "GEMMINI: config_ld - channel {} stride {} scale {:?} shrunk {} block stride {} pixels per row {}",
          id,
          stride,
          scale,
          shrunk,
          block_stride,
          self.state.pixels_per_rows[id]
        );
      },
      Instruction::ConfigStore { stride, pool } => {
        self.state.store_stride = stride;
        self.state.pool = pool;
        log::info!("GEMMINI: config_st - set store stride to {}, pool to {:?}", stride, pool);
      },
      Instruction::Mvin { channel, dram, dst } => self.mvin(dram, dst, channel),
      Instruction::Mvout { dram, src } => self.mvout(dram, src),
      Instruction::Preload { bd, c } => {
        self.state.preload = bd;
        self.state.output = c;
        log::info!(
          "GEMMINI: preload - scratchpad output addr = {}, scratchpad preload addr = {}",
          c.addr,
          bd.addr
        );
      },
      Instruction::ComputePreloaded { a, bd } => self.compute(a, bd, true),
      Instruction::ComputeAccumulated { a, bd } => self.compute(a, bd, false),
      Instruction::LoopWsBounds {
        i,
        j,
        k,
        pad_i,
        pad_j,
        pad_k,
      } => {
        self.state.loop_ws_i = i;
        self.state.loop_ws_j = j;
        self.state.loop_ws_k = k;
        self.state.loop_ws_pad_i = pad_i;
        self.state.loop_ws_pad_j = pad_j;
        self.state.loop_ws_pad_k = pad_k;
      },
      Instruction::LoopWsAddrsAB { a, b } => {
        self.state.loop_ws_a = a;
        self.state.loop_ws_b = b;
      },
      Instruction::LoopWsAddrsDC { d, c } => {
        self.state.loop_ws_d = d;
        self.state.loop_ws_c = c;
      },
      Instruction::LoopWsStridesAB { a, b } => {
        self.state.loop_ws_a_stride = a;
        self.state.loop_ws_b_stride = b;
      },
      Instruction::LoopWsStridesDC { d, c } => {
        self.state.loop_ws_d_stride = d;
        self.state.loop_ws_c_stride = c;
      },
      Instruction::LoopWs {
        ex_accumulate,
        full_c,
        low_d,
        a_transpose,
        b_transpose,
      } => self.loop_ws(ex_accumulate, full_c, low_d, a_transpose, b_transpose),
      Instruction::Flush => log::info!("GEMMINI: flush"),
      Instruction::Fence => log::info!("GEMMINI: fence"),
    }
  }

  fn spad_row(&self, row: usize) -> usize {
    if row >= self.state.spad.len() {
      panic!("ERROR: scratchpad row {} out of range ({} rows)", row, self.state.spad.len());
    }
    row
  }

  fn acc_row(&self, row: usize) -> usize {
    if row >= self.state.accumulator.len() {
      panic!("ERROR: accumulator row {} out of range ({} rows)", row, self.state.accumulator.len());
    }
    row
  }

  // Core Gemmini operations
  pub fn mvin(&mut self, dram_addr: DramAddr, dst: SpOperand, channel: LoadChannel) {
    let id = channel.index();
    let accumulator = dst.addr.is_accumulator();
    let accumulate = dst.addr.accumulates();
    let base_row_addr = dst.addr.row();
    let cols = dst.cols as usize;
    let rows = dst.rows as usize;
    let dim = self.cap.dim;

    let is_zeros = dram_addr == 0;

    let load_stride = self.state.load_strides[id];
    let load_block_stride = self.state.load_block_strides[id] as usize;
    let load_scale = self.state.load_scales[id];
    let shrunk = self.state.load_shrunks[id];
    let pixels_per_row = self.state.pixels_per_rows[id] as usize;

    log::info!(
      "GEMMINI: mvin - 0x{:02x} cols and 0x{:02x} rows from 0x{:08x} to addr {}",
      cols,
      rows,
      dram_addr,
      dst.addr
    );

    if dst.addr.is_dont_care() {
      return;
    }

    for row in 0..rows {
      let dram_row_addr = dram_addr + row as u64 * load_stride;

      for col in 0..cols {
        let block = col / dim;
        let spad_col = col % dim;
        let spad_row = base_row_addr + row + block * load_block_stride;

        for pixel in 0..pixels_per_row {
          if pixel > spad_row {
            break;
          }
          let target_col = spad_col + pixel * cols;
          if target_col >= dim {
            break;
          }

          if accumulator {
            let value: AccT = if is_zeros {
              0
            } else if shrunk {
              let elem = self.dram.read_i8(dram_row_addr + col as u64);
              mvin_scale_acc(elem as AccT, load_scale)
            } else {
              let word = self.dram.read_i32(dram_row_addr + (col * std::mem::size_of::<AccT>()) as u64);
              mvin_scale_acc(word, load_scale)
            };

            let r = self.acc_row(spad_row - pixel);
            if accumulate {
              self.state.accumulator[r][target_col] = self.state.accumulator[r][target_col].wrapping_add(value);
            } else {
              self.state.accumulator[r][target_col] = value;
            }
          } else {
            let value: ElemT = if is_zeros {
              0
            } else {
              mvin_scale(self.dram.read_i8(dram_row_addr + col as u64), load_scale)
            };

            let r = self.spad_row(spad_row - pixel);
            self.state.spad[r][target_col] = value;
          }
        }
      }
    }
  }

  fn read_out(&self, accumulator: bool, row: usize, col: usize) -> ElemT {
    if accumulator {
      let acc_value = self.state.accumulator[self.acc_row(row)][col];
      scale_and_sat(acc_value, self.state.act, self.state.acc_scale, self.state.relu6_shift)
    } else {
      self.state.spad[self.spad_row(row)][col]
    }
  }

  pub fn mvout(&mut self, dram_addr: DramAddr, src: SpOperand) {
    let accumulator = src.addr.is_accumulator();
    let full = src.addr.is_full_width();
    let base_row_addr = src.addr.row();
    let cols = src.cols as usize;
    let rows = src.rows as usize;
    let dim = self.cap.dim;

    log::info!(
      "GEMMINI: mvout - 0x{:02x} cols and 0x{:02x} rows from {} to addr 0x{:08x}",
      cols,
      rows,
      src.addr,
      dram_addr
    );

    let Some(pool) = self.state.pool else {
      // No pooling
      for i in 0..rows {
        let dram_row_addr = dram_addr + i as u64 * self.state.store_stride;

        for j in 0..cols {
          let block = j / dim;
          let spad_col = j % dim;
          let spad_row = base_row_addr + block * dim + i;

          if accumulator && full {
            let acc_value = self.state.accumulator[self.acc_row(spad_row)][spad_col];
            let dram_byte_addr = dram_row_addr + (j * std::mem::size_of::<AccT>()) as u64;
            self.dram.write_i32(dram_byte_addr, acc_value);
          } else {
            let value = self.read_out(accumulator, spad_row, spad_col);
            self.dram.write_i8(dram_row_addr + j as u64, value);
          }
        }
      }
      return;
    };

    // Perform pooling
    let pool_stride = pool.stride as usize;
    let pool_size = pool.size as usize;
    let pool_out_dim = pool.out_dim as usize;
    let orows = pool.orows as i64;
    let ocols = pool.ocols as i64;
    let pupad = pool.upad as i64;
    let plpad = pool.lpad as i64;
    let channels = cols;

    for porow in 0..pool.porows as usize {
      for pocol in 0..pool.pocols as usize {
        for poch in 0..channels {
          let mut value = ELEM_T_MIN;

          for wrow in 0..pool_size {
            for wcol in 0..pool_size {
              let orow = (porow * pool_stride + wrow) as i64 - pupad;
              let ocol = (pocol * pool_stride + wcol) as i64 - plpad;

              let elem = if orow < 0 || ocol < 0 || orow >= orows || ocol >= ocols {
                0
              } else {
                let row_addr = base_row_addr + (orow * ocols + ocol) as usize;
                self.read_out(accumulator, row_addr, poch)
              };

              if elem > value {
                value = elem;
              }
            }
          }

          let dram_byte_addr =
            dram_addr + (porow * pool_out_dim + pocol) as u64 * self.state.store_stride + poch as u64;
          self.dram.write_i8(dram_byte_addr, value);
        }
      }
    }
  }

  pub fn compute(&mut self, a: SpOperand, bd: SpOperand, preload: bool) {
    let dim = self.cap.dim;
    let a_rows = a.rows as usize;
    let a_cols = a.cols as usize;
    let bd_rows = bd.rows as usize;
    let bd_cols = bd.cols as usize;

    log::info!(
      "GEMMINI: compute - preload = {}, scratchpad A addr = {}, scratchpad B addr {}",
      preload,
      a.addr,
      bd.addr
    );

    // Preload
    if preload {
      let pre = self.state.preload;
      let preload_transpose = self.state.mode == Dataflow::WS && self.state.b_transpose;
      for i in 0..dim {
        for j in 0..dim {
          let r = if preload_transpose { j } else { i };
          let c = if preload_transpose { i } else { j };

          self.state.pe_state[i][j] = if i < pre.rows as usize && j < pre.cols as usize {
            if pre.addr.is_dont_care() {
              0
            } else {
              self.state.spad[self.spad_row(pre.addr.row() + r)][c] as AccT
            }
          } else {
            0
          };
        }
      }
    }

    // Compute
    let mut results = vec![vec![0 as AccT; dim]; dim];
    if self.state.mode == Dataflow::WS && !bd.addr.is_dont_care() {
      for i in 0..bd_rows.min(dim) {
        for j in 0..bd_cols.min(dim) {
          results[i][j] = self.state.spad[self.spad_row(bd.addr.row() + i)][j] as AccT;
        }
      }
    }

    let a_stride = self.state.a_stride as usize;
    for i in 0..dim {
      for j in 0..dim {
        for k in 0..dim {
          let a_val = if !a.addr.is_dont_care() && i < a_rows && k < a_cols {
            let r = if self.state.a_transpose { k } else { i * a_stride };
            let c = if self.state.a_transpose { i } else { k };
            self.state.spad[self.spad_row(a.addr.row() + r)][c] as AccT
          } else {
            0
          };

          if self.state.mode == Dataflow::WS {
            results[i][j] += a_val * self.state.pe_state[k][j];
          } else {
            let b_val = if !bd.addr.is_dont_care() && k < bd_rows && j < bd_cols {
              let r = if self.state.b_transpose { j } else { k };
              let c = if self.state.b_transpose { k } else { j };
              self.state.spad[self.spad_row(bd.addr.row() + r)][c] as AccT
            } else {
              0
            };

            self.state.pe_state[i][j] += a_val * b_val;
          }
        }
      }
    }

    // Write results
    let out = self.state.output;
    if out.addr.is_dont_care() {
      return;
    }
    let base_sp_addr = out.addr.row();
    let c_stride = self.state.c_stride as usize;

    for i in 0..(out.rows as usize).min(dim) {
      for j in 0..(out.cols as usize).min(dim) {
        let value = if self.state.mode == Dataflow::OS {
          self.state.pe_state[i][j]
        } else {
          results[i][j]
        };

        if out.addr.is_accumulator() {
          let r = self.acc_row(base_sp_addr + c_stride * i);
          if out.addr.accumulates() {
            self.state.accumulator[r][j] = self.state.accumulator[r][j].wrapping_add(value);
          } else {
            self.state.accumulator[r][j] = value;
          }
        } else {
          let shift = if self.state.mode == Dataflow::OS { self.state.sys_shift } else { 0 };
          let shifted = rounding_right_shift(value, shift).clamp(ELEM_T_MIN as AccT, ELEM_T_MAX as AccT);
          let activated = match self.state.act {
            Activation::None => shifted,
            _ => shifted.max(0),
          };
          let r = self.spad_row(base_sp_addr + c_stride * i);
          self.state.spad[r][j] = activated as ElemT;
        }
      }
    }
  }

  pub fn loop_ws(&mut self, ex_accumulate: bool, full_c: bool, low_d: bool, a_transpose: bool, b_transpose: bool) {
    let dim = self.cap.dim;
    let i = self.state.loop_ws_i as usize;
    let j = self.state.loop_ws_j as usize;
    let k = self.state.loop_ws_k as usize;

    let pad_i = self.state.loop_ws_pad_i as usize;
    let pad_j = self.state.loop_ws_pad_j as usize;
    let pad_k = self.state.loop_ws_pad_k as usize;

    let total_spad_rows = (i * k + k * j) * dim;
    let total_acc_rows = (i * j) * dim;

    if total_spad_rows > self.cap.sp_rows() / 2 || total_acc_rows > self.cap.acc_rows / 2 {
      log::error!("LOOP_WS bounds were too large for double-buffering");
      return;
    }

    let a_sp_addr_start = SpAddr::scratchpad(0);
    let b_sp_addr_start = SpAddr::scratchpad(self.cap.sp_rows() / 2 - k * j * dim);
    let d_sp_addr_start = SpAddr::accumulator(0, super::address::AccMode::Overwrite);
    let c_sp_addr_start = SpAddr::accumulator(0, super::address::AccMode::Accumulate).with_full_width(full_c);

    let extent = |last: bool, pad: usize| dim - if last { pad } else { 0 };
    let sizeof_c = if full_c { std::mem::size_of::<AccT>() } else { std::mem::size_of::<ElemT>() };

    // Load D (bias) if present
    if self.state.loop_ws_d != 0 {
      let sizeof_d = if low_d { std::mem::size_of::<ElemT>() } else { std::mem::size_of::<AccT>() };
      for ii in 0..i {
        for jj in 0..j {
          let dram_addr =
            self.state.loop_ws_d + ((ii * self.state.loop_ws_d_stride as usize + jj) * dim * sizeof_d) as u64;
          let sp_addr = d_sp_addr_start.offset((ii * j + jj) * dim);
          let cols = extent(jj == j - 1, pad_j);
          let rows = extent(ii == i - 1, pad_i);
          self.mvin(dram_addr, SpOperand::new(sp_addr, cols, rows), LoadChannel::Ch2);
        }
      }
    }

    // Main computation loop
    for kk in 0..k {
      for jj in 0..j {
        for ii in 0..i {
          let a_sp_addr = if a_transpose {
            a_sp_addr_start.offset((kk * i + ii) * dim)
          } else {
            a_sp_addr_start.offset((ii * k + kk) * dim)
          };
          let b_sp_addr = if b_transpose {
            b_sp_addr_start.offset((jj * k + kk) * dim)
          } else {
            b_sp_addr_start.offset((kk * j + jj) * dim)
          };
          let c_sp_addr = c_sp_addr_start.offset((ii * j + jj) * dim);

          let i_ext = extent(ii == i - 1, pad_i);
          let j_ext = extent(jj == j - 1, pad_j);
          let k_ext = extent(kk == k - 1, pad_k);

          // Mvin A
          if jj == 0 && self.state.loop_ws_a != 0 {
            let (offset, cols, rows) = if a_transpose {
              (kk * self.state.loop_ws_a_stride as usize + ii, i_ext, k_ext)
            } else {
              (ii * self.state.loop_ws_a_stride as usize + kk, k_ext, i_ext)
            };
            let dram_addr = self.state.loop_ws_a + (offset * dim) as u64;
            self.mvin(dram_addr, SpOperand::new(a_sp_addr, cols, rows), LoadChannel::Ch0);
          }

          // Mvin B
          if ii == 0 && self.state.loop_ws_b != 0 {
            let (offset, cols, rows) = if b_transpose {
              (jj * self.state.loop_ws_b_stride as usize + kk, k_ext, j_ext)
            } else {
              (kk * self.state.loop_ws_b_stride as usize + jj, j_ext, k_ext)
            };
            let dram_addr = self.state.loop_ws_b + (offset * dim) as u64;
            self.mvin(dram_addr, SpOperand::new(b_sp_addr, cols, rows), LoadChannel::Ch1);
          }

          // Compute
          let pre_sp_addr = if ii == 0 { b_sp_addr } else { SpAddr::GARBAGE };
          let out_sp_addr = if !ex_accumulate && kk == 0 {
            c_sp_addr.with_overwrite()
          } else {
            c_sp_addr
          };

          self.state.preload = SpOperand::new(pre_sp_addr, j_ext, k_ext);
          self.state.output = SpOperand::new(out_sp_addr, j_ext, i_ext);
          self.compute(
            SpOperand::new(a_sp_addr, k_ext, i_ext),
            SpOperand::new(SpAddr::GARBAGE, dim, dim),
            ii == 0,
          );

          // Move-out C
          if self.state.loop_ws_c != 0 && kk == k - 1 {
            let c_dram_addr =
              self.state.loop_ws_c + ((ii * self.state.loop_ws_c_stride as usize + jj) * dim * sizeof_c) as u64;
            self.mvout(c_dram_addr, SpOperand::new(c_sp_addr, j_ext, i_ext));
          }
        }
      }
    }
  }
}

impl Accelerator for Gemmini {
  fn issue(&mut self, insn: Instruction) {
    let raw = insn.encode();
    self.execute(raw.funct, raw.rs1, raw.rs2);
  }

  fn host_memory(&mut self) -> Option<&mut Dram> {
    Some(&mut self.dram)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemmini::address::AccMode;

  fn small() -> HardwareCapacity {
    HardwareCapacity {
      dim: 4,
      bank_num: 2,
      bank_rows: 64,
      acc_rows: 32,
      max_bytes: 16,
    }
  }

  fn config_ld(g: &mut Gemmini, channel: LoadChannel, stride: u64, shrunk: bool, pixels_per_row: u8) {
    g.issue(Instruction::ConfigLoad {
      channel,
      stride,
      scale: 1.0,
      shrunk,
      block_stride: 4,
      pixels_per_row,
    });
  }

  /// Move-in from address 0 loads zeros.
  #[test]
  fn test_mvin_zero_buffer() {
    let mut g = Gemmini::new(small());
    g.state.spad[3] = vec![9; 4];
    config_ld(&mut g, LoadChannel::Ch0, 4, false, 1);
    g.issue(Instruction::Mvin {
      channel: LoadChannel::Ch0,
      dram: 0,
      dst: SpOperand::new(SpAddr::scratchpad(3), 4, 1),
    });
    assert_eq!(g.state.spad[3], vec![0; 4]);
  }

  /// Accumulator move-ins read `i32` unless the channel is shrunk.
  #[test]
  fn test_mvin_accumulator_widths() {
    let mut g = Gemmini::new(small());
    let wide = g.dram.alloc_i32(&[1000, -2000, 3, 4]);
    let narrow = g.dram.alloc_i8(&[1, 2, 3, 4]);
    config_ld(&mut g, LoadChannel::Ch2, 16, false, 1);
    g.issue(Instruction::Mvin {
      channel: LoadChannel::Ch2,
      dram: wide,
      dst: SpOperand::new(SpAddr::accumulator(0, AccMode::Overwrite), 4, 1),
    });
    config_ld(&mut g, LoadChannel::Ch0, 4, true, 1);
    g.issue(Instruction::Mvin {
      channel: LoadChannel::Ch0,
      dram: narrow,
      dst: SpOperand::new(SpAddr::accumulator(0, AccMode::Accumulate), 4, 1),
    });
    assert_eq!(g.state.accumulator[0], vec![1001, -1998, 6, 8]);
  }

  /// Pixel packing places a window of neighbouring rows side by side.
  #[test]
  fn test_mvin_pixels_per_row() {
    let mut g = Gemmini::new(small());
    let src = g.dram.alloc_i8(&[1, 2, 3, 4, 5, 6]);
    config_ld(&mut g, LoadChannel::Ch0, 2, false, 2);
    g.issue(Instruction::Mvin {
      channel: LoadChannel::Ch0,
      dram: src,
      dst: SpOperand::new(SpAddr::scratchpad(0), 2, 3),
    });
    assert_eq!(g.state.spad[0], vec![1, 2, 3, 4]);
    assert_eq!(g.state.spad[1], vec![3, 4, 5, 6]);
    assert_eq!(&g.state.spad[2][..2], &[5, 6]);
  }

  /// Output-stationary preload/compute then move-out through the activation.
  #[test]
  fn test_os_compute_and_mvout() {
    let mut g = Gemmini::new(small());
    let a = g.dram.alloc_i8(&[1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1]);
    let b = g.dram.alloc_i8(&[1, -2, 3, -4, 5, -6, 7, -8, 9, -10, 11, -12, 13, -14, 15, -16]);
    let c = g.dram.alloc(16);
    g.issue(Instruction::ConfigEx {
      dataflow: Dataflow::OS,
      act: Activation::Relu,
      sys_shift: 0,
      acc_scale: 1.0,
      relu6_shift: 0,
      a_stride: 1,
      a_transpose: false,
      b_transpose: false,
    });
    g.issue(Instruction::ConfigStore { stride: 4, pool: None });
    config_ld(&mut g, LoadChannel::Ch0, 4, false, 1);
    config_ld(&mut g, LoadChannel::Ch1, 4, false, 1);
    g.issue(Instruction::Mvin {
      channel: LoadChannel::Ch0,
      dram: a,
      dst: SpOperand::new(SpAddr::scratchpad(0), 4, 4),
    });
    g.issue(Instruction::Mvin {
      channel: LoadChannel::Ch1,
      dram: b,
      dst: SpOperand::new(SpAddr::scratchpad(4), 4, 4),
    });
    let out = SpAddr::accumulator(0, AccMode::Overwrite);
    g.issue(Instruction::Preload {
      bd: SpOperand::new(SpAddr::GARBAGE, 4, 4),
      c: SpOperand::new(out, 4, 4),
    });
    g.issue(Instruction::ComputePreloaded {
      a: SpOperand::new(SpAddr::scratchpad(0), 4, 4),
      bd: SpOperand::new(SpAddr::scratchpad(4), 4, 4),
    });
    g.issue(Instruction::Mvout {
      dram: c,
      src: SpOperand::new(out, 4, 4),
    });
    assert_eq!(g.dram.read_i8_vec(c, 4), vec![1, 0, 3, 0]);
    assert_eq!(g.dram.read_i8_vec(c + 12, 4), vec![13, 0, 15, 0]);
  }

  /// Pooled move-out takes the window max and treats padding as zero.
  #[test]
  fn test_pooled_mvout() {
    let mut g = Gemmini::new(small());
    for r in 0..6 {
      g.state.accumulator[r][0] = -(r as AccT) - 1;
    }
    let out = g.dram.alloc(4);
    g.issue(Instruction::ConfigStore {
      stride: 1,
      pool: Some(PoolConfig {
        size: 2,
        stride: 2,
        out_dim: 2,
        porows: 1,
        pocols: 2,
        orows: 2,
        ocols: 3,
        upad: 0,
        lpad: 1,
      }),
    });
    g.issue(Instruction::Mvout {
      dram: out,
      src: SpOperand::new(SpAddr::accumulator(0, AccMode::Accumulate), 1, 0),
    });
    // first window touches the left padding, second sees only negatives
    assert_eq!(g.dram.read_i8_vec(out, 2), vec![0, -2]);
  }

  #[test]
  fn test_unknown_instruction_is_ignored() {
    let mut g = Gemmini::new(small());
    g.execute(99, 0, 0);
    assert_eq!(g.issued(), 0);
  }
}
