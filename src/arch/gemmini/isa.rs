//! The instruction-issue interface.
//!
//! The engine builds typed [`Instruction`]s and hands them to an [`Accelerator`]. Each
//! instruction packs into one RoCC word pair (`funct`, `rs1`, `rs2`); extents ride in the
//! upper half of an operand as `rows << 48 | cols << 32 | address`.

use serde::{Deserialize, Serialize};

use super::address::SpAddr;
use super::dram::Dram;
use super::params::{AccScaleT, Activation, Dataflow, DramAddr, RegT, ScaleT, ADDR_LEN};

// Function codes
pub const CONFIG_FUNCT: u64 = 0;
pub const MVIN2_FUNCT: u64 = 1;
pub const MVIN_FUNCT: u64 = 2;
pub const MVOUT_FUNCT: u64 = 3;
pub const COMPUTE_PRELOADED_FUNCT: u64 = 4;
pub const COMPUTE_ACCUMULATED_FUNCT: u64 = 5;
pub const PRELOAD_FUNCT: u64 = 6;
pub const FLUSH_FUNCT: u64 = 7;
pub const LOOP_WS_FUNCT: u64 = 8;
pub const LOOP_WS_CONFIG_BOUNDS_FUNCT: u64 = 9;
pub const LOOP_WS_CONFIG_ADDRS_AB_FUNCT: u64 = 10;
pub const LOOP_WS_CONFIG_ADDRS_DC_FUNCT: u64 = 11;
pub const LOOP_WS_CONFIG_STRIDES_AB_FUNCT: u64 = 12;
pub const LOOP_WS_CONFIG_STRIDES_DC_FUNCT: u64 = 13;
pub const MVIN3_FUNCT: u64 = 14;
pub const FENCE_FUNCT: u64 = 127;

// Config sub-commands, in the low two bits of rs1
const CONFIG_EX: u64 = 0;
const CONFIG_LD: u64 = 1;
const CONFIG_ST: u64 = 2;

/// Load pipeline channel. Each keeps its own stride, scale and packing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadChannel {
  /// A / input
  Ch0,
  /// B / weights
  Ch1,
  /// D / bias
  Ch2,
}

impl LoadChannel {
  pub fn index(self) -> usize {
    match self {
      LoadChannel::Ch0 => 0,
      LoadChannel::Ch1 => 1,
      LoadChannel::Ch2 => 2,
    }
  }

  fn from_index(id: u64) -> Option<Self> {
    match id {
      0 => Some(LoadChannel::Ch0),
      1 => Some(LoadChannel::Ch1),
      2 => Some(LoadChannel::Ch2),
      _ => None,
    }
  }

  fn funct(self) -> u64 {
    match self {
      LoadChannel::Ch0 => MVIN_FUNCT,
      LoadChannel::Ch1 => MVIN2_FUNCT,
      LoadChannel::Ch2 => MVIN3_FUNCT,
    }
  }
}

/// A scratchpad address together with the block extent it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpOperand {
  pub addr: SpAddr,
  pub cols: u16,
  pub rows: u16,
}

impl SpOperand {
  pub fn new(addr: SpAddr, cols: usize, rows: usize) -> Self {
    Self {
      addr,
      cols: cols as u16,
      rows: rows as u16,
    }
  }

  fn pack(self) -> RegT {
    ((self.rows as u64) << (ADDR_LEN + 16)) | ((self.cols as u64) << ADDR_LEN) | self.addr.bits() as u64
  }

  fn unpack(word: RegT) -> Self {
    Self {
      addr: SpAddr::from_bits((word & 0xFFFF_FFFF) as u32),
      cols: ((word >> ADDR_LEN) & 0xFFFF) as u16,
      rows: ((word >> (ADDR_LEN + 16)) & 0xFFFF) as u16,
    }
  }
}

/// Max-pooling performed by move-out. All fields are in units of accumulator rows/pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
  pub size: u8,
  pub stride: u8,
  pub out_dim: u8,
  pub porows: u8,
  pub pocols: u8,
  pub orows: u8,
  pub ocols: u8,
  pub upad: u8,
  pub lpad: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
  ConfigEx {
    dataflow: Dataflow,
    act: Activation,
    sys_shift: u32,
    acc_scale: AccScaleT,
    relu6_shift: u32,
    /// Row step between consecutive A rows read by compute
    a_stride: u16,
    a_transpose: bool,
    b_transpose: bool,
  },
  ConfigLoad {
    channel: LoadChannel,
    /// DRAM bytes between consecutive moved-in rows
    stride: u64,
    scale: ScaleT,
    /// Accumulator move-ins read `i8` instead of `i32`
    shrunk: bool,
    /// Scratchpad rows between consecutive `dim`-wide column blocks
    block_stride: u16,
    pixels_per_row: u8,
  },
  ConfigStore {
    stride: u64,
    pool: Option<PoolConfig>,
  },
  Mvin {
    channel: LoadChannel,
    dram: DramAddr,
    dst: SpOperand,
  },
  Mvout {
    dram: DramAddr,
    src: SpOperand,
  },
  Preload {
    bd: SpOperand,
    c: SpOperand,
  },
  ComputePreloaded {
    a: SpOperand,
    bd: SpOperand,
  },
  ComputeAccumulated {
    a: SpOperand,
    bd: SpOperand,
  },
  LoopWsBounds {
    i: u16,
    j: u16,
    k: u16,
    pad_i: u16,
    pad_j: u16,
    pad_k: u16,
  },
  LoopWsAddrsAB {
    a: DramAddr,
    b: DramAddr,
  },
  LoopWsAddrsDC {
    d: DramAddr,
    c: DramAddr,
  },
  LoopWsStridesAB {
    a: u64,
    b: u64,
  },
  LoopWsStridesDC {
    d: u64,
    c: u64,
  },
  LoopWs {
    ex_accumulate: bool,
    full_c: bool,
    low_d: bool,
    a_transpose: bool,
    b_transpose: bool,
  },
  Flush,
  Fence,
}

/// One encoded instruction word pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
  pub funct: u64,
  pub rs1: RegT,
  pub rs2: RegT,
}

fn bit(flag: bool, pos: u32) -> u64 {
  (flag as u64) << pos
}

fn flag(word: u64, pos: u32) -> bool {
  (word >> pos) & 1 != 0
}

impl Instruction {
  pub fn encode(&self) -> RawInstruction {
    let (funct, rs1, rs2) = match *self {
      Instruction::ConfigEx {
        dataflow,
        act,
        sys_shift,
        acc_scale,
        relu6_shift,
        a_stride,
        a_transpose,
        b_transpose,
      } => (
        CONFIG_FUNCT,
        ((acc_scale.to_bits() as u64) << 32)
          | ((a_stride as u64) << 16)
          | bit(b_transpose, 9)
          | bit(a_transpose, 8)
          | (act.bits() << 3)
          | (dataflow.bits() << 2)
          | CONFIG_EX,
        // C stride is always one accumulator row
        (1u64 << 48) | ((relu6_shift as u64) << 32) | sys_shift as u64,
      ),
      Instruction::ConfigLoad {
        channel,
        stride,
        scale,
        shrunk,
        block_stride,
        pixels_per_row,
      } => (
        CONFIG_FUNCT,
        ((scale.to_bits() as u64) << 32)
          | ((block_stride as u64) << 16)
          | ((pixels_per_row as u64) << 8)
          | ((channel.index() as u64) << 3)
          | bit(shrunk, 2)
          | CONFIG_LD,
        stride,
      ),
      Instruction::ConfigStore { stride, pool } => {
        let rs1 = match pool {
          None => CONFIG_ST,
          Some(p) => {
            ((p.ocols as u64) << 56)
              | ((p.orows as u64) << 48)
              | ((p.pocols as u64) << 40)
              | ((p.porows as u64) << 32)
              | ((p.out_dim as u64) << 24)
              | (((p.lpad & 0b11) as u64) << 10)
              | (((p.upad & 0b11) as u64) << 8)
              | (((p.size & 0b11) as u64) << 6)
              | (((p.stride & 0b11) as u64) << 4)
              | CONFIG_ST
          },
        };
        (CONFIG_FUNCT, rs1, stride & 0xFFFF_FFFF)
      },
      Instruction::Mvin { channel, dram, dst } => (channel.funct(), dram, dst.pack()),
      Instruction::Mvout { dram, src } => (MVOUT_FUNCT, dram, src.pack()),
      Instruction::Preload { bd, c } => (PRELOAD_FUNCT, bd.pack(), c.pack()),
      Instruction::ComputePreloaded { a, bd } => (COMPUTE_PRELOADED_FUNCT, a.pack(), bd.pack()),
      Instruction::ComputeAccumulated { a, bd } => (COMPUTE_ACCUMULATED_FUNCT, a.pack(), bd.pack()),
      Instruction::LoopWsBounds {
        i,
        j,
        k,
        pad_i,
        pad_j,
        pad_k,
      } => (
        LOOP_WS_CONFIG_BOUNDS_FUNCT,
        ((pad_k as u64) << 32) | ((pad_j as u64) << 16) | pad_i as u64,
        ((k as u64) << 32) | ((j as u64) << 16) | i as u64,
      ),
      Instruction::LoopWsAddrsAB { a, b } => (LOOP_WS_CONFIG_ADDRS_AB_FUNCT, a, b),
      Instruction::LoopWsAddrsDC { d, c } => (LOOP_WS_CONFIG_ADDRS_DC_FUNCT, d, c),
      Instruction::LoopWsStridesAB { a, b } => (LOOP_WS_CONFIG_STRIDES_AB_FUNCT, a, b),
      Instruction::LoopWsStridesDC { d, c } => (LOOP_WS_CONFIG_STRIDES_DC_FUNCT, d, c),
      Instruction::LoopWs {
        ex_accumulate,
        full_c,
        low_d,
        a_transpose,
        b_transpose,
      } => (
        LOOP_WS_FUNCT,
        bit(low_d, 2) | bit(full_c, 1) | bit(ex_accumulate, 0),
        bit(b_transpose, 1) | bit(a_transpose, 0),
      ),
      Instruction::Flush => (FLUSH_FUNCT, 0, 0),
      Instruction::Fence => (FENCE_FUNCT, 0, 0),
    };
    RawInstruction { funct, rs1, rs2 }
  }

  pub fn is_fence(&self) -> bool {
    matches!(self, Instruction::Fence)
  }
}

impl RawInstruction {
  /// Decode a word pair; `None` for an unknown function code.
  pub fn decode(&self) -> Option<Instruction> {
    let RawInstruction { funct, rs1, rs2 } = *self;
    let insn = match funct {
      CONFIG_FUNCT => match rs1 & 0b11 {
        CONFIG_EX => Instruction::ConfigEx {
          dataflow: Dataflow::from_bits(rs1 >> 2),
          act: Activation::from_bits(rs1 >> 3),
          sys_shift: (rs2 & 0xFFFF_FFFF) as u32,
          acc_scale: f32::from_bits((rs1 >> 32) as u32),
          relu6_shift: ((rs2 >> 32) & 0xFFFF) as u32,
          a_stride: ((rs1 >> 16) & 0xFFFF) as u16,
          a_transpose: flag(rs1, 8),
          b_transpose: flag(rs1, 9),
        },
        CONFIG_LD => Instruction::ConfigLoad {
          channel: LoadChannel::from_index((rs1 >> 3) & 0b11)?,
          stride: rs2,
          scale: f32::from_bits((rs1 >> 32) as u32),
          shrunk: flag(rs1, 2),
          block_stride: ((rs1 >> 16) & 0xFFFF) as u16,
          pixels_per_row: ((rs1 >> 8) & 0xFF) as u8,
        },
        CONFIG_ST => {
          let stride = ((rs1 >> 4) & 0b11) as u8;
          let pool = (stride != 0).then(|| PoolConfig {
            size: ((rs1 >> 6) & 0b11) as u8,
            stride,
            out_dim: ((rs1 >> 24) & 0xFF) as u8,
            porows: ((rs1 >> 32) & 0xFF) as u8,
            pocols: ((rs1 >> 40) & 0xFF) as u8,
            orows: ((rs1 >> 48) & 0xFF) as u8,
            ocols: ((rs1 >> 56) & 0xFF) as u8,
            upad: ((rs1 >> 8) & 0b11) as u8,
            lpad: ((rs1 >> 10) & 0b11) as u8,
          });
          Instruction::ConfigStore {
            stride: rs2 & 0xFFFF_FFFF,
            pool,
          }
        },
        _ => return None,
      },
      MVIN_FUNCT | MVIN2_FUNCT | MVIN3_FUNCT => Instruction::Mvin {
        channel: match funct {
          MVIN_FUNCT => LoadChannel::Ch0,
          MVIN2_FUNCT => LoadChannel::Ch1,
          _ => LoadChannel::Ch2,
        },
        dram: rs1,
        dst: SpOperand::unpack(rs2),
      },
      MVOUT_FUNCT => Instruction::Mvout {
        dram: rs1,
        src: SpOperand::unpack(rs2),
      },
      PRELOAD_FUNCT => Instruction::Preload {
        bd: SpOperand::unpack(rs1),
        c: SpOperand::unpack(rs2),
      },
      COMPUTE_PRELOADED_FUNCT => Instruction::ComputePreloaded {
        a: SpOperand::unpack(rs1),
        bd: SpOperand::unpack(rs2),
      },
      COMPUTE_ACCUMULATED_FUNCT => Instruction::ComputeAccumulated {
        a: SpOperand::unpack(rs1),
        bd: SpOperand::unpack(rs2),
      },
      LOOP_WS_CONFIG_BOUNDS_FUNCT => Instruction::LoopWsBounds {
        i: (rs2 & 0xFFFF) as u16,
        j: ((rs2 >> 16) & 0xFFFF) as u16,
        k: ((rs2 >> 32) & 0xFFFF) as u16,
        pad_i: (rs1 & 0xFFFF) as u16,
        pad_j: ((rs1 >> 16) & 0xFFFF) as u16,
        pad_k: ((rs1 >> 32) & 0xFFFF) as u16,
      },
      LOOP_WS_CONFIG_ADDRS_AB_FUNCT => Instruction::LoopWsAddrsAB { a: rs1, b: rs2 },
      LOOP_WS_CONFIG_ADDRS_DC_FUNCT => Instruction::LoopWsAddrsDC { d: rs1, c: rs2 },
      LOOP_WS_CONFIG_STRIDES_AB_FUNCT => Instruction::LoopWsStridesAB { a: rs1, b: rs2 },
      LOOP_WS_CONFIG_STRIDES_DC_FUNCT => Instruction::LoopWsStridesDC { d: rs1, c: rs2 },
      LOOP_WS_FUNCT => Instruction::LoopWs {
        ex_accumulate: flag(rs1, 0),
        full_c: flag(rs1, 1),
        low_d: flag(rs1, 2),
        a_transpose: flag(rs2, 0),
        b_transpose: flag(rs2, 1),
      },
      FLUSH_FUNCT => Instruction::Flush,
      FENCE_FUNCT => Instruction::Fence,
      _ => return None,
    };
    Some(insn)
  }
}

/// Anything that accepts accelerator instructions in issue order.
pub trait Accelerator {
  fn issue(&mut self, insn: Instruction);

  /// Host memory the operand addresses point into, when the backend has one. The CPU
  /// target computes through it instead of issuing instructions.
  fn host_memory(&mut self) -> Option<&mut Dram> {
    None
  }
}

impl<T: Accelerator + ?Sized> Accelerator for &mut T {
  fn issue(&mut self, insn: Instruction) {
    (**self).issue(insn)
  }

  fn host_memory(&mut self) -> Option<&mut Dram> {
    (**self).host_memory()
  }
}

/// Records issued instructions instead of executing them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstructionTrace {
  insns: Vec<Instruction>,
}

impl InstructionTrace {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn instructions(&self) -> &[Instruction] {
    &self.insns
  }

  pub fn len(&self) -> usize {
    self.insns.len()
  }

  pub fn is_empty(&self) -> bool {
    self.insns.is_empty()
  }

  pub fn fence_count(&self) -> usize {
    self.insns.iter().filter(|i| i.is_fence()).count()
  }

  /// Encoded form of every recorded instruction.
  pub fn raw(&self) -> Vec<RawInstruction> {
    self.insns.iter().map(Instruction::encode).collect()
  }

  pub fn clear(&mut self) {
    self.insns.clear();
  }
}

impl Accelerator for InstructionTrace {
  fn issue(&mut self, insn: Instruction) {
    self.insns.push(insn);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemmini::address::AccMode;

  fn roundtrip(insn: Instruction) {
    assert_eq!(insn.encode().decode(), Some(insn));
  }

  #[test]
  fn test_mvin_packs_extent_above_address() {
    let insn = Instruction::Mvin {
      channel: LoadChannel::Ch1,
      dram: 0x1000,
      dst: SpOperand::new(SpAddr::scratchpad(0x20), 48, 16),
    };
    let raw = insn.encode();
    assert_eq!(raw.funct, MVIN2_FUNCT);
    assert_eq!(raw.rs1, 0x1000);
    assert_eq!(raw.rs2, (16u64 << 48) | (48u64 << 32) | 0x20);
    roundtrip(insn);
  }

  #[test]
  fn test_config_words_decode_back() {
    roundtrip(Instruction::ConfigEx {
      dataflow: Dataflow::WS,
      act: Activation::Relu6,
      sys_shift: 0,
      acc_scale: 0.25,
      relu6_shift: 3,
      a_stride: 2,
      a_transpose: true,
      b_transpose: false,
    });
    roundtrip(Instruction::ConfigLoad {
      channel: LoadChannel::Ch2,
      stride: 0,
      scale: 1.0,
      shrunk: true,
      block_stride: 16,
      pixels_per_row: 3,
    });
    roundtrip(Instruction::ConfigStore {
      stride: 32,
      pool: Some(PoolConfig {
        size: 3,
        stride: 2,
        out_dim: 56,
        porows: 4,
        pocols: 4,
        orows: 9,
        ocols: 9,
        upad: 1,
        lpad: 1,
      }),
    });
    roundtrip(Instruction::ConfigStore { stride: 32, pool: None });
  }

  #[test]
  fn test_preload_keeps_sentinel() {
    let insn = Instruction::Preload {
      bd: SpOperand::new(SpAddr::GARBAGE, 16, 16),
      c: SpOperand::new(SpAddr::accumulator(0, AccMode::Overwrite), 16, 5),
    };
    match insn.encode().decode() {
      Some(Instruction::Preload { bd, c }) => {
        assert!(bd.addr.is_dont_care());
        assert!(!c.addr.accumulates());
        assert_eq!(c.rows, 5);
      },
      other => panic!("unexpected decode {other:?}"),
    }
  }

  #[test]
  fn test_unknown_funct() {
    let raw = RawInstruction {
      funct: 42,
      rs1: 0,
      rs2: 0,
    };
    assert_eq!(raw.decode(), None);
  }

  #[test]
  fn test_trace_counts_fences() {
    let mut trace = InstructionTrace::new();
    trace.issue(Instruction::Flush);
    trace.issue(Instruction::Fence);
    assert_eq!(trace.len(), 2);
    assert_eq!(trace.fence_count(), 1);
    assert_eq!(trace.raw()[1].funct, FENCE_FUNCT);
  }
}
