use serde::{Deserialize, Serialize};

use crate::error::{ensure, Result};

// Element types
pub type ElemT = i8;
pub type AccT = i32;
pub type ScaleT = f32;
pub type AccScaleT = f32;
pub type RegT = u64;

/// Byte address in general (host) memory.
pub type DramAddr = u64;

pub const ELEM_T_MAX: ElemT = i8::MAX;
pub const ELEM_T_MIN: ElemT = i8::MIN;
pub const MVIN_SCALE_IDENTITY: ScaleT = 1.0;
pub const ACC_SCALE_IDENTITY: AccScaleT = 1.0;

pub const ADDR_LEN: usize = 32;
pub const LOAD_STATES: usize = 3;

/// Widest extent a single instruction field can carry.
pub const MAX_FIELD_EXTENT: usize = 0xFFFF;

/// Capacity of one accelerator instance. Every tile plan is checked against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareCapacity {
  /// Systolic array edge
  pub dim: usize,
  pub bank_num: usize,
  pub bank_rows: usize,
  pub acc_rows: usize,
  /// Largest single DMA burst, in bytes
  pub max_bytes: usize,
}

impl Default for HardwareCapacity {
  fn default() -> Self {
    Self {
      dim: 16,
      bank_num: 4,
      bank_rows: 4096,
      acc_rows: 1024,
      max_bytes: 64,
    }
  }
}

impl HardwareCapacity {
  pub fn sp_rows(&self) -> usize {
    self.bank_num * self.bank_rows
  }

  /// Most `dim`-wide blocks one scratchpad move-in may cover.
  pub fn max_block_len(&self) -> usize {
    (self.max_bytes / self.dim).max(1)
  }

  /// Most `dim`-wide blocks one accumulator move-in may cover.
  pub fn max_block_len_acc(&self) -> usize {
    (self.max_bytes / (self.dim * std::mem::size_of::<AccT>())).max(1)
  }

  /// Round `n` up to a multiple of `dim`.
  pub fn pad(&self, n: usize) -> usize {
    n.div_ceil(self.dim) * self.dim
  }

  /// Number of `dim`-wide blocks covering `n`.
  pub fn blocks(&self, n: usize) -> usize {
    n.div_ceil(self.dim)
  }

  pub fn validate(&self) -> Result<()> {
    ensure(self.dim > 0, || "dim must be non-zero".to_string())?;
    ensure(self.bank_num > 0 && self.bank_rows > 0, || "scratchpad must have at least one row".to_string())?;
    // A 1x1x1 matmul tile must fit even with the memories halved for double buffering
    ensure(self.acc_rows >= 2 * self.dim, || {
      format!("accumulator of {} rows cannot hold two {}-row blocks", self.acc_rows, self.dim)
    })?;
    ensure(self.sp_rows() >= 4 * self.dim, || {
      format!("scratchpad of {} rows cannot hold four {}-row blocks", self.sp_rows(), self.dim)
    })?;
    ensure(self.max_bytes >= self.dim && self.max_bytes % self.dim == 0, || {
      format!("max_bytes {} must be a non-zero multiple of dim {}", self.max_bytes, self.dim)
    })?;
    ensure(self.sp_rows() < (1 << 29) && self.acc_rows < (1 << 29), || {
      "memory rows exceed the 29-bit address field".to_string()
    })?;
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataflow {
  /// Output stationary
  OS,
  /// Weight stationary
  WS,
  /// Computed on the host by the reference routines; nothing is issued
  CPU,
}

impl Dataflow {
  /// Mode bit of `ConfigEx`. Only OS and WS are ever configured on the array.
  pub fn bits(self) -> u64 {
    match self {
      Dataflow::OS | Dataflow::CPU => 0,
      Dataflow::WS => 1,
    }
  }

  pub fn from_bits(bits: u64) -> Self {
    if bits & 1 == 0 {
      Dataflow::OS
    } else {
      Dataflow::WS
    }
  }

  /// Weight-stationary tiles are double buffered, so they get half the memory.
  pub fn double_buffered(self) -> bool {
    self == Dataflow::WS
  }
}

impl std::str::FromStr for Dataflow {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "os" => Ok(Dataflow::OS),
      "ws" => Ok(Dataflow::WS),
      "cpu" => Ok(Dataflow::CPU),
      other => Err(format!("unknown dataflow '{}', expected os, ws or cpu", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
  #[default]
  None,
  Relu,
  Relu6,
}

impl Activation {
  pub fn bits(self) -> u64 {
    match self {
      Activation::None => 0,
      Activation::Relu => 1,
      Activation::Relu6 => 2,
    }
  }

  pub fn from_bits(bits: u64) -> Self {
    match bits & 0b11 {
      1 => Activation::Relu,
      2 => Activation::Relu6,
      _ => Activation::None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_capacity_matches_reference_instance() {
    let cap = HardwareCapacity::default();
    assert_eq!(cap.sp_rows(), 16384);
    assert_eq!(cap.max_block_len(), 4);
    assert_eq!(cap.max_block_len_acc(), 1);
    assert!(cap.validate().is_ok());
  }

  #[test]
  fn test_pad_and_blocks() {
    let cap = HardwareCapacity::default();
    assert_eq!(cap.pad(1), 16);
    assert_eq!(cap.pad(32), 32);
    assert_eq!(cap.blocks(33), 3);
  }

  #[test]
  fn test_validate_rejects_bad_burst() {
    let cap = HardwareCapacity {
      max_bytes: 24,
      ..HardwareCapacity::default()
    };
    assert!(cap.validate().unwrap_err().is_configuration());
  }

  #[test]
  fn test_validate_rejects_capacity_without_room_for_one_tile() {
    let cap = HardwareCapacity {
      dim: 16,
      bank_num: 1,
      bank_rows: 16,
      acc_rows: 16,
      max_bytes: 64,
    };
    assert!(cap.validate().unwrap_err().is_configuration());
    let cap = HardwareCapacity {
      bank_rows: 64,
      ..cap
    };
    assert!(cap.validate().unwrap_err().is_configuration());
    let cap = HardwareCapacity {
      acc_rows: 32,
      ..cap
    };
    assert!(cap.validate().is_ok());
  }

  #[test]
  fn test_dataflow_parses_cpu() {
    assert_eq!("CPU".parse::<Dataflow>(), Ok(Dataflow::CPU));
    assert_eq!("ws".parse::<Dataflow>(), Ok(Dataflow::WS));
    assert!("gpu".parse::<Dataflow>().is_err());
    assert!(!Dataflow::CPU.double_buffered());
  }

  #[test]
  fn test_activation_bits() {
    for act in [Activation::None, Activation::Relu, Activation::Relu6] {
      assert_eq!(Activation::from_bits(act.bits()), act);
    }
  }
}
