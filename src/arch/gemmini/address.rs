//! Scratchpad/accumulator address space.
//!
//! One 32-bit word addresses a `dim`-wide row. Bit 31 selects the accumulator, bit 30
//! selects accumulate-into instead of overwrite, bit 29 asks for full-width (`i32`)
//! read-out. The all-ones word is the don't-care sentinel.

use serde::{Deserialize, Serialize};

const ACC_BIT: u32 = 1 << 31;
const ACCUMULATE_BIT: u32 = 1 << 30;
const FULL_BIT: u32 = 1 << 29;
const ROW_MASK: u32 = FULL_BIT - 1;

fn checked_row(row: usize) -> u32 {
  assert!(row <= ROW_MASK as usize, "row {row} does not fit the 29-bit address field");
  row as u32
}

/// Which memory a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
  Scratchpad,
  Accumulator,
}

/// What a write into the accumulator does with the value already there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccMode {
  Overwrite,
  Accumulate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SpAddr(u32);

impl SpAddr {
  pub const GARBAGE: SpAddr = SpAddr(u32::MAX);

  /// Pack a row offset, region and write mode into an address.
  ///
  /// # Panics
  ///
  /// If `row` does not fit the 29-bit row field. [`HardwareCapacity::validate`] keeps every
  /// memory below that size, so rows computed for a validated capacity always fit.
  ///
  /// [`HardwareCapacity::validate`]: super::params::HardwareCapacity::validate
  pub fn encode(region: Region, mode: AccMode, row: usize) -> Self {
    let row = checked_row(row);
    match region {
      Region::Scratchpad => SpAddr(row),
      Region::Accumulator => match mode {
        AccMode::Overwrite => SpAddr(ACC_BIT | row),
        AccMode::Accumulate => SpAddr(ACC_BIT | ACCUMULATE_BIT | row),
      },
    }
  }

  pub fn scratchpad(row: usize) -> Self {
    Self::encode(Region::Scratchpad, AccMode::Overwrite, row)
  }

  pub fn accumulator(row: usize, mode: AccMode) -> Self {
    Self::encode(Region::Accumulator, mode, row)
  }

  pub fn from_bits(bits: u32) -> Self {
    SpAddr(bits)
  }

  pub fn bits(self) -> u32 {
    self.0
  }

  pub fn is_dont_care(self) -> bool {
    self == Self::GARBAGE
  }

  pub fn is_accumulator(self) -> bool {
    !self.is_dont_care() && self.0 & ACC_BIT != 0
  }

  pub fn accumulates(self) -> bool {
    self.is_accumulator() && self.0 & ACCUMULATE_BIT != 0
  }

  pub fn is_full_width(self) -> bool {
    self.is_accumulator() && self.0 & FULL_BIT != 0
  }

  pub fn row(self) -> usize {
    (self.0 & ROW_MASK) as usize
  }

  /// Same location, written in overwrite mode.
  pub fn with_overwrite(self) -> Self {
    if self.is_dont_care() {
      self
    } else {
      SpAddr(self.0 & !ACCUMULATE_BIT)
    }
  }

  /// Same location, read out at full `i32` width on move-out.
  pub fn with_full_width(self, full: bool) -> Self {
    if self.is_accumulator() && full {
      SpAddr(self.0 | FULL_BIT)
    } else {
      self
    }
  }

  /// Advance by `rows`; the sentinel stays the sentinel.
  pub fn offset(self, rows: usize) -> Self {
    if self.is_dont_care() {
      self
    } else {
      SpAddr((self.0 & !ROW_MASK) | checked_row(self.row() + rows))
    }
  }
}

impl std::fmt::Display for SpAddr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "0x{:08x}", self.0)
  }
}
