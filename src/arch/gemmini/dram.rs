use super::params::{AccT, DramAddr, ElemT};

/// Flat byte-addressed host memory seen by the accelerator's DMA.
///
/// The first page is never handed out and always reads as zeros, so a move-in from
/// address 0 loads a zero block.
#[derive(Debug, Clone)]
pub struct Dram {
  bytes: Vec<u8>,
  next: usize,
}

/// Bytes reserved at the bottom of memory for the zero page.
pub const ZERO_PAGE: usize = 4096;
const ALIGN: usize = 64;

impl Default for Dram {
  fn default() -> Self {
    Self::new()
  }
}

impl Dram {
  pub fn new() -> Self {
    Self {
      bytes: vec![0; ZERO_PAGE],
      next: ZERO_PAGE,
    }
  }

  /// Reserve `len` zeroed bytes and return their base address.
  pub fn alloc(&mut self, len: usize) -> DramAddr {
    let base = self.next.div_ceil(ALIGN) * ALIGN;
    self.next = base + len.max(1);
    if self.bytes.len() < self.next {
      self.bytes.resize(self.next, 0);
    }
    base as DramAddr
  }

  pub fn alloc_i8(&mut self, data: &[ElemT]) -> DramAddr {
    let addr = self.alloc(data.len());
    self.write_i8_slice(addr, data);
    addr
  }

  pub fn alloc_i32(&mut self, data: &[AccT]) -> DramAddr {
    let addr = self.alloc(data.len() * std::mem::size_of::<AccT>());
    self.write_i32_slice(addr, data);
    addr
  }

  fn index(&self, addr: DramAddr, len: usize) -> usize {
    let at = addr as usize;
    if at + len > self.bytes.len() {
      panic!("ERROR: DRAM access of {} bytes at 0x{:x} is out of bounds", len, addr);
    }
    at
  }

  pub fn read_i8(&self, addr: DramAddr) -> ElemT {
    let at = self.index(addr, 1);
    self.bytes[at] as ElemT
  }

  pub fn read_i32(&self, addr: DramAddr) -> AccT {
    let at = self.index(addr, 4);
    let mut word = [0u8; 4];
    word.copy_from_slice(&self.bytes[at..at + 4]);
    AccT::from_le_bytes(word)
  }

  pub fn write_i8(&mut self, addr: DramAddr, value: ElemT) {
    let at = self.index(addr, 1);
    if at < ZERO_PAGE {
      panic!("ERROR: write into the zero page at 0x{:x}", addr);
    }
    self.bytes[at] = value as u8;
  }

  pub fn write_i32(&mut self, addr: DramAddr, value: AccT) {
    let at = self.index(addr, 4);
    if at < ZERO_PAGE {
      panic!("ERROR: write into the zero page at 0x{:x}", addr);
    }
    self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
  }

  pub fn write_i8_slice(&mut self, addr: DramAddr, data: &[ElemT]) {
    for (i, &v) in data.iter().enumerate() {
      self.write_i8(addr + i as DramAddr, v);
    }
  }

  pub fn write_i32_slice(&mut self, addr: DramAddr, data: &[AccT]) {
    for (i, &v) in data.iter().enumerate() {
      self.write_i32(addr + (i * 4) as DramAddr, v);
    }
  }

  pub fn read_i8_vec(&self, addr: DramAddr, len: usize) -> Vec<ElemT> {
    (0..len).map(|i| self.read_i8(addr + i as DramAddr)).collect()
  }

  pub fn read_i32_vec(&self, addr: DramAddr, len: usize) -> Vec<AccT> {
    (0..len).map(|i| self.read_i32(addr + (i * 4) as DramAddr)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zero_page_reads_zero() {
    let dram = Dram::new();
    assert_eq!(dram.read_i8(0), 0);
    assert_eq!(dram.read_i32(16), 0);
  }

  #[test]
  fn test_alloc_is_aligned_and_disjoint() {
    let mut dram = Dram::new();
    let a = dram.alloc_i8(&[1, -2, 3]);
    let b = dram.alloc_i32(&[-70000, 5]);
    assert_eq!(a % 64, 0);
    assert_eq!(b % 64, 0);
    assert!(b >= a + 3);
    assert_eq!(dram.read_i8_vec(a, 3), vec![1, -2, 3]);
    assert_eq!(dram.read_i32_vec(b, 2), vec![-70000, 5]);
  }

  #[test]
  #[should_panic]
  fn test_zero_page_is_read_only() {
    let mut dram = Dram::new();
    dram.write_i8(8, 1);
  }
}
