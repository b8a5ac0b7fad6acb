//! Process-wide memory pin.
//!
//! The accelerator's DMA needs host memory pinned before the first move-in. The pin is
//! taken once per process: the first guard owns it and releases it on drop, guards taken
//! while it is held are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};

static PINNED: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
#[must_use = "the pin is released as soon as the guard is dropped"]
pub struct PinGuard {
  owner: bool,
}

impl PinGuard {
  pub fn acquire() -> Self {
    let owner = PINNED.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok();
    if owner {
      log::debug!("pinned process memory");
    }
    Self { owner }
  }

  /// Whether this guard took the pin and will release it.
  pub fn is_owner(&self) -> bool {
    self.owner
  }

  pub fn is_pinned() -> bool {
    PINNED.load(Ordering::Acquire)
  }
}

impl Drop for PinGuard {
  fn drop(&mut self) {
    if self.owner {
      PINNED.store(false, Ordering::Release);
      log::debug!("unpinned process memory");
    }
  }
}
