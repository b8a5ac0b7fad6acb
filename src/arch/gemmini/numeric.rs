//! Quantization arithmetic shared by the accelerator model and the CPU reference.

use super::params::{AccScaleT, AccT, Activation, ElemT, ScaleT, ELEM_T_MAX, ELEM_T_MIN};

/// Round to nearest, ties to even.
pub fn round_near_even(x: f32) -> i64 {
  let i = x as i64;
  let next = if x < 0.0 { i - 1 } else { i + 1 };
  let rem = (x - i as f32).abs();
  if rem < 0.5 {
    i
  } else if rem > 0.5 {
    next
  } else if i % 2 == 0 {
    i
  } else {
    next
  }
}

fn sat_elem(y: i64) -> ElemT {
  y.clamp(ELEM_T_MIN as i64, ELEM_T_MAX as i64) as ElemT
}

fn sat_acc(y: i64) -> AccT {
  y.clamp(AccT::MIN as i64, AccT::MAX as i64) as AccT
}

/// Scale applied to an `i8` on its way into the scratchpad.
pub fn mvin_scale(value: ElemT, scale: ScaleT) -> ElemT {
  if scale == 1.0 {
    return value;
  }
  sat_elem(round_near_even(value as f32 * scale))
}

/// Scale applied to a value on its way into the accumulator.
pub fn mvin_scale_acc(value: AccT, scale: ScaleT) -> AccT {
  if scale == 1.0 {
    return value;
  }
  sat_acc(round_near_even(value as f32 * scale))
}

/// Requantize an accumulator value, clamp it to `i8` and apply the activation.
pub fn scale_and_sat(x: AccT, act: Activation, scale: AccScaleT, relu6_shift: u32) -> ElemT {
  let y = if scale == 1.0 {
    x as i64
  } else {
    round_near_even(x as f32 * scale)
  };
  let y = sat_elem(y) as i32;
  let y = match act {
    Activation::None => y,
    Activation::Relu => y.max(0),
    Activation::Relu6 => {
      let max = 6i32.checked_shl(relu6_shift).unwrap_or(i32::MAX);
      y.clamp(0, max)
    },
  };
  y as ElemT
}

/// Arithmetic right shift with round-half-to-even, used when compute results land in
/// the scratchpad.
pub fn rounding_right_shift(x: AccT, shift: u32) -> AccT {
  if shift == 0 {
    return x;
  }
  let shift = shift.min(31) as i32;
  let shifted = x >> shift;
  let round_bit = (x >> (shift - 1)) & 1;
  let sticky = if shift > 1 { x & ((1 << (shift - 1)) - 1) } else { 0 };
  shifted + (round_bit & ((sticky != 0) as i32 | (shifted & 1)))
}
