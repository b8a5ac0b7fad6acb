//! Top-level entry points: validate, pick the executor for the dataflow, walk the tile grid.

pub mod conv;
mod cpu;
pub mod matmul;
pub mod resadd;

pub use conv::{
  tiled_conv, tiled_conv_auto, tiled_conv_auto_with, tiled_conv_dw_auto, tiled_conv_first_layer_auto,
  tiled_conv_large_channel_auto,
};
pub use matmul::{tiled_matmul, tiled_matmul_auto};
pub use resadd::{plan_resadd, tiled_resadd, tiled_resadd_auto};
