//! Tiling and instruction-issue engine for a systolic-array matmul/convolution accelerator.
//!
//! Operations are cut into tiles that fit the scratchpad and accumulator
//! ([`tiling`]), each tile is lowered to load, compute and store instructions ([`exec`]),
//! and [`driver`] walks the tile grid. [`arch::gemmini::Gemmini`] is a functional model of
//! the accelerator the instructions can run on; [`reference`] holds the CPU oracles.

pub mod arch;
pub mod config;
pub mod driver;
pub mod error;
pub mod exec;
pub mod op;
pub mod pin;
pub mod reference;
pub mod tiling;
pub mod utils;
pub mod workload;

pub use arch::gemmini::{Accelerator, Dataflow, Gemmini, HardwareCapacity, Instruction, InstructionTrace};
pub use driver::{
  tiled_conv, tiled_conv_auto, tiled_conv_auto_with, tiled_conv_dw_auto, tiled_conv_first_layer_auto,
  tiled_conv_large_channel_auto, tiled_matmul, tiled_matmul_auto, tiled_resadd, tiled_resadd_auto,
};
pub use error::{GemtileError, Result};
pub use op::{ConvOperands, ConvParams, ConvShape, MatmulDims, MatmulOperands, MatmulParams, Pool, ResaddParams};
pub use pin::PinGuard;
pub use utils::log;
