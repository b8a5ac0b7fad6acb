//! Tile-capacity calculator: picks tile extents that fit the scratchpad and accumulator.

pub mod conv;
pub mod matmul;

pub use conv::{plan_conv, validate_conv_tile, ConvPlan, ConvTile, GrowthPolicy};
pub use matmul::{plan_matmul, validate_matmul_tile, MatmulTile};
