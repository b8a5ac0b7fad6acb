pub mod address;
pub mod dram;
pub mod gemmini;
pub mod isa;
pub mod numeric;
pub mod params;

pub use address::{AccMode, Region, SpAddr};
pub use dram::Dram;
pub use gemmini::Gemmini;
pub use isa::{Accelerator, Instruction, InstructionTrace, LoadChannel, PoolConfig, RawInstruction, SpOperand};
pub use params::{Activation, Dataflow, DramAddr, HardwareCapacity};
