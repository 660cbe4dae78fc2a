//! Back-end lowering passes for a small RV32 compiler: SSA construction over
//! a block-structured IR, and iterated register coalescing over machine code.

pub mod args;
pub mod asm;
pub mod cfg;
pub mod emit;
pub mod ir;
pub mod regalloc;
pub mod registers;
pub mod ssa;
pub mod utils;
