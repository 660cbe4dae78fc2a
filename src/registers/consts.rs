use lazy_static::lazy_static;

use crate::registers::reg::PhysReg;

// The pool order is the color order: color i is ALLOC_POOL_REGS[i], and the
// allocator always prefers the lowest free color.
pub const REG_ALLOC_POOL_SIZE: usize = 27;
pub const ALLOC_POOL_REGS: [PhysReg; REG_ALLOC_POOL_SIZE] = [
  PhysReg::Arg(0),
  PhysReg::Arg(1),
  PhysReg::Arg(2),
  PhysReg::Arg(3),
  PhysReg::Arg(4),
  PhysReg::Arg(5),
  PhysReg::Arg(6),
  PhysReg::Arg(7),
  PhysReg::Saved(0),
  PhysReg::Saved(1),
  PhysReg::Saved(2),
  PhysReg::Saved(3),
  PhysReg::Saved(4),
  PhysReg::Saved(5),
  PhysReg::Saved(6),
  PhysReg::Saved(7),
  PhysReg::Saved(8),
  PhysReg::Saved(9),
  PhysReg::Saved(10),
  PhysReg::Saved(11),
  PhysReg::Temp(0),
  PhysReg::Temp(1),
  PhysReg::Temp(2),
  PhysReg::Temp(3),
  PhysReg::Temp(4),
  PhysReg::Temp(5),
  PhysReg::Temp(6),
];

/// Bytes per stack slot.
pub const WORD_SIZE: usize = 4;
/// The frame is grown in multiples of this many bytes.
pub const STACK_ALIGN: usize = 16;

lazy_static! {
  /// Everything a callee may clobber, i.e. what a `call` defines.
  pub static ref CALLER_SAVED: Vec<PhysReg> = {
    let mut regs = vec![PhysReg::Ra];
    regs.extend(ALLOC_POOL_REGS.iter().copied().filter(PhysReg::is_caller_saved));
    regs
  };
}
