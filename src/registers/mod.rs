pub mod consts;
pub mod reg;

pub use reg::PhysReg;

pub fn reg_from_color(color: usize) -> PhysReg {
  consts::ALLOC_POOL_REGS[color]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registers::consts::{ALLOC_POOL_REGS, CALLER_SAVED, REG_ALLOC_POOL_SIZE};

  #[test]
  fn test_reg_index_order() {
    let names: Vec<String> = (0..REG_ALLOC_POOL_SIZE)
      .map(|i| reg_from_color(i).to_string())
      .collect();
    assert_eq!(names[..3], ["a0", "a1", "a2"]);
    assert_eq!(names[8], "s0");
    assert_eq!(names[REG_ALLOC_POOL_SIZE - 1], "t6");
  }

  #[test]
  fn test_pool_excludes_reserved() {
    assert!(ALLOC_POOL_REGS.iter().all(|r| !r.is_untracked() && *r != PhysReg::Ra));
  }

  #[test]
  fn test_caller_saved_table() {
    assert_eq!(CALLER_SAVED.len(), 16);
    assert!(CALLER_SAVED.iter().all(|r| r.is_caller_saved()));
    assert!(!CALLER_SAVED.contains(&PhysReg::Saved(0)));
  }
}
