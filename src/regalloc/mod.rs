// The module computes liveness and interference on machine code, and colors
// virtual registers with iterated register coalescing
mod allocation;
mod coalesce;
mod interference;
mod liveness;
pub mod spill;

use anyhow::{bail, Result};

pub use allocation::{AllocationReport, Allocator};
pub use interference::InterferenceGraph;
pub use liveness::{Liveness, MoveSite};

use crate::asm::{Address, Function, Instr, Register};

/// Only physical registers are left, and every slot access stays inside the
/// frame.
pub fn check_allocated(func: &Function) -> Result<()> {
  for block in &func.blocks {
    for instr in &block.instrs {
      for reg in instr.uses().into_iter().chain(instr.defs()) {
        if !matches!(reg, Register::Precolored(_)) {
          bail!("{}: `{}` in {} still refers to {}", func.name, instr, block.label, reg);
        }
      }
      if let Instr::Load {
        addr: Address::Slot(slot),
        ..
      }
      | Instr::Store {
        addr: Address::Slot(slot),
        ..
      } = instr
      {
        if slot.0 >= func.slots {
          bail!("{}: slot {} is outside a frame of {} slots", func.name, slot.0, func.slots);
        }
      }
    }
    if let Some(reg) = block.term.uses().into_iter().find(|r| !r.is_precolored()) {
      bail!("{}: terminator of {} still refers to {}", func.name, block.label, reg);
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::asm::{SlotId, Terminator};

  #[test]
  fn test_check_allocated_rejects_virtuals_and_bad_slots() {
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Ret);
    f.push(
      entry,
      Instr::Li {
        dest: Register::arg(0),
        imm: 1,
      },
    );
    check_allocated(&f).unwrap();

    f.push(
      entry,
      Instr::Store {
        src: Register::arg(0),
        addr: Address::Slot(SlotId(0)),
      },
    );
    assert!(check_allocated(&f).is_err());
    f.new_slot();
    check_allocated(&f).unwrap();

    f.push(
      entry,
      Instr::Move {
        dest: Register::Virtual(3),
        src: Register::arg(0),
      },
    );
    let err = check_allocated(&f).unwrap_err();
    assert!(err.to_string().contains("%v3"));
  }
}
