//! Rewrites spilled registers into stack traffic.
//!
//! Every spilled register gets its own frame slot. A use becomes a load into a
//! fresh register right before the instruction, a def becomes a store right
//! after it. The fresh registers live for a single instruction, which is what
//! lets the next allocation round make progress.

use std::collections::{BTreeMap, HashMap};

use crate::asm::{Address, Function, Instr, Register, SlotId};

/// Spills `spilled` and returns the fresh registers introduced for the
/// loads and stores.
pub fn rewrite(func: &mut Function, spilled: &[Register]) -> Vec<Register> {
  let mut slot_of = HashMap::new();
  for &reg in spilled {
    if let Register::Precolored(phys) = reg {
      panic!("{}: precolored register {} cannot be spilled", func.name, phys);
    }
    let slot = func.new_slot();
    log::debug!("{}: spill {} to slot {}", func.name, reg, slot.0);
    slot_of.insert(reg, slot);
  }
  let map = |r: Register| match slot_of.get(&r) {
    Some(&slot) => Register::Spilled(slot),
    None => r,
  };

  let mut fresh = vec![];
  for b in 0..func.blocks.len() {
    let instrs = std::mem::take(&mut func.blocks[b].instrs);
    let mut out = Vec::with_capacity(instrs.len());
    for mut instr in instrs {
      instr.map_registers(map);
      rewrite_instr(func, instr, &mut out, &mut fresh);
    }

    let mut term = func.blocks[b].term.clone();
    let mut loads = BTreeMap::new();
    for reg in term.uses_mut() {
      *reg = map(*reg);
      if let Register::Spilled(slot) = *reg {
        *reg = *loads.entry(slot).or_insert_with(|| func.fresh_virtual());
      }
    }
    for (slot, temp) in loads {
      out.push(load(temp, slot));
      fresh.push(temp);
    }
    func.blocks[b].term = term;
    func.blocks[b].instrs = out;
  }
  fresh
}

fn load(dest: Register, slot: SlotId) -> Instr {
  Instr::Load {
    dest,
    addr: Address::Slot(slot),
  }
}

fn store(src: Register, slot: SlotId) -> Instr {
  Instr::Store {
    src,
    addr: Address::Slot(slot),
  }
}

fn rewrite_instr(func: &mut Function, instr: Instr, out: &mut Vec<Instr>, fresh: &mut Vec<Register>) {
  if let Instr::Move { dest, src } = instr {
    match (dest, src) {
      (Register::Spilled(d), Register::Spilled(s)) if d == s => {}
      (Register::Spilled(d), Register::Spilled(s)) => {
        let temp = func.fresh_virtual();
        fresh.push(temp);
        out.push(load(temp, s));
        out.push(store(temp, d));
      }
      (Register::Spilled(d), src) => out.push(store(src, d)),
      (dest, Register::Spilled(s)) => out.push(load(dest, s)),
      _ => out.push(instr),
    }
    return;
  }

  let mut instr = instr;
  // one load per slot, even if the instruction reads it twice
  let mut loads = BTreeMap::new();
  for reg in instr.uses_mut() {
    if let Register::Spilled(slot) = *reg {
      *reg = *loads.entry(slot).or_insert_with(|| func.fresh_virtual());
    }
  }
  let mut stores = vec![];
  for reg in instr.defs_mut() {
    if let Register::Spilled(slot) = *reg {
      let temp = func.fresh_virtual();
      *reg = temp;
      stores.push(store(temp, slot));
      fresh.push(temp);
    }
  }
  for (slot, temp) in loads {
    out.push(load(temp, slot));
    fresh.push(temp);
  }
  out.push(instr);
  out.extend(stores);
}
