use std::fmt::{Display, Formatter, Result};

use super::{Block, Function, Inst, Operand, Phi, Terminator, Value};

impl Display for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> Result {
    write!(f, "%{}", self.0)
  }
}

impl Display for Operand {
  fn fmt(&self, f: &mut Formatter<'_>) -> Result {
    match self {
      Operand::Value(v) => write!(f, "{}", v),
      Operand::Const(c) => write!(f, "{}", c),
      Operand::Undef => write!(f, "undef"),
    }
  }
}

impl Display for Phi {
  fn fmt(&self, f: &mut Formatter<'_>) -> Result {
    write!(f, "{} = phi", self.dest)?;
    for (i, (pred, value)) in self.incoming.iter().enumerate() {
      let sep = if i == 0 { " " } else { ", " };
      write!(f, "{}[{}: {}]", sep, pred, value)?;
    }
    Ok(())
  }
}

impl Display for Inst {
  fn fmt(&self, f: &mut Formatter<'_>) -> Result {
    match self {
      Inst::Alloca { dest } => write!(f, "{} = alloca", dest),
      Inst::Load { dest, addr } => write!(f, "{} = load {}", dest, addr),
      Inst::Store { value, addr } => write!(f, "store {}, {}", value, addr),
      Inst::Binary { op, dest, lhs, rhs } => {
        write!(f, "{} = {} {}, {}", dest, op.as_ref(), lhs, rhs)
      }
      Inst::Cmp { op, dest, lhs, rhs } => {
        write!(f, "{} = icmp {} {}, {}", dest, op.as_ref(), lhs, rhs)
      }
      Inst::Call { dest, callee, args } => {
        if let Some(dest) = dest {
          write!(f, "{} = ", dest)?;
        }
        let args = args.iter().map(|a| a.to_string()).collect::<Vec<_>>();
        write!(f, "call @{}({})", callee, args.join(", "))
      }
    }
  }
}

impl Display for Terminator {
  fn fmt(&self, f: &mut Formatter<'_>) -> Result {
    match self {
      Terminator::Ret(Some(v)) => write!(f, "ret {}", v),
      Terminator::Ret(None) => write!(f, "ret"),
      Terminator::Branch { cond, then, els } => write!(f, "br {}, {}, {}", cond, then, els),
      Terminator::Jump(target) => write!(f, "jump {}", target),
    }
  }
}

impl Display for Block {
  fn fmt(&self, f: &mut Formatter<'_>) -> Result {
    for phi in &self.phis {
      writeln!(f, "  {}", phi)?;
    }
    for inst in &self.insts {
      writeln!(f, "  {}", inst)?;
    }
    writeln!(f, "  {}", self.term)
  }
}

impl Display for Function {
  fn fmt(&self, f: &mut Formatter<'_>) -> Result {
    let params = self.params.iter().map(|p| p.to_string()).collect::<Vec<_>>();
    writeln!(f, "fn @{}({}) {{", self.name, params.join(", "))?;
    for (i, block) in self.blocks.iter().enumerate() {
      writeln!(f, "bb{}: ; {}", i, block.name)?;
      write!(f, "{}", block)?;
    }
    writeln!(f, "}}")
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;
  use crate::cfg::BlockId;
  use crate::ir::BinOp;

  #[test]
  fn test_display_function() {
    let mut f = Function::new("inc");
    let p = f.add_param();
    let entry = f.add_block("entry", Terminator::Ret(Some(Operand::Value(Value(1)))));
    f.push(
      entry,
      Inst::Binary {
        op: BinOp::Add,
        dest: Value(1),
        lhs: Operand::Value(p),
        rhs: Operand::Const(1),
      },
    );
    let text = f.to_string();
    assert_eq!(text, "fn @inc(%0) {\nbb0: ; entry\n  %1 = add %0, 1\n  ret %1\n}\n");
  }

  #[test]
  fn test_display_phi() {
    let mut incoming = BTreeMap::new();
    incoming.insert(BlockId(2), Operand::Undef);
    incoming.insert(BlockId(0), Operand::Const(4));
    let phi = Phi {
      dest: Value(3),
      incoming,
    };
    assert_eq!(phi.to_string(), "%3 = phi [bb0: 4], [bb2: undef]");
  }
}
