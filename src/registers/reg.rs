use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// RV32 integer registers, named by their ABI role.
#[derive(Eq, PartialEq, Debug, Copy, Clone, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PhysReg {
  Zero,
  Ra,
  Sp,
  /// a0 - a7
  Arg(u8),
  /// s0 - s11
  Saved(u8),
  /// t0 - t6
  Temp(u8),
}

impl PhysReg {
  pub const NUM_ARGS: u8 = 8;
  pub const NUM_SAVED: u8 = 12;
  pub const NUM_TEMPS: u8 = 7;

  pub const fn ith_argument(i: u8) -> Self {
    if i >= Self::NUM_ARGS {
      panic!("Invalid argument index");
    }
    PhysReg::Arg(i)
  }

  pub const fn is_caller_saved(&self) -> bool {
    matches!(self, PhysReg::Ra | PhysReg::Arg(_) | PhysReg::Temp(_))
  }

  /// Registers the allocator never touches and liveness never tracks.
  pub const fn is_untracked(&self) -> bool {
    matches!(self, PhysReg::Zero | PhysReg::Sp)
  }
}

impl fmt::Display for PhysReg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PhysReg::Zero => write!(f, "zero"),
      PhysReg::Ra => write!(f, "ra"),
      PhysReg::Sp => write!(f, "sp"),
      PhysReg::Arg(i) => write!(f, "a{}", i),
      PhysReg::Saved(i) => write!(f, "s{}", i),
      PhysReg::Temp(i) => write!(f, "t{}", i),
    }
  }
}

impl FromStr for PhysReg {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let reg = match s {
      "zero" => PhysReg::Zero,
      "ra" => PhysReg::Ra,
      "sp" => PhysReg::Sp,
      _ => {
        let (kind, index) = match (s.get(..1), s.get(1..)) {
          (Some(kind), Some(index)) => (kind, index),
          _ => anyhow::bail!("unknown register `{}`", s),
        };
        let index: u8 = index
          .parse()
          .map_err(|_| anyhow::anyhow!("unknown register `{}`", s))?;
        match kind {
          "a" if index < Self::NUM_ARGS => PhysReg::Arg(index),
          "s" if index < Self::NUM_SAVED => PhysReg::Saved(index),
          "t" if index < Self::NUM_TEMPS => PhysReg::Temp(index),
          _ => anyhow::bail!("unknown register `{}`", s),
        }
      }
    };
    Ok(reg)
  }
}

impl TryFrom<String> for PhysReg {
  type Error = anyhow::Error;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    s.parse()
  }
}

impl From<PhysReg> for String {
  fn from(reg: PhysReg) -> Self {
    reg.to_string()
  }
}
