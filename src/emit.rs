//! Output emission

use std::fmt::Display;
use std::fs::File;
use std::io::{self, prelude::*, BufWriter};

use anyhow::{Context, Result};

use crate::asm;

/// Stdout, or the file named by `--emit`.
pub fn open_output(path: Option<&str>) -> Result<Box<dyn Write>> {
  match path {
    None => Ok(Box::new(BufWriter::new(io::stdout()))),
    Some(path) => {
      let file = File::create(path).with_context(|| format!("cannot create {}", path))?;
      Ok(Box::new(BufWriter::new(file)))
    }
  }
}

/// SSA-stage functions, separated by blank lines.
pub fn emit_ir<F: Display>(out: &mut impl Write, funcs: &[F]) -> io::Result<()> {
  for (i, func) in funcs.iter().enumerate() {
    if i > 0 {
      writeln!(out)?;
    }
    write!(out, "{}", func)?;
  }
  out.flush()
}

/// An assembly file holding every function of the module.
pub fn emit_asm(out: &mut impl Write, source: &str, funcs: &[asm::Function]) -> io::Result<()> {
  writeln!(out, "\t.file\t{:?}", source)?;
  writeln!(out, "\t.text")?;
  for func in funcs {
    writeln!(out, "\t.align\t2")?;
    write!(out, "{}", func)?;
    writeln!(out)?;
  }
  out.flush()
}
