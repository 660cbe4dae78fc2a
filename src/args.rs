//! Parse command line arguments and the pass configuration file.

use std::env;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::registers::consts::REG_ALLOC_POOL_SIZE;

pub const USAGE: &str = "usage: rvlower [-v] [--stage ir|asm] [--emit <file>] [--config <file.toml>] <module.json>";

/// Which representation the input module is in, and so which passes run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
  /// SSA-stage functions: prune and promote.
  Ir,
  /// Machine-stage functions: allocate registers.
  Asm,
}

/// Configuration options for this run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
  pub verbose: bool,
  pub stage: Stage,
  /// Where to write the result; stdout when absent.
  pub emit: Option<String>,
  pub config_file: Option<String>,
  pub file: String,
}

/// Configuration options for the passes. Every field may be left out of the
/// TOML file.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PassConfig {
  pub mem2reg: bool,
  pub coalesce: bool,
  /// Run the structural checks after every pass.
  pub verify: bool,
  /// Only the first N pool registers are handed to the allocator.
  pub registers: Option<usize>,
  pub max_rounds: usize,
}

impl Default for PassConfig {
  fn default() -> Self {
    PassConfig {
      mem2reg: true,
      coalesce: true,
      verify: false,
      registers: None,
      max_rounds: 256,
    }
  }
}

impl PassConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
      .with_context(|| format!("cannot read pass configuration {}", path.display()))?;
    Self::parse(&text).with_context(|| format!("in {}", path.display()))
  }

  pub fn parse(text: &str) -> Result<Self> {
    let config: PassConfig = toml::from_str(text)?;
    if let Some(n) = config.registers {
      if !(2..=REG_ALLOC_POOL_SIZE).contains(&n) {
        bail!("registers = {} is outside 2..={}", n, REG_ALLOC_POOL_SIZE);
      }
    }
    if config.max_rounds == 0 {
      bail!("max_rounds must be positive");
    }
    Ok(config)
  }
}

/// Parses the process arguments into a configuration.
pub fn parse_args() -> Result<Config> {
  let args: Vec<String> = env::args().skip(1).collect();
  parse_args_from(&args)
}

pub fn parse_args_from(args: &[String]) -> Result<Config> {
  let mut verbose = false;
  let mut stage = Stage::Ir;
  let mut emit = None;
  let mut config_file = None;
  let mut file = None;

  let mut iter = args.iter();
  while let Some(arg) = iter.next() {
    let mut value = |flag: &str| {
      iter
        .next()
        .cloned()
        .ok_or_else(|| anyhow!("{} expects a value\n{}", flag, USAGE))
    };
    match arg.as_str() {
      "-v" | "--verbose" => verbose = true,
      "--stage" => {
        stage = match value("--stage")?.as_str() {
          "ir" => Stage::Ir,
          "asm" => Stage::Asm,
          other => bail!("unknown stage `{}`\n{}", other, USAGE),
        }
      }
      "--emit" => emit = Some(value("--emit")?),
      "--config" => config_file = Some(value("--config")?),
      flag if flag.starts_with('-') => bail!("unknown flag `{}`\n{}", flag, USAGE),
      path => {
        if let Some(first) = file.replace(path.to_string()) {
          bail!("more than one input file: {} and {}\n{}", first, path, USAGE);
        }
      }
    }
  }

  Ok(Config {
    verbose,
    stage,
    emit,
    config_file,
    file: file.ok_or_else(|| anyhow!("expected an input file\n{}", USAGE))?,
  })
}
