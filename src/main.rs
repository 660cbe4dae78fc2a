//! Top Level Environment
//!
//! Reads a JSON module (an array of functions), runs the passes of the
//! requested stage over every function and prints the result.

use std::sync::{Arc, Mutex, PoisonError};
use std::time;

use anyhow::{Context, Result};
use lazy_static::lazy_static;

use rvlower::args::{self, Config, PassConfig, Stage};
use rvlower::regalloc::{self, Allocator};
use rvlower::ssa::{self, verify};
use rvlower::{asm, emit, ir};

lazy_static! {
  static ref PASS_CONFIG: Arc<Mutex<PassConfig>> = Arc::new(Mutex::new(PassConfig::default()));
}

fn pass_config() -> PassConfig {
  PASS_CONFIG
    .lock()
    .unwrap_or_else(PoisonError::into_inner)
    .clone()
}

// Helper macro to time evaluating an expression (like a function call.)
macro_rules! time {
  ( $x:expr ) => {{
    let t1 = time::SystemTime::now();
    let result = $x;
    (result, t1.elapsed().unwrap_or_default())
  }};
}

fn main() {
  let cfg = match args::parse_args() {
    Ok(cfg) => cfg,
    Err(e) => {
      eprintln!("{}", e);
      std::process::exit(2);
    }
  };

  // make envlogger stdout
  env_logger::builder()
    .target(env_logger::Target::Stdout)
    .format_timestamp(None)
    .filter_level(if cfg.verbose {
      log::LevelFilter::Debug
    } else {
      log::LevelFilter::Warn
    })
    .init();

  if let Err(e) = run(&cfg) {
    eprintln!("error: {:#}", e);
    std::process::exit(1);
  }
}

fn run(cfg: &Config) -> Result<()> {
  if let Some(path) = &cfg.config_file {
    let config = PassConfig::from_file(path)?;
    *PASS_CONFIG.lock().unwrap_or_else(PoisonError::into_inner) = config;
  }
  let config = pass_config();
  log::debug!("{:?}", config);

  let text = std::fs::read_to_string(&cfg.file).with_context(|| format!("cannot read {}", cfg.file))?;
  let mut out = emit::open_output(cfg.emit.as_deref())?;

  match cfg.stage {
    Stage::Ir => {
      let mut funcs: Vec<ir::Function> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not an SSA-stage module", cfg.file))?;
      let (result, elapsed) = time!(lower_ir(&mut funcs, &config));
      result?;
      log::debug!("SSA passes: {} us", elapsed.as_micros());
      emit::emit_ir(&mut out, &funcs)?;
    }
    Stage::Asm => {
      let mut funcs: Vec<asm::Function> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a machine-stage module", cfg.file))?;
      let (result, elapsed) = time!(allocate(&mut funcs, &config));
      result?;
      log::debug!("Register allocation: {} us", elapsed.as_micros());
      emit::emit_asm(&mut out, &cfg.file, &funcs)?;
    }
  }
  Ok(())
}

fn lower_ir(funcs: &mut [ir::Function], config: &PassConfig) -> Result<()> {
  for func in funcs {
    let promoted = if config.mem2reg {
      ssa::promote(func).slots
    } else {
      func.remove_unreachable();
      vec![]
    };
    if config.verify {
      verify::check_single_definition(func)?;
      verify::check_phis(func)?;
      verify::check_dominance(func)?;
      verify::check_promoted(func, &promoted)?;
    }
  }
  Ok(())
}

fn allocate(funcs: &mut [asm::Function], config: &PassConfig) -> Result<()> {
  let allocator = Allocator::from_config(config);
  for func in funcs {
    let report = allocator.allocate(func);
    log::debug!("{}: {:?}", func.name, report);
    if config.verify {
      regalloc::check_allocated(func)?;
    }
  }
  Ok(())
}
