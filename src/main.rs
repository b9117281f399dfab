//! `tinkac`: compile Tinka sources into one 2003lk assembly file.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::info;

#[derive(Debug, Parser)]
#[command(name = "tinkac", version, about = "Compile Tinka sources into 2003lk assembly")]
struct Cli {
  /// Input files, compiled as one program in the given order.
  #[arg(required = true, value_name = "FILE")]
  inputs: Vec<PathBuf>,

  /// Output file.
  #[arg(short, long, value_name = "FILE", default_value = "a.out")]
  output: PathBuf,

  /// Log pipeline progress (overridden by RUST_LOG).
  #[arg(short, long)]
  verbose: bool,
}

fn main() {
  let cli = Cli::parse();

  let default_filter = if cli.verbose { "debug" } else { "warn" };
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
    .init();

  match tinka::build(&cli.inputs, &cli.output) {
    Ok(compilation) => info!(
      "compiled {} file(s) into {} ({} lines)",
      cli.inputs.len(),
      cli.output.display(),
      compilation.body.lines().count()
    ),
    Err(err) => {
      eprintln!("error: {err}");
      process::exit(1);
    }
  }
}
