//! bake: an incremental build orchestrator.
//!
//! Invocations:
//! - `bake` - build every target declared by `./Bakefile`
//! - `bake TARGET` - build only `TARGET` and its prerequisites
//! - `bake -f FILE` - use a different Bakefile
//! - `bake --sub DIR` - augment a parent invocation's graph from a
//!   sub-directory (stdin and stdout carry the interchange format)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use console::style;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use bake_lib::orchestrate::{bake, bake_sub, BakeOptions, SubOptions};

#[derive(Parser)]
#[command(name = "bake", version, about = "Incremental build orchestrator driven by a Bakefile")]
struct Cli {
  /// Target to build (defaults to every declared symbol)
  target: Option<String>,

  /// Bakefile to execute (defaults to ./Bakefile; may be given once)
  #[arg(short = 'f', long = "file", value_name = "FILE", action = ArgAction::Append)]
  file: Vec<PathBuf>,

  /// Run as a sub-directory augmentation pass for DIR
  #[arg(long = "sub", value_name = "DIR", conflicts_with = "target")]
  sub: Option<String>,

  /// Enable verbose output
  #[arg(short, long)]
  verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(err) => {
      let _ = err.print();
      // Help and version go to stdout and are not failures.
      return if err.use_stderr() {
        ExitCode::FAILURE
      } else {
        ExitCode::SUCCESS
      };
    }
  };

  // clap keeps only the last value of a repeated scalar flag, so the
  // once-only rule for -f needs an explicit occurrence check.
  let mut files = cli.file;
  if files.len() > 1 {
    eprintln!("{} the --file flag may be given only once", style("error:").red().bold());
    return ExitCode::FAILURE;
  }
  let file = files.pop().unwrap_or_else(|| PathBuf::from("Bakefile"));

  // Logging goes to stderr: in --sub mode stdout carries the graph.
  let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  let result = match cli.sub {
    Some(subdir) => {
      bake_sub(SubOptions {
        bakefile: file,
        subdir,
      })
      .await
    }
    None => {
      let mut options = BakeOptions::new(file);
      options.target = cli.target;
      bake(options).await
    }
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("{} {:#}", style("error:").red().bold(), anyhow::Error::new(err));
      ExitCode::FAILURE
    }
  }
}
