//! Bakefile orchestration.
//!
//! A normal run:
//! 1. Execute the Bakefile line by line. Each command gets the current
//!    dependency system on stdin and augments it through stdout.
//! 2. Reset every symbol to valid, then stat every target: missing
//!    artifacts go non-built, artifacts older than a direct dependency
//!    go stale, and dependents are invalidated either way.
//! 3. Execute the plan in rounds: any symbol whose remaining plan is
//!    just itself is built (its callback spawns the build command onto
//!    the wait queue), any symbol with an empty plan is dropped, and the
//!    queue is drained before the next round begins.
//!
//! A `--sub` run skips staleness and building entirely: it reads the
//! parent's graph from stdin, augments it with its own Bakefile, and
//! writes the merged graph back to stdout.

use std::fs::File;
use std::io::{BufReader, Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::SystemTime;

use tracing::{debug, info};

use bake_dep::{DepSystem, SymbolState};

use crate::error::BakeError;
use crate::interchange::{augment_depsystem, output_depsystem, Scope};
use crate::scan::{get_command, parse_command};
use crate::spawn::{new_wait_queue, run_piped, WaitQueue};
use crate::subdir::{incoming_mutator, outgoing_mutator};

/// Looks up the modification time of a target's on-disk artifact.
/// `None` means the artifact does not exist.
pub type MtimeOracle = Box<dyn Fn(&str) -> Option<SystemTime>>;

/// Oracle backed by the real filesystem.
pub fn fs_mtime_oracle() -> MtimeOracle {
  Box::new(|name| std::fs::metadata(name).ok().and_then(|meta| meta.modified().ok()))
}

/// Options for a normal (top-level) run.
pub struct BakeOptions {
  pub bakefile: PathBuf,
  /// Build only this target and its prerequisites; `None` builds
  /// everything.
  pub target: Option<String>,
  pub mtime: MtimeOracle,
}

impl BakeOptions {
  pub fn new(bakefile: impl Into<PathBuf>) -> Self {
    Self {
      bakefile: bakefile.into(),
      target: None,
      mtime: fs_mtime_oracle(),
    }
  }
}

/// Options for a `--sub` run.
pub struct SubOptions {
  pub bakefile: PathBuf,
  pub subdir: String,
}

/// Run a Bakefile and build what is stale.
pub async fn bake(options: BakeOptions) -> Result<(), BakeError> {
  let queue = new_wait_queue();
  let mut deps = DepSystem::new();
  run_bakefile(&options.bakefile, &mut deps, &queue).await?;
  mark_stale_symbols(&mut deps, &options.mtime)?;

  let mut remaining = match &options.target {
    Some(target) => deps.get_build_plan(target)?,
    None => deps.get_symbols()?,
  };
  info!(symbols = remaining.len(), "executing build plan");

  while !remaining.is_empty() {
    let snapshot = deps.clone();
    let mut i = 0;
    while i < remaining.len() {
      let plan = snapshot.get_build_plan(&remaining[i])?;
      if plan.len() == 1 {
        deps.build_symbol(&remaining[i])?;
      }
      if plan.is_empty() {
        remaining.remove(i);
      } else {
        i += 1;
      }
    }
    drain_wait_queue(&queue, &options.mtime).await?;
  }
  Ok(())
}

/// Run a Bakefile as a sub-directory augmentation pass: read the parent
/// graph from stdin, augment, write the merged graph to stdout. No
/// staleness or build phase happens here.
pub async fn bake_sub(options: SubOptions) -> Result<(), BakeError> {
  let SubOptions { bakefile, subdir } = options;
  let pwd = match std::env::var_os("PWD") {
    Some(pwd) => PathBuf::from(pwd),
    None => std::env::current_dir()?,
  };
  let directory = pwd.join(&subdir);
  if !directory.is_dir() {
    return Err(BakeError::NotADirectory { path: subdir });
  }
  std::env::set_current_dir(&directory)?;
  info!(directory = %directory.display(), "entering sub-directory");

  let queue = new_wait_queue();
  let mut deps = DepSystem::new();
  let incoming = incoming_mutator(&subdir);
  {
    let stdin = std::io::stdin();
    augment_depsystem(&mut stdin.lock(), &mut deps, &incoming, &queue, Scope::Trust)?;
  }

  run_bakefile(&bakefile, &mut deps, &queue).await?;

  let outgoing = outgoing_mutator(&subdir);
  let stdout = std::io::stdout();
  let mut out = stdout.lock();
  output_depsystem(&mut out, &deps, &outgoing)?;
  out.flush()?;
  Ok(())
}

/// Execute every command of a Bakefile, augmenting `deps` with each
/// command's output.
async fn run_bakefile(path: &Path, deps: &mut DepSystem, queue: &WaitQueue) -> Result<(), BakeError> {
  let file = File::open(path).map_err(|source| BakeError::BakefileOpen {
    path: path.display().to_string(),
    source,
  })?;
  let mut reader = BufReader::new(file);

  while let Some(command) = get_command(&mut reader)? {
    let trimmed = command.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }
    info!(command = %command.lines().next().unwrap_or(""), "running Bakefile command");
    let argv = parse_command(&command)?;
    if argv.is_empty() {
      continue;
    }
    let mut graph = Vec::new();
    output_depsystem(&mut graph, deps, &|name| name.to_string())?;
    let (output, status) = run_piped(&command, &argv, &graph).await?;
    augment_depsystem(
      &mut Cursor::new(output),
      deps,
      &|name| name.to_string(),
      queue,
      Scope::Enforce,
    )?;
    check_status(&command, status)?;
  }
  Ok(())
}

/// Reset every symbol to valid, then mark symbols without an artifact
/// non-built and symbols older than a direct dependency stale,
/// invalidating dependents as it goes.
fn mark_stale_symbols(deps: &mut DepSystem, mtime: &MtimeOracle) -> Result<(), BakeError> {
  for symbol in deps.get_symbols()? {
    deps.set_state(&symbol, SymbolState::Valid)?;
  }
  for symbol in deps.get_symbols()? {
    let Some(own_time) = mtime(&symbol) else {
      debug!(symbol = %symbol, "no artifact on disk");
      deps.set_state(&symbol, SymbolState::NonBuilt)?;
      deps.invalidate_dependents(&symbol)?;
      continue;
    };
    for dep in deps.get_dependency_edges(&symbol)? {
      if mtime(&dep).is_some_and(|dep_time| own_time < dep_time) {
        debug!(symbol = %symbol, dependency = %dep, "artifact older than dependency");
        deps.set_state(&symbol, SymbolState::Stale)?;
        deps.invalidate_dependents(&symbol)?;
        break;
      }
    }
  }
  Ok(())
}

/// Wait on every queued build in FIFO order.
async fn drain_wait_queue(queue: &WaitQueue, mtime: &MtimeOracle) -> Result<(), BakeError> {
  loop {
    let pending = queue.borrow_mut().pop_front();
    let Some(mut pending) = pending else {
      return Ok(());
    };
    let status = pending.child.wait().await?;
    if !status.success() {
      return Err(BakeError::BuildFailure {
        symbol: pending.symbol,
      });
    }
    let modified = mtime(&pending.symbol);
    if !modified.is_some_and(|time| time >= pending.started) {
      return Err(BakeError::NoOutputProduced {
        symbol: pending.symbol,
      });
    }
    debug!(symbol = %pending.symbol, "build completed");
  }
}

fn check_status(command: &str, status: ExitStatus) -> Result<(), BakeError> {
  match status.code() {
    Some(0) => Ok(()),
    Some(code) => Err(BakeError::ChildNonZero {
      command: command.to_string(),
      code,
    }),
    None => Err(BakeError::ChildSignalled {
      command: command.to_string(),
      signal: signal_of(status),
    }),
  }
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> i32 {
  use std::os::unix::process::ExitStatusExt;
  status.signal().unwrap_or(0)
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> i32 {
  0
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;
  use std::time::Duration;

  use super::*;

  fn oracle(times: &[(&str, u64)]) -> MtimeOracle {
    let base = SystemTime::UNIX_EPOCH;
    let table: HashMap<String, SystemTime> = times
      .iter()
      .map(|(name, seconds)| (name.to_string(), base + Duration::from_secs(*seconds)))
      .collect();
    Box::new(move |name| table.get(name).copied())
  }

  mod staleness {
    use super::*;

    #[test]
    fn missing_artifact_is_non_built() {
      let mut deps = DepSystem::new();
      deps.add_set_symbol("app", "cc").unwrap();
      mark_stale_symbols(&mut deps, &oracle(&[])).unwrap();
      assert_eq!(deps.get_state("app").unwrap(), SymbolState::NonBuilt);
    }

    #[test]
    fn artifact_older_than_dependency_is_stale() {
      let mut deps = DepSystem::new();
      deps.add_set_symbol("app", "cc").unwrap();
      deps.add_set_symbol("main.c", "").unwrap();
      deps.add_dependency("app", "main.c").unwrap();
      mark_stale_symbols(&mut deps, &oracle(&[("app", 100), ("main.c", 200)])).unwrap();
      assert_eq!(deps.get_state("app").unwrap(), SymbolState::Stale);
      assert_eq!(deps.get_state("main.c").unwrap(), SymbolState::Valid);
    }

    #[test]
    fn up_to_date_artifact_stays_valid() {
      let mut deps = DepSystem::new();
      deps.add_set_symbol("app", "cc").unwrap();
      deps.add_set_symbol("main.c", "").unwrap();
      deps.add_dependency("app", "main.c").unwrap();
      mark_stale_symbols(&mut deps, &oracle(&[("app", 300), ("main.c", 200)])).unwrap();
      assert_eq!(deps.get_state("app").unwrap(), SymbolState::Valid);
    }

    #[test]
    fn staleness_propagates_to_dependents() {
      let mut deps = DepSystem::new();
      deps.add_set_symbol("app", "link").unwrap();
      deps.add_set_symbol("lib.o", "cc").unwrap();
      deps.add_set_symbol("lib.c", "").unwrap();
      deps.add_dependency("app", "lib.o").unwrap();
      deps.add_dependency("lib.o", "lib.c").unwrap();
      // lib.o is older than lib.c; app is newer than lib.o but becomes
      // stale transitively.
      mark_stale_symbols(
        &mut deps,
        &oracle(&[("app", 500), ("lib.o", 100), ("lib.c", 200)]),
      )
      .unwrap();
      assert_eq!(deps.get_state("lib.o").unwrap(), SymbolState::Stale);
      assert_eq!(deps.get_state("app").unwrap(), SymbolState::Stale);
    }
  }

  #[cfg(unix)]
  mod bakefiles {
    use std::io::Write as _;

    use super::*;

    fn write_bakefile(dir: &Path, contents: &str) -> PathBuf {
      let path = dir.join("Bakefile");
      let mut file = File::create(&path).unwrap();
      file.write_all(contents.as_bytes()).unwrap();
      path
    }

    #[tokio::test]
    async fn commands_augment_the_graph() {
      let dir = tempfile::tempdir().unwrap();
      let path = write_bakefile(
        dir.path(),
        "echo <<GRAPH\nmain.c\napp cc -o app main.c\nmain.c / app\nGRAPH\n",
      );
      let queue = new_wait_queue();
      let mut deps = DepSystem::new();
      run_bakefile(&path, &mut deps, &queue).await.unwrap();
      assert!(deps.has_symbol("app"));
      assert!(deps.has_dependency("app", "main.c").unwrap());
    }

    #[tokio::test]
    async fn here_doc_commands_pass_their_body_as_one_argument() {
      let dir = tempfile::tempdir().unwrap();
      let path = write_bakefile(dir.path(), "echo <<GRAPH\nx touch x\nGRAPH\n");
      let queue = new_wait_queue();
      let mut deps = DepSystem::new();
      run_bakefile(&path, &mut deps, &queue).await.unwrap();
      assert_eq!(deps.get_value("x").unwrap(), "touch x");
    }

    #[tokio::test]
    async fn comments_and_blank_lines_are_skipped() {
      let dir = tempfile::tempdir().unwrap();
      let path = write_bakefile(dir.path(), "# a comment\n\necho <<GRAPH\nx\nGRAPH\n");
      let queue = new_wait_queue();
      let mut deps = DepSystem::new();
      run_bakefile(&path, &mut deps, &queue).await.unwrap();
      assert!(deps.has_symbol("x"));
    }

    #[tokio::test]
    async fn failing_command_aborts_the_run() {
      let dir = tempfile::tempdir().unwrap();
      let path = write_bakefile(dir.path(), "false\n");
      let queue = new_wait_queue();
      let mut deps = DepSystem::new();
      let err = run_bakefile(&path, &mut deps, &queue).await.unwrap_err();
      assert!(matches!(err, BakeError::ChildNonZero { .. }));
    }

    #[tokio::test]
    async fn missing_bakefile_is_reported() {
      let dir = tempfile::tempdir().unwrap();
      let queue = new_wait_queue();
      let mut deps = DepSystem::new();
      let err = run_bakefile(&dir.path().join("Bakefile"), &mut deps, &queue)
        .await
        .unwrap_err();
      assert!(matches!(err, BakeError::BakefileOpen { .. }));
    }

    #[tokio::test]
    async fn commands_receive_the_current_graph_on_stdin() {
      let dir = tempfile::tempdir().unwrap();
      // The second command copies its stdin (the graph built by the
      // first) into a file we can inspect.
      let seen = dir.path().join("seen");
      let path = write_bakefile(
        dir.path(),
        &format!(
          "echo <<GRAPH\napp cc -o app\nGRAPH\nsh -c \"cat > {}\"\n",
          seen.display()
        ),
      );
      let queue = new_wait_queue();
      let mut deps = DepSystem::new();
      run_bakefile(&path, &mut deps, &queue).await.unwrap();
      let contents = std::fs::read_to_string(&seen).unwrap();
      assert!(contents.contains("app cc -o app\n"));
    }
  }
}
