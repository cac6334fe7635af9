//! End-to-end tests for the bake binary.
//!
//! Each test runs the real binary in an isolated temporary directory.
//! Bakefile commands use `echo` with here-doc bodies to emit interchange
//! statements, and `sh -c` for the build commands themselves.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use filetime::FileTime;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Environment
// =============================================================================

/// Isolated working directory with a Bakefile.
struct TestEnv {
  dir: TempDir,
}

impl TestEnv {
  /// Create an environment whose Bakefile has the given contents.
  fn with_bakefile(contents: &str) -> Self {
    let env = Self::empty();
    std::fs::write(env.path().join("Bakefile"), contents).unwrap();
    env
  }

  /// Create an empty environment (no Bakefile).
  fn empty() -> Self {
    Self {
      dir: TempDir::new().unwrap(),
    }
  }

  fn path(&self) -> &Path {
    self.dir.path()
  }

  /// Create a file and pin its mtime to `seconds` past the epoch.
  fn file_with_mtime(&self, name: &str, seconds: i64) {
    let path = self.path().join(name);
    std::fs::write(&path, name).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(seconds, 0)).unwrap();
  }

  /// A bake command running inside this environment.
  fn bake(&self) -> Command {
    let mut cmd = Command::new(bake_binary());
    cmd.current_dir(self.path());
    cmd.env("PWD", self.path());
    cmd
  }

  fn read(&self, name: &str) -> String {
    std::fs::read_to_string(self.path().join(name)).unwrap()
  }

  fn exists(&self, name: &str) -> bool {
    self.path().join(name).exists()
  }
}

fn bake_binary() -> PathBuf {
  PathBuf::from(env!("CARGO_BIN_EXE_bake"))
}

// =============================================================================
// Invocation
// =============================================================================

#[test]
fn help_flag_works() {
  Command::new(bake_binary())
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  Command::new(bake_binary())
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("bake"));
}

#[test]
fn repeated_file_flag_is_rejected() {
  let env = TestEnv::empty();
  // Both Bakefiles are present and valid, so the only reason to fail
  // is the repetition itself.
  for name in ["One", "Two"] {
    std::fs::write(
      env.path().join(name),
      "echo <<BIF\nout.txt touch out.txt\nBIF\n",
    )
    .unwrap();
  }

  env
    .bake()
    .args(["-f", "One", "-f", "Two"])
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("only once"));
  assert!(!env.exists("out.txt"));

  // A single occurrence of either file is fine.
  env.bake().args(["-f", "One"]).assert().success();
  assert!(env.exists("out.txt"));
}

#[test]
fn missing_bakefile_fails() {
  let env = TestEnv::empty();
  env
    .bake()
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("cannot open Bakefile"));
}

#[test]
fn alternate_bakefile_via_flag() {
  let env = TestEnv::empty();
  std::fs::write(
    env.path().join("Recipes"),
    "echo <<BIF\nout.txt touch out.txt\nBIF\n",
  )
  .unwrap();
  env.bake().args(["-f", "Recipes"]).assert().success();
  assert!(env.exists("out.txt"));
}

// =============================================================================
// Building
// =============================================================================

#[test]
fn missing_target_is_built() {
  let env = TestEnv::with_bakefile("echo <<BIF\nout.txt touch out.txt\nBIF\n");
  env.bake().assert().success();
  assert!(env.exists("out.txt"));
}

#[test]
fn up_to_date_target_is_not_rebuilt() {
  let env = TestEnv::with_bakefile(
    "echo <<BIF\npresent sh -c \"echo rebuilt >> marker && touch present\"\nBIF\n",
  );
  env.file_with_mtime("present", 1_000_000);
  env.bake().assert().success();
  assert!(!env.exists("marker"));
}

#[test]
fn stale_targets_rebuild_in_dependency_order() {
  // a depends on b, b depends on c; c is newest so b and a rebuild,
  // in that order, and c itself is left alone.
  let env = TestEnv::with_bakefile(concat!(
    "echo <<BIF\n",
    "c\n",
    "b sh -c \"echo b >> order && touch b\"\n",
    "a sh -c \"echo a >> order && touch a\"\n",
    "c / b\n",
    "b / a\n",
    "BIF\n",
  ));
  env.file_with_mtime("a", 1_000);
  env.file_with_mtime("b", 2_000);
  env.file_with_mtime("c", 3_000);

  env.bake().assert().success();
  assert_eq!(env.read("order"), "b\na\n");
}

#[test]
fn named_target_limits_the_build() {
  let env = TestEnv::with_bakefile("echo <<BIF\nx touch x\ny touch y\nBIF\n");
  env.bake().arg("x").assert().success();
  assert!(env.exists("x"));
  assert!(!env.exists("y"));
}

#[test]
fn comments_and_blank_lines_are_ignored() {
  let env = TestEnv::with_bakefile("# builds one file\n\necho <<BIF\nout.txt touch out.txt\nBIF\n");
  env.bake().assert().success();
  assert!(env.exists("out.txt"));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn build_that_produces_no_output_fails() {
  let env = TestEnv::with_bakefile("echo <<BIF\nghost true\nBIF\n");
  env
    .bake()
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("without modifying its target"));
  assert!(!env.exists("ghost"));
}

#[test]
fn failing_build_command_fails_the_run() {
  let env = TestEnv::with_bakefile("echo <<BIF\nghost false\nBIF\n");
  env
    .bake()
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("build failure"));
}

#[test]
fn cyclic_dependencies_are_rejected() {
  let env = TestEnv::with_bakefile("echo <<BIF\na / b\nb / a\nBIF\n");
  env
    .bake()
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("cyclic dependency"));
}

#[test]
fn failing_bakefile_command_stops_the_run() {
  let env = TestEnv::with_bakefile("false\necho <<BIF\nout.txt touch out.txt\nBIF\n");
  env
    .bake()
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("exited with status"));
  assert!(!env.exists("out.txt"));
}

// =============================================================================
// Sub-directory mode
// =============================================================================

#[test]
fn sub_mode_rewrites_names_across_the_boundary() {
  let env = TestEnv::empty();
  std::fs::create_dir(env.path().join("sub")).unwrap();
  std::fs::write(
    env.path().join("sub/Bakefile"),
    "echo <<BIF\nz touch z\nz / y\nBIF\n",
  )
  .unwrap();

  let assert = env
    .bake()
    .args(["--sub", "sub"])
    .write_stdin("x\nsub/y\nsub/y / x\n")
    .assert()
    .success();

  let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
  for line in ["x", "sub/y", "sub/z touch z", "sub/y / x", "sub/z / sub/y"] {
    assert!(stdout.lines().any(|l| l == line), "missing {line:?} in {stdout:?}");
  }
}

#[test]
fn sub_mode_requires_a_directory() {
  let env = TestEnv::empty();
  env
    .bake()
    .args(["--sub", "nowhere"])
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("not a directory"));
}

#[test]
fn nested_invocation_merges_the_child_graph() {
  let env = TestEnv::with_bakefile(&format!(
    concat!(
      "echo <<BIF\n",
      "sub/inner.txt\n",
      "top.txt sh -c \"cat sub/inner.txt > top.txt\"\n",
      "sub/inner.txt / top.txt\n",
      "BIF\n",
      "{} --sub sub\n",
    ),
    bake_binary().display()
  ));
  std::fs::create_dir(env.path().join("sub")).unwrap();
  // Build commands run from the parent directory, so the child's rule
  // writes through the sub/ prefix.
  std::fs::write(
    env.path().join("sub/Bakefile"),
    "echo <<BIF\ninner.txt sh -c \"echo payload > sub/inner.txt\"\nBIF\n",
  )
  .unwrap();

  env.bake().assert().success();
  assert_eq!(env.read("sub/inner.txt"), "payload\n");
  assert_eq!(env.read("top.txt"), "payload\n");
}
