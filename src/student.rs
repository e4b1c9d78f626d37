use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::assignment::{test_groups, Program, PROGRAMS};
use crate::context::ExecutionContext;
use crate::coordinator::{run_group, InvocationResult, TestGroup};
use crate::error::GraderError;
use crate::reclaim::reclaim;
use crate::supervisor::{ExecutionResult, FailureReason};
use crate::toolchain::{LeakVerdict, Toolchain};

pub const INITIAL_GRADE: i64 = 100;
pub const COMPILE_FAILURE_PENALTY: i64 = 40;
pub const WARNING_PENALTY: i64 = 7;
pub const MISSING_SOURCE_PENALTY: i64 = 5;
pub const LEAK_PENALTY: i64 = 10;

const README_LINES: usize = 10;
const HEADER_LINES: usize = 20;
const LOG_FILE: &str = "test_results.log";

/// Grading state of one submission directory
#[derive(Debug, Clone)]
pub struct Subject {
  dir: PathBuf,
  name: String,
  grade: i64,
  extraction_penalty: i64,
  compilation_errors: Vec<String>,
  warnings: Vec<String>,
  memory_leaks: Vec<String>,
  captured_errors: Vec<String>,
  outputs: Vec<(String, String)>,
  readme: Vec<String>,
  source_headers: Vec<(String, Vec<String>)>,
  /// Executables produced by this grading run
  built: HashSet<PathBuf>,
}

/// How compiling one source ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
  Compiled,
  Warning,
  Failed,
  MissingSource,
  ToolError,
}

impl Subject {
  pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
    let dir = dir.into();
    let name = dir
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| dir.to_string_lossy().to_string());
    let readme = read_readme(&dir);
    Subject {
      dir,
      name,
      grade: INITIAL_GRADE,
      extraction_penalty: 0,
      compilation_errors: vec![],
      warnings: vec![],
      memory_leaks: vec![],
      captured_errors: vec![],
      outputs: vec![],
      readme,
      source_headers: vec![],
      built: HashSet::new(),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn grade(&self) -> i64 {
    self.grade
  }

  pub fn extraction_penalty(&self) -> i64 {
    self.extraction_penalty
  }

  pub fn set_extraction_penalty(&mut self, penalty: i64) {
    self.extraction_penalty = penalty;
  }

  /// Grade after the extraction penalty, may be negative
  pub fn final_grade(&self) -> i64 {
    self.grade - self.extraction_penalty
  }

  pub fn compilation_errors(&self) -> &Vec<String> {
    &self.compilation_errors
  }

  pub fn warnings(&self) -> &Vec<String> {
    &self.warnings
  }

  pub fn memory_leaks(&self) -> &Vec<String> {
    &self.memory_leaks
  }

  pub fn captured_errors(&self) -> &Vec<String> {
    &self.captured_errors
  }

  pub fn outputs(&self) -> &Vec<(String, String)> {
    &self.outputs
  }

  pub fn readme(&self) -> &Vec<String> {
    &self.readme
  }

  pub fn source_headers(&self) -> &Vec<(String, Vec<String>)> {
    &self.source_headers
  }

  /// Whether `executable` was compiled by this run
  pub fn is_built(&self, executable: &Path) -> bool {
    self.built.contains(executable)
  }

  /// Compile every source of `program`, then leak-check what was built
  pub fn compile_program(&mut self, ctx: &ExecutionContext, toolchain: &dyn Toolchain, program: &Program) {
    for (source, executable) in program.targets(&self.dir) {
      let status = self.compile_source(toolchain, &source, &executable);
      info!("Compilation completed for {}", source.to_string_lossy());
      match status {
        CompileStatus::Compiled | CompileStatus::Warning => {
          self.built.insert(executable.clone());
          self.check_memory(ctx, toolchain, &executable);
        }
        _ => info!("Skip leak check for {}", executable.to_string_lossy()),
      }
    }
  }

  /// Compile all programs of the assignment
  pub fn compile_all(&mut self, ctx: &ExecutionContext, toolchain: &dyn Toolchain) {
    for program in PROGRAMS.iter() {
      self.compile_program(ctx, toolchain, program);
    }
  }

  pub fn compile_source(&mut self, toolchain: &dyn Toolchain, source: &Path, executable: &Path) -> CompileStatus {
    let file = source
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_default();

    if !source.exists() {
      error!("Source file {} not found.", file);
      self.compilation_errors.push(format!("Source file {} not found.", file));
      self.grade -= MISSING_SOURCE_PENALTY;
      return CompileStatus::MissingSource;
    }

    // A leftover binary must not stand in for a failed build
    match fs::remove_file(executable) {
      Ok(()) => info!("Removed previous executable {}", executable.to_string_lossy()),
      Err(err) if err.kind() == ErrorKind::NotFound => {}
      Err(err) => warn!("Can not remove previous executable {}: {}", executable.to_string_lossy(), err),
    }

    let sources = [source.to_path_buf()];
    match toolchain.compile(&sources, executable) {
      Ok(output) if !output.success => {
        error!("Compilation failed for {}: {}", file, output.stderr);
        self.compilation_errors.push(output.stderr);
        self.grade -= COMPILE_FAILURE_PENALTY;
        CompileStatus::Failed
      }
      Ok(output) if !output.stderr.is_empty() => {
        warn!("Warnings for {}: {}", file, output.stderr);
        self.warnings.push(output.stderr);
        self.grade -= WARNING_PENALTY;
        CompileStatus::Warning
      }
      Ok(_) => CompileStatus::Compiled,
      Err(err) => {
        error!("Error compiling {}: {}", file, err);
        self.captured_errors.push(format!("Error compiling {}: {}", file, err));
        CompileStatus::ToolError
      }
    }
  }

  pub fn check_memory(&mut self, ctx: &ExecutionContext, toolchain: &dyn Toolchain, executable: &Path) {
    let exe = executable.to_string_lossy().to_string();
    let result = toolchain.check_memory(ctx, executable);
    match result.failure() {
      Some(FailureReason::TimedOut) => {
        error!("Timeout expired running Valgrind on {}", exe);
        self.memory_leaks.push(format!("Timeout expired during Valgrind check for {}", exe));
      }
      Some(FailureReason::Cancelled) => {
        self.memory_leaks.push(format!("Valgrind check cancelled for {}", exe));
      }
      Some(FailureReason::LaunchError(msg)) => {
        error!("Error running Valgrind on {}: {}", exe, msg);
        self.memory_leaks.push(format!("Valgrind could not run on {}: {}", exe, msg));
      }
      None => {
        if LeakVerdict::from_stderr(result.stderr()).is_leaking() {
          self.grade -= LEAK_PENALTY;
          self.memory_leaks.push(format!("Memory leaks detected in {}:\n{}", exe, result.stderr()));
        } else {
          self.memory_leaks.push(format!("No memory leaks in {}", exe));
        }
        info!("Valgrind check completed for {}", exe);
      }
    }
  }

  /// Fold one execution into the record. Timeouts are recorded, never scored.
  pub fn record_execution(&mut self, program: &str, result: &ExecutionResult) {
    if !result.stdout().is_empty() {
      info!("Output for {}: {}", program, result.stdout());
      self.outputs.push((program.to_string(), result.stdout().to_string()));
    }
    if let Some(failure) = result.failure() {
      error!("Error executing {}: {}", program, failure);
      self.captured_errors.push(failure.to_string());
    }
    if !result.stderr().is_empty() {
      error!("Stderr of {}: {}", program, result.stderr());
      self.captured_errors.push(result.stderr().to_string());
    }
  }

  fn record_group(&mut self, results: &[InvocationResult]) {
    for item in results {
      self.record_execution(&item.invocation().program_name(), item.result());
    }
  }

  /// Run every test group, reclaiming shared resources around each one
  pub fn run_all(&mut self, ctx: &ExecutionContext) {
    reclaim(ctx);
    for group in test_groups(ctx, &self.dir) {
      if ctx.is_cancelled() {
        warn!("Cancelled, skipping remaining groups of {}", self.name);
        break;
      }
      let group = match self.runnable(group) {
        Some(group) => group,
        None => continue,
      };

      reclaim(ctx);
      info!("Running group {} for {}", group.name(), self.name);
      let results = run_group(ctx, &group);
      self.record_group(&results);
    }
    reclaim(ctx);
  }

  /// Drop invocations of programs that were not built. The whole group is
  /// skipped when a creator is missing, since its siblings depend on it.
  fn runnable(&self, group: TestGroup) -> Option<TestGroup> {
    if let Some(creator) = group
      .invocations()
      .iter()
      .find(|i| i.is_creator() && !self.is_built(i.command().program()))
    {
      info!("Skip group {}: {} was not built", group.name(), creator.program_name());
      return None;
    }
    for invocation in group.invocations().iter().filter(|i| !self.is_built(i.command().program())) {
      info!("Skip {}: not built", invocation.command().display());
    }
    let group = group.retain(|i| self.is_built(i.command().program()));
    if group.invocations().is_empty() {
      None
    } else {
      Some(group)
    }
  }

  /// Keep the first lines of every C source that has at least that many
  pub fn read_source_headers(&mut self) {
    let entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(err) => {
        error!("Error listing {}: {}", self.dir.to_string_lossy(), err);
        return;
      }
    };

    let mut files = entries
      .filter_map(|entry| entry.ok())
      .map(|entry| entry.file_name().to_string_lossy().to_string())
      .filter(|name| name.ends_with(".c"))
      .collect::<Vec<String>>();
    files.sort();

    for file in files {
      match first_lines(&self.dir.join(&file), HEADER_LINES) {
        Ok(lines) if lines.len() == HEADER_LINES => self.source_headers.push((file, lines)),
        Ok(_) => {}
        Err(err) => error!("Error reading file {}: {}", file, err),
      }
    }
  }

  /// Append `message` to the subject's own log file
  pub fn log_to_file(&self, message: &str) -> Result<(), GraderError> {
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(self.dir.join(LOG_FILE))?;
    writeln!(file, "{}", message)?;
    Ok(())
  }
}

fn read_readme(dir: &Path) -> Vec<String> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(_) => return vec![],
  };
  let mut names = entries
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.file_name().to_string_lossy().to_string())
    .filter(|name| name.to_lowercase().starts_with("readme"))
    .collect::<Vec<String>>();
  names.sort();

  match names.first() {
    Some(name) => match first_lines(&dir.join(name), README_LINES) {
      Ok(lines) => lines.into_iter().map(|l| l.trim().to_string()).collect(),
      Err(err) => {
        error!("Error reading README: {}", err);
        vec![format!("Error reading README: {}", err)]
      }
    },
    None => vec![],
  }
}

fn first_lines(path: &Path, count: usize) -> Result<Vec<String>, GraderError> {
  let file = fs::File::open(path)?;
  let mut lines = vec![];
  for line in BufReader::new(file).lines().take(count) {
    lines.push(line?);
  }
  Ok(lines)
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::*;

  #[test]
  fn it_should_record_timeout_without_penalty() {
    let mut subject = Subject::new("/nonexistent/subject");
    let result = ExecutionResult::new("partial", "", Some(FailureReason::TimedOut));
    subject.record_execution("ex4a1", &result);
    assert_eq!(subject.grade(), INITIAL_GRADE);
    assert_eq!(subject.outputs(), &vec![("ex4a1".to_string(), "partial".to_string())]);
    assert_eq!(subject.captured_errors(), &vec!["Execution timed out.".to_string()]);
  }

  #[test]
  fn it_should_keep_stderr_of_completed_run_as_captured_error() {
    let mut subject = Subject::new("/nonexistent/subject");
    subject.record_execution("ex4b2", &ExecutionResult::new("", "bad fd\n", None));
    assert!(subject.outputs().is_empty());
    assert_eq!(subject.captured_errors(), &vec!["bad fd\n".to_string()]);
    assert_eq!(subject.grade(), INITIAL_GRADE);
  }

  #[test]
  fn it_should_allow_negative_final_grade() {
    let mut subject = Subject::new("/nonexistent/subject");
    subject.set_extraction_penalty(130);
    assert_eq!(subject.final_grade(), -30);
  }

  #[test]
  fn it_should_read_readme_and_long_headers() {
    let dir = tempdir().unwrap();
    let long = (1..=25).map(|i| format!("// line {}", i)).collect::<Vec<_>>().join("\n");
    fs::write(dir.path().join("ex4a1.c"), long).unwrap();
    fs::write(dir.path().join("ex4a2.c"), "int main() {}\n").unwrap();
    fs::write(dir.path().join("README.txt"), "  Name: Dana  \nId: 1\n").unwrap();

    let mut subject = Subject::new(dir.path());
    assert_eq!(subject.readme(), &vec!["Name: Dana".to_string(), "Id: 1".to_string()]);

    subject.read_source_headers();
    assert_eq!(subject.source_headers().len(), 1);
    assert_eq!(subject.source_headers()[0].0, "ex4a1.c");
    assert_eq!(subject.source_headers()[0].1.len(), 20);
  }

  #[test]
  fn it_should_append_to_log_file() {
    let dir = tempdir().unwrap();
    let subject = Subject::new(dir.path());
    subject.log_to_file("first").unwrap();
    subject.log_to_file("second").unwrap();
    let text = fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
    assert_eq!(text, "first\nsecond\n");
  }
}
