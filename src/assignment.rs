use std::path::{Path, PathBuf};

use lazy_static::lazy_static;

use crate::context::ExecutionContext;
use crate::coordinator::{Invocation, TestGroup};
use crate::launcher::Command;

/// A graded program and the sources compiled for it, one executable per source
pub struct Program {
  pub name: &'static str,
  pub sources: Vec<&'static str>,
}

struct GroupSpec {
  name: &'static str,
  runs: Vec<RunSpec>,
}

struct RunSpec {
  executable: &'static str,
  arguments: Vec<&'static str>,
  creator: bool,
  input: Option<&'static str>,
}

/// Command script piped to the interactive client of part c
pub const EX4C3_INPUT: &str = "p 1 2 3 4 5 6 7 8 9 10 0\nq 121\n";

lazy_static! {
  pub static ref PROGRAMS: Vec<Program> = vec![
    Program { name: "ex4a1", sources: vec!["ex4a1.c"] },
    Program { name: "ex4a2", sources: vec!["ex4a2.c"] },
    Program { name: "ex4b1", sources: vec!["ex4b1.c", "ex4b2.c"] },
    Program { name: "ex4c1", sources: vec!["ex4c1.c", "ex4c2.c", "ex4c3.c"] },
  ];

  static ref GROUPS: Vec<GroupSpec> = vec![
    GroupSpec {
      name: "fifo",
      runs: vec![
        RunSpec::creator("ex4a1", vec!["fifom", "fifo1", "fifo2"]),
        RunSpec::plain("ex4a2", vec!["fifom", "0"]),
        RunSpec::plain("ex4a2", vec!["fifom", "1"]),
      ],
    },
    GroupSpec {
      name: "queue",
      runs: vec![
        RunSpec::creator("ex4b1", vec![]),
        RunSpec::plain("ex4b2", vec!["0"]),
        RunSpec::plain("ex4b2", vec!["1"]),
      ],
    },
    GroupSpec {
      name: "server",
      runs: vec![
        RunSpec::creator("ex4c1", vec![]),
        RunSpec::creator("ex4c2", vec![]),
        RunSpec::plain("ex4c3", vec![]).input(EX4C3_INPUT),
      ],
    },
  ];
}

impl RunSpec {
  fn plain(executable: &'static str, arguments: Vec<&'static str>) -> Self {
    RunSpec {
      executable,
      arguments,
      creator: false,
      input: None,
    }
  }

  fn creator(executable: &'static str, arguments: Vec<&'static str>) -> Self {
    RunSpec {
      creator: true,
      ..Self::plain(executable, arguments)
    }
  }

  fn input(mut self, text: &'static str) -> Self {
    self.input = Some(text);
    self
  }
}

impl Program {
  /// `(source path, executable path)` pairs inside `dir`
  pub fn targets(&self, dir: &Path) -> Vec<(PathBuf, PathBuf)> {
    self
      .sources
      .iter()
      .map(|source| {
        let stem = source.trim_end_matches(".c");
        (dir.join(source), dir.join(stem))
      })
      .collect()
  }
}

/// The test groups for one subject, executables resolved inside `dir`
pub fn test_groups(ctx: &ExecutionContext, dir: &Path) -> Vec<TestGroup> {
  GROUPS
    .iter()
    .map(|spec| {
      spec.runs.iter().fold(TestGroup::new(spec.name), |group, run| {
        let executable = dir.join(run.executable);
        let timeout = ctx.deadline_for(&executable);
        let command = Command::new(executable, run.arguments.clone())
          .set_input(run.input.map(|s| s.to_string()))
          .cwd(ctx.work_dir());
        let invocation = Invocation::new(command, timeout);
        group.invocation(if run.creator { invocation.creator() } else { invocation })
      })
    })
    .collect()
}
