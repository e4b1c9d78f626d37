use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::Path;

use log::error;

use crate::student::Subject;

const OUTPUT_PREVIEW_LINES: usize = 7;

/// Totals over all graded subjects
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
  pub processed: usize,
  pub subjects: usize,
  pub compilation_errors: usize,
  pub warnings: usize,
  pub memory_leaks: usize,
  pub captured_errors: usize,
  pub average_grade: f64,
}

fn section(lines: &mut Vec<String>, title: &str, items: &[String]) {
  lines.push(format!("{} Errors:", title));
  if items.is_empty() {
    lines.push("\tNone".to_string());
  } else {
    lines.extend(items.iter().map(|item| format!("\t- {}", item)));
  }
  lines.push(String::new());
}

/// Text report of one subject
pub fn summarize(subject: &Subject) -> String {
  let rule = "=".repeat(80);
  let mut lines = vec![
    format!("Summary for {}", subject.name()),
    rule.clone(),
    format!("Grade: {}\n", subject.final_grade()),
  ];

  lines.push("README Content:".to_string());
  if subject.readme().is_empty() {
    lines.push("\tNo README Content Found".to_string());
  } else {
    lines.extend(subject.readme().iter().map(|line| format!("\t{}", line)));
  }
  lines.push(String::new());

  lines.push("Source File Headers:".to_string());
  for (file, header) in subject.source_headers() {
    lines.push(format!("\t{}:", file));
    lines.extend(header.iter().map(|line| format!("\t\t{}", line)));
  }
  lines.push(String::new());

  section(&mut lines, "Compilation", subject.compilation_errors());
  section(&mut lines, "Warnings", subject.warnings());
  section(&mut lines, "Memory Leaks", subject.memory_leaks());
  section(&mut lines, "Catched", subject.captured_errors());

  lines.push("Program Outputs:".to_string());
  if subject.outputs().is_empty() {
    lines.push("\tNone".to_string());
  } else {
    for (program, output) in subject.outputs() {
      lines.push(format!("\tOutput for {}:", program));
      lines.extend(
        output
          .lines()
          .take(OUTPUT_PREVIEW_LINES)
          .map(|line| format!("\t\t{}", line)),
      );
      lines.push("\t\t... (more lines follow)".to_string());
    }
  }
  lines.push(String::new());

  lines.push(format!("Extraction Penalty: {}", subject.extraction_penalty()));
  lines.push(format!("Final Grade: {}", subject.final_grade()));
  lines.push(rule);

  lines.join("\n")
}

impl Statistics {
  pub fn collect(subjects: &[Subject], processed: usize) -> Self {
    let total_grade: i64 = subjects.iter().map(|s| s.grade()).sum();
    let average_grade = if subjects.is_empty() {
      0.0
    } else {
      total_grade as f64 / subjects.len() as f64
    };
    Statistics {
      processed,
      subjects: subjects.len(),
      compilation_errors: subjects.iter().map(|s| s.compilation_errors().len()).sum(),
      warnings: subjects.iter().map(|s| s.warnings().len()).sum(),
      memory_leaks: subjects.iter().map(|s| s.memory_leaks().len()).sum(),
      captured_errors: subjects.iter().map(|s| s.captured_errors().len()).sum(),
      average_grade,
    }
  }
}

impl Display for Statistics {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "----- Statistics Summary -----")?;
    writeln!(f, "Total students processed: {}", self.processed)?;
    writeln!(f, "Total students with submissions: {}", self.subjects)?;
    writeln!(f, "Total compilation errors: {}", self.compilation_errors)?;
    writeln!(f, "Total warnings: {}", self.warnings)?;
    writeln!(f, "Total memory leaks detected: {}", self.memory_leaks)?;
    writeln!(f, "Total catched errors: {}", self.captured_errors)?;
    writeln!(f, "Average grade: {:.2}", self.average_grade)?;
    write!(f, "--------------------------------")
  }
}

/// Penalties from the archive extraction log, keyed by subject directory name.
///
/// Blocks are separated by blank lines; a block headed `Logs for <name>:`
/// ends with a line like `Score: 85 points`, which gives penalty 15.
pub fn read_extraction_penalties(path: &Path) -> HashMap<String, i64> {
  match fs::read_to_string(path) {
    Ok(text) => parse_extraction_penalties(&text),
    Err(err) => {
      error!("Error reading extraction penalties from {}: {}", path.to_string_lossy(), err);
      HashMap::new()
    }
  }
}

fn parse_extraction_penalties(text: &str) -> HashMap<String, i64> {
  let mut penalties = HashMap::new();
  for block in text.split("\n\n") {
    let lines = block.lines().collect::<Vec<&str>>();
    let (first, last) = match (lines.first(), lines.last()) {
      (Some(first), Some(last)) => (*first, *last),
      _ => continue,
    };
    let name = match first.strip_prefix("Logs for ") {
      Some(rest) => rest.strip_suffix(':').unwrap_or(rest),
      None => continue,
    };
    let score = last
      .rsplit(": ")
      .next()
      .and_then(|s| s.split_whitespace().next())
      .and_then(|s| s.parse::<i64>().ok());
    match score {
      Some(score) => {
        penalties.insert(name.to_string(), 100 - score);
      }
      None => error!("Can not read score for {} from \"{}\"", name, last),
    }
  }
  penalties
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::supervisor::ExecutionResult;

  #[test]
  fn it_should_parse_penalty_blocks() {
    let text = "Logs for alice:\nunzip ok\nScore: 90 points\n\nLogs for bob:\nScore: 100 points\n\nsomething else\nScore: 1\n";
    let penalties = parse_extraction_penalties(text);
    assert_eq!(penalties.len(), 2);
    assert_eq!(penalties["alice"], 10);
    assert_eq!(penalties["bob"], 0);
  }

  #[test]
  fn it_should_return_empty_map_for_missing_log() {
    assert!(read_extraction_penalties(Path::new("/nonexistent/extraction_summary.log")).is_empty());
  }

  #[test]
  fn it_should_summarize_subject() {
    let mut subject = Subject::new("/nonexistent/dana");
    subject.set_extraction_penalty(5);
    let long = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    subject.record_execution("ex4a1", &ExecutionResult::new(long, "", None));

    let text = summarize(&subject);
    assert!(text.starts_with("Summary for dana\n"));
    assert!(text.contains("Grade: 95\n"));
    assert!(text.contains("\tNo README Content Found"));
    assert!(text.contains("Compilation Errors:\n\tNone\n"));
    assert!(text.contains("\tOutput for ex4a1:\n\t\t1\n"));
    assert!(text.contains("\t\t7\n\t\t... (more lines follow)"));
    assert!(!text.contains("\t\t8\n"));
    assert!(text.ends_with(&format!("Final Grade: 95\n{}", "=".repeat(80))));
  }

  #[test]
  fn it_should_average_grades() {
    let stats = Statistics::collect(&[], 0);
    assert_eq!(stats.average_grade, 0.0);

    let mut a = Subject::new("/nonexistent/a");
    a.record_execution("x", &ExecutionResult::new("", "oops", None));
    let b = Subject::new("/nonexistent/b");
    let stats = Statistics::collect(&[a, b], 2);
    assert_eq!(stats.average_grade, 100.0);
    assert_eq!(stats.captured_errors, 1);
    assert!(format!("{}", stats).contains("Average grade: 100.00"));
  }
}
