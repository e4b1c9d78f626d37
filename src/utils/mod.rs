use flexi_logger::DeferredNow;
use log::Record;

/// A logline-formatter that produces log lines like <br>
/// ```[datetime: INFO] Completed ex4a1 with PID: 4242```
pub fn default_format(
  w: &mut dyn std::io::Write,
  now: &mut DeferredNow,
  record: &Record,
) -> Result<(), std::io::Error> {
  write!(
    w,
    "[{}: {:5}] {}",
    now.format("%Y-%m-%d %H:%M:%S"),
    record.level(),
    record.args()
  )
}

/// Submission directories are named after students, in Hebrew
pub fn contains_hebrew(name: &str) -> bool {
  name.chars().any(|c| ('\u{0590}'..='\u{05FF}').contains(&c))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_detect_hebrew_names() {
    assert!(contains_hebrew("דנה_12345"));
    assert!(!contains_hebrew("dana_12345"));
    assert!(!contains_hebrew("logs"));
  }
}
