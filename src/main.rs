use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use flexi_logger::{Duplicate, FileSpec, Logger};
use log::{error, info, warn};

use ipcgrade::reclaim::remove_fifos;
use ipcgrade::report::{read_extraction_penalties, summarize, Statistics};
use ipcgrade::utils::{contains_hebrew, default_format};
use ipcgrade::{install_signal_handler, ExecutionContext, GccValgrind, GraderError, GraderExit, Subject};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[arg(short, long, help = "Directory holding one sub-directory per student (default: current)")]
  dir: Option<PathBuf>,

  #[arg(short, long, default_value = "ex4", help = "Exercise name used in the summary file name")]
  name: String,

  #[arg(long, default_value_t = false, help = "Grade every sub-directory, not only Hebrew-named ones")]
  all: bool,

  #[arg(long, default_value_t = 120, help = "Deadline per program (unit: s)")]
  timeout: u64,

  #[arg(long, default_value_t = 12, help = "Deadline for the interactive programs (unit: s)")]
  short_timeout: u64,

  #[arg(long, default_value_t = 5, help = "Pause after starting a creator program (unit: s)")]
  creator_delay: u64,

  #[arg(long, default_value = "gcc")]
  compiler: PathBuf,

  #[arg(long, default_value = "valgrind")]
  valgrind: PathBuf,
}

impl Cli {
  fn context(&self, work_dir: &Path) -> ExecutionContext {
    ExecutionContext::builder()
      .work_dir(work_dir)
      .timeout(Duration::from_secs(self.timeout))
      .short_timeout(Duration::from_secs(self.short_timeout))
      .creator_delay(Duration::from_secs(self.creator_delay))
      .build()
  }
}

fn subject_dirs(main_dir: &Path, all: bool) -> Result<Vec<PathBuf>, GraderError> {
  let mut dirs = fs::read_dir(main_dir)?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| path.is_dir())
    .filter(|path| {
      let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
      all || contains_hebrew(&name)
    })
    .collect::<Vec<PathBuf>>();
  dirs.sort();
  Ok(dirs)
}

fn grade(ctx: &ExecutionContext, toolchain: &GccValgrind, dir: &Path, penalty: i64) -> Subject {
  let mut subject = Subject::new(dir);
  subject.set_extraction_penalty(penalty);

  info!("Compiling for {}", subject.name());
  subject.compile_all(ctx, toolchain);
  subject.run_all(ctx);
  subject.read_source_headers();
  subject
}

fn start() -> Result<(), GraderError> {
  let cli = Cli::parse();

  Logger::try_with_str("ipcgrade=debug")?
    .log_to_file(
      FileSpec::default()
        .directory(env::var("LOG_DIR").unwrap_or("./logs/".into()))
        .basename("ipcgrade")
        .discriminant(format!("{}", chrono::offset::Local::now().format("%Y-%m-%d")))
        .suppress_timestamp(),
    )
    .append()
    .duplicate_to_stderr(Duplicate::Info)
    .format_for_files(default_format)
    .format_for_stderr(default_format)
    .start()?;

  let main_dir = match &cli.dir {
    Some(dir) if dir.is_dir() => dir.canonicalize()?,
    Some(dir) => return Err(GraderError::cli(format!("{} is not a directory", dir.to_string_lossy()))),
    None => env::current_dir()?,
  };
  let ctx = cli.context(&main_dir);
  install_signal_handler(ctx.cancellation())?;
  let toolchain = GccValgrind::new().compiler(&cli.compiler).checker(&cli.valgrind);

  let penalties = read_extraction_penalties(&main_dir.join("extraction_summary.log"));
  let dirs = subject_dirs(&main_dir, cli.all)?;
  let summary_path = main_dir.join(format!("final_summary_{}.log", cli.name));
  let mut summary_file = File::create(&summary_path)?;

  info!("Start grading {} submissions in {}", dirs.len(), main_dir.to_string_lossy());

  let mut subjects = vec![];
  for dir in dirs.iter() {
    if ctx.is_cancelled() {
      warn!("Cancelled, stopping before {}", dir.to_string_lossy());
      break;
    }
    let name = dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    info!("Processing: {}", name);

    remove_fifos(ctx.work_dir(), ctx.fifo_names().as_slice());
    let penalty = penalties.get(&name).copied().unwrap_or(0);
    let subject = grade(&ctx, &toolchain, dir, penalty);
    remove_fifos(ctx.work_dir(), ctx.fifo_names().as_slice());

    let text = summarize(&subject);
    writeln!(summary_file, "{}", text)?;
    writeln!(summary_file, "\n{}\n", "=".repeat(40))?;
    if let Err(err) = subject.log_to_file(&text) {
      error!("An error occurred while writing the log of {}: {}", name, err);
      writeln!(summary_file, "Error processing {}: {}\n", name, err)?;
    }
    subjects.push(subject);
  }

  info!("Total {} students out of {}", subjects.len(), dirs.len());
  println!("\n{}\n", Statistics::collect(&subjects, subjects.len()));
  info!("Summary written to {}", summary_path.to_string_lossy());

  Ok(())
}

fn main() -> GraderExit {
  start().into()
}
