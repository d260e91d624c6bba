use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use env_logger::{Env, Target};
use log::{debug, error, info, warn};
use studio_contracts::job::JobResult;
use studio_contracts::request::{
    AspectRatio, CreationNeeds, DetailTier, InputError, JobSpec, StyleDirectives,
    DEFAULT_OUTPUT_DIR,
};
use studio_engine::{preflight_output_dir, Pipeline, StudioConfig, StudioError};

#[derive(Debug, Parser)]
#[command(
    name = "product-studio",
    version,
    about = "Generate product images grounded in real reference photos"
)]
struct Cli {
    /// What to generate, also used as the image search query.
    #[arg(long)]
    subject: String,
    #[arg(long)]
    style_instructions: Option<String>,
    /// JSON object with `colors`, `style`, optional `labels` and `ascii_sketch`.
    #[arg(long)]
    creation_needs: Option<String>,
    #[arg(long, visible_alias = "aspect-ratio", default_value = "21:9")]
    ratio: String,
    #[arg(long, visible_alias = "resolution", default_value = "1k")]
    detail: String,
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// Term to keep out of the reference search. Repeatable.
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,
    /// Event log path. Defaults to `<output>/.refs/events.jsonl`.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Log prompts and provider responses to stderr.
    #[arg(long)]
    debug: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("product-studio error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.print()?;
            return Ok(0);
        }
        Err(err) => {
            let message = err.to_string();
            let first_line = message.lines().next().unwrap_or("invalid arguments");
            println!("{}", JobResult::error(first_line.trim()).to_json());
            return Ok(2);
        }
    };
    init_logging(cli.debug);

    let job = match build_job(&cli) {
        Ok(job) => job,
        Err(err) => return Ok(report_failure(&[StudioError::from(err)])),
    };
    debug!("job: {job:?}");

    let config = StudioConfig::from_env();
    let preflight: Vec<StudioError> = [config.validate(), preflight_output_dir(&job.output_dir)]
        .into_iter()
        .filter_map(|check| check.err())
        .collect();
    if !preflight.is_empty() {
        return Ok(report_failure(&preflight));
    }

    let events_path = cli
        .events
        .clone()
        .unwrap_or_else(|| job.refs_dir().join("events.jsonl"));
    let pipeline = Pipeline::from_config(&config).with_events(&events_path);
    if let Err(err) = ctrlc::set_handler(interrupt_handler(pipeline.cancel_handle())) {
        warn!("interrupt handler not installed: {err}");
    }
    info!(
        "run {} for '{}' (events: {})",
        pipeline.run_id(),
        job.subject,
        events_path.display()
    );

    let outcome = pipeline.run(&job);
    println!("{}", outcome.result.to_json());
    Ok(outcome.exit_code())
}

fn build_job(cli: &Cli) -> Result<JobSpec, InputError> {
    let needs = cli
        .creation_needs
        .as_deref()
        .map(CreationNeeds::from_json)
        .transpose()?;
    JobSpec::new(&cli.subject, cli.output.clone())?
        .with_directives(StyleDirectives::new(cli.style_instructions.clone(), needs))
        .with_aspect_ratio(cli.ratio.parse::<AspectRatio>()?)
        .with_detail(cli.detail.parse::<DetailTier>()?)
        .with_exclusions(cli.exclude.clone())
        .with_count(cli.count)
}

/// First interrupt asks the pipeline to stop at the next stage boundary so the
/// result record is still printed. A second one exits immediately.
fn interrupt_handler(cancel: Arc<AtomicBool>) -> impl FnMut() + Send + 'static {
    move || {
        if cancel.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("interrupt received; stopping after the current stage (press again to abort)");
    }
}

/// Prints the failure record for errors raised before the pipeline starts.
fn report_failure(errors: &[StudioError]) -> i32 {
    let message = errors
        .iter()
        .map(StudioError::report)
        .collect::<Vec<_>>()
        .join("; ");
    error!("{message}");
    println!("{}", JobResult::error(message).to_json());
    errors.iter().map(StudioError::exit_code).max().unwrap_or(1)
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "info,studio_engine=debug,product_studio=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter))
        .target(Target::Stderr)
        .init();
}
