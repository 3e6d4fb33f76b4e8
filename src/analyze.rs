use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use freqstab::{run_sweep, SweepOutcome};
use ringlog::*;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Config {
    config: freqstab::Config,
    input: PathBuf,
    verbose: u8,
}

impl TryFrom<ArgMatches> for Config {
    type Error = String;

    fn try_from(args: ArgMatches) -> Result<Self, Self::Error> {
        let path = args
            .get_one::<PathBuf>("CONFIG")
            .ok_or("missing config file")?;

        let config = freqstab::Config::load(path)
            .map_err(|e| format!("error loading config file: {}\n{e}", path.display()))?;

        Ok(Config {
            config,
            input: args
                .get_one::<PathBuf>("INPUT")
                .ok_or("missing input file")?
                .to_path_buf(),
            verbose: *args.get_one::<u8>("VERBOSE").unwrap_or(&0),
        })
    }
}

pub fn command() -> Command {
    Command::new("analyze")
        .about("Characterize the stability of a recorded frequency series")
        .arg(
            Arg::new("CONFIG")
                .help("Analysis configuration file")
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf))
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("INPUT")
                .help("Frequency samples in Hz, one per line")
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf))
                .required(true)
                .index(2),
        )
        .arg(
            Arg::new("VERBOSE")
                .long("verbose")
                .short('v')
                .help("Increase the verbosity")
                .action(ArgAction::Count),
        )
}

/// Runs a stability sweep over the samples in the input file and prints the
/// report as JSON. The first ctrl-c cancels the sweep at the next tau point,
/// a second one terminates immediately.
pub fn run(config: Config) {
    // configure debug log
    let debug_output: Box<dyn Output> = Box::new(Stderr::new());

    let level = match config.verbose {
        0 => config.config.log().level(),
        1 => Level::Debug,
        _ => Level::Trace,
    };

    let debug_log = if level <= Level::Info {
        LogBuilder::new().format(ringlog::default_format)
    } else {
        LogBuilder::new()
    }
    .output(debug_output)
    .build()
    .expect("failed to initialize debug log");

    let mut log = MultiLogBuilder::new()
        .level_filter(level.to_level_filter())
        .default(debug_log)
        .build()
        .start();

    // spawn logging thread
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_millis(100));
        let _ = log.flush();
    });

    let cancel = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler({
        let cancel = cancel.clone();

        move || {
            if !cancel.swap(true, Ordering::SeqCst) {
                info!("cancelling analysis...");
            } else {
                info!("terminating immediately");
                std::process::exit(2);
            }
        }
    })
    .expect("failed to set ctrl-c handler");

    let samples = match read_samples(&config.input) {
        Ok(samples) => samples,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    info!(
        "loaded {} samples from: {}",
        samples.len(),
        config.input.display()
    );

    let estimators: Vec<&str> = config
        .config
        .analysis()
        .estimators()
        .iter()
        .map(|kind| kind.description())
        .collect();

    info!("computing: {}", estimators.join(", "));

    let mut progress = |done: usize, total: usize, eta: f64| {
        info!("progress: {done}/{total} tau points, {eta:.1}s remaining");
    };

    let outcome = match run_sweep(config.config.analysis(), &samples, &mut progress, &cancel) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("analysis failed: {e}");
            eprintln!("analysis failed: {e}");
            std::process::exit(1);
        }
    };

    match outcome {
        SweepOutcome::Completed(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("failed to serialize report: {e}");
                std::process::exit(1);
            }
        },
        SweepOutcome::Cancelled => {
            eprintln!("analysis cancelled");
            std::process::exit(2);
        }
    }
}

/// Reads frequency samples from a text file. Blank lines and lines starting
/// with `#` are skipped and only the first token of a line is used.
pub fn read_samples(path: &Path) -> Result<Vec<f64>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("unable to read input file: {}: {e}", path.display()))?;

    parse_samples(&content)
}

fn parse_samples(content: &str) -> Result<Vec<f64>, String> {
    let mut samples = Vec::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(token) = line.split_whitespace().next() {
            let value = token
                .parse::<f64>()
                .map_err(|e| format!("line {}: bad sample '{token}': {e}", number + 1))?;
            samples.push(value);
        }
    }

    Ok(samples)
}
