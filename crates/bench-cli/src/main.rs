use anyhow::Result;
use bench_runner::{BenchError, BenchOptions, BenchOutcome};
use clap::Parser;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "fhe-bench",
    version,
    about = "Run the encrypted ML inference benchmark"
)]
struct Cli {
    /// Instance size (0-single/1-small/2-medium/3-large)
    size: u32,
    /// Number of times to repeat the per-run stages
    #[arg(long = "num_runs", visible_alias = "num-runs", default_value_t = 1)]
    num_runs: usize,
    /// Base seed for per-run input generation
    #[arg(long)]
    seed: Option<u64>,
    /// Set to 0 to skip the cleartext reference computation
    #[arg(long)]
    clrtxt: Option<i64>,
    /// Run against the remote backend submission
    #[arg(long)]
    remote: bool,
    /// Benchmark root containing harness/, scripts/ and the submission
    #[arg(long)]
    root_dir: Option<PathBuf>,
    /// Dataset name forwarded to the harness
    #[arg(long, default_value = "mnist")]
    dataset: String,
    /// Do not run the submission build scripts
    #[arg(long)]
    skip_build: bool,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long)]
    json: bool,
}

impl From<&Cli> for BenchOptions {
    fn from(cli: &Cli) -> Self {
        BenchOptions {
            size: cli.size,
            root_dir: cli.root_dir.clone(),
            num_runs: cli.num_runs,
            seed: cli.seed,
            clrtxt: cli.clrtxt,
            remote: cli.remote,
            dataset: cli.dataset.clone(),
            skip_build: cli.skip_build,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run_command(&cli) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            let code = err.exit_code();
            if cli.json {
                emit_json(&json_error(&err));
            } else {
                eprintln!("error: {}", err);
                if let Some(source) = std::error::Error::source(&err) {
                    eprintln!("caused by: {}", source);
                }
            }
            std::process::exit(code);
        }
    }
}

/// `RUST_LOG` wins over `--log-level`.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn run_command(cli: &Cli) -> std::result::Result<Option<Value>, BenchError> {
    let outcome = bench_runner::run_benchmark(BenchOptions::from(cli))?;
    if cli.json {
        return Ok(Some(json!({
            "ok": true,
            "command": "run",
            "result": outcome_to_json(&outcome),
        })));
    }
    print_outcome(&outcome);
    Ok(None)
}

/// One JSON document per line on stdout; a payload that cannot be encoded
/// is replaced by a `serialization_error` envelope.
fn emit_json(value: &Value) {
    let line = serde_json::to_string(value).unwrap_or_else(|err| {
        json!({
            "ok": false,
            "error": {
                "code": "serialization_error",
                "message": err.to_string(),
                "details": {}
            }
        })
        .to_string()
    });
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", line);
}

fn error_code(err: &BenchError) -> &'static str {
    match err {
        BenchError::InvalidSize(_) | BenchError::MissingDirectory { .. } => "configuration_error",
        BenchError::StageFailed { .. } | BenchError::StageSpawn { .. } => "stage_failed",
        BenchError::MissingArtifact { .. } => "missing_artifact",
        BenchError::Io(_) | BenchError::Walk(_) | BenchError::Json(_) => "io_error",
    }
}

fn json_error(err: &BenchError) -> Value {
    let details = match err {
        BenchError::StageFailed { stage, code } => json!({ "stage": stage, "exit_code": code }),
        BenchError::StageSpawn { stage, program, .. } => {
            json!({ "stage": stage, "program": program.display().to_string() })
        }
        BenchError::MissingArtifact { path, .. } | BenchError::MissingDirectory { root: path, .. } => {
            json!({ "path": path.display().to_string() })
        }
        _ => json!({}),
    };
    json!({
        "ok": false,
        "error": {
            "code": error_code(err),
            "message": err.to_string(),
            "details": details
        }
    })
}

fn outcome_to_json(outcome: &BenchOutcome) -> Value {
    json!({
        "instance": outcome.instance.name(),
        "root_dir": outcome.root_dir.display().to_string(),
        "reports": outcome
            .reports
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>(),
        "soft_failures": outcome.soft_failures,
    })
}

fn print_outcome(outcome: &BenchOutcome) {
    println!("instance: {}", outcome.instance);
    println!("root_dir: {}", outcome.root_dir.display());
    for report in &outcome.reports {
        println!("report: {}", report.display());
    }
    for failure in &outcome.soft_failures {
        println!("soft_failure: {}", failure);
    }
}
