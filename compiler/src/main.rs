use clap::Parser;
use std::path::PathBuf;

use dexc::backend::Backend;
use dexc::block::Output;
use dexc::env::TopEnv;

const EXIT_OK: i32 = 0;
const EXIT_EVAL_ERROR: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum BackendOpt {
    Jit,
    Interp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum DiagnosticFormat {
    Human,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "dexc",
    version,
    about = "dexc — staged compiler and interactive evaluator for the Dex array language"
)]
struct Cli {
    /// Input .dx source file
    source: PathBuf,

    /// Execution backend (interp is reserved and currently inert)
    #[arg(long, value_enum, default_value_t = BackendOpt::Jit)]
    backend: BackendOpt,

    /// Emit per-pass debug events with timings
    #[arg(long)]
    verbose: bool,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value_t = DiagnosticFormat::Human)]
    diagnostic_format: DiagnosticFormat,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}: {}", cli.source.display(), e);
            std::process::exit(EXIT_USAGE_ERROR);
        }
    };

    let backend = match cli.backend {
        BackendOpt::Jit => Backend::Jit,
        BackendOpt::Interp => Backend::Interp,
    };
    let format = cli.diagnostic_format;

    let mut env = TopEnv::default();
    let mut sink = |out: &Output| match format {
        DiagnosticFormat::Human => println!("{}", out),
        DiagnosticFormat::Json => {
            println!("{}", serde_json::to_string(out).unwrap_or_default())
        }
    };
    let results = dexc::pipeline::eval_source(backend, &mut env, &source, &mut sink);

    let mut failed = false;
    for result in &results {
        if let Err(e) = &result.outcome {
            failed = true;
            match format {
                DiagnosticFormat::Human => eprintln!("{}", e),
                DiagnosticFormat::Json => {
                    eprintln!("{}", serde_json::to_string(e).unwrap_or_default())
                }
            }
        }
    }

    std::process::exit(if failed { EXIT_EVAL_ERROR } else { EXIT_OK });
}
