//! zippon-loadgen CLI
//!
//! - `generate`: print synthetic `ADD User (...)` commands, no process involved
//! - `load`: spawn ZipponDB repeatedly and push generated commands through it
//!
//! ```bash
//! cargo run -p zippon-loadgen-cli --release -- load --bin zig-out/bin/zippon --sessions 10 --records 1 --print-responses
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use zippon_loadgen::{
    run_load, LoadObserver, LoadPlan, LoadReport, RecordGenerator, Response, SessionReport,
};

#[derive(Parser)]
#[command(name = "zippon-loadgen")]
#[command(author, version, about = "Synthetic load generator for ZipponDB")]
struct Cli {
    /// Raise log verbosity (`-v` debug, `-vv` trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print generated commands to stdout, one per line.
    Generate {
        /// Number of commands to print.
        #[arg(long, default_value_t = 10)]
        count: usize,

        /// RNG seed (deterministic).
        #[arg(long)]
        seed: Option<u64>,

        /// Wrap each command as a `run "..."` request line.
        #[arg(long)]
        framed: bool,
    },

    /// Drive the collaborator: spawn, send records, quit, repeat.
    Load(LoadArgs),
}

#[derive(clap::Args)]
struct LoadArgs {
    /// JSON `LoadPlan`; flags below override its fields.
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Collaborator executable (default: `$ZIPPON_BIN`, else `zig-out/bin/zippon`).
    #[arg(long = "bin")]
    program: Option<PathBuf>,

    /// Extra argument passed to the collaborator (repeatable).
    #[arg(long = "arg")]
    args: Vec<String>,

    /// Number of process lifetimes.
    #[arg(long)]
    sessions: Option<usize>,

    /// Records sent per process lifetime.
    #[arg(long)]
    records: Option<usize>,

    /// RNG seed (deterministic).
    #[arg(long)]
    seed: Option<u64>,

    /// Fail a request when no response frame arrives within this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Milliseconds to let the collaborator exit on `quit` before killing it.
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Do not send `quit` before terminating each process.
    #[arg(long)]
    no_quit: bool,

    /// Print every response.
    #[arg(long)]
    print_responses: bool,

    /// Write the JSON report here instead of only printing a summary.
    #[arg(long)]
    out_json: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Generate {
            count,
            seed,
            framed,
        } => cmd_generate(count, seed, framed),
        Commands::Load(args) => cmd_load(args),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn cmd_generate(count: usize, seed: Option<u64>, framed: bool) -> Result<()> {
    let generator = match seed {
        Some(seed) => RecordGenerator::seeded(seed),
        None => RecordGenerator::from_entropy(),
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for command in generator.take(count) {
        if framed {
            writeln!(out, "run \"{command}\"")?;
        } else {
            writeln!(out, "{command}")?;
        }
    }
    out.flush()?;
    Ok(())
}

fn build_plan(args: &LoadArgs) -> Result<LoadPlan> {
    let mut plan = match &args.plan {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read plan {}", path.display()))?;
            serde_json::from_str::<LoadPlan>(&text)
                .with_context(|| format!("invalid plan {}", path.display()))?
        }
        None => LoadPlan::default(),
    };

    if let Some(program) = &args.program {
        plan.channel.program = program.clone();
    }
    if !args.args.is_empty() {
        plan.channel.args = args.args.clone();
    }
    if let Some(sessions) = args.sessions {
        plan.sessions = sessions;
    }
    if let Some(records) = args.records {
        plan.records_per_session = records;
    }
    if args.seed.is_some() {
        plan.seed = args.seed;
    }
    if let Some(ms) = args.timeout_ms {
        if ms == 0 {
            return Err(anyhow!("--timeout-ms must be > 0"));
        }
        plan.channel.response_timeout_ms = Some(ms);
    }
    if let Some(ms) = args.grace_ms {
        plan.channel.shutdown_grace_ms = ms;
    }
    if args.no_quit {
        plan.channel.send_quit = false;
    }
    Ok(plan)
}

struct Progress {
    sessions: usize,
    print_responses: bool,
}

impl LoadObserver for Progress {
    fn on_response(&mut self, session: usize, request: usize, response: &Response) {
        if !self.print_responses {
            return;
        }
        let marker = if response.complete {
            "".normal()
        } else {
            " (truncated)".yellow()
        };
        println!("[{session}:{request}]{marker} {}", response.text);
    }

    fn on_session_end(&mut self, report: &SessionReport) {
        let exit = match report.exit_code {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        };
        let line = format!(
            "session {}/{}: {} requests in {}ms (pid={}, exit={exit})",
            report.index + 1,
            self.sessions,
            report.requests,
            report.elapsed_ms,
            report.pid,
        );
        if report.truncated > 0 {
            eprintln!("{} {} truncated", line.yellow(), report.truncated);
        } else {
            eprintln!("{}", line.dimmed());
        }
    }
}

fn cmd_load(args: LoadArgs) -> Result<()> {
    let plan = build_plan(&args)?;
    tracing::info!(
        program = %plan.channel.program.display(),
        sessions = plan.sessions,
        records_per_session = plan.records_per_session,
        "starting load"
    );

    let mut progress = Progress {
        sessions: plan.sessions,
        print_responses: args.print_responses,
    };
    let report = run_load(&plan, &mut progress)
        .with_context(|| format!("load against {} failed", plan.channel.program.display()))?;

    print_summary(&report);
    if let Some(path) = &args.out_json {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn print_summary(report: &LoadReport) {
    println!("{}", "load complete".green().bold());
    println!("  program={}", report.program);
    println!(
        "  sessions={} requests={} ({:.1} req/s)",
        report.sessions.len(),
        report.total_requests,
        throughput(report.total_requests, report.elapsed_ms)
    );
    println!("  response_bytes={}", report.total_response_bytes);
    if report.truncated_responses > 0 {
        println!(
            "  {}",
            format!("truncated_responses={}", report.truncated_responses).yellow()
        );
    }
    println!("  elapsed={}ms", report.elapsed_ms);
}

fn throughput(requests: usize, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return requests as f64 * 1000.0;
    }
    requests as f64 * 1000.0 / elapsed_ms as f64
}
