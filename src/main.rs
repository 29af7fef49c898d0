//! boxjumper binary - run command files through chains of jumpboxes
//!
//! ```bash
//! # Run the chain described in config.txt
//! boxjumper
//!
//! # Show what would be run
//! boxjumper -d -c lab.txt
//!
//! # Idle-timeout detection, echo output, archive results into ./tmp
//! boxjumper -t -p --move-to tmp
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use boxjumper::audit::AuditLog;
use boxjumper::config::{ConfigLoader, Jumpbox};
use boxjumper::credentials::TerminalCredentials;
use boxjumper::error::JumpError;
use boxjumper::orchestrator::{Orchestrator, RunSettings};
use boxjumper::outputs;
use boxjumper::session::{ConnectionSecurityOptions, SecurityLevel, SshConnector};
use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// General purpose command runner for hosts behind jumpboxes
#[derive(Parser, Debug)]
#[command(name = "boxjumper")]
#[command(version)]
#[command(
    about = "Run command files on hosts reached through chains of jumpboxes",
    long_about = None
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config.txt", value_name = "FILE")]
    config: PathBuf,

    /// Display the loaded configuration, but do not execute
    #[arg(short, long)]
    dry_run: bool,

    /// With --dry-run, print the configuration as JSON
    #[arg(long, requires = "dry_run")]
    json: bool,

    /// Non-blocking execution: a command is done once output stays idle
    #[arg(short, long)]
    timeout: bool,

    /// Print command output to the screen
    #[arg(short, long)]
    print_output: bool,

    /// Directory for per-node output files
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    output_dir: PathBuf,

    /// Audit log file
    #[arg(long, default_value = "boxjumper.log", value_name = "FILE")]
    audit_log: PathBuf,

    /// Move output files into DIR after the run, if DIR exists
    #[arg(long, value_name = "DIR")]
    move_to: Option<PathBuf>,

    /// SSH algorithm profile for the first hop
    #[arg(long, value_enum, default_value_t = SecurityArg::Balanced)]
    security: SecurityArg,

    /// Verify the first hop's host key against ~/.ssh/known_hosts
    #[arg(long)]
    strict_host_keys: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SecurityArg {
    Secure,
    Balanced,
    Legacy,
}

impl From<SecurityArg> for SecurityLevel {
    fn from(arg: SecurityArg) -> Self {
        match arg {
            SecurityArg::Secure => SecurityLevel::Secure,
            SecurityArg::Balanced => SecurityLevel::Balanced,
            SecurityArg::Legacy => SecurityLevel::Legacy,
        }
    }
}

fn init_logging(verbosity: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbosity {
            0 => EnvFilter::new("boxjumper=warn"),
            1 => EnvFilter::new("boxjumper=info"),
            2 => EnvFilter::new("boxjumper=debug,russh=debug"),
            _ => EnvFilter::new("boxjumper=trace,russh=trace"),
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(node) = err.downcast_ref::<JumpError>().and_then(JumpError::failed_node) {
                eprintln!("Failed to connect to {node}");
            }
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    println!("using configuration file {}", cli.config.display());
    let entries = ConfigLoader::default().load_file(&cli.config).await?;

    if cli.dry_run {
        return print_configuration(&cli, &entries);
    }

    let security = ConnectionSecurityOptions::new(cli.security.into(), cli.strict_host_keys);
    let connector = SshConnector::new(security);
    let settings = RunSettings {
        blocking: !cli.timeout,
        print_output: cli.print_output,
        output_dir: cli.output_dir.clone(),
    };
    let orchestrator = Orchestrator::new(&connector, &TerminalCredentials, settings);

    let mut audit = AuditLog::create(&cli.audit_log).await?;
    let outcome = orchestrator.run(entries, &mut audit).await;
    audit
        .close()
        .await
        .with_context(|| format!("closing {}", cli.audit_log.display()))?;
    let report = outcome?;

    if let Some(dir) = &cli.move_to {
        outputs::archive(&report.outputs, dir)
            .await
            .with_context(|| format!("moving outputs to {}", dir.display()))?;
    }
    Ok(())
}

fn print_configuration(cli: &Cli, entries: &[Jumpbox]) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    println!("print output is {}", cli.print_output);
    println!("blocking is {}\n", !cli.timeout);
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}
