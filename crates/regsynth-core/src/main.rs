//! `regsynth` command line: run a test server, check a candidate, or run a demo synthesis

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use regsynth_core::{Orchestrator, SynthesisConfig, SynthesisOutcome, TemplateGenerator};
use regsynth_oracle::Oracle;
use regsynth_registers::{RegisterMap, ValidAddressSet};
use regsynth_tester::{RuntimeKind, TestRequest, Tester};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEMO_SPECIFICATION: &str = "\
Inverter status: register 0x0005 uint16
Active power: register 0x0006 uint16
";

#[derive(Debug, Parser)]
#[command(name = "regsynth", version, about = "Register-protocol client synthesis against a strict test oracle")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a test server until interrupted
    Serve {
        /// Listen address (overrides configuration)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Test one candidate file against a fresh server
    Check {
        /// Candidate source
        file: PathBuf,
        /// Candidate runtime: script or python
        #[arg(long)]
        runtime: Option<RuntimeKind>,
        /// Print the attempt result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a synthesis with the template generator
    Demo {
        /// Specification text file (defaults to a spec with wrong addresses)
        #[arg(long)]
        spec: Option<PathBuf>,
        #[arg(long)]
        device: Option<String>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SynthesisConfig> {
    let config = match path {
        Some(path) => SynthesisConfig::load(path)?,
        None => SynthesisConfig::default(),
    }
    .with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn initial_allow_list(config: &SynthesisConfig) -> ValidAddressSet {
    ValidAddressSet::derive(&RegisterMap::new(), &config.superset, config.plausibility_floor)
}

async fn serve(config: SynthesisConfig, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let bind = bind.unwrap_or(config.bind);
    let oracle = Oracle::start(bind, initial_allow_list(&config)).await?;
    println!("test server listening on {}", oracle.endpoint());
    tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
    let stats = oracle.server().stats();
    tracing::info!(
        connections = stats.connections_accepted,
        requests = stats.requests_served,
        rejections = stats.illegal_address_rejections,
        "shutting down"
    );
    Ok(())
}

async fn check(
    config: SynthesisConfig,
    file: PathBuf,
    runtime: Option<RuntimeKind>,
    json: bool,
) -> anyhow::Result<bool> {
    let source = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
    let runtime = runtime.unwrap_or(config.runtime);
    let tester = Tester::new(runtime.build()).with_timeout(config.test_timeout())?;

    let oracle = Oracle::ephemeral(initial_allow_list(&config)).await?;
    let session = oracle.session().await;
    let request = TestRequest::new(source, session.epoch());
    let result = tester.run(&session, &request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}: {}", result.diagnosis_kind, result.message);
        if !result.suggested_addresses.is_empty() {
            println!("suggested addresses: {:?}", result.suggested_addresses);
        }
    }
    Ok(result.success)
}

async fn demo(
    config: SynthesisConfig,
    spec: Option<PathBuf>,
    device: Option<String>,
    json: bool,
) -> anyhow::Result<bool> {
    let specification = match spec {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => DEMO_SPECIFICATION.to_string(),
    };

    let oracle = Arc::new(Oracle::ephemeral(initial_allow_list(&config)).await?);
    let generator = Arc::new(TemplateGenerator::for_runtime(config.runtime));
    let orchestrator = Orchestrator::new(config, oracle, generator)?;
    let outcome = orchestrator
        .synthesize(&specification, device.as_deref(), None)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
    }
    Ok(outcome.success())
}

fn print_summary(outcome: &SynthesisOutcome) {
    for attempt in &outcome.attempt_log {
        println!(
            "attempt {}: {} ({} ms) {}",
            attempt.attempt_number, attempt.diagnosis_kind, attempt.duration_ms, attempt.message
        );
    }
    println!(
        "{} after {} attempt(s), confidence {:.1}",
        if outcome.success() { "succeeded" } else { "failed" },
        outcome.total_attempts,
        outcome.confidence_score
    );
    if let Some(code) = &outcome.final_code {
        println!("\n{code}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.log_json);
    let config = load_config(cli.global.config.as_ref())?;

    let passed = match cli.command {
        Command::Serve { bind } => {
            serve(config, bind).await?;
            true
        }
        Command::Check {
            file,
            runtime,
            json,
        } => check(config, file, runtime, json).await?,
        Command::Demo { spec, device, json } => demo(config, spec, device, json).await?,
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
