//! Tabpilot - goal-directed browser agent
//!
//! Main entry point for the CLI application.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tabpilot::agent::scheduler::load_batch;
use tabpilot::{Agent, Config};
use tracing_subscriber::EnvFilter;

/// Tabpilot - goal-directed browser agent
#[derive(Parser, Debug)]
#[command(name = "tabpilot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Goal to pursue in a single tab
    #[arg(long, short = 'g', conflicts_with = "batch")]
    goal: Option<String>,

    /// TOML file of [[task]] entries to run concurrently
    #[arg(long, short = 'b')]
    batch: Option<PathBuf>,

    /// Oracle model
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Cycle budget per goal
    #[arg(long)]
    max_cycles: Option<usize>,

    /// Tabs allowed to run at once in batch mode
    #[arg(long)]
    concurrency: Option<usize>,

    /// Run in headed browser mode (visible window)
    #[arg(long)]
    headed: bool,

    /// Enable debug output
    #[arg(long, short = 'd')]
    debug: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "tabpilot=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Build configuration
    let mut config = Config::load();

    // Apply CLI overrides
    if let Some(ref model) = args.model {
        config.models.oracle = model.clone();
    }

    if let Some(max_cycles) = args.max_cycles {
        config.agent.max_cycles = max_cycles;
    }

    if let Some(concurrency) = args.concurrency {
        config.scheduler.max_concurrent_tasks = concurrency;
    }

    if args.debug {
        config.agent.debug = true;
    }

    if args.headed {
        config.browser.headed = true;
    }

    init_tracing(config.agent.debug);

    if args.save_config {
        config.validate()?;
        let path = config.save()?;
        println!("Configuration saved to {}", path.display());
        return Ok(());
    }

    let agent = Agent::with_config(config)?;

    match (args.goal, args.batch) {
        (Some(goal), _) => {
            agent.initialize().await?;
            let report = agent.run_goal(&goal).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        (None, Some(path)) => {
            let tasks = load_batch(&path)
                .await
                .with_context(|| format!("reading batch file {}", path.display()))?;
            agent.initialize().await?;
            let results = agent.run_batch(tasks).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        (None, None) => bail!("nothing to do: pass --goal \"...\" or --batch tasks.toml"),
    }

    Ok(())
}
