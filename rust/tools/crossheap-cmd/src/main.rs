use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigArgs, Scenario};

#[derive(Parser)]
#[command(name = "crossheap-cmd")]
#[command(about = "Runs cross-boundary ownership scenarios and reports registry statistics")]
#[command(version)]
struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more ownership scenarios
    Run {
        /// Scenario(s) to run (can be specified multiple times; defaults to all
        /// well-behaved scenarios)
        #[arg(short, long, value_enum)]
        scenario: Vec<Scenario>,

        /// Number of create/destroy steps in the churn scenario
        #[arg(long, default_value_t = 1000)]
        steps: usize,
    },

    /// Uppercase text through the caller-owned buffer protocol
    Uppercase {
        /// Text to process
        text: String,

        /// Buffer capacity to offer (defaults to the required size)
        #[arg(short, long)]
        capacity: Option<usize>,
    },

    /// Print the effective host configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config.load()?;
    match cli.command {
        Commands::Run { scenario, steps } => commands::run::run(config, scenario, steps),
        Commands::Uppercase { text, capacity } => commands::uppercase::run(text, capacity),
        Commands::Config => commands::print_config(&config),
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).without_time())
        .init();
}
