use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use streamgen::{GenerateOptions, WireFormat};

#[derive(Parser)]
#[command(name = "streamgen")]
#[command(about = "Correlated test data generator for Kafka topic fabrics")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate correlated data and publish it to the broker
    Generate {
        /// Path to the correlation config YAML file
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Path to the broker config JSON file
        #[arg(long, short = 'b')]
        broker_config: Option<PathBuf>,

        /// Output wire format
        #[arg(long, short = 'f', value_enum, default_value = "json")]
        format: Format,

        /// Delete declared topics before generating
        #[arg(long)]
        clean_topics: bool,

        /// Write records to stdout instead of the broker
        #[arg(long)]
        dry_run: bool,

        /// Random seed for deterministic generation (same seed = same data)
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Seconds to wait for in-flight messages at shutdown
        #[arg(long, default_value = "30")]
        drain_timeout: u64,
    },

    /// Validate a correlation config and exit
    Validate {
        /// Path to the correlation config YAML file
        #[arg(long, short = 'c')]
        config: PathBuf,
    },

    /// Write an example correlation config
    ExampleConfig {
        /// Output file path
        output: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// UTF-8 JSON text
    Json,
    /// Schema-registry framed binary
    Binary,
}

impl From<Format> for WireFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => WireFormat::Json,
            Format::Binary => WireFormat::Binary,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Generate {
            config,
            broker_config,
            format,
            clean_topics,
            dry_run,
            seed,
            drain_timeout,
        } => {
            let opts = GenerateOptions {
                format: format.into(),
                clean_topics,
                dry_run,
                seed,
                drain_timeout: Duration::from_secs(drain_timeout),
            };
            streamgen::generate(&config, broker_config.as_deref(), opts).await
        }
        Commands::Validate { config } => streamgen::validate(&config),
        Commands::ExampleConfig { output } => streamgen::write_example_config(&output),
    };

    std::process::exit(code);
}
