use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cdim_pipeline::{Pipeline, PipelineConfig};

#[derive(Debug, Parser)]
#[command(name = "cdim-cli")]
#[command(about = "Country dimension ETL command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the raw and curated tables if they do not exist.
    Schema,
    /// Execute one full extract -> transform -> load -> validate run.
    Run,
    /// Run the post-load quality checks only.
    Check {
        /// Minimum curated row count; defaults to CDIM_MIN_ROWS.
        #[arg(long)]
        min_rows: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cdim_pipeline=info".parse()?)
                .add_directive("cdim_fetch=info".parse()?)
                .add_directive("cdim_store=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();
    let pipeline = Pipeline::connect(config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Schema => {
            pipeline.create_schema().await?;
            println!("schema ready");
        }
        Commands::Run => {
            let summary = pipeline.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Check { min_rows } => {
            let min_rows = min_rows.unwrap_or(pipeline.config().min_rows);
            let report = pipeline.run_quality_checks(min_rows).await?;
            println!(
                "quality checks passed: {} rows (min {})",
                report.rows, report.min_rows
            );
        }
    }

    Ok(())
}
