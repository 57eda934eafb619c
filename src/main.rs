use anyhow::Result;
use bikeshare_nlq::{AppConfig, QueryPipeline};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "Ask questions about bike-share trips in plain English")]
struct Args {
    /// PostgreSQL connection URL (or set DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Disable the LLM and answer with the rule engine only
    #[arg(long, global = true)]
    no_llm: bool,

    /// Maximum rows returned before the result is truncated
    #[arg(long, global = true)]
    max_rows: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question and print the JSON envelope
    Ask {
        question: String,
    },
    /// Print the introspected schema
    Schema,
    /// Check database connectivity
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if args.no_llm {
        config.llm = None;
    }
    if let Some(max_rows) = args.max_rows {
        config.settings.max_result_rows = max_rows;
    }

    info!("bikeshare-nlq starting...");
    let pipeline = QueryPipeline::from_config(&config).await?;

    match args.command {
        Command::Ask { question } => {
            let envelope = pipeline.answer(&question).await;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            if !envelope.is_success() {
                std::process::exit(1);
            }
        }
        Command::Schema => {
            let dump = pipeline.schema_dump().await?;
            println!("{}", dump.schema);
            println!("\nCOLUMNS:");
            for column in &dump.columns {
                println!("  {}", column);
            }
        }
        Command::Health => {
            let health = pipeline.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    Ok(())
}
