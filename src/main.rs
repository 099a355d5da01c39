use ans_ledger::config::Config;
use ans_ledger::infra::ReqwestHttp;
use ans_ledger::logging;
use ans_ledger::pipeline::{PipelineOrchestrator, PipelineReport};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ans_ledger")]
#[command(about = "Consolidates ANS quarterly accounting disclosures into expense aggregates")]
#[command(version)]
struct Cli {
    /// Path to the TOML config (defaults to $ANS_CONFIG, then ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the latest year and list its archives
    Crawl,
    /// Download and unpack the latest year's archives into staging
    Fetch,
    /// Build the consolidated ledger from files already in staging
    Consolidate,
    /// Join the consolidated ledger against the operator registry
    Join,
    /// Compute per-operator aggregates from the joined ledger
    Aggregate,
    /// Run every stage in order
    Run,
}

async fn execute(
    command: &Commands,
    orchestrator: &PipelineOrchestrator,
    report: &mut PipelineReport,
) -> ans_ledger::Result<()> {
    match command {
        Commands::Crawl => {
            let crawl = orchestrator.crawl(report).await?;
            println!("📅 Latest year: {} ({})", crawl.year, crawl.year_url);
            for archive in &crawl.archives {
                println!("   {}", archive.url);
            }
        }
        Commands::Fetch => {
            let crawl = orchestrator.crawl(report).await?;
            let files = orchestrator.fetch(&crawl, report).await?;
            println!("📦 Extracted {} files", files.len());
        }
        Commands::Consolidate => {
            let ledger = orchestrator.consolidate_staged(report)?;
            println!("🧮 Ledger rows: {}", ledger.len());
        }
        Commands::Join => {
            let joined = orchestrator.join_saved(report).await?;
            println!("🔗 Joined rows: {}", joined.len());
            if let Some(rate) = report.match_rate {
                println!("   Match rate: {:.1}%", rate * 100.0);
            }
            if let Some(warning) = &report.join_warning {
                println!("⚠️  {}", warning.message());
            }
        }
        Commands::Aggregate => {
            let aggregates = orchestrator.aggregate_saved(report)?;
            println!("📊 Operator groups: {}", aggregates.len());
        }
        Commands::Run => {
            let aggregates = orchestrator.run(report).await?;
            println!("📊 Operator groups: {}", aggregates.len());
            if let Some(warning) = &report.join_warning {
                println!("⚠️  {}", warning.message());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    logging::init_logging(&config.paths.log_dir);
    info!("Configuration loaded");

    let http = Arc::new(ReqwestHttp::new(&config.http)?);
    let orchestrator = PipelineOrchestrator::new(config, http);

    let mut report = PipelineReport::new();
    let result = execute(&cli.command, &orchestrator, &mut report).await;
    report.finish(&result);

    for stage in &report.stages {
        println!("   {}", stage);
    }
    match orchestrator.write_report(&report) {
        Ok(path) => info!("Run report written to {}", path.display()),
        Err(e) => error!("Could not write run report: {}", e),
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(e) = result {
        error!("Pipeline failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
