use anyhow::Result;
use clap::Parser;
use console::style;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubescribe::cli::discovery;
use tubescribe::utils::{self, format_duration};
use tubescribe::{BatchOrchestrator, Cli, Config, RowStateStore, RunStatistics};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "tubescribe=debug" } else { "tubescribe=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", style("[ERROR]").red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    if cli.show_config {
        config.display();
        return Ok(());
    }

    let table = discovery::resolve_table(
        cli.table.as_deref(),
        Path::new("."),
        &config.app.table_extension,
        discovery::prompt_selection,
    )?;

    config.validate()?;

    // Check for required external dependencies (non-fatal)
    let missing_deps = utils::check_dependencies().await;
    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - the fallback download strategy will fail)");
    }

    println!("{}", "=".repeat(60));
    println!("{}", style("Tubescribe - batch YouTube transcription").bold());
    println!("{}", "=".repeat(60));
    println!("Table: {}\n", table.display());

    let orchestrator = BatchOrchestrator::from_config(&config)?.show_progress(!cli.quiet);
    orchestrator.prepare_directories()?;

    let mut store = RowStateStore::open(&table)?;
    println!("Rows found: {}", store.len());

    let stats = orchestrator.run(&mut store).await?;
    print_summary(&stats, orchestrator.output_dir());

    Ok(())
}

fn print_summary(stats: &RunStatistics, output_dir: &Path) {
    println!("\n{}", "=".repeat(60));
    println!("{}", style("PROCESSING COMPLETE").bold());
    println!("{}", "=".repeat(60));
    println!("Successful: {}", style(stats.successful).green());
    println!("Failed:     {}", style(stats.failed).red());
    println!("Skipped:    {}", style(stats.skipped).yellow());
    println!("Elapsed:    {}", format_duration(stats.elapsed_secs()));
    println!("Transcripts saved to: {}/", output_dir.display());
    println!("{}", "=".repeat(60));
}
