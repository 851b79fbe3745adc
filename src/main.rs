// 🏟️ Standings Ingest - command line
//
//   standings-ingest import --town ASH --year 2025 --period Fall < paste.txt
//   standings-ingest replay
//   standings-ingest summary

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

use standings_ingest::{logging, Config, ImportResult, Importer, SeasonKey, SeasonPeriod};

#[derive(Parser)]
#[command(name = "standings-ingest")]
#[command(about = "Ingest pasted youth soccer standings into the season store")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, env = "STANDINGS_CONFIG", default_value = "standings.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one pasted standings block (from --file or stdin)
    Import {
        #[arg(long)]
        town: String,
        #[arg(long)]
        year: i32,
        /// Fall or Spring
        #[arg(long)]
        period: SeasonPeriod,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Re-import audited blocks whose season is missing from the store
    Replay,
    /// List audited seasons that have no rows in the store
    Missing,
    /// Print store totals and per-season team counts
    Summary,
    /// Write the persisted table as CSV
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Delete every row of one season
    Purge {
        #[arg(long)]
        town: String,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        period: SeasonPeriod,
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let importer = Importer::from_config(&config)
        .with_context(|| format!("Failed to open store: {}", config.store.path.display()))?;

    match cli.command {
        Commands::Import { town, year, period, file } => {
            let town_info = config
                .town(&town)
                .with_context(|| format!("Unknown town code: {}", town))?;
            println!("📥 Importing {} ({}) {} {}", town.trim().to_ascii_uppercase(), town_info.name, period, year);

            let raw_text = read_input(file)?;
            let result = importer.import(&raw_text, &town, year, period)?;
            print_result(&result);
        }
        Commands::Replay => {
            let results = importer.replay_missing()?;
            if results.is_empty() {
                println!("✓ Nothing to replay");
            }
            for result in &results {
                print_result(result);
            }
        }
        Commands::Missing => {
            let missing = importer.audit_log().missing_seasons(importer.store())?;
            println!("📋 {} season(s) audited but not in the store", missing.len());
            for entry in &missing {
                println!("   {}  (pasted {})", entry.season, entry.timestamp.to_rfc3339());
            }
        }
        Commands::Summary => {
            let store = importer.store();
            let summary = store.summary();
            println!("📊 Store summary");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("   Records:      {}", summary.total_records);
            println!("   Towns:        {}", summary.towns);
            println!("   Seasons:      {}", summary.seasons);
            println!("   Grade groups: {}", summary.grade_groups);
            println!("   Divisions:    {}", summary.divisions);
            println!();
            for count in store.season_counts() {
                println!("   {:<20} {:>4} teams", count.season.to_string(), count.teams);
            }
        }
        Commands::Export { out } => {
            let rows = importer.store().export_csv(&out)?;
            println!("✓ Exported {} rows to {}", rows, out.display());
        }
        Commands::Purge { town, year, period, yes } => {
            if !yes {
                bail!("purge deletes stored rows; re-run with --yes to confirm");
            }
            let season = SeasonKey {
                town_code: town.trim().to_ascii_uppercase(),
                season_year: year,
                season_period: period,
            };
            let removed = importer.store().purge_season(&season, "cli")?;
            info!(season = %season, removed, "season purged");
            println!("✓ Removed {} rows for {}", removed, season);
        }
    }

    Ok(())
}

fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read standings from stdin")?;
            Ok(text)
        }
    }
}

fn print_result(result: &ImportResult) {
    println!("\n📥 {} (batch {})", result.season, result.batch_id);
    println!("   Lines:      {}", result.total_lines);
    println!("   Accepted:   {}", result.accepted_count);
    println!("   Duplicates: {}", result.skipped_duplicate_count);
    println!("   Rejected:   {}", result.rejected_lines.len());
    for rejected in &result.rejected_lines {
        println!("     line {}: {}", rejected.line_number, rejected.reason);
    }
    for warning in &result.warnings {
        println!("   ⚠️  line {}: {}", warning.line_number, warning.warning);
    }
}
