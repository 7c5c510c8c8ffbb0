// Main entry point for the pairdb CLI
// Converts a pairs/measurements file into SQLite (once), then prints
// statistics and runs example queries against it

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use env_logger::Env;
use pairdb::{convert_with_options, LoaderOptions, PairDatabase, ScoreRange, DEFAULT_BATCH_SIZE};
use std::path::PathBuf;

/// Convert a .npy file of protein pairs to a SQLite database and query it
#[derive(ClapParser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the .npy file (a .json file with the same keys also works)
    #[arg(long = "npy_path")]
    npy_path: PathBuf,

    /// Path to the SQLite database
    #[arg(long = "db_path")]
    db_path: PathBuf,

    /// Where the unfiltered example result is written
    #[arg(long = "csv_path", default_value = "csv_path.csv")]
    csv_path: PathBuf,

    /// Score threshold for the filtered example query
    #[arg(long = "min_score", default_value_t = 50)]
    min_score: i64,

    /// Rows per insert batch during conversion
    #[arg(long = "batch_size", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Also list the proteins matching this SQL LIKE pattern (e.g. 'P%')
    #[arg(long)]
    pattern: Option<String>,

    /// Also run a single read-only SQL query and print its result
    #[arg(short, long)]
    execute: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    run(&args)
}

fn run(args: &Args) -> Result<()> {
    // Existence, not content, decides whether we convert
    if !args.db_path.exists() {
        println!("Converting .npy file to SQLite database...");
        let options = LoaderOptions {
            batch_size: args.batch_size,
        };
        convert_with_options(&args.npy_path, &args.db_path, &options).with_context(|| {
            format!(
                "converting {} into {}",
                args.npy_path.display(),
                args.db_path.display()
            )
        })?;
    } else {
        println!("Database already exists at {}", args.db_path.display());
    }

    let db = PairDatabase::open_read_only(&args.db_path)
        .with_context(|| format!("opening {}", args.db_path.display()))?;

    println!();
    println!("Database Statistics:");
    println!("{}", db.stats()?);

    run_examples(&db, args)?;

    if let Some(pattern) = &args.pattern {
        let proteins = db.search_proteins_by_pattern(pattern)?;
        println!();
        println!("Proteins matching '{}': {}", pattern, proteins.len());
        for protein in &proteins {
            println!("  {}", protein);
        }
    }

    if let Some(sql) = &args.execute {
        let result = db.execute_select(sql)?;
        println!();
        println!("{}", result.format());
    }

    Ok(())
}

/// The two illustrative lookups on the first stored protein
fn run_examples(db: &PairDatabase, args: &Args) -> Result<()> {
    println!();
    println!("{}", "=".repeat(50));
    println!("EXAMPLE USAGE:");
    println!("{}", "=".repeat(50));

    let Some(sample) = db.sample_protein()? else {
        println!();
        println!("The database holds no pairs; skipping example queries");
        return Ok(());
    };

    println!();
    println!("Example 1: Query all pairs for protein '{}':", sample);
    let result = db.query_protein_pairs(&sample, ScoreRange::any())?;
    println!("Found {} pairs involving this protein", result.len());
    println!("{}", result.head(5).format());

    result
        .save_csv(&args.csv_path)
        .with_context(|| format!("writing {}", args.csv_path.display()))?;

    let min_score = args.min_score;
    println!();
    println!(
        "Example 2: Query pairs for '{}' with score >= {}:",
        sample, min_score
    );
    let filtered = db.query_protein_pairs(&sample, ScoreRange::at_least(min_score))?;
    println!("Found {} with score >= {}", filtered.len(), min_score);
    if !filtered.is_empty() {
        println!("{}", filtered.head(5).format());
    }

    Ok(())
}
