use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use std::process::ExitCode;

use gemvault::{config::Settings, service::ServiceContext};

/// Recomputes every affiliate balance from the commission and payout ledgers
/// and reports any drift.
#[derive(Parser, Debug)]
#[command(name = "reconcile", version)]
struct Args {
    /// SQLite database URL; defaults to the configured one.
    #[arg(long)]
    database_url: Option<String>,

    /// Print the number of affiliates checked even when clean.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let settings = Settings::new().unwrap_or_else(|e| {
        eprintln!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });
    let database_url = args.database_url.unwrap_or_else(|| settings.database.url.clone());

    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let context = ServiceContext::new(db_pool, &settings)?;
    let report = context.reconciliation_service.check().await?;

    if args.verbose || !report.is_clean() {
        println!("Checked {} affiliate balances", report.affiliates_checked);
    }

    if report.is_clean() {
        println!("All affiliate balances reconcile");
        return Ok(ExitCode::SUCCESS);
    }

    for mismatch in &report.mismatches {
        println!(
            "{}: recorded {} {} cents, ledger says {} (off by {})",
            mismatch.affiliate_id,
            mismatch.recorded_cents,
            mismatch.currency,
            mismatch.expected_cents,
            mismatch.difference_cents(),
        );
    }
    println!("{} mismatched balance(s)", report.mismatches.len());

    Ok(ExitCode::FAILURE)
}
