use clap::{Parser, Subcommand};
use eurofx_core::config::Settings;
use eurofx_core::domain::REFERENCE_CURRENCY;
use eurofx_core::service::ExchangeRateService;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "eurofx", about = "Euro foreign-exchange reference rates")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download and ingest the historical archive if the store is stale.
    Sync,

    /// Print today's rates re-based onto a currency.
    Rates {
        #[arg(long, default_value = REFERENCE_CURRENCY)]
        base: String,

        /// Refetch the daily snapshot instead of using the cached one.
        #[arg(long)]
        refresh: bool,

        /// Scale every rate by this amount (rounded up at 4 decimals).
        #[arg(long)]
        amount: Option<Decimal>,
    },

    /// Print the stored day table for a date (YYYY-MM-DD).
    Day { date: chrono::NaiveDate },

    /// Print the stored history of a currency relative to a base.
    History {
        currency: String,

        #[arg(long, default_value = REFERENCE_CURRENCY)]
        base: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;

    let db_path = match settings.database_path.clone() {
        Some(path) => path,
        None => eurofx_core::storage::default_database_path()?,
    };
    let pool = eurofx_core::storage::connect(&db_path).await?;
    eurofx_core::storage::migrate(&pool).await?;

    let service = ExchangeRateService::new(pool, &settings)?;

    match args.command {
        Command::Sync => {
            let inserted = service.ingest_if_stale().await?;
            tracing::info!(inserted, "sync finished");
        }
        Command::Rates {
            base,
            refresh,
            amount,
        } => {
            let base = base.to_uppercase();
            let rates = service.cross_rates(&base, refresh, amount).await?;
            let date = service.snapshot_date().await?;
            println!("Rates against {base} on {date}");
            for (currency, value) in &rates {
                println!("{currency}  {value}");
            }
        }
        Command::Day { date } => {
            let table = service.rates_on_date(date).await?;
            if table.is_empty() {
                println!("no stored rates for {date}");
            }
            for (currency, value) in &table {
                println!("{currency}  {value}");
            }
        }
        Command::History { currency, base } => {
            let series = service
                .history_series(&currency.to_uppercase(), &base.to_uppercase())
                .await?;
            for (date, value) in &series {
                println!("{date}  {value}");
            }
        }
    }

    Ok(())
}
