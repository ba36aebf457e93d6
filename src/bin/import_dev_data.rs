//! Load or purge the development fixtures.
//!
//! ```text
//! import-dev-data --import [--dir dev-data/data]
//! import-dev-data --delete
//! ```

use anyhow::Result;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use natours::config::Config;
use natours::db::{self, seeders};

#[derive(Parser, Debug)]
#[command(name = "import-dev-data")]
#[command(author, version, about = "Import or delete development data", long_about = None)]
#[command(group(ArgGroup::new("action").required(true).args(["import", "delete"])))]
struct Cli {
    /// Load tours, users and reviews from the fixture directory
    #[arg(long)]
    import: bool,

    /// Remove every review, booking, tour and user
    #[arg(long)]
    delete: bool,

    /// Path to configuration file
    #[arg(short, long, default_value = "natours.toml")]
    config: PathBuf,

    /// Directory holding tours.json, users.json and reviews.json
    #[arg(long, default_value = "dev-data/data")]
    dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::init(&config.database).await?;

    let outcome = if cli.import {
        seeders::import_dev_data(&pool, &cli.dir, config.ratings.baseline)
            .await
            .map(|summary| {
                println!(
                    "Data successfully loaded: {} tours, {} users, {} reviews",
                    summary.tours, summary.users, summary.reviews
                )
            })
    } else {
        seeders::delete_dev_data(&pool)
            .await
            .map(|removed| println!("Data successfully deleted ({} rows)", removed))
    };

    db::close(pool).await;
    outcome
}
