use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trackit::alerts::{self, WatchedProduct, Watchlist};
use trackit::config::Config;
use trackit::{loader, preprocess, training_rows, Estimator, RawPrice};

#[derive(Parser, Debug)]
#[command(author, version, about = "Track product prices and score price drops")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on the stored history and report held-out quality
    Train {
        /// Train on this table only
        #[arg(short, long)]
        table: Option<String>,

        /// Write the fitted model here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Score one product's current history
    Predict {
        #[arg(short, long)]
        product: String,

        #[arg(short, long)]
        table: Option<String>,

        /// Use a saved model instead of training at startup
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Record a scraped price and score the product
    Record {
        #[arg(long)]
        name: String,

        #[arg(long)]
        link: String,

        /// Price as scraped, e.g. "₹1,299"
        #[arg(long)]
        price: String,

        /// Observation date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(short, long)]
        table: Option<String>,
    },
    /// Print price-drop notifications for watchlist subscribers as JSON lines
    Notify {
        #[arg(short, long)]
        watchlists: PathBuf,
    },
}

/// Train from every given table. Failure leaves the estimator untrained.
fn startup_estimator(conn: &Connection, config: &Config, tables: &[String]) -> Estimator {
    let estimator = Estimator::new(config.forest.clone()).with_min_rows(config.min_training_rows);

    let mut rows = Vec::new();
    for table in tables {
        let loaded = loader::ensure_table(conn, table).and_then(|_| loader::load_series(conn, table));
        match loaded {
            Ok(series) => rows.extend(training_rows(&preprocess(&series))),
            Err(e) => error!(table = %table, "Failed to load price history: {}", e),
        }
    }

    match estimator.fit(&rows) {
        Ok(_) => info!("price model ready"),
        Err(e) => {
            error!("Failed to train price model: {}", e);
            warn!("running without predictions");
        }
    }
    estimator
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trackit=info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(db) = args.db {
        config.database = db;
    }

    let conn = loader::open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database))?;

    match args.command {
        Command::Train { table, save } => {
            let tables = table.map(|t| vec![t]).unwrap_or_else(|| config.tables.clone());

            let mut rows = Vec::new();
            for table in &tables {
                loader::ensure_table(&conn, table)?;
                let series = loader::load_series(&conn, table)?;
                let cleaned = preprocess(&series);
                println!("{}: {} products, {} usable for training", table, series.len(), cleaned.len());
                rows.extend(training_rows(&cleaned));
            }

            let estimator = Estimator::new(config.forest.clone()).with_min_rows(config.min_training_rows);
            let report = estimator.fit(&rows).context("Error during model training")?;

            println!("Train rows:   {}", report.train_rows);
            println!("Test rows:    {}", report.test_rows);
            match report.r2 {
                Some(r2) => println!("Held-out R²:  {:.4}", r2),
                None => println!("Held-out R²:  n/a"),
            }
            if let Some(mae) = report.formula_mae {
                println!("Formula MAE:  {:.2}", mae);
            }
            println!(
                "Importances:  price_std {:.3}, price_change {:.3}",
                report.feature_importances[0], report.feature_importances[1]
            );

            if let Some(path) = save {
                estimator.save(&path)?;
                println!("Saved model to {}", path.display());
            }
        }

        Command::Predict { product, table, model } => {
            let table = table.unwrap_or_else(|| config.primary_table().to_string());
            let estimator = match model {
                Some(path) => Estimator::load(&path, config.forest.clone())
                    .with_context(|| format!("Failed to load model {}", path.display()))?,
                None => startup_estimator(&conn, &config, &config.tables),
            };

            let series = loader::load_product(&conn, &table, &product)?
                .with_context(|| format!("No product named {:?} in {}", product, table))?;
            let assessment = alerts::assess(&series, &estimator);

            match assessment.reason {
                Some(reason) => println!("{}: {}", series.name, reason),
                None => println!("{}: price drop probability {}", series.name, assessment.prediction),
            }
        }

        Command::Record { name, link, price, date, table } => {
            let table = table.unwrap_or_else(|| config.primary_table().to_string());
            let date = date.unwrap_or_else(|| Local::now().date_naive());

            let estimator = startup_estimator(&conn, &config, &config.tables);

            let (_, prediction) =
                alerts::record_and_assess(&conn, &table, &name, &link, date, &RawPrice::Text(price), &estimator)?;
            println!("{}", prediction.display_value());
        }

        Command::Notify { watchlists } => {
            let text = fs::read_to_string(&watchlists)
                .with_context(|| format!("Failed to read watchlists {}", watchlists.display()))?;
            let lists: Vec<Watchlist> = serde_json::from_str(&text).context("Invalid watchlists file")?;

            let estimator = startup_estimator(&conn, &config, &config.tables);

            let mut drops = Vec::new();
            let mut scores = HashMap::new();
            for table in &config.tables {
                loader::ensure_table(&conn, table)?;
                let series = loader::load_series(&conn, table)?;
                let found = alerts::detect_drops(table, &series);

                for drop in &found {
                    if let Some(s) = series.iter().find(|s| s.product_id == drop.product_id) {
                        let key = WatchedProduct {
                            table: table.clone(),
                            product_id: drop.product_id,
                        };
                        scores.insert(key, alerts::assess(s, &estimator).prediction);
                    }
                }
                drops.extend(found);
            }

            let plan = alerts::plan_notifications(&drops, &lists, &scores, config.notify_min_score);
            info!(drops = drops.len(), notifications = plan.len(), "notification run finished");
            for notification in &plan {
                println!("{}", serde_json::to_string(notification)?);
            }
        }
    }

    Ok(())
}
