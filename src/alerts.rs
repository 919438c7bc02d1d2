use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::estimator::Estimator;
use crate::loader;
use crate::model::{FeatureVector, Prediction, ProductPriceSeries, RawPrice};
use crate::stats::features_from_history;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceDrop {
    pub table: String,
    pub product_id: i64,
    pub name: String,
    pub link: String,
    pub previous: f64,
    pub current: f64,
    pub drop_pct: f64,
}

/// Products whose latest valid price is below the one before it.
pub fn detect_drops(table: &str, series: &[ProductPriceSeries]) -> Vec<PriceDrop> {
    series
        .iter()
        .filter_map(|s| {
            let (previous, current) = s.latest_two()?;
            if current >= previous {
                return None;
            }
            Some(PriceDrop {
                table: table.to_string(),
                product_id: s.product_id,
                name: s.name.clone(),
                link: s.link.clone(),
                previous,
                current,
                drop_pct: (previous - current) / previous * 100.0,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub features: Option<FeatureVector>,
    pub prediction: Prediction,
    pub reason: Option<String>,
}

/// Score a product's current history. Never fails: missing history or an
/// untrained model both come back as `Prediction::Unavailable`.
pub fn assess(series: &ProductPriceSeries, estimator: &Estimator) -> Assessment {
    match features_from_history(&series.raw_values()) {
        Ok(features) => {
            let prediction = estimator.predict(&features);
            let reason = match prediction {
                Prediction::Unavailable => Some("model unavailable".to_string()),
                Prediction::Score(_) => None,
            };
            Assessment {
                features: Some(features),
                prediction,
                reason,
            }
        }
        Err(e @ Error::InsufficientHistory { .. }) => {
            debug!(product = %series.name, "{}", e);
            Assessment {
                features: None,
                prediction: Prediction::Unavailable,
                reason: Some("insufficient data".to_string()),
            }
        }
        Err(e) => {
            warn!(product = %series.name, "Error during prediction: {}", e);
            Assessment {
                features: None,
                prediction: Prediction::Unavailable,
                reason: Some(e.to_string()),
            }
        }
    }
}

/// Store a price, then score the product's updated history.
///
/// Only the write can fail. Reading the history back or scoring it falls
/// back to `Prediction::Unavailable`.
pub fn record_and_assess(
    conn: &Connection,
    table: &str,
    name: &str,
    link: &str,
    date: NaiveDate,
    price: &RawPrice,
    estimator: &Estimator,
) -> Result<(i64, Prediction)> {
    let id = loader::record_price(conn, table, name, link, date, price)?;
    info!(product = name, id, %date, "recorded price");

    let prediction = match loader::load_product(conn, table, name) {
        Ok(Some(series)) => assess(&series, estimator).prediction,
        Ok(None) => Prediction::Unavailable,
        Err(e) => {
            error!(product = name, "Error processing prediction: {}", e);
            Prediction::Unavailable
        }
    };
    Ok((id, prediction))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchedProduct {
    pub table: String,
    pub product_id: i64,
}

/// A subscriber and the products they track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    pub subscriber: String,
    pub products: Vec<WatchedProduct>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subscriber: String,
    pub drops: Vec<NotifiedDrop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifiedDrop {
    #[serde(flatten)]
    pub drop: PriceDrop,
    /// Drop-probability score, -1 when no prediction was available.
    pub score: i32,
}

/// One notification per subscriber who watches at least one dropped product.
///
/// Drops with a known score below `min_score` are left out; unscored drops
/// are always included.
pub fn plan_notifications(
    drops: &[PriceDrop],
    watchlists: &[Watchlist],
    scores: &HashMap<WatchedProduct, Prediction>,
    min_score: u8,
) -> Vec<Notification> {
    let mut notifications = Vec::new();

    for list in watchlists {
        let mut matched = Vec::new();

        for drop in drops {
            let key = WatchedProduct {
                table: drop.table.clone(),
                product_id: drop.product_id,
            };
            if !list.products.contains(&key) {
                continue;
            }

            let prediction = scores.get(&key).copied().unwrap_or(Prediction::Unavailable);
            if let Prediction::Score(s) = prediction {
                if s < min_score {
                    continue;
                }
            }

            matched.push(NotifiedDrop {
                drop: drop.clone(),
                score: prediction.display_value(),
            });
        }

        if !matched.is_empty() {
            notifications.push(Notification {
                subscriber: list.subscriber.clone(),
                drops: matched,
            });
        }
    }

    notifications
}
