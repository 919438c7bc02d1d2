use statrs::statistics::Statistics;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{CleanedRow, FeatureVector, ProductPriceSeries, RawPrice, TrainingRow};

const CURRENCY_PREFIXES: [&str; 3] = ["Rs.", "Rs", "INR"];
const STRIPPED_CHARS: [char; 6] = ['₹', '$', '€', '£', '¥', ','];

/// Parse a raw cell into a positive price. Anything else counts as absent.
pub fn clean_price(raw: &RawPrice) -> Option<f64> {
    let value = match raw {
        RawPrice::Missing => return None,
        RawPrice::Number(v) => *v,
        RawPrice::Text(s) => {
            let mut text = s.trim();
            for prefix in CURRENCY_PREFIXES {
                if let Some(rest) = text.strip_prefix(prefix) {
                    text = rest;
                    break;
                }
            }
            let digits: String = text.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
            digits.trim().parse::<f64>().ok()?
        }
    };

    if value.is_finite() && value > 0.0 {
        Some(value)
    } else {
        None
    }
}

/// Mean and feature pair over cleaned prices. Needs at least two values.
fn price_features(prices: &[f64]) -> Option<(f64, FeatureVector)> {
    if prices.len() < 2 {
        return None;
    }

    let avg_price = prices.iter().mean();
    let price_std = prices.iter().population_std_dev();

    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let price_change = if max > 0.0 { (max - min) / max } else { 0.0 };

    if !price_std.is_finite() || !price_change.is_finite() {
        return None;
    }

    Some((avg_price, FeatureVector { price_std, price_change }))
}

/// Clean every series and derive the per-product feature columns.
///
/// Products with fewer than two valid prices are dropped, as are rows whose
/// statistics come out non-finite.
pub fn preprocess(table: &[ProductPriceSeries]) -> Vec<CleanedRow> {
    let mut rows = Vec::with_capacity(table.len());

    for series in table {
        let cleaned = series.cleaned_values();
        let invalid = series.prices.len() - cleaned.len();
        if invalid > 0 {
            debug!(product = %series.name, invalid, "discarded malformed observations");
        }

        let values: Vec<f64> = cleaned.iter().map(|(_, p)| *p).collect();
        let Some((avg_price, features)) = price_features(&values) else {
            debug!(product = %series.name, valid = values.len(), "not enough price history, skipping");
            continue;
        };

        rows.push(CleanedRow {
            product_id: series.product_id,
            name: series.name.clone(),
            link: series.link.clone(),
            prices: cleaned.into_iter().collect(),
            avg_price,
            price_std: features.price_std,
            price_change: features.price_change,
            price_drop_prob: features.drop_label(),
        });
    }

    rows
}

/// Features for one product's live history.
pub fn features_from_history(raw: &[RawPrice]) -> Result<FeatureVector> {
    let prices: Vec<f64> = raw.iter().filter_map(clean_price).collect();
    price_features(&prices)
        .map(|(_, features)| features)
        .ok_or(Error::InsufficientHistory { valid: prices.len() })
}

pub fn training_rows(rows: &[CleanedRow]) -> Vec<TrainingRow> {
    rows.iter()
        .map(|r| TrainingRow {
            features: r.features(),
            price_drop_prob: r.price_drop_prob,
        })
        .collect()
}
