use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::stats::clean_price;

/// Raw cell value as scraped or stored. May be noise ("Out of stock").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawPrice {
    Missing,
    Number(f64),
    Text(String),
}

impl From<&str> for RawPrice {
    fn from(s: &str) -> Self {
        RawPrice::Text(s.to_string())
    }
}

impl From<f64> for RawPrice {
    fn from(v: f64) -> Self {
        RawPrice::Number(v)
    }
}

impl From<i64> for RawPrice {
    fn from(v: i64) -> Self {
        RawPrice::Number(v as f64)
    }
}

impl<T: Into<RawPrice>> From<Option<T>> for RawPrice {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(RawPrice::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub product_id: i64,
    pub date: NaiveDate,
    pub price: RawPrice,
}

/// Dated price history of one product. Dates are unique and kept in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPriceSeries {
    pub product_id: i64,
    pub name: String,
    pub link: String,
    pub prices: BTreeMap<NaiveDate, RawPrice>,
}

impl ProductPriceSeries {
    pub fn new(product_id: i64, name: impl Into<String>, link: impl Into<String>) -> Self {
        ProductPriceSeries {
            product_id,
            name: name.into(),
            link: link.into(),
            prices: BTreeMap::new(),
        }
    }

    /// Set the observation for `date`, replacing any earlier value for that day.
    pub fn observe(&mut self, date: NaiveDate, price: impl Into<RawPrice>) {
        self.prices.insert(date, price.into());
    }

    pub fn observations(&self) -> impl Iterator<Item = PriceObservation> + '_ {
        self.prices.iter().map(|(date, price)| PriceObservation {
            product_id: self.product_id,
            date: *date,
            price: price.clone(),
        })
    }

    /// Raw values in date order.
    pub fn raw_values(&self) -> Vec<RawPrice> {
        self.prices.values().cloned().collect()
    }

    /// Valid prices in date order, malformed entries dropped.
    pub fn cleaned_values(&self) -> Vec<(NaiveDate, f64)> {
        self.prices
            .iter()
            .filter_map(|(date, raw)| clean_price(raw).map(|p| (*date, p)))
            .collect()
    }

    /// Previous and latest valid prices, if there are at least two.
    pub fn latest_two(&self) -> Option<(f64, f64)> {
        let cleaned = self.cleaned_values();
        match cleaned.as_slice() {
            [.., (_, prev), (_, last)] => Some((*prev, *last)),
            _ => None,
        }
    }
}

pub const FEATURE_COUNT: usize = 2;

/// Column order the estimator is trained and queried with.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = ["price_std", "price_change"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub price_std: f64,
    pub price_change: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [self.price_std, self.price_change]
    }

    /// Heuristic drop-probability label: percent change when it exceeds 5%.
    pub fn drop_label(&self) -> f64 {
        if self.price_change > 0.05 {
            self.price_change * 100.0
        } else {
            0.0
        }
    }
}

/// One row of the preprocessed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedRow {
    pub product_id: i64,
    pub name: String,
    pub link: String,
    pub prices: BTreeMap<NaiveDate, f64>,

    pub avg_price: f64,
    pub price_std: f64,
    pub price_change: f64,
    pub price_drop_prob: f64,
}

impl CleanedRow {
    pub fn features(&self) -> FeatureVector {
        FeatureVector {
            price_std: self.price_std,
            price_change: self.price_change,
        }
    }

    /// Back to a series of already-clean numeric prices.
    pub fn to_series(&self) -> ProductPriceSeries {
        ProductPriceSeries {
            product_id: self.product_id,
            name: self.name.clone(),
            link: self.link.clone(),
            prices: self
                .prices
                .iter()
                .map(|(d, p)| (*d, RawPrice::Number(*p)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub features: FeatureVector,
    pub price_drop_prob: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    Score(u8),
    Unavailable,
}

impl Prediction {
    pub fn score(&self) -> Option<u8> {
        match self {
            Prediction::Score(s) => Some(*s),
            Prediction::Unavailable => None,
        }
    }

    /// Score, or -1 when no prediction could be made.
    pub fn display_value(&self) -> i32 {
        self.score().map(i32::from).unwrap_or(-1)
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Score(s) => write!(f, "{}%", s),
            Prediction::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    #[test]
    fn observe_replaces_same_day() {
        let mut s = ProductPriceSeries::new(1, "Kettle", "https://example.com/kettle");
        s.observe(day(8), "₹1,000");
        s.observe(day(8), 950.0);
        assert_eq!(s.prices.len(), 1);
        assert_eq!(s.raw_values(), vec![RawPrice::Number(950.0)]);
    }

    #[test]
    fn observations_come_out_in_date_order() {
        let mut s = ProductPriceSeries::new(7, "Lamp", "l");
        s.observe(day(10), 30.0);
        s.observe(day(8), RawPrice::Missing);
        let dates: Vec<NaiveDate> = s.observations().map(|o| o.date).collect();
        assert_eq!(dates, vec![day(8), day(10)]);
        assert!(s.observations().all(|o| o.product_id == 7));
    }

    #[test]
    fn latest_two_skips_invalid() {
        let mut s = ProductPriceSeries::new(1, "Kettle", "k");
        s.observe(day(8), 1000.0);
        s.observe(day(9), 900.0);
        s.observe(day(10), "N/A");
        assert_eq!(s.latest_two(), Some((1000.0, 900.0)));

        let mut single = ProductPriceSeries::new(2, "Mug", "m");
        single.observe(day(8), 10.0);
        assert_eq!(single.latest_two(), None);
    }

    #[test]
    fn drop_label_threshold() {
        let flat = FeatureVector { price_std: 1.0, price_change: 0.05 };
        assert_eq!(flat.drop_label(), 0.0);

        let moved = FeatureVector { price_std: 1.0, price_change: 0.3 };
        assert!((moved.drop_label() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn prediction_sentinel() {
        assert_eq!(Prediction::Unavailable.display_value(), -1);
        assert_eq!(Prediction::Score(42).display_value(), 42);
        assert_eq!(Prediction::Unavailable.to_string(), "unavailable");
    }
}
