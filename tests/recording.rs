// tests/recording.rs
//
// Recording a price always stores it, whatever happens to the prediction.
//
use chrono::NaiveDate;
use rusqlite::Connection;
use trackit::alerts;
use trackit::{loader, Estimator, Prediction, RawPrice};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

#[test]
fn first_price_is_stored_without_a_score() {
    let conn = Connection::open_in_memory().unwrap();
    let estimator = Estimator::default();

    let (id, prediction) = alerts::record_and_assess(
        &conn,
        "amazon_data",
        "Blender",
        "https://shop.example/blender",
        day(1),
        &RawPrice::Text("₹2,499".to_string()),
        &estimator,
    )
    .unwrap();

    assert_eq!(prediction, Prediction::Unavailable);
    assert_eq!(prediction.display_value(), -1);

    let stored = loader::load_product(&conn, "amazon_data", "Blender").unwrap().unwrap();
    assert_eq!(stored.product_id, id);
    assert_eq!(stored.latest_two(), None);
    assert_eq!(stored.raw_values(), vec![RawPrice::Text("₹2,499".to_string())]);
}

#[test]
fn untrained_model_still_records_the_second_price() {
    let conn = Connection::open_in_memory().unwrap();
    let estimator = Estimator::default();
    let link = "https://shop.example/iron";

    alerts::record_and_assess(&conn, "amazon_data", "Iron", link, day(1), &1200.0.into(), &estimator).unwrap();
    let (_, prediction) =
        alerts::record_and_assess(&conn, "amazon_data", "Iron", link, day(2), &"₹1,050".into(), &estimator).unwrap();

    assert_eq!(prediction, Prediction::Unavailable);
    let stored = loader::load_product(&conn, "amazon_data", "Iron").unwrap().unwrap();
    assert_eq!(stored.latest_two(), Some((1200.0, 1050.0)));
}

#[test]
fn bad_table_name_is_the_only_failure() {
    let conn = Connection::open_in_memory().unwrap();
    let result = alerts::record_and_assess(
        &conn,
        "amazon data",
        "Iron",
        "i",
        day(1),
        &RawPrice::Missing,
        &Estimator::default(),
    );
    assert!(result.is_err());
}
