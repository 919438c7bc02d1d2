// tests/notifications.rs
//
// Drop detection over a stored table, matched against subscriber watchlists.
//
use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::Connection;
use trackit::alerts::{self, WatchedProduct, Watchlist};
use trackit::{loader, Estimator, Prediction};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
}

#[test]
fn subscribers_hear_about_their_drops() {
    let conn = Connection::open_in_memory().unwrap();
    let prices = [
        ("Phone", ["₹20,000", "₹18,500"]),
        ("Laptop", ["₹55,000", "₹56,000"]),
        ("Watch", ["₹3,000", "Out of stock"]),
    ];
    for (name, history) in prices {
        for (i, p) in history.iter().enumerate() {
            let link = format!("https://shop.example/{}", name.to_lowercase());
            loader::record_price(&conn, "flipkart_data", name, &link, day(1 + i as u32), &(*p).into()).unwrap();
        }
    }

    let series = loader::load_series(&conn, "flipkart_data").unwrap();
    let drops = alerts::detect_drops("flipkart_data", &series);
    assert_eq!(drops.len(), 1);
    assert_eq!(drops[0].name, "Phone");
    assert!((drops[0].drop_pct - 7.5).abs() < 1e-9);

    let phone = WatchedProduct {
        table: "flipkart_data".into(),
        product_id: drops[0].product_id,
    };
    let watchlists: Vec<Watchlist> = serde_json::from_str(&format!(
        r#"[
            {{ "subscriber": "asha@example.com", "products": [{{ "table": "flipkart_data", "product_id": {} }}] }},
            {{ "subscriber": "ravi@example.com", "products": [] }}
        ]"#,
        phone.product_id
    ))
    .unwrap();

    // no model: the drop still goes out, unscored
    let estimator = Estimator::default();
    let phone_series = series.iter().find(|s| s.name == "Phone").unwrap();
    let mut scores = HashMap::new();
    scores.insert(phone.clone(), alerts::assess(phone_series, &estimator).prediction);

    let plan = alerts::plan_notifications(&drops, &watchlists, &scores, 50);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].subscriber, "asha@example.com");
    assert_eq!(plan[0].drops[0].score, Prediction::Unavailable.display_value());

    let line = serde_json::to_string(&plan[0]).unwrap();
    assert!(line.contains("\"name\":\"Phone\""));
}
