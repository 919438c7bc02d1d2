use chrono::NaiveDate;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{ProductPriceSeries, RawPrice};

const DATE_FORMAT: &str = "%Y-%m-%d";

impl ToSql for RawPrice {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            RawPrice::Missing => ToSqlOutput::Owned(Value::Null),
            RawPrice::Number(v) => ToSqlOutput::Owned(Value::Real(*v)),
            RawPrice::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn raw_price(value: ValueRef<'_>) -> RawPrice {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => RawPrice::Missing,
        ValueRef::Integer(i) => RawPrice::Number(i as f64),
        ValueRef::Real(f) => RawPrice::Number(f),
        ValueRef::Text(bytes) => RawPrice::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Table names get spliced into SQL, so only plain identifiers are allowed.
fn checked(table: &str) -> Result<&str> {
    let valid = !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(table)
    } else {
        Err(Error::InvalidTable(table.to_string()))
    }
}

pub fn open(db_path: &str) -> Result<Connection> {
    Ok(Connection::open(db_path)?)
}

pub fn ensure_table(conn: &Connection, table: &str) -> Result<()> {
    let table = checked(table)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
             srno INTEGER PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL,
             link TEXT NOT NULL UNIQUE
         )"
    ))?;
    Ok(())
}

/// Date columns with their names as they appear in the table, oldest first.
///
/// A name like `2024-1-5` still counts. When two columns name the same day,
/// the zero-padded one wins.
fn dated_columns(conn: &Connection, table: &str) -> Result<Vec<(NaiveDate, String)>> {
    let table = checked(table)?;
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;

    let mut columns = Vec::new();
    for name in names {
        let name = name?;
        if let Ok(date) = NaiveDate::parse_from_str(&name, DATE_FORMAT) {
            columns.push((date, name));
        }
    }
    columns.sort_by_key(|(date, name)| (*date, date.format(DATE_FORMAT).to_string() != *name));
    columns.dedup_by(|later, kept| {
        let duplicate = later.0 == kept.0;
        if duplicate {
            warn!(table, kept = %kept.1, skipped = %later.1, "two columns for the same day");
        }
        duplicate
    });
    Ok(columns)
}

/// Observation dates present as columns, oldest first.
pub fn date_columns(conn: &Connection, table: &str) -> Result<Vec<NaiveDate>> {
    Ok(dated_columns(conn, table)?.into_iter().map(|(date, _)| date).collect())
}

fn select_sql(table: &str, columns: &[(NaiveDate, String)], filter: &str) -> String {
    let mut sql = String::from("SELECT srno, name, link");
    for (_, name) in columns {
        sql.push_str(&format!(", \"{}\"", name));
    }
    sql.push_str(&format!(" FROM \"{table}\" {filter}"));
    sql
}

fn series_from_row(row: &Row<'_>, columns: &[(NaiveDate, String)]) -> rusqlite::Result<ProductPriceSeries> {
    let mut series = ProductPriceSeries::new(row.get(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?);
    for (k, (date, _)) in columns.iter().enumerate() {
        series.observe(*date, raw_price(row.get_ref(3 + k)?));
    }
    Ok(series)
}

/// Every product with its full dated history.
pub fn load_series(conn: &Connection, table: &str) -> Result<Vec<ProductPriceSeries>> {
    let columns = dated_columns(conn, table)?;
    let mut stmt = conn.prepare(&select_sql(checked(table)?, &columns, "ORDER BY srno"))?;

    let rows = stmt.query_map([], |row| series_from_row(row, &columns))?;
    let series = rows.collect::<rusqlite::Result<Vec<_>>>()?;

    info!(table, products = series.len(), days = columns.len(), "loaded price history");
    Ok(series)
}

pub fn load_product(conn: &Connection, table: &str, name: &str) -> Result<Option<ProductPriceSeries>> {
    let columns = dated_columns(conn, table)?;
    let sql = select_sql(checked(table)?, &columns, "WHERE name = ?1");

    let series = conn
        .query_row(&sql, [name], |row| series_from_row(row, &columns))
        .optional()?;
    Ok(series)
}

/// Store today's (or any day's) price for a product, creating the date column
/// and the product row as needed. Returns the product id.
pub fn record_price(
    conn: &Connection,
    table: &str,
    name: &str,
    link: &str,
    date: NaiveDate,
    price: &RawPrice,
) -> Result<i64> {
    ensure_table(conn, table)?;
    let table = checked(table)?;
    let existing = dated_columns(conn, table)?.into_iter().find(|(d, _)| *d == date);
    let column = match existing {
        Some((_, name)) => name,
        None => {
            let column = date.format(DATE_FORMAT).to_string();
            conn.execute_batch(&format!("ALTER TABLE \"{table}\" ADD COLUMN \"{column}\""))?;
            debug!(table, column = %column, "added date column");
            column
        }
    };

    let updated = conn.execute(
        &format!("UPDATE \"{table}\" SET \"{column}\" = ?1 WHERE name = ?2"),
        params![price, name],
    )?;

    if updated > 0 {
        let id = conn.query_row(
            &format!("SELECT srno FROM \"{table}\" WHERE name = ?1"),
            [name],
            |row| row.get(0),
        )?;
        return Ok(id);
    }

    conn.execute(
        &format!("INSERT INTO \"{table}\" (name, link, \"{column}\") VALUES (?1, ?2, ?3)"),
        params![name, link, price],
    )?;
    info!(table, product = name, "tracking new product");
    Ok(conn.last_insert_rowid())
}
