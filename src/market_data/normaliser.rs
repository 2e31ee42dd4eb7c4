// Convert raw backend records into the canonical shapes.
// The backend is not consistent about field names or value types: sizes
// arrive as `amount` or `quantity`, numbers as JSON numbers or strings,
// and trade timestamps as epoch millis or SQL-style "date time" strings.
// Everything here is total: bad input degrades to zero/epoch, never panics.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::market_data::types::{BookEntry, BookSnapshot, Side, Trade};

/// Tolerant numeric read: JSON number, numeric string, anything else 0.0.
pub fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

fn field_f64(record: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|key| record.get(key))
        .map(as_f64)
        .unwrap_or(0.0)
}

/// One bid/ask level. Size may be keyed `quantity` or `amount`.
pub fn level(record: &Value) -> BookEntry {
    let price = field_f64(record, &["price"]);
    let quantity = field_f64(record, &["quantity", "amount"]);
    BookEntry::new(price, quantity)
}

/// Whole order book payload: normalise both sides, sort bids descending and
/// asks ascending so index 0 is the best offer, then derive the spread.
pub fn book(payload: &Value) -> BookSnapshot {
    let mut bids = side(payload.get("bids"));
    let mut asks = side(payload.get("asks"));
    bids.sort_by(|a, b| b.price.total_cmp(&a.price));
    asks.sort_by(|a, b| a.price.total_cmp(&b.price));

    let spread = match (bids.first(), asks.first()) {
        (Some(bid), Some(ask)) => ask.price - bid.price,
        _ => 0.0,
    };
    let last_price = field_f64(payload, &["lastPrice", "last_price"]);

    BookSnapshot {
        bids,
        asks,
        spread,
        last_price,
    }
}

fn side(levels: Option<&Value>) -> Vec<BookEntry> {
    levels
        .and_then(Value::as_array)
        .map(|entries| entries.iter().map(level).collect())
        .unwrap_or_default()
}

/// One trade record.
pub fn trade(record: &Value) -> Trade {
    let price = field_f64(record, &["price"]);
    let quantity = field_f64(record, &["quantity", "amount"]);
    Trade {
        id: trade_id(record),
        price,
        quantity,
        timestamp: timestamp(record.get("timestamp").unwrap_or(&Value::Null)),
        side: trade_side(record),
        total: price * quantity,
    }
}

fn trade_id(record: &Value) -> String {
    match record.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

// Explicit side wins; otherwise a `buy_order_id` marks the taker as the
// buyer. The fallback is a heuristic, not an authoritative classification.
fn trade_side(record: &Value) -> Side {
    match record.get("side").and_then(Value::as_str) {
        Some(s) if s.eq_ignore_ascii_case("buy") => Side::Buy,
        Some(s) if s.eq_ignore_ascii_case("sell") => Side::Sell,
        _ => {
            if record.get("buy_order_id").is_some_and(|v| !v.is_null()) {
                Side::Buy
            } else {
                Side::Sell
            }
        }
    }
}

/// Timestamp tolerance: SQL-style "YYYY-MM-DD HH:MM:SS" strings are not
/// valid ISO-8601 without the `T` separator, so a string containing a space
/// is split and re-joined before parsing. Numbers are epoch milliseconds.
pub fn timestamp(value: &Value) -> DateTime<Utc> {
    match value {
        Value::String(s) => parse_instant(s.trim()).unwrap_or_else(epoch),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(epoch),
        _ => epoch(),
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    let joined;
    let candidate = match s.split_once(' ') {
        Some((date, time)) => {
            joined = format!("{date}T{time}");
            joined.as_str()
        }
        None => s,
    };

    if let Ok(fixed) = DateTime::parse_from_rfc3339(candidate) {
        return Some(fixed.with_timezone(&Utc));
    }
    candidate
        .parse::<NaiveDateTime>()
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn level_accepts_amount_or_quantity() {
        let with_amount = level(&json!({"price": 10, "amount": 5}));
        let with_quantity = level(&json!({"price": 10, "quantity": 5}));
        assert_eq!(with_amount, with_quantity);
        assert_eq!(with_amount.total, 50.0);
    }

    #[test]
    fn level_coerces_string_numbers() {
        let entry = level(&json!({"price": "10.50", "amount": "3"}));
        assert_eq!(entry.price, 10.5);
        assert_eq!(entry.quantity, 3.0);
        assert_eq!(entry.total, 31.5);
    }

    #[test]
    fn level_degrades_to_zero_on_garbage() {
        for record in [
            json!({}),
            json!(null),
            json!({"price": null, "quantity": null}),
            json!({"price": {"nested": true}, "amount": [1, 2]}),
            json!({"price": "not a number", "quantity": "also not"}),
            json!(["not", "an", "object"]),
        ] {
            let entry = level(&record);
            assert_eq!(entry.price, 0.0);
            assert_eq!(entry.quantity, 0.0);
            assert_eq!(entry.total, 0.0);
        }
    }

    #[test]
    fn book_sorts_sides_and_derives_spread() {
        let snapshot = book(&json!({
            "bids": [
                {"price": 9.0, "quantity": 1},
                {"price": "10.50", "amount": 3},
            ],
            "asks": [
                {"price": 13.0, "quantity": 1},
                {"price": 12, "quantity": 2},
            ],
            "lastPrice": "11.0",
        }));

        assert_eq!(snapshot.bids[0], BookEntry::new(10.5, 3.0));
        assert_eq!(snapshot.asks[0], BookEntry::new(12.0, 2.0));
        assert_eq!(snapshot.bids[0].total, 31.5);
        assert_eq!(snapshot.asks[0].total, 24.0);
        assert_eq!(snapshot.spread, 1.5);
        assert_eq!(snapshot.last_price, 11.0);
    }

    #[test]
    fn spread_is_zero_when_either_side_is_empty() {
        let no_asks = book(&json!({"bids": [{"price": 10, "quantity": 1}]}));
        assert_eq!(no_asks.spread, 0.0);

        let no_bids = book(&json!({"asks": [{"price": 12, "quantity": 1}]}));
        assert_eq!(no_bids.spread, 0.0);

        let empty = book(&json!({}));
        assert_eq!(empty.spread, 0.0);
        assert!(empty.bids.is_empty() && empty.asks.is_empty());
    }

    #[test]
    fn trade_side_explicit_field_wins() {
        let t = trade(&json!({"price": 5, "amount": 2, "side": "sell", "buy_order_id": "x"}));
        assert_eq!(t.side, Side::Sell);
    }

    #[test]
    fn trade_side_falls_back_to_buy_order_id() {
        let buy = trade(&json!({"price": 5, "amount": 2, "buy_order_id": "x"}));
        assert_eq!(buy.side, Side::Buy);
        assert_eq!(buy.total, 10.0);

        let sell = trade(&json!({"price": 5, "amount": 2}));
        assert_eq!(sell.side, Side::Sell);
    }

    #[test]
    fn trade_id_accepts_string_or_number() {
        assert_eq!(trade(&json!({"id": "t-1"})).id, "t-1");
        assert_eq!(trade(&json!({"id": 42})).id, "42");
        assert_eq!(trade(&json!({})).id, "");
    }

    #[test]
    fn sql_datetime_parses_to_same_instant_as_iso() {
        let sql = timestamp(&json!("2024-05-01 13:45:00"));
        let iso = timestamp(&json!("2024-05-01T13:45:00"));
        assert_eq!(sql, iso);
        assert_eq!(sql.to_rfc3339(), "2024-05-01T13:45:00+00:00");
    }

    #[test]
    fn epoch_millis_and_garbage_timestamps() {
        let ms = timestamp(&json!(1_714_571_100_000u64));
        assert_eq!(ms.to_rfc3339(), "2024-05-01T13:45:00+00:00");

        assert_eq!(timestamp(&json!(null)), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(timestamp(&json!("yesterday-ish")), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(timestamp(&json!([1, 2])), DateTime::<Utc>::UNIX_EPOCH);
    }

    // Arbitrary JSON for the totality properties.
    fn arb_json() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            any::<f64>().prop_map(serde_json::Value::from),
            "[a-z0-9 .:-]{0,16}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
                prop::collection::btree_map("[a-z_]{1,12}", inner, 0..6)
                    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn level_is_total_and_recomputes_total(record in arb_json()) {
            let entry = level(&record);
            prop_assert_eq!(entry.total, entry.price * entry.quantity);
        }

        #[test]
        fn trade_is_total_and_recomputes_total(record in arb_json()) {
            let t = trade(&record);
            prop_assert_eq!(t.total, t.price * t.quantity);
        }

        #[test]
        fn book_is_total_and_sides_stay_sorted(payload in arb_json()) {
            let snapshot = book(&payload);
            prop_assert!(snapshot.bids.windows(2).all(|w| w[0].price >= w[1].price));
            prop_assert!(snapshot.asks.windows(2).all(|w| w[0].price <= w[1].price));
        }
    }
}
