// In-memory view a consumer keeps current from two unordered sources: the
// REST snapshot and realtime pushes. There is no sequencing guarantee
// between them, so updates carry an observation instant and the newest one
// wins; a stale arrival is dropped instead of rolling the view back.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::market_data::types::{BookEntry, BookSnapshot, Trade};

pub const DEFAULT_TRADE_RETENTION: usize = 100;

pub struct LiveBook {
    snapshot: BookSnapshot,
    observed_at: DateTime<Utc>,
    trades: VecDeque<Trade>,
    retention: usize,
}

impl LiveBook {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_TRADE_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            snapshot: BookSnapshot::default(),
            observed_at: DateTime::<Utc>::UNIX_EPOCH,
            trades: VecDeque::new(),
            retention,
        }
    }

    /// Last-write-wins merge. Returns whether the update was applied.
    pub fn apply(&mut self, snapshot: BookSnapshot, observed_at: DateTime<Utc>) -> bool {
        if observed_at < self.observed_at {
            return false;
        }
        self.snapshot = snapshot;
        self.observed_at = observed_at;
        true
    }

    /// Record one trade, newest first, bounded by the retention window.
    pub fn record_trade(&mut self, trade: Trade) {
        self.trades.push_front(trade);
        self.trades.truncate(self.retention);
    }

    pub fn bbo(&self) -> (Option<&BookEntry>, Option<&BookEntry>) {
        (self.snapshot.best_bid(), self.snapshot.best_ask())
    }

    pub fn spread(&self) -> f64 {
        self.snapshot.spread
    }

    pub fn last_price(&self) -> f64 {
        // the freshest trade beats the snapshot's lastPrice
        self.trades
            .front()
            .map(|trade| trade.price)
            .unwrap_or(self.snapshot.last_price)
    }

    pub fn snapshot(&self) -> &BookSnapshot {
        &self.snapshot
    }

    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter()
    }
}

impl Default for LiveBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::Side;
    use chrono::TimeZone;

    fn snapshot_with_bid(price: f64) -> BookSnapshot {
        BookSnapshot {
            bids: vec![BookEntry::new(price, 1.0)],
            ..BookSnapshot::default()
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn stale_updates_are_dropped() {
        let mut book = LiveBook::new();
        assert!(book.apply(snapshot_with_bid(10.0), at(200)));
        assert!(!book.apply(snapshot_with_bid(9.0), at(100)));
        assert_eq!(book.bbo().0.unwrap().price, 10.0);

        // same-instant update wins: the later arrival is the later write
        assert!(book.apply(snapshot_with_bid(11.0), at(200)));
        assert_eq!(book.bbo().0.unwrap().price, 11.0);
    }

    #[test]
    fn trade_retention_is_bounded_and_newest_first() {
        let mut book = LiveBook::with_retention(2);
        for n in 1..=3 {
            book.record_trade(Trade {
                id: n.to_string(),
                price: n as f64,
                quantity: 1.0,
                timestamp: at(n),
                side: Side::Buy,
                total: n as f64,
            });
        }
        let ids: Vec<&str> = book.trades().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
        assert_eq!(book.last_price(), 3.0);
    }
}
