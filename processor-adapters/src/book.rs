//! Shared matching helpers for record-backed adapters

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Records a processor has settled, newest last
pub struct RecordBook<R> {
    records: RwLock<Vec<R>>,
}

impl<R: Clone> RecordBook<R> {
    /// Create new empty book
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Append a record
    pub fn push(&self, record: R) {
        self.records.write().push(record);
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the book is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest-scoring record, earliest wins ties
    pub fn best<F>(&self, score: F) -> Option<(R, u8)>
    where
        F: Fn(&R) -> Option<u8>,
    {
        let records = self.records.read();
        let mut best: Option<(&R, u8)> = None;
        for record in records.iter() {
            if let Some(confidence) = score(record) {
                if best.map_or(true, |(_, b)| confidence > b) {
                    best = Some((record, confidence));
                }
            }
        }
        best.map(|(r, c)| (r.clone(), c))
    }
}

impl<R: Clone> Default for RecordBook<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// `a` and `b` at most `window` apart
pub fn within(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    (a - b).abs() <= window
}

/// Claimed amount absent or equal to the record's
pub fn amount_agrees(claimed: Option<Decimal>, recorded: Decimal) -> bool {
    claimed.map_or(true, |amount| amount == recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_best_prefers_higher_then_earlier() {
        let book = RecordBook::new();
        book.push(("a", 70u8));
        book.push(("b", 90u8));
        book.push(("c", 90u8));

        let (record, confidence) = book.best(|(_, c)| Some(*c)).unwrap();
        assert_eq!(record.0, "b");
        assert_eq!(confidence, 90);
        assert!(book.best(|_| None).is_none());
    }

    #[test]
    fn test_window_and_amount() {
        let now = Utc::now();
        assert!(within(now, now - Duration::minutes(5), Duration::minutes(10)));
        assert!(!within(now, now + Duration::minutes(11), Duration::minutes(10)));
        assert!(amount_agrees(None, dec!(5)));
        assert!(!amount_agrees(Some(dec!(4.99)), dec!(5)));
    }
}
