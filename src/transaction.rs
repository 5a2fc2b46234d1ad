//! Transaction identifiers.
//!
//! One transaction is one end-to-end run. Its id `NNNNNN-YYYY-MM-DD` prefixes
//! every key the run writes, so it is allocated once at acquisition and only
//! parsed afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TileGridError};
use crate::store::SequenceSource;

/// Immutable run identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub counter: u64,
    pub date: NaiveDate,
}

impl Transaction {
    #[must_use]
    pub fn new(counter: u64, date: NaiveDate) -> Self {
        Self { counter, date }
    }

    /// `{counter:06}-{YYYY-MM-DD}`; counters past 999999 simply widen
    #[must_use]
    pub fn id(&self) -> String {
        format!("{:06}-{}", self.counter, self.date.format("%Y-%m-%d"))
    }

    /// # Errors
    /// Returns `InvalidParameter` if `id` is not `<digits>-YYYY-MM-DD`.
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = || TileGridError::invalid_parameter(format!("invalid transaction id {id:?}"));

        let (counter, date) = id.split_once('-').ok_or_else(invalid)?;
        if counter.len() < 6 || !counter.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let counter = counter.parse().map_err(|_| invalid())?;
        if date.len() != 10 {
            return Err(invalid());
        }
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
        Ok(Self { counter, date })
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for Transaction {
    type Err = TileGridError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Allocates transactions from a sequence capability
pub struct TransactionFactory<Q: SequenceSource> {
    sequence: Q,
    counter_key: String,
}

impl<Q: SequenceSource> TransactionFactory<Q> {
    pub fn new(sequence: Q, counter_key: impl Into<String>) -> Self {
        Self {
            sequence,
            counter_key: counter_key.into(),
        }
    }

    /// Allocate a transaction dated today (UTC).
    ///
    /// # Errors
    /// Propagates the sequence source's error.
    pub fn create(&self) -> Result<Transaction> {
        self.create_on(Utc::now().date_naive())
    }

    /// Allocate a transaction with an explicit date.
    ///
    /// # Errors
    /// Propagates the sequence source's error.
    pub fn create_on(&self, date: NaiveDate) -> Result<Transaction> {
        let counter = self.sequence.next(&self.counter_key)?;
        let transaction = Transaction::new(counter, date);
        info!(transaction = %transaction, "Allocated transaction");
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_id_format() {
        assert_eq!(Transaction::new(42, date(2024, 8, 1)).id(), "000042-2024-08-01");
        assert_eq!(Transaction::new(1_234_567, date(2024, 1, 9)).id(), "1234567-2024-01-09");
    }

    #[test]
    fn test_parse() {
        let t = Transaction::parse("000042-2024-08-01").unwrap();
        assert_eq!(t, Transaction::new(42, date(2024, 8, 1)));
        assert_eq!("000042-2024-08-01".parse::<Transaction>().unwrap(), t);

        for bad in ["42-2024-08-01", "000042", "000042-2024-8-1", "00004x-2024-08-01", "000042-2024-13-01"] {
            assert!(Transaction::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_factory_allocates_increasing_counters() {
        let factory = TransactionFactory::new(MemoryStore::new(), "etc/transaction_counter.txt");
        let a = factory.create_on(date(2024, 8, 1)).unwrap();
        let b = factory.create_on(date(2024, 8, 1)).unwrap();
        assert_eq!(a.id(), "000001-2024-08-01");
        assert_eq!(b.id(), "000002-2024-08-01");
        assert!(b > a);
    }
}
