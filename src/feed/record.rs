//! Price record, sort order and the lazy query result

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One submitted price observation
///
/// The serialized form is stored as the sorted-set member itself, so the
/// JSON layout (`code`, `price`, optional `server`, `ts`) is part of the
/// on-disk contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub code: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Milliseconds since epoch, stamped by the store at insertion
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

impl PriceRecord {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(member: &str) -> serde_json::Result<Self> {
        serde_json::from_str(member)
    }
}

/// Which index a feed read ranks by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Most recent first
    #[default]
    Time,
    /// Highest price first
    Price,
}

impl SortKey {
    /// Parse a `sort` query value; anything unrecognized falls back to time
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("price") => SortKey::Price,
            _ => SortKey::Time,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Time => "time",
            SortKey::Price => "price",
        }
    }
}

/// Members removed from each index by a bulk operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovalCounts {
    pub time: i64,
    pub price: i64,
}

impl RemovalCounts {
    pub fn new(time: i64, price: i64) -> Self {
        Self { time, price }
    }

    pub fn total(&self) -> i64 {
        self.time + self.price
    }
}

/// Result of a feed read
///
/// Holds the raw members fetched in one round trip and decodes them on
/// demand. Undecodable members are skipped. Consumed once; issue a new
/// query for a fresh read.
#[derive(Debug)]
pub struct FeedPage {
    members: std::vec::IntoIter<String>,
    skipped: usize,
}

impl FeedPage {
    pub(crate) fn new(members: Vec<String>) -> Self {
        Self {
            members: members.into_iter(),
            skipped: 0,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Members dropped so far because they failed to decode
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for FeedPage {
    type Item = PriceRecord;

    fn next(&mut self) -> Option<PriceRecord> {
        for member in self.members.by_ref() {
            match PriceRecord::decode(&member) {
                Ok(record) => return Some(record),
                Err(e) => {
                    self.skipped += 1;
                    debug!(error = %e, "skipping undecodable feed member");
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.members.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_format() {
        let record = PriceRecord {
            code: "ABC123".to_string(),
            price: 12.5,
            server: None,
            timestamp: 1_700_000_000_000,
        };
        let json = record.encode().unwrap();
        assert_eq!(json, r#"{"code":"ABC123","price":12.5,"ts":1700000000000}"#);

        let with_server = PriceRecord {
            server: Some("east-1".to_string()),
            ..record
        };
        let json = with_server.encode().unwrap();
        assert!(json.contains(r#""server":"east-1""#));
        assert_eq!(PriceRecord::decode(&json).unwrap(), with_server);
    }

    #[test]
    fn test_decode_accepts_integer_price() {
        let record = PriceRecord::decode(r#"{"code":"XYZ","price":100,"ts":5}"#).unwrap();
        assert_eq!(record.price, 100.0);
        assert_eq!(record.server, None);
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(SortKey::parse(Some("price")), SortKey::Price);
        assert_eq!(SortKey::parse(Some("PRICE ")), SortKey::Price);
        assert_eq!(SortKey::parse(Some("time")), SortKey::Time);
        assert_eq!(SortKey::parse(Some("volume")), SortKey::Time);
        assert_eq!(SortKey::parse(None), SortKey::Time);
    }

    #[test]
    fn test_feed_page_skips_garbage() {
        let mut page = FeedPage::new(vec![
            r#"{"code":"AAA","price":1.0,"ts":1}"#.to_string(),
            "not json".to_string(),
            r#"{"code":"BBB","price":2.0,"ts":2}"#.to_string(),
        ]);
        let codes: Vec<String> = page.by_ref().map(|r| r.code).collect();
        assert_eq!(codes, vec!["AAA", "BBB"]);
        assert_eq!(page.skipped(), 1);
        assert!(page.next().is_none());
    }
}
