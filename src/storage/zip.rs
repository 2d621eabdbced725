//! ZIP code to state resolution
//!
//! Contacts imported without a state are resolved once, before scheduling,
//! from the first three digits of their ZIP code.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lookup of a two-letter state code from a ZIP code
pub trait ZipResolver: Send + Sync {
    fn state_for_zip(&self, zip: &str) -> Option<String>;
}

/// Inclusive range of three-digit ZIP prefixes belonging to one state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipPrefixRange {
    pub start: u16,
    pub end: u16,
    pub state: String,
}

impl ZipPrefixRange {
    pub fn new(start: u16, end: u16, state: &str) -> Self {
        Self {
            start,
            end,
            state: state.to_string(),
        }
    }

    fn contains(&self, prefix: u16) -> bool {
        self.start <= prefix && prefix <= self.end
    }
}

/// Prefix ranges for the states with compliance rules plus the largest markets
pub fn default_zip_prefixes() -> Vec<ZipPrefixRange> {
    vec![
        ZipPrefixRange::new(10, 27, "MA"),
        ZipPrefixRange::new(55, 55, "MA"),
        ZipPrefixRange::new(60, 69, "CT"),
        ZipPrefixRange::new(100, 149, "NY"),
        ZipPrefixRange::new(206, 219, "MD"),
        ZipPrefixRange::new(201, 201, "VA"),
        ZipPrefixRange::new(220, 246, "VA"),
        ZipPrefixRange::new(300, 319, "GA"),
        ZipPrefixRange::new(320, 349, "FL"),
        ZipPrefixRange::new(400, 427, "KY"),
        ZipPrefixRange::new(430, 459, "OH"),
        ZipPrefixRange::new(600, 629, "IL"),
        ZipPrefixRange::new(630, 658, "MO"),
        ZipPrefixRange::new(730, 749, "OK"),
        ZipPrefixRange::new(750, 799, "TX"),
        ZipPrefixRange::new(832, 838, "ID"),
        ZipPrefixRange::new(850, 865, "AZ"),
        ZipPrefixRange::new(889, 898, "NV"),
        ZipPrefixRange::new(900, 961, "CA"),
        ZipPrefixRange::new(970, 979, "OR"),
        ZipPrefixRange::new(980, 994, "WA"),
    ]
}

/// Table-driven [`ZipResolver`]
#[derive(Debug, Clone, Default)]
pub struct ZipPrefixTable {
    ranges: Vec<ZipPrefixRange>,
}

impl ZipPrefixTable {
    pub fn new(ranges: Vec<ZipPrefixRange>) -> Self {
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl ZipResolver for ZipPrefixTable {
    fn state_for_zip(&self, zip: &str) -> Option<String> {
        let digits: String = zip.trim().chars().take(5).collect();
        if digits.len() < 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let prefix: u16 = digits[..3].parse().ok()?;
        self.ranges
            .iter()
            .find(|r| r.contains(prefix))
            .map(|r| r.state.clone())
    }
}

/// Shared resolver handle
pub type SharedZipResolver = Arc<dyn ZipResolver>;

pub fn create_zip_resolver(ranges: Vec<ZipPrefixRange>) -> SharedZipResolver {
    Arc::new(ZipPrefixTable::new(ranges))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_known_prefixes() {
        let table = ZipPrefixTable::new(default_zip_prefixes());
        assert_eq!(table.state_for_zip("90210").as_deref(), Some("CA"));
        assert_eq!(table.state_for_zip("10001").as_deref(), Some("NY"));
        assert_eq!(table.state_for_zip("06103").as_deref(), Some("CT"));
        assert_eq!(table.state_for_zip("89501-1234").as_deref(), Some("NV"));
    }

    #[test]
    fn test_unknown_or_malformed_zip() {
        let table = ZipPrefixTable::new(default_zip_prefixes());
        assert_eq!(table.state_for_zip("00501"), None);
        assert_eq!(table.state_for_zip("9a210"), None);
        assert_eq!(table.state_for_zip("12"), None);
        assert_eq!(table.state_for_zip(""), None);
    }

    #[test]
    fn test_empty_table_resolves_nothing() {
        let resolver = create_zip_resolver(Vec::new());
        assert_eq!(resolver.state_for_zip("90210"), None);
    }
}
