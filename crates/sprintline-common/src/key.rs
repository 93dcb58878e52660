use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tracker issue key such as `AX-123`.
///
/// Keys order naturally: project prefix first, then the numeric suffix, so
/// `AX-9` sorts before `AX-10`. Keys without a numeric suffix sort after
/// numbered keys of the same prefix and fall back to the raw string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Project prefix and numeric suffix, if the key has the usual shape.
    fn parts(&self) -> (&str, Option<u64>) {
        match self.0.rsplit_once('-') {
            Some((prefix, num)) => (prefix, num.parse().ok()),
            None => (self.0.as_str(), None),
        }
    }
}

impl Ord for ItemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_prefix, a_num) = self.parts();
        let (b_prefix, b_num) = other.parts();
        a_prefix
            .cmp(b_prefix)
            .then_with(|| match (a_num, b_num) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ItemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_suffix_orders_naturally() {
        assert!(ItemKey::from("AX-9") < ItemKey::from("AX-10"));
        assert!(ItemKey::from("AX-100") > ItemKey::from("AX-99"));
    }

    #[test]
    fn prefix_orders_before_number() {
        assert!(ItemKey::from("AB-500") < ItemKey::from("AX-1"));
    }

    #[test]
    fn unnumbered_keys_sort_after_numbered() {
        assert!(ItemKey::from("AX-1") < ItemKey::from("AX-draft"));
        assert!(ItemKey::from("AX-draft") < ItemKey::from("AX-ready"));
    }

    #[test]
    fn equal_numbers_with_leading_zero_stay_distinct() {
        let a = ItemKey::from("AX-07");
        let b = ItemKey::from("AX-7");
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&ItemKey::from("AX-1")).unwrap();
        assert_eq!(json, r#""AX-1""#);
    }
}
