//! Label maps and exact-match label queries.
//!
//! A query is a set of `key=value` requirements. A label map satisfies the
//! query when it carries every key with exactly the required value. The empty
//! query matches everything. There is no negation and no partial matching.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Arbitrary string labels attached to an entity.
pub type Labels = BTreeMap<String, String>;

/// An exact-match label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelQuery(Labels);

impl LabelQuery {
    /// A query that matches every label set.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Build a query from `(key, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns true if this query has no requirements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `labels` satisfies every requirement of the query.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.0
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    /// Parse the text form `key=value,key2=value2`.
    ///
    /// Whitespace around terms is ignored and empty terms are skipped.
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        let mut labels = Labels::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let Some((key, value)) = term.split_once('=') else {
                return Err(ApiError::InvalidLabelQuery {
                    term: term.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ApiError::InvalidLabelQuery {
                    term: term.to_string(),
                });
            }
            labels.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self(labels))
    }
}

impl From<Labels> for LabelQuery {
    fn from(labels: Labels) -> Self {
        Self(labels)
    }
}

impl From<&Labels> for LabelQuery {
    fn from(labels: &Labels) -> Self {
        Self(labels.clone())
    }
}

impl FromStr for LabelQuery {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn task_labels() -> Labels {
        Labels::from([
            ("foo".to_string(), "bar".to_string()),
            ("baz".to_string(), "blah".to_string()),
        ])
    }

    #[rstest]
    #[case::empty(&[], true)]
    #[case::foo(&[("foo", "bar")], true)]
    #[case::baz(&[("baz", "blah")], true)]
    #[case::both(&[("foo", "bar"), ("baz", "blah")], true)]
    #[case::wrong_value(&[("foo", "blah")], false)]
    #[case::swapped_value(&[("baz", "bar")], false)]
    #[case::absent_key(&[("foo", "bar"), ("qux", "blah")], false)]
    fn test_label_query_matching(#[case] pairs: &[(&str, &str)], #[case] expected: bool) {
        let query = LabelQuery::from_pairs(pairs.iter().copied());
        assert_eq!(query.matches(&task_labels()), expected);
    }

    #[test]
    fn test_parse_and_display() {
        let query: LabelQuery = "name=frontend, tier = web".parse().unwrap();
        assert_eq!(
            query,
            LabelQuery::from_pairs([("name", "frontend"), ("tier", "web")])
        );
        assert_eq!(query.to_string(), "name=frontend,tier=web");
    }

    #[test]
    fn test_parse_empty_matches_everything() {
        let query = LabelQuery::parse("").unwrap();
        assert!(query.is_empty());
        assert!(query.matches(&Labels::new()));
    }

    #[test]
    fn test_parse_rejects_bare_term() {
        let err = LabelQuery::parse("name=frontend,web").unwrap_err();
        assert_eq!(
            err,
            ApiError::InvalidLabelQuery {
                term: "web".to_string()
            }
        );
        assert!(LabelQuery::parse("=web").is_err());
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let query = LabelQuery::from_pairs([("name", "frontend")]);
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json, serde_json::json!({"name": "frontend"}));
    }

    proptest! {
        #[test]
        fn prop_subset_of_labels_matches(
            labels in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..8),
            take in 0usize..8,
        ) {
            let subset: Labels = labels.iter().take(take).map(|(k, v)| (k.clone(), v.clone())).collect();
            prop_assert!(LabelQuery::from(subset).matches(&labels));
        }
    }
}
