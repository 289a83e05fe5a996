//! Topic set derivation

use shared::ConnectorConfig;
use std::collections::BTreeSet;

/// Distinct, non-empty topic names referenced by the connectors.
///
/// Used once at startup to pre-create every topic the bridge will touch.
pub fn collect_topics(connectors: &[ConnectorConfig]) -> Vec<String> {
    topic_set(connectors.iter().map(|c| c.topic.as_str()))
}

/// Deduplicate arbitrary topic names, dropping empty ones
pub fn topic_set<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter(|name| !name.as_ref().is_empty())
        .map(|name| name.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn connectors(topics: &[&str]) -> Vec<ConnectorConfig> {
        topics.iter().map(|t| ConnectorConfig::new("StanToKafka", *t)).collect()
    }

    #[test]
    fn test_duplicates_removed() {
        let topics = collect_topics(&connectors(&["orders", "audit", "orders", "audit", "orders"]));
        assert_eq!(topics.len(), 2);
        assert!(topics.contains(&"orders".to_string()));
        assert!(topics.contains(&"audit".to_string()));
    }

    #[test]
    fn test_every_distinct_name_kept_once() {
        let input = ["a", "b", "c", "b", "a", "d"];
        let topics = collect_topics(&connectors(&input));

        let expected: HashSet<&str> = input.iter().copied().collect();
        let actual: HashSet<&str> = topics.iter().map(String::as_str).collect();
        assert_eq!(actual, expected);
        assert_eq!(topics.len(), expected.len());
    }

    #[test]
    fn test_topic_set_from_names() {
        assert_eq!(topic_set(["x", "y", "x"]), ["x", "y"]);
    }

    #[test]
    fn test_empty_topics_skipped() {
        let topics = collect_topics(&connectors(&["", "events", ""]));
        assert_eq!(topics, vec!["events".to_string()]);
        assert!(collect_topics(&[]).is_empty());
    }
}
