//! Topic names, namespaces and wildcard patterns.

use std::fmt;

use crate::error::{PubSubError, PubSubResult};

/// Segment separator used by namespaces and patterns
pub const SEPARATOR: char = '.';

/// Validate a topic name: non-empty and free of whitespace.
pub fn validate_topic(topic: &str) -> PubSubResult<()> {
    if topic.is_empty() {
        return Err(PubSubError::validation(topic, "topic cannot be empty"));
    }
    if topic.chars().any(char::is_whitespace) {
        return Err(PubSubError::validation(
            topic,
            "topic cannot contain whitespace",
        ));
    }
    Ok(())
}

/// Topic prefix isolating tenants or environments sharing one transport.
///
/// Application is idempotent: a topic that already carries the prefix is
/// returned unchanged, so `apply(apply(t)) == apply(t)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Create a namespace; trailing separators are trimmed.
    pub fn new(namespace: impl AsRef<str>) -> PubSubResult<Self> {
        let ns = namespace.as_ref().trim_end_matches(SEPARATOR);
        if ns.is_empty() || ns.chars().any(char::is_whitespace) {
            return Err(PubSubError::Config(format!(
                "invalid namespace '{}'",
                namespace.as_ref()
            )));
        }
        Ok(Self(ns.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn prefix_len(&self) -> usize {
        self.0.len() + SEPARATOR.len_utf8()
    }

    /// Whether `topic` already carries this namespace
    pub fn contains(&self, topic: &str) -> bool {
        topic.len() > self.prefix_len()
            && topic.starts_with(self.0.as_str())
            && topic[self.0.len()..].starts_with(SEPARATOR)
    }

    /// Physical topic for a logical topic
    pub fn apply(&self, topic: &str) -> String {
        if self.contains(topic) {
            topic.to_string()
        } else {
            format!("{}{}{}", self.0, SEPARATOR, topic)
        }
    }

    /// Logical topic for a physical topic
    pub fn strip<'a>(&self, topic: &'a str) -> &'a str {
        if self.contains(topic) {
            &topic[self.prefix_len()..]
        } else {
            topic
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Apply an optional namespace
pub fn namespaced(namespace: Option<&Namespace>, topic: &str) -> String {
    match namespace {
        Some(ns) => ns.apply(topic),
        None => topic.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*` - exactly one segment
    Single,
    /// `**` - zero or more segments
    Multi,
}

/// Wildcard topic pattern.
///
/// - `*` matches exactly one `.`-separated segment
/// - `**` matches zero or more segments
///
/// ```rust
/// use courier_core::TopicPattern;
///
/// let p = TopicPattern::parse("orders.*.created");
/// assert!(p.matches("orders.eu.created"));
/// assert!(!p.matches("orders.eu.west.created"));
///
/// let all = TopicPattern::parse("orders.**");
/// assert!(all.matches("orders"));
/// assert!(all.matches("orders.eu.west.created"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn parse(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = raw
            .split(SEPARATOR)
            .map(|s| match s {
                "*" => Segment::Single,
                "**" => Segment::Multi,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains wildcards
    pub fn is_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Single | Segment::Multi))
    }

    pub fn matches(&self, topic: &str) -> bool {
        if !self.is_wildcard() {
            return self.raw == topic;
        }
        let parts: Vec<&str> = topic.split(SEPARATOR).collect();
        match_segments(&self.segments, &parts)
    }
}

fn match_segments(pattern: &[Segment], parts: &[&str]) -> bool {
    match pattern.split_first() {
        None => parts.is_empty(),
        Some((Segment::Multi, rest)) => {
            (0..=parts.len()).any(|skip| match_segments(rest, &parts[skip..]))
        }
        Some((Segment::Single, rest)) => !parts.is_empty() && match_segments(rest, &parts[1..]),
        Some((Segment::Literal(lit), rest)) => {
            parts.first().is_some_and(|p| *p == lit.as_str()) && match_segments(rest, &parts[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_namespace_apply_and_strip() {
        let ns = Namespace::new("prod").unwrap();
        assert_eq!(ns.apply("orders"), "prod.orders");
        assert_eq!(ns.strip("prod.orders"), "orders");
        assert_eq!(ns.strip("orders"), "orders");
    }

    #[test]
    fn test_namespace_trailing_separator_trimmed() {
        let ns = Namespace::new("prod.").unwrap();
        assert_eq!(ns.apply("orders"), "prod.orders");
    }

    #[rstest]
    #[case("")]
    #[case(" ")]
    #[case("my ns")]
    fn test_invalid_namespace(#[case] raw: &str) {
        assert!(Namespace::new(raw).is_err());
    }

    #[rstest]
    #[case("orders", "orders", true)]
    #[case("orders", "orders.eu", false)]
    #[case("orders.*", "orders.eu", true)]
    #[case("orders.*", "orders", false)]
    #[case("orders.*", "orders.eu.west", false)]
    #[case("orders.**", "orders", true)]
    #[case("orders.**", "orders.eu.west", true)]
    #[case("**.created", "user.created", true)]
    #[case("**.created", "created", true)]
    #[case("*.created", "user.deleted", false)]
    #[case("a.**.z", "a.b.c.z", true)]
    #[case("a.**.z", "a.z", true)]
    fn test_pattern_matching(#[case] pattern: &str, #[case] topic: &str, #[case] expected: bool) {
        assert_eq!(TopicPattern::parse(pattern).matches(topic), expected);
    }

    #[rstest]
    #[case("")]
    #[case("has space")]
    fn test_invalid_topics(#[case] topic: &str) {
        assert!(validate_topic(topic).is_err());
    }

    proptest! {
        #[test]
        fn prop_namespace_is_idempotent(
            ns in "[a-z][a-z0-9_-]{0,8}",
            topic in "[a-z][a-z0-9_]{0,8}(\\.[a-z0-9_]{1,8}){0,3}"
        ) {
            let ns = Namespace::new(&ns).unwrap();
            prop_assume!(!ns.contains(&topic));
            let once = ns.apply(&topic);
            prop_assert_eq!(ns.apply(&once), once.clone());
            prop_assert_eq!(ns.strip(&once), topic.as_str());
        }

        #[test]
        fn prop_literal_pattern_matches_only_itself(
            topic in "[a-z]{1,6}(\\.[a-z]{1,6}){0,3}",
            other in "[a-z]{1,6}(\\.[a-z]{1,6}){0,3}"
        ) {
            let pattern = TopicPattern::parse(topic.clone());
            prop_assert!(pattern.matches(&topic));
            prop_assert_eq!(pattern.matches(&other), topic == other);
        }
    }
}
