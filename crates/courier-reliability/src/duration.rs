//! Serde helpers for human-readable durations.
//!
//! Durations are written as `humantime` strings (`"250ms"`, `"30s"`,
//! `"1m 30s"`). Plain integers are read as milliseconds.

use serde::{Deserialize, Deserializer, Serializer, de};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
        match self {
            RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
            RawDuration::Text(text) => humantime::parse_duration(&text)
                .map_err(|e| E::custom(format!("invalid duration '{}': {}", text, e))),
        }
    }
}

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    RawDuration::deserialize(deserializer)?.into_duration()
}

/// Same as the parent module for `Option<Duration>`
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.collect_str(&humantime::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(RawDuration::into_duration)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        #[serde(with = "crate::duration")]
        delay: Duration,
        #[serde(with = "crate::duration::option", default)]
        timeout: Option<Duration>,
    }

    #[test]
    fn test_parse_humantime_and_millis() {
        let s: Sample = toml::from_str("delay = \"1s 500ms\"\ntimeout = 250").unwrap();
        assert_eq!(s.delay, Duration::from_millis(1500));
        assert_eq!(s.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_missing_optional_is_none() {
        let s: Sample = toml::from_str("delay = \"2s\"").unwrap();
        assert_eq!(s.timeout, None);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        assert!(toml::from_str::<Sample>("delay = \"soon\"").is_err());
    }

    #[test]
    fn test_serialize_as_text() {
        let s = Sample {
            delay: Duration::from_secs(30),
            timeout: None,
        };
        let out = serde_json::to_value(&s).unwrap();
        assert_eq!(out["delay"], "30s");
    }
}
