//! Duration parsing and serde codecs shared by the config and limits types.
//!
//! Every timeout/TTL/stale-window in git-pages config accepts either a
//! human-readable string (`"60s"`, `"5m"`) or a plain millisecond integer, so
//! operators can hand-edit the TOML file without memorizing units. This
//! crate centralizes that (de)serialization so every crate with a duration
//! field gets the same accepted syntax.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Deserialize a [`Duration`] from either a human-readable string or a u64 of milliseconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        Millis(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
        DurationHelper::Millis(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a [`Duration`] as milliseconds, so it round-trips through [`deserialize_duration`].
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Same as [`deserialize_duration`] but for an `Option<Duration>` field, treating
/// an absent/`null` value as `None` rather than an error.
pub fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        None,
        String(String),
        Millis(u64),
    }

    match Option::<DurationHelper>::deserialize(deserializer)? {
        None | Some(DurationHelper::None) => Ok(None),
        Some(DurationHelper::String(s)) => humantime::parse_duration(&s)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
        Some(DurationHelper::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
    }
}

pub fn serialize_duration_opt<S>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match duration {
        Some(d) => serializer.serialize_u64(d.as_millis() as u64),
        None => serializer.serialize_none(),
    }
}

/// A [`Duration`] newtype with the same flexible (de)serialization, for use
/// as a map value or vec element where `#[serde(deserialize_with = ...)]`
/// can't be attached directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanDuration(pub Duration);

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        HumanDuration(d)
    }
}

impl From<HumanDuration> for Duration {
    fn from(h: HumanDuration) -> Self {
        h.0
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize_duration(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_duration(deserializer).map(HumanDuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(
            deserialize_with = "deserialize_duration",
            serialize_with = "serialize_duration"
        )]
        value: Duration,
    }

    #[test]
    fn parses_human_string() {
        let w: Wrapper = serde_json::from_str(r#"{"value": "60s"}"#).unwrap();
        assert_eq!(w.value, Duration::from_secs(60));
    }

    #[test]
    fn parses_millis_integer() {
        let w: Wrapper = serde_json::from_str(r#"{"value": 1500}"#).unwrap();
        assert_eq!(w.value, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_garbage_string() {
        let err = serde_json::from_str::<Wrapper>(r#"{"value": "not-a-duration"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn serializes_as_millis() {
        let w = Wrapper {
            value: Duration::from_secs(5),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"value":5000}"#);
    }

    #[test]
    fn opt_absent_is_none() {
        #[derive(Debug, Serialize, Deserialize)]
        struct W {
            #[serde(
                default,
                deserialize_with = "deserialize_duration_opt",
                serialize_with = "serialize_duration_opt"
            )]
            value: Option<Duration>,
        }
        let w: W = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(w.value, None);
    }

    proptest! {
        #[test]
        fn millis_roundtrip(ms in 0u64..1_000_000_000) {
            let w = Wrapper { value: Duration::from_millis(ms) };
            let json = serde_json::to_string(&w).unwrap();
            let back: Wrapper = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back.value, w.value);
        }
    }
}
