//! Serde helpers shared by configuration types

/// Serialize `std::time::Duration` as whole seconds.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "dc_core::config::serde_utils::duration_secs")]
///     code_ttl: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Window {
        #[serde(with = "duration_secs")]
        ttl: Duration,
    }

    #[test]
    fn test_seconds_in_toml() {
        let window = Window {
            ttl: Duration::from_secs(180),
        };
        assert_eq!(toml::to_string(&window).unwrap().trim(), "ttl = 180");

        let parsed: Window = toml::from_str("ttl = 45").unwrap();
        assert_eq!(parsed.ttl, Duration::from_secs(45));
    }

    #[test]
    fn test_negative_rejected() {
        assert!(serde_json::from_str::<Window>(r#"{"ttl":-1}"#).is_err());
    }
}
