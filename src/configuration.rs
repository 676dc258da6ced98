use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::{
    bandits::{BanditConfiguration, BanditResponse},
    ufc::UniversalFlagConfig,
    Result,
};

/// Remote configuration for the eppo client. It's a central piece that defines client behavior.
///
/// Configuration is immutable. A new configuration replaces the previous one as a whole.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Timestamp when configuration was fetched by the SDK.
    pub fetched_at: DateTime<Utc>,
    /// Flags configuration.
    pub flags: UniversalFlagConfig,
    /// Bandits configuration.
    pub bandits: Option<BanditResponse>,
}

impl Configuration {
    /// Create a new configuration from server responses.
    pub fn from_server_response(
        config: UniversalFlagConfig,
        bandits: Option<BanditResponse>,
    ) -> Configuration {
        Configuration {
            fetched_at: Utc::now(),
            flags: config,
            bandits,
        }
    }

    /// Parse configuration from raw server responses: flags configuration (UFC) and an optional
    /// bandits configuration.
    ///
    /// Useful to bootstrap the client from a configuration cached elsewhere.
    pub fn from_json(flags: &[u8], bandits: Option<&[u8]>) -> Result<Configuration> {
        let flags = serde_json::from_slice(flags)?;
        let bandits = bandits.map(serde_json::from_slice).transpose()?;
        Ok(Configuration::from_server_response(flags, bandits))
    }

    /// Serialize flags configuration back to the server wire format.
    pub fn flags_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.flags)?)
    }

    /// Serialize bandits configuration back to the server wire format. Returns `None` if
    /// configuration does not include bandits.
    pub fn bandits_json(&self) -> Option<Result<Vec<u8>>> {
        self.bandits
            .as_ref()
            .map(|bandits| Ok(serde_json::to_vec(bandits)?))
    }

    /// Return a bandit variant for the specified flag key and string flag variation.
    pub(crate) fn get_bandit_key<'a>(&'a self, flag_key: &str, variation: &str) -> Option<&'a str> {
        self.flags
            .bandits
            .values()
            .flatten()
            .find(|it| it.flag_key == flag_key && it.variation_value == variation)
            .map(|it| it.key.as_str())
    }

    /// Return bandit configuration for the given key.
    ///
    /// Returns `None` if bandits are missing or bandit does not exist.
    pub(crate) fn get_bandit<'a>(&'a self, bandit_key: &str) -> Option<&'a BanditConfiguration> {
        self.bandits.as_ref()?.bandits.get(bandit_key)
    }

    /// Returns `true` if flags configuration references any bandit.
    pub(crate) fn references_bandits(&self) -> bool {
        self.flags.bandits.values().any(|it| !it.is_empty())
    }

    /// Get a set of all available flags. Note that this may return both disabled flags and flags
    /// with bad configuration.
    pub fn flag_keys(&self) -> HashSet<String> {
        self.flags.flags.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Configuration;

    fn flags_json() -> serde_json::Value {
        json!({
            "createdAt": "2024-07-18T00:00:00Z",
            "environment": {"name": "Test"},
            "flags": {
                "kill-switch": {
                    "key": "kill-switch",
                    "enabled": true,
                    "variationType": "BOOLEAN",
                    "variations": {"on": {"key": "on", "value": true}},
                    "allocations": []
                },
                "broken": {"key": "broken", "variationType": "NOT_A_TYPE"}
            },
            "bandits": {
                "banner_bandit": [{
                    "key": "banner_bandit",
                    "flagKey": "banner",
                    "variationKey": "banner_bandit",
                    "variationValue": "banner_bandit"
                }]
            }
        })
    }

    #[test]
    fn parses_and_lists_flags() {
        let config = Configuration::from_json(flags_json().to_string().as_bytes(), None).unwrap();

        let mut keys = config.flag_keys().into_iter().collect::<Vec<_>>();
        keys.sort();
        assert_eq!(keys, vec!["broken", "kill-switch"]);
        assert_eq!(config.flags.environment.name, "Test");
        assert!(config.bandits.is_none());
        assert!(config.bandits_json().is_none());
    }

    #[test]
    fn resolves_bandit_keys() {
        let config = Configuration::from_json(flags_json().to_string().as_bytes(), None).unwrap();

        assert!(config.references_bandits());
        assert_eq!(
            config.get_bandit_key("banner", "banner_bandit"),
            Some("banner_bandit")
        );
        assert_eq!(config.get_bandit_key("banner", "control"), None);
        assert_eq!(config.get_bandit_key("other", "banner_bandit"), None);
        assert!(config.get_bandit("banner_bandit").is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let config = Configuration::from_json(flags_json().to_string().as_bytes(), None).unwrap();

        let serialized = config.flags_json().unwrap();
        let reparsed = Configuration::from_json(&serialized, None).unwrap();

        assert_eq!(reparsed.flag_keys(), config.flag_keys());
        assert_eq!(reparsed.flags.created_at, config.flags.created_at);
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(Configuration::from_json(b"{not json", None).is_err());
    }
}
