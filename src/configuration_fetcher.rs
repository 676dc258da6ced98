//! An HTTP client that fetches configuration from the server.
use reqwest::{StatusCode, Url};

use crate::{
    bandits::BanditResponse,
    events::{SDK_NAME, SDK_VERSION},
    ufc::UniversalFlagConfig,
    Configuration, Error, Result,
};

pub(crate) struct ConfigurationFetcherConfig {
    pub base_url: String,
    pub api_key: String,
}

const UFC_ENDPOINT: &str = "/flag-config/v1/config";
const BANDIT_ENDPOINT: &str = "/flag-config/v1/bandits";

/// A client that fetches Eppo configuration from the server.
pub(crate) struct ConfigurationFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    config: ConfigurationFetcherConfig,
    /// If we receive a 401 Unauthorized error during a request, it means the API key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: bool,
}

impl ConfigurationFetcher {
    pub fn new(config: ConfigurationFetcherConfig) -> ConfigurationFetcher {
        let client = reqwest::blocking::Client::new();

        ConfigurationFetcher {
            client,
            config,
            unauthorized: false,
        }
    }

    /// Fetch flags configuration and, if flags reference any bandits, bandits configuration.
    pub fn fetch_configuration(&mut self) -> Result<Configuration> {
        if self.unauthorized {
            return Err(Error::Unauthorized);
        }

        let ufc: UniversalFlagConfig = self.fetch_json(UFC_ENDPOINT)?;

        let bandits = if ufc.bandits.values().any(|it| !it.is_empty()) {
            Some(self.fetch_json::<BanditResponse>(BANDIT_ENDPOINT)?)
        } else {
            None
        };

        Ok(Configuration::from_server_response(ufc, bandits))
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        Url::parse_with_params(
            &format!("{}{}", self.config.base_url, endpoint),
            &[
                ("apiKey", self.config.api_key.as_str()),
                ("sdkName", SDK_NAME),
                ("sdkVersion", SDK_VERSION),
            ],
        )
        .map_err(Error::InvalidBaseUrl)
    }

    fn fetch_json<T: serde::de::DeserializeOwned>(&mut self, endpoint: &str) -> Result<T> {
        let url = self.url(endpoint)?;

        log::debug!(target: "eppo", endpoint; "fetching configuration");
        let response = self.client.get(url).send()?;

        let response = response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "eppo", "client is not authorized. Check your API key");
                self.unauthorized = true;
                Error::Unauthorized
            } else {
                log::warn!(target: "eppo", "received non-200 response while fetching new configuration: {:?}", err);
                Error::from(err)
            }
        })?;

        let bytes = response.bytes()?;
        let value = serde_json::from_slice(&bytes)?;

        log::debug!(target: "eppo", endpoint; "successfully fetched configuration");

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigurationFetcher, ConfigurationFetcherConfig, UFC_ENDPOINT};
    use crate::Error;

    fn fetcher(base_url: &str) -> ConfigurationFetcher {
        ConfigurationFetcher::new(ConfigurationFetcherConfig {
            base_url: base_url.to_owned(),
            api_key: "secret key".to_owned(),
        })
    }

    #[test]
    fn builds_url_with_sdk_params() {
        let url = fetcher("https://fscdn.eppo.cloud/api")
            .url(UFC_ENDPOINT)
            .unwrap();

        assert_eq!(url.path(), "/api/flag-config/v1/config");
        let params = url.query_pairs().collect::<Vec<_>>();
        assert!(params.contains(&("apiKey".into(), "secret key".into())));
        assert!(params.contains(&("sdkName".into(), "rust".into())));
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = fetcher("not a url").url(UFC_ENDPOINT);
        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }

    #[test]
    fn caches_unauthorized() {
        let mut fetcher = fetcher("http://127.0.0.1:1");
        fetcher.unauthorized = true;

        assert!(matches!(
            fetcher.fetch_configuration(),
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn unreachable_server_is_a_network_error() {
        let mut fetcher = fetcher("http://127.0.0.1:1");

        assert!(matches!(
            fetcher.fetch_configuration(),
            Err(Error::Network(_))
        ));
    }
}
