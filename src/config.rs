use std::time::Duration;

use url::Url;

use crate::{
    assignment_logger::NoopAssignmentLogger, AssignmentLogger, ConfigValidationError,
    Configuration,
};

/// Configuration for [`Client`](crate::Client).
///
/// # Examples
/// ```no_run
/// # use eppo_client::{Client, ClientConfig, EventPayload};
/// # use std::time::Duration;
/// let config = ClientConfig::from_api_key("api-key")
///     .assignment_logger(|event: EventPayload| {
///         println!("{:?}", event);
///     })
///     .poll_interval(Duration::from_secs(60));
///
/// let client = Client::new();
/// client.init(config).unwrap();
/// # client.shutdown();
/// ```
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) assignment_logger: Box<dyn AssignmentLogger + Send + Sync>,
    pub(crate) poll_interval: Duration,
    pub(crate) poll_jitter: Duration,
    pub(crate) enable_polling: bool,
    pub(crate) initial_configuration: Option<Configuration>,
    pub(crate) event_ingestion_url: Option<String>,
}

impl ClientConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://fscdn.eppo.cloud/api";

    /// Default interval between configuration requests.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

    /// Default upper bound of a random delay added to the poll interval.
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    /// Create a default Eppo configuration using the specified API key.
    ///
    /// ```
    /// # use eppo_client::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            assignment_logger: Box::new(NoopAssignmentLogger),
            poll_interval: ClientConfig::DEFAULT_POLL_INTERVAL,
            poll_jitter: ClientConfig::DEFAULT_POLL_JITTER,
            enable_polling: true,
            initial_configuration: None,
            event_ingestion_url: None,
        }
    }

    /// Set assignment logger to pass variation assignments and bandit actions to your data
    /// warehouse.
    ///
    /// A closure may be passed to log assignment events only. Implement [`AssignmentLogger`] to
    /// receive bandit events as well.
    pub fn assignment_logger(
        mut self,
        assignment_logger: impl AssignmentLogger + Send + Sync + 'static,
    ) -> Self {
        self.assignment_logger = Box::new(assignment_logger);
        self
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the interval between configuration requests.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the upper bound of a random delay added to every poll interval. Must not exceed the
    /// poll interval.
    pub fn poll_jitter(mut self, poll_jitter: Duration) -> Self {
        self.poll_jitter = poll_jitter;
        self
    }

    /// Enable or disable background polling for configuration. When polling is disabled, the
    /// client only serves `initial_configuration` and configurations set with
    /// [`Client::set_configuration`](crate::Client::set_configuration).
    pub fn enable_polling(mut self, enable_polling: bool) -> Self {
        self.enable_polling = enable_polling;
        self
    }

    /// Configuration to serve until the first one is fetched from the server.
    pub fn initial_configuration(mut self, configuration: Configuration) -> Self {
        self.initial_configuration = Some(configuration);
        self
    }

    /// Deliver events passed to [`Client::unstable_track`](crate::Client::unstable_track) to
    /// this URL. Defaults to the ingestion host encoded in the SDK key. Custom events are
    /// discarded if neither is available.
    pub fn event_ingestion_url(mut self, url: impl Into<String>) -> Self {
        self.event_ingestion_url = Some(url.into());
        self
    }

    /// Check that configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigValidationError::BlankApiKey);
        }

        Url::parse(&self.base_url).map_err(ConfigValidationError::InvalidBaseUrl)?;

        if self.poll_interval.is_zero() {
            return Err(ConfigValidationError::ZeroPollInterval);
        }

        if self.poll_jitter > self.poll_interval {
            return Err(ConfigValidationError::JitterExceedsInterval {
                interval: self.poll_interval,
                jitter: self.poll_jitter,
            });
        }

        if let Some(url) = &self.event_ingestion_url {
            Url::parse(url).map_err(ConfigValidationError::InvalidEventIngestionUrl)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientConfig;
    use crate::ConfigValidationError;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::from_api_key("api-key");

        assert_eq!(config.base_url, "https://fscdn.eppo.cloud/api");
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.poll_jitter, Duration::from_secs(3));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_blank_api_key() {
        assert_eq!(
            ClientConfig::from_api_key("  ").validate(),
            Err(ConfigValidationError::BlankApiKey)
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            ClientConfig::from_api_key("api-key")
                .base_url("not a url")
                .validate(),
            Err(ConfigValidationError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn rejects_bad_poll_settings() {
        assert_eq!(
            ClientConfig::from_api_key("api-key")
                .poll_interval(Duration::ZERO)
                .validate(),
            Err(ConfigValidationError::ZeroPollInterval)
        );
        assert_eq!(
            ClientConfig::from_api_key("api-key")
                .poll_interval(Duration::from_secs(1))
                .poll_jitter(Duration::from_secs(2))
                .validate(),
            Err(ConfigValidationError::JitterExceedsInterval {
                interval: Duration::from_secs(1),
                jitter: Duration::from_secs(2),
            })
        );
    }

    #[test]
    fn rejects_invalid_ingestion_url() {
        assert!(matches!(
            ClientConfig::from_api_key("api-key")
                .event_ingestion_url("::")
                .validate(),
            Err(ConfigValidationError::InvalidEventIngestionUrl(_))
        ));
    }
}
