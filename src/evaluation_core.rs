//! The evaluation core: the engine that owns configuration, flag evaluation and bandit scoring.
//!
//! [`Client`](crate::Client) talks to the core only through the [`EvaluationCore`] trait. The
//! crate ships one implementation that polls configuration from Eppo servers.
use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use url::Url;

use crate::{
    bandits::{get_bandit_action, get_bandit_action_details, BanditResult},
    configuration_fetcher::{ConfigurationFetcher, ConfigurationFetcherConfig},
    configuration_store::ConfigurationStore,
    eval::{get_assignment, get_assignment_details},
    eval_details::{EvaluationDetails, EvaluationResultWithDetails},
    event_ingestion::{EventIngestion, EventIngestionConfig},
    poller::{PollerThread, PollerThreadConfig},
    sdk_key::decode_event_ingestion_url,
    Assignment, AssignmentEvent, AssignmentValue, Attributes, ClientConfig, Configuration,
    ContextAttributes, EvaluationError, VariationType,
};

/// An engine evaluating feature flags and bandits.
///
/// Implementations must be safe to call concurrently. Evaluation methods must never panic on bad
/// configuration or inputs and should report problems through return values instead.
pub trait EvaluationCore: Send + Sync {
    /// Evaluate a flag for the subject, expecting a value of `expected_type`.
    ///
    /// Returns `Ok(None)` or `Err(_)` if the subject should be served the default value.
    fn query_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Arc<Attributes>,
        expected_type: VariationType,
    ) -> Result<Option<Assignment>, EvaluationError>;

    /// Evaluate a flag for the subject, recording evaluation details along the way.
    fn query_assignment_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Arc<Attributes>,
        expected_type: VariationType,
    ) -> (
        EvaluationResultWithDetails<AssignmentValue>,
        Option<AssignmentEvent>,
    );

    /// Evaluate a bandit flag and select one of `actions`.
    fn query_bandit_action(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &ContextAttributes,
        actions: &HashMap<String, ContextAttributes>,
        default_variation: &str,
    ) -> BanditResult;

    /// Evaluate a bandit flag, recording evaluation details along the way.
    fn query_bandit_action_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &ContextAttributes,
        actions: &HashMap<String, ContextAttributes>,
        default_variation: &str,
    ) -> (BanditResult, EvaluationDetails);

    /// Currently active configuration, if any.
    fn get_configuration(&self) -> Option<Arc<Configuration>>;

    /// Replace currently active configuration.
    fn set_configuration(&self, configuration: Configuration);

    /// Block until configuration is available or `timeout` elapses.
    #[allow(unused_variables)]
    fn wait_for_configuration(&self, timeout: Duration) {}

    /// Ask background activity to stop without waiting for it. Must be idempotent.
    fn stop(&self) {}

    /// Stop all background activity and wait for it to finish. Must be idempotent.
    fn shutdown(&self) {}

    /// Record a custom event.
    #[allow(unused_variables)]
    fn track(&self, event_type: String, payload: serde_json::Value) {
        log::debug!(target: "eppo", event_type = event_type.as_str(); "event tracking is not supported by this core");
    }
}

/// The bundled [`EvaluationCore`]: evaluates configuration stored in memory and keeps it fresh
/// with a background poller thread.
pub(crate) struct Core {
    store: Arc<ConfigurationStore>,
    poller: Option<PollerThread>,
    ingestion: Option<EventIngestion>,
}

impl Core {
    /// Start the core and its background threads.
    ///
    /// `initial_configuration` is taken out of `config`. Failure to start background threads is
    /// logged and leaves the core serving whatever configuration it has.
    pub fn start(config: &mut ClientConfig) -> Core {
        let store = Arc::new(ConfigurationStore::new());
        if let Some(configuration) = config.initial_configuration.take() {
            store.set_configuration(Arc::new(configuration));
        }

        let poller = if config.enable_polling {
            let fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig {
                base_url: config.base_url.clone(),
                api_key: config.api_key.clone(),
            });
            let poller_config = PollerThreadConfig {
                interval: config.poll_interval,
                jitter: config.poll_jitter,
            };
            match PollerThread::start_with_config(fetcher, store.clone(), poller_config) {
                Ok(poller) => Some(poller),
                Err(err) => {
                    log::error!(target: "eppo", "failed to start configuration poller: {err}");
                    None
                }
            }
        } else {
            None
        };

        let ingestion = ingestion_url(config).and_then(|url| {
            match EventIngestion::start(EventIngestionConfig::new(url, config.api_key.clone())) {
                Ok(ingestion) => Some(ingestion),
                Err(err) => {
                    log::error!(target: "eppo", "failed to start event delivery: {err}");
                    None
                }
            }
        });

        Core {
            store,
            poller,
            ingestion,
        }
    }
}

/// Explicit `event_ingestion_url`, or else the one encoded in the SDK key.
fn ingestion_url(config: &ClientConfig) -> Option<Url> {
    let url = match &config.event_ingestion_url {
        Some(url) => url.clone(),
        None => decode_event_ingestion_url(&config.api_key)?,
    };
    match Url::parse(&url) {
        Ok(url) => Some(url),
        Err(err) => {
            log::warn!(target: "eppo", url = url.as_str(); "ignoring invalid event ingestion url: {err}");
            None
        }
    }
}

impl EvaluationCore for Core {
    fn query_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Arc<Attributes>,
        expected_type: VariationType,
    ) -> Result<Option<Assignment>, EvaluationError> {
        let configuration = self.store.get_configuration();
        get_assignment(
            configuration.as_deref(),
            flag_key,
            subject_key,
            subject_attributes,
            Some(expected_type),
            Utc::now(),
        )
        .map(Some)
    }

    fn query_assignment_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Arc<Attributes>,
        expected_type: VariationType,
    ) -> (
        EvaluationResultWithDetails<AssignmentValue>,
        Option<AssignmentEvent>,
    ) {
        let configuration = self.store.get_configuration();
        get_assignment_details(
            configuration.as_deref(),
            flag_key,
            subject_key,
            subject_attributes,
            Some(expected_type),
            Utc::now(),
        )
    }

    fn query_bandit_action(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &ContextAttributes,
        actions: &HashMap<String, ContextAttributes>,
        default_variation: &str,
    ) -> BanditResult {
        let configuration = self.store.get_configuration();
        get_bandit_action(
            configuration.as_deref(),
            flag_key,
            subject_key,
            subject_attributes,
            actions,
            default_variation,
            Utc::now(),
        )
    }

    fn query_bandit_action_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &ContextAttributes,
        actions: &HashMap<String, ContextAttributes>,
        default_variation: &str,
    ) -> (BanditResult, EvaluationDetails) {
        let configuration = self.store.get_configuration();
        get_bandit_action_details(
            configuration.as_deref(),
            flag_key,
            subject_key,
            subject_attributes,
            actions,
            default_variation,
            Utc::now(),
        )
    }

    fn get_configuration(&self) -> Option<Arc<Configuration>> {
        self.store.get_configuration()
    }

    fn set_configuration(&self, configuration: Configuration) {
        self.store.set_configuration(Arc::new(configuration));
    }

    fn wait_for_configuration(&self, timeout: Duration) {
        if self.store.get_configuration().is_some() {
            return;
        }
        let Some(poller) = &self.poller else {
            return;
        };

        match poller.wait_for_configuration(timeout) {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                log::warn!(target: "eppo", "failed to fetch initial configuration: {err}");
            }
            None => {
                log::debug!(target: "eppo", "timed out waiting for configuration");
            }
        }
    }

    fn stop(&self) {
        if let Some(poller) = &self.poller {
            poller.stop();
        }
        if let Some(ingestion) = &self.ingestion {
            ingestion.stop();
        }
    }

    fn shutdown(&self) {
        if let Some(poller) = &self.poller {
            if let Err(err) = poller.shutdown() {
                log::error!(target: "eppo", "failed to stop configuration poller: {err}");
            }
        }
        if let Some(ingestion) = &self.ingestion {
            if let Err(err) = ingestion.shutdown() {
                log::error!(target: "eppo", "failed to stop event delivery: {err}");
            }
        }
    }

    fn track(&self, event_type: String, payload: serde_json::Value) {
        match &self.ingestion {
            Some(ingestion) => ingestion.track(event_type, payload),
            None => {
                log::debug!(target: "eppo", event_type = event_type.as_str(); "event ingestion is not configured, dropping event");
            }
        }
    }
}
