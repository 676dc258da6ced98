use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
    time::Duration,
};

use serde::Serialize;

use crate::{
    assignment_logger::EventLogger, coerce_context_attributes, evaluation_core::Core,
    AssignmentValue, AttributeMap, Attributes, ClientConfig, ConfigValidationError,
    Configuration, ContextAttributes, EvaluationCore, EvaluationDetails, VariationType,
};

/// Candidate actions for a bandit, keyed by action key. Each action carries its own attributes
/// in the same shape as subject attributes of
/// [`Client::get_bandit_action`].
pub type ActionSet = BTreeMap<String, AttributeMap>;

/// Result of [`Client::get_bandit_action`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditAction {
    /// Selected variation of the flag.
    pub variation: String,
    /// Selected action. `None` if the variation is not a bandit or no action was selected.
    pub action: Option<String>,
}

/// Result of [`Client::get_bandit_action_details`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditActionDetails {
    /// Selected variation of the flag.
    pub variation: String,
    /// Selected action. `None` if the variation is not a bandit or no action was selected.
    pub action: Option<String>,
    /// Details of the evaluation.
    pub evaluation_details: Arc<EvaluationDetails>,
}

/// Result of `get_*_assignment_details()` functions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDetails<T> {
    /// Assigned variation. This is the default value if no variation was assigned.
    pub variation: T,
    /// Always `None` for non-bandit assignments.
    pub action: Option<String>,
    /// Details of the evaluation.
    pub evaluation_details: Arc<EvaluationDetails>,
}

/// Evaluation core and event logger serving the client until the next `init()`.
struct Session {
    core: Arc<dyn EvaluationCore>,
    events: EventLogger,
}

/// A client for Eppo API.
///
/// The client is created uninitialized and serves default values until [`Client::init`] is
/// called. It is `Send + Sync` and is meant to be created once and shared for the lifetime of the
/// application.
///
/// # Examples
/// ```
/// # use eppo_client::{Client, ClientConfig};
/// # use std::{collections::HashMap, time::Duration};
/// let client = Client::new();
/// client
///     .init(ClientConfig::from_api_key("api-key").enable_polling(false))
///     .unwrap();
/// client.wait_for_initialization(Duration::from_secs(1));
///
/// let variation = client.get_string_assignment("flag", "subject", &HashMap::new(), "default");
/// assert_eq!(variation, "default");
/// client.shutdown();
/// ```
#[derive(Default)]
pub struct Client {
    session: RwLock<Option<Arc<Session>>>,
}

impl Client {
    /// Create a new uninitialized client.
    pub fn new() -> Client {
        Client::default()
    }

    /// Validate `config` and start serving assignments with the bundled evaluation core.
    ///
    /// If the client is already initialized, the previous core is shut down first. Returns
    /// before configuration is fetched; use [`Client::wait_for_initialization`] to wait for it.
    pub fn init(&self, mut config: ClientConfig) -> Result<(), ConfigValidationError> {
        config.validate()?;
        let core = Core::start(&mut config);
        self.install(config, Arc::new(core));
        Ok(())
    }

    /// Same as [`Client::init`] but serves assignments with a custom evaluation core.
    pub fn init_with_core(
        &self,
        config: ClientConfig,
        core: Arc<dyn EvaluationCore>,
    ) -> Result<(), ConfigValidationError> {
        config.validate()?;
        self.install(config, core);
        Ok(())
    }

    fn install(&self, config: ClientConfig, core: Arc<dyn EvaluationCore>) {
        let session = Arc::new(Session {
            core,
            events: EventLogger::new(config.assignment_logger),
        });

        let previous = {
            let mut slot = self
                .session
                .write()
                .expect("thread holding session lock should not panic");
            let previous = slot.take();
            if let Some(previous) = &previous {
                log::warn!(target: "eppo", "client is already initialized, shutting down the previous instance");
                previous.core.stop();
            }
            *slot = Some(session);
            previous
        };

        // Joining may wait on an in-flight request, so it happens outside the lock.
        if let Some(previous) = previous {
            previous.core.shutdown();
        }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .expect("thread holding session lock should not panic")
            .clone()
    }

    /// Block until configuration is fetched or `timeout` elapses, whichever happens first.
    ///
    /// Returns immediately if the client is not initialized or polling is disabled. Reaching the
    /// timeout is not an error: the client keeps serving default values until configuration
    /// arrives.
    pub fn wait_for_initialization(&self, timeout: Duration) {
        if let Some(session) = self.session() {
            session.core.wait_for_configuration(timeout);
        }
    }

    /// Currently active configuration. `None` before initialization or before the first
    /// configuration is fetched.
    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.session()?.core.get_configuration()
    }

    /// Replace currently active configuration.
    pub fn set_configuration(&self, configuration: Configuration) {
        match self.session() {
            Some(session) => session.core.set_configuration(configuration),
            None => {
                log::warn!(target: "eppo", "setting configuration before client is initialized has no effect");
            }
        }
    }

    /// Stop background activity (configuration polling, event delivery). Calling it more than once
    /// or before initialization is harmless.
    pub fn shutdown(&self) {
        if let Some(session) = self.session() {
            session.core.shutdown();
        }
    }

    /// Track a custom event. The API of this method is not stable and may change.
    pub fn unstable_track(&self, event_type: impl Into<String>, payload: serde_json::Value) {
        if let Some(session) = self.session() {
            session.core.track(event_type.into(), payload);
        }
    }

    /// Get a string variation for the subject, or `default` if the flag cannot be evaluated.
    ///
    /// ```
    /// # use eppo_client::Client;
    /// # use std::collections::HashMap;
    /// # let client = Client::new();
    /// let variation = client.get_string_assignment("flag", "subject", &HashMap::new(), "control");
    /// # assert_eq!(variation, "control");
    /// ```
    pub fn get_string_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: impl Into<String>,
    ) -> String {
        self.get_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::String,
        )
        .and_then(AssignmentValue::to_string)
        .unwrap_or_else(|| default.into())
    }

    /// Get an integer variation for the subject, or `default` if the flag cannot be evaluated.
    pub fn get_integer_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: i64,
    ) -> i64 {
        self.get_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Integer,
        )
        .and_then(|it| it.as_integer())
        .unwrap_or(default)
    }

    /// Get a numeric variation for the subject, or `default` if the flag cannot be evaluated.
    pub fn get_numeric_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: f64,
    ) -> f64 {
        self.get_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Numeric,
        )
        .and_then(|it| it.as_numeric())
        .unwrap_or(default)
    }

    /// Get a boolean variation for the subject, or `default` if the flag cannot be evaluated.
    pub fn get_boolean_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: bool,
    ) -> bool {
        self.get_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Boolean,
        )
        .and_then(|it| it.as_boolean())
        .unwrap_or(default)
    }

    /// Get a JSON variation for the subject, or `default` if the flag cannot be evaluated.
    pub fn get_json_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: serde_json::Value,
    ) -> serde_json::Value {
        self.get_assignment(flag_key, subject_key, subject_attributes, VariationType::Json)
            .and_then(AssignmentValue::to_json)
            .unwrap_or(default)
    }

    fn get_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        expected_type: VariationType,
    ) -> Option<AssignmentValue> {
        let Some(session) = self.session() else {
            log::warn!(target: "eppo", flag_key, subject_key; "evaluating a flag before client is initialized");
            return None;
        };

        let subject_attributes = Arc::new(subject_attributes.clone());
        let result = session.core.query_assignment(
            flag_key,
            subject_key,
            &subject_attributes,
            expected_type,
        );

        let assignment = match result {
            Ok(Some(assignment)) => assignment,
            Ok(None) => return None,
            Err(err) if err.is_normal() => {
                log::debug!(target: "eppo", flag_key, subject_key; "returning default assignment: {err}");
                return None;
            }
            Err(err) => {
                log::warn!(target: "eppo", flag_key, subject_key; "error occurred while evaluating a flag: {err}");
                return None;
            }
        };

        let found = assignment.value.variation_type();
        if found != expected_type {
            log::warn!(target: "eppo", flag_key, subject_key;
                       "evaluation core returned {found:?} for a {expected_type:?} flag");
            return None;
        }

        session.events.log_assignment(assignment.event);

        Some(assignment.value)
    }

    /// Same as [`Client::get_string_assignment`] but also returns evaluation details.
    ///
    /// Computing details is slower than a plain assignment and its format is not stable. Use it
    /// for debugging only.
    pub fn get_string_assignment_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: impl Into<String>,
    ) -> AssignmentDetails<String> {
        self.get_assignment_details(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::String,
            AssignmentValue::to_string,
        )
        .map_or_default(default.into())
    }

    /// Same as [`Client::get_integer_assignment`] but also returns evaluation details.
    pub fn get_integer_assignment_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: i64,
    ) -> AssignmentDetails<i64> {
        self.get_assignment_details(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Integer,
            |it| it.as_integer(),
        )
        .map_or_default(default)
    }

    /// Same as [`Client::get_numeric_assignment`] but also returns evaluation details.
    pub fn get_numeric_assignment_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: f64,
    ) -> AssignmentDetails<f64> {
        self.get_assignment_details(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Numeric,
            |it| it.as_numeric(),
        )
        .map_or_default(default)
    }

    /// Same as [`Client::get_boolean_assignment`] but also returns evaluation details.
    pub fn get_boolean_assignment_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: bool,
    ) -> AssignmentDetails<bool> {
        self.get_assignment_details(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Boolean,
            |it| it.as_boolean(),
        )
        .map_or_default(default)
    }

    /// Same as [`Client::get_json_assignment`] but also returns evaluation details.
    pub fn get_json_assignment_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: serde_json::Value,
    ) -> AssignmentDetails<serde_json::Value> {
        self.get_assignment_details(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Json,
            AssignmentValue::to_json,
        )
        .map_or_default(default)
    }

    fn get_assignment_details<T>(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        expected_type: VariationType,
        convert: impl FnOnce(AssignmentValue) -> Option<T>,
    ) -> AssignmentDetails<Option<T>> {
        let subject_attributes = Arc::new(subject_attributes.clone());

        let Some(session) = self.session() else {
            log::warn!(target: "eppo", flag_key, subject_key; "evaluating a flag before client is initialized");
            return AssignmentDetails {
                variation: None,
                action: None,
                evaluation_details: Arc::new(EvaluationDetails::configuration_missing(
                    flag_key,
                    subject_key,
                    subject_attributes,
                )),
            };
        };

        let (result, event) = session.core.query_assignment_details(
            flag_key,
            subject_key,
            &subject_attributes,
            expected_type,
        );

        session.events.log_assignment(event);

        AssignmentDetails {
            variation: result.variation.and_then(convert),
            action: result.action,
            evaluation_details: result.evaluation_details,
        }
    }

    /// Evaluate a bandit flag and select an action for the subject.
    ///
    /// Subject and action attributes are accepted in either of two shapes:
    /// - bucketed: `{"numericAttributes": {..}, "categoricalAttributes": {..}}` (snake_case keys
    ///   are accepted too);
    /// - flat: `{"age": 30, "country": "US"}`. Numbers are treated as numeric attributes and
    ///   everything else as categorical. Only subject attributes may be flat; actions without
    ///   buckets get no attributes.
    ///
    /// Returns `default_variation` without an action if the flag cannot be evaluated.
    pub fn get_bandit_action(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &AttributeMap,
        actions: &ActionSet,
        default_variation: &str,
    ) -> BanditAction {
        let Some(session) = self.session() else {
            log::warn!(target: "eppo", flag_key, subject_key; "evaluating a bandit before client is initialized");
            return BanditAction {
                variation: default_variation.to_owned(),
                action: None,
            };
        };

        let (subject_attributes, actions) = coerce_bandit_inputs(subject_attributes, actions);
        let result = session.core.query_bandit_action(
            flag_key,
            subject_key,
            &subject_attributes,
            &actions,
            default_variation,
        );

        session.events.log_assignment(result.assignment_event);
        session.events.log_bandit_action(result.bandit_event);

        BanditAction {
            variation: result.variation,
            action: result.action,
        }
    }

    /// Same as [`Client::get_bandit_action`] but also returns evaluation details.
    ///
    /// Computing details is slower and its format is not stable. Use it for debugging only.
    pub fn get_bandit_action_details(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &AttributeMap,
        actions: &ActionSet,
        default_variation: &str,
    ) -> BanditActionDetails {
        let (subject_attributes, actions) = coerce_bandit_inputs(subject_attributes, actions);

        let Some(session) = self.session() else {
            log::warn!(target: "eppo", flag_key, subject_key; "evaluating a bandit before client is initialized");
            return BanditActionDetails {
                variation: default_variation.to_owned(),
                action: None,
                evaluation_details: Arc::new(EvaluationDetails::configuration_missing(
                    flag_key,
                    subject_key,
                    Arc::new(subject_attributes.to_generic_attributes()),
                )),
            };
        };

        let (result, details) = session.core.query_bandit_action_details(
            flag_key,
            subject_key,
            &subject_attributes,
            &actions,
            default_variation,
        );

        session.events.log_assignment(result.assignment_event);
        session.events.log_bandit_action(result.bandit_event);

        BanditActionDetails {
            variation: result.variation,
            action: result.action,
            evaluation_details: Arc::new(details),
        }
    }
}

impl<T> AssignmentDetails<Option<T>> {
    fn map_or_default(self, default: T) -> AssignmentDetails<T> {
        AssignmentDetails {
            variation: self.variation.unwrap_or(default),
            action: self.action,
            evaluation_details: self.evaluation_details,
        }
    }
}

fn coerce_bandit_inputs(
    subject_attributes: &AttributeMap,
    actions: &ActionSet,
) -> (ContextAttributes, HashMap<String, ContextAttributes>) {
    let subject_attributes = coerce_context_attributes(subject_attributes)
        .unwrap_or_else(|| ContextAttributes::from_flat(subject_attributes));

    let actions = actions
        .iter()
        .map(|(key, attributes)| {
            (
                key.clone(),
                coerce_context_attributes(attributes).unwrap_or_default(),
            )
        })
        .collect();

    (subject_attributes, actions)
}
