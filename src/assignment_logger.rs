use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;

use crate::{AssignmentEvent, BanditEvent};

/// Event serialized for delivery to an [`AssignmentLogger`]. Top-level keys are always camelCase
/// (e.g., `featureFlag`, `subjectAttributes`).
pub type EventPayload = serde_json::Map<String, serde_json::Value>;

/// Error returned by an [`AssignmentLogger`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignmentLoggerError {
    /// The logger does not handle this kind of event. Not reported.
    #[error("logger method is not implemented")]
    NotConfigured,
    /// The logger failed to record the event.
    #[error("failed to log event: {0}")]
    Failed(String),
}

/// A trait for logging assignment and bandit events to your data warehouse.
///
/// Both methods default to [`AssignmentLoggerError::NotConfigured`], so implement only the ones
/// you need. Errors and panics raised from these methods never affect assignment results.
///
/// ```
/// # use eppo_client::{AssignmentLogger, AssignmentLoggerError, EventPayload};
/// struct StdoutLogger;
///
/// impl AssignmentLogger for StdoutLogger {
///     fn log_assignment(&self, event: EventPayload) -> Result<(), AssignmentLoggerError> {
///         println!("{}", serde_json::Value::Object(event));
///         Ok(())
///     }
/// }
/// ```
pub trait AssignmentLogger {
    /// Log an assignment event.
    #[allow(unused_variables)]
    fn log_assignment(&self, event: EventPayload) -> Result<(), AssignmentLoggerError> {
        Err(AssignmentLoggerError::NotConfigured)
    }

    /// Log a bandit action event.
    #[allow(unused_variables)]
    fn log_bandit_action(&self, event: EventPayload) -> Result<(), AssignmentLoggerError> {
        Err(AssignmentLoggerError::NotConfigured)
    }
}

pub(crate) struct NoopAssignmentLogger;

impl AssignmentLogger for NoopAssignmentLogger {}

impl<T: Fn(EventPayload)> AssignmentLogger for T {
    fn log_assignment(&self, event: EventPayload) -> Result<(), AssignmentLoggerError> {
        self(event);
        Ok(())
    }
}

/// Forwards events to a user-supplied [`AssignmentLogger`], isolating its failures.
pub(crate) struct EventLogger {
    logger: Box<dyn AssignmentLogger + Send + Sync>,
}

impl EventLogger {
    pub fn new(logger: Box<dyn AssignmentLogger + Send + Sync>) -> EventLogger {
        EventLogger { logger }
    }

    pub fn log_assignment(&self, event: Option<AssignmentEvent>) {
        let Some(event) = event else {
            return;
        };
        self.dispatch("assignment", &event, |logger, payload| {
            logger.log_assignment(payload)
        });
    }

    pub fn log_bandit_action(&self, event: Option<BanditEvent>) {
        let Some(event) = event else {
            return;
        };
        self.dispatch("bandit", &event, |logger, payload| {
            logger.log_bandit_action(payload)
        });
    }

    fn dispatch<E: Serialize>(
        &self,
        kind: &str,
        event: &E,
        f: impl FnOnce(
            &(dyn AssignmentLogger + Send + Sync),
            EventPayload,
        ) -> Result<(), AssignmentLoggerError>,
    ) {
        let payload = match to_payload(event) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!(target: "eppo", kind; "failed to serialize event: {err}");
                return;
            }
        };

        let logger = &*self.logger;
        match catch_unwind(AssertUnwindSafe(|| f(logger, payload))) {
            Ok(Ok(())) | Ok(Err(AssignmentLoggerError::NotConfigured)) => {}
            Ok(Err(err)) => {
                log::error!(target: "eppo", kind; "error logging event: {err}");
            }
            Err(_) => {
                log::error!(target: "eppo", kind; "assignment logger panicked");
            }
        }
    }
}

fn to_payload<E: Serialize>(event: &E) -> serde_json::Result<EventPayload> {
    let value = serde_json::to_value(event)?;
    let serde_json::Value::Object(map) = value else {
        return Err(serde::ser::Error::custom("event must serialize to an object"));
    };
    Ok(map
        .into_iter()
        .map(|(key, value)| (to_camel_case(&key), value))
        .collect())
}

/// Convert a `snake_case` key to `camelCase`. Keys without underscores are returned unchanged.
fn to_camel_case(key: &str) -> String {
    if !key.contains('_') {
        return key.to_owned();
    }

    let mut result = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = !result.is_empty();
        } else if upper {
            result.extend(c.to_uppercase());
            upper = false;
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use chrono::Utc;

    use super::{
        to_camel_case, AssignmentLogger, AssignmentLoggerError, EventLogger, EventPayload,
    };
    use crate::{events::EventMetaData, AssignmentEvent};

    #[derive(Default, Clone)]
    struct Recorder {
        events: Arc<Mutex<Vec<EventPayload>>>,
    }

    impl AssignmentLogger for Recorder {
        fn log_assignment(&self, event: EventPayload) -> Result<(), AssignmentLoggerError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct Failing;

    impl AssignmentLogger for Failing {
        fn log_assignment(&self, _event: EventPayload) -> Result<(), AssignmentLoggerError> {
            Err(AssignmentLoggerError::Failed("warehouse is down".to_owned()))
        }

        fn log_bandit_action(&self, _event: EventPayload) -> Result<(), AssignmentLoggerError> {
            panic!("boom")
        }
    }

    fn event() -> AssignmentEvent {
        AssignmentEvent {
            feature_flag: "flag".to_owned(),
            allocation: "allocation".to_owned(),
            experiment: "flag-allocation".to_owned(),
            variation: "red".to_owned(),
            subject: "alice".to_owned(),
            subject_attributes: Arc::new(HashMap::new()),
            timestamp: Utc::now(),
            meta_data: EventMetaData::current(),
            extra_logging: HashMap::from([("holdout_key".to_owned(), "h1".to_owned())]),
            evaluation_details: None,
        }
    }

    #[test]
    fn camel_cases_keys() {
        assert_eq!(to_camel_case("feature_flag"), "featureFlag");
        assert_eq!(to_camel_case("subject_numeric_attributes"), "subjectNumericAttributes");
        assert_eq!(to_camel_case("featureFlag"), "featureFlag");
        assert_eq!(to_camel_case("_private"), "private");
    }

    #[test]
    fn forwards_events_with_canonical_keys() {
        let recorder = Recorder::default();
        let logger = EventLogger::new(Box::new(recorder.clone()));

        logger.log_assignment(Some(event()));
        logger.log_assignment(None);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["featureFlag"], "flag");
        assert_eq!(events[0]["holdoutKey"], "h1");
        assert!(events[0].keys().all(|key| !key.contains('_')));
    }

    #[test]
    fn isolates_failing_logger() {
        let logger = EventLogger::new(Box::new(Failing));

        logger.log_assignment(Some(event()));
        logger.log_bandit_action(Some(crate::BanditEvent {
            flag_key: "flag".to_owned(),
            bandit_key: "bandit".to_owned(),
            subject: "alice".to_owned(),
            action: "nike".to_owned(),
            action_probability: 0.5,
            optimality_gap: 0.0,
            model_version: "v1".to_owned(),
            timestamp: Utc::now().to_rfc3339(),
            subject_numeric_attributes: HashMap::new(),
            subject_categorical_attributes: HashMap::new(),
            action_numeric_attributes: HashMap::new(),
            action_categorical_attributes: HashMap::new(),
            meta_data: EventMetaData::current(),
        }));
    }

    #[test]
    fn closures_log_assignments_only() {
        let seen = Arc::new(Mutex::new(0));
        let closure = {
            let seen = seen.clone();
            move |_event: EventPayload| *seen.lock().unwrap() += 1
        };

        assert_eq!(closure.log_assignment(EventPayload::new()), Ok(()));
        assert_eq!(
            closure.log_bandit_action(EventPayload::new()),
            Err(AssignmentLoggerError::NotConfigured)
        );
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
