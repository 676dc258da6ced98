//! Events produced by evaluation, for the application to store in its analytics warehouse.
use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use crate::{eval_details::EvaluationDetails, Attributes};

/// Name reported in event metadata.
pub(crate) const SDK_NAME: &str = "rust";

/// Version reported in event metadata.
pub(crate) const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Record of a subject receiving a flag variation, handed to the
/// [`AssignmentLogger`](crate::AssignmentLogger).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    /// Flag key.
    pub feature_flag: String,
    /// Key of the allocation that matched.
    pub allocation: String,
    /// `{flag}-{allocation}`.
    pub experiment: String,
    /// Key of the assigned variation.
    pub variation: String,
    /// Subject key.
    pub subject: String,
    #[allow(missing_docs)]
    pub subject_attributes: Arc<Attributes>,
    #[allow(missing_docs)]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[allow(missing_docs)]
    pub meta_data: EventMetaData,
    /// Split-level logging fields, serialized as top-level keys of the event.
    #[serde(flatten)]
    pub extra_logging: HashMap<String, String>,
    /// Present only for events produced by the `*_details` methods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_details: Option<Arc<EvaluationDetails>>,
}

/// Record of a bandit picking an action for a subject.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BanditEvent {
    pub flag_key: String,
    pub bandit_key: String,
    pub subject: String,
    pub action: String,
    /// Probability the selected action had of being picked.
    pub action_probability: f64,
    /// Score difference between the best action and the selected one.
    pub optimality_gap: f64,
    pub model_version: String,
    /// RFC 3339 evaluation time.
    pub timestamp: String,
    pub subject_numeric_attributes: HashMap<String, f64>,
    pub subject_categorical_attributes: HashMap<String, String>,
    pub action_numeric_attributes: HashMap<String, f64>,
    pub action_categorical_attributes: HashMap<String, String>,
    pub meta_data: EventMetaData,
}

/// Identifies the SDK that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct EventMetaData {
    pub sdk_name: &'static str,
    pub sdk_version: &'static str,
}

impl EventMetaData {
    pub(crate) fn current() -> EventMetaData {
        EventMetaData {
            sdk_name: SDK_NAME,
            sdk_version: SDK_VERSION,
        }
    }
}
