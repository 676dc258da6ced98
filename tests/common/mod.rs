#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use eppo_client::{
    AssignmentLogger, AssignmentLoggerError, Client, ClientConfig, Configuration, EventPayload,
};
use serde_json::json;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn flags_json() -> serde_json::Value {
    json!({
        "createdAt": "2024-07-18T00:00:00Z",
        "environment": {"name": "Test"},
        "flags": {
            "color": {
                "key": "color",
                "enabled": true,
                "variationType": "STRING",
                "variations": {
                    "red": {"key": "red", "value": "red"},
                    "blue": {"key": "blue", "value": "blue"}
                },
                "allocations": [{
                    "key": "alice-gets-red",
                    "rules": [{"conditions": [
                        {"attribute": "id", "operator": "ONE_OF", "value": ["alice"]}
                    ]}],
                    "splits": [{
                        "variationKey": "red",
                        "shards": [],
                        "extraLogging": {"holdoutKey": "h1"}
                    }],
                    "doLog": true
                }],
                "totalShards": 10000
            },
            "retries": {
                "key": "retries",
                "enabled": true,
                "variationType": "INTEGER",
                "variations": {"three": {"key": "three", "value": 3}},
                "allocations": [{
                    "key": "everyone",
                    "splits": [{"variationKey": "three", "shards": []}],
                    "doLog": false
                }]
            },
            "ratio": {
                "key": "ratio",
                "enabled": true,
                "variationType": "NUMERIC",
                "variations": {"pi": {"key": "pi", "value": 3.1415926}},
                "allocations": [{
                    "key": "everyone",
                    "splits": [{"variationKey": "pi", "shards": []}],
                    "doLog": true
                }]
            },
            "kill-switch": {
                "key": "kill-switch",
                "enabled": true,
                "variationType": "BOOLEAN",
                "variations": {"on": {"key": "on", "value": true}},
                "allocations": [{
                    "key": "everyone",
                    "splits": [{"variationKey": "on", "shards": []}],
                    "doLog": true
                }]
            },
            "layout": {
                "key": "layout",
                "enabled": true,
                "variationType": "JSON",
                "variations": {"wide": {"key": "wide", "value": "{\"columns\": 3}"}},
                "allocations": [{
                    "key": "everyone",
                    "splits": [{"variationKey": "wide", "shards": []}],
                    "doLog": true
                }]
            },
            "disabled": {
                "key": "disabled",
                "enabled": false,
                "variationType": "STRING",
                "variations": {"on": {"key": "on", "value": "on"}},
                "allocations": [{
                    "key": "everyone",
                    "splits": [{"variationKey": "on", "shards": []}],
                    "doLog": true
                }]
            },
            "banner": {
                "key": "banner",
                "enabled": true,
                "variationType": "STRING",
                "variations": {
                    "banner_bandit": {"key": "banner_bandit", "value": "banner_bandit"},
                    "control": {"key": "control", "value": "control"}
                },
                "allocations": [
                    {
                        "key": "control-for-ca",
                        "rules": [{"conditions": [
                            {"attribute": "country", "operator": "ONE_OF", "value": ["CA"]}
                        ]}],
                        "splits": [{"variationKey": "control", "shards": []}],
                        "doLog": true
                    },
                    {
                        "key": "bandit",
                        "splits": [{"variationKey": "banner_bandit", "shards": []}],
                        "doLog": true
                    }
                ]
            }
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

pub fn bandits_json() -> serde_json::Value {
    json!({
        "updatedAt": "2024-07-18T00:00:00Z",
        "bandits": {
            "banner_bandit": {
                "banditKey": "banner_bandit",
                "modelName": "falcon",
                "modelVersion": "v123",
                "updatedAt": "2024-07-18T00:00:00Z",
                "modelData": {
                    "gamma": 1.0,
                    "defaultActionScore": 0.0,
                    "actionProbabilityFloor": 0.0,
                    "coefficients": {
                        "nike": {
                            "actionKey": "nike",
                            "intercept": 1.0,
                            "subjectNumericCoefficients": [
                                {"attributeKey": "age", "coefficient": 0.1, "missingValueCoefficient": 0.0}
                            ],
                            "subjectCategoricalCoefficients": [],
                            "actionNumericCoefficients": [
                                {"attributeKey": "price", "coefficient": -0.01, "missingValueCoefficient": 0.0}
                            ],
                            "actionCategoricalCoefficients": []
                        },
                        "adidas": {
                            "actionKey": "adidas",
                            "intercept": 0.5,
                            "subjectNumericCoefficients": [],
                            "subjectCategoricalCoefficients": [
                                {"attributeKey": "country", "valueCoefficients": {"US": 1.0}, "missingValueCoefficient": 0.0}
                            ],
                            "actionNumericCoefficients": [],
                            "actionCategoricalCoefficients": []
                        }
                    }
                }
            }
        }
    })
}

pub fn configuration() -> Configuration {
    Configuration::from_json(
        flags_json().to_string().as_bytes(),
        Some(bandits_json().to_string().as_bytes()),
    )
    .unwrap()
}

/// Records every event passed to it.
#[derive(Default, Clone)]
pub struct RecordingLogger {
    pub assignments: Arc<Mutex<Vec<EventPayload>>>,
    pub bandit_actions: Arc<Mutex<Vec<EventPayload>>>,
}

impl AssignmentLogger for RecordingLogger {
    fn log_assignment(&self, event: EventPayload) -> Result<(), AssignmentLoggerError> {
        self.assignments.lock().unwrap().push(event);
        Ok(())
    }

    fn log_bandit_action(&self, event: EventPayload) -> Result<(), AssignmentLoggerError> {
        self.bandit_actions.lock().unwrap().push(event);
        Ok(())
    }
}

/// Fails on every assignment and panics on every bandit action.
pub struct BrokenLogger;

impl AssignmentLogger for BrokenLogger {
    fn log_assignment(&self, _event: EventPayload) -> Result<(), AssignmentLoggerError> {
        Err(AssignmentLoggerError::Failed("warehouse is down".to_owned()))
    }

    fn log_bandit_action(&self, _event: EventPayload) -> Result<(), AssignmentLoggerError> {
        panic!("logger exploded")
    }
}

/// A client serving the test configuration without network access.
pub fn offline_client(logger: impl AssignmentLogger + Send + Sync + 'static) -> Client {
    init_logging();
    let client = Client::new();
    client
        .init(
            ClientConfig::from_api_key("test-api-key")
                .enable_polling(false)
                .initial_configuration(configuration())
                .assignment_logger(logger),
        )
        .unwrap();
    client
}
