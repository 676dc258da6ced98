//! The Rust SDK for Eppo, a next-generation feature flagging and experimentation platform.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that evaluates feature flag values for "subjects", where
//! each subject has a unique key and key-value attributes associated with it. Feature flag
//! evaluation results in a typed value being returned, representing a specific feature flag value
//! assigned to the subject.
//!
//! ```no_run
//! # use eppo_client::{Client, ClientConfig};
//! # use std::{collections::HashMap, time::Duration};
//! let client = Client::new();
//! client.init(ClientConfig::from_api_key("api-key")).unwrap();
//! client.wait_for_initialization(Duration::from_secs(5));
//!
//! let variation = client.get_string_assignment("flag", "subject", &HashMap::new(), "control");
//! ```
//!
//! # Typed assignments
//!
//! Every Eppo flag has a return type that is set once on creation in the dashboard. Once a flag is
//! created, assignments in code should be made using the corresponding typed function:
//! - [`Client::get_string_assignment()`]
//! - [`Client::get_integer_assignment()`]
//! - [`Client::get_numeric_assignment()`]
//! - [`Client::get_boolean_assignment()`]
//! - [`Client::get_json_assignment()`]
//!
//! These functions never fail. If a flag cannot be evaluated for any reason (configuration is not
//! fetched yet, flag is missing or has a different type, subject does not match any allocation),
//! the default value passed by the caller is returned. Use `get_*_assignment_details()` variants to
//! find out why a particular value was returned.
//!
//! # Contextual bandits
//!
//! [`Client::get_bandit_action()`] evaluates a bandit flag and selects one of the supplied
//! actions based on subject and action attributes.
//!
//! # Assignment logger
//!
//! An [`AssignmentLogger`] should be provided to save assignment and bandit events to your
//! storage, facilitating tracking of which user received which feature flag values. Failures of
//! the logger never affect returned assignments.
//!
//! ```
//! # use eppo_client::{ClientConfig, EventPayload};
//! let config = ClientConfig::from_api_key("api-key").assignment_logger(|event: EventPayload| {
//!   println!("{:?}", event);
//! });
//! ```
//!
//! # Error Handling
//!
//! The only error returned to the application is [`ConfigValidationError`] from
//! [`Client::init()`]. Everything else is recovered from and reported through logging.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages with `target: "eppo"`. Consider integrating a `log`-compatible logger implementation
//! for better visibility into SDK operations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod bandits;
pub mod eval_details;
pub mod events;
pub mod ufc;

mod assignment;
mod assignment_logger;
mod attributes;
mod client;
mod config;
mod configuration;
mod configuration_fetcher;
mod configuration_store;
mod error;
mod eval;
mod eval_details_builder;
mod eval_visitor;
mod evaluation_core;
mod event_ingestion;
mod poller;
mod rules;
mod sdk_key;
mod sharder;

pub use assignment::{Assignment, AssignmentValue};
pub use assignment_logger::{AssignmentLogger, AssignmentLoggerError, EventPayload};
pub use attributes::{
    coerce_context_attributes, AttributeMap, AttributeValue, Attributes, ContextAttributes,
};
pub use client::{ActionSet, AssignmentDetails, BanditAction, BanditActionDetails, Client};
pub use config::ClientConfig;
pub use configuration::Configuration;
pub use error::{ConfigValidationError, Error, EvaluationError, Result};
pub use eval_details::{BanditEvaluationCode, EvaluationDetails, FlagEvaluationCode};
pub use evaluation_core::EvaluationCore;
pub use events::{AssignmentEvent, BanditEvent};
pub use ufc::VariationType;
