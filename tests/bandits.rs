mod common;

use common::{offline_client, BrokenLogger, RecordingLogger};
use eppo_client::{ActionSet, AttributeMap, BanditEvaluationCode, FlagEvaluationCode};
use serde_json::json;

fn attributes(value: serde_json::Value) -> AttributeMap {
    value.as_object().cloned().unwrap_or_default()
}

fn actions() -> ActionSet {
    [
        (
            "nike".to_owned(),
            attributes(json!({"numericAttributes": {"price": 100}, "categoricalAttributes": {}})),
        ),
        ("adidas".to_owned(), attributes(json!({}))),
    ]
    .into()
}

#[test]
fn selects_action_and_logs_both_events() {
    let logger = RecordingLogger::default();
    let client = offline_client(logger.clone());

    let result = client.get_bandit_action(
        "banner",
        "alice",
        &attributes(json!({"age": 30, "country": "US"})),
        &actions(),
        "default",
    );

    assert_eq!(result.variation, "banner_bandit");
    let action = result.action.expect("bandit should select an action");
    assert!(action == "nike" || action == "adidas");

    let assignments = logger.assignments.lock().unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0]["featureFlag"], "banner");
    assert_eq!(assignments[0]["variation"], "banner_bandit");

    let bandit_actions = logger.bandit_actions.lock().unwrap();
    assert_eq!(bandit_actions.len(), 1);
    let event = &bandit_actions[0];
    assert_eq!(event["flagKey"], "banner");
    assert_eq!(event["banditKey"], "banner_bandit");
    assert_eq!(event["subject"], "alice");
    assert_eq!(event["action"], action.as_str());
    assert_eq!(event["modelVersion"], "v123");
    assert_eq!(event["subjectNumericAttributes"]["age"], 30.0);
    assert_eq!(event["subjectCategoricalAttributes"]["country"], "US");
    let probability = event["actionProbability"].as_f64().unwrap();
    assert!(probability > 0.0 && probability <= 1.0);
}

#[test]
fn attribute_shapes_are_equivalent() {
    let client = offline_client(RecordingLogger::default());

    let shapes = [
        json!({"age": 30, "country": "US"}),
        json!({"numericAttributes": {"age": 30}, "categoricalAttributes": {"country": "US"}}),
        json!({"numeric_attributes": {"age": 30}, "categorical_attributes": {"country": "US"}}),
    ];

    for subject_key in ["alice", "bob", "charlie", "dave"] {
        let results = shapes
            .iter()
            .map(|shape| {
                client.get_bandit_action(
                    "banner",
                    subject_key,
                    &attributes(shape.clone()),
                    &actions(),
                    "default",
                )
            })
            .collect::<Vec<_>>();

        assert_eq!(results[0], results[1], "subject {subject_key}");
        assert_eq!(results[1], results[2], "subject {subject_key}");
    }
}

#[test]
fn non_bandit_variation_has_no_action() {
    let logger = RecordingLogger::default();
    let client = offline_client(logger.clone());

    let result = client.get_bandit_action_details(
        "banner",
        "alice",
        &attributes(json!({"country": "CA"})),
        &actions(),
        "default",
    );

    assert_eq!(result.variation, "control");
    assert_eq!(result.action, None);
    assert_eq!(
        result.evaluation_details.bandit_evaluation_code,
        Some(BanditEvaluationCode::NonBanditVariation)
    );
    assert_eq!(logger.assignments.lock().unwrap().len(), 1);
    assert!(logger.bandit_actions.lock().unwrap().is_empty());
}

#[test]
fn no_actions_returns_variation_only() {
    let logger = RecordingLogger::default();
    let client = offline_client(logger.clone());

    let result = client.get_bandit_action(
        "banner",
        "alice",
        &attributes(json!({"country": "US"})),
        &ActionSet::new(),
        "default",
    );

    assert_eq!(result.variation, "banner_bandit");
    assert_eq!(result.action, None);
    assert!(logger.bandit_actions.lock().unwrap().is_empty());
}

#[test]
fn unknown_flag_returns_default_variation() {
    let client = offline_client(RecordingLogger::default());

    let result = client.get_bandit_action_details(
        "missing",
        "alice",
        &attributes(json!({})),
        &actions(),
        "default",
    );

    assert_eq!(result.variation, "default");
    assert_eq!(result.action, None);
    assert_eq!(
        result.evaluation_details.flag_evaluation_code,
        Some(FlagEvaluationCode::FlagUnrecognizedOrDisabled)
    );
}

#[test]
fn details_report_selected_action() {
    let client = offline_client(RecordingLogger::default());

    let result = client.get_bandit_action_details(
        "banner",
        "alice",
        &attributes(json!({"age": 30, "country": "US"})),
        &actions(),
        "default",
    );

    let details = &result.evaluation_details;
    assert_eq!(details.bandit_evaluation_code, Some(BanditEvaluationCode::Match));
    assert_eq!(details.bandit_key.as_deref(), Some("banner_bandit"));
    assert_eq!(details.bandit_action, result.action);
}

#[test]
fn panicking_logger_does_not_affect_bandit_action() {
    let subject = attributes(json!({"age": 30, "country": "US"}));
    let expected = offline_client(RecordingLogger::default()).get_bandit_action(
        "banner",
        "alice",
        &subject,
        &actions(),
        "default",
    );

    let client = offline_client(BrokenLogger);
    for _ in 0..3 {
        let result = client.get_bandit_action("banner", "alice", &subject, &actions(), "default");
        assert_eq!(result, expected);
        assert!(result.action.is_some());
    }
}

#[test]
fn panicking_logger_does_not_affect_bandit_action_details() {
    let subject = attributes(json!({"age": 30, "country": "US"}));
    let expected = offline_client(RecordingLogger::default()).get_bandit_action(
        "banner",
        "alice",
        &subject,
        &actions(),
        "default",
    );

    let client = offline_client(BrokenLogger);
    let result =
        client.get_bandit_action_details("banner", "alice", &subject, &actions(), "default");

    assert_eq!(result.variation, expected.variation);
    assert_eq!(result.action, expected.action);
    assert_eq!(
        result.evaluation_details.bandit_evaluation_code,
        Some(BanditEvaluationCode::Match)
    );
}
