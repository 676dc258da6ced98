use std::time::Duration;

use eppo_client::{ActionSet, Client, ClientConfig, ConfigValidationError, EventPayload};
use serde_json::json;

pub fn main() -> Result<(), ConfigValidationError> {
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("eppo")).init();

    let api_key =
        std::env::var("EPPO_API_KEY").expect("EPPO_API_KEY env variable should contain API key");

    let client = Client::new();
    client.init(
        ClientConfig::from_api_key(api_key).assignment_logger(|event: EventPayload| {
            println!("Logging assignment event: {:?}", event);
        }),
    )?;
    client.wait_for_initialization(Duration::from_secs(5));

    let subject = json!({"age": 30, "country": "US"});
    let actions: ActionSet = [
        (
            "nike".to_owned(),
            json!({"numericAttributes": {"price": 100}, "categoricalAttributes": {"brand": "nike"}}),
        ),
        (
            "adidas".to_owned(),
            json!({"numericAttributes": {"price": 80}, "categoricalAttributes": {"brand": "adidas"}}),
        ),
    ]
    .into_iter()
    .filter_map(|(key, attributes)| Some((key, attributes.as_object()?.clone())))
    .collect();

    let result = client.get_bandit_action(
        "a-bandit-flag",
        "test-subject",
        subject.as_object().expect("subject attributes should be an object"),
        &actions,
        "control",
    );
    println!("Variation: {}, action: {:?}", result.variation, result.action);

    client.shutdown();

    Ok(())
}
