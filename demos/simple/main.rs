use std::{collections::HashMap, time::Duration};

use eppo_client::{AttributeValue, Client, ClientConfig, ConfigValidationError, EventPayload};

pub fn main() -> Result<(), ConfigValidationError> {
    // Configure env_logger to see Eppo SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("eppo")).init();

    let api_key =
        std::env::var("EPPO_API_KEY").expect("EPPO_API_KEY env variable should contain API key");

    let client = Client::new();
    client.init(
        ClientConfig::from_api_key(api_key).assignment_logger(|event: EventPayload| {
            println!("Logging assignment event: {:?}", event);
        }),
    )?;

    // Until configuration is fetched, the client returns default values for all assignments.
    client.wait_for_initialization(Duration::from_secs(5));

    let attributes = HashMap::from([("country".to_owned(), AttributeValue::from("US"))]);

    let enabled = client.get_boolean_assignment("a-boolean-flag", "test-subject", &attributes, false);
    println!("Assignment: {enabled:?}");

    let details =
        client.get_string_assignment_details("a-string-flag", "test-subject", &attributes, "control");
    println!(
        "Assignment details: {}",
        serde_json::to_string_pretty(&details).unwrap_or_default()
    );

    client.shutdown();

    Ok(())
}
