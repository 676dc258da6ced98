//! Information embedded in SDK keys.
//!
//! Newer keys have the form `<token>.<payload>` where the payload is unpadded base64url of
//! form-encoded parameters. `eh` names the event ingestion host.
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use url::form_urlencoded;

const EVENT_INGESTION_PATH: &str = "v0/i";

/// Event ingestion endpoint encoded in `sdk_key`, if any.
pub(crate) fn decode_event_ingestion_url(sdk_key: &str) -> Option<String> {
    let payload = sdk_key.split('.').nth(1)?;
    let payload = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let host = form_urlencoded::parse(&payload)
        .find_map(|(key, value)| (key == "eh").then_some(value))?;

    let separator = if host.ends_with('/') { "" } else { "/" };
    let url = format!("{host}{separator}{EVENT_INGESTION_PATH}");
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url)
    } else {
        Some(format!("https://{url}"))
    }
}
