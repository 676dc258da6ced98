//! Delivery of custom events (see [`Client::unstable_track`](crate::Client::unstable_track)) to
//! the Eppo ingestion service.
//!
//! Events are queued in a bounded channel and delivered in batches by a background thread.
//! Events from batches that fail with a transient error are retried with exponential backoff.
use std::{
    collections::HashSet,
    sync::{
        mpsc::{RecvTimeoutError, SyncSender, TrySendError},
        Mutex,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, Serializer};
use url::Url;
use uuid::Uuid;

use crate::{Error, Result};

/// Serialized events above this size are rejected by the ingestion service.
const MAX_EVENT_SERIALIZED_LENGTH: usize = 4096;

#[derive(Debug, Clone)]
pub(crate) struct EventIngestionConfig {
    pub ingestion_url: Url,
    pub sdk_key: String,
    /// Capacity of the queue between `track()` callers and the delivery thread, as well as the
    /// maximum number of events held for retry.
    pub max_queue_size: usize,
    pub delivery_interval: Duration,
    pub batch_size: usize,
    /// Number of delivery attempts before an event is dropped.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles with every further attempt.
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl EventIngestionConfig {
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
    pub const DEFAULT_DELIVERY_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_BATCH_SIZE: usize = 1_000;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

    pub fn new(ingestion_url: Url, sdk_key: String) -> EventIngestionConfig {
        EventIngestionConfig {
            ingestion_url,
            sdk_key,
            max_queue_size: Self::DEFAULT_MAX_QUEUE_SIZE,
            delivery_interval: Self::DEFAULT_DELIVERY_INTERVAL,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            base_retry_delay: Self::DEFAULT_BASE_RETRY_DELAY,
            max_retry_delay: Self::DEFAULT_MAX_RETRY_DELAY,
        }
    }

    /// Backoff before the next delivery of an event that failed `attempts` times.
    fn retry_delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.base_retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Event {
    pub uuid: Uuid,
    #[serde(serialize_with = "serialize_millis", deserialize_with = "deserialize_millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

fn serialize_millis<S: Serializer>(
    date: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_i64(date.timestamp_millis())
}

fn deserialize_millis<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let millis = i64::deserialize(deserializer)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
}

#[derive(Debug, Serialize)]
struct IngestionRequestBody<'a> {
    eppo_events: Vec<&'a Event>,
}

#[derive(Debug, Deserialize)]
struct IngestionResponseBody {
    #[serde(default)]
    failed_events: HashSet<Uuid>,
}

/// Outcome of a failed batch delivery.
#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    /// The batch may succeed later.
    #[error("transient error delivering events")]
    Retriable(#[source] Error),
    /// Retrying the batch is pointless.
    #[error("non-retriable error delivering events")]
    NonRetriable(#[source] Error),
}

enum Command {
    Track(Event),
    Stop,
}

struct PendingEvent {
    event: Event,
    attempts: u32,
    /// Not delivered before this instant, unless flushing on shutdown.
    retry_at: Instant,
}

impl PendingEvent {
    fn new(event: Event) -> PendingEvent {
        PendingEvent {
            event,
            attempts: 0,
            retry_at: Instant::now(),
        }
    }
}

/// A handle to the event delivery thread.
pub(crate) struct EventIngestion {
    sender: SyncSender<Command>,
    join_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl EventIngestion {
    /// Start the delivery thread.
    pub fn start(config: EventIngestionConfig) -> std::io::Result<EventIngestion> {
        let (sender, receiver) = std::sync::mpsc::sync_channel::<Command>(config.max_queue_size);

        let join_handle = std::thread::Builder::new()
            .name("eppo-events".to_owned())
            .spawn(move || {
                let client = reqwest::blocking::Client::new();
                let mut pending: Vec<PendingEvent> = Vec::new();
                let mut next_delivery = Instant::now() + config.delivery_interval;

                loop {
                    let timeout = next_delivery.saturating_duration_since(Instant::now());
                    let stop = match receiver.recv_timeout(timeout) {
                        Ok(Command::Track(event)) => {
                            pending.push(PendingEvent::new(event));
                            if pending.len() < config.batch_size {
                                continue;
                            }
                            false
                        }
                        Err(RecvTimeoutError::Timeout) => false,
                        Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => true,
                    };

                    deliver_pending(&client, &config, &mut pending, Instant::now(), stop);
                    next_delivery = Instant::now() + config.delivery_interval;

                    if stop {
                        if !pending.is_empty() {
                            log::warn!(target: "eppo", dropped = pending.len(); "dropping undelivered events on shutdown");
                        }
                        log::debug!(target: "eppo", "event delivery thread received stop command");
                        return;
                    }
                }
            })?;

        Ok(EventIngestion {
            sender,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    /// Queue a custom event for delivery. Drops the event if the queue is full.
    pub fn track(&self, event_type: String, payload: serde_json::Value) {
        let event = Event {
            uuid: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            payload,
        };

        match self.sender.try_send(Command::Track(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!(target: "eppo", "event queue is full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!(target: "eppo", "event delivery has stopped, dropping event");
            }
        }
    }

    /// Ask the delivery thread to flush and exit without waiting for it.
    pub fn stop(&self) {
        // Fails if the queue is full or the thread is gone. `shutdown` retries with a
        // blocking send.
        let _ = self.sender.try_send(Command::Stop);
    }

    /// Flush pending events and stop the delivery thread. Calling it more than once is harmless.
    pub fn shutdown(&self) -> Result<()> {
        let handle = match self.join_handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(handle) = handle {
            // A blocking send is fine here: the thread drains the queue until it sees the
            // command. Error means the thread has already exited.
            let _ = self.sender.send(Command::Stop);
            handle.join().map_err(|_| Error::ThreadPanicked)?;
        }

        Ok(())
    }
}

/// Deliver pending events that are due (all of them when `flush` is set) in batches, keeping the
/// events that should be retried.
fn deliver_pending(
    client: &reqwest::blocking::Client,
    config: &EventIngestionConfig,
    pending: &mut Vec<PendingEvent>,
    now: Instant,
    flush: bool,
) {
    let (mut queue, mut retry): (Vec<_>, Vec<_>) = std::mem::take(pending)
        .into_iter()
        .partition(|it| flush || it.retry_at <= now);
    if queue.is_empty() {
        *pending = retry;
        return;
    }

    while !queue.is_empty() {
        let rest = queue.split_off(config.batch_size.clamp(1, queue.len()));
        let batch = std::mem::replace(&mut queue, rest);

        let events = batch.iter().map(|it| &it.event).collect::<Vec<_>>();
        let failed = match deliver(client, config, &events) {
            Ok(failed) => failed,
            Err(DeliveryError::Retriable(err)) => {
                log::warn!(target: "eppo", "failed to deliver events, will retry: {err}");
                events.iter().map(|it| it.uuid).collect()
            }
            Err(DeliveryError::NonRetriable(err)) => {
                log::warn!(target: "eppo", dropped = events.len(); "failed to deliver events: {err}");
                HashSet::new()
            }
        };

        for mut pending_event in batch {
            if !failed.contains(&pending_event.event.uuid) {
                continue;
            }
            pending_event.attempts += 1;
            if pending_event.attempts < config.max_retries {
                pending_event.retry_at = now + config.retry_delay(pending_event.attempts);
                retry.push(pending_event);
            } else {
                log::warn!(target: "eppo", "dropping event after too many delivery attempts");
            }
        }
    }

    retry.sort_by_key(|it| it.event.timestamp);
    *pending = retry;
    enforce_capacity(pending, config.max_queue_size);
}

/// Drop the oldest events so that at most `capacity` events are retained.
fn enforce_capacity(pending: &mut Vec<PendingEvent>, capacity: usize) {
    if pending.len() > capacity {
        let excess = pending.len() - capacity;
        log::warn!(target: "eppo", dropped = excess; "too many events pending delivery");
        pending.drain(..excess);
    }
}

/// Deliver a single batch. Returns the ids of events the service asked to retry.
fn deliver(
    client: &reqwest::blocking::Client,
    config: &EventIngestionConfig,
    events: &[&Event],
) -> std::result::Result<HashSet<Uuid>, DeliveryError> {
    let events = events
        .iter()
        .copied()
        .filter(|event| {
            let fits = serde_json::to_vec(event)
                .map(|it| it.len() < MAX_EVENT_SERIALIZED_LENGTH)
                .unwrap_or(false);
            if !fits {
                log::warn!(target: "eppo", "dropping event that exceeds maximum serialized size");
            }
            fits
        })
        .collect::<Vec<_>>();
    if events.is_empty() {
        return Ok(HashSet::new());
    }

    log::debug!(target: "eppo", count = events.len(); "delivering events");

    let body = serde_json::to_vec(&IngestionRequestBody {
        eppo_events: events,
    })
    .map_err(|err| DeliveryError::NonRetriable(err.into()))?;

    let response = client
        .post(config.ingestion_url.clone())
        .header("X-Eppo-Token", config.sdk_key.as_str())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .map_err(|err| DeliveryError::Retriable(err.into()))?;

    let response = response.error_for_status().map_err(|err| match err.status() {
        Some(StatusCode::UNAUTHORIZED) => {
            log::warn!(target: "eppo", "client is not authorized. Check your API key");
            DeliveryError::NonRetriable(Error::Unauthorized)
        }
        Some(StatusCode::BAD_REQUEST) => DeliveryError::NonRetriable(err.into()),
        _ => DeliveryError::Retriable(err.into()),
    })?;

    // An empty or unexpected body means the whole batch was accepted.
    let bytes = response
        .bytes()
        .map_err(|err| DeliveryError::Retriable(err.into()))?;
    let failed = serde_json::from_slice::<IngestionResponseBody>(&bytes)
        .map(|it| it.failed_events)
        .unwrap_or_default();

    log::debug!(target: "eppo", failed = failed.len(); "batch delivered");

    Ok(failed)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use url::Url;
    use uuid::Uuid;

    use super::{
        deliver_pending, enforce_capacity, Event, EventIngestion, EventIngestionConfig,
        IngestionRequestBody, PendingEvent,
    };

    fn event(event_type: &str) -> Event {
        Event {
            uuid: Uuid::new_v4(),
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            event_type: event_type.to_owned(),
            payload: json!({"price": 10}),
        }
    }

    #[test]
    fn event_wire_format() {
        let event = event("purchase");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["timestamp"], 1_700_000_000_123i64);
        assert_eq!(value["type"], "purchase");
        assert_eq!(value["payload"]["price"], 10);
        assert_eq!(value["uuid"], event.uuid.to_string());

        let parsed: Event = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn request_body_wraps_events() {
        let first = event("a");
        let second = event("b");

        let value = serde_json::to_value(IngestionRequestBody {
            eppo_events: vec![&first, &second],
        })
        .unwrap();

        assert_eq!(value["eppo_events"].as_array().unwrap().len(), 2);
        assert_eq!(value["eppo_events"][1]["type"], "b");
    }

    #[test]
    fn capacity_drops_oldest_events() {
        let mut pending = (0..5)
            .map(|i| PendingEvent::new(event(&i.to_string())))
            .collect::<Vec<_>>();

        enforce_capacity(&mut pending, 3);

        let types = pending
            .iter()
            .map(|it| it.event.event_type.as_str())
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["2", "3", "4"]);
    }

    #[test]
    fn shutdown_with_unreachable_service_completes() {
        let mut config = EventIngestionConfig::new(
            Url::parse("http://127.0.0.1:1/v0/i").unwrap(),
            "sdk-key".to_owned(),
        );
        config.delivery_interval = Duration::from_secs(60);
        let ingestion = EventIngestion::start(config).unwrap();

        ingestion.track("purchase".to_owned(), json!({"price": 10}));

        let start = Instant::now();
        ingestion.shutdown().unwrap();
        ingestion.shutdown().unwrap();
        assert!(start.elapsed() < Duration::from_secs(30));

        // Tracking after shutdown is a logged no-op.
        ingestion.track("purchase".to_owned(), json!({}));
    }

    #[test]
    fn retry_delay_doubles_up_to_max() {
        let config = EventIngestionConfig::new(
            Url::parse("http://127.0.0.1:1/v0/i").unwrap(),
            "sdk-key".to_owned(),
        );

        assert_eq!(config.retry_delay(1), Duration::from_secs(5));
        assert_eq!(config.retry_delay(2), Duration::from_secs(10));
        assert_eq!(config.retry_delay(3), Duration::from_secs(20));
        assert_eq!(config.retry_delay(4), Duration::from_secs(30));
        assert_eq!(config.retry_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn events_waiting_for_retry_are_not_delivered_early() {
        let config = EventIngestionConfig::new(
            Url::parse("http://127.0.0.1:1/v0/i").unwrap(),
            "sdk-key".to_owned(),
        );
        let client = reqwest::blocking::Client::new();
        let now = Instant::now();
        let mut waiting = PendingEvent::new(event("later"));
        waiting.attempts = 1;
        waiting.retry_at = now + Duration::from_secs(60);
        let mut pending = vec![waiting];

        deliver_pending(&client, &config, &mut pending, now, false);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].retry_at, now + Duration::from_secs(60));
    }

    #[test]
    fn failed_delivery_schedules_backoff() {
        let config = EventIngestionConfig::new(
            Url::parse("http://127.0.0.1:1/v0/i").unwrap(),
            "sdk-key".to_owned(),
        );
        let client = reqwest::blocking::Client::new();
        let now = Instant::now();
        let mut pending = vec![PendingEvent::new(event("purchase"))];

        deliver_pending(&client, &config, &mut pending, now, false);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].retry_at, now + Duration::from_secs(5));
    }
}
