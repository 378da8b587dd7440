use crate::ingest::Sample;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

/// Payload pushed to live subscribers, keyed by channel name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveMessage {
    #[serde(skip)]
    pub channel: String,
    pub value: JsonValue,
    pub ts: i64,
}

impl From<&Sample> for LiveMessage {
    fn from(sample: &Sample) -> Self {
        Self {
            channel: sample.measure.as_str().to_string(),
            value: sample.json_value(),
            ts: sample.timestamp_ms,
        }
    }
}

/// Best-effort fan-out to whoever is connected right now. Nothing is retained for subscribers
/// that join later.
#[derive(Clone, Debug)]
pub struct LiveFeed {
    tx: broadcast::Sender<LiveMessage>,
}

impl LiveFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, message: LiveMessage) {
        // An error only means nobody is listening.
        if self.tx.send(message).is_err() {
            tracing::trace!("no live subscribers");
        }
    }

    pub fn publish_sample(&self, sample: &Sample) {
        self.publish(LiveMessage::from(sample));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Measure;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let feed = LiveFeed::new(4);
        feed.publish_sample(&Sample::new(Measure::Temperature, 20.0, 5));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_value_and_ts() {
        let feed = LiveFeed::new(4);
        let mut rx = feed.subscribe();
        feed.publish_sample(&Sample::new(Measure::Raindrop, 1.0, 42));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, "raindrop");
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"value":1,"ts":42}"#
        );
    }
}
