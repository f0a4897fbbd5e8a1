//! Durable stream facade
//!
//! A stream stores events for the subjects it claims, bounded by age and
//! size. Consumer groups pull deliveries, acknowledge explicitly, and see
//! redelivery on nack; a delivery past `max_deliver` moves to the stream's
//! dead-letter queue. Delivery order follows storage order, so events
//! sharing a partition key arrive in publish order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Notify, RwLock};

use anumate_types::{subjects, CloudEvent};

use crate::{EventBusError, EventBusResult};

/// Stream configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub name: String,
    /// Subject patterns this stream captures, e.g. `events.execution.*`
    pub subjects: Vec<String>,
    /// Retention by age
    pub max_age: Duration,
    /// Retention by size
    pub max_events: usize,
    /// Deliveries per event before dead-lettering
    pub max_deliver: u32,
    /// Subject recorded on dead-lettered events
    pub dlq_subject: String,
}

impl StreamConfig {
    /// A stream capturing every reserved subject, sized for tests
    pub fn all_events(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subjects: vec!["events.*".to_string()],
            max_age: Duration::days(7),
            max_events: 100_000,
            max_deliver: 5,
            dlq_subject: "events.dlq".to_string(),
        }
    }
}

/// A stored event with its stream sequence
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub seq: u64,
    pub subject: String,
    /// Partition key; events sharing it are totally ordered
    pub partition_key: Option<String>,
    pub event: CloudEvent,
    pub stored_at: DateTime<Utc>,
}

/// One delivery to a consumer group
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub subject: String,
    pub event: CloudEvent,
    pub delivery_count: u32,
}

/// Where a new consumer group starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Replay from the first retained event
    Beginning,
    /// Only events published after subscription
    New,
}

struct ConsumerGroup {
    subject_pattern: String,
    /// Next stream sequence to consider
    cursor: u64,
    /// Unacknowledged deliveries: seq -> delivery count so far
    pending: HashMap<u64, u32>,
    /// Sequences ready for redelivery, in order
    redeliver: VecDeque<u64>,
}

struct Stream {
    config: StreamConfig,
    events: VecDeque<StoredEvent>,
    next_seq: u64,
    consumers: HashMap<String, ConsumerGroup>,
    dead_letters: Vec<StoredEvent>,
    notify: Arc<Notify>,
}

impl Stream {
    fn accepts(&self, subject: &str) -> bool {
        self.config
            .subjects
            .iter()
            .any(|pattern| subjects::matches(pattern, subject))
    }

    fn enforce_retention(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.config.max_age;
        while self.events.len() > self.config.max_events
            || self.events.front().is_some_and(|e| e.stored_at < horizon)
        {
            self.events.pop_front();
        }
    }

    fn find(&self, seq: u64) -> Option<&StoredEvent> {
        // Events are in seq order; binary search over the deque
        let index = self
            .events
            .binary_search_by_key(&seq, |e| e.seq)
            .ok()?;
        self.events.get(index)
    }
}

/// The event bus
pub struct EventBus {
    streams: RwLock<HashMap<String, Stream>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Create a stream. Replaces nothing: adding an existing name fails.
    pub async fn add_stream(&self, config: StreamConfig) -> EventBusResult<()> {
        let mut streams = self.streams.write().await;
        if streams.contains_key(&config.name) {
            return Err(EventBusError::Internal(format!(
                "stream '{}' already exists",
                config.name
            )));
        }
        streams.insert(
            config.name.clone(),
            Stream {
                config,
                events: VecDeque::new(),
                next_seq: 1,
                consumers: HashMap::new(),
                dead_letters: Vec::new(),
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(())
    }

    /// Publish an event to every stream claiming its subject.
    pub async fn publish(
        &self,
        subject: &str,
        partition_key: Option<String>,
        event: CloudEvent,
    ) -> EventBusResult<()> {
        let mut streams = self.streams.write().await;
        let mut matched = false;
        let now = Utc::now();

        for stream in streams.values_mut() {
            if !stream.accepts(subject) {
                continue;
            }
            matched = true;
            let seq = stream.next_seq;
            stream.next_seq += 1;
            stream.events.push_back(StoredEvent {
                seq,
                subject: subject.to_string(),
                partition_key: partition_key.clone(),
                event: event.clone().with_subject(subject),
                stored_at: now,
            });
            stream.enforce_retention(now);
            stream.notify.notify_waiters();
        }

        if !matched {
            return Err(EventBusError::NoMatchingStream {
                subject: subject.to_string(),
            });
        }
        Ok(())
    }

    /// Create (or re-attach) a durable consumer group.
    pub async fn subscribe(
        self: &Arc<Self>,
        stream_name: &str,
        group: &str,
        subject_pattern: &str,
        start: StartPosition,
    ) -> EventBusResult<Subscription> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(stream_name)
            .ok_or_else(|| EventBusError::StreamNotFound {
                stream: stream_name.to_string(),
            })?;

        let cursor = match start {
            StartPosition::Beginning => stream.events.front().map(|e| e.seq).unwrap_or(1),
            StartPosition::New => stream.next_seq,
        };
        stream
            .consumers
            .entry(group.to_string())
            .or_insert_with(|| ConsumerGroup {
                subject_pattern: subject_pattern.to_string(),
                cursor,
                pending: HashMap::new(),
                redeliver: VecDeque::new(),
            });
        let notify = Arc::clone(&stream.notify);

        Ok(Subscription {
            bus: Arc::clone(self),
            stream: stream_name.to_string(),
            group: group.to_string(),
            notify,
        })
    }

    /// Dead letters accumulated on a stream
    pub async fn dead_letters(&self, stream_name: &str) -> EventBusResult<Vec<StoredEvent>> {
        let streams = self.streams.read().await;
        let stream = streams
            .get(stream_name)
            .ok_or_else(|| EventBusError::StreamNotFound {
                stream: stream_name.to_string(),
            })?;
        Ok(stream.dead_letters.clone())
    }

    async fn try_pull(&self, stream_name: &str, group: &str) -> EventBusResult<Option<Delivery>> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(stream_name)
            .ok_or_else(|| EventBusError::StreamNotFound {
                stream: stream_name.to_string(),
            })?;

        let max_deliver = stream.config.max_deliver;
        let dlq_subject = stream.config.dlq_subject.clone();

        // Take ownership of the consumer to sidestep aliasing with the
        // event lookup; reinstated below.
        let mut consumer =
            stream
                .consumers
                .remove(group)
                .ok_or_else(|| EventBusError::ConsumerNotFound {
                    stream: stream_name.to_string(),
                    group: group.to_string(),
                })?;

        let delivery = Self::next_delivery(stream, &mut consumer, max_deliver, &dlq_subject);
        stream.consumers.insert(group.to_string(), consumer);
        Ok(delivery)
    }

    fn next_delivery(
        stream: &mut Stream,
        consumer: &mut ConsumerGroup,
        max_deliver: u32,
        dlq_subject: &str,
    ) -> Option<Delivery> {
        // Redeliveries first, oldest sequence first, so per-partition order
        // holds as long as the consumer acks in order
        while let Some(seq) = consumer.redeliver.pop_front() {
            let Some(count) = consumer.pending.get(&seq).copied() else {
                // Acked between nack and redelivery
                continue;
            };
            if count >= max_deliver {
                // Exhausted: move to the dead-letter queue
                if let Some(event) = stream.find(seq).cloned() {
                    let mut dead = event;
                    dead.subject = dlq_subject.to_string();
                    stream.dead_letters.push(dead);
                }
                consumer.pending.remove(&seq);
                continue;
            }
            let Some(event) = stream.find(seq).cloned() else {
                // Trimmed by retention
                consumer.pending.remove(&seq);
                continue;
            };
            let next_count = count + 1;
            consumer.pending.insert(seq, next_count);
            return Some(Delivery {
                seq,
                subject: event.subject.clone(),
                event: event.event,
                delivery_count: next_count,
            });
        }

        // Then fresh events from the cursor
        while consumer.cursor < stream.next_seq {
            let seq = consumer.cursor;
            consumer.cursor += 1;
            let Some(event) = stream.find(seq) else {
                // Trimmed by retention
                continue;
            };
            if !subjects::matches(&consumer.subject_pattern, &event.subject) {
                continue;
            }
            let event = event.clone();
            consumer.pending.insert(seq, 1);
            return Some(Delivery {
                seq,
                subject: event.subject.clone(),
                event: event.event,
                delivery_count: 1,
            });
        }
        None
    }

    async fn ack(&self, stream_name: &str, group: &str, seq: u64) -> EventBusResult<()> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(stream_name)
            .ok_or_else(|| EventBusError::StreamNotFound {
                stream: stream_name.to_string(),
            })?;
        if let Some(consumer) = stream.consumers.get_mut(group) {
            consumer.pending.remove(&seq);
        }
        Ok(())
    }

    async fn nack(&self, stream_name: &str, group: &str, seq: u64) -> EventBusResult<()> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(stream_name)
            .ok_or_else(|| EventBusError::StreamNotFound {
                stream: stream_name.to_string(),
            })?;
        if let Some(consumer) = stream.consumers.get_mut(group) {
            if consumer.pending.contains_key(&seq) && !consumer.redeliver.contains(&seq) {
                consumer.redeliver.push_back(seq);
                consumer.redeliver.make_contiguous().sort_unstable();
            }
        }
        stream.notify.notify_waiters();
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a consumer group on one stream
pub struct Subscription {
    bus: Arc<EventBus>,
    stream: String,
    group: String,
    notify: Arc<Notify>,
}

impl Subscription {
    /// Pull the next delivery, waiting until one is available
    pub async fn next(&self) -> EventBusResult<Delivery> {
        loop {
            // Register interest before the pull; a publish landing between
            // the empty pull and the await still wakes this waiter
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.bus.try_pull(&self.stream, &self.group).await? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    /// Pull without waiting
    pub async fn try_next(&self) -> EventBusResult<Option<Delivery>> {
        self.bus.try_pull(&self.stream, &self.group).await
    }

    /// Acknowledge a delivery
    pub async fn ack(&self, seq: u64) -> EventBusResult<()> {
        self.bus.ack(&self.stream, &self.group, seq).await
    }

    /// Negative-acknowledge: the delivery returns for redelivery, and after
    /// `max_deliver` attempts moves to the dead-letter queue
    pub async fn nack(&self, seq: u64) -> EventBusResult<()> {
        self.bus.nack(&self.stream, &self.group, seq).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anumate_types::TenantId;

    fn event(tenant: TenantId, event_type: &str, run_id: &str) -> CloudEvent {
        CloudEvent::new(
            "anumate-test",
            event_type,
            tenant,
            serde_json::json!({"run_id": run_id}),
        )
    }

    async fn bus_with_stream() -> Arc<EventBus> {
        let bus = Arc::new(EventBus::new());
        bus.add_stream(StreamConfig::all_events("events")).await.unwrap();
        bus
    }

    #[tokio::test]
    async fn test_publish_and_pull() {
        let bus = bus_with_stream().await;
        let tenant = TenantId::new();
        let sub = bus
            .subscribe("events", "workers", "events.execution.*", StartPosition::Beginning)
            .await
            .unwrap();

        bus.publish(
            "events.execution.started",
            Some("r1".into()),
            event(tenant, "com.anumate.execution.started", "r1"),
        )
        .await
        .unwrap();

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.subject, "events.execution.started");
        assert_eq!(delivery.delivery_count, 1);
        sub.ack(delivery.seq).await.unwrap();
        assert!(sub.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_per_run_ordering() {
        let bus = bus_with_stream().await;
        let tenant = TenantId::new();
        let sub = bus
            .subscribe("events", "g", "events.execution.*", StartPosition::Beginning)
            .await
            .unwrap();

        for i in 0..5 {
            bus.publish(
                "events.execution.started",
                Some("r1".into()),
                event(tenant, &format!("com.anumate.step.{i}"), "r1"),
            )
            .await
            .unwrap();
        }

        let mut seen = Vec::new();
        while let Some(delivery) = sub.try_next().await.unwrap() {
            seen.push(delivery.event.event_type.clone());
            sub.ack(delivery.seq).await.unwrap();
        }
        assert_eq!(
            seen,
            (0..5).map(|i| format!("com.anumate.step.{i}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_subject_filter() {
        let bus = bus_with_stream().await;
        let tenant = TenantId::new();
        let sub = bus
            .subscribe("events", "g", "events.approval.*", StartPosition::Beginning)
            .await
            .unwrap();

        bus.publish(
            "events.execution.started",
            None,
            event(tenant, "t1", "r1"),
        )
        .await
        .unwrap();
        bus.publish("events.approval.granted", None, event(tenant, "t2", "r1"))
            .await
            .unwrap();

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.subject, "events.approval.granted");
        sub.ack(delivery.seq).await.unwrap();
        assert!(sub.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_redelivers_then_dead_letters() {
        let bus = Arc::new(EventBus::new());
        let mut config = StreamConfig::all_events("events");
        config.max_deliver = 2;
        bus.add_stream(config).await.unwrap();
        let tenant = TenantId::new();

        let sub = bus
            .subscribe("events", "g", "events.*", StartPosition::Beginning)
            .await
            .unwrap();
        bus.publish("events.execution.failed", None, event(tenant, "t", "r1"))
            .await
            .unwrap();

        // First delivery
        let d1 = sub.next().await.unwrap();
        assert_eq!(d1.delivery_count, 1);
        sub.nack(d1.seq).await.unwrap();

        // Redelivery hits max_deliver
        let d2 = sub.next().await.unwrap();
        assert_eq!(d2.delivery_count, 2);
        sub.nack(d2.seq).await.unwrap();

        // Exhausted: no more deliveries, event is dead-lettered
        assert!(sub.try_next().await.unwrap().is_none());
        let dead = bus.dead_letters("events").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].subject, "events.dlq");
    }

    #[tokio::test]
    async fn test_start_position_new_skips_history() {
        let bus = bus_with_stream().await;
        let tenant = TenantId::new();
        bus.publish("events.execution.started", None, event(tenant, "old", "r"))
            .await
            .unwrap();

        let sub = bus
            .subscribe("events", "late", "events.*", StartPosition::New)
            .await
            .unwrap();
        assert!(sub.try_next().await.unwrap().is_none());

        bus.publish("events.execution.started", None, event(tenant, "new", "r"))
            .await
            .unwrap();
        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.event.event_type, "new");
    }

    #[tokio::test]
    async fn test_retention_by_size() {
        let bus = Arc::new(EventBus::new());
        let mut config = StreamConfig::all_events("events");
        config.max_events = 2;
        bus.add_stream(config).await.unwrap();
        let tenant = TenantId::new();

        for i in 0..5 {
            bus.publish(
                "events.execution.started",
                None,
                event(tenant, &format!("t{i}"), "r"),
            )
            .await
            .unwrap();
        }

        let sub = bus
            .subscribe("events", "g", "events.*", StartPosition::Beginning)
            .await
            .unwrap();
        let mut seen = Vec::new();
        while let Some(d) = sub.try_next().await.unwrap() {
            seen.push(d.event.event_type.clone());
            sub.ack(d.seq).await.unwrap();
        }
        assert_eq!(seen, vec!["t3", "t4"]);
    }

    #[tokio::test]
    async fn test_unmatched_subject_is_error() {
        let bus = Arc::new(EventBus::new());
        bus.add_stream(StreamConfig {
            name: "narrow".into(),
            subjects: vec!["events.approval.*".into()],
            max_age: Duration::days(1),
            max_events: 10,
            max_deliver: 3,
            dlq_subject: "events.dlq".into(),
        })
        .await
        .unwrap();

        let err = bus
            .publish(
                "events.execution.started",
                None,
                event(TenantId::new(), "t", "r"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::NoMatchingStream { .. }));
    }
}
