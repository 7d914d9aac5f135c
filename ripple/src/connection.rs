//! The connection collaborator: registers subscriptions, hands inbound
//! messages to the right one, and owns the per-connection options.
//!
//! Wire I/O to an actual server is out of scope for this crate; it is
//! represented by the [`Transport`] trait so the subscription core can be
//! exercised without one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use ripple_proto::{Message, QueueGroup, Subject, SubscriptionId};

use crate::error::SubscriptionError;
use crate::subscription::{Handler, Subscription};

/// Sends subscribe/unsubscribe frames to the server.
///
/// This crate never implements an actual transport: framing, authentication
/// and reconnection are somebody else's problem. [`LoopbackTransport`] is
/// provided for tests and for callers who only care about the subscription
/// bookkeeping in this crate.
pub trait Transport: Send + Sync {
    /// Called once when a subscription is created.
    fn send_subscribe(
        &self,
        id: SubscriptionId,
        subject: &Subject,
        queue_group: Option<&QueueGroup>,
    ) -> std::io::Result<()>;

    /// Called when a subscription is unsubscribed, with the auto-unsubscribe
    /// cap if one was set.
    fn send_unsubscribe(&self, id: SubscriptionId, max: Option<u64>) -> std::io::Result<()>;
}

/// A [`Transport`] that does nothing.
///
/// Useful for tests that drive message delivery directly through
/// [`Connection::deliver`] instead of a real server round-trip.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackTransport;

impl Transport for LoopbackTransport {
    fn send_subscribe(
        &self,
        _id: SubscriptionId,
        _subject: &Subject,
        _queue_group: Option<&QueueGroup>,
    ) -> std::io::Result<()> {
        Ok(())
    }

    fn send_unsubscribe(&self, _id: SubscriptionId, _max: Option<u64>) -> std::io::Result<()> {
        Ok(())
    }
}

/// Per-connection tuning knobs read once by each subscription at creation.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub(crate) max_pending_msgs: usize,
    pub(crate) signal_timer_interval: Duration,
    pub(crate) short_signal_interval: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_pending_msgs: 65_536,
            signal_timer_interval: Duration::from_millis(10_000),
            short_signal_interval: Duration::from_millis(1),
        }
    }
}

/// Builds a [`Connection`], mirroring the defaults documented on each
/// setter.
#[derive(Debug, Clone, Default)]
#[must_use = "a builder does nothing until `ConnectionBuilder::build` is called"]
pub struct ConnectionBuilder {
    options: ConnectionOptions,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of buffered messages a subscription holds before the
    /// slow-consumer policy drops further arrivals.
    ///
    /// Defaults to 65536.
    pub fn max_pending_msgs(mut self, max_pending_msgs: usize) -> Self {
        self.options.max_pending_msgs = max_pending_msgs;
        self
    }

    /// Interval at which a subscription's signal timer fires while its
    /// queue has been empty.
    ///
    /// Defaults to 10 seconds.
    pub fn signal_timer_interval(mut self, interval: Duration) -> Self {
        self.options.signal_timer_interval = interval;
        self
    }

    /// Interval the signal timer is reset to right after a message is
    /// enqueued without triggering an inline signal, bounding how long a
    /// sparse arrival waits for the next tick.
    ///
    /// Defaults to 1 millisecond.
    pub fn short_signal_interval(mut self, interval: Duration) -> Self {
        self.options.short_signal_interval = interval;
        self
    }

    /// Finish building, attaching `transport` as the connection's wire
    /// collaborator.
    pub fn build(self, transport: impl Transport + 'static) -> Connection {
        Connection::with_options(transport, self.options)
    }
}

struct ConnectionShared {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, Weak<Subscription>>>,
    options: ConnectionOptions,
    transport: Box<dyn Transport>,
}

/// A connection's subscription registry and options.
///
/// Cheaply cloneable; clones share the same underlying registry, the way
/// the teacher crate's own client handle does.
#[derive(Clone)]
pub struct Connection(Arc<ConnectionShared>);

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("subscriptions", &self.0.subscriptions.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Build a connection with default options.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_options(transport, ConnectionOptions::default())
    }

    /// Build a connection with explicit options.
    pub fn with_options(transport: impl Transport + 'static, options: ConnectionOptions) -> Self {
        Self(Arc::new(ConnectionShared {
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
            options,
            transport: Box::new(transport),
        }))
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId::from(self.0.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Acquire and release the registry mutex once, as a memory barrier
    /// guaranteeing a freshly spawned delivery worker observes every field
    /// the creator initialized before handing it the subscription.
    pub(crate) fn memory_barrier(&self) {
        drop(self.0.subscriptions.lock().unwrap());
    }

    /// Create an asynchronous subscription: `handler` runs on a dedicated
    /// delivery worker for every message.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::NoMemory`] if the delivery worker or
    /// signal timer thread fails to spawn.
    pub fn subscribe<F>(
        &self,
        subject: Subject,
        handler: F,
    ) -> Result<Arc<Subscription>, SubscriptionError>
    where
        F: Fn(&Connection, &Arc<Subscription>, Message) + Send + Sync + 'static,
    {
        self.create_subscription(subject, None, Some(Box::new(handler)))
    }

    /// Create a synchronous subscription: messages are pulled with
    /// [`Subscription::next_msg`].
    ///
    /// # Errors
    ///
    /// See [`Connection::subscribe`].
    pub fn subscribe_sync(&self, subject: Subject) -> Result<Arc<Subscription>, SubscriptionError> {
        self.create_subscription(subject, None, None)
    }

    /// Create an asynchronous, queue-grouped subscription.
    ///
    /// # Errors
    ///
    /// See [`Connection::subscribe`].
    pub fn queue_subscribe<F>(
        &self,
        subject: Subject,
        queue_group: QueueGroup,
        handler: F,
    ) -> Result<Arc<Subscription>, SubscriptionError>
    where
        F: Fn(&Connection, &Arc<Subscription>, Message) + Send + Sync + 'static,
    {
        self.create_subscription(subject, Some(queue_group), Some(Box::new(handler)))
    }

    /// Create a synchronous, queue-grouped subscription.
    ///
    /// # Errors
    ///
    /// See [`Connection::subscribe`].
    pub fn queue_subscribe_sync(
        &self,
        subject: Subject,
        queue_group: QueueGroup,
    ) -> Result<Arc<Subscription>, SubscriptionError> {
        self.create_subscription(subject, Some(queue_group), None)
    }

    fn create_subscription(
        &self,
        subject: Subject,
        queue_group: Option<QueueGroup>,
        handler: Option<Handler>,
    ) -> Result<Arc<Subscription>, SubscriptionError> {
        let id = self.allocate_id();
        let sub = Subscription::create(
            id,
            subject.clone(),
            queue_group.clone(),
            self.clone(),
            handler,
            &self.0.options,
        )?;

        if let Err(err) = self
            .0
            .transport
            .send_subscribe(id, &subject, queue_group.as_ref())
        {
            log::warn!("transport failed to send SUB for subscription {id}: {err}");
        }

        self.0
            .subscriptions
            .lock()
            .unwrap()
            .insert(id, Arc::downgrade(&sub));

        Ok(sub)
    }

    pub(crate) fn send_unsubscribe(&self, id: SubscriptionId, max: u64) {
        let max = (max > 0).then_some(max);
        if let Err(err) = self.0.transport.send_unsubscribe(id, max) {
            log::warn!("transport failed to send UNSUB for subscription {id}: {err}");
        }
    }

    /// Deregister and close a subscription. Called once delivery or a fetch
    /// observes the subscription's auto-unsubscribe cap has been reached,
    /// or directly by [`Subscription::unsubscribe`] when no cap was set.
    pub(crate) fn remove_subscription(&self, sub: &Subscription) {
        self.0.subscriptions.lock().unwrap().remove(&sub.id());
        sub.close(false);
    }

    /// Route an inbound message to the subscription it matched.
    ///
    /// This is the connection reader's entry point: in a full client it
    /// would be driven by the wire-protocol decoder, matching each `MSG`
    /// frame's subscription id. Here it is exposed directly so tests (and
    /// transports outside this crate) can feed messages in.
    pub fn deliver(&self, id: SubscriptionId, message: Message) {
        let sub = self
            .0
            .subscriptions
            .lock()
            .unwrap()
            .get(&id)
            .and_then(Weak::upgrade);
        match sub {
            Some(sub) => sub.enqueue(message),
            None => log::trace!("dropping message for unknown or expired subscription {id}"),
        }
    }

    /// Close the connection: every live subscription observes
    /// [`SubscriptionError::ConnectionClosed`] from then on.
    pub fn close(&self) {
        let subscriptions = self
            .0
            .subscriptions
            .lock()
            .unwrap()
            .drain()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect::<Vec<_>>();
        for sub in subscriptions {
            sub.close(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use claims::{assert_err, assert_matches, assert_ok};
    use ripple_proto::{Message, QueueGroup, Subject, SubscriptionId};

    use super::{Connection, ConnectionBuilder, LoopbackTransport};
    use crate::error::SubscriptionError;

    fn message(subject: &Subject) -> Message {
        Message {
            subscription_id: SubscriptionId::from(1),
            subject: subject.clone(),
            reply_subject: None,
            payload: Bytes::from_static(b"payload"),
        }
    }

    #[test]
    fn queue_subscribe_requires_a_group_to_receive_and_dedupe_delivery() {
        let conn = Connection::new(LoopbackTransport);
        let subject = Subject::from_static("orders.created");
        let group = QueueGroup::from_static("workers");

        let sub = conn
            .queue_subscribe_sync(subject.clone(), group.clone())
            .unwrap();
        assert_eq!(sub.queue_group(), Some(&group));

        conn.deliver(sub.id(), message(&subject));
        assert_ok!(sub.next_msg(Duration::from_millis(100)));
    }

    #[test]
    fn delivering_to_an_unknown_subscription_is_a_noop() {
        let conn = Connection::new(LoopbackTransport);
        let subject = Subject::from_static("orders.created");

        // No panic, no observable effect: just dropped.
        conn.deliver(SubscriptionId::from(9999), message(&subject));
    }

    #[test]
    fn builder_defaults_match_documented_values() {
        let conn = ConnectionBuilder::new().build(LoopbackTransport);
        let sub = conn
            .subscribe_sync(Subject::from_static("defaults.check"))
            .unwrap();
        assert!(sub.is_valid());
        assert_eq!(sub.queued_msgs().unwrap(), 0);
    }

    #[test]
    fn each_subscription_gets_a_distinct_id() {
        let conn = Connection::new(LoopbackTransport);
        let a = conn.subscribe_sync(Subject::from_static("a")).unwrap();
        let b = conn.subscribe_sync(Subject::from_static("b")).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn removed_subscription_is_deregistered() {
        let conn = Connection::new(LoopbackTransport);
        let subject = Subject::from_static("orders.created");
        let sub = conn.subscribe_sync(subject.clone()).unwrap();
        let id = sub.id();

        sub.unsubscribe().unwrap();
        // The registry no longer holds it, so delivery is a silent drop.
        conn.deliver(id, message(&subject));

        let err = assert_err!(sub.queued_msgs());
        assert_matches!(err, SubscriptionError::InvalidSubscription);
    }

    #[test]
    fn dropping_the_last_handle_unsubscribes_and_deregisters() {
        let conn = Connection::new(LoopbackTransport);
        let subject = Subject::from_static("orders.created");
        let sub = conn.subscribe_sync(subject.clone()).unwrap();
        let id = sub.id();

        drop(sub);

        // The registry no longer holds it, so delivery is a silent drop
        // rather than panicking on an upgraded `Weak`.
        conn.deliver(id, message(&subject));
        assert!(conn.0.subscriptions.lock().unwrap().get(&id).is_none());
    }
}
