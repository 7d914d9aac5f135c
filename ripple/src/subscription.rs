//! The subscription core: state, delivery worker, synchronous fetch and
//! lifecycle.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, TryLockError};
use std::time::{Duration, Instant};

use ripple_proto::{Message, QueueGroup, Subject, SubscriptionId};

use crate::connection::{Connection, ConnectionOptions};
use crate::error::SubscriptionError;
use crate::timer::SignalTimer;

/// Number of consecutive failed non-blocking lock attempts the signal
/// timer tolerates before falling back to a blocking acquisition.
const SIGNAL_FAIL_COUNT_LIMIT: u32 = 10;

pub(crate) type Handler = Box<dyn Fn(&Connection, &Arc<Subscription>, Message) + Send + Sync>;

struct Inner {
    queue: VecDeque<Message>,
    delivered: u64,
    max: u64,
    pending_max: usize,
    signal_limit: usize,
    no_delay: bool,
    in_wait: u32,
    slow_consumer: bool,
    closed: bool,
    conn_closed: bool,
}

/// A client's interest in a subject.
///
/// Delivers matching messages either asynchronously, by invoking a handler
/// on a dedicated worker thread, or synchronously, through
/// [`Subscription::next_msg`]. Dropping the last handle to a subscription
/// unsubscribes it, mirroring the original design's refcounted `Destroy`.
pub struct Subscription {
    id: SubscriptionId,
    subject: Subject,
    queue_group: Option<QueueGroup>,
    conn: Connection,
    handler: Option<Handler>,
    default_signal_interval: Duration,
    short_signal_interval: Duration,
    state: Mutex<Inner>,
    cond: Condvar,
    timer: Mutex<Option<SignalTimer>>,
}

impl Subscription {
    pub(crate) fn create(
        id: SubscriptionId,
        subject: Subject,
        queue_group: Option<QueueGroup>,
        conn: Connection,
        handler: Option<Handler>,
        options: &ConnectionOptions,
    ) -> Result<Arc<Self>, SubscriptionError> {
        let pending_max = options.max_pending_msgs;
        let signal_limit = (pending_max * 3) / 4;

        let sub = Arc::new(Self {
            id,
            subject,
            queue_group,
            conn,
            handler,
            default_signal_interval: options.signal_timer_interval,
            short_signal_interval: options.short_signal_interval,
            state: Mutex::new(Inner {
                queue: VecDeque::new(),
                delivered: 0,
                max: 0,
                pending_max,
                signal_limit,
                no_delay: false,
                in_wait: 0,
                slow_consumer: false,
                closed: false,
                conn_closed: false,
            }),
            cond: Condvar::new(),
            timer: Mutex::new(None),
        });

        let timer_sub = Arc::clone(&sub);
        let stop_sub = Arc::clone(&sub);
        let mut signal_fail_count: u32 = 0;
        let timer = SignalTimer::start(
            options.signal_timer_interval,
            move || timer_sub.on_signal_tick(&mut signal_fail_count),
            move || drop(stop_sub),
        )
        .map_err(SubscriptionError::NoMemory)?;
        *sub.timer.lock().unwrap() = Some(timer);

        if sub.handler.is_some() {
            let worker_sub = Arc::clone(&sub);
            std::thread::Builder::new()
                .name(format!("sub-{id}-worker"))
                .spawn(move || Self::delivery_loop(worker_sub))
                .map_err(SubscriptionError::NoMemory)?;
        }

        Ok(sub)
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    #[must_use]
    pub fn queue_group(&self) -> Option<&QueueGroup> {
        self.queue_group.as_ref()
    }

    /// The connection that owns this subscription.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn on_signal_tick(&self, signal_fail_count: &mut u32) {
        let guard = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(_)) => return,
            Err(TryLockError::WouldBlock) => {
                *signal_fail_count += 1;
                if *signal_fail_count < SIGNAL_FAIL_COUNT_LIMIT {
                    return;
                }
                log::debug!(
                    "subscription {} signal timer falling back to a blocking lock after {} misses",
                    self.id,
                    *signal_fail_count
                );
                *signal_fail_count = 0;
                self.state.lock().unwrap()
            }
        };

        if guard.queue.is_empty() {
            drop(guard);
            if let Some(timer) = self.timer.lock().unwrap().as_ref() {
                timer.reset(self.default_signal_interval);
            }
        } else if guard.in_wait > 0 {
            drop(guard);
            self.cond.notify_all();
        }
    }

    /// Append a message to the subscription's queue, applying the
    /// bounded-buffer slow-consumer policy. Called by the connection
    /// reader; dropped messages are not reported to it.
    pub(crate) fn enqueue(&self, message: Message) {
        let mut guard = self.state.lock().unwrap();
        if guard.closed {
            return;
        }

        if guard.queue.len() >= guard.pending_max {
            guard.slow_consumer = true;
            log::warn!(
                "subscription {} is a slow consumer, dropping message on subject {}",
                self.id,
                self.subject
            );
            return;
        }

        let was_empty = guard.queue.is_empty();
        guard.queue.push_back(message);
        let count = guard.queue.len();
        let should_signal =
            guard.no_delay || count >= guard.signal_limit || (was_empty && guard.in_wait > 0);
        drop(guard);

        if should_signal {
            self.cond.notify_all();
        } else if let Some(timer) = self.timer.lock().unwrap().as_ref() {
            timer.reset(self.short_signal_interval);
        }
    }

    fn delivery_loop(sub: Arc<Subscription>) {
        sub.conn.memory_barrier();

        loop {
            let mut guard = sub.state.lock().unwrap();
            guard.in_wait += 1;
            while guard.queue.is_empty() && !guard.closed {
                guard = sub.cond.wait(guard).unwrap();
            }
            guard.in_wait -= 1;
            if guard.closed {
                return;
            }

            let message = guard
                .queue
                .pop_front()
                .expect("queue non-empty per the loop condition above");
            guard.delivered += 1;
            let delivered = guard.delivered;
            let max = guard.max;
            drop(guard);

            if max == 0 || delivered <= max {
                if let Some(handler) = &sub.handler {
                    handler(&sub.conn, &sub, message);
                }
            }

            if max > 0 && delivered >= max {
                sub.conn.remove_subscription(&sub);
                return;
            }
        }
    }

    /// Block for up to `timeout` for the next message. `Duration::ZERO`
    /// checks the queue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::IllegalState`] if a handler is
    /// registered, [`SubscriptionError::ConnectionClosed`] or
    /// [`SubscriptionError::InvalidSubscription`] if the subscription is no
    /// longer valid, [`SubscriptionError::MaxDeliveredMsgs`] if its
    /// auto-unsubscribe cap has been reached, [`SubscriptionError::SlowConsumer`]
    /// once after an overflow, and [`SubscriptionError::Timeout`] if the
    /// deadline elapses with no message.
    pub fn next_msg(self: &Arc<Self>, timeout: Duration) -> Result<Message, SubscriptionError> {
        let mut guard = self.state.lock().unwrap();

        if guard.conn_closed {
            return Err(SubscriptionError::ConnectionClosed);
        }
        if guard.closed {
            return Err(if guard.max > 0 && guard.delivered >= guard.max {
                SubscriptionError::MaxDeliveredMsgs
            } else {
                SubscriptionError::InvalidSubscription
            });
        }
        if self.handler.is_some() {
            return Err(SubscriptionError::IllegalState);
        }
        if guard.slow_consumer {
            guard.slow_consumer = false;
            return Err(SubscriptionError::SlowConsumer);
        }

        if timeout.is_zero() {
            if guard.queue.is_empty() {
                return Err(SubscriptionError::Timeout);
            }
        } else {
            let deadline = Instant::now() + timeout;
            guard.in_wait += 1;
            while guard.queue.is_empty() && !guard.closed {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (new_guard, _) = self.cond.wait_timeout(guard, deadline - now).unwrap();
                guard = new_guard;
            }
            guard.in_wait -= 1;

            if guard.queue.is_empty() {
                return Err(if guard.closed {
                    SubscriptionError::InvalidSubscription
                } else {
                    SubscriptionError::Timeout
                });
            }
        }

        let message = guard
            .queue
            .pop_front()
            .expect("queue checked non-empty above");
        guard.delivered += 1;
        let delivered = guard.delivered;
        let max = guard.max;
        drop(guard);

        if max > 0 && delivered > max {
            return Err(SubscriptionError::MaxDeliveredMsgs);
        }
        if max > 0 && delivered >= max {
            self.conn.remove_subscription(self);
        }

        Ok(message)
    }

    /// Switch to `noDelay` mode: every enqueue signals immediately and the
    /// signal timer stops. Idempotent.
    pub fn no_delivery_delay(&self) {
        let mut guard = self.state.lock().unwrap();
        if guard.no_delay {
            return;
        }
        guard.no_delay = true;
        drop(guard);

        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.stop();
        }
    }

    /// Remove interest immediately.
    ///
    /// # Errors
    ///
    /// See [`Subscription::next_msg`]'s connection/lifecycle errors.
    pub fn unsubscribe(self: &Arc<Self>) -> Result<(), SubscriptionError> {
        self.do_unsubscribe(0)
    }

    /// Arm automatic removal after `max` deliveries. `max == 0` is
    /// equivalent to an immediate [`Subscription::unsubscribe`].
    ///
    /// # Errors
    ///
    /// See the connection/lifecycle errors documented on
    /// [`Subscription::unsubscribe`].
    pub fn auto_unsubscribe(self: &Arc<Self>, max: u64) -> Result<(), SubscriptionError> {
        self.do_unsubscribe(max)
    }

    fn do_unsubscribe(self: &Arc<Self>, max: u64) -> Result<(), SubscriptionError> {
        {
            let guard = self.state.lock().unwrap();
            if guard.conn_closed {
                return Err(SubscriptionError::ConnectionClosed);
            }
            if guard.closed {
                return Err(SubscriptionError::InvalidSubscription);
            }
        }

        self.conn.send_unsubscribe(self.id, max);

        if max == 0 {
            self.conn.remove_subscription(self);
        } else {
            let mut guard = self.state.lock().unwrap();
            guard.max = max;
            let should_remove = guard.delivered >= max;
            drop(guard);
            if should_remove {
                self.conn.remove_subscription(self);
            }
        }

        Ok(())
    }

    /// Current number of buffered, undelivered messages.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidSubscription`] if the
    /// subscription is closed.
    pub fn queued_msgs(&self) -> Result<usize, SubscriptionError> {
        let guard = self.state.lock().unwrap();
        if guard.closed {
            return Err(SubscriptionError::InvalidSubscription);
        }
        Ok(guard.queue.len())
    }

    /// Whether the subscription is still active.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.state.lock().unwrap().closed
    }

    pub(crate) fn close(&self, conn_closed: bool) {
        let mut guard = self.state.lock().unwrap();
        if guard.closed {
            return;
        }
        guard.closed = true;
        guard.conn_closed = conn_closed;
        drop(guard);

        log::trace!("subscription {} closed (conn_closed={conn_closed})", self.id);

        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.stop();
        }
        self.cond.notify_all();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Best-effort Unsubscribe for a caller that just let its last handle
        // go out of scope instead of calling `unsubscribe()` explicitly.
        if !self.state.lock().unwrap().closed {
            self.conn.send_unsubscribe(self.id, 0);
            self.conn.remove_subscription(self);
        }
    }
}
