//! Errors surfaced by the subscription core

/// An error returned by one of the subscription core's operations
///
/// Each variant corresponds to a stable error identity: callers can match on
/// the variant to decide how to react, independently of the message text.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SubscriptionError {
    /// A required argument was missing or malformed (e.g. an empty queue
    /// group, or a handler missing on a queue-subscribe variant).
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// A helper thread (delivery worker or signal timer) failed to spawn.
    #[error("failed to spawn a helper thread: {0}")]
    NoMemory(#[source] std::io::Error),

    /// The operation was attempted on a subscription whose owning
    /// connection has already closed.
    #[error("the connection is closed")]
    ConnectionClosed,

    /// The operation was attempted on a subscription that is already
    /// closed, for a reason other than connection closure or delivery cap
    /// exhaustion.
    #[error("the subscription is no longer valid")]
    InvalidSubscription,

    /// A synchronous fetch was attempted on a subscription that has
    /// already reached its auto-unsubscribe delivery cap.
    #[error("the subscription has reached its maximum delivered messages")]
    MaxDeliveredMsgs,

    /// A synchronous fetch was attempted on a subscription that has a
    /// handler registered (i.e. an asynchronous subscription).
    #[error("cannot call next_msg on a subscription with a registered handler")]
    IllegalState,

    /// The subscription's buffer overflowed at least once since the last
    /// time this error was surfaced. One-shot: observing it clears the
    /// flag.
    #[error("this subscription is a slow consumer, messages have been dropped")]
    SlowConsumer,

    /// A synchronous fetch's deadline elapsed before a message arrived.
    #[error("timed out waiting for a message")]
    Timeout,
}
