use bytes::Bytes;

use crate::{subscription_id::SubscriptionId, Subject};

/// A message delivered to a subscription
///
/// Ownership of a `Message` transfers to whichever consumer pops it off a
/// subscription's queue: the async delivery worker's handler invocation, or
/// the caller of a synchronous fetch. Once handed off, no other code touches
/// it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subscription_id: SubscriptionId,
    pub subject: Subject,
    pub reply_subject: Option<Subject>,
    pub payload: Bytes,
}
