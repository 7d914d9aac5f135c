//! Value types shared by the subscription core and its collaborators
//!
//! This crate deliberately has no notion of wire I/O: it only knows how to
//! validate and hold [`Subject`], [`QueueGroup`] and [`Message`] values.

pub use self::message::Message;
pub use self::queue_group::QueueGroup;
pub use self::subject::Subject;
pub use self::subscription_id::SubscriptionId;

mod message;
mod queue_group;
mod subject;
mod subscription_id;

pub mod error {
    //! Validation errors for this crate's value types

    pub use super::queue_group::QueueGroupValidateError;
    pub use super::subject::SubjectValidateError;
}
