//! Anumate Events - Typed publish/subscribe over durable streams
//!
//! Subjects are hierarchical (`events.<domain>.<event>`). Streams define
//! retention by age and size; consumer groups deliver at-least-once with
//! explicit acknowledgement, and deliveries exceeding `max_deliver` land on
//! the stream's dead-letter subject. Events published with the same
//! partition key (the run id) are delivered in publish order.
//!
//! Redaction runs centrally at the publish step: sensitive fields and
//! token-shaped strings never reach a stream.

pub mod bus;
pub mod publisher;
pub mod redact;

pub use bus::*;
pub use publisher::*;
pub use redact::*;

use anumate_types::{ErrorKind, IntoErrorKind};
use thiserror::Error;

/// Event bus errors
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Stream '{stream}' not found")]
    StreamNotFound { stream: String },

    #[error("Consumer group '{group}' not found on stream '{stream}'")]
    ConsumerNotFound { stream: String, group: String },

    #[error("No stream accepts subject '{subject}'")]
    NoMatchingStream { subject: String },

    #[error("Internal event bus error: {0}")]
    Internal(String),
}

pub type EventBusResult<T> = Result<T, EventBusError>;

impl IntoErrorKind for EventBusError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::StreamNotFound { .. } | Self::ConsumerNotFound { .. } => ErrorKind::NotFound,
            Self::NoMatchingStream { .. } => ErrorKind::Validation,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
