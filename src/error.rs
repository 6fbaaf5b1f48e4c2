//! Error types for link and event operations.
//!
//! Every variant here is a caller bug: the operation was invoked in the wrong
//! phase, on the wrong subtype, or through a handle that no longer names a
//! live link. Conditions that are part of normal operation (an empty queue,
//! a partner that never allocated an init queue, an unset default time base)
//! are reported as `Ok(None)` by the operations themselves and never show up
//! here.

use thiserror::Error;

use crate::link::{LinkHandle, LinkType};
use crate::time::TimeError;

/// Contract violations raised by [`LinkArena`](crate::link::LinkArena).
#[derive(Error, Debug)]
pub enum LinkError {
    #[error(
        "trying to send or recv from link {link} during initialization; \
         send and recv cannot be called before setup"
    )]
    SendDuringInit { link: LinkHandle },

    #[error("trying to call send or recv on link {link} during complete phase")]
    SendDuringComplete { link: LinkHandle },

    #[error("trying to call send_untimed_data or recv_untimed_data on link {link} during the run phase")]
    UntimedDuringRun { link: LinkHandle },

    #[error("cannot call {op} on polling link {link}")]
    HandlerOnPollingLink { op: &'static str, link: LinkHandle },

    #[error("cannot call recv on link {link}: an event handler is installed (non-polling link)")]
    RecvOnNonPolling { link: LinkHandle },

    #[error("link {link} is already configured as {current:?}")]
    AlreadyConfigured { link: LinkHandle, current: LinkType },

    #[error("link {link} has no delivery queue attached")]
    NoDeliveryQueue { link: LinkHandle },

    #[error("link {0} has no paired link")]
    Unpaired(LinkHandle),

    #[error("link handle {0} is stale or was never allocated")]
    StaleHandle(LinkHandle),

    #[error("activity of type {type_name} routed to link {link} is not an event")]
    NotAnEvent { link: LinkHandle, type_name: &'static str },

    #[error("event has no remote delivery link")]
    MissingDeliveryLink,

    #[error("delivery time or latency on link {link} overflows the core clock")]
    TimeOverflow { link: LinkHandle },

    #[error(transparent)]
    Time(#[from] TimeError),
}

/// Errors raised while cloning, executing or decoding events.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("called clone() on an event of type {type_name} that doesn't implement it")]
    CloneUnsupported { type_name: &'static str },

    #[error("event executed without a delivery handler (routing: {routing})")]
    NoHandler { routing: String },

    #[error("unsupported event record version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("event payload could not be decoded: {0}")]
    Payload(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_link() {
        let link = LinkHandle::from_raw(3, 1);
        let err = LinkError::SendDuringInit { link };
        assert!(err.to_string().contains("during initialization"));
        assert!(err.to_string().contains(&link.to_string()));

        let err = LinkError::HandlerOnPollingLink {
            op: "set_functor",
            link,
        };
        assert_eq!(err.to_string(), format!("cannot call set_functor on polling link {}", link));
    }

    #[test]
    fn test_clone_unsupported_message() {
        let err = EventError::CloneUnsupported { type_name: "NullEvent" };
        assert_eq!(
            err.to_string(),
            "called clone() on an event of type NullEvent that doesn't implement it"
        );
    }
}
