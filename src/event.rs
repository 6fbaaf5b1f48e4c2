//! Event definitions.
//!
//! Events are the messages links carry between components. An [`Event`]
//! embeds an [`Activity`] for ordering, a [`RoutingTarget`] saying where it
//! goes when it fires, and a body: a user payload, nothing at all
//! ([`EventBody::Empty`]), or the sentinel produced when a caller sends
//! `None` ([`EventBody::Null`]).
//!
//! # Wire format
//!
//! [`Event::to_record`] and [`Event::from_record`] go through the versioned
//! [`EventRecord`]. Its field order is part of the format: activity fields,
//! routing, provenance, payload. Provenance is an optional field rather than
//! a conditionally present one, so builds with and without the
//! `event-tracking` feature read each other's records.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::activity::{priority, Activity, Schedulable};
use crate::context::SimContext;
use crate::error::EventError;
use crate::handler::HandlerRef;
use crate::link::LinkHandle;
use crate::registry::PayloadRegistry;
use crate::types::{ComponentId, LinkTag, SimTime};

/// Current version of [`EventRecord`].
pub const EVENT_RECORD_VERSION: u32 = 1;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier unique across ranks, components and events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    /// Value of the process-wide counter when the id was generated
    pub counter: u64,
    /// Rank that generated it
    pub rank: i32,
}

impl EventId {
    /// Placeholder for "no id assigned".
    pub const NO_ID: EventId = EventId {
        counter: 0,
        rank: -1,
    };
}

/// Payload carried by an event.
///
/// Implementors provide `as_any`/`into_any` so receivers can downcast.
/// Payloads that can be broadcast override [`clone_payload`]. Payloads that
/// cross process boundaries are registered in a [`PayloadRegistry`], which
/// encodes and decodes them through serde; [`encode`] overrides the encoding
/// for a single type.
///
/// [`clone_payload`]: EventPayload::clone_payload
/// [`encode`]: EventPayload::encode
pub trait EventPayload: Any + Send + fmt::Debug {
    /// Name used on the wire and in diagnostics.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Deep copy for broadcast. `None` means cloning is unsupported.
    fn clone_payload(&self) -> Option<Box<dyn EventPayload>> {
        None
    }

    /// Hand-written serialized form. `None` defers to the registry.
    fn encode(&self) -> Option<serde_json::Value> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// What an event carries.
#[derive(Debug)]
pub enum EventBody {
    /// Sentinel for a send with no event; the handler receives `None`
    Null,
    /// An event with no payload
    Empty,
    /// User payload
    Payload(Box<dyn EventPayload>),
}

/// Where an event goes when it reaches the head of its queue.
#[derive(Clone, Default)]
pub enum RoutingTarget {
    /// Nothing installed yet
    #[default]
    Unset,
    /// Local delivery: invoke this handler
    Handler(HandlerRef),
    /// Parked at a synchronization point: re-send on this link of the
    /// receiving partition
    Remote(LinkHandle),
}

impl RoutingTarget {
    /// Returns true unless this is [`RoutingTarget::Unset`].
    pub fn is_set(&self) -> bool {
        !matches!(self, RoutingTarget::Unset)
    }

    /// Returns the handler for local delivery.
    pub fn handler(&self) -> Option<&HandlerRef> {
        match self {
            RoutingTarget::Handler(h) => Some(h),
            _ => None,
        }
    }

    /// Returns the link to re-send on after synchronization.
    pub fn remote_link(&self) -> Option<LinkHandle> {
        match self {
            RoutingTarget::Remote(link) => Some(*link),
            _ => None,
        }
    }
}

impl fmt::Debug for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingTarget::Unset => write!(f, "Unset"),
            RoutingTarget::Handler(h) => match h.try_lock() {
                Some(handler) => write!(f, "Handler({})", handler.label()),
                None => write!(f, "Handler(<busy>)"),
            },
            RoutingTarget::Remote(link) => write!(f, "Remote({})", link),
        }
    }
}

/// Description of a handler registration, given to profiling tools.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventHandlerMetaData {
    pub comp_id: ComponentId,
    pub comp_name: String,
    pub comp_type: String,
    pub port_name: String,
}

impl EventHandlerMetaData {
    pub fn new(
        comp_id: ComponentId,
        comp_name: impl Into<String>,
        comp_type: impl Into<String>,
        port_name: impl Into<String>,
    ) -> Self {
        Self {
            comp_id,
            comp_name: comp_name.into(),
            comp_type: comp_type.into(),
            port_name: port_name.into(),
        }
    }
}

/// Provenance of an event: who first sent it and who last received it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTracking {
    pub first_comp: String,
    pub first_type: String,
    pub first_port: String,
    pub last_comp: String,
    pub last_type: String,
    pub last_port: String,
}

impl EventTracking {
    /// Records the sender, only the first time.
    pub fn add_send_component(&mut self, comp: &str, ctype: &str, port: &str) {
        if self.first_comp.is_empty() {
            self.first_comp = comp.to_string();
            self.first_type = ctype.to_string();
            self.first_port = port.to_string();
        }
    }

    /// Records the receiver, overwriting any previous one.
    pub fn add_recv_component(&mut self, comp: &str, ctype: &str, port: &str) {
        self.last_comp = comp.to_string();
        self.last_type = ctype.to_string();
        self.last_port = port.to_string();
    }
}

impl fmt::Display for EventTracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "first sent from: {}:{} (type: {}) and last received by {}:{} (type: {})",
            self.first_comp, self.first_port, self.first_type, self.last_comp, self.last_port, self.last_type
        )
    }
}

/// A message delivered over a link.
#[derive(Debug)]
pub struct Event {
    activity: Activity,
    routing: RoutingTarget,
    body: EventBody,
    #[cfg(feature = "event-tracking")]
    tracking: EventTracking,
}

impl Event {
    fn with_body(body: EventBody) -> Self {
        let mut activity = Activity::new();
        activity.set_priority(priority::EVENT);
        Self {
            activity,
            routing: RoutingTarget::Unset,
            body,
            #[cfg(feature = "event-tracking")]
            tracking: EventTracking::default(),
        }
    }

    /// Creates an event carrying `payload`.
    pub fn new(payload: impl EventPayload) -> Self {
        Self::with_body(EventBody::Payload(Box::new(payload)))
    }

    /// Creates an event from an already boxed payload.
    pub fn from_boxed(payload: Box<dyn EventPayload>) -> Self {
        Self::with_body(EventBody::Payload(payload))
    }

    /// Creates an event with no payload.
    pub fn empty() -> Self {
        Self::with_body(EventBody::Empty)
    }

    /// The sentinel substituted for a `None` send.
    pub(crate) fn null() -> Self {
        Self::with_body(EventBody::Null)
    }

    /// Returns true for the sentinel created by a `None` send.
    pub fn is_null(&self) -> bool {
        matches!(self.body, EventBody::Null)
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    /// Returns the payload, if any.
    pub fn payload(&self) -> Option<&dyn EventPayload> {
        match &self.body {
            EventBody::Payload(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    /// Downcasts the payload to a concrete type.
    pub fn payload_as<T: EventPayload>(&self) -> Option<&T> {
        self.payload().and_then(|p| p.as_any().downcast_ref::<T>())
    }

    /// Consumes the event and returns its payload.
    pub fn into_payload(self) -> Option<Box<dyn EventPayload>> {
        match self.body {
            EventBody::Payload(p) => Some(p),
            _ => None,
        }
    }

    pub fn delivery_time(&self) -> SimTime {
        self.activity.delivery_time()
    }

    pub fn set_delivery_time(&mut self, time: SimTime) {
        self.activity.set_delivery_time(time);
    }

    pub fn priority(&self) -> u32 {
        self.activity.priority()
    }

    /// Sets the priority class; the order tag is preserved.
    pub fn set_priority(&mut self, priority: u32) {
        self.activity.set_priority(priority);
    }

    /// The tag of the link this event was last sent on.
    pub fn tag(&self) -> LinkTag {
        self.activity.order_tag()
    }

    pub fn routing(&self) -> &RoutingTarget {
        &self.routing
    }

    /// The link to re-send on after crossing a synchronization point.
    pub fn delivery_link(&self) -> Option<LinkHandle> {
        self.routing.remote_link()
    }

    /// Stamps the order tag and routing for the next step of the transfer.
    pub(crate) fn set_delivery_info(&mut self, tag: LinkTag, routing: RoutingTarget) {
        self.activity.set_order_tag(tag);
        self.routing = routing;
    }

    /// Generates an id unique across ranks. The event does not cache it.
    pub fn generate_unique_id(ctx: &dyn SimContext) -> EventId {
        EventId {
            counter: ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            rank: ctx.rank().rank as i32,
        }
    }

    /// Clones the event for a broadcast.
    ///
    /// Only payloads that implement [`EventPayload::clone_payload`] can be
    /// cloned; everything else is a caller error.
    pub fn try_clone(&self) -> Result<Event, EventError> {
        let body = match &self.body {
            EventBody::Payload(p) => match p.clone_payload() {
                Some(copy) => EventBody::Payload(copy),
                None => {
                    return Err(EventError::CloneUnsupported {
                        type_name: p.type_name(),
                    })
                }
            },
            _ => {
                return Err(EventError::CloneUnsupported {
                    type_name: self.class_name(),
                })
            }
        };
        Ok(Self {
            activity: self.activity,
            routing: self.routing.clone(),
            body,
            #[cfg(feature = "event-tracking")]
            tracking: self.tracking.clone(),
        })
    }

    fn class_name(&self) -> &'static str {
        match &self.body {
            EventBody::Null => "NullEvent",
            EventBody::Empty => "EmptyEvent",
            EventBody::Payload(p) => p.type_name(),
        }
    }

    #[cfg(feature = "event-tracking")]
    pub fn tracking(&self) -> &EventTracking {
        &self.tracking
    }

    #[cfg(feature = "event-tracking")]
    pub fn add_send_component(&mut self, comp: &str, ctype: &str, port: &str) {
        self.tracking.add_send_component(comp, ctype, port);
    }

    #[cfg(feature = "event-tracking")]
    pub fn add_recv_component(&mut self, comp: &str, ctype: &str, port: &str) {
        self.tracking.add_recv_component(comp, ctype, port);
    }

    /// Converts to the wire record. Payloads are encoded through `registry`.
    ///
    /// Handler routing is only meaningful inside one process and is written
    /// as [`WireRouting::LocalHandler`]. Fails if the payload has neither a
    /// hand-written encoding nor a registered encoder.
    pub fn to_record(&self, registry: &PayloadRegistry) -> Result<EventRecord, EventError> {
        let routing = match &self.routing {
            RoutingTarget::Unset => WireRouting::Unset,
            RoutingTarget::Handler(_) => WireRouting::LocalHandler,
            RoutingTarget::Remote(link) => WireRouting::Remote { link: *link },
        };
        let body = match &self.body {
            EventBody::Null => WireBody::Null,
            EventBody::Empty => WireBody::Empty,
            EventBody::Payload(p) => WireBody::Payload {
                type_name: p.type_name().to_string(),
                data: registry.encode(&**p)?,
            },
        };

        #[cfg(feature = "event-tracking")]
        let tracking = Some(self.tracking.clone());
        #[cfg(not(feature = "event-tracking"))]
        let tracking = None;

        Ok(EventRecord {
            version: EVENT_RECORD_VERSION,
            delivery_time: self.activity.delivery_time(),
            priority_order: self.activity.priority_order(),
            queue_order: self.activity.queue_order(),
            routing,
            tracking,
            body,
        })
    }

    /// Rebuilds an event from a wire record. Payloads are decoded through
    /// `registry`.
    pub fn from_record(record: EventRecord, registry: &PayloadRegistry) -> Result<Event, EventError> {
        if record.version > EVENT_RECORD_VERSION {
            return Err(EventError::UnsupportedVersion {
                found: record.version,
                supported: EVENT_RECORD_VERSION,
            });
        }

        let body = match record.body {
            WireBody::Null => EventBody::Null,
            WireBody::Empty => EventBody::Empty,
            WireBody::Payload { type_name, data } => EventBody::Payload(registry.decode(&type_name, data)?),
        };
        let routing = match record.routing {
            WireRouting::Remote { link } => RoutingTarget::Remote(link),
            WireRouting::Unset | WireRouting::LocalHandler => RoutingTarget::Unset,
        };

        #[cfg(not(feature = "event-tracking"))]
        if record.tracking.is_some() {
            tracing::trace!("dropping provenance from record written with event tracking");
        }

        Ok(Self {
            activity: Activity::from_parts(record.delivery_time, record.priority_order, record.queue_order),
            routing,
            body,
            #[cfg(feature = "event-tracking")]
            tracking: record.tracking.unwrap_or_default(),
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to be delivered at {}",
            self.class_name(),
            self.activity.delivery_time_info()
        )
    }
}

impl Schedulable for Event {
    fn activity(&self) -> &Activity {
        &self.activity
    }

    fn activity_mut(&mut self) -> &mut Activity {
        &mut self.activity
    }

    /// Hands the event to its handler. The sentinel hands over `None` and is
    /// dropped here.
    fn execute(self: Box<Self>) -> Result<(), EventError> {
        let handler = match &self.routing {
            RoutingTarget::Handler(h) => Arc::clone(h),
            other => {
                return Err(EventError::NoHandler {
                    routing: format!("{:?}", other),
                })
            }
        };
        let mut handler = handler.lock();
        if self.is_null() {
            handler.call(None);
        } else {
            handler.call(Some(self));
        }
        Ok(())
    }

    fn into_event(self: Box<Self>) -> Result<Box<Event>, Box<dyn Schedulable>> {
        Ok(self)
    }

    fn type_name(&self) -> &'static str {
        self.class_name()
    }
}

/// Routing as written on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireRouting {
    Unset,
    LocalHandler,
    Remote { link: LinkHandle },
}

/// Body as written on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireBody {
    Null,
    Empty,
    Payload {
        type_name: String,
        data: serde_json::Value,
    },
}

/// Versioned, field-ordered serialized form of an [`Event`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub version: u32,
    pub delivery_time: SimTime,
    pub priority_order: u64,
    pub queue_order: u64,
    pub routing: WireRouting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<EventTracking>,
    pub body: WireBody,
}

impl EventRecord {
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(json)?)
    }
}
