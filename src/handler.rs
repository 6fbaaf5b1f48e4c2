//! Event handlers.
//!
//! A handler is the receive-side callback of a link. It is shared between the
//! link that routes to it and every event in flight towards it, hence
//! [`HandlerRef`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::{Event, EventHandlerMetaData};
use crate::profile::{EventHandlerProfileTool, ProfileKey};

/// Shared, lockable handler.
pub type HandlerRef = Arc<Mutex<EventHandler>>;

type Callback = Box<dyn FnMut(Option<Box<Event>>) + Send>;

/// Callback invoked when an event is delivered.
///
/// # Example
///
/// ```
/// use simlink::handler::EventHandler;
///
/// let mut handler = EventHandler::new(|ev| {
///     assert!(ev.is_none());
/// })
/// .with_label("cpu0.mem");
///
/// handler.call(None);
/// assert_eq!(handler.invocations(), 1);
/// ```
pub struct EventHandler {
    label: String,
    callback: Callback,
    attach_points: Vec<(Arc<dyn EventHandlerProfileTool>, ProfileKey)>,
    invocations: u64,
}

impl EventHandler {
    /// Creates a handler from a closure.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(Option<Box<Event>>) + Send + 'static,
    {
        Self {
            label: String::from("handler"),
            callback: Box::new(callback),
            attach_points: Vec::new(),
            invocations: 0,
        }
    }

    /// Sets a label used in diagnostics.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of times the handler has run.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Wraps the handler for sharing.
    pub fn into_ref(self) -> HandlerRef {
        Arc::new(Mutex::new(self))
    }

    /// Registers a receive-side profiling tool.
    pub fn attach_profile_tool(&mut self, tool: Arc<dyn EventHandlerProfileTool>, mdata: &EventHandlerMetaData) {
        let key = tool.register_handler(mdata);
        self.attach_points.push((tool, key));
    }

    pub fn profile_tool_count(&self) -> usize {
        self.attach_points.len()
    }

    /// Moves the profiling attach points of `from` onto this handler.
    pub fn transfer_profiling_info(&mut self, from: &mut EventHandler) {
        self.attach_points.append(&mut from.attach_points);
    }

    /// Invokes the callback, bracketed by the attached profiling tools.
    pub fn call(&mut self, event: Option<Box<Event>>) {
        for (tool, key) in &self.attach_points {
            tool.handler_start(*key, event.as_deref());
        }
        self.invocations += 1;
        (self.callback)(event);
        for (tool, key) in &self.attach_points {
            tool.handler_end(*key);
        }
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("label", &self.label)
            .field("profile_tools", &self.attach_points.len())
            .field("invocations", &self.invocations)
            .finish()
    }
}
