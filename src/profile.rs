//! Profiling hooks for event traffic.
//!
//! Tools implement [`EventHandlerProfileTool`]. A link owns a
//! [`LinkSendProfileToolList`] for its send side; handlers carry their own
//! attach points for the receive side.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::event::{Event, EventHandlerMetaData};

/// Opaque per-registration key handed back by a tool.
pub type ProfileKey = u64;

/// A profiling tool observing sends and handler invocations.
pub trait EventHandlerProfileTool: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per attach point. The returned key is passed back on
    /// every notification from that point.
    fn register_handler(&self, mdata: &EventHandlerMetaData) -> ProfileKey;

    fn event_sent(&self, _key: ProfileKey, _event: &Event) {}

    fn handler_start(&self, _key: ProfileKey, _event: Option<&Event>) {}

    fn handler_end(&self, _key: ProfileKey) {}
}

/// Send-side profiling tools of a link, each with its registration key.
#[derive(Default)]
pub struct LinkSendProfileToolList {
    tools: Vec<(Arc<dyn EventHandlerProfileTool>, ProfileKey)>,
}

impl LinkSendProfileToolList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifies every tool, in registration order, that `event` was sent.
    pub fn event_sent(&self, event: &Event) {
        for (tool, key) in &self.tools {
            tool.event_sent(*key, event);
        }
    }

    /// Registers `tool` and records the key it returns.
    pub fn add_profile_tool(&mut self, tool: Arc<dyn EventHandlerProfileTool>, mdata: &EventHandlerMetaData) {
        let key = tool.register_handler(mdata);
        self.tools.push((tool, key));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|(tool, _)| tool.name()).collect()
    }
}

impl fmt::Debug for LinkSendProfileToolList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tool_names()).finish()
    }
}

/// Granularity at which [`EventCountProfileTool`] aggregates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileLevel {
    /// One counter for everything
    #[default]
    Global,
    /// One counter per component type
    Type,
    /// One counter per component
    Component,
    /// One counter per component port
    Port,
}

impl ProfileLevel {
    fn label(&self, mdata: &EventHandlerMetaData) -> String {
        match self {
            ProfileLevel::Global => String::from("global"),
            ProfileLevel::Type => mdata.comp_type.clone(),
            ProfileLevel::Component => mdata.comp_name.clone(),
            ProfileLevel::Port => format!("{}.{}", mdata.comp_name, mdata.port_name),
        }
    }
}

/// Sent/received totals for one label.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub label: String,
    pub sent: u64,
    pub received: u64,
}

#[derive(Default)]
struct CountTable {
    keys: HashMap<String, ProfileKey>,
    entries: Vec<EventCounts>,
}

/// Counts events sent and handled, aggregated at a [`ProfileLevel`].
pub struct EventCountProfileTool {
    name: String,
    level: ProfileLevel,
    table: Mutex<CountTable>,
}

impl EventCountProfileTool {
    pub fn new(name: impl Into<String>, level: ProfileLevel) -> Self {
        Self {
            name: name.into(),
            level,
            table: Mutex::new(CountTable::default()),
        }
    }

    pub fn level(&self) -> ProfileLevel {
        self.level
    }

    pub fn counts_for(&self, label: &str) -> Option<EventCounts> {
        let table = self.table.lock();
        let key = *table.keys.get(label)?;
        table.entries.get(key as usize).cloned()
    }

    /// All counters, in registration order.
    pub fn report(&self) -> Vec<EventCounts> {
        self.table.lock().entries.clone()
    }

    /// Export counters as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        json!({
            "tool": self.name,
            "level": self.level,
            "counts": self.report(),
        })
    }

    fn bump(&self, key: ProfileKey, f: impl FnOnce(&mut EventCounts)) {
        if let Some(entry) = self.table.lock().entries.get_mut(key as usize) {
            f(entry);
        }
    }
}

impl EventHandlerProfileTool for EventCountProfileTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_handler(&self, mdata: &EventHandlerMetaData) -> ProfileKey {
        let label = self.level.label(mdata);
        let mut table = self.table.lock();
        if let Some(key) = table.keys.get(&label) {
            return *key;
        }
        let key = table.entries.len() as ProfileKey;
        table.entries.push(EventCounts {
            label: label.clone(),
            ..Default::default()
        });
        table.keys.insert(label, key);
        key
    }

    fn event_sent(&self, key: ProfileKey, _event: &Event) {
        self.bump(key, |c| c.sent += 1);
    }

    fn handler_start(&self, key: ProfileKey, _event: Option<&Event>) {
        self.bump(key, |c| c.received += 1);
    }
}
