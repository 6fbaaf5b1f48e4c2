//! # simlink
//!
//! Event delivery substrate for a parallel discrete-event simulation kernel.
//!
//! Components talk to each other through paired [`Link`]s. A send stamps an
//! [`Event`] with its delivery time and routing and drops it into a queue
//! that the *receiving* side installed: the dispatcher's time vortex for a
//! handler link, a private queue for a polling link, a boundary buffer for a
//! link whose peer lives in another partition.
//!
//! ## Design Principles
//!
//! - **Deterministic ordering**: queues order by delivery time, then
//!   priority and link order tag, then insertion order. Order tags come from
//!   sorted link names, never from the order sends happen in.
//! - **Explicit context**: link operations take a [`SimContext`] instead of
//!   reaching for a global simulation object.
//! - **Owned topology**: links live in a [`LinkArena`] and name each other by
//!   generational [`LinkHandle`]s.
//! - **Phases**: untimed data before and after the run, timed sends during
//!   it. Using the wrong one is an error.
//!
//! ## Features
//!
//! - `event-tracking` - record the first sender and last receiver of every
//!   event
//!
//! ## Quick Start
//!
//! ```rust
//! use simlink::{EndpointConfig, Event, EventHandler, LinkArena, SimConfigBuilder, SimContext};
//!
//! let config = SimConfigBuilder::new()
//!     .timebase("1ps")
//!     .add_link(
//!         "cpu_mem",
//!         Some("1ns"),
//!         EndpointConfig::new("cpu0", "mem"),
//!         EndpointConfig::new("mem0", "cpu"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut sim = config.create_simulation().unwrap();
//! let mut arena = LinkArena::new();
//! let links = config.build(&mut arena, sim.time_authority()).unwrap();
//! let link = *links.get("cpu_mem").unwrap();
//!
//! arena.set_functor(link.right, EventHandler::new(|ev| assert!(ev.is_some()))).unwrap();
//! arena.finalize_configuration(link.left, &sim).unwrap();
//! arena.finalize_configuration(link.right, &sim).unwrap();
//!
//! arena.send_impl(link.left, &sim, 0, Some(Event::empty())).unwrap();
//! sim.run().unwrap();
//! assert_eq!(sim.current_cycle(), 1000);
//! ```

pub mod types;
pub mod activity;
pub mod error;
pub mod time;
pub mod event;
pub mod handler;
pub mod profile;
pub mod queue;
pub mod context;
pub mod link;
pub mod sync;
pub mod config;
pub mod registry;
pub mod stats;

// Re-export commonly used types
pub use types::{ComponentId, Cycle, LinkTag, RankInfo, SimTime};
pub use activity::{priority, Activity, ActivityOrdering, DeliveryOrder, Greater, Less, Schedulable};
pub use error::{EventError, LinkError, LinkResult};
pub use time::{TimeAuthority, TimeConverter, TimeError, TimeLord};
pub use event::{Event, EventBody, EventHandlerMetaData, EventId, EventPayload, EventRecord, RoutingTarget};
pub use handler::{EventHandler, HandlerRef};
pub use profile::{EventCountProfileTool, EventHandlerProfileTool, LinkSendProfileToolList, ProfileKey, ProfileLevel};
pub use queue::{ActivityQueue, InitQueue, PollingLinkQueue, QueueKind, QueueRef, TimeVortex};
pub use context::{SimContext, Simulation};
pub use link::{HandlerLink, Link, LinkArena, LinkEndpoint, LinkHandle, LinkMode, LinkType, PollingLink};
pub use sync::{SharedSyncQueue, SyncQueue};
pub use config::{ConfigError, EndpointConfig, SimConfig, SimConfigBuilder};
pub use registry::PayloadRegistry;
pub use stats::{KernelStats, LinkCounters, StatsCollector, Timer};

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG`, when set, takes precedence over `level`.
///
/// # Example
///
/// ```rust,ignore
/// simlink::init_logging("debug");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
