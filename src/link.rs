//! Links: paired channel endpoints.
//!
//! A link is one half of a bidirectional connection between two components.
//! Sends on a link always land in a queue that belongs to the receiving side:
//! when a link is finalized it installs, on its *partner*, the queue matching
//! its own consumption discipline (the dispatcher's time vortex for a handler
//! link, a private polling queue for a polling link). Handler routing works
//! the same way: `set_functor` on one half writes the routing of the other.
//!
//! Links live in a [`LinkArena`] and are addressed by generational
//! [`LinkHandle`]s, so a handle to a destroyed link is detected rather than
//! followed.
//!
//! # Lifecycle
//!
//! ```text
//!  Init ──finalize_configuration──▶ Run ──prepare_for_complete──▶ Complete
//!  (untimed data only)              (timed send/recv)             (untimed data only)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use simlink::context::Simulation;
//! use simlink::event::Event;
//! use simlink::handler::EventHandler;
//! use simlink::link::{LinkArena, LinkEndpoint};
//!
//! let mut sim = Simulation::with_timebase("1ps").unwrap();
//! let mut arena = LinkArena::new();
//! let (cpu, mem) = arena.create_pair(
//!     LinkEndpoint::new(1, "cpu0", "Core", "mem"),
//!     LinkEndpoint::new(2, "mem0", "Dram", "cpu"),
//!     0,
//! );
//!
//! let arrivals = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&arrivals);
//! arena
//!     .set_functor(mem, EventHandler::new(move |ev| {
//!         if let Some(ev) = ev {
//!             sink.lock().push(ev.delivery_time());
//!         }
//!     }))
//!     .unwrap();
//! arena.set_latency(cpu, 100).unwrap();
//!
//! arena.finalize_configuration(cpu, &sim).unwrap();
//! arena.finalize_configuration(mem, &sim).unwrap();
//!
//! arena.send_impl(cpu, &sim, 5, Some(Event::empty())).unwrap();
//! sim.run().unwrap();
//! assert_eq!(*arrivals.lock(), vec![105]);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::activity::Schedulable;
use crate::context::SimContext;
use crate::error::{LinkError, LinkResult};
use crate::event::{Event, EventHandlerMetaData, RoutingTarget};
use crate::handler::EventHandler;
use crate::profile::{EventHandlerProfileTool, LinkSendProfileToolList};
use crate::queue::{share, InitQueue, PollingLinkQueue, QueueKind, QueueRef};
use crate::stats::LinkCounters;
use crate::time::TimeConverter;
use crate::types::{ComponentId, Cycle, LinkTag, SimTime};

/// Stable address of a link inside a [`LinkArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkHandle {
    index: u32,
    generation: u32,
}

impl LinkHandle {
    /// Builds a handle from its raw parts, e.g. after reading one off the
    /// wire.
    pub fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}v{}", self.index, self.generation)
    }
}

/// Delivery discipline of a link. Set at most once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    #[default]
    Uninitialized,
    /// Events are delivered to a handler by the dispatcher
    Handler,
    /// Events are pulled with `recv`
    Poll,
    /// Boundary half owned by the synchronization subsystem
    Sync,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkType::Uninitialized => "uninitialized",
            LinkType::Handler => "handler",
            LinkType::Poll => "poll",
            LinkType::Sync => "sync",
        };
        f.write_str(name)
    }
}

/// Simulation phase a link is in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    #[default]
    Init,
    Run,
    Complete,
}

/// Identity of the component port a link belongs to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub comp_id: ComponentId,
    pub component: String,
    pub comp_type: String,
    pub port: String,
}

impl LinkEndpoint {
    pub fn new(
        comp_id: ComponentId,
        component: impl Into<String>,
        comp_type: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            comp_id,
            component: component.into(),
            comp_type: comp_type.into(),
            port: port.into(),
        }
    }

    /// Metadata handed to profiling tools.
    pub fn metadata(&self) -> EventHandlerMetaData {
        EventHandlerMetaData::new(self.comp_id, &self.component, &self.comp_type, &self.port)
    }
}

impl fmt::Display for LinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.port)
    }
}

/// One half of a link pair.
pub struct Link {
    /// Queue sends go into; installed by the partner
    pub(crate) send_queue: Option<QueueRef>,
    /// Stamped on outgoing events; written by the partner
    pub(crate) routing: RoutingTarget,
    /// Core cycles per unit of the default time base, 0 when unset
    pub(crate) default_time_base: SimTime,
    pub(crate) latency: SimTime,
    pub(crate) pair: Option<LinkHandle>,
    pub(crate) link_type: LinkType,
    pub(crate) mode: LinkMode,
    pub(crate) tag: LinkTag,
    pub(crate) profile_tools: Option<LinkSendProfileToolList>,
    pub(crate) endpoint: LinkEndpoint,
    pub(crate) counters: LinkCounters,
}

impl Link {
    fn new(tag: LinkTag, endpoint: LinkEndpoint) -> Self {
        Self {
            send_queue: None,
            routing: RoutingTarget::Unset,
            default_time_base: 0,
            latency: 1,
            pair: None,
            link_type: LinkType::Uninitialized,
            mode: LinkMode::Init,
            tag,
            profile_tools: None,
            endpoint,
            counters: LinkCounters::default(),
        }
    }

    pub fn tag(&self) -> LinkTag {
        self.tag
    }

    pub fn latency(&self) -> SimTime {
        self.latency
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn pair(&self) -> Option<LinkHandle> {
        self.pair
    }

    pub fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    pub fn counters(&self) -> &LinkCounters {
        &self.counters
    }

    pub fn routing(&self) -> &RoutingTarget {
        &self.routing
    }

    /// Kind of the queue this link currently sends into.
    pub fn send_queue_kind(&self) -> Option<QueueKind> {
        self.send_queue.as_ref().map(|q| q.lock().kind())
    }

    /// Number of items waiting in the queue this link sends into.
    pub fn send_queue_len(&self) -> usize {
        self.send_queue.as_ref().map_or(0, |q| q.lock().len())
    }

    pub fn profile_tool_count(&self) -> usize {
        self.profile_tools.as_ref().map_or(0, |t| t.len())
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("endpoint", &self.endpoint)
            .field("type", &self.link_type)
            .field("mode", &self.mode)
            .field("tag", &self.tag)
            .field("latency", &self.latency)
            .field("pair", &self.pair)
            .field("routing", &self.routing)
            .field("send_queue", &self.send_queue_kind())
            .finish()
    }
}

/// A link configured for handler delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerLink(LinkHandle);

impl HandlerLink {
    pub fn handle(&self) -> LinkHandle {
        self.0
    }

    /// Swaps the handler; see [`LinkArena::replace_functor`].
    pub fn replace_functor(&self, arena: &mut LinkArena, handler: EventHandler) -> LinkResult<()> {
        arena.replace_functor(self.0, handler).map(|_| ())
    }
}

/// A link configured for polling.
///
/// Has no handler operations; events are taken with [`recv`](Self::recv).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PollingLink(LinkHandle);

impl PollingLink {
    pub fn handle(&self) -> LinkHandle {
        self.0
    }

    pub fn recv(&self, arena: &mut LinkArena, ctx: &dyn SimContext) -> LinkResult<Option<Box<Event>>> {
        arena.recv(self.0, ctx)
    }
}

struct Slot {
    generation: u32,
    link: Option<Link>,
}

/// Owner of every link in a partition.
#[derive(Default)]
pub struct LinkArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl LinkArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live links.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, handle: LinkHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Handles of every live link, in slot order.
    pub fn handles(&self) -> impl Iterator<Item = LinkHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.link
                .as_ref()
                .map(|_| LinkHandle::from_raw(index as u32, slot.generation))
        })
    }

    pub fn get(&self, handle: LinkHandle) -> LinkResult<&Link> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.link.as_ref())
            .ok_or(LinkError::StaleHandle(handle))
    }

    pub(crate) fn get_mut(&mut self, handle: LinkHandle) -> LinkResult<&mut Link> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.link.as_mut())
            .ok_or(LinkError::StaleHandle(handle))
    }

    fn insert(&mut self, link: Link) -> LinkHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.link = Some(link);
            return LinkHandle::from_raw(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            link: Some(link),
        });
        LinkHandle::from_raw(index, 0)
    }

    fn remove(&mut self, handle: LinkHandle) -> Option<Link> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let link = slot.link.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(link)
    }

    /// The live partner of `handle`.
    pub fn partner(&self, handle: LinkHandle) -> LinkResult<LinkHandle> {
        let pair = self.get(handle)?.pair.ok_or(LinkError::Unpaired(handle))?;
        self.get(pair)?;
        Ok(pair)
    }

    /// Creates two links paired with each other, sharing `tag`.
    pub fn create_pair(&mut self, left: LinkEndpoint, right: LinkEndpoint, tag: LinkTag) -> (LinkHandle, LinkHandle) {
        let l = self.insert(Link::new(tag, left));
        let r = self.insert(Link::new(tag, right));
        self.pair_up(l, r);
        tracing::debug!(left = %l, right = %r, tag, "created link pair");
        (l, r)
    }

    /// Creates a local link whose partner is a SYNC half standing in for the
    /// remote side. Returns `(local, sync)`.
    ///
    /// The SYNC half belongs to the local link: destroying the local link
    /// destroys it.
    pub fn create_sync_pair(&mut self, endpoint: LinkEndpoint, tag: LinkTag) -> (LinkHandle, LinkHandle) {
        let sync_endpoint = LinkEndpoint::new(endpoint.comp_id, "sync", "SyncManager", endpoint.port.clone());
        let local = self.insert(Link::new(tag, endpoint));
        let mut sync_link = Link::new(tag, sync_endpoint);
        sync_link.link_type = LinkType::Sync;
        let sync = self.insert(sync_link);
        self.pair_up(local, sync);
        tracing::debug!(local = %local, sync = %sync, tag, "created sync pair");
        (local, sync)
    }

    /// Hands an unconfigured link over to the synchronization subsystem.
    pub fn set_sync(&mut self, handle: LinkHandle) -> LinkResult<()> {
        let link = self.get_mut(handle)?;
        match link.link_type {
            LinkType::Uninitialized | LinkType::Sync => {
                link.link_type = LinkType::Sync;
                Ok(())
            }
            current => Err(LinkError::AlreadyConfigured { link: handle, current }),
        }
    }

    fn pair_up(&mut self, a: LinkHandle, b: LinkHandle) {
        if let Ok(link) = self.get_mut(a) {
            link.pair = Some(b);
        }
        if let Ok(link) = self.get_mut(b) {
            link.pair = Some(a);
        }
    }

    /// Configures `handle` for polling delivery.
    pub fn set_polling(&mut self, handle: LinkHandle) -> LinkResult<PollingLink> {
        let link = self.get_mut(handle)?;
        match link.link_type {
            LinkType::Uninitialized | LinkType::Poll => {
                link.link_type = LinkType::Poll;
                Ok(PollingLink(handle))
            }
            current => Err(LinkError::AlreadyConfigured { link: handle, current }),
        }
    }

    /// Installs the handler that events arriving on `handle` are delivered
    /// to. The handler is stored as the partner's routing, since that is what
    /// the partner stamps on its sends.
    pub fn set_functor(&mut self, handle: LinkHandle, handler: EventHandler) -> LinkResult<HandlerLink> {
        let pair = self.partner(handle)?;
        let link = self.get_mut(handle)?;
        match link.link_type {
            LinkType::Uninitialized => {}
            LinkType::Poll => {
                return Err(LinkError::HandlerOnPollingLink {
                    op: "set_functor",
                    link: handle,
                })
            }
            current => return Err(LinkError::AlreadyConfigured { link: handle, current }),
        }
        link.link_type = LinkType::Handler;
        self.get_mut(pair)?.routing = RoutingTarget::Handler(handler.into_ref());
        tracing::debug!(link = %handle, "handler installed");
        Ok(HandlerLink(handle))
    }

    /// Replaces the handler of `handle`, moving profiling attach points from
    /// the old handler to the new one. Events already queued keep the old
    /// handler, which is released once the last of them has run.
    pub fn replace_functor(&mut self, handle: LinkHandle, handler: EventHandler) -> LinkResult<HandlerLink> {
        let pair = self.partner(handle)?;
        let link = self.get_mut(handle)?;
        match link.link_type {
            LinkType::Uninitialized | LinkType::Handler => {}
            LinkType::Poll => {
                return Err(LinkError::HandlerOnPollingLink {
                    op: "replace_functor",
                    link: handle,
                })
            }
            current => return Err(LinkError::AlreadyConfigured { link: handle, current }),
        }
        link.link_type = LinkType::Handler;

        let mut handler = handler;
        let partner = self.get_mut(pair)?;
        if let RoutingTarget::Handler(old) = std::mem::take(&mut partner.routing) {
            handler.transfer_profiling_info(&mut old.lock());
        }
        partner.routing = RoutingTarget::Handler(handler.into_ref());
        tracing::debug!(link = %handle, "handler replaced");
        Ok(HandlerLink(handle))
    }

    /// Registers a send-side profiling tool.
    pub fn add_profile_tool(
        &mut self,
        handle: LinkHandle,
        tool: Arc<dyn EventHandlerProfileTool>,
        mdata: &EventHandlerMetaData,
    ) -> LinkResult<()> {
        self.get_mut(handle)?
            .profile_tools
            .get_or_insert_with(LinkSendProfileToolList::new)
            .add_profile_tool(tool, mdata);
        Ok(())
    }

    /// Moves `handle` from Init to Run and installs the delivery queue on
    /// its partner.
    pub fn finalize_configuration(&mut self, handle: LinkHandle, ctx: &dyn SimContext) -> LinkResult<()> {
        let link = self.get_mut(handle)?;
        link.mode = LinkMode::Run;
        let link_type = link.link_type;
        let pair = link.pair;

        if link_type == LinkType::Sync {
            // Nothing else reaches a SYNC partner of a SYNC half
            if let Some(pair) = pair {
                let partner = self.get(pair)?;
                if partner.link_type == LinkType::Sync && partner.mode == LinkMode::Init {
                    self.finalize_configuration(pair, ctx)?;
                }
            }
            return Ok(());
        }

        let pair = pair.ok_or(LinkError::Unpaired(handle))?;
        let partner = self.get_mut(pair)?;
        if let Some(init_queue) = partner.send_queue.take() {
            let pending = init_queue.lock().len();
            if pending > 0 {
                tracing::warn!(link = %pair, pending, "discarding undelivered untimed data");
            }
        }
        partner.send_queue = match link_type {
            LinkType::Handler => Some(ctx.time_vortex()),
            LinkType::Poll => Some(share(PollingLinkQueue::new())),
            _ => {
                tracing::warn!(link = %handle, "finalized with no handler and no polling configured");
                None
            }
        };
        let partner_is_sync = partner.link_type == LinkType::Sync;
        tracing::debug!(link = %handle, kind = %link_type, "link finalized");

        if partner_is_sync {
            self.finalize_configuration(pair, ctx)?;
        }
        Ok(())
    }

    /// Moves `handle` from Run to Complete and detaches its partner's queue.
    pub fn prepare_for_complete(&mut self, handle: LinkHandle) -> LinkResult<()> {
        let link = self.get_mut(handle)?;
        link.mode = LinkMode::Complete;
        let link_type = link.link_type;
        let pair = link.pair;

        if link_type == LinkType::Sync {
            if let Some(pair) = pair {
                let partner = self.get(pair)?;
                if partner.link_type == LinkType::Sync && partner.mode != LinkMode::Complete {
                    self.prepare_for_complete(pair)?;
                }
            }
            return Ok(());
        }

        let Some(pair) = pair else {
            tracing::debug!(link = %handle, "no partner left to detach");
            return Ok(());
        };
        let partner = self.get_mut(pair)?;
        if let Some(queue) = partner.send_queue.take() {
            if link_type == LinkType::Poll {
                let pending = queue.lock().len();
                if pending > 0 {
                    tracing::debug!(link = %handle, pending, "dropping polling queue with pending events");
                }
            }
        }
        let partner_is_sync = partner.link_type == LinkType::Sync;

        if partner_is_sync {
            self.prepare_for_complete(pair)?;
        }
        Ok(())
    }

    /// Sends `event` to arrive `delay` core cycles from now plus the link
    /// latency. `None` sends a null event.
    pub fn send_impl(
        &mut self,
        handle: LinkHandle,
        ctx: &dyn SimContext,
        delay: SimTime,
        event: Option<Event>,
    ) -> LinkResult<()> {
        #[cfg(feature = "event-tracking")]
        let receiver = self.partner(handle).ok().and_then(|p| self.get(p).ok()).map(|p| p.endpoint.clone());

        let link = self.get_mut(handle)?;
        match link.mode {
            LinkMode::Init => return Err(LinkError::SendDuringInit { link: handle }),
            LinkMode::Complete => return Err(LinkError::SendDuringComplete { link: handle }),
            LinkMode::Run => {}
        }
        let queue = link
            .send_queue
            .clone()
            .ok_or(LinkError::NoDeliveryQueue { link: handle })?;

        let time = ctx
            .current_cycle()
            .checked_add(delay)
            .and_then(|t| t.checked_add(link.latency))
            .ok_or(LinkError::TimeOverflow { link: handle })?;
        let mut event = match event {
            Some(event) => event,
            None => {
                link.counters.null_events_sent += 1;
                Event::null()
            }
        };
        event.set_delivery_time(time);
        event.set_delivery_info(link.tag, link.routing.clone());

        #[cfg(feature = "event-tracking")]
        {
            let ep = &link.endpoint;
            event.add_send_component(&ep.component, &ep.comp_type, &ep.port);
            if let Some(r) = &receiver {
                event.add_recv_component(&r.component, &r.comp_type, &r.port);
            }
        }

        if let Some(tools) = &link.profile_tools {
            tools.event_sent(&event);
        }
        link.counters.events_sent += 1;
        tracing::trace!(link = %handle, time, tag = link.tag, "send");

        queue.lock().insert(Box::new(event));
        Ok(())
    }

    /// Like [`send_impl`](Self::send_impl), with `delay` in the link's
    /// default time base. Without a default time base, `delay` is already in
    /// core cycles.
    pub fn send(
        &mut self,
        handle: LinkHandle,
        ctx: &dyn SimContext,
        delay: Cycle,
        event: Option<Event>,
    ) -> LinkResult<()> {
        let factor = self.get(handle)?.default_time_base;
        let delay = if factor == 0 {
            delay
        } else {
            delay
                .checked_mul(factor)
                .ok_or(LinkError::TimeOverflow { link: handle })?
        };
        self.send_impl(handle, ctx, delay, event)
    }

    /// Like [`send_impl`](Self::send_impl), with `delay` in the units of `tc`.
    pub fn send_with_time_base(
        &mut self,
        handle: LinkHandle,
        ctx: &dyn SimContext,
        delay: Cycle,
        tc: &TimeConverter,
        event: Option<Event>,
    ) -> LinkResult<()> {
        let delay = tc
            .convert_to_core_time(delay)
            .map_err(|_| LinkError::TimeOverflow { link: handle })?;
        self.send_impl(handle, ctx, delay, event)
    }

    /// Takes the next due event from a polling link.
    ///
    /// Returns `Ok(None)` when nothing is due yet.
    pub fn recv(&mut self, handle: LinkHandle, ctx: &dyn SimContext) -> LinkResult<Option<Box<Event>>> {
        let link = self.get(handle)?;
        if link.link_type != LinkType::Poll {
            return Err(LinkError::RecvOnNonPolling { link: handle });
        }
        let pair = link.pair.ok_or(LinkError::Unpaired(handle))?;
        let Some(queue) = self.get(pair)?.send_queue.clone() else {
            return Ok(None);
        };

        let event = pop_due(&queue, ctx.current_cycle(), handle)?;
        if event.is_some() {
            self.get_mut(handle)?.counters.events_received += 1;
            tracing::trace!(link = %handle, now = ctx.current_cycle(), "recv");
        }
        Ok(event)
    }

    /// Sends untimed data, visible to the partner from the next untimed
    /// phase on.
    pub fn send_untimed_data(&mut self, handle: LinkHandle, ctx: &dyn SimContext, event: Event) -> LinkResult<()> {
        #[cfg(feature = "event-tracking")]
        let receiver = self.partner(handle).ok().and_then(|p| self.get(p).ok()).map(|p| p.endpoint.clone());

        let link = self.get_mut(handle)?;
        if link.mode == LinkMode::Run {
            return Err(LinkError::UntimedDuringRun { link: handle });
        }
        let queue = link
            .send_queue
            .get_or_insert_with(|| share(InitQueue::new()))
            .clone();
        ctx.record_untimed_message();

        let mut event = event;
        let time = ctx.untimed_phase() + 1;
        event.set_delivery_time(time);
        event.set_delivery_info(link.tag, link.routing.clone());

        #[cfg(feature = "event-tracking")]
        {
            let ep = &link.endpoint;
            event.add_send_component(&ep.component, &ep.comp_type, &ep.port);
            if let Some(r) = &receiver {
                event.add_recv_component(&r.component, &r.comp_type, &r.port);
            }
        }

        link.counters.untimed_sent += 1;
        tracing::trace!(link = %handle, phase = time, "send untimed");
        queue.lock().insert(Box::new(event));
        Ok(())
    }

    /// Inserts untimed data that already carries its delivery time. Used by
    /// the synchronization subsystem on SYNC halves.
    pub fn send_untimed_data_sync(&mut self, handle: LinkHandle, event: Event) -> LinkResult<()> {
        let link = self.get_mut(handle)?;
        let queue = link
            .send_queue
            .get_or_insert_with(|| share(InitQueue::new()))
            .clone();
        queue.lock().insert(Box::new(event));
        Ok(())
    }

    /// Takes the next untimed event that is due in the current phase.
    ///
    /// Returns `Ok(None)` if the partner never sent untimed data or nothing
    /// is due yet.
    pub fn recv_untimed_data(&mut self, handle: LinkHandle, ctx: &dyn SimContext) -> LinkResult<Option<Box<Event>>> {
        let link = self.get(handle)?;
        if link.mode == LinkMode::Run {
            return Err(LinkError::UntimedDuringRun { link: handle });
        }
        let pair = link.pair.ok_or(LinkError::Unpaired(handle))?;
        let Some(queue) = self.get(pair)?.send_queue.clone() else {
            return Ok(None);
        };

        let event = pop_due(&queue, ctx.untimed_phase(), handle)?;
        if event.is_some() {
            self.get_mut(handle)?.counters.untimed_received += 1;
        }
        Ok(event)
    }

    /// Sets the base latency in core cycles.
    pub fn set_latency(&mut self, handle: LinkHandle, latency: SimTime) -> LinkResult<()> {
        self.get_mut(handle)?.latency = latency;
        Ok(())
    }

    pub fn latency(&self, handle: LinkHandle) -> LinkResult<SimTime> {
        Ok(self.get(handle)?.latency)
    }

    /// Adds `cycles` of `timebase` to this link's latency.
    pub fn add_send_latency(
        &mut self,
        handle: LinkHandle,
        ctx: &dyn SimContext,
        cycles: Cycle,
        timebase: &str,
    ) -> LinkResult<()> {
        let factor = ctx.time_authority().sim_cycles(timebase, "add_send_latency")?;
        let added = cycles
            .checked_mul(factor)
            .ok_or(LinkError::TimeOverflow { link: handle })?;
        self.grow_latency(handle, added)
    }

    pub fn add_send_latency_tc(&mut self, handle: LinkHandle, cycles: Cycle, tc: &TimeConverter) -> LinkResult<()> {
        let added = tc
            .convert_to_core_time(cycles)
            .map_err(|_| LinkError::TimeOverflow { link: handle })?;
        self.grow_latency(handle, added)
    }

    /// Adds `cycles` of `timebase` to the partner's latency.
    pub fn add_recv_latency(
        &mut self,
        handle: LinkHandle,
        ctx: &dyn SimContext,
        cycles: Cycle,
        timebase: &str,
    ) -> LinkResult<()> {
        let factor = ctx.time_authority().sim_cycles(timebase, "add_recv_latency")?;
        let pair = self.partner(handle)?;
        let added = cycles
            .checked_mul(factor)
            .ok_or(LinkError::TimeOverflow { link: pair })?;
        self.grow_latency(pair, added)
    }

    pub fn add_recv_latency_tc(&mut self, handle: LinkHandle, cycles: Cycle, tc: &TimeConverter) -> LinkResult<()> {
        let pair = self.partner(handle)?;
        let added = tc
            .convert_to_core_time(cycles)
            .map_err(|_| LinkError::TimeOverflow { link: pair })?;
        self.grow_latency(pair, added)
    }

    fn grow_latency(&mut self, handle: LinkHandle, added: SimTime) -> LinkResult<()> {
        let link = self.get_mut(handle)?;
        link.latency = link
            .latency
            .checked_add(added)
            .ok_or(LinkError::TimeOverflow { link: handle })?;
        Ok(())
    }

    /// Sets or clears the time base used by [`send`](Self::send).
    pub fn set_default_time_base(&mut self, handle: LinkHandle, tc: Option<&TimeConverter>) -> LinkResult<()> {
        self.get_mut(handle)?.default_time_base = tc.map_or(0, |tc| tc.factor());
        Ok(())
    }

    /// The default time base, resolved through the time authority on every
    /// call.
    pub fn default_time_base(&self, handle: LinkHandle, ctx: &dyn SimContext) -> LinkResult<Option<TimeConverter>> {
        let factor = self.get(handle)?.default_time_base;
        if factor == 0 {
            return Ok(None);
        }
        Ok(Some(ctx.time_authority().time_converter(factor)?))
    }

    /// Destroys `handle`.
    ///
    /// The partner's back-reference is cleared first; a SYNC partner has no
    /// other owner and is destroyed with it.
    pub fn destroy(&mut self, handle: LinkHandle) -> LinkResult<()> {
        let link = self.remove(handle).ok_or(LinkError::StaleHandle(handle))?;

        if let Some(pair) = link.pair.filter(|p| *p != handle) {
            if let Ok(partner) = self.get_mut(pair) {
                partner.pair = None;
                if partner.link_type == LinkType::Sync {
                    self.destroy(pair)?;
                    tracing::debug!(link = %handle, sync = %pair, "destroyed sync partner");
                }
            }
        }

        drop(link.profile_tools);
        tracing::debug!(link = %handle, "link destroyed");
        Ok(())
    }

    /// Export per-link statistics as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        let links: Vec<serde_json::Value> = self
            .handles()
            .filter_map(|h| self.get(h).ok().map(|link| (h, link)))
            .map(|(h, link)| {
                json!({
                    "name": format!("{}:{}", link.endpoint, h),
                    "component": link.endpoint.component,
                    "port": link.endpoint.port,
                    "type": link.link_type.to_string(),
                    "mode": link.mode,
                    "tag": link.tag,
                    "latency": link.latency,
                    "pair": link.pair.map(|p| p.to_string()),
                    "counters": link.counters,
                })
            })
            .collect();
        json!({ "links": links })
    }
}

impl fmt::Debug for LinkArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkArena")
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Pops the front of `queue` if it is due at `now`.
fn pop_due(queue: &QueueRef, now: SimTime, link: LinkHandle) -> LinkResult<Option<Box<Event>>> {
    let item = {
        let mut q = queue.lock();
        let due = q.front().map_or(false, |front| front.activity().delivery_time() <= now);
        if due {
            q.pop()
        } else {
            None
        }
    };
    item.map(|item: Box<dyn Schedulable>| {
        item.into_event().map_err(|other| LinkError::NotAnEvent {
            link,
            type_name: other.type_name(),
        })
    })
    .transpose()
}
