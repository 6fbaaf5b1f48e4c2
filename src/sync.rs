//! Partition boundary plumbing.
//!
//! A link whose peer lives in another partition is paired with a local SYNC
//! half (see [`LinkArena::create_sync_pair`]). Outbound sends on the local
//! link land in a [`SyncQueue`] registered with
//! [`LinkArena::register_sync_output`], stamped with `Remote` routing that
//! names the SYNC half on the receiving side. At an exchange point the queue
//! is drained in a deterministic order and each event is re-delivered on the
//! receiving arena with [`LinkArena::deliver_from_sync`].
//!
//! When the exchange happens, and how events travel between processes, is
//! up to the caller. [`exchange`] and [`exchange_untimed`] cover the
//! in-process case.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::activity::{ActivityOrdering, Less, Schedulable};
use crate::error::{LinkError, LinkResult};
use crate::event::{Event, RoutingTarget};
use crate::link::{LinkArena, LinkHandle};
use crate::queue::{ActivityQueue, QueueKind, QueueRef};

/// Order used when draining: time, then priority and order tag. Insertion
/// order is not part of it, since it depends on thread scheduling.
type ExchangeOrder = Less<true, true, false>;

/// Shared handle to a [`SyncQueue`].
pub type SharedSyncQueue = Arc<Mutex<SyncQueue>>;

/// Outbound buffer at a partition boundary.
#[derive(Debug, Default)]
pub struct SyncQueue {
    items: Vec<Box<dyn Schedulable>>,
    total_inserted: u64,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSyncQueue {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn total_inserted(&self) -> u64 {
        self.total_inserted
    }

    /// Removes every buffered event, sorted by time, priority and order tag.
    /// Items that tie keep their insertion order.
    pub fn drain_sorted(&mut self) -> Vec<Event> {
        let mut items = std::mem::take(&mut self.items);
        items.sort_by(|a, b| ExchangeOrder::ordering(a.activity(), b.activity()));
        items
            .into_iter()
            .filter_map(|item| match item.into_event() {
                Ok(event) => Some(*event),
                Err(other) => {
                    tracing::warn!(kind = other.type_name(), "dropping non-event activity at sync boundary");
                    None
                }
            })
            .collect()
    }
}

impl ActivityQueue for SyncQueue {
    fn insert(&mut self, item: Box<dyn Schedulable>) {
        self.total_inserted += 1;
        self.items.push(item);
    }

    fn front(&self) -> Option<&dyn Schedulable> {
        self.items
            .iter()
            .reduce(|best, item| {
                if ExchangeOrder::precedes(item.activity(), best.activity()) {
                    item
                } else {
                    best
                }
            })
            .map(|item| item.as_ref())
    }

    fn pop(&mut self) -> Option<Box<dyn Schedulable>> {
        let index = (0..self.items.len()).reduce(|best, i| {
            if ExchangeOrder::precedes(self.items[i].activity(), self.items[best].activity()) {
                i
            } else {
                best
            }
        })?;
        Some(self.items.remove(index))
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Sync
    }
}

impl LinkArena {
    /// Points the outbound side of a boundary link at `queue`. Events sent on
    /// `local` are routed to `remote`, the SYNC half in the receiving
    /// partition.
    pub fn register_sync_output(&mut self, local: LinkHandle, queue: QueueRef, remote: LinkHandle) -> LinkResult<()> {
        let link = self.get_mut(local)?;
        link.send_queue = Some(queue);
        link.routing = RoutingTarget::Remote(remote);
        tracing::debug!(link = %local, remote = %remote, "registered sync output");
        Ok(())
    }

    /// Re-delivers an event that crossed a boundary on the link named by its
    /// routing, stamping that link's tag and routing.
    pub fn deliver_from_sync(&mut self, event: Event) -> LinkResult<()> {
        let target = event.delivery_link().ok_or(LinkError::MissingDeliveryLink)?;
        let link = self.get_mut(target)?;
        let queue = link
            .send_queue
            .clone()
            .ok_or(LinkError::NoDeliveryQueue { link: target })?;

        let mut event = event;
        event.set_delivery_info(link.tag, link.routing.clone());
        link.counters.events_sent += 1;
        queue.lock().insert(Box::new(event));
        Ok(())
    }

    /// Re-delivers untimed data that crossed a boundary. The delivery time
    /// stamped by the original sender is kept.
    pub fn deliver_untimed_from_sync(&mut self, event: Event) -> LinkResult<()> {
        let target = event.delivery_link().ok_or(LinkError::MissingDeliveryLink)?;
        let link = self.get(target)?;
        let (tag, routing) = (link.tag, link.routing.clone());

        let mut event = event;
        event.set_delivery_info(tag, routing);
        self.send_untimed_data_sync(target, event)
    }
}

/// Drains `outbound` into `remote`. Returns the number of events moved.
pub fn exchange(outbound: &SharedSyncQueue, remote: &mut LinkArena) -> LinkResult<usize> {
    let events = outbound.lock().drain_sorted();
    let moved = events.len();
    for event in events {
        remote.deliver_from_sync(event)?;
    }
    if moved > 0 {
        tracing::trace!(moved, "sync exchange");
    }
    Ok(moved)
}

/// Untimed counterpart of [`exchange`].
pub fn exchange_untimed(outbound: &SharedSyncQueue, remote: &mut LinkArena) -> LinkResult<usize> {
    let events = outbound.lock().drain_sorted();
    let moved = events.len();
    for event in events {
        remote.deliver_untimed_from_sync(event)?;
    }
    Ok(moved)
}
