//! Delivery queues.
//!
//! Links never own the queue they send into; the receiving side installs it.
//! All queues share the [`ActivityQueue`] interface:
//!
//! - [`TimeVortex`]: the dispatcher's run-phase priority queue
//! - [`PollingLinkQueue`]: private time-ordered buffer of a polling link
//! - [`InitQueue`]: FIFO for untimed data exchanged outside the run phase
//!
//! The synchronization buffer lives in [`crate::sync`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityOrdering, DeliveryOrder, Schedulable};
use crate::types::SimTime;

/// Shared handle to a queue. Several links may insert into the same one.
pub type QueueRef = Arc<Mutex<dyn ActivityQueue>>;

/// Wraps a queue for sharing.
pub fn share<Q: ActivityQueue + 'static>(queue: Q) -> QueueRef {
    Arc::new(Mutex::new(queue))
}

/// Which kind of queue sits behind a [`QueueRef`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    TimeVortex,
    Polling,
    Init,
    Sync,
}

/// Interface common to every delivery queue.
pub trait ActivityQueue: Send + fmt::Debug {
    fn insert(&mut self, item: Box<dyn Schedulable>);

    /// The item `pop` would return, without removing it.
    fn front(&self) -> Option<&dyn Schedulable>;

    fn pop(&mut self) -> Option<Box<dyn Schedulable>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> QueueKind;
}

struct VortexEntry<O> {
    item: Box<dyn Schedulable>,
    _order: PhantomData<fn() -> O>,
}

// BinaryHeap pops the greatest entry, so the entry that must be delivered
// first compares greatest.
impl<O: ActivityOrdering> Ord for VortexEntry<O> {
    fn cmp(&self, other: &Self) -> Ordering {
        O::ordering(other.item.activity(), self.item.activity())
    }
}

impl<O: ActivityOrdering> PartialOrd for VortexEntry<O> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<O: ActivityOrdering> PartialEq for VortexEntry<O> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<O: ActivityOrdering> Eq for VortexEntry<O> {}

/// Run-phase priority queue.
///
/// Every insert stamps the activity's queue order with a running counter,
/// so with the default [`DeliveryOrder`] items that tie on time, priority
/// and tag come out in insertion order. An ordering that disables the
/// queue-order field gives up that guarantee.
pub struct TimeVortex<O: ActivityOrdering = DeliveryOrder> {
    heap: BinaryHeap<VortexEntry<O>>,
    insert_order: u64,
    max_depth: usize,
}

impl<O: ActivityOrdering> TimeVortex<O> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            insert_order: 0,
            max_depth: 0,
        }
    }

    /// Largest number of items held at once.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Total number of inserts so far.
    pub fn total_inserted(&self) -> u64 {
        self.insert_order
    }
}

impl<O: ActivityOrdering> Default for TimeVortex<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ActivityOrdering> fmt::Debug for TimeVortex<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeVortex")
            .field("len", &self.heap.len())
            .field("inserted", &self.insert_order)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl<O: ActivityOrdering> ActivityQueue for TimeVortex<O> {
    fn insert(&mut self, mut item: Box<dyn Schedulable>) {
        item.activity_mut().set_queue_order(self.insert_order);
        self.insert_order += 1;
        self.heap.push(VortexEntry {
            item,
            _order: PhantomData,
        });
        self.max_depth = self.max_depth.max(self.heap.len());
    }

    fn front(&self) -> Option<&dyn Schedulable> {
        self.heap.peek().map(|entry| entry.item.as_ref())
    }

    fn pop(&mut self) -> Option<Box<dyn Schedulable>> {
        self.heap.pop().map(|entry| entry.item)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn kind(&self) -> QueueKind {
        QueueKind::TimeVortex
    }
}

/// Time-ordered buffer read by [`recv`](crate::link::LinkArena::recv).
///
/// Ties on delivery time come out in insertion order.
#[derive(Debug, Default)]
pub struct PollingLinkQueue {
    items: BTreeMap<(SimTime, u64), Box<dyn Schedulable>>,
    seq: u64,
}

impl PollingLinkQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityQueue for PollingLinkQueue {
    fn insert(&mut self, item: Box<dyn Schedulable>) {
        let key = (item.activity().delivery_time(), self.seq);
        self.seq += 1;
        self.items.insert(key, item);
    }

    fn front(&self) -> Option<&dyn Schedulable> {
        self.items.first_key_value().map(|(_, item)| item.as_ref())
    }

    fn pop(&mut self) -> Option<Box<dyn Schedulable>> {
        self.items.pop_first().map(|(_, item)| item)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Polling
    }
}

/// FIFO holding untimed data.
#[derive(Debug, Default)]
pub struct InitQueue {
    items: VecDeque<Box<dyn Schedulable>>,
}

impl InitQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityQueue for InitQueue {
    fn insert(&mut self, item: Box<dyn Schedulable>) {
        self.items.push_back(item);
    }

    fn front(&self) -> Option<&dyn Schedulable> {
        self.items.front().map(|item| item.as_ref())
    }

    fn pop(&mut self) -> Option<Box<dyn Schedulable>> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Init
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Less;
    use crate::event::Event;

    fn event_at(time: SimTime, priority: u32, tag: u32) -> Box<dyn Schedulable> {
        let mut ev = Event::empty();
        ev.set_delivery_time(time);
        ev.set_priority(priority);
        ev.activity_mut().set_order_tag(tag);
        Box::new(ev)
    }

    fn drain(queue: &mut dyn ActivityQueue) -> Vec<(SimTime, u32, u32, u64)> {
        let mut out = Vec::new();
        while let Some(item) = queue.pop() {
            let a = item.activity();
            out.push((a.delivery_time(), a.priority(), a.order_tag(), a.queue_order()));
        }
        out
    }

    #[test]
    fn test_vortex_orders_by_time_priority_tag() {
        let mut vortex: TimeVortex = TimeVortex::new();
        vortex.insert(event_at(20, 50, 0));
        vortex.insert(event_at(10, 50, 2));
        vortex.insert(event_at(10, 50, 1));
        vortex.insert(event_at(10, 40, 9));

        assert_eq!(vortex.front().unwrap().activity().delivery_time(), 10);
        let order: Vec<_> = drain(&mut vortex).into_iter().map(|(t, p, g, _)| (t, p, g)).collect();
        assert_eq!(order, vec![(10, 40, 9), (10, 50, 1), (10, 50, 2), (20, 50, 0)]);
    }

    #[test]
    fn test_vortex_ties_pop_in_insertion_order() {
        let mut vortex: TimeVortex = TimeVortex::new();
        for _ in 0..16 {
            vortex.insert(event_at(5, 50, 3));
        }
        let orders: Vec<u64> = drain(&mut vortex).into_iter().map(|(_, _, _, q)| q).collect();
        assert_eq!(orders, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_vortex_custom_ordering() {
        // Priority ignored: tag-less ordering by time only, then queue order
        let mut vortex: TimeVortex<Less<true, false, true>> = TimeVortex::new();
        vortex.insert(event_at(1, 90, 0));
        vortex.insert(event_at(1, 10, 0));
        let priorities: Vec<u32> = drain(&mut vortex).into_iter().map(|(_, p, _, _)| p).collect();
        assert_eq!(priorities, vec![90, 10]);
    }

    #[test]
    fn test_vortex_depth_tracking() {
        let mut vortex: TimeVortex = TimeVortex::default();
        assert!(vortex.is_empty());
        for t in 0..3 {
            vortex.insert(event_at(t, 50, 0));
        }
        vortex.pop();
        vortex.insert(event_at(9, 50, 0));
        assert_eq!(vortex.len(), 3);
        assert_eq!(vortex.max_depth(), 3);
        assert_eq!(vortex.total_inserted(), 4);
        assert_eq!(vortex.kind(), QueueKind::TimeVortex);
    }

    #[test]
    fn test_polling_queue_time_order() {
        let mut queue = PollingLinkQueue::new();
        queue.insert(event_at(30, 50, 0));
        queue.insert(event_at(10, 50, 7));
        queue.insert(event_at(10, 50, 1));

        // Equal times keep insertion order regardless of tag
        let tags: Vec<(SimTime, u32)> = drain(&mut queue).into_iter().map(|(t, _, g, _)| (t, g)).collect();
        assert_eq!(tags, vec![(10, 7), (10, 1), (30, 0)]);
    }

    #[test]
    fn test_init_queue_is_fifo() {
        let mut queue = InitQueue::new();
        queue.insert(event_at(2, 50, 0));
        queue.insert(event_at(1, 50, 0));
        assert_eq!(queue.front().unwrap().activity().delivery_time(), 2);
        let times: Vec<SimTime> = drain(&mut queue).into_iter().map(|(t, _, _, _)| t).collect();
        assert_eq!(times, vec![2, 1]);
        assert_eq!(queue.kind(), QueueKind::Init);
    }

    #[test]
    fn test_shared_queue() {
        let queue = share(InitQueue::new());
        let other = Arc::clone(&queue);
        other.lock().insert(event_at(1, 50, 0));
        assert_eq!(queue.lock().len(), 1);
    }
}
