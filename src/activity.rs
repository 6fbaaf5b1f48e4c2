//! Schedulable units and their ordering.
//!
//! An [`Activity`] is the timing record of anything that can sit in a
//! time-ordered queue: its delivery time, a packed priority/order-tag word and
//! the insertion sequence assigned by the queue. The [`Schedulable`] trait is
//! what queues actually store.
//!
//! # Ordering
//!
//! Comparison always walks the fields in the fixed precedence
//! **T** (delivery time) → **P** (priority + order tag) → **Q** (queue order).
//! The const parameters of [`Less`] and [`Greater`] select which of the three
//! take part; a disabled field is skipped entirely.
//!
//! ```
//! use simlink::activity::{Activity, ActivityOrdering, Less};
//!
//! let mut a = Activity::new();
//! let mut b = Activity::new();
//! a.set_delivery_time(10);
//! b.set_delivery_time(10);
//! a.set_priority(40);
//! b.set_priority(50);
//!
//! // Same time, lower priority value goes first.
//! assert!(Less::<true, true, false>::precedes(&a, &b));
//! // With P disabled the two are equivalent.
//! assert!(!Less::<true, false, false>::precedes(&a, &b));
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::event::Event;
use crate::types::{LinkTag, SimTime};

/// Default priority settings, lower runs first at equal delivery time.
pub mod priority {
    pub const THREAD_SYNC: u32 = 20;
    pub const SYNC: u32 = 25;
    pub const STOP_ACTION: u32 = 30;
    pub const CLOCK: u32 = 40;
    pub const EVENT: u32 = 50;
    pub const MEM_EVENT: u32 = 50;
    pub const BARRIER: u32 = 75;
    pub const ONE_SHOT: u32 = 80;
    pub const STATISTIC_CLOCK: u32 = 85;
    pub const FINAL_EVENT: u32 = 98;
    pub const EXIT: u32 = 99;
}

const PRIORITY_MASK: u64 = 0xFFFF_FFFF_0000_0000;
const ORDER_TAG_MASK: u64 = 0x0000_0000_FFFF_FFFF;

/// Timing record shared by every schedulable item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Activity {
    delivery_time: SimTime,
    /// Priority in the high 32 bits, order tag in the low 32 bits
    priority_order: u64,
    /// Used by queues that don't naturally keep insertion order
    queue_order: u64,
}

impl Activity {
    /// Creates an activity at time 0 with priority 0 and order tag 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time at which this activity should be delivered.
    #[inline]
    pub fn set_delivery_time(&mut self, time: SimTime) {
        self.delivery_time = time;
    }

    /// Returns the time at which this activity will be delivered.
    #[inline]
    pub fn delivery_time(&self) -> SimTime {
        self.delivery_time
    }

    /// Sets the priority, keeping the current order tag.
    #[inline]
    pub fn set_priority(&mut self, priority: u32) {
        self.priority_order = (self.priority_order & ORDER_TAG_MASK) | ((priority as u64) << 32);
    }

    /// Returns the priority class.
    #[inline]
    pub fn priority(&self) -> u32 {
        (self.priority_order >> 32) as u32
    }

    /// Sets the order tag, keeping the current priority.
    #[inline]
    pub fn set_order_tag(&mut self, tag: LinkTag) {
        self.priority_order = (self.priority_order & PRIORITY_MASK) | tag as u64;
    }

    /// Returns the order tag.
    #[inline]
    pub fn order_tag(&self) -> LinkTag {
        (self.priority_order & ORDER_TAG_MASK) as LinkTag
    }

    /// Returns the packed priority/order-tag word used for comparisons.
    #[inline]
    pub fn priority_order(&self) -> u64 {
        self.priority_order
    }

    /// Sets the insertion sequence. Called by queue implementations.
    #[inline]
    pub fn set_queue_order(&mut self, order: u64) {
        self.queue_order = order;
    }

    /// Returns the insertion sequence.
    #[inline]
    pub fn queue_order(&self) -> u64 {
        self.queue_order
    }

    /// Formats the timing fields, for use in `Display` implementations of
    /// items that embed an activity.
    pub fn delivery_time_info(&self) -> String {
        format!(
            "time: {}, priority: {}, order tag: {}, queue order: {}",
            self.delivery_time,
            self.priority(),
            self.order_tag(),
            self.queue_order
        )
    }

    pub(crate) fn from_parts(delivery_time: SimTime, priority_order: u64, queue_order: u64) -> Self {
        Self {
            delivery_time,
            priority_order,
            queue_order,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Activity to be delivered at {}", self.delivery_time_info())
    }
}

/// Anything a delivery queue can hold and a dispatcher can run.
///
/// `execute` consumes the item: after a queue pops it, the dispatcher owns it
/// and it is dropped once its behaviour has run.
pub trait Schedulable: Send + fmt::Debug {
    /// The timing record used for ordering.
    fn activity(&self) -> &Activity;

    /// Mutable access to the timing record.
    fn activity_mut(&mut self) -> &mut Activity;

    /// Runs the item's behaviour.
    fn execute(self: Box<Self>) -> Result<(), EventError>;

    /// Recovers the concrete event, or hands the item back unchanged.
    fn into_event(self: Box<Self>) -> Result<Box<Event>, Box<dyn Schedulable>>;

    /// Short class name for diagnostics.
    fn type_name(&self) -> &'static str {
        "Activity"
    }
}

/// A strict ordering over activities.
pub trait ActivityOrdering {
    /// Returns true when `lhs` must be delivered before `rhs`.
    fn precedes(lhs: &Activity, rhs: &Activity) -> bool;

    /// Total-order view of [`precedes`](Self::precedes); equivalent items
    /// compare `Equal`.
    fn ordering(lhs: &Activity, rhs: &Activity) -> Ordering {
        if Self::precedes(lhs, rhs) {
            Ordering::Less
        } else if Self::precedes(rhs, lhs) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Ascending comparison over the enabled fields.
///
/// `T` = delivery time, `P` = priority and order tag, `Q` = queue order.
#[derive(Clone, Copy, Debug, Default)]
pub struct Less<const T: bool, const P: bool, const Q: bool>;

impl<const T: bool, const P: bool, const Q: bool> ActivityOrdering for Less<T, P, Q> {
    #[inline]
    fn precedes(lhs: &Activity, rhs: &Activity) -> bool {
        if T && lhs.delivery_time != rhs.delivery_time {
            return lhs.delivery_time < rhs.delivery_time;
        }
        if P && lhs.priority_order != rhs.priority_order {
            return lhs.priority_order < rhs.priority_order;
        }
        Q && lhs.queue_order < rhs.queue_order
    }
}

/// Descending comparison over the enabled fields, for sorting opposite the
/// natural order.
#[derive(Clone, Copy, Debug, Default)]
pub struct Greater<const T: bool, const P: bool, const Q: bool>;

impl<const T: bool, const P: bool, const Q: bool> ActivityOrdering for Greater<T, P, Q> {
    #[inline]
    fn precedes(lhs: &Activity, rhs: &Activity) -> bool {
        if T && lhs.delivery_time != rhs.delivery_time {
            return lhs.delivery_time > rhs.delivery_time;
        }
        if P && lhs.priority_order != rhs.priority_order {
            return lhs.priority_order > rhs.priority_order;
        }
        Q && lhs.queue_order > rhs.queue_order
    }
}

/// Full ordering used by the run-phase time vortex.
pub type DeliveryOrder = Less<true, true, true>;

#[cfg(test)]
mod tests {
    use super::*;

    fn act(time: SimTime, priority: u32, tag: LinkTag, queue: u64) -> Activity {
        let mut a = Activity::new();
        a.set_delivery_time(time);
        a.set_priority(priority);
        a.set_order_tag(tag);
        a.set_queue_order(queue);
        a
    }

    #[test]
    fn test_priority_and_order_tag_are_independent() {
        let mut a = Activity::new();
        a.set_priority(3);
        a.set_order_tag(7);
        assert_eq!(a.priority(), 3);
        assert_eq!(a.order_tag(), 7);

        // Reverse order of assignment
        let mut b = Activity::new();
        b.set_order_tag(7);
        b.set_priority(3);
        assert_eq!(b.priority(), 3);
        assert_eq!(b.order_tag(), 7);

        // Overwriting one leaves the other alone
        b.set_priority(u32::MAX);
        assert_eq!(b.order_tag(), 7);
        b.set_order_tag(u32::MAX);
        assert_eq!(b.priority(), u32::MAX);
        assert_eq!(b.priority_order(), u64::MAX);
    }

    #[test]
    fn test_time_dominates_priority() {
        let early = act(10, 99, 0, 5);
        let late = act(20, 1, 0, 0);
        assert!(Less::<true, true, true>::precedes(&early, &late));
        assert!(!Less::<true, true, true>::precedes(&late, &early));
        assert!(Greater::<true, true, true>::precedes(&late, &early));
    }

    #[test]
    fn test_disabled_field_is_skipped() {
        // Same time, different priority, queue order decides when P is off
        let a = act(10, 50, 0, 2);
        let b = act(10, 20, 0, 1);
        assert!(Less::<true, true, true>::precedes(&b, &a));
        assert!(Less::<true, false, true>::precedes(&b, &a));
        // a has the larger queue order, so under T+Q it comes second
        assert!(!Less::<true, false, true>::precedes(&a, &b));

        let c = act(10, 20, 0, 9);
        assert!(Less::<true, false, true>::precedes(&b, &c));
        // P alone sees b and c as equivalent
        assert!(!Less::<false, true, false>::precedes(&b, &c));
        assert!(!Less::<false, true, false>::precedes(&c, &b));
    }

    #[test]
    fn test_order_tag_breaks_priority_ties() {
        let a = act(10, 50, 1, 9);
        let b = act(10, 50, 2, 0);
        assert!(Less::<true, true, false>::precedes(&a, &b));
        assert!(Less::<true, true, true>::precedes(&a, &b));
    }

    #[test]
    fn test_no_fields_is_vacuously_false() {
        let a = act(1, 1, 1, 1);
        let b = act(2, 2, 2, 2);
        assert!(!Less::<false, false, false>::precedes(&a, &b));
        assert!(!Less::<false, false, false>::precedes(&b, &a));
        assert!(!Greater::<false, false, false>::precedes(&a, &b));
    }

    #[test]
    fn test_strict_weak_ordering_all_configurations() {
        let samples: Vec<Activity> = (0..4u64)
            .flat_map(|t| (0..2u32).flat_map(move |p| (0..2u64).map(move |q| act(t, p, 0, q))))
            .collect();

        fn check<O: ActivityOrdering>(samples: &[Activity]) {
            for a in samples {
                // Irreflexive
                assert!(!O::precedes(a, a));
                for b in samples {
                    // Asymmetric
                    if O::precedes(a, b) {
                        assert!(!O::precedes(b, a));
                    }
                    for c in samples {
                        // Transitive
                        if O::precedes(a, b) && O::precedes(b, c) {
                            assert!(O::precedes(a, c));
                        }
                    }
                }
            }
        }

        check::<Less<true, true, true>>(&samples);
        check::<Less<true, true, false>>(&samples);
        check::<Less<true, false, true>>(&samples);
        check::<Less<true, false, false>>(&samples);
        check::<Less<false, true, true>>(&samples);
        check::<Less<false, true, false>>(&samples);
        check::<Less<false, false, true>>(&samples);
        check::<Greater<true, true, true>>(&samples);
        check::<Greater<true, false, true>>(&samples);
        check::<Greater<false, true, false>>(&samples);
    }

    #[test]
    fn test_lower_field_ignored_when_higher_differs() {
        // Queue order says b first, but time already decided
        let a = act(5, 50, 0, 100);
        let b = act(6, 50, 0, 0);
        assert!(Less::<true, false, true>::precedes(&a, &b));
        assert!(Less::<true, true, true>::precedes(&a, &b));
        assert!(Less::<true, false, false>::precedes(&a, &b));
    }

    #[test]
    fn test_ordering_helper() {
        let a = act(1, 0, 0, 0);
        let b = act(2, 0, 0, 0);
        assert_eq!(DeliveryOrder::ordering(&a, &b), Ordering::Less);
        assert_eq!(DeliveryOrder::ordering(&b, &a), Ordering::Greater);
        assert_eq!(DeliveryOrder::ordering(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_delivery_time_info() {
        let a = act(100, 50, 3, 12);
        assert_eq!(
            a.delivery_time_info(),
            "time: 100, priority: 50, order tag: 3, queue order: 12"
        );
        assert!(a.to_string().starts_with("Activity to be delivered at time: 100"));
    }
}
