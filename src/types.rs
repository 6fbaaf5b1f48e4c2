//! Core type definitions for the event delivery substrate.
//!
//! This module defines the fundamental scalar types shared by activities,
//! events and links.

use serde::{Deserialize, Serialize};

/// Simulation time in core cycles.
///
/// Every delivery time, latency and delay is expressed in this unit once it
/// has been resolved through a [`TimeConverter`](crate::time::TimeConverter).
pub type SimTime = u64;

/// A cycle count expressed in some (possibly non-core) time base.
pub type Cycle = u64;

/// Deterministic tie-break tag carried in the low 32 bits of an activity's
/// priority word.
///
/// Both halves of a link pair share the same tag. Tags are assigned from the
/// lexicographically sorted link names so that cross-boundary ordering does
/// not depend on the physical send order.
pub type LinkTag = u32;

/// Identifier of the component that owns a link endpoint.
pub type ComponentId = u64;

/// Position of the current dispatcher in the parallel layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankInfo {
    /// MPI-style rank
    pub rank: u32,
    /// Thread within the rank
    pub thread: u32,
}

impl RankInfo {
    /// Creates a new rank/thread pair.
    pub fn new(rank: u32, thread: u32) -> Self {
        Self { rank, thread }
    }
}

impl std::fmt::Display for RankInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.rank, self.thread)
    }
}
