//! Simulation context and reference dispatcher.
//!
//! Link operations never reach for global state. Everything they need from
//! the surrounding kernel (current cycle, untimed phase, the time vortex,
//! the time authority, rank) comes through [`SimContext`]. [`Simulation`]
//! is the in-process implementation and also drives the run phase: it pops
//! the vortex and executes whatever comes out.
//!
//! # Example
//!
//! ```
//! use simlink::context::{SimContext, Simulation};
//!
//! let mut sim = Simulation::with_timebase("1ps").unwrap();
//! assert_eq!(sim.current_cycle(), 0);
//!
//! // Nothing scheduled: time still moves to the horizon
//! assert_eq!(sim.run_until(1_000).unwrap(), 0);
//! assert_eq!(sim.current_cycle(), 1_000);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::json;

use crate::activity::DeliveryOrder;
use crate::error::EventError;
use crate::queue::{share, QueueRef, TimeVortex};
use crate::stats::DispatchStats;
use crate::time::{TimeAuthority, TimeError, TimeLord};
use crate::types::{RankInfo, SimTime};

/// Kernel services available to link operations.
pub trait SimContext {
    /// Current simulated time in core cycles.
    fn current_cycle(&self) -> SimTime;

    /// Index of the untimed phase in progress.
    fn untimed_phase(&self) -> SimTime;

    /// Counts one untimed message toward the current phase.
    fn record_untimed_message(&self);

    /// The run-phase delivery queue.
    fn time_vortex(&self) -> QueueRef;

    fn time_authority(&self) -> &dyn TimeAuthority;

    fn rank(&self) -> RankInfo;
}

/// In-process simulation context and dispatcher.
pub struct Simulation {
    current_cycle: SimTime,
    untimed_phase: SimTime,
    untimed_msg_count: AtomicU64,
    time_vortex: QueueRef,
    time_lord: TimeLord,
    rank: RankInfo,
    stats: DispatchStats,
}

impl Simulation {
    pub fn new(time_lord: TimeLord, rank: RankInfo) -> Self {
        Self {
            current_cycle: 0,
            untimed_phase: 0,
            untimed_msg_count: AtomicU64::new(0),
            time_vortex: share(TimeVortex::<DeliveryOrder>::new()),
            time_lord,
            rank,
            stats: DispatchStats::default(),
        }
    }

    /// Creates a rank-0 simulation whose core cycle lasts `timebase`.
    pub fn with_timebase(timebase: &str) -> Result<Self, TimeError> {
        Ok(Self::new(TimeLord::new(timebase)?, RankInfo::default()))
    }

    /// Replaces the time vortex, e.g. with one using a different ordering.
    pub fn with_time_vortex(mut self, vortex: QueueRef) -> Self {
        self.time_vortex = vortex;
        self
    }

    pub fn time_lord(&self) -> &TimeLord {
        &self.time_lord
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Messages recorded since the current untimed phase began.
    pub fn untimed_message_count(&self) -> u64 {
        self.untimed_msg_count.load(Ordering::Relaxed)
    }

    /// Runs untimed phases until one completes without any message sent.
    ///
    /// `phase` is called once per phase with this context and the phase
    /// index. Returns the number of phases run.
    pub fn run_untimed_phases<F, E>(&mut self, mut phase: F) -> Result<u64, E>
    where
        F: FnMut(&Simulation, SimTime) -> Result<(), E>,
    {
        let mut rounds = 0;
        loop {
            self.untimed_msg_count.store(0, Ordering::Relaxed);
            phase(self, self.untimed_phase)?;
            rounds += 1;
            self.stats.untimed_phases += 1;

            let sent = self.untimed_message_count();
            tracing::debug!(phase = self.untimed_phase, sent, "untimed phase complete");
            self.untimed_phase += 1;
            if sent == 0 {
                return Ok(rounds);
            }
        }
    }

    /// Delivery time of the next activity, if any.
    pub fn next_delivery_time(&self) -> Option<SimTime> {
        self.time_vortex.lock().front().map(|item| item.activity().delivery_time())
    }

    pub fn pending(&self) -> usize {
        self.time_vortex.lock().len()
    }

    /// Pops and executes one activity.
    ///
    /// Returns its delivery time, or `None` when the vortex is empty. The
    /// vortex lock is released before the activity runs, so handlers may
    /// send.
    pub fn step(&mut self) -> Result<Option<SimTime>, EventError> {
        let item = {
            let mut vortex = self.time_vortex.lock();
            self.stats.max_queue_depth = self.stats.max_queue_depth.max(vortex.len());
            vortex.pop()
        };
        let Some(item) = item else {
            return Ok(None);
        };

        let time = item.activity().delivery_time();
        if time < self.current_cycle {
            tracing::warn!(time, now = self.current_cycle, kind = item.type_name(), "activity scheduled in the past");
        } else {
            self.current_cycle = time;
        }

        tracing::trace!(time, kind = item.type_name(), "executing activity");
        self.stats.activities_executed += 1;
        if let Err(err) = item.execute() {
            self.stats.execution_errors += 1;
            tracing::error!(time, error = %err, "activity execution failed");
            return Err(err);
        }
        Ok(Some(time))
    }

    /// Executes every activity due at or before `end`, then moves the
    /// clock to `end`. Returns the number executed.
    pub fn run_until(&mut self, end: SimTime) -> Result<u64, EventError> {
        let mut executed = 0;
        while matches!(self.next_delivery_time(), Some(t) if t <= end) {
            self.step()?;
            executed += 1;
        }
        self.current_cycle = self.current_cycle.max(end);
        Ok(executed)
    }

    /// Executes until the vortex is empty.
    pub fn run(&mut self) -> Result<u64, EventError> {
        let mut executed = 0;
        while self.step()?.is_some() {
            executed += 1;
        }
        tracing::info!(executed, final_time = self.current_cycle, "simulation drained");
        Ok(executed)
    }

    /// Export statistics as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        json!({
            "simulation": {
                "current_cycle": self.current_cycle,
                "untimed_phase": self.untimed_phase,
                "timebase": self.time_lord.timebase(),
                "rank": self.rank.rank,
                "thread": self.rank.thread,
                "pending": self.pending(),
                "dispatch": self.stats,
            }
        })
    }
}

impl SimContext for Simulation {
    fn current_cycle(&self) -> SimTime {
        self.current_cycle
    }

    fn untimed_phase(&self) -> SimTime {
        self.untimed_phase
    }

    fn record_untimed_message(&self) {
        self.untimed_msg_count.fetch_add(1, Ordering::Relaxed);
    }

    fn time_vortex(&self) -> QueueRef {
        self.time_vortex.clone()
    }

    fn time_authority(&self) -> &dyn TimeAuthority {
        &self.time_lord
    }

    fn rank(&self) -> RankInfo {
        self.rank
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("current_cycle", &self.current_cycle)
            .field("untimed_phase", &self.untimed_phase)
            .field("rank", &self.rank)
            .field("stats", &self.stats)
            .finish()
    }
}
