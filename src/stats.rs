//! Statistics collection and export.
//!
//! Links keep [`LinkCounters`], the dispatcher keeps [`DispatchStats`]. Both
//! export JSON; [`StatsCollector`] folds those exports into a
//! [`KernelStats`] report with JSON, CSV and text renderings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::types::SimTime;

/// Per-link traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounters {
    /// Timed sends, including null sends
    pub events_sent: u64,
    /// Timed sends with no event
    pub null_events_sent: u64,
    /// Untimed sends
    pub untimed_sent: u64,
    /// Events taken by `recv`
    pub events_received: u64,
    /// Events taken by `recv_untimed_data`
    pub untimed_received: u64,
}

/// Dispatcher statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Activities popped from the time vortex and executed
    pub activities_executed: u64,
    /// Executions that returned an error
    pub execution_errors: u64,
    /// Largest vortex depth observed before a pop
    pub max_queue_depth: usize,
    /// Number of untimed phases run
    pub untimed_phases: u64,
}

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KernelStats {
    /// Run metadata
    pub metadata: RunMetadata,

    /// Final simulated time
    pub final_time: SimTime,

    /// Dispatcher statistics
    pub dispatch: DispatchStats,

    /// Per-link statistics keyed by link name
    pub links: BTreeMap<String, LinkStats>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub name: String,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    pub version: String,

    /// Configuration file used (if any)
    pub config_file: Option<String>,
}

/// Statistics for one link half.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LinkStats {
    pub component: String,
    pub port: String,
    pub link_type: String,
    pub latency: SimTime,
    pub counters: LinkCounters,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Simulated core cycles per wall-clock second
    pub sim_time_per_second: f64,

    /// Activities executed per wall-clock second
    pub activities_per_second: f64,
}

impl KernelStats {
    pub fn new() -> Self {
        Self {
            metadata: RunMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(unix_timestamp());
    }

    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(unix_timestamp());
    }

    /// Total timed sends over all links.
    pub fn total_events_sent(&self) -> u64 {
        self.links.values().map(|l| l.counters.events_sent).sum()
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.sim_time_per_second = self.final_time as f64 / seconds;
            self.timing.activities_per_second = self.dispatch.activities_executed as f64 / seconds;
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");
        csv.push_str(&format!("final_time,{}\n", self.final_time));
        csv.push_str(&format!("activities_executed,{}\n", self.dispatch.activities_executed));
        csv.push_str(&format!("execution_errors,{}\n", self.dispatch.execution_errors));
        csv.push_str(&format!("max_queue_depth,{}\n", self.dispatch.max_queue_depth));
        csv.push_str(&format!("untimed_phases,{}\n", self.dispatch.untimed_phases));
        csv.push_str(&format!("link_count,{}\n", self.links.len()));
        csv.push_str(&format!("events_sent,{}\n", self.total_events_sent()));

        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("sim_time_per_second,{:.2}\n", self.timing.sim_time_per_second));
        csv.push_str(&format!("activities_per_second,{:.2}\n", self.timing.activities_per_second));

        csv
    }

    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Exports per-link statistics to CSV.
    pub fn links_to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("link,component,port,type,latency,events_sent,null_events_sent,untimed_sent,events_received,untimed_received\n");

        for (name, link) in &self.links {
            let c = &link.counters;
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{}\n",
                name,
                link.component,
                link.port,
                link.link_type,
                link.latency,
                c.events_sent,
                c.null_events_sent,
                c.untimed_sent,
                c.events_received,
                c.untimed_received,
            ));
        }

        csv
    }

    pub fn links_to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.links_to_csv())
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Kernel Statistics ===")?;
        writeln!(w)?;

        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        if let Some(ref start) = self.metadata.start_time {
            writeln!(w, "Started: {}", start)?;
        }
        if let Some(ref end) = self.metadata.end_time {
            writeln!(w, "Ended: {}", end)?;
        }
        writeln!(w)?;

        writeln!(w, "--- Dispatch ---")?;
        writeln!(w, "Final simulation time: {}", self.final_time)?;
        writeln!(w, "Activities executed: {}", self.dispatch.activities_executed)?;
        writeln!(w, "Execution errors: {}", self.dispatch.execution_errors)?;
        writeln!(w, "Max queue depth: {}", self.dispatch.max_queue_depth)?;
        writeln!(w, "Untimed phases: {}", self.dispatch.untimed_phases)?;
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Sim time/sec: {:.2}", self.timing.sim_time_per_second)?;
        writeln!(w, "Activities/sec: {:.2}", self.timing.activities_per_second)?;
        writeln!(w)?;

        writeln!(w, "--- Links ---")?;
        for (name, link) in &self.links {
            writeln!(w, "{} ({}, {}.{}):", name, link.link_type, link.component, link.port)?;
            writeln!(w, "  Latency: {}", link.latency)?;
            writeln!(
                w,
                "  Sent: {} (null: {}, untimed: {}), Received: {} (untimed: {})",
                link.counters.events_sent,
                link.counters.null_events_sent,
                link.counters.untimed_sent,
                link.counters.events_received,
                link.counters.untimed_received
            )?;
        }

        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn unix_timestamp() -> String {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}s", duration.as_secs())
}

/// Folds dispatcher and link exports into a [`KernelStats`].
#[derive(Debug, Default)]
pub struct StatsCollector {
    stats: KernelStats,
    timer: Option<Timer>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            stats: KernelStats::new(),
            timer: None,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.stats.metadata.name = name.into();
    }

    pub fn set_config_file(&mut self, path: impl Into<String>) {
        self.stats.metadata.config_file = Some(path.into());
    }

    pub fn start(&mut self) {
        self.timer = Some(Timer::start());
        self.stats.record_start();
    }

    /// Stops timing and computes final statistics.
    pub fn stop(&mut self) {
        self.stats.record_end();
        if let Some(ref timer) = self.timer {
            self.stats.compute_timing(timer.elapsed_ms());
        }
    }

    /// Updates statistics from the JSON exported by
    /// [`Simulation::export_stats`](crate::context::Simulation::export_stats)
    /// and [`LinkArena::export_stats`](crate::link::LinkArena::export_stats).
    ///
    /// Unknown or missing fields are ignored.
    pub fn update_from_json(&mut self, json: &serde_json::Value) {
        if let Some(sim) = json.get("simulation") {
            self.stats.final_time = sim["current_cycle"].as_u64().unwrap_or(0);
            if let Ok(dispatch) = serde_json::from_value::<DispatchStats>(sim["dispatch"].clone()) {
                self.stats.dispatch = dispatch;
            }
        }

        if let Some(links) = json.get("links").and_then(|l| l.as_array()) {
            for link in links {
                let Some(name) = link["name"].as_str() else {
                    continue;
                };
                let counters = serde_json::from_value::<LinkCounters>(link["counters"].clone()).unwrap_or_default();
                self.stats.links.insert(
                    name.to_string(),
                    LinkStats {
                        component: link["component"].as_str().unwrap_or_default().to_string(),
                        port: link["port"].as_str().unwrap_or_default().to_string(),
                        link_type: link["type"].as_str().unwrap_or("unknown").to_string(),
                        latency: link["latency"].as_u64().unwrap_or(0),
                        counters,
                    },
                );
            }
        }
    }

    pub fn stats(&self) -> &KernelStats {
        &self.stats
    }

    pub fn into_stats(self) -> KernelStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_creation() {
        let stats = KernelStats::new().with_name("Mesh 4x4");

        assert_eq!(stats.metadata.name, "Mesh 4x4");
        assert_eq!(stats.metadata.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_stats_json_export() {
        let mut stats = KernelStats::new();
        stats.final_time = 1000;
        stats.dispatch.activities_executed = 250;

        let json = stats.to_json().unwrap();
        assert!(json.contains("1000"));
        assert!(json.contains("250"));
    }

    #[test]
    fn test_stats_csv_export() {
        let mut stats = KernelStats::new();
        stats.final_time = 1000;
        stats.dispatch.activities_executed = 500;

        let csv = stats.to_csv();
        assert!(csv.contains("final_time,1000"));
        assert!(csv.contains("activities_executed,500"));
    }

    #[test]
    fn test_link_stats_csv() {
        let mut stats = KernelStats::new();
        stats.links.insert(
            "cpu_mem.left".to_string(),
            LinkStats {
                component: "cpu".into(),
                port: "mem".into(),
                link_type: "handler".into(),
                latency: 1000,
                counters: LinkCounters {
                    events_sent: 12,
                    null_events_sent: 2,
                    ..Default::default()
                },
            },
        );

        let csv = stats.links_to_csv();
        assert!(csv.contains("cpu_mem.left,cpu,mem,handler,1000,12,2,0,0,0"));
        assert_eq!(stats.total_events_sent(), 12);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_stats_collector() {
        let mut collector = StatsCollector::new();
        collector.set_name("Test");
        collector.start();

        std::thread::sleep(std::time::Duration::from_millis(5));

        collector.stop();

        let stats = collector.stats();
        assert_eq!(stats.metadata.name, "Test");
        assert!(stats.timing.total_wall_time_ms >= 5.0);
    }

    #[test]
    fn test_stats_collector_from_json() {
        let mut collector = StatsCollector::new();

        let json = serde_json::json!({
            "simulation": {
                "current_cycle": 4000,
                "dispatch": {
                    "activities_executed": 40,
                    "execution_errors": 0,
                    "max_queue_depth": 7,
                    "untimed_phases": 2
                }
            },
            "links": [
                {
                    "name": "link#0v0",
                    "component": "cpu",
                    "port": "mem",
                    "type": "handler",
                    "latency": 100,
                    "counters": { "events_sent": 40, "null_events_sent": 0, "untimed_sent": 1,
                                  "events_received": 0, "untimed_received": 0 }
                },
                { "component": "nameless" }
            ]
        });

        collector.update_from_json(&json);

        let stats = collector.into_stats();
        assert_eq!(stats.final_time, 4000);
        assert_eq!(stats.dispatch.max_queue_depth, 7);
        assert_eq!(stats.links.len(), 1);
        let link = &stats.links["link#0v0"];
        assert_eq!(link.counters.events_sent, 40);
        assert_eq!(link.latency, 100);
    }

    #[test]
    fn test_summary_output() {
        let mut stats = KernelStats::new().with_name("Summary Test");
        stats.final_time = 1000;
        stats.dispatch.activities_executed = 100;

        let summary = stats.summary();
        assert!(summary.contains("Summary Test"));
        assert!(summary.contains("Activities executed: 100"));
    }
}
