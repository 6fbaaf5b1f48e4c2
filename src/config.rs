//! Configuration system.
//!
//! Link topologies can be described in YAML or JSON and built into a
//! [`LinkArena`] in one call.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   timebase: 1ps
//!   rank: 0
//!   thread: 0
//!   log_level: info
//!
//! links:
//!   - name: cpu0_mem
//!     latency: 10ns
//!     left:  { component: cpu0, type: Core, port: mem, id: 1 }
//!     right: { component: mem0, type: Dram, port: cpu, id: 2, mode: poll }
//! ```
//!
//! Order tags are not configured: each link gets the index of its name in
//! sorted order, so every partition that reads the same file agrees on
//! them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::context::Simulation;
use crate::error::LinkError;
use crate::link::{LinkArena, LinkEndpoint, LinkHandle};
use crate::stats::StatsCollector;
use crate::time::{TimeAuthority, TimeError, TimeLord, UnitValue};
use crate::types::{ComponentId, LinkTag, RankInfo};

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Time error: {0}")]
    Time(#[from] TimeError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Global simulation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Duration of one core cycle
    #[serde(default = "default_timebase")]
    pub timebase: String,

    #[serde(default)]
    pub rank: u32,

    #[serde(default)]
    pub thread: u32,

    /// Logging level (trace, debug, info, warn, error) or an `EnvFilter`
    /// directive such as `simlink::link=trace`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether [`SimConfig::stats_collector`] hands out a collector
    #[serde(default)]
    pub collect_stats: bool,
}

fn default_timebase() -> String {
    "1ps".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            timebase: default_timebase(),
            rank: 0,
            thread: 0,
            log_level: default_log_level(),
            collect_stats: false,
        }
    }
}

/// How an endpoint consumes events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    /// A handler is installed by the owning component after build
    #[default]
    Handler,
    /// Configured for polling at build time
    Poll,
}

/// One end of a configured link.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub component: String,

    #[serde(rename = "type", default)]
    pub comp_type: String,

    pub port: String,

    #[serde(default)]
    pub id: ComponentId,

    #[serde(default)]
    pub mode: EndpointMode,
}

impl EndpointConfig {
    pub fn new(component: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            comp_type: String::new(),
            port: port.into(),
            id: 0,
            mode: EndpointMode::Handler,
        }
    }

    pub fn with_type(mut self, comp_type: impl Into<String>) -> Self {
        self.comp_type = comp_type.into();
        self
    }

    pub fn with_id(mut self, id: ComponentId) -> Self {
        self.id = id;
        self
    }

    pub fn polling(mut self) -> Self {
        self.mode = EndpointMode::Poll;
        self
    }

    fn to_endpoint(&self) -> LinkEndpoint {
        LinkEndpoint::new(self.id, &self.component, &self.comp_type, &self.port)
    }
}

/// Configuration for a link pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Unique link name; also decides the order tag
    pub name: String,

    /// Latency of both halves as a time string. Defaults to one core cycle.
    #[serde(default)]
    pub latency: Option<String>,

    pub left: EndpointConfig,

    pub right: EndpointConfig,
}

impl LinkConfig {
    /// Validates the link configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation("Link with empty name".to_string()));
        }
        for end in [&self.left, &self.right] {
            if end.component.is_empty() || end.port.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Link {} has an endpoint without component or port",
                    self.name
                )));
            }
        }
        if self.left.component == self.right.component && self.left.port == self.right.port {
            return Err(ConfigError::Validation(format!(
                "Link {} connects {}.{} to itself",
                self.name, self.left.component, self.left.port
            )));
        }
        if let Some(latency) = &self.latency {
            UnitValue::parse(latency)?;
        }
        Ok(())
    }
}

/// Handles created for one configured link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltLink {
    pub left: LinkHandle,
    pub right: LinkHandle,
    pub tag: LinkTag,
}

/// Result of [`SimConfig::build`], keyed by link name.
#[derive(Clone, Debug, Default)]
pub struct BuiltLinks {
    links: BTreeMap<String, BuiltLink>,
}

impl BuiltLinks {
    pub fn get(&self, name: &str) -> Option<&BuiltLink> {
        self.links.get(name)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Iterates in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BuiltLink)> {
        self.links.iter()
    }
}

/// Complete simulation configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// Global simulation parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Link definitions
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        TimeLord::new(&self.simulation.timebase)?;
        tracing_subscriber::EnvFilter::try_new(&self.simulation.log_level).map_err(|e| {
            ConfigError::Validation(format!("Invalid log level '{}': {}", self.simulation.log_level, e))
        })?;

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for link in &self.links {
            link.validate()?;
            if !names.insert(link.name.as_str()) {
                return Err(ConfigError::Validation(format!("Duplicate link name: {}", link.name)));
            }
            for end in [&link.left, &link.right] {
                if !ports.insert((end.component.as_str(), end.port.as_str())) {
                    return Err(ConfigError::Validation(format!(
                        "Port {}.{} is used by more than one link",
                        end.component, end.port
                    )));
                }
            }
        }

        Ok(())
    }

    /// Order tag of every link: its index in name order.
    pub fn assign_order_tags(&self) -> BTreeMap<String, LinkTag> {
        let mut names: Vec<&str> = self.links.iter().map(|l| l.name.as_str()).collect();
        names.sort_unstable();
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i as LinkTag))
            .collect()
    }

    /// Creates the simulation context described by `simulation`.
    pub fn create_simulation(&self) -> ConfigResult<Simulation> {
        let params = &self.simulation;
        let time_lord = TimeLord::new(&params.timebase)?;
        Ok(Simulation::new(time_lord, RankInfo::new(params.rank, params.thread)))
    }

    /// Installs the global subscriber at `simulation.log_level`. `RUST_LOG`
    /// still wins when set.
    pub fn init_logging(&self) {
        crate::init_logging(&self.simulation.log_level);
    }

    /// A fresh collector when `collect_stats` is on.
    pub fn stats_collector(&self) -> Option<StatsCollector> {
        self.simulation.collect_stats.then(StatsCollector::new)
    }

    /// Creates every configured link pair in `arena`.
    ///
    /// Latency strings are resolved through `authority`; polling endpoints
    /// are configured. Handler endpoints are left for their components.
    pub fn build(&self, arena: &mut LinkArena, authority: &dyn TimeAuthority) -> ConfigResult<BuiltLinks> {
        let tags = self.assign_order_tags();
        let mut built = BuiltLinks::default();

        for link in &self.links {
            let tag = tags.get(&link.name).copied().unwrap_or_default();
            let (left, right) = arena.create_pair(link.left.to_endpoint(), link.right.to_endpoint(), tag);

            if let Some(latency) = &link.latency {
                let cycles = authority.sim_cycles(latency, "config")?;
                arena.set_latency(left, cycles)?;
                arena.set_latency(right, cycles)?;
            }
            if link.left.mode == EndpointMode::Poll {
                arena.set_polling(left)?;
            }
            if link.right.mode == EndpointMode::Poll {
                arena.set_polling(right)?;
            }

            tracing::debug!(name = %link.name, tag, %left, %right, "built link");
            built.links.insert(link.name.clone(), BuiltLink { left, right, tag });
        }

        tracing::info!(links = built.len(), "link topology built");
        Ok(built)
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn find_link(&self, name: &str) -> Option<&LinkConfig> {
        self.links.iter().find(|l| l.name == name)
    }
}

/// Builder for creating SimConfig programmatically.
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the core time base.
    pub fn timebase(mut self, timebase: impl Into<String>) -> Self {
        self.config.simulation.timebase = timebase.into();
        self
    }

    pub fn rank(mut self, rank: u32, thread: u32) -> Self {
        self.config.simulation.rank = rank;
        self.config.simulation.thread = thread;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn collect_stats(mut self, enable: bool) -> Self {
        self.config.simulation.collect_stats = enable;
        self
    }

    /// Adds a link.
    pub fn add_link(
        mut self,
        name: impl Into<String>,
        latency: Option<&str>,
        left: EndpointConfig,
        right: EndpointConfig,
    ) -> Self {
        self.config.links.push(LinkConfig {
            name: name.into(),
            latency: latency.map(str::to_string),
            left,
            right,
        });
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use crate::link::LinkType;

    const TOPOLOGY: &str = r#"
simulation:
  timebase: 1ps
  rank: 1
  log_level: debug

links:
  - name: mem_bus
    latency: 10ns
    left:  { component: cpu0, type: Core, port: mem, id: 1 }
    right: { component: mem0, type: Dram, port: cpu, id: 2, mode: poll }
  - name: cpu_nic
    left:  { component: cpu0, port: nic }
    right: { component: nic0, port: host }
"#;

    #[test]
    fn test_default_config() {
        let config = SimConfig::new();
        assert_eq!(config.simulation.timebase, "1ps");
        assert_eq!(config.simulation.log_level, "info");
        assert!(config.links.is_empty());
        assert!(config.stats_collector().is_none());
    }

    #[test]
    fn test_yaml_parsing() {
        let config = SimConfig::from_yaml(TOPOLOGY).unwrap();
        assert_eq!(config.simulation.rank, 1);
        assert_eq!(config.link_count(), 2);

        let bus = config.find_link("mem_bus").unwrap();
        assert_eq!(bus.latency.as_deref(), Some("10ns"));
        assert_eq!(bus.left.comp_type, "Core");
        assert_eq!(bus.right.mode, EndpointMode::Poll);
        assert_eq!(config.find_link("cpu_nic").unwrap().left.mode, EndpointMode::Handler);
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "simulation": { "timebase": "1ns" },
            "links": [
                { "name": "a", "left": { "component": "x", "port": "p" },
                               "right": { "component": "y", "port": "p" } }
            ]
        }"#;

        let config = SimConfig::from_json(json).unwrap();
        assert_eq!(config.simulation.timebase, "1ns");
        assert_eq!(config.link_count(), 1);
    }

    #[test]
    fn test_order_tags_follow_sorted_names() {
        let config = SimConfig::from_yaml(TOPOLOGY).unwrap();
        let tags = config.assign_order_tags();
        assert_eq!(tags["cpu_nic"], 0);
        assert_eq!(tags["mem_bus"], 1);
    }

    #[test]
    fn test_build_topology() {
        let config = SimConfig::from_yaml(TOPOLOGY).unwrap();
        let sim = config.create_simulation().unwrap();
        assert_eq!(sim.rank(), RankInfo::new(1, 0));

        let mut arena = LinkArena::new();
        let built = config.build(&mut arena, sim.time_authority()).unwrap();
        assert_eq!(built.len(), 2);
        assert_eq!(arena.len(), 4);

        let bus = built.get("mem_bus").unwrap();
        assert_eq!(bus.tag, 1);
        assert_eq!(arena.latency(bus.left).unwrap(), 10_000);
        assert_eq!(arena.latency(bus.right).unwrap(), 10_000);
        assert_eq!(arena.get(bus.right).unwrap().link_type(), LinkType::Poll);
        assert_eq!(arena.get(bus.left).unwrap().link_type(), LinkType::Uninitialized);
        assert_eq!(arena.get(bus.left).unwrap().endpoint().component, "cpu0");

        let nic = built.get("cpu_nic").unwrap();
        assert_eq!(arena.latency(nic.left).unwrap(), 1);
        let names: Vec<&String> = built.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["cpu_nic", "mem_bus"]);
    }

    #[test]
    fn test_builder() {
        let config = SimConfigBuilder::new()
            .timebase("1fs")
            .rank(2, 3)
            .collect_stats(true)
            .add_link(
                "l0",
                Some("2.5ns"),
                EndpointConfig::new("a", "out").with_type("Src").with_id(7),
                EndpointConfig::new("b", "in").polling(),
            )
            .build()
            .unwrap();

        assert_eq!(config.simulation.rank, 2);
        assert_eq!(config.simulation.thread, 3);
        assert!(config.simulation.collect_stats);
        assert!(config.stats_collector().is_some());
        assert_eq!(config.links[0].left.id, 7);
        assert_eq!(config.links[0].right.mode, EndpointMode::Poll);
    }

    #[test]
    fn test_validation_duplicate_link() {
        let yaml = r#"
links:
  - name: a
    left:  { component: x, port: p0 }
    right: { component: y, port: p0 }
  - name: a
    left:  { component: x, port: p1 }
    right: { component: y, port: p1 }
"#;
        let err = SimConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate link name: a"));
    }

    #[test]
    fn test_validation_port_reuse() {
        let yaml = r#"
links:
  - name: a
    left:  { component: x, port: p }
    right: { component: y, port: p }
  - name: b
    left:  { component: x, port: p }
    right: { component: z, port: p }
"#;
        assert!(matches!(SimConfig::from_yaml(yaml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_bad_latency_and_timebase() {
        let yaml = r#"
links:
  - name: a
    latency: fast
    left:  { component: x, port: p }
    right: { component: y, port: p }
"#;
        assert!(matches!(SimConfig::from_yaml(yaml), Err(ConfigError::Time(_))));

        let yaml = "simulation:\n  timebase: 1 parsec\n";
        assert!(matches!(SimConfig::from_yaml(yaml), Err(ConfigError::Time(_))));
    }

    #[test]
    fn test_validation_log_level() {
        let yaml = "simulation:\n  log_level: simlink::link=trace,warn\n";
        assert!(SimConfig::from_yaml(yaml).is_ok());

        let yaml = "simulation:\n  log_level: simlink=loudly\n";
        assert!(matches!(SimConfig::from_yaml(yaml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_self_loop() {
        let yaml = r#"
links:
  - name: loop
    left:  { component: x, port: p }
    right: { component: x, port: p }
"#;
        assert!(SimConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            SimConfig::from_file("topology.toml"),
            Err(ConfigError::UnknownFormat(ext)) if ext == "toml"
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = SimConfig::from_yaml(TOPOLOGY).unwrap();

        let yaml = config.to_yaml().unwrap();
        let restored = SimConfig::from_yaml(&yaml).unwrap();
        assert_eq!(restored.link_count(), 2);
        assert_eq!(restored.assign_order_tags(), config.assign_order_tags());

        let json = config.to_json().unwrap();
        let restored = SimConfig::from_json(&json).unwrap();
        assert_eq!(restored.simulation.rank, 1);
    }
}
