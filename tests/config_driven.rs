//! End-to-end tests driven by a topology file.
//!
//! Loads a YAML topology, builds the links, runs a short workload, and
//! folds the exported statistics into the collector the config hands out.

use std::sync::Arc;

use parking_lot::Mutex;
use simlink::{
    ConfigError, EndpointConfig, Event, EventHandler, LinkArena, LinkType, QueueKind, SimConfig, SimConfigBuilder,
    SimContext,
};

const TOPOLOGY: &str = r#"
simulation:
  timebase: 1ps
  rank: 0
  log_level: warn
  collect_stats: true

links:
  - name: l2_mem
    latency: 10ns
    left: { component: l2, type: Cache, port: mem, id: 2 }
    right: { component: mem0, type: Dram, port: cache, id: 3 }
  - name: cpu_l1
    latency: 500ps
    left: { component: cpu0, type: Core, port: dcache, id: 0 }
    right: { component: l1, type: Cache, port: cpu, id: 1 }
  - name: debug_tap
    left: { component: cpu0, type: Core, port: tap, id: 0 }
    right: { component: probe, type: Probe, port: in, id: 4, mode: poll }
"#;

// ============================================================================
// Loading and Building
// ============================================================================

#[test]
fn test_build_from_yaml() {
    let config = SimConfig::from_yaml(TOPOLOGY).unwrap();
    assert_eq!(config.link_count(), 3);
    assert!(config.simulation.collect_stats);

    let sim = config.create_simulation().unwrap();
    let mut arena = LinkArena::new();
    let links = config.build(&mut arena, sim.time_authority()).unwrap();

    assert_eq!(arena.len(), 6);
    // Tags follow name order, not file order
    assert_eq!(links.get("cpu_l1").unwrap().tag, 0);
    assert_eq!(links.get("debug_tap").unwrap().tag, 1);
    assert_eq!(links.get("l2_mem").unwrap().tag, 2);

    let l2_mem = links.get("l2_mem").unwrap();
    assert_eq!(arena.latency(l2_mem.left).unwrap(), 10_000);
    assert_eq!(arena.latency(l2_mem.right).unwrap(), 10_000);

    let tap = links.get("debug_tap").unwrap();
    assert_eq!(arena.latency(tap.left).unwrap(), 1);
    assert_eq!(arena.get(tap.right).unwrap().link_type(), LinkType::Poll);
    assert_eq!(arena.get(tap.left).unwrap().link_type(), LinkType::Uninitialized);
}

#[test]
fn test_invalid_topologies_rejected() {
    let reused_port = SimConfigBuilder::new()
        .add_link("a", None, EndpointConfig::new("x", "p"), EndpointConfig::new("y", "p"))
        .add_link("b", None, EndpointConfig::new("x", "p"), EndpointConfig::new("z", "p"))
        .build();
    assert!(matches!(reused_port, Err(ConfigError::Validation(_))));

    let bad_latency = SimConfigBuilder::new()
        .add_link("a", Some("fast"), EndpointConfig::new("x", "p"), EndpointConfig::new("y", "p"))
        .build();
    assert!(matches!(bad_latency, Err(ConfigError::Time(_))));

    let bad_timebase = SimConfigBuilder::new().timebase("soon").build();
    assert!(bad_timebase.is_err());

    let bad_log_level = SimConfigBuilder::new().log_level("simlink=shout").build();
    assert!(matches!(bad_log_level, Err(ConfigError::Validation(_))));
}

#[test]
fn test_tags_survive_file_round_trip() {
    let config = SimConfig::from_yaml(TOPOLOGY).unwrap();
    let path = std::env::temp_dir().join(format!("simlink-topology-{}.json", std::process::id()));
    config.to_json_file(&path).unwrap();
    let reloaded = SimConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(reloaded.assign_order_tags(), config.assign_order_tags());
    assert_eq!(reloaded.find_link("l2_mem").unwrap().latency.as_deref(), Some("10ns"));
}

// ============================================================================
// Workload
// ============================================================================

#[test]
fn test_workload_and_stats() {
    let config = SimConfig::from_yaml(TOPOLOGY).unwrap();
    config.init_logging();
    let mut sim = config.create_simulation().unwrap();
    let mut arena = LinkArena::new();
    let links = config.build(&mut arena, sim.time_authority()).unwrap();
    let cpu_l1 = *links.get("cpu_l1").unwrap();
    let l2_mem = *links.get("l2_mem").unwrap();
    let tap = *links.get("debug_tap").unwrap();

    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&arrivals);
    arena
        .set_functor(
            cpu_l1.right,
            EventHandler::new(move |ev| sink.lock().push(("l1", ev.map(|e| e.delivery_time())))),
        )
        .unwrap();
    let sink = Arc::clone(&arrivals);
    arena
        .set_functor(
            l2_mem.right,
            EventHandler::new(move |ev| sink.lock().push(("mem0", ev.map(|e| e.delivery_time())))),
        )
        .unwrap();

    let mut collector = config.stats_collector().expect("collect_stats is on");
    collector.set_name("config_driven");
    collector.start();

    for (_, link) in links.iter() {
        arena.finalize_configuration(link.left, &sim).unwrap();
        arena.finalize_configuration(link.right, &sim).unwrap();
    }
    assert_eq!(arena.get(tap.left).unwrap().send_queue_kind(), Some(QueueKind::Polling));

    arena.send_impl(cpu_l1.left, &sim, 0, Some(Event::empty())).unwrap();
    arena.send_impl(l2_mem.left, &sim, 0, None).unwrap();
    arena.send_impl(tap.left, &sim, 0, Some(Event::empty())).unwrap();
    sim.run().unwrap();

    assert_eq!(*arrivals.lock(), vec![("l1", Some(500)), ("mem0", None)]);
    assert_eq!(sim.current_cycle(), 10_000);
    let probed = arena.recv(tap.right, &sim).unwrap().unwrap();
    assert_eq!(probed.delivery_time(), 1);

    collector.stop();
    collector.update_from_json(&sim.export_stats());
    collector.update_from_json(&arena.export_stats());
    let stats = collector.into_stats();

    assert_eq!(stats.final_time, 10_000);
    assert_eq!(stats.dispatch.activities_executed, 2);
    assert_eq!(stats.links.len(), 6);
    assert_eq!(stats.total_events_sent(), 3);

    let probe = stats.links.values().find(|l| l.component == "probe").unwrap();
    assert_eq!(probe.link_type, "poll");
    assert_eq!(probe.counters.events_received, 1);

    let csv = stats.links_to_csv();
    assert!(csv.lines().count() >= 7);
    assert!(stats.summary().contains("config_driven"));
}
