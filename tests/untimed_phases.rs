//! Integration tests for untimed data exchange.
//!
//! Covers the init-phase handshake loop, the rule that data sent in phase k
//! is readable from phase k+1, and untimed traffic during the complete phase.

use std::any::Any;

use simlink::{
    Event, EventHandler, EventPayload, LinkArena, LinkEndpoint, LinkError, LinkHandle, LinkMode, LinkResult,
    SimContext, Simulation,
};

#[derive(Debug, Clone, PartialEq)]
struct Hello {
    from: &'static str,
    hops: u32,
}

impl EventPayload for Hello {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

fn hello(ev: &Event) -> Hello {
    ev.payload_as::<Hello>().cloned().unwrap()
}

fn pair(arena: &mut LinkArena) -> (LinkHandle, LinkHandle) {
    arena.create_pair(
        LinkEndpoint::new(1, "router0", "Router", "east"),
        LinkEndpoint::new(2, "router1", "Router", "west"),
        0,
    )
}

// ============================================================================
// Init Phase
// ============================================================================

#[test]
fn test_handshake_runs_until_quiet() {
    let mut sim = Simulation::with_timebase("1ps").unwrap();
    let mut arena = LinkArena::new();
    let (east, west) = pair(&mut arena);

    let mut trace = Vec::new();
    let rounds = sim
        .run_untimed_phases(|ctx, phase| -> LinkResult<()> {
            if phase == 0 {
                arena.send_untimed_data(east, ctx, Event::new(Hello { from: "router0", hops: 0 }))?;
            }
            while let Some(ev) = arena.recv_untimed_data(west, ctx)? {
                let msg = hello(&ev);
                trace.push((phase, "router1", msg.clone()));
                if msg.hops < 2 {
                    arena.send_untimed_data(west, ctx, Event::new(Hello { from: "router1", hops: msg.hops + 1 }))?;
                }
            }
            while let Some(ev) = arena.recv_untimed_data(east, ctx)? {
                let msg = hello(&ev);
                trace.push((phase, "router0", msg.clone()));
                if msg.hops < 2 {
                    arena.send_untimed_data(east, ctx, Event::new(Hello { from: "router0", hops: msg.hops + 1 }))?;
                }
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(
        trace,
        vec![
            (1, "router1", Hello { from: "router0", hops: 0 }),
            (2, "router0", Hello { from: "router1", hops: 1 }),
            (3, "router1", Hello { from: "router0", hops: 2 }),
        ]
    );
    // Phase 3 sent nothing, so it was the last
    assert_eq!(rounds, 4);
    assert_eq!(sim.untimed_phase(), 4);
    assert_eq!(arena.get(east).unwrap().counters().untimed_sent, 2);
    assert_eq!(arena.get(west).unwrap().counters().untimed_received, 2);
}

#[test]
fn test_same_phase_data_is_not_visible() {
    let sim = Simulation::with_timebase("1ps").unwrap();
    let mut arena = LinkArena::new();
    let (east, west) = pair(&mut arena);

    for hops in 0..3 {
        arena
            .send_untimed_data(east, &sim, Event::new(Hello { from: "router0", hops }))
            .unwrap();
    }
    assert!(arena.recv_untimed_data(west, &sim).unwrap().is_none());
    assert_eq!(sim.untimed_message_count(), 3);
}

#[test]
fn test_recv_before_any_send() {
    let sim = Simulation::with_timebase("1ps").unwrap();
    let mut arena = LinkArena::new();
    let (east, west) = pair(&mut arena);

    assert!(arena.recv_untimed_data(east, &sim).unwrap().is_none());
    assert!(arena.recv_untimed_data(west, &sim).unwrap().is_none());
}

// ============================================================================
// Run and Complete Phases
// ============================================================================

#[test]
fn test_untimed_after_run() {
    let mut sim = Simulation::with_timebase("1ns").unwrap();
    let mut arena = LinkArena::new();
    let (east, west) = pair(&mut arena);

    sim.run_untimed_phases(|_, _| Ok::<(), LinkError>(())).unwrap();
    let phase_after_init = sim.untimed_phase();

    arena.set_functor(west, EventHandler::new(|_| {})).unwrap();
    arena.set_polling(east).unwrap();
    arena.finalize_configuration(east, &sim).unwrap();
    arena.finalize_configuration(west, &sim).unwrap();

    assert!(matches!(
        arena.send_untimed_data(east, &sim, Event::empty()),
        Err(LinkError::UntimedDuringRun { .. })
    ));
    arena.send_impl(east, &sim, 0, None).unwrap();
    sim.run().unwrap();

    arena.prepare_for_complete(east).unwrap();
    arena.prepare_for_complete(west).unwrap();
    assert_eq!(arena.get(west).unwrap().mode(), LinkMode::Complete);

    let mut got = Vec::new();
    sim.run_untimed_phases(|ctx, phase| -> LinkResult<()> {
        if phase == phase_after_init {
            arena.send_untimed_data(east, ctx, Event::new(Hello { from: "router0", hops: 9 }))?;
        }
        while let Some(ev) = arena.recv_untimed_data(west, ctx)? {
            got.push((phase, ev.delivery_time(), hello(&ev).hops));
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(got, vec![(phase_after_init + 1, phase_after_init + 1, 9)]);
}
