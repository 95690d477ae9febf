//! End-to-end scenarios over the built link

use proptest::prelude::*;

use qrelay_core::{BellOutcome, QrelayError, RoleKind, SlotIndex, SlotRef};
use qrelay_link::{LinkConfig, TopologyBuilder};
use qrelay_quantum::DepolarNoise;
use qrelay_runtime::{
    EntanglementRole, EventDriver, Network, NodeCapabilities, PairSource, PhysicalLink, PortWiring,
    QuantumChannel, RoleStep, FIBRE_C_KM_PER_S,
};
use qrelay_test::{init_tracing, run_direct_swap, run_distillation, LinkExperiment};

#[test]
fn source_end_node_emits_and_waits_for_both_slots() {
    init_tracing();
    let mut net = Network::with_seed(5);
    let station = net
        .add_node("A", NodeCapabilities::station(), 2, DepolarNoise::None)
        .unwrap();
    // Slot 1 is fed over 10 km of fibre, slot 0 locally
    let source = net
        .add_source(PairSource::new(
            station,
            "QSource_A",
            vec![(BellOutcome::PhiPlus, 1.0)],
            [
                PortWiring::remote(
                    SlotRef::new(station, 1),
                    QuantumChannel::fibre(10.0, FIBRE_C_KM_PER_S, DepolarNoise::None),
                ),
                PortWiring::local(SlotRef::new(station, 0)),
            ],
        ))
        .unwrap();

    let mut role = EntanglementRole::from_flags(
        &mut net,
        station,
        true,
        false,
        true,
        "A",
        &[SlotIndex::new(0), SlotIndex::new(1)],
    )
    .unwrap();
    assert!(role.is_connected(&net));
    role.start(&mut net).unwrap();
    let summary = net.run_until_idle(&mut [&mut role]).unwrap();
    assert!(summary.is_settled());

    let s0 = SlotRef::new(station, 0);
    let s1 = SlotRef::new(station, 1);
    assert_eq!(
        role.steps(),
        &[
            RoleStep::TriggeredSource(source),
            RoleStep::Suspended(s0),
            RoleStep::Resumed(s0),
            RoleStep::Suspended(s1),
            RoleStep::Resumed(s1),
            RoleStep::Completed,
        ]
    );
}

#[test]
fn source_without_local_source_is_not_connected() {
    let mut config = LinkConfig::noiseless(5.0);
    config.a.source = None;
    let (mut net, layout) = TopologyBuilder::new(config).build().unwrap();
    let mut role = EntanglementRole::new(&mut net, layout.a, RoleKind::Source, "A", &[]).unwrap();
    assert!(!role.is_connected(&net));
    assert!(matches!(
        role.start(&mut net),
        Err(QrelayError::SourceNotFound { found: 0, .. })
    ));
    assert_eq!(net.now().as_nanos(), 0);
}

#[test]
fn noisy_then_ideal_distillation() {
    let noisy = run_distillation(LinkConfig::noisy(0.8).with_seed(21), Default::default()).unwrap();
    assert!(noisy.a.fidelity < 1.0 && noisy.a.fidelity > 0.0);
    assert!(noisy.b.fidelity < 1.0 && noisy.b.fidelity > 0.0);

    let mut ideal = LinkConfig::noisy(1.0).with_seed(21);
    for station in [&mut ideal.a, &mut ideal.b] {
        station.memory_noise = DepolarNoise::None;
        station.channel_noise = DepolarNoise::None;
        if let Some(source) = station.source.as_mut() {
            source.emission_noise = DepolarNoise::None;
        }
    }
    let clean = run_distillation(ideal, Default::default()).unwrap();
    assert!((clean.a.fidelity - 1.0).abs() < 1e-9);
    assert!((clean.b.fidelity - 1.0).abs() < 1e-9);
}

#[test]
fn roles_keep_reservations_across_attempts() {
    let mut experiment = LinkExperiment::new(LinkConfig::noiseless(10.0)).unwrap();
    let layout = *experiment.layout();
    let roles = experiment.standard_roles().unwrap();

    // A second repeater on the same relay slots is refused
    let err = EntanglementRole::new(
        experiment.network_mut(),
        layout.relay,
        RoleKind::Repeater,
        "intruder",
        &[SlotIndex::new(1), SlotIndex::new(2)],
    )
    .unwrap_err();
    assert!(matches!(err, QrelayError::SlotConflict { ref owner, .. } if owner == "Repeater"));

    // Distinct slots are fine
    let other = EntanglementRole::new(
        experiment.network_mut(),
        layout.relay,
        RoleKind::Repeater,
        "other",
        &[SlotIndex::new(2), SlotIndex::new(3)],
    )
    .unwrap();
    other.teardown(experiment.network_mut()).unwrap();
    for role in [roles.a, roles.relay, roles.b] {
        role.teardown(experiment.network_mut()).unwrap();
    }
    assert!(experiment
        .network()
        .registry(layout.relay)
        .unwrap()
        .reserved_slots()
        .is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_noiseless_direct_swap(seed in any::<u64>(), distance in 1.0f64..100.0) {
        let result = run_direct_swap(LinkConfig::noiseless(distance).with_seed(seed)).unwrap();
        prop_assert!(result.fidelity >= 0.99);
        prop_assert_eq!(result.swap.correction, result.swap.outcome.correction());
    }

    #[test]
    fn prop_noisy_distillation_bounds(seed in any::<u64>()) {
        let report = run_distillation(LinkConfig::noisy(0.8).with_seed(seed), Default::default()).unwrap();
        for link in [report.a, report.b] {
            prop_assert!(link.outcome.index() < 4);
            prop_assert!(link.fidelity > 0.0 && link.fidelity < 1.0);
        }
    }

    #[test]
    fn prop_reset_replays_steps(seed in any::<u64>()) {
        let (mut net, layout) = TopologyBuilder::new(LinkConfig::noisy(0.8).with_seed(seed)).build().unwrap();
        let mut a = EntanglementRole::new(&mut net, layout.a, RoleKind::Source, "A", &[]).unwrap();
        let mut relay = EntanglementRole::new(
            &mut net,
            layout.relay,
            RoleKind::Repeater,
            "Repeater",
            &[SlotIndex::new(0), SlotIndex::new(1)],
        )
        .unwrap();

        let mut traces = Vec::new();
        for _ in 0..2 {
            a.start(&mut net).unwrap();
            relay.start(&mut net).unwrap();
            net.run_until_idle(&mut [&mut a, &mut relay]).unwrap().ensure_settled().unwrap();
            traces.push((a.steps().to_vec(), relay.steps().to_vec()));
            a.reset().unwrap();
            relay.reset().unwrap();
        }
        prop_assert_eq!(&traces[0], &traces[1]);
    }
}
