//! End-to-end scenarios: synthetic machines driven through discovery-free
//! topology construction, place building and binding.

use new_zealand::nz;

use many_places::{
    AffinityConfig, AffinityContext, AffinityType, AttrValue, CoreAttrs, CoreType, HwThread,
    LayerId, LayerKind, ProcMask, SubsetRequest, Topology,
};

fn uniform_2x8x2() -> Topology {
    Topology::from_uniform_counts(nz!(2), nz!(8), nz!(2))
}

/// One socket, six P-cores with SMT pairs (efficiency 1, OS IDs 0..=11)
/// and eight single-thread E-cores (efficiency 0, OS IDs 12..=19).
fn hybrid_machine() -> Topology {
    let mut threads = Vec::new();
    for core in 0..6_u32 {
        for smt in 0..2_u32 {
            let os_id = core * 2 + smt;
            threads.push(HwThread::with_attrs(
                os_id,
                os_id as usize,
                vec![LayerId::Id(0), LayerId::Id(core), LayerId::Id(smt)],
                CoreAttrs {
                    core_type: AttrValue::Value(CoreType::Core),
                    core_eff: AttrValue::Value(1),
                },
            ));
        }
    }
    for core in 6..14_u32 {
        let os_id = 6 + core;
        threads.push(HwThread::with_attrs(
            os_id,
            os_id as usize,
            vec![LayerId::Id(0), LayerId::Id(core), LayerId::Id(0)],
            CoreAttrs {
                core_type: AttrValue::Value(CoreType::Atom),
                core_eff: AttrValue::Value(0),
            },
        ));
    }
    Topology::build(
        vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread],
        threads,
    )
}

/// Three cores with SMT widths (4, 2, 2), OS IDs sequential.
fn nonuniform_machine() -> Topology {
    let mut threads = Vec::new();
    let mut os_id = 0_u32;
    for (core, width) in [(0_u32, 4_u32), (1, 2), (2, 2)] {
        for smt in 0..width {
            threads.push(HwThread::new(
                os_id,
                os_id as usize,
                vec![LayerId::Id(0), LayerId::Id(core), LayerId::Id(smt)],
            ));
            os_id += 1;
        }
    }
    Topology::build(
        vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread],
        threads,
    )
}

#[test]
fn scenario_uniform_compact_thread_granularity() {
    // Uniform 2x8x2, policy compact, granularity thread, no subset.
    let mut config = AffinityConfig::with_type(AffinityType::Compact);
    config.gran = Some(LayerKind::Thread);

    let mut context = AffinityContext::for_topology(uniform_2x8x2(), config);
    context.initialize().unwrap();

    let affinity = context.affinity();
    assert_eq!(affinity.num_masks(), 32);
    for (index, mask) in affinity.masks().iter().enumerate() {
        assert_eq!(mask, &ProcMask::from_ids([u32::try_from(index).unwrap()]));
    }

    let topology = context.topology().unwrap();
    assert!(topology.threads().iter().all(|thread| thread.leader));
    assert_eq!(
        topology.summary(),
        "2 sockets x 8 cores/socket x 2 threads/core (16 total cores)"
    );
}

#[test]
fn scenario_hybrid_scatter_core_granularity() {
    // Hybrid 6P+8E, policy scatter, granularity core: 14 places with the
    // performance cores (highest efficiency) first, SMT siblings together.
    let mut config = AffinityConfig::with_type(AffinityType::Scatter);
    config.gran = Some(LayerKind::Core);

    let mut context = AffinityContext::for_topology(hybrid_machine(), config);
    context.initialize().unwrap();

    let affinity = context.affinity();
    assert_eq!(affinity.num_masks(), 14);

    for mask in affinity.masks().iter().take(6) {
        assert_eq!(mask.count(), 2, "P-core places hold their SMT pair");
        assert!(mask.first().unwrap() < 12);
    }
    for mask in affinity.masks().iter().skip(6) {
        assert_eq!(mask.count(), 1, "E-core places hold one thread");
        assert!(mask.first().unwrap() >= 12);
    }
}

#[test]
fn scenario_subset_second_socket_four_cores() {
    // HW subset "1@1 sockets, 4 cores" against 2x8x2.
    let mut config = AffinityConfig::with_type(AffinityType::Compact);
    config.gran = Some(LayerKind::Thread);

    let mut context = AffinityContext::for_topology(uniform_2x8x2(), config)
        .with_subset(SubsetRequest::parse("1@1sockets,4cores").unwrap());
    context.initialize().unwrap();

    let topology = context.topology().unwrap();
    assert_eq!(topology.num_hw_threads(), 8);
    assert!(topology.is_uniform());
    assert_eq!(topology.counters().num_packages, 1);
    assert_eq!(topology.ratio_at(1), 4);

    assert_eq!(context.full_mask(), &ProcMask::from_ids(16..24));
}

#[test]
fn scenario_balanced_on_nonuniform_machine() {
    // Cores with SMT widths (4, 2, 2), six threads: every core ends up
    // with exactly two threads.
    let mut config = AffinityConfig::with_type(AffinityType::Balanced);
    config.gran = Some(LayerKind::Thread);

    let mut context = AffinityContext::for_topology(nonuniform_machine(), config);
    context.initialize().unwrap();

    let expected = [0_u32, 1, 4, 5, 6, 7];
    for (tid, os_id) in expected.into_iter().enumerate() {
        let gtid = i32::try_from(tid).unwrap();
        context.bind_balanced(gtid, tid, 6).unwrap();
        assert_eq!(
            context.thread_mask(gtid).unwrap(),
            ProcMask::from_ids([os_id]),
            "fine granularity binds thread {tid} to one processor"
        );
    }

    // Coarse granularity binds each thread to its whole core.
    let mut config = AffinityConfig::with_type(AffinityType::Balanced);
    config.gran = Some(LayerKind::Core);
    let mut context = AffinityContext::for_topology(nonuniform_machine(), config);
    context.initialize().unwrap();

    context.bind_balanced(0, 0, 6).unwrap();
    assert_eq!(
        context.thread_mask(0).unwrap(),
        ProcMask::from_ids([0, 1, 2, 3])
    );
    context.bind_balanced(2, 2, 6).unwrap();
    assert_eq!(context.thread_mask(2).unwrap(), ProcMask::from_ids([4, 5]));
}

#[test]
fn scenario_explicit_proclist() {
    // Proclist {0,2,4},{1,3,5},6-11:2 gives five places: two unions and
    // three singles.
    let mut config = AffinityConfig::with_type(AffinityType::Explicit);
    config.gran = Some(LayerKind::Thread);
    config.proclist = Some("{0,2,4},{1,3,5},6-11:2".to_string());

    let mut context =
        AffinityContext::for_topology(Topology::from_uniform_counts(nz!(1), nz!(6), nz!(2)), config);
    context.initialize().unwrap();

    let masks = context.affinity().masks();
    assert_eq!(masks.len(), 5);
    assert_eq!(masks[0], ProcMask::from_ids([0, 2, 4]));
    assert_eq!(masks[1], ProcMask::from_ids([1, 3, 5]));
    assert_eq!(masks[2], ProcMask::from_ids([6]));
    assert_eq!(masks[3], ProcMask::from_ids([8]));
    assert_eq!(masks[4], ProcMask::from_ids([10]));
}

#[test]
fn scenario_omp_places_generative_threads() {
    // OMP_PLACES=threads(8):4:2 over the ordered thread list.
    let mut config = AffinityConfig::with_type(AffinityType::Explicit);
    config.gran = Some(LayerKind::Thread);
    config.proclist = Some("threads(8):4:2".to_string());
    config.flags.omp_places = true;

    let mut context =
        AffinityContext::for_topology(Topology::from_uniform_counts(nz!(1), nz!(8), nz!(2)), config);
    context.initialize().unwrap();

    let masks = context.affinity().masks();
    assert_eq!(masks.len(), 4);
    assert_eq!(masks[0], ProcMask::from_ids([0]));
    assert_eq!(masks[1], ProcMask::from_ids([2]));
    assert_eq!(masks[2], ProcMask::from_ids([4]));
    assert_eq!(masks[3], ProcMask::from_ids([6]));
}

#[test]
fn place_assignment_is_deterministic_across_contexts() {
    let build = || {
        let mut config = AffinityConfig::with_type(AffinityType::Scatter);
        config.gran = Some(LayerKind::Core);
        let mut context = AffinityContext::for_topology(hybrid_machine(), config);
        context.initialize().unwrap();
        for gtid in 0..20 {
            context.set_init_mask(gtid).unwrap();
        }
        context
    };

    let first = build();
    let second = build();
    for gtid in 0..20 {
        assert_eq!(
            first.thread_mask(gtid).unwrap(),
            second.thread_mask(gtid).unwrap()
        );
        assert_eq!(
            first.thread_place(gtid).unwrap(),
            second.thread_place(gtid).unwrap()
        );
    }
}

#[test]
fn empty_subset_result_is_ignored_with_warning() {
    // A subset that would filter out everything leaves the machine alone.
    let mut config = AffinityConfig::with_type(AffinityType::Compact);
    config.gran = Some(LayerKind::Thread);

    let mut context = AffinityContext::for_topology(Topology::from_uniform_counts(nz!(1), nz!(4), nz!(1)), config)
        .with_subset(SubsetRequest::parse(":8@8threads").unwrap());
    context.initialize().unwrap();

    assert_eq!(context.topology().unwrap().num_hw_threads(), 4);
    assert_eq!(context.affinity().num_masks(), 4);
}

#[test]
fn subset_round_trips_through_canonical_form() {
    for text in ["2sockets,4cores,2threads", "1@1sockets,4cores", "*cores:intel_atom"] {
        let request = SubsetRequest::parse(text).unwrap();
        let canonical = request.to_canonical_string();
        let reparsed = SubsetRequest::parse(&canonical).unwrap();
        assert_eq!(reparsed, request);
        assert_eq!(reparsed.to_canonical_string(), canonical);
    }
}

#[test]
fn mask_printer_round_trips() {
    for ids in [
        vec![0_u32],
        vec![1, 2, 4, 5, 6, 7, 9],
        vec![0, 63, 64, 65, 200],
        (0..32).collect(),
    ] {
        let mask = ProcMask::from_ids(ids);
        let reparsed: ProcMask = mask.to_string().parse().unwrap();
        assert_eq!(reparsed, mask);
    }
}

#[test]
fn proclist_resolution_is_a_fixed_point() {
    // Proclist -> mask list -> canonical proclist -> mask list converges.
    let mut config = AffinityConfig::with_type(AffinityType::Explicit);
    config.gran = Some(LayerKind::Thread);
    config.proclist = Some("{0,2,4},1,6-10:2".to_string());

    let mut context =
        AffinityContext::for_topology(Topology::from_uniform_counts(nz!(1), nz!(6), nz!(2)), config);
    context.initialize().unwrap();
    let first_masks: Vec<ProcMask> = context.affinity().masks().to_vec();

    // Re-spell each place as a canonical proclist item and run it again.
    let respelled = first_masks
        .iter()
        .map(|mask| {
            let ids: Vec<String> = mask.iter().map(|id| id.to_string()).collect();
            if ids.len() == 1 {
                ids[0].clone()
            } else {
                format!("{{{}}}", ids.join(","))
            }
        })
        .collect::<Vec<_>>()
        .join(",");

    let mut config = AffinityConfig::with_type(AffinityType::Explicit);
    config.gran = Some(LayerKind::Thread);
    config.proclist = Some(respelled);
    let mut context =
        AffinityContext::for_topology(Topology::from_uniform_counts(nz!(1), nz!(6), nz!(2)), config);
    context.initialize().unwrap();

    assert_eq!(context.affinity().masks(), &first_masks[..]);
}

#[test]
fn hybrid_single_core_type_machine() {
    // Hybrid flag forced on a machine where only one core type was
    // observed: sorts and attribute queries still work.
    let threads: Vec<HwThread> = (0..4_u32)
        .map(|os_id| {
            HwThread::with_attrs(
                os_id,
                os_id as usize,
                vec![LayerId::Id(0), LayerId::Id(os_id / 2), LayerId::Id(os_id % 2)],
                CoreAttrs {
                    core_type: AttrValue::Value(CoreType::Core),
                    core_eff: AttrValue::Value(0),
                },
            )
        })
        .collect();
    let mut topology = Topology::build(
        vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread],
        threads,
    );
    topology.set_hybrid(true);

    assert_eq!(topology.core_types(), &[CoreType::Core]);

    let mut config = AffinityConfig::with_type(AffinityType::Compact);
    config.gran = Some(LayerKind::Core);
    let mut context = AffinityContext::for_topology(topology, config);
    context.initialize().unwrap();
    assert_eq!(context.affinity().num_masks(), 2);
}
