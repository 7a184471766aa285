//! Shared synthetic machines for unit tests.

use crate::{AttrValue, CoreAttrs, CoreType, HwThread, LayerId, LayerKind, Topology};

/// One socket, six performance cores with two SMT threads each (efficiency
/// 1, OS IDs 0..=11) and eight single-thread efficiency cores (efficiency
/// 0, OS IDs 12..=19).
pub(crate) fn hybrid_1x6p8e() -> Topology {
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

/// Three cores with SMT counts `(4, 2, 2)` on one socket; OS IDs assigned
/// sequentially in that order.
pub(crate) fn nonuniform_4_2_2() -> Topology {
    let mut threads = Vec::new();
    let mut os_id = 0_u32;
    for (core, smt_count) in [(0_u32, 4_u32), (1, 2), (2, 2)] {
        for smt in 0..smt_count {
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
