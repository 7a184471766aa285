//! The flat fallback: one package, one core per allowed processor, one
//! thread per core. Always succeeds, carries no structure.

use crate::{HwThread, LayerId, LayerKind, ProcMask, Topology};

pub(crate) fn discover(full_mask: &ProcMask) -> Topology {
    let threads = full_mask
        .iter()
        .enumerate()
        .map(|(index, os_id)| {
            HwThread::new(
                os_id,
                index,
                vec![LayerId::Id(0), LayerId::Id(os_id), LayerId::Id(0)],
            )
        })
        .collect();

    Topology::build(
        vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread],
        threads,
    )
}
