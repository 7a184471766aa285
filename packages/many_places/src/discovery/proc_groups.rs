//! The Windows processor-group view: each group becomes a package-like
//! layer, with one core per processor inside the group. Used when no richer
//! back-end is available and the machine actually spans several groups.

use crate::{DiscoveryError, HwThread, LayerId, LayerKind, ProcMask, Topology};

/// Width of one processor group.
const BITS_PER_GROUP: u32 = 64;

pub(crate) fn discover(num_groups: u32, full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    if num_groups <= 1 {
        return Err(DiscoveryError::NotSupported);
    }

    let threads = full_mask
        .iter()
        .enumerate()
        .map(|(index, os_id)| {
            let in_group = os_id % BITS_PER_GROUP;
            HwThread::new(
                os_id,
                index,
                vec![
                    LayerId::Id(os_id / BITS_PER_GROUP),
                    LayerId::Id(in_group),
                    LayerId::Id(in_group),
                ],
            )
        })
        .collect();

    Ok(Topology::build(
        vec![LayerKind::ProcGroup, LayerKind::Core, LayerKind::Thread],
        threads,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_group_is_unsupported() {
        assert_eq!(
            discover(1, &ProcMask::all_up_to(8)).unwrap_err(),
            DiscoveryError::NotSupported
        );
    }

    #[test]
    fn groups_become_packages() {
        let topology = discover(2, &ProcMask::all_up_to(96)).unwrap();

        let group_level = topology.level_of(LayerKind::ProcGroup).unwrap();
        assert_eq!(topology.count_at(group_level), 2);
        assert_eq!(topology.counters().num_packages, 2);
        assert_eq!(topology.counters().num_cores, 96);
    }
}
