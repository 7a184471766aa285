//! The hwloc discovery back-end (behind the `hwloc` feature): walks the
//! hwloc object tree, maps object types to layer kinds and injects memory
//! nodes as NUMA layers beneath their enclosing object.

use hwlocality::Topology as HwlocTopology;
use hwlocality::object::TopologyObject;
use hwlocality::object::types::ObjectType;

use crate::{
    DiscoveryError, HwThread, LayerId, LayerKind, ProcMask, ProcessorId, Topology,
};

fn object_kind(object_type: ObjectType) -> Option<LayerKind> {
    match object_type {
        ObjectType::Package => Some(LayerKind::Socket),
        ObjectType::Die => Some(LayerKind::Die),
        ObjectType::NUMANode => Some(LayerKind::Numa),
        ObjectType::L3Cache => Some(LayerKind::L3),
        ObjectType::L2Cache => Some(LayerKind::L2),
        ObjectType::L1Cache => Some(LayerKind::L1),
        ObjectType::Core => Some(LayerKind::Core),
        ObjectType::PU => Some(LayerKind::Thread),
        ObjectType::Group => Some(LayerKind::Module),
        _ => None,
    }
}

/// Outer-to-inner rank used to order the union of observed kinds.
fn kind_rank(kind: LayerKind) -> u8 {
    match kind {
        LayerKind::Socket => 0,
        LayerKind::Numa => 1,
        LayerKind::Die => 2,
        LayerKind::Module => 3,
        LayerKind::L3 => 4,
        LayerKind::L2 => 5,
        LayerKind::L1 => 6,
        LayerKind::Core => 7,
        _ => 8,
    }
}

fn ancestors_of(pu: &TopologyObject) -> Vec<(LayerKind, u32)> {
    let mut chain = Vec::new();
    let mut current = Some(pu);
    while let Some(object) = current {
        if let Some(kind) = object_kind(object.object_type()) {
            let id = u32::try_from(object.logical_index()).unwrap_or(u32::MAX);
            chain.push((kind, id));
        }
        // Memory nodes hang off the side of the tree; normal parents walk
        // upward through the containment chain.
        current = object.parent();
    }
    chain
}

/// The NUMA node covering a PU, when the memory hierarchy is out-of-band.
fn numa_of(topology: &HwlocTopology, pu: &TopologyObject) -> Option<u32> {
    let pu_set = pu.cpuset()?;
    for node in topology.objects_with_type(ObjectType::NUMANode) {
        if let Some(node_set) = node.cpuset() {
            if node_set.includes(pu_set) {
                return u32::try_from(node.logical_index()).ok();
            }
        }
    }
    None
}

pub(crate) fn discover(full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    let topology = HwlocTopology::new().map_err(|_| DiscoveryError::UnknownTopology)?;

    // Union of observed kinds, outermost first, socket guaranteed.
    let mut kinds: Vec<LayerKind> = vec![LayerKind::Socket];
    let mut records: Vec<(ProcessorId, Vec<(LayerKind, u32)>)> = Vec::new();

    for pu in topology.objects_with_type(ObjectType::PU) {
        let os_id = u32::try_from(pu.os_index().unwrap_or(usize::MAX))
            .map_err(|_| DiscoveryError::UnknownTopology)?;
        if !full_mask.test(os_id) {
            continue;
        }

        let mut chain = ancestors_of(pu);
        if !chain.iter().any(|(kind, _)| *kind == LayerKind::Numa) {
            if let Some(node) = numa_of(&topology, pu) {
                chain.push((LayerKind::Numa, node));
            }
        }

        for (kind, _) in &chain {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        records.push((os_id, chain));
    }

    if records.is_empty() {
        return Err(DiscoveryError::NoProcRecords);
    }

    // The PU walk itself contributes the thread kind, which ranks last.
    kinds.sort_by_key(|kind| kind_rank(*kind));
    let types = kinds;

    let threads: Vec<HwThread> = records
        .iter()
        .enumerate()
        .map(|(index, (os_id, chain))| {
            let ids: Vec<LayerId> = types
                .iter()
                .map(|wanted| {
                    chain
                        .iter()
                        .find(|(kind, _)| kind == wanted)
                        .map_or(LayerId::Unknown, |(_, id)| LayerId::Id(*id))
                })
                .collect();
            HwThread::new(*os_id, index, ids)
        })
        .collect();

    Ok(Topology::build(types, threads))
}
