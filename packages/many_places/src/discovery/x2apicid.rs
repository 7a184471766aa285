//! The CPUID leaf 0x1F / 0xB discovery back-end: binds the calling thread
//! to each allowed processor in turn, reads its x2APIC ID and the per-level
//! shift widths, and derives the ID tuple at every level by masking.
//!
//! The assembly half is pure and driven by pre-read records, so it is
//! testable without x86 hardware access.

use raw_cpuid::{CpuId, TopologyType};

use crate::discovery::ScopedAffinity;
use crate::pal::Binder;
use crate::{
    AttrValue, CoreAttrs, CoreType, DiscoveryError, HwThread, LayerId, LayerKind, ProcMask,
    ProcessorId, Topology,
};

/// One topology level as reported by a single processor: the kind and the
/// number of low APIC-ID bits covering this level and everything inside it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ApicLevel {
    pub(crate) kind: LayerKind,
    pub(crate) shift: u32,
}

/// Everything read from one processor while pinned to it.
#[derive(Clone, Debug)]
pub(crate) struct ApicRecord {
    pub(crate) os_id: ProcessorId,
    pub(crate) apic_id: u32,
    /// Levels innermost first, shifts strictly increasing.
    pub(crate) levels: Vec<ApicLevel>,
    pub(crate) attrs: CoreAttrs,
    /// `(cache level, shift width)` pairs from leaf 4.
    pub(crate) caches: Vec<(u8, u32)>,
}

/// Inner-to-outer rank of the level kinds leaf 0x1F can report.
fn level_rank(kind: LayerKind) -> u8 {
    match kind {
        LayerKind::Thread => 0,
        LayerKind::Core => 1,
        LayerKind::Module => 2,
        LayerKind::Tile => 3,
        LayerKind::Die => 4,
        _ => 5,
    }
}

/// Merges the level sets of all records: a level kind reported by any
/// processor appears in the union, ordered innermost first.
fn union_levels(records: &[ApicRecord]) -> Vec<LayerKind> {
    let mut kinds: Vec<LayerKind> = Vec::new();
    for record in records {
        for level in &record.levels {
            if !kinds.contains(&level.kind) {
                kinds.push(level.kind);
            }
        }
    }
    kinds.sort_by_key(|kind| level_rank(*kind));
    kinds
}

/// Builds the topology from the per-processor records.
pub(crate) fn assemble(records: Vec<ApicRecord>) -> Result<Topology, DiscoveryError> {
    if records.is_empty() {
        return Err(DiscoveryError::NoLeafBSupport);
    }

    let inner_kinds = union_levels(&records);
    if inner_kinds.is_empty() {
        return Err(DiscoveryError::NoLeafBSupport);
    }

    // Types outermost first: the socket above everything leaf 0x1F reports.
    let mut types = vec![LayerKind::Socket];
    types.extend(inner_kinds.iter().rev());

    let threads: Vec<HwThread> = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let outermost_shift = record
                .levels
                .last()
                .map_or(0, |level| level.shift);

            let mut ids = vec![LayerId::Id(record.apic_id >> outermost_shift)];
            for kind in inner_kinds.iter().rev() {
                ids.push(level_id(record, *kind));
            }

            HwThread::with_attrs(record.os_id, index, ids, record.attrs)
        })
        .collect();

    let mut topology = Topology::build(types, threads);
    alias_caches(&mut topology, &records);

    if !topology.check_ids() {
        return Err(DiscoveryError::LegacyApicIdsNotUnique);
    }
    Ok(topology)
}

/// A processor's ID at one level of the union: the APIC bits between the
/// next-inner reported shift and this level's shift, or unknown when this
/// processor never reported the level.
fn level_id(record: &ApicRecord, kind: LayerKind) -> LayerId {
    let Some(position) = record.levels.iter().position(|level| level.kind == kind) else {
        return LayerId::Unknown;
    };

    let shift = record.levels[position].shift;
    let prev_shift = if position == 0 {
        0
    } else {
        record.levels[position - 1].shift
    };

    let mask = if shift >= 32 {
        u32::MAX
    } else {
        (1_u32 << shift) - 1
    };
    LayerId::Id((record.apic_id & mask) >> prev_shift)
}

/// Resolves leaf-4 cache levels against the topology: a cache whose shift
/// width matches an existing level becomes an alias of that level's kind;
/// any other cache becomes its own layer with IDs derived from the APIC ID.
fn alias_caches(topology: &mut Topology, records: &[ApicRecord]) {
    let mut cache_levels: Vec<(u8, u32)> = Vec::new();
    for record in records {
        for cache in &record.caches {
            if !cache_levels.contains(cache) {
                cache_levels.push(*cache);
            }
        }
    }

    for (cache_level, width) in cache_levels {
        let cache_kind = match cache_level {
            1 => LayerKind::L1,
            2 => LayerKind::L2,
            3 => LayerKind::L3,
            _ => continue,
        };
        if topology.equivalent().get(cache_kind).is_some() {
            continue;
        }

        // A cache covering the same APIC bits as a topology level is that
        // level, just seen from the cache side.
        let matching_kind = records.first().and_then(|record| {
            record
                .levels
                .iter()
                .find(|level| level.shift == width)
                .map(|level| level.kind)
        });

        if let Some(matching_kind) = matching_kind {
            if topology.equivalent().get(matching_kind).is_some() {
                topology.set_equivalent(cache_kind, matching_kind);
                continue;
            }
        }

        let ids: Vec<LayerId> = topology
            .threads()
            .iter()
            .map(|thread| {
                records
                    .iter()
                    .find(|record| record.os_id == thread.os_id)
                    .map_or(LayerId::Unknown, |record| {
                        LayerId::Id(record.apic_id >> width)
                    })
            })
            .collect();
        topology.insert_layer(cache_kind, &ids);
        topology.sort_by_ids();
        topology.canonicalize();
    }

    topology.refresh_llc();
}

fn topology_type_to_kind(topology_type: TopologyType) -> Option<LayerKind> {
    match topology_type {
        TopologyType::SMT => Some(LayerKind::Thread),
        TopologyType::Core => Some(LayerKind::Core),
        TopologyType::Module => Some(LayerKind::Module),
        TopologyType::Tile => Some(LayerKind::Tile),
        TopologyType::Die => Some(LayerKind::Die),
        _ => None,
    }
}

/// Reads one pinned processor's record. Must be called with the thread
/// already bound to `os_id`.
fn read_record(os_id: ProcessorId) -> Result<ApicRecord, DiscoveryError> {
    let cpuid = CpuId::new();

    let topology_iter = cpuid
        .get_extended_topology_info_v2()
        .or_else(|| cpuid.get_extended_topology_info())
        .ok_or(DiscoveryError::NoLeafBSupport)?;

    let mut levels: Vec<ApicLevel> = Vec::new();
    let mut apic_id = None;
    for level in topology_iter {
        apic_id = Some(level.x2apic_id());
        let Some(kind) = topology_type_to_kind(level.level_type()) else {
            // An unknown level folds into the previous known one by taking
            // over its shift width.
            if let Some(last) = levels.last_mut() {
                last.shift = level.shift_right_for_next_apic_id();
            }
            continue;
        };
        levels.push(ApicLevel {
            kind,
            shift: level.shift_right_for_next_apic_id(),
        });
    }
    let apic_id = apic_id.ok_or(DiscoveryError::NoLeafBSupport)?;

    let attrs = read_hybrid_attrs(&cpuid);

    let mut caches = Vec::new();
    if let Some(cache_iter) = cpuid.get_cache_parameters() {
        for cache in cache_iter {
            let level = u8::try_from(cache.level()).unwrap_or(u8::MAX);
            let sharing = u32::try_from(cache.max_cores_for_cache()).unwrap_or(1);
            caches.push((level, mask_width(sharing)));
        }
    }

    Ok(ApicRecord {
        os_id,
        apic_id,
        levels,
        attrs,
        caches,
    })
}

fn read_hybrid_attrs(cpuid: &CpuId) -> CoreAttrs {
    let is_hybrid = cpuid
        .get_extended_feature_info()
        .is_some_and(|features| features.has_hybrid());
    if !is_hybrid {
        return CoreAttrs::UNKNOWN;
    }

    cpuid
        .get_hybrid_information()
        .map_or(CoreAttrs::UNKNOWN, |hybrid| {
            use raw_cpuid::HybridCoreType;
            let (core_type, core_eff) = match hybrid.core_type() {
                HybridCoreType::Atom => (CoreType::Atom, 0),
                HybridCoreType::Core => (CoreType::Core, 1),
                _ => return CoreAttrs::UNKNOWN,
            };
            CoreAttrs {
                core_type: AttrValue::Value(core_type),
                core_eff: AttrValue::Value(core_eff),
            }
        })
}

/// Number of APIC-ID bits needed to represent `count` items.
pub(crate) fn mask_width(count: u32) -> u32 {
    count.max(1).next_power_of_two().trailing_zeros()
}

pub(crate) fn discover(
    binder: &impl Binder,
    full_mask: &ProcMask,
) -> Result<Topology, DiscoveryError> {
    let _restore = ScopedAffinity::save(binder);

    let mut records = Vec::new();
    for os_id in full_mask.iter() {
        binder
            .bind_thread(os_id)
            .map_err(|_| DiscoveryError::UnknownTopology)?;
        records.push(read_record(os_id)?);
    }

    assemble(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(os_id: ProcessorId, apic_id: u32) -> ApicRecord {
        ApicRecord {
            os_id,
            apic_id,
            levels: vec![
                ApicLevel {
                    kind: LayerKind::Thread,
                    shift: 1,
                },
                ApicLevel {
                    kind: LayerKind::Core,
                    shift: 4,
                },
            ],
            attrs: CoreAttrs::UNKNOWN,
            caches: vec![],
        }
    }

    #[test]
    fn mask_width_matches_ceil_log2() {
        assert_eq!(mask_width(1), 0);
        assert_eq!(mask_width(2), 1);
        assert_eq!(mask_width(3), 2);
        assert_eq!(mask_width(8), 3);
        assert_eq!(mask_width(9), 4);
    }

    #[test]
    fn assemble_two_packages() {
        // APIC layout: 1 SMT bit, 3 core bits, rest package.
        let records = (0..16_u32).map(|i| record(i, i)).collect();
        let topology = assemble(records).unwrap();

        assert_eq!(
            topology.types(),
            &[LayerKind::Socket, LayerKind::Core, LayerKind::Thread]
        );
        assert_eq!(topology.counters().num_packages, 1);
        assert_eq!(topology.counters().cores_per_pkg, 8);
        assert_eq!(topology.counters().threads_per_core, 2);

        // A second package appears above the core shift.
        let records = (0..32_u32).map(|i| record(i, i)).collect();
        let topology = assemble(records).unwrap();
        assert_eq!(topology.counters().num_packages, 2);
    }

    #[test]
    fn missing_level_on_some_processors_becomes_unknown() {
        // Processors 0 and 1 expose a die level; 2 and 3 do not.
        let with_die = |os_id: u32, apic_id: u32| ApicRecord {
            levels: vec![
                ApicLevel {
                    kind: LayerKind::Thread,
                    shift: 1,
                },
                ApicLevel {
                    kind: LayerKind::Core,
                    shift: 3,
                },
                ApicLevel {
                    kind: LayerKind::Die,
                    shift: 5,
                },
            ],
            ..record(os_id, apic_id)
        };

        let records = vec![
            with_die(0, 0),
            with_die(1, 2),
            record(2, 32),
            record(3, 34),
        ];
        let topology = assemble(records).unwrap();

        // The union carries the die layer; threads lacking it sort last
        // within their prefix and carry an unknown ID there.
        assert!(topology.level_of(LayerKind::Die).is_some());
    }

    #[test]
    fn duplicate_apic_ids_are_rejected() {
        let records = vec![record(0, 7), record(1, 7)];
        assert_eq!(
            assemble(records).unwrap_err(),
            DiscoveryError::LegacyApicIdsNotUnique
        );
    }

    #[test]
    fn cache_matching_level_width_becomes_alias() {
        // L2 shift width 4 == the core level shift: alias, not a layer.
        let records: Vec<ApicRecord> = (0..16_u32)
            .map(|i| ApicRecord {
                caches: vec![(2, 4)],
                ..record(i, i)
            })
            .collect();

        let topology = assemble(records).unwrap();
        assert_eq!(
            topology.equivalent().get(LayerKind::L2),
            Some(LayerKind::Core)
        );
        assert_eq!(
            topology.equivalent().get(LayerKind::Llc),
            Some(LayerKind::Core)
        );
    }

    #[test]
    fn cache_with_distinct_width_becomes_layer() {
        // 32 processors, L3 covering 3 APIC bits: 8 threads per L3, two
        // L3 domains per package is not the core or thread width.
        let records: Vec<ApicRecord> = (0..32_u32)
            .map(|i| ApicRecord {
                caches: vec![(3, 3)],
                ..record(i, i)
            })
            .collect();

        let topology = assemble(records).unwrap();
        let l3_level = topology.level_of(LayerKind::L3).unwrap();
        assert_eq!(topology.count_at(l3_level), 4);
    }

    #[test]
    fn hybrid_attrs_flow_through() {
        let records: Vec<ApicRecord> = (0..4_u32)
            .map(|i| ApicRecord {
                attrs: CoreAttrs {
                    core_type: AttrValue::Value(if i < 2 {
                        CoreType::Core
                    } else {
                        CoreType::Atom
                    }),
                    core_eff: AttrValue::Value(u8::from(i < 2)),
                },
                ..record(i, i)
            })
            .collect();

        let topology = assemble(records).unwrap();
        assert!(topology.is_hybrid());
        assert_eq!(topology.core_types().len(), 2);
    }
}
