//! The legacy APIC discovery back-end (CPUID leaves 1 and 4): a fixed
//! `(package, core, thread)` decomposition of the 8-bit initial APIC ID.
//!
//! The thread field is `ceil_log2(max threads per package / max cores per
//! package)` bits wide, the core field `ceil_log2(max cores per package)`
//! bits; whatever remains above is the package ID. Every processor must
//! agree on those figures.

use raw_cpuid::CpuId;

use crate::discovery::{ScopedAffinity, x2apicid::mask_width};
use crate::pal::Binder;
use crate::{
    DiscoveryError, HwThread, LayerId, LayerKind, ProcMask, ProcessorId, Topology,
};

/// Everything read from one processor while pinned to it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct LegacyApicRecord {
    pub(crate) os_id: ProcessorId,
    pub(crate) apic_id: u32,
    /// Maximum addressable logical processors in this package (leaf 1).
    pub(crate) max_threads_per_pkg: u32,
    /// Maximum addressable cores in this package (leaf 4).
    pub(crate) max_cores_per_pkg: u32,
}

/// Builds the topology from per-processor records, validating that the
/// per-package figures are consistent and the APIC IDs unique.
pub(crate) fn assemble(records: Vec<LegacyApicRecord>) -> Result<Topology, DiscoveryError> {
    let Some(first) = records.first().copied() else {
        return Err(DiscoveryError::ApicNotPresent);
    };

    if records.iter().any(|record| {
        record.max_threads_per_pkg != first.max_threads_per_pkg
            || record.max_cores_per_pkg != first.max_cores_per_pkg
    }) {
        return Err(DiscoveryError::InconsistentCpuidInfo);
    }

    let core_width = mask_width(first.max_cores_per_pkg);
    let thread_width = mask_width(
        first.max_threads_per_pkg.max(1) / first.max_cores_per_pkg.max(1),
    );

    let thread_mask = (1_u32 << thread_width) - 1;
    let core_mask = (1_u32 << core_width) - 1;

    let threads: Vec<HwThread> = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let thread = record.apic_id & thread_mask;
            let core = (record.apic_id >> thread_width) & core_mask;
            let package = record.apic_id >> (thread_width + core_width);
            HwThread::new(
                record.os_id,
                index,
                vec![
                    LayerId::Id(package),
                    LayerId::Id(core),
                    LayerId::Id(thread),
                ],
            )
        })
        .collect();

    let topology = Topology::build(
        vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread],
        threads,
    );
    if !topology.check_ids() {
        return Err(DiscoveryError::LegacyApicIdsNotUnique);
    }
    Ok(topology)
}

/// Reads one pinned processor's record. Must be called with the thread
/// already bound to `os_id`.
fn read_record(os_id: ProcessorId) -> Result<LegacyApicRecord, DiscoveryError> {
    let cpuid = CpuId::new();

    let features = cpuid.get_feature_info().ok_or(DiscoveryError::ApicNotPresent)?;
    if !features.has_apic() {
        return Err(DiscoveryError::ApicNotPresent);
    }

    let apic_id = u32::from(features.initial_local_apic_id());
    let max_threads_per_pkg = u32::from(features.max_logical_processor_ids());

    let mut max_cores_per_pkg = None;
    if let Some(cache_iter) = cpuid.get_cache_parameters() {
        for (index, cache) in cache_iter.enumerate() {
            if index == 0 {
                max_cores_per_pkg =
                    Some(u32::try_from(cache.max_cores_for_package()).unwrap_or(1));
            }
        }
    }
    let max_cores_per_pkg = max_cores_per_pkg.ok_or(DiscoveryError::NoLeaf4Support)?;

    Ok(LegacyApicRecord {
        os_id,
        apic_id,
        max_threads_per_pkg,
        max_cores_per_pkg,
    })
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

    fn record(os_id: ProcessorId, apic_id: u32) -> LegacyApicRecord {
        LegacyApicRecord {
            os_id,
            apic_id,
            max_threads_per_pkg: 8,
            max_cores_per_pkg: 4,
        }
    }

    #[test]
    fn decomposes_apic_ids() {
        // 4 cores x 2 threads per package: thread width 1, core width 2.
        let records: Vec<_> = (0..16_u32).map(|i| record(i, i)).collect();
        let topology = assemble(records).unwrap();

        assert_eq!(topology.counters().num_packages, 2);
        assert_eq!(topology.counters().cores_per_pkg, 4);
        assert_eq!(topology.counters().threads_per_core, 2);
        assert!(topology.is_uniform());
    }

    #[test]
    fn inconsistent_figures_are_rejected() {
        let mut records: Vec<_> = (0..4_u32).map(|i| record(i, i)).collect();
        records[3].max_cores_per_pkg = 2;

        assert_eq!(
            assemble(records).unwrap_err(),
            DiscoveryError::InconsistentCpuidInfo
        );
    }

    #[test]
    fn duplicate_apic_ids_are_rejected() {
        let records = vec![record(0, 5), record(1, 5)];
        assert_eq!(
            assemble(records).unwrap_err(),
            DiscoveryError::LegacyApicIdsNotUnique
        );
    }

    #[test]
    fn empty_input_is_apic_not_present() {
        assert_eq!(
            assemble(vec![]).unwrap_err(),
            DiscoveryError::ApicNotPresent
        );
    }
}
