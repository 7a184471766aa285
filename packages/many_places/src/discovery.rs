//! Discovery back-ends: each is a pure function from the allowed-processor
//! mask (plus an OS collaborator) to a canonical topology or a failure from
//! the closed error set.
//!
//! The driver tries back-ends in a fixed priority order until one succeeds;
//! a pinned method runs exactly one back-end and falls back to a synthetic
//! topology only when the machine's aggregate counters are already known.

pub(crate) mod cpuinfo;
pub(crate) mod flat;
pub(crate) mod proc_groups;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub(crate) mod apicid;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub(crate) mod x2apicid;

#[cfg(target_os = "aix")]
pub(crate) mod srad;

#[cfg(feature = "hwloc")]
pub(crate) mod hwloc;

use std::num::NonZero;

use crate::pal::{Binder, BinderFacade, FilesystemFacade};
use crate::{DiscoveryError, ProcMask, Topology, TopologyMethod};

/// Known machine counters usable to fabricate a topology when a pinned
/// back-end fails: `(packages, cores per package, threads per core)`.
pub(crate) type FallbackCounters = (u32, u32, u32);

/// Restores the calling thread's affinity mask when dropped. Every back-end
/// that migrates the discovery thread across processors holds one of these
/// so the original mask is restored on every exit path.
pub(crate) struct ScopedAffinity<'a, B: Binder> {
    binder: &'a B,
    saved: Option<ProcMask>,
}

impl<'a, B: Binder> ScopedAffinity<'a, B> {
    pub(crate) fn save(binder: &'a B) -> Self {
        Self {
            binder,
            saved: binder.get_system_affinity().ok(),
        }
    }
}

impl<B: Binder> Drop for ScopedAffinity<'_, B> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(error) = self.binder.set_system_affinity(&saved, false) {
                tracing::debug!(?error, "failed to restore discovery thread affinity");
            }
        }
    }
}

/// Runs discovery with the given method selection.
///
/// With [`TopologyMethod::Default`], back-ends are tried in priority order
/// and the flat fallback guarantees success. With a pinned method, the
/// single back-end's failure is surfaced unless `fallback_counters` permits
/// fabricating a synthetic uniform topology.
pub(crate) fn discover(
    binder: &BinderFacade,
    filesystem: &FilesystemFacade,
    full_mask: &ProcMask,
    method: TopologyMethod,
    fallback_counters: Option<FallbackCounters>,
) -> Result<Topology, DiscoveryError> {
    let result = match method {
        TopologyMethod::Default => return Ok(discover_default(binder, filesystem, full_mask)),
        TopologyMethod::Hwloc => hwloc_map(binder, full_mask),
        TopologyMethod::X2ApicId => x2apicid_map(binder, full_mask),
        TopologyMethod::ApicId => apicid_map(binder, full_mask),
        TopologyMethod::CpuInfo => cpuinfo::discover(filesystem, full_mask),
        TopologyMethod::ProcGroups => proc_groups_map(binder, full_mask),
        TopologyMethod::Srad => srad_map(binder, full_mask),
        TopologyMethod::Flat => Ok(flat::discover(full_mask)),
    };

    match result {
        Ok(topology) => Ok(topology),
        Err(error) => {
            tracing::debug!(%error, ?method, "pinned discovery back-end failed");
            let counters = fallback_counters.and_then(|(packages, cores, threads)| {
                Some((
                    NonZero::new(packages)?,
                    NonZero::new(cores)?,
                    NonZero::new(threads)?,
                ))
            });
            match counters {
                Some((packages, cores_per_pkg, threads_per_core)) => Ok(
                    Topology::from_uniform_counts(packages, cores_per_pkg, threads_per_core),
                ),
                None => Err(error),
            }
        }
    }
}

fn discover_default(
    binder: &BinderFacade,
    filesystem: &FilesystemFacade,
    full_mask: &ProcMask,
) -> Topology {
    type Attempt<'a> = (
        &'static str,
        Box<dyn FnOnce() -> Result<Topology, DiscoveryError> + 'a>,
    );
    let attempts: [Attempt<'_>; 5] = [
        ("hwloc", Box::new(|| hwloc_map(binder, full_mask))),
        ("x2apicid", Box::new(|| x2apicid_map(binder, full_mask))),
        ("apicid", Box::new(|| apicid_map(binder, full_mask))),
        (
            "cpuinfo",
            Box::new(|| cpuinfo::discover(filesystem, full_mask)),
        ),
        ("srad", Box::new(|| srad_map(binder, full_mask))),
    ];

    for (name, attempt) in attempts {
        match attempt() {
            Ok(topology) => {
                tracing::debug!(backend = name, "topology discovered");
                return topology;
            }
            Err(error) => {
                tracing::debug!(backend = name, %error, "discovery back-end failed, trying next");
            }
        }
    }

    // The processor-group view beats the flat view when groups exist.
    if let Ok(topology) = proc_groups_map(binder, full_mask) {
        return topology;
    }

    flat::discover(full_mask)
}

#[cfg(feature = "hwloc")]
fn hwloc_map(
    binder: &BinderFacade,
    full_mask: &ProcMask,
) -> Result<Topology, DiscoveryError> {
    let _ = binder;
    hwloc::discover(full_mask)
}

#[cfg(not(feature = "hwloc"))]
fn hwloc_map(_binder: &BinderFacade, _full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    Err(DiscoveryError::NotSupported)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn x2apicid_map(
    binder: &BinderFacade,
    full_mask: &ProcMask,
) -> Result<Topology, DiscoveryError> {
    x2apicid::discover(binder, full_mask)
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn x2apicid_map(_binder: &BinderFacade, _full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    Err(DiscoveryError::NotSupported)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn apicid_map(binder: &BinderFacade, full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    apicid::discover(binder, full_mask)
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn apicid_map(_binder: &BinderFacade, _full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    Err(DiscoveryError::NotSupported)
}

fn proc_groups_map(
    binder: &BinderFacade,
    full_mask: &ProcMask,
) -> Result<Topology, DiscoveryError> {
    proc_groups::discover(binder.num_proc_groups(), full_mask)
}

#[cfg(target_os = "aix")]
fn srad_map(binder: &BinderFacade, full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    let _ = binder;
    srad::discover(full_mask)
}

#[cfg(not(target_os = "aix"))]
fn srad_map(_binder: &BinderFacade, _full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    Err(DiscoveryError::NotSupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pal::FakeBinder;

    #[test]
    fn default_method_always_succeeds() {
        let binder = BinderFacade::from_fake(FakeBinder::with_procs(4));
        let filesystem = FilesystemFacade::target();
        let full_mask = ProcMask::all_up_to(4);

        let topology = discover(
            &binder,
            &filesystem,
            &full_mask,
            TopologyMethod::Default,
            None,
        )
        .unwrap();

        assert!(topology.num_hw_threads() >= 1);
    }

    #[test]
    fn pinned_flat_uses_exactly_the_mask() {
        let binder = BinderFacade::from_fake(FakeBinder::with_procs(8));
        let filesystem = FilesystemFacade::target();
        let full_mask = ProcMask::from_ids([0, 3, 5]);

        let topology = discover(
            &binder,
            &filesystem,
            &full_mask,
            TopologyMethod::Flat,
            None,
        )
        .unwrap();

        assert_eq!(topology.num_hw_threads(), 3);
        assert_eq!(topology.full_mask(), full_mask);
    }

    #[test]
    fn pinned_failure_uses_counter_fallback() {
        let binder = BinderFacade::from_fake(FakeBinder::with_procs(8));
        let filesystem = FilesystemFacade::target();
        let full_mask = ProcMask::all_up_to(8);

        // The proc-groups back-end fails on a single-group machine; the
        // known counters rescue the pinned request.
        let topology = discover(
            &binder,
            &filesystem,
            &full_mask,
            TopologyMethod::ProcGroups,
            Some((2, 2, 2)),
        )
        .unwrap();

        assert_eq!(topology.counters().num_packages, 2);
        assert_eq!(topology.num_hw_threads(), 8);

        // Without counters the pinned failure surfaces.
        let error = discover(
            &binder,
            &filesystem,
            &full_mask,
            TopologyMethod::ProcGroups,
            None,
        )
        .unwrap_err();
        assert_eq!(error, DiscoveryError::NotSupported);
    }

    #[test]
    fn scoped_affinity_restores_on_drop() {
        let fake = FakeBinder::with_procs(4).with_initial_affinity(ProcMask::from_ids([1, 2]));

        {
            let _guard = ScopedAffinity::save(&fake);
            fake.bind_thread(0).unwrap();
        }

        let calls = fake.set_affinity_calls();
        assert_eq!(calls.last().unwrap().0, ProcMask::from_ids([1, 2]));
    }
}
