//! Fallback implementation for operating systems without native affinity
//! support. Pinning operations succeed but do not actually pin anything, so
//! code written against the core still runs, merely without the placement
//! benefits.

use std::thread::available_parallelism;

use crate::pal::{Binder, Filesystem};
use crate::{ProcMask, ProcessorId};

/// The OS binder for platforms where thread affinity cannot be controlled.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBinder;

impl BuildTargetBinder {
    pub(crate) const fn new() -> Self {
        Self
    }

    fn processor_count() -> ProcessorId {
        available_parallelism().map_or(1, |count| {
            u32::try_from(count.get()).expect("processor count fits in u32")
        })
    }
}

impl Binder for BuildTargetBinder {
    fn bind_thread(&self, _os_id: ProcessorId) -> std::io::Result<()> {
        Ok(())
    }

    fn set_system_affinity(&self, _mask: &ProcMask, _enforce: bool) -> std::io::Result<()> {
        Ok(())
    }

    fn get_system_affinity(&self) -> std::io::Result<ProcMask> {
        Ok(self.full_system_mask())
    }

    fn full_system_mask(&self) -> ProcMask {
        ProcMask::all_up_to(Self::processor_count())
    }

    fn num_proc_groups(&self) -> u32 {
        1
    }
}

/// No virtual topology filesystem exists here; every read reports absence
/// and discovery falls through to the flat back-end.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetFilesystem;

impl BuildTargetFilesystem {
    pub(crate) const fn new() -> Self {
        Self
    }
}

impl Filesystem for BuildTargetFilesystem {
    fn get_cpuinfo_contents(&self) -> Option<String> {
        None
    }

    fn get_cpu_topology_field(&self, _cpu: ProcessorId, _field: &str) -> Option<String> {
        None
    }
}
