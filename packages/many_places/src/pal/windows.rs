//! Windows implementation of the OS binder, built on processor-group
//! affinity. Masks wider than one group can only be installed one group at
//! a time, so a mask spanning groups is rejected by the callers upstream.

use windows::Win32::System::SystemInformation::{
    ALL_PROCESSOR_GROUPS, GROUP_AFFINITY, GetActiveProcessorCount, GetActiveProcessorGroupCount,
};
use windows::Win32::System::Threading::{
    GetCurrentProcess, GetCurrentThread, GetThreadGroupAffinity, SetProcessAffinityMask,
    SetThreadGroupAffinity,
};

use crate::pal::{Binder, Filesystem};
use crate::{ProcMask, ProcessorId};

/// Width of one processor group.
const GROUP_SIZE: ProcessorId = 64;

#[derive(Debug, Default)]
pub(crate) struct BuildTargetBinder;

impl BuildTargetBinder {
    pub(crate) const fn new() -> Self {
        Self
    }

    /// Splits a single-group mask into the `(group, bits)` form the group
    /// affinity APIs expect.
    fn group_affinity_of(mask: &ProcMask) -> std::io::Result<GROUP_AFFINITY> {
        let group = mask.group_of().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "affinity mask spans processor groups",
            )
        })?;

        let mut bits: usize = 0;
        for os_id in mask.iter() {
            bits |= 1 << (os_id % GROUP_SIZE) as usize;
        }

        Ok(GROUP_AFFINITY {
            Mask: bits,
            Group: u16::try_from(group).expect("group count is bounded by the OS"),
            Reserved: [0; 3],
        })
    }
}

impl Binder for BuildTargetBinder {
    fn bind_thread(&self, os_id: ProcessorId) -> std::io::Result<()> {
        let mut single = ProcMask::new();
        single.set(os_id);
        self.set_system_affinity(&single, false)
    }

    fn set_system_affinity(&self, mask: &ProcMask, enforce: bool) -> std::io::Result<()> {
        let group_affinity = Self::group_affinity_of(mask)?;

        // SAFETY: the pseudo handle from GetCurrentThread is always valid
        // for the calling thread.
        unsafe {
            SetThreadGroupAffinity(GetCurrentThread(), &group_affinity, None)
                .ok()
                .map_err(|error| std::io::Error::from_raw_os_error(error.code().0))?;
        }

        if enforce && self.num_proc_groups() == 1 {
            // SAFETY: the pseudo handle from GetCurrentProcess is always
            // valid for the calling process.
            unsafe {
                SetProcessAffinityMask(GetCurrentProcess(), group_affinity.Mask)
                    .ok()
                    .map_err(|error| std::io::Error::from_raw_os_error(error.code().0))?;
            }
        }

        Ok(())
    }

    fn get_system_affinity(&self) -> std::io::Result<ProcMask> {
        let mut group_affinity = GROUP_AFFINITY::default();

        // SAFETY: the pseudo handle from GetCurrentThread is always valid
        // for the calling thread.
        unsafe {
            GetThreadGroupAffinity(GetCurrentThread(), &mut group_affinity)
                .ok()
                .map_err(|error| std::io::Error::from_raw_os_error(error.code().0))?;
        }

        let base = ProcessorId::from(group_affinity.Group) * GROUP_SIZE;
        let mut mask = ProcMask::new();
        for bit in 0..GROUP_SIZE {
            if group_affinity.Mask & (1 << bit as usize) != 0 {
                mask.set(base + bit);
            }
        }
        Ok(mask)
    }

    fn full_system_mask(&self) -> ProcMask {
        // SAFETY: no preconditions.
        let count = unsafe { GetActiveProcessorCount(ALL_PROCESSOR_GROUPS) };
        ProcMask::all_up_to(count.max(1))
    }

    fn num_proc_groups(&self) -> u32 {
        // SAFETY: no preconditions.
        let count = unsafe { GetActiveProcessorGroupCount() };
        u32::from(count.max(1))
    }
}

/// Windows exposes no `/proc`-style topology filesystem.
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
