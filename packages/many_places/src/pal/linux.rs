//! Linux implementation of the OS binder and the virtual topology
//! filesystem, built on `sched_setaffinity` and `/proc` + `/sys` reads.

use std::fs;
use std::mem;

use crate::pal::{Binder, Filesystem};
use crate::{ProcMask, ProcessorId};

/// Upper bound on processor IDs representable in a `libc::cpu_set_t`.
const CPU_SETSIZE: ProcessorId = 1024;

#[derive(Debug, Default)]
pub(crate) struct BuildTargetBinder;

impl BuildTargetBinder {
    pub(crate) const fn new() -> Self {
        Self
    }

    fn cpu_set_from_mask(mask: &ProcMask) -> libc::cpu_set_t {
        // SAFETY: cpu_set_t is a plain bit array; all-zeroes is the empty set.
        let mut cpu_set: libc::cpu_set_t = unsafe { mem::zeroed() };
        for os_id in mask.iter() {
            if os_id < CPU_SETSIZE {
                // SAFETY: index is bounded by CPU_SETSIZE above.
                unsafe { libc::CPU_SET(os_id as usize, &mut cpu_set) };
            }
        }
        cpu_set
    }

    fn mask_from_cpu_set(cpu_set: &libc::cpu_set_t) -> ProcMask {
        let mut mask = ProcMask::new();
        for os_id in 0..CPU_SETSIZE {
            // SAFETY: index is bounded by CPU_SETSIZE.
            if unsafe { libc::CPU_ISSET(os_id as usize, cpu_set) } {
                mask.set(os_id);
            }
        }
        mask
    }

    fn set_affinity(cpu_set: &libc::cpu_set_t) -> std::io::Result<()> {
        // SAFETY: pid 0 targets the calling thread; the set pointer and size
        // describe a valid cpu_set_t for the duration of the call.
        let result =
            unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), cpu_set) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

impl Binder for BuildTargetBinder {
    fn bind_thread(&self, os_id: ProcessorId) -> std::io::Result<()> {
        let mut single = ProcMask::new();
        single.set(os_id);
        Self::set_affinity(&Self::cpu_set_from_mask(&single))
    }

    fn set_system_affinity(&self, mask: &ProcMask, _enforce: bool) -> std::io::Result<()> {
        // Linux has no separate process affinity, so enforce has no extra
        // meaning here.
        Self::set_affinity(&Self::cpu_set_from_mask(mask))
    }

    fn get_system_affinity(&self) -> std::io::Result<ProcMask> {
        // SAFETY: all-zeroes is a valid cpu_set_t to be overwritten.
        let mut cpu_set: libc::cpu_set_t = unsafe { mem::zeroed() };
        // SAFETY: pid 0 targets the calling thread; pointer and size are
        // valid for the duration of the call.
        let result = unsafe {
            libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut cpu_set)
        };
        if result == 0 {
            Ok(Self::mask_from_cpu_set(&cpu_set))
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    fn full_system_mask(&self) -> ProcMask {
        // SAFETY: sysconf is always safe to call.
        let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        let count = ProcessorId::try_from(count.max(1)).unwrap_or(1);
        ProcMask::all_up_to(count)
    }

    fn num_proc_groups(&self) -> u32 {
        1
    }
}

#[derive(Debug, Default)]
pub(crate) struct BuildTargetFilesystem;

impl BuildTargetFilesystem {
    pub(crate) const fn new() -> Self {
        Self
    }
}

impl Filesystem for BuildTargetFilesystem {
    fn get_cpuinfo_contents(&self) -> Option<String> {
        fs::read_to_string("/proc/cpuinfo").ok()
    }

    fn get_cpu_topology_field(&self, cpu: ProcessorId, field: &str) -> Option<String> {
        fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu{cpu}/topology/{field}"
        ))
        .ok()
    }
}
