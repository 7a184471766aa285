//! AIX implementation of the OS binder, built on `bindprocessor`. AIX can
//! bind a thread to one processor only, so installing a wider mask binds to
//! the first processor of the mask.

use crate::pal::{Binder, Filesystem};
use crate::{ProcMask, ProcessorId};

const BINDTHREAD: libc::c_int = 2;
const PROCESSOR_CLASS_ANY: libc::c_int = -1;

unsafe extern "C" {
    fn bindprocessor(what: libc::c_int, who: libc::c_int, where_: libc::c_int) -> libc::c_int;
    fn thread_self() -> libc::c_int;
}

#[derive(Debug, Default)]
pub(crate) struct BuildTargetBinder;

impl BuildTargetBinder {
    pub(crate) const fn new() -> Self {
        Self
    }

    fn bind(where_: libc::c_int) -> std::io::Result<()> {
        // SAFETY: thread_self returns the kernel thread ID of the caller;
        // bindprocessor accepts it with BINDTHREAD.
        let result = unsafe { bindprocessor(BINDTHREAD, thread_self(), where_) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

impl Binder for BuildTargetBinder {
    fn bind_thread(&self, os_id: ProcessorId) -> std::io::Result<()> {
        Self::bind(libc::c_int::try_from(os_id).expect("processor IDs fit in c_int"))
    }

    fn set_system_affinity(&self, mask: &ProcMask, _enforce: bool) -> std::io::Result<()> {
        match mask.first() {
            Some(os_id) if mask.count() == 1 => self.bind_thread(os_id),
            // A wider mask cannot be expressed; release any binding instead.
            _ => Self::bind(PROCESSOR_CLASS_ANY),
        }
    }

    fn get_system_affinity(&self) -> std::io::Result<ProcMask> {
        // AIX offers no query for the current binding; report the whole
        // machine and let the caller cache per-thread masks.
        Ok(self.full_system_mask())
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

/// AIX exposes no `/proc/cpuinfo`-style topology filesystem.
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
