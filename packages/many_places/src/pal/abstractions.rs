use std::fmt::Debug;

use crate::{ProcMask, ProcessorId};

/// The operations the core consumes from the operating system to pin
/// threads. One implementation exists per supported platform, plus a
/// fallback that degrades gracefully and a fake for tests.
pub(crate) trait Binder: Debug + Send + Sync + 'static {
    /// Pins the calling thread to a single OS processor.
    fn bind_thread(&self, os_id: ProcessorId) -> std::io::Result<()>;

    /// Installs `mask` as the calling thread's affinity. When `enforce` is
    /// set, the process affinity is adjusted as well on platforms that
    /// distinguish the two.
    fn set_system_affinity(&self, mask: &ProcMask, enforce: bool) -> std::io::Result<()>;

    /// Reads the calling thread's current affinity mask.
    fn get_system_affinity(&self) -> std::io::Result<ProcMask>;

    /// The set of every processor present on the machine, regardless of any
    /// affinity restriction on the current process.
    fn full_system_mask(&self) -> ProcMask;

    /// Number of Windows processor groups; 1 on every other platform.
    fn num_proc_groups(&self) -> u32;
}

/// The virtual filesystem through which Linux-style systems expose topology
/// information. Abstracted so the `/proc/cpuinfo` discovery back-end can be
/// driven from canned file contents in tests.
///
/// All I/O is synchronous and blocking because it hits a fast path in the
/// OS; the data is never on a real storage device.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Filesystem: Debug + Send + Sync + 'static {
    /// The contents of `/proc/cpuinfo`, or `None` where the file does not
    /// exist.
    ///
    /// This is a plaintext file of `key : value` pairs with one block per
    /// processor, blocks separated by empty lines.
    fn get_cpuinfo_contents(&self) -> Option<String>;

    /// The contents of `/sys/devices/system/cpu/cpu{cpu}/topology/{field}`,
    /// or `None` where the file does not exist.
    ///
    /// Fields of interest are `physical_package_id`, `core_id`, `book_id`,
    /// `drawer_id` and `core_siblings_list`.
    fn get_cpu_topology_field(&self, cpu: ProcessorId, field: &str) -> Option<String>;
}
