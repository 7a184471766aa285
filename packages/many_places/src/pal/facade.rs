#[cfg(any(test, feature = "test-util"))]
use std::sync::Arc;

#[cfg(any(test, feature = "test-util"))]
use crate::pal::FakeBinder;
use crate::pal::{Binder, Filesystem};
use crate::{ProcMask, ProcessorId};

#[cfg(not(any(target_os = "linux", windows, target_os = "aix")))]
use crate::pal::fallback::{BuildTargetBinder, BuildTargetFilesystem};
#[cfg(any(target_os = "linux", windows, target_os = "aix"))]
use crate::pal::{BuildTargetBinder, BuildTargetFilesystem};

/// Dispatches OS binder calls to the build target's real implementation, a
/// fake machine, or (in unit tests) a mock.
#[derive(Clone, Debug)]
pub(crate) enum BinderFacade {
    Target(&'static BuildTargetBinder),

    #[cfg(any(test, feature = "test-util"))]
    Fake(Arc<FakeBinder>),

    #[cfg(test)]
    Mock(Arc<crate::pal::MockBinder>),
}

static BUILD_TARGET_BINDER: BuildTargetBinder = BuildTargetBinder::new();

impl BinderFacade {
    pub(crate) fn target() -> Self {
        Self::Target(&BUILD_TARGET_BINDER)
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn from_fake(fake: FakeBinder) -> Self {
        Self::Fake(Arc::new(fake))
    }

    /// Returns the inner fake, panicking if this is not a fake.
    #[cfg(test)]
    pub(crate) fn as_fake(&self) -> &FakeBinder {
        match self {
            Self::Fake(inner) => inner,
            _ => panic!("expected BinderFacade::Fake"),
        }
    }
}

impl Binder for BinderFacade {
    fn bind_thread(&self, os_id: ProcessorId) -> std::io::Result<()> {
        match self {
            Self::Target(binder) => binder.bind_thread(os_id),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(binder) => binder.bind_thread(os_id),
            #[cfg(test)]
            Self::Mock(binder) => binder.bind_thread(os_id),
        }
    }

    fn set_system_affinity(&self, mask: &ProcMask, enforce: bool) -> std::io::Result<()> {
        match self {
            Self::Target(binder) => binder.set_system_affinity(mask, enforce),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(binder) => binder.set_system_affinity(mask, enforce),
            #[cfg(test)]
            Self::Mock(binder) => binder.set_system_affinity(mask, enforce),
        }
    }

    fn get_system_affinity(&self) -> std::io::Result<ProcMask> {
        match self {
            Self::Target(binder) => binder.get_system_affinity(),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(binder) => binder.get_system_affinity(),
            #[cfg(test)]
            Self::Mock(binder) => binder.get_system_affinity(),
        }
    }

    fn full_system_mask(&self) -> ProcMask {
        match self {
            Self::Target(binder) => binder.full_system_mask(),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(binder) => binder.full_system_mask(),
            #[cfg(test)]
            Self::Mock(binder) => binder.full_system_mask(),
        }
    }

    fn num_proc_groups(&self) -> u32 {
        match self {
            Self::Target(binder) => binder.num_proc_groups(),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(binder) => binder.num_proc_groups(),
            #[cfg(test)]
            Self::Mock(binder) => binder.num_proc_groups(),
        }
    }
}

/// Dispatches virtual-filesystem reads to the build target's real files or
/// (in unit tests) a mock.
#[derive(Clone, Debug)]
pub(crate) enum FilesystemFacade {
    Target(&'static BuildTargetFilesystem),

    #[cfg(test)]
    Mock(Arc<crate::pal::MockFilesystem>),
}

static BUILD_TARGET_FILESYSTEM: BuildTargetFilesystem = BuildTargetFilesystem::new();

impl FilesystemFacade {
    pub(crate) fn target() -> Self {
        Self::Target(&BUILD_TARGET_FILESYSTEM)
    }
}

impl Filesystem for FilesystemFacade {
    fn get_cpuinfo_contents(&self) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpuinfo_contents(),
            #[cfg(test)]
            Self::Mock(filesystem) => filesystem.get_cpuinfo_contents(),
        }
    }

    fn get_cpu_topology_field(&self, cpu: ProcessorId, field: &str) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_topology_field(cpu, field),
            #[cfg(test)]
            Self::Mock(filesystem) => filesystem.get_cpu_topology_field(cpu, field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pal::{MockBinder, MockFilesystem};

    #[test]
    fn mocked_binder_routes_through_facade() {
        let mut mock = MockBinder::new();
        mock.expect_get_system_affinity()
            .returning(|| Ok(ProcMask::from_ids([0, 1])));
        mock.expect_num_proc_groups().return_const(1_u32);
        mock.expect_bind_thread().returning(|_| Ok(()));

        let facade = BinderFacade::Mock(Arc::new(mock));
        assert_eq!(
            facade.get_system_affinity().unwrap(),
            ProcMask::from_ids([0, 1])
        );
        assert_eq!(facade.num_proc_groups(), 1);
        facade.bind_thread(1).unwrap();
    }

    #[test]
    fn mocked_filesystem_routes_through_facade() {
        let mut mock = MockFilesystem::new();
        mock.expect_get_cpuinfo_contents()
            .return_const(Some("processor: 0\n".to_string()));
        mock.expect_get_cpu_topology_field().returning(|_, _| None);

        let facade = FilesystemFacade::Mock(Arc::new(mock));
        assert!(facade.get_cpuinfo_contents().unwrap().contains("processor"));
        assert!(facade.get_cpu_topology_field(0, "core_id").is_none());
    }

    #[test]
    fn fake_is_reachable_behind_the_facade() {
        let facade = BinderFacade::from_fake(crate::pal::FakeBinder::with_procs(2));
        facade.bind_thread(1).unwrap();
        assert_eq!(facade.as_fake().bind_calls(), vec![1]);
    }
}
