use mockall::mock;

use crate::pal::Binder;
use crate::{ProcMask, ProcessorId};

mock! {
    #[derive(Debug)]
    pub Binder {}

    impl Binder for Binder {
        fn bind_thread(&self, os_id: ProcessorId) -> std::io::Result<()>;
        fn set_system_affinity(&self, mask: &ProcMask, enforce: bool) -> std::io::Result<()>;
        fn get_system_affinity(&self) -> std::io::Result<ProcMask>;
        fn full_system_mask(&self) -> ProcMask;
        fn num_proc_groups(&self) -> u32;
    }
}
