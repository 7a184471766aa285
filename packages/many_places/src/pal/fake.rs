use std::sync::Mutex;

use crate::pal::Binder;
use crate::{ProcMask, ProcessorId};

/// A fake OS binder for tests: accepts every call, records what was asked
/// of it and reports a configurable machine.
#[derive(Debug)]
pub(crate) struct FakeBinder {
    full_mask: ProcMask,
    initial_affinity: ProcMask,
    num_proc_groups: u32,
    bind_calls: Mutex<Vec<ProcessorId>>,
    set_affinity_calls: Mutex<Vec<(ProcMask, bool)>>,
}

impl FakeBinder {
    /// A fake machine with processors `0..num_procs`, no affinity
    /// restriction and a single processor group.
    pub(crate) fn with_procs(num_procs: ProcessorId) -> Self {
        let full_mask = ProcMask::all_up_to(num_procs);
        Self {
            initial_affinity: full_mask.clone(),
            full_mask,
            num_proc_groups: 1,
            bind_calls: Mutex::new(Vec::new()),
            set_affinity_calls: Mutex::new(Vec::new()),
        }
    }

    /// Restricts the affinity mask the fake reports for the current thread,
    /// simulating an externally imposed CPU set.
    pub(crate) fn with_initial_affinity(mut self, mask: ProcMask) -> Self {
        self.initial_affinity = mask;
        self
    }

    /// Every processor the calling thread was pinned to, in call order.
    pub(crate) fn bind_calls(&self) -> Vec<ProcessorId> {
        self.bind_calls.lock().expect("fake binder lock").clone()
    }

    /// Every affinity mask installed, in call order.
    pub(crate) fn set_affinity_calls(&self) -> Vec<(ProcMask, bool)> {
        self.set_affinity_calls
            .lock()
            .expect("fake binder lock")
            .clone()
    }
}

impl Binder for FakeBinder {
    fn bind_thread(&self, os_id: ProcessorId) -> std::io::Result<()> {
        self.bind_calls.lock().expect("fake binder lock").push(os_id);
        Ok(())
    }

    fn set_system_affinity(&self, mask: &ProcMask, enforce: bool) -> std::io::Result<()> {
        self.set_affinity_calls
            .lock()
            .expect("fake binder lock")
            .push((mask.clone(), enforce));
        Ok(())
    }

    fn get_system_affinity(&self) -> std::io::Result<ProcMask> {
        Ok(self.initial_affinity.clone())
    }

    fn full_system_mask(&self) -> ProcMask {
        self.full_mask.clone()
    }

    fn num_proc_groups(&self) -> u32 {
        self.num_proc_groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls() {
        let binder = FakeBinder::with_procs(4);

        binder.bind_thread(2).unwrap();
        binder.bind_thread(3).unwrap();
        assert_eq!(binder.bind_calls(), vec![2, 3]);

        let mask = ProcMask::from_ids([0, 1]);
        binder.set_system_affinity(&mask, true).unwrap();
        assert_eq!(binder.set_affinity_calls(), vec![(mask, true)]);

        assert_eq!(binder.get_system_affinity().unwrap().count(), 4);
        assert_eq!(binder.full_system_mask().count(), 4);
        assert_eq!(binder.num_proc_groups(), 1);
    }

    #[test]
    fn initial_affinity_is_configurable() {
        let binder =
            FakeBinder::with_procs(8).with_initial_affinity(ProcMask::from_ids([1, 3]));
        assert_eq!(binder.get_system_affinity().unwrap().count(), 2);
        assert_eq!(binder.full_system_mask().count(), 8);
    }
}
