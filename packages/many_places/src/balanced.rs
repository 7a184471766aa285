//! The balanced place assigner: distributes `nthreads` workers across cores
//! so every populated core ends up with as equal an SMT load as possible,
//! including on machines where cores have different SMT widths.

use crate::{LayerKind, ProcMask, ProcessorId, Topology};

/// Precomputed state for balanced assignment on a non-uniform machine: a
/// `ncores x nth_per_core` grid of OS IDs with holes where a core has fewer
/// SMT siblings than the widest one.
#[derive(Clone, Debug)]
pub(crate) struct BalancedAssigner {
    procarr: Vec<Option<ProcessorId>>,
    ncores: usize,
    nth_per_core: usize,
    core_level: usize,
}

/// The deepest level at which at least one unit holds more than one
/// processing unit: the "core" level of the balanced computation.
fn find_core_level(topology: &Topology) -> usize {
    let bottom_level = topology.depth() - 1;
    let mut core_level = 0;

    for thread in topology.threads() {
        for j in (1..=bottom_level).rev() {
            if thread.ids[j].id().is_some_and(|id| id > 0) && core_level < j - 1 {
                core_level = j - 1;
            }
        }
    }
    core_level
}

/// Which core (at `core_level`) the thread at sorted position `proc`
/// belongs to, counting core boundaries from the start of the table.
fn find_core(topology: &Topology, proc: usize, core_level: usize) -> usize {
    let threads = topology.threads();
    let mut core = 0;
    for i in 0..proc {
        let changed = (0..=core_level)
            .any(|j| threads[i + 1].sub_ids[j] != threads[i].sub_ids[j]);
        if changed {
            core += 1;
        }
    }
    core
}

fn max_proc_per_core(topology: &Topology, core_level: usize) -> usize {
    let bottom_level = topology.depth() - 1;
    if core_level >= bottom_level {
        return 1;
    }
    let thread_level = topology
        .level_of(LayerKind::Thread)
        .expect("thread layer always exists after canonicalization");
    topology.calculate_ratio(thread_level, core_level) as usize
}

impl BalancedAssigner {
    /// Builds the OS-ID grid for a non-uniform machine. Returns `None` when
    /// the machine shape defeats the algorithm (fewer than two slots, or
    /// more processors than slots), in which case the caller degrades the
    /// policy.
    pub(crate) fn for_nonuniform(topology: &Topology) -> Option<Self> {
        let avail_proc = topology.num_hw_threads();
        let core_level = find_core_level(topology);
        let ncores = topology.count_at(core_level) as usize;
        let nth_per_core = max_proc_per_core(topology, core_level);

        let nproc = ncores * nth_per_core;
        if nproc < 2 || nproc < avail_proc {
            return None;
        }

        let mut procarr = vec![None; nproc];
        let mut last_core = None;
        let mut in_last_core = 0;
        for (i, thread) in topology.threads().iter().enumerate() {
            let core = find_core(topology, i, core_level);
            if last_core == Some(core) {
                in_last_core += 1;
            } else {
                in_last_core = 0;
            }
            last_core = Some(core);
            procarr[core * nth_per_core + in_last_core] = Some(thread.os_id);
        }

        Some(Self {
            procarr,
            ncores,
            nth_per_core,
            core_level,
        })
    }

    /// The mask for thread `tid` of `nthreads` on a non-uniform machine.
    pub(crate) fn mask_for(
        &self,
        topology: &Topology,
        tid: usize,
        nthreads: usize,
        fine_gran: bool,
    ) -> ProcMask {
        let avail_proc = topology.num_hw_threads();
        let mut mask = ProcMask::new();

        if nthreads == avail_proc {
            if fine_gran {
                mask.set(topology.threads()[tid].os_id);
            } else {
                let core = find_core(topology, tid, self.core_level);
                for (i, thread) in topology.threads().iter().enumerate() {
                    if find_core(topology, i, self.core_level) == core {
                        mask.set(thread.os_id);
                    }
                }
            }
        } else if nthreads <= self.ncores {
            self.one_core_per_thread(tid, fine_gran, &mut mask);
        } else {
            self.iterative_fill(tid, nthreads, fine_gran, &mut mask);
        }

        mask
    }

    /// `nthreads <= ncores`: thread `tid` owns the `tid`-th populated core.
    fn one_core_per_thread(&self, tid: usize, fine_gran: bool, mask: &mut ProcMask) {
        let mut core = 0;
        for i in 0..self.ncores {
            let populated = (0..self.nth_per_core)
                .any(|j| self.procarr[i * self.nth_per_core + j].is_some());
            if !populated {
                continue;
            }
            if tid == core {
                for j in 0..self.nth_per_core {
                    if let Some(os_id) = self.procarr[i * self.nth_per_core + j] {
                        mask.set(os_id);
                        if fine_gran {
                            break;
                        }
                    }
                }
                break;
            }
            core += 1;
        }
    }

    /// `nthreads > ncores`: round-based fill that raises the per-core
    /// allocation of cores with spare SMT threads until every thread has a
    /// slot, equalizing SMT density across populated cores.
    fn iterative_fill(&self, tid: usize, nthreads: usize, fine_gran: bool, mask: &mut ProcMask) {
        let nth_per_core = self.nth_per_core;
        let ncores = self.ncores;

        // Number of processors at each core, and the distribution of cores
        // by processor count.
        let mut nproc_at_core = vec![0_usize; ncores];
        let mut ncores_with_x_procs = vec![0_usize; nth_per_core + 1];
        for i in 0..ncores {
            let cnt = (0..nth_per_core)
                .filter(|&j| self.procarr[i * nth_per_core + j].is_some())
                .count();
            nproc_at_core[i] = cnt;
            ncores_with_x_procs[cnt] += 1;
        }

        let mut ncores_with_x_to_max_procs = vec![0_usize; nth_per_core + 1];
        for i in 0..=nth_per_core {
            for j in i..=nth_per_core {
                ncores_with_x_to_max_procs[i] += ncores_with_x_procs[j];
            }
        }

        let nproc = nth_per_core * ncores;
        // Threads allocated to each slot so far.
        let mut newarr = vec![0_usize; nproc];

        let mut nth = nthreads;
        let mut extra_round = false;
        while nth > 0 {
            for j in 1..=nth_per_core {
                let mut cnt = ncores_with_x_to_max_procs[j];
                for i in 0..ncores {
                    if nproc_at_core[i] == 0 {
                        continue;
                    }
                    for k in 0..nth_per_core {
                        if self.procarr[i * nth_per_core + k].is_none() {
                            continue;
                        }
                        if newarr[i * nth_per_core + k] == 0 || extra_round {
                            newarr[i * nth_per_core + k] += 1;
                            cnt -= 1;
                            nth -= 1;
                            break;
                        }
                    }
                    if cnt == 0 || nth == 0 {
                        break;
                    }
                }
                if nth == 0 {
                    break;
                }
            }
            extra_round = true;
        }

        let mut sum = 0;
        for i in 0..nproc {
            sum += newarr[i];
            if sum > tid {
                if fine_gran {
                    if let Some(os_id) = self.procarr[i] {
                        mask.set(os_id);
                    }
                } else {
                    let core = i / nth_per_core;
                    for j in 0..nth_per_core {
                        if let Some(os_id) = self.procarr[core * nth_per_core + j] {
                            mask.set(os_id);
                        }
                    }
                }
                break;
            }
        }
    }
}

/// The mask for thread `tid` of `nthreads` on a uniform machine, computed
/// directly from the machine counters.
pub(crate) fn uniform_mask(
    topology: &Topology,
    tid: usize,
    nthreads: usize,
    fine_gran: bool,
) -> ProcMask {
    let avail_proc = topology.num_hw_threads();
    let counters = topology.counters();

    let mut nth_per_core = (avail_proc / counters.num_cores as usize).max(1);
    let mut ncores = counters.num_cores as usize;
    if counters.num_packages > 1 && nth_per_core <= 1 {
        nth_per_core = (avail_proc / counters.num_packages as usize).max(1);
        ncores = counters.num_packages as usize;
    }

    let chunk = nthreads / ncores;
    let big_cores = nthreads % ncores;
    let big_nth = (chunk + 1) * big_cores;

    let (core_id, thread_id) = if tid < big_nth {
        (tid / (chunk + 1), (tid % (chunk + 1)) % nth_per_core)
    } else {
        (
            (tid - big_cores) / chunk,
            ((tid - big_cores) % chunk) % nth_per_core,
        )
    };

    let mut mask = ProcMask::new();
    if fine_gran {
        mask.set(topology.threads()[core_id * nth_per_core + thread_id].os_id);
    } else {
        for i in 0..nth_per_core {
            mask.set(topology.threads()[core_id * nth_per_core + i].os_id);
        }
    }
    mask
}

/// Whether the granularity setting resolves to single-processor places for
/// the balanced policy.
pub(crate) fn is_fine_granularity(topology: &Topology, gran: Option<LayerKind>) -> bool {
    let counters = topology.counters();
    match gran {
        Some(LayerKind::Thread) => true,
        Some(LayerKind::Core) => counters.threads_per_core <= 1,
        Some(LayerKind::Socket) => counters.cores_per_pkg <= 1,
        _ => false,
    }
}
