//! The canonical machine topology: ordered layers, per-thread ID tuples,
//! enumeration statistics and the equivalence relation between layer kinds.

use std::cmp::Ordering;
use std::num::NonZero;

use itertools::Itertools;

use crate::{
    AttrValue, CoreAttrs, CoreType, EquivalenceMap, HwThread, LayerId, LayerKind, ProcMask,
    ProcessorId,
};

/// Machine-wide counters derived from the canonical topology.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MachineCounters {
    /// Number of packages (sockets, or processor groups when no socket
    /// layer was discovered).
    pub num_packages: u32,

    /// Cores per package.
    pub cores_per_pkg: u32,

    /// Hardware threads per core.
    pub threads_per_core: u32,

    /// Total core count.
    pub num_cores: u32,
}

/// Criteria deciding whether two hardware threads belong to the same
/// granularity group.
#[derive(Clone, Copy, Debug, Default)]
pub struct Closeness {
    /// How many innermost layers to ignore when comparing IDs.
    pub gran_levels: usize,

    /// Group by core type instead of position.
    pub by_core_type: bool,

    /// Group by core efficiency instead of position.
    pub by_core_eff: bool,
}

/// The canonical, queryable model of the machine's processor hierarchy.
///
/// A topology is produced by a discovery back-end and then canonicalized:
/// uninformative layers are removed, enumeration statistics are gathered and
/// the hardware threads are brought into the canonical sort order. After
/// canonicalization the topology is immutable except for
/// [`Topology::restrict_to_mask`] (applied by the hardware subset filter)
/// and the transient compact re-sorts performed during place construction.
#[derive(Clone, Debug)]
pub struct Topology {
    pub(crate) types: Vec<LayerKind>,
    pub(crate) threads: Vec<HwThread>,
    pub(crate) count: Vec<u32>,
    pub(crate) ratio: Vec<u32>,
    pub(crate) equivalent: EquivalenceMap,
    pub(crate) core_types: Vec<CoreType>,
    pub(crate) num_core_efficiencies: u32,
    pub(crate) hybrid: bool,
    uniform: bool,
    compact: usize,
    counters: MachineCounters,
}

impl Topology {
    /// Builds a topology from a back-end's raw output: layer kinds
    /// (outermost first) and one record per hardware thread, each carrying
    /// an ID tuple of matching depth.
    ///
    /// The threads are sorted into canonical order and the topology is
    /// canonicalized before being returned.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is empty, `types` is empty, or any thread's ID
    /// tuple does not match the depth of `types`. A back-end producing such
    /// output has a logic error.
    #[must_use]
    pub fn build(types: Vec<LayerKind>, threads: Vec<HwThread>) -> Self {
        assert!(!types.is_empty(), "topology must have at least one layer");
        assert!(!threads.is_empty(), "topology must have at least one thread");
        for thread in &threads {
            assert_eq!(
                thread.ids.len(),
                types.len(),
                "thread ID tuple depth must match the layer count"
            );
        }

        let mut equivalent = EquivalenceMap::new();
        for kind in &types {
            equivalent.set_self(*kind);
        }

        let hybrid = Self::infer_hybrid(&threads);
        let depth = types.len();

        let mut topology = Self {
            types,
            threads,
            count: vec![0; depth],
            ratio: vec![0; depth],
            equivalent,
            core_types: Vec::new(),
            num_core_efficiencies: 0,
            hybrid,
            uniform: false,
            compact: 0,
            counters: MachineCounters::default(),
        };
        topology.sort_by_ids();
        topology.canonicalize();
        topology
    }

    /// Fabricates a uniform `packages x cores/pkg x threads/core` topology
    /// from explicit counters, with OS IDs assigned sequentially.
    ///
    /// This is the fallback used when every discovery back-end fails but the
    /// machine's aggregate shape is already known.
    #[must_use]
    pub fn from_uniform_counts(
        num_packages: NonZero<u32>,
        cores_per_pkg: NonZero<u32>,
        threads_per_core: NonZero<u32>,
    ) -> Self {
        let mut threads = Vec::new();
        let mut os_id: ProcessorId = 0;
        for package in 0..num_packages.get() {
            for core in 0..cores_per_pkg.get() {
                for thread in 0..threads_per_core.get() {
                    threads.push(HwThread::new(
                        os_id,
                        os_id as usize,
                        vec![
                            LayerId::Id(package),
                            LayerId::Id(core),
                            LayerId::Id(thread),
                        ],
                    ));
                    os_id += 1;
                }
            }
        }

        Self::build(
            vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread],
            threads,
        )
    }

    fn infer_hybrid(threads: &[HwThread]) -> bool {
        let distinct_types = threads
            .iter()
            .filter_map(|thread| thread.attrs.core_type.value())
            .unique()
            .count();
        let distinct_effs = threads
            .iter()
            .filter_map(|thread| thread.attrs.core_eff.value())
            .unique()
            .count();
        distinct_types > 1 || distinct_effs > 1
    }

    /// Marks the topology as hybrid regardless of what the thread attributes
    /// suggest. Discovery back-ends call this when the hardware declares
    /// itself hybrid even though only one core type is currently visible.
    /// Re-canonicalizes so the hybrid statistics and sort order take the
    /// flag into account.
    pub fn set_hybrid(&mut self, hybrid: bool) {
        if self.hybrid != hybrid {
            self.hybrid = hybrid;
            self.sort_by_ids();
            self.canonicalize();
        }
    }

    // Accessors ----------------------------------------------------------

    /// Number of layers in the topology.
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.types.len()
    }

    /// The layer kinds, outermost first.
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    #[must_use]
    pub fn types(&self) -> &[LayerKind] {
        &self.types
    }

    /// The hardware threads in their current sort order.
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    #[must_use]
    pub fn threads(&self) -> &[HwThread] {
        &self.threads
    }

    /// Number of hardware threads.
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    #[must_use]
    pub fn num_hw_threads(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn threads_mut(&mut self) -> &mut [HwThread] {
        &mut self.threads
    }

    /// The level of a layer kind, after resolving it through the
    /// equivalence relation. `None` when the kind was never observed.
    #[must_use]
    pub fn level_of(&self, kind: LayerKind) -> Option<usize> {
        let real = self.equivalent.get(kind)?;
        self.types.iter().position(|candidate| *candidate == real)
    }

    /// Number of distinct ID tuples at prefix length `level + 1`.
    #[must_use]
    pub fn count_at(&self, level: usize) -> u32 {
        self.count[level]
    }

    /// Maximum fan-out observed at `level` within its parent.
    #[must_use]
    pub fn ratio_at(&self, level: usize) -> u32 {
        self.ratio[level]
    }

    /// Product of the fan-outs over `(outer_level, inner_level]`: how many
    /// units of the inner layer fit in one unit of the outer layer, at most.
    #[must_use]
    pub fn calculate_ratio(&self, inner_level: usize, outer_level: usize) -> u32 {
        let mut product = 1;
        let mut level = inner_level;
        while level > outer_level {
            product *= self.ratio[level];
            level -= 1;
        }
        product
    }

    /// The equivalence relation over layer kinds.
    #[must_use]
    pub fn equivalent(&self) -> &EquivalenceMap {
        &self.equivalent
    }

    /// Whether every layer has the same fan-out everywhere.
    #[must_use]
    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    /// Whether the machine mixes core types or efficiencies.
    #[must_use]
    pub fn is_hybrid(&self) -> bool {
        self.hybrid
    }

    /// The distinct core types observed, in discovery order.
    #[must_use]
    pub fn core_types(&self) -> &[CoreType] {
        &self.core_types
    }

    /// Number of distinct core efficiency classes (efficiencies range over
    /// `0..num_core_efficiencies`).
    #[must_use]
    pub fn num_core_efficiencies(&self) -> u32 {
        self.num_core_efficiencies
    }

    /// The machine-wide aggregate counters.
    #[must_use]
    pub fn counters(&self) -> MachineCounters {
        self.counters
    }

    /// The current compact sort bias.
    #[must_use]
    pub fn compact(&self) -> usize {
        self.compact
    }

    /// The largest OS processor ID of any thread.
    #[must_use]
    pub fn max_os_id(&self) -> ProcessorId {
        self.threads
            .iter()
            .map(|thread| thread.os_id)
            .max()
            .expect("topology always has at least one thread")
    }

    /// A map from OS processor ID to the thread's index in the current sort
    /// order. Must be rebuilt whenever the thread array changes.
    #[must_use]
    pub fn os_id_to_thread_map(&self) -> Vec<Option<usize>> {
        let mut map = vec![None; self.max_os_id() as usize + 1];
        for (index, thread) in self.threads.iter().enumerate() {
            map[thread.os_id as usize] = Some(index);
        }
        map
    }

    /// The mask of every OS processor ID in the topology.
    #[must_use]
    pub fn full_mask(&self) -> ProcMask {
        self.threads.iter().map(|thread| thread.os_id).collect()
    }

    // Sorting ------------------------------------------------------------

    fn compare_ids(types: &[LayerKind], hybrid: bool, a: &HwThread, b: &HwThread) -> Ordering {
        for (level, kind) in types.iter().enumerate() {
            // Higher efficiencies sort earlier at the core layer of a hybrid
            // machine; several consumers rely on this ordering.
            if hybrid && *kind == LayerKind::Core {
                if let (AttrValue::Value(a_eff), AttrValue::Value(b_eff)) =
                    (a.attrs.core_eff, b.attrs.core_eff)
                {
                    match b_eff.cmp(&a_eff) {
                        Ordering::Equal => {}
                        ordering => return ordering,
                    }
                }
            }

            match a.ids[level].cmp(&b.ids[level]) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }

        a.os_id.cmp(&b.os_id)
    }

    /// Sorts the threads into the stable canonical order: lexicographic by
    /// ID tuple, with unknown IDs last and higher core efficiencies first on
    /// hybrid machines.
    pub fn sort_by_ids(&mut self) {
        let mut threads = std::mem::take(&mut self.threads);
        threads.sort_by(|a, b| Self::compare_ids(&self.types, self.hybrid, a, b));
        self.threads = threads;
        self.compact = 0;
    }

    /// Sorts the threads by the compact bias: the innermost `compact` layers
    /// compare first, then the remaining outer layers. `compact == 0` is the
    /// plain outermost-first order; larger values cluster threads that are
    /// close in the hierarchy.
    pub fn sort_by_compact(&mut self, compact: usize) {
        assert!(compact <= self.depth());
        let depth = self.depth();

        let mut threads = std::mem::take(&mut self.threads);
        threads.sort_by(|a, b| {
            for i in 0..compact {
                let j = depth - i - 1;
                match a.sub_ids[j].cmp(&b.sub_ids[j]) {
                    Ordering::Equal => {}
                    ordering => return ordering,
                }
            }
            for i in compact..depth {
                let j = i - compact;
                match a.sub_ids[j].cmp(&b.sub_ids[j]) {
                    Ordering::Equal => {}
                    ordering => return ordering,
                }
            }
            Ordering::Equal
        });
        self.threads = threads;
        self.compact = compact;
    }

    // Canonicalization ---------------------------------------------------

    /// Brings a freshly discovered (or just filtered) topology into
    /// canonical form: removes radix-1 layers, gathers enumeration
    /// statistics, derives sub-IDs, establishes the machine counters and
    /// resolves the last-level-cache alias.
    ///
    /// # Panics
    ///
    /// Panics if the result violates the structural invariants (zero depth,
    /// a zero count or ratio, or a non-idempotent equivalence entry); such a
    /// state indicates a discovery logic error.
    pub fn canonicalize(&mut self) {
        self.remove_radix1_layers();
        self.gather_enumeration_information();
        self.discover_uniformity();
        self.set_sub_ids();
        self.set_globals();
        self.set_last_level_cache();

        assert!(self.depth() > 0);
        for level in 0..self.depth() {
            assert!(self.count[level] > 0 && self.ratio[level] > 0);
            assert!(
                self.equivalent.is_real(self.types[level]),
                "detected layer kinds must represent themselves"
            );
        }
    }

    /// Declares `from` to be represented by `to`, resolving `to` through the
    /// relation first and redirecting anything that pointed at `from`.
    pub(crate) fn set_equivalent(&mut self, from: LayerKind, to: LayerKind) {
        let real_to = self.equivalent.get(to).unwrap_or(to);
        self.equivalent.redirect(from, real_to);
    }

    /// Inserts a new layer with the given per-thread IDs (one per thread, in
    /// the current thread order), placing it above the innermost existing
    /// layer whose IDs change at least as often.
    pub fn insert_layer(&mut self, kind: LayerKind, ids: &[LayerId]) {
        assert_eq!(ids.len(), self.threads.len());
        let depth = self.depth();

        let mut previous_id = LayerId::Unknown;
        let mut previous_new_id = LayerId::Unknown;
        let mut target_layer = 0;

        while target_layer < depth {
            let mut layers_equal = true;
            let mut strictly_above = false;

            for (thread, new_id) in self.threads.iter().zip(ids) {
                let id = thread.ids[target_layer];
                if id != previous_id && *new_id == previous_new_id {
                    strictly_above = true;
                    layers_equal = false;
                    break;
                } else if id == previous_id && *new_id != previous_new_id {
                    layers_equal = false;
                    break;
                }
                previous_id = id;
                previous_new_id = *new_id;
            }

            if strictly_above || layers_equal {
                break;
            }
            target_layer += 1;
        }

        self.types.insert(target_layer, kind);
        for (thread, new_id) in self.threads.iter_mut().zip(ids) {
            thread.ids.insert(target_layer, *new_id);
            thread.sub_ids.push(0);
        }
        self.equivalent.set_self(kind);
        self.count.push(0);
        self.ratio.push(0);
    }

    /// Prepends the Windows processor-group layer, deriving each thread's
    /// group from its OS ID, and re-sorts. Only meaningful when the machine
    /// spans more than one group.
    pub fn insert_proc_group_layer(&mut self) {
        let ids: Vec<LayerId> = self
            .threads
            .iter()
            .map(|thread| LayerId::Id(thread.os_id / 64))
            .collect();
        self.insert_layer(LayerKind::ProcGroup, &ids);
        self.sort_by_ids();
    }

    /// Removes layers that add no information: wherever every unit of one
    /// layer contains exactly one unit of an adjacent layer, the less
    /// preferred of the two is dropped and aliased to the other. The three
    /// structural layers (socket, core, thread) are never removed.
    fn remove_radix1_layers(&mut self) {
        let mut top_index1 = 0;
        let mut top_index2 = 1;

        while top_index1 < self.depth().saturating_sub(1) && top_index2 < self.depth() {
            let type1 = self.types[top_index1];
            let type2 = self.types[top_index2];

            if type1.is_structural() && type2.is_structural() {
                top_index1 = top_index2;
                top_index2 += 1;
                continue;
            }

            let mut radix1 = true;
            let mut all_same = true;
            let mut id1 = self.threads[0].ids[top_index1];
            let mut id2 = self.threads[0].ids[top_index2];

            for thread in self.threads.iter().skip(1) {
                if thread.ids[top_index1] == id1 && thread.ids[top_index2] != id2 {
                    radix1 = false;
                    break;
                }
                if thread.ids[top_index2] != id2 {
                    all_same = false;
                }
                id1 = thread.ids[top_index1];
                id2 = thread.ids[top_index2];
            }

            if radix1 {
                let (remove_type, keep_type, remove_layer) =
                    if type1.radix1_preference() > type2.radix1_preference() {
                        (type2, type1, top_index2)
                    } else {
                        (type1, type2, top_index1)
                    };

                // When the inner layer's ids never vary at all, keep the
                // outer layer's ids regardless of which kind survives.
                let remove_layer_ids = if all_same { top_index2 } else { remove_layer };

                self.set_equivalent(remove_type, keep_type);
                for thread in &mut self.threads {
                    thread.ids.remove(remove_layer_ids);
                    thread.sub_ids.pop();
                }
                self.types.remove(remove_layer);
                self.count.pop();
                self.ratio.pop();
            } else {
                top_index1 = top_index2;
                top_index2 += 1;
            }
        }

        assert!(self.depth() > 0);
    }

    /// Single pass over the sorted threads computing `count` (distinct ID
    /// tuples per prefix length), `ratio` (maximum fan-out per layer) and
    /// the hybrid attribute statistics.
    fn gather_enumeration_information(&mut self) {
        let depth = self.depth();
        let mut previous_id = vec![LayerId::Unknown; depth];
        let mut max = vec![0_u32; depth];

        self.count = vec![0; depth];
        self.ratio = vec![0; depth];

        let core_level = self.level_of(LayerKind::Core);
        let hybrid = self.hybrid;

        for thread_index in 0..self.threads.len() {
            let thread = &self.threads[thread_index];

            for layer in 0..depth {
                let id = thread.ids[layer];
                if id == previous_id[layer] {
                    continue;
                }

                for l in layer..depth {
                    if self.threads[thread_index].ids[l] != LayerId::Unknown {
                        self.count[l] += 1;
                    }
                }
                if id != LayerId::Unknown {
                    max[layer] += 1;
                }
                for l in (layer + 1)..depth {
                    if max[l] > self.ratio[l] {
                        self.ratio[l] = max[l];
                    }
                    max[l] = 1;
                }

                if hybrid && core_level.is_some_and(|core_level| layer <= core_level) {
                    let attrs = self.threads[thread_index].attrs;
                    if let AttrValue::Value(eff) = attrs.core_eff {
                        // Efficiencies range over 0..=max, so the class
                        // count is max + 1.
                        self.num_core_efficiencies =
                            self.num_core_efficiencies.max(u32::from(eff) + 1);
                    }
                    if let AttrValue::Value(core_type) = attrs.core_type {
                        if !self.core_types.contains(&core_type) {
                            self.core_types.push(core_type);
                        }
                    }
                }
                break;
            }

            previous_id.copy_from_slice(&self.threads[thread_index].ids);
        }

        for layer in 0..depth {
            if max[layer] > self.ratio[layer] {
                self.ratio[layer] = max[layer];
            }
        }
    }

    fn discover_uniformity(&mut self) {
        let product: u64 = self.ratio.iter().map(|ratio| u64::from(*ratio)).product();
        self.uniform = product == u64::from(self.count[self.depth() - 1]);
    }

    /// Assigns dense per-layer sub-IDs: a layer's sub-ID increments whenever
    /// its ID changes relative to the previous thread in sort order, and
    /// every inner sub-ID resets to zero.
    fn set_sub_ids(&mut self) {
        let depth = self.depth();
        let mut previous_id = vec![LayerId::Multiple; depth];
        let mut sub_id = vec![-1_i64; depth];

        for thread in &mut self.threads {
            for layer in 0..depth {
                if thread.ids[layer] != previous_id[layer] {
                    sub_id[layer] += 1;
                    for inner in sub_id.iter_mut().skip(layer + 1) {
                        *inner = 0;
                    }
                    break;
                }
            }

            previous_id.copy_from_slice(&thread.ids);
            for layer in 0..depth {
                thread.sub_ids[layer] =
                    u32::try_from(sub_id[layer]).expect("sub-IDs start at zero");
            }
        }
    }

    fn set_globals(&mut self) {
        let package_level = self
            .level_of(LayerKind::Socket)
            .or_else(|| self.level_of(LayerKind::ProcGroup));
        let core_level = self
            .level_of(LayerKind::Core)
            .expect("core layer always exists after canonicalization");
        let thread_level = self
            .level_of(LayerKind::Thread)
            .expect("thread layer always exists after canonicalization");

        self.counters.threads_per_core = self.calculate_ratio(thread_level, core_level);
        if let Some(package_level) = package_level {
            self.counters.cores_per_pkg = self.calculate_ratio(core_level, package_level);
            self.counters.num_packages = self.count[package_level];
        } else {
            self.counters.cores_per_pkg = self.count[core_level];
            self.counters.num_packages = 1;
        }
        self.counters.num_cores = self.count[core_level];
    }

    /// Resolves the last-level-cache alias: the innermost real cache layer,
    /// falling back to the socket and finally the core layer.
    fn set_last_level_cache(&mut self) {
        let cache_order = [LayerKind::L3, LayerKind::L2, LayerKind::L1];
        let llc_target = cache_order
            .into_iter()
            .find(|cache| self.equivalent.get(*cache).is_some())
            .or_else(|| {
                [LayerKind::Socket, LayerKind::Core]
                    .into_iter()
                    .find(|fallback| self.equivalent.get(*fallback).is_some())
            })
            .expect("socket or core always exists");

        self.set_equivalent(LayerKind::Llc, llc_target);
    }

    /// Re-resolves the last-level-cache alias after the equivalence map
    /// gained cache entries outside of a full canonicalization.
    pub(crate) fn refresh_llc(&mut self) {
        self.equivalent.remove(LayerKind::Llc);
        self.set_last_level_cache();
    }

    // Filtering ----------------------------------------------------------

    /// Removes every thread whose OS ID is not in `mask`, then re-derives
    /// the enumeration statistics, uniformity, sub-IDs and machine counters.
    ///
    /// Returns whether anything was removed; applying the topology's own
    /// full mask is a no-op, and the operation is idempotent.
    pub fn restrict_to_mask(&mut self, mask: &ProcMask) -> bool {
        let before = self.threads.len();
        self.threads.retain(|thread| mask.test(thread.os_id));
        let affected = self.threads.len() != before;

        assert!(
            !self.threads.is_empty(),
            "restricting away every thread is rejected by callers beforehand"
        );

        if affected {
            self.gather_enumeration_information();
            self.discover_uniformity();
            self.set_sub_ids();
            self.set_globals();
            self.set_last_level_cache();
        }
        affected
    }

    // Queries ------------------------------------------------------------

    /// Whether threads at positions `a` and `b` (in the current sort order)
    /// belong to the same granularity group.
    #[must_use]
    pub fn is_close(&self, a: usize, b: usize, criteria: Closeness) -> bool {
        if criteria.gran_levels >= self.depth() {
            return true;
        }
        let t1 = &self.threads[a];
        let t2 = &self.threads[b];

        if criteria.by_core_type {
            return t1.attrs.core_type == t2.attrs.core_type;
        }
        if criteria.by_core_eff {
            return t1.attrs.core_eff == t2.attrs.core_eff;
        }

        let compare_depth = self.depth() - criteria.gran_levels;
        t1.ids[..compare_depth] == t2.ids[..compare_depth]
    }

    /// Verifies that every thread's ID tuple is unique.
    #[must_use]
    pub fn check_ids(&self) -> bool {
        let mut sorted: Vec<&HwThread> = self.threads.iter().collect();
        sorted.sort_by(|a, b| a.ids.cmp(&b.ids));
        sorted
            .windows(2)
            .all(|pair| pair[0].ids != pair[1].ids)
    }

    /// The maximum number of cores matching `attr` within any single unit of
    /// the layer at `above_level`, or across the whole machine when
    /// `above_level` is `None`.
    #[must_use]
    pub fn ncores_with_attr(&self, attr: CoreAttrs, above_level: Option<usize>) -> u32 {
        let Some(core_level) = self.level_of(LayerKind::Core) else {
            return 0;
        };
        if let Some(above_level) = above_level {
            assert!(above_level < core_level);
        }

        let depth = self.depth();
        let mut previous_id = vec![LayerId::Multiple; depth];
        let mut current = 0_u32;
        let mut current_max = 0_u32;

        for thread in &self.threads {
            let outer_changed = above_level
                .is_some_and(|above_level| thread.ids[above_level] != previous_id[above_level]);

            if outer_changed {
                current_max = current_max.max(current);
                current = u32::from(thread.attrs.contains(attr));
            } else {
                let scan_from = above_level.map_or(0, |above_level| above_level + 1);
                for level in scan_from..=core_level {
                    if thread.ids[level] != previous_id[level] {
                        if thread.attrs.contains(attr) {
                            current += 1;
                        }
                        break;
                    }
                }
            }

            previous_id.copy_from_slice(&thread.ids);
        }

        current_max.max(current)
    }

    // Printing -----------------------------------------------------------

    /// A one-line summary of the machine shape in catalog terms, always
    /// spelling out the core and thread levels even when they were collapsed
    /// into another layer.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut print_types: Vec<LayerKind> = self.types.clone();

        if !self.equivalent.is_real(LayerKind::Core) {
            if print_types.last() == Some(&LayerKind::Thread) {
                let last = print_types.len() - 1;
                print_types[last] = LayerKind::Core;
                print_types.push(LayerKind::Thread);
            } else {
                print_types.push(LayerKind::Core);
            }
        }
        if !self.equivalent.is_real(LayerKind::Thread) {
            print_types.push(LayerKind::Thread);
        }

        let mut text = String::new();
        let mut denominator: Option<LayerKind> = None;
        let mut level = 0;

        for kind in print_types {
            let units = if self.equivalent.is_real(kind) {
                let ratio = self.ratio[level];
                level += 1;
                ratio
            } else {
                1
            };

            let name = if units > 1 {
                kind.catalog_plural()
            } else {
                kind.catalog()
            };

            match denominator {
                None => text.push_str(&format!("{units} {name}")),
                Some(denominator) => {
                    text.push_str(&format!(" x {units} {name}/{}", denominator.catalog()));
                }
            }
            denominator = Some(kind);
        }

        let ncores = self.counters.num_cores;
        text.push_str(&format!(" ({ncores} total cores)"));
        text
    }

    /// Logs the full per-thread map and hybrid statistics at trace level.
    pub fn dump(&self) {
        tracing::trace!(summary = %self.summary(), uniform = self.uniform, "machine topology");
        if self.hybrid {
            for core_type in self.core_types.clone() {
                let attr = CoreAttrs {
                    core_type: AttrValue::Value(core_type),
                    core_eff: AttrValue::Unknown,
                };
                let ncores = self.ncores_with_attr(attr, None);
                if ncores > 0 {
                    tracing::trace!(ncores, core_type = core_type.catalog(), "hybrid cores");
                }
            }
        }
        for thread in &self.threads {
            tracing::trace!(thread = %thread, "hardware thread");
        }
    }
}
