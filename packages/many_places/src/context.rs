//! The process-wide affinity context: owns the topology, the process mask,
//! the affinity configurations and the per-thread binding slots.
//!
//! Discovery and initialization are single-threaded (init time); after
//! that the topology and place lists are immutable and per-thread binding
//! operations touch only the calling thread's own slot, so readers need no
//! coordination beyond the interior lock on the slot table.

use std::sync::RwLock;

use foldhash::HashMap;
use foldhash::HashMapExt;

use crate::balanced::{self, BalancedAssigner};
use crate::pal::{Binder, BinderFacade, FilesystemFacade};
use crate::{
    AffinityConfig, AffinityError, AffinityType, CoreAttrs, MaskProcError, PlaceIds, ProcMask,
    ProcessorId, SubsetRequest, ThreadId, Topology, TopologyMethod, discovery, places, subset,
};

/// Per-thread binding state.
#[derive(Clone, Debug)]
struct ThreadSlot {
    mask: ProcMask,
    /// The place the thread is currently on; `None` means "all places".
    current_place: Option<usize>,
    first_place: usize,
    last_place: usize,
    ids: PlaceIds,
    attrs: CoreAttrs,
}

/// The machine model and binding engine for one process (or one test).
///
/// A context is created with its configurations, initialized once, and then
/// queried and bound against from any thread. Two configurations exist: one
/// for regular threads and one for hidden helper threads, which use their
/// own placement policy.
///
/// # Example
///
/// ```no_run
/// use many_places::{AffinityConfig, AffinityContext, AffinityType};
///
/// let mut context = AffinityContext::for_current_process(AffinityConfig::with_type(
///     AffinityType::Compact,
/// ));
/// context.initialize().unwrap();
///
/// println!("{} places", context.affinity().num_masks());
///
/// // Bind the current thread (thread 0) to its place.
/// context.set_init_mask(0).unwrap();
/// context.bind_init_mask(0).unwrap();
/// ```
#[derive(Debug)]
pub struct AffinityContext {
    binder: BinderFacade,
    filesystem: FilesystemFacade,
    topology: Option<Topology>,
    /// The as-discovered topology, before any subset narrowed it. Re-used
    /// when masks are regenerated so discovery never runs twice.
    pristine_topology: Option<Topology>,
    full_mask: ProcMask,
    orig_mask: ProcMask,
    affinity: AffinityConfig,
    hh_affinity: AffinityConfig,
    subset: Option<SubsetRequest>,
    top_method: TopologyMethod,
    fallback_counters: Option<(u32, u32, u32)>,
    balanced: Option<BalancedAssigner>,
    num_hidden_helpers: ThreadId,
    threads: RwLock<HashMap<ThreadId, ThreadSlot>>,
    initialized: bool,
}

impl AffinityContext {
    /// A context for the real machine, with the default hidden-helper
    /// configuration (no binding for helpers).
    #[must_use]
    pub fn for_current_process(affinity: AffinityConfig) -> Self {
        Self::new(BinderFacade::target(), FilesystemFacade::target(), affinity)
    }

    /// A context backed by a fake machine with `num_procs` processors.
    /// Binding calls are recorded instead of performed.
    #[cfg(any(test, feature = "test-util"))]
    #[must_use]
    pub fn for_fake_machine(num_procs: ProcessorId, affinity: AffinityConfig) -> Self {
        Self::new(
            BinderFacade::from_fake(crate::pal::FakeBinder::with_procs(num_procs)),
            FilesystemFacade::target(),
            affinity,
        )
    }

    fn new(binder: BinderFacade, filesystem: FilesystemFacade, affinity: AffinityConfig) -> Self {
        Self {
            binder,
            filesystem,
            topology: None,
            pristine_topology: None,
            full_mask: ProcMask::new(),
            orig_mask: ProcMask::new(),
            affinity,
            hh_affinity: AffinityConfig::default(),
            subset: None,
            top_method: TopologyMethod::Default,
            fallback_counters: None,
            balanced: None,
            num_hidden_helpers: 0,
            threads: RwLock::new(HashMap::new()),
            initialized: false,
        }
    }

    /// Sets the hidden-helper configuration. Helper threads occupy IDs
    /// `1..=count`, with ID 1 being the helper-team main thread.
    #[must_use]
    pub fn with_hidden_helpers(mut self, count: ThreadId, config: AffinityConfig) -> Self {
        self.num_hidden_helpers = count;
        self.hh_affinity = config;
        self
    }

    /// Installs a hardware subset request to be applied after discovery.
    #[must_use]
    pub fn with_subset(mut self, request: SubsetRequest) -> Self {
        self.subset = Some(request);
        self
    }

    /// Pins discovery to a single back-end instead of the fallback chain.
    #[must_use]
    pub fn with_top_method(mut self, method: TopologyMethod) -> Self {
        self.top_method = method;
        self
    }

    /// Provides machine counters for the synthetic-topology fallback when
    /// the pinned back-end fails.
    #[must_use]
    pub fn with_fallback_counters(
        mut self,
        packages: u32,
        cores_per_pkg: u32,
        threads_per_core: u32,
    ) -> Self {
        self.fallback_counters = Some((packages, cores_per_pkg, threads_per_core));
        self
    }

    /// Builds a context around an already-constructed topology, bypassing
    /// discovery. Meant for tests that need full control of the machine
    /// shape while still exercising places and binding.
    #[cfg(any(test, feature = "test-util"))]
    #[must_use]
    pub fn for_topology(topology: Topology, affinity: AffinityConfig) -> Self {
        let num_procs = topology.max_os_id() + 1;
        let mut context = Self::for_fake_machine(num_procs, affinity);
        context.pristine_topology = Some(topology.clone());
        context.topology = Some(topology);
        context
    }

    // Initialization -----------------------------------------------------

    /// Discovers the machine (unless a topology was injected), applies the
    /// hardware subset and generates the place lists for both
    /// configurations. Idempotent: a second call is a no-op.
    pub fn initialize(&mut self) -> Result<(), AffinityError> {
        if self.initialized {
            return Ok(());
        }
        if self.affinity.kind == AffinityType::Disabled {
            return Err(AffinityError::NotCapable);
        }

        self.full_mask = if self.affinity.flags.respect {
            self.binder.get_system_affinity()?
        } else {
            self.binder.full_system_mask()
        };
        if self.full_mask.is_empty() {
            self.full_mask = self.binder.full_system_mask();
        }
        self.orig_mask = self.full_mask.clone();

        if self.topology.is_none() {
            if let Some(pristine) = &self.pristine_topology {
                self.topology = Some(pristine.clone());
            } else {
                let mut topology = discovery::discover(
                    &self.binder,
                    &self.filesystem,
                    &self.full_mask,
                    self.top_method,
                    self.fallback_counters,
                )?;
                if self.binder.num_proc_groups() > 1 {
                    topology.insert_proc_group_layer();
                    topology.canonicalize();
                }
                self.pristine_topology = Some(topology.clone());
                self.topology = Some(topology);
            }
        }

        let topology = self.topology.as_mut().expect("topology was just set");

        if let Some(request) = &self.subset {
            match subset::apply(topology, request) {
                Ok(filter) => {
                    self.full_mask.intersect_with(&filter);
                }
                Err(error) => {
                    if self.affinity.flags.warnings {
                        tracing::warn!(%error, "ignoring hardware subset");
                    }
                }
            }
        }

        if self.affinity.flags.verbose {
            tracing::debug!(summary = %topology.summary(), "machine topology");
            topology.dump();
        }

        self.balanced = places::initialize_places(
            topology,
            &mut self.affinity,
            &mut self.full_mask,
            false,
        )?;
        places::initialize_places(topology, &mut self.hh_affinity, &mut self.full_mask, true)?;

        self.initialized = true;
        Ok(())
    }

    /// Tears the context down: restores the process's original affinity
    /// mask and drops all generated state. The context can be initialized
    /// again afterwards (for example with a different subset).
    pub fn uninitialize(&mut self) {
        if !self.orig_mask.is_empty() {
            if let Err(error) = self.binder.set_system_affinity(&self.orig_mask, false) {
                tracing::debug!(?error, "failed to restore the original affinity mask");
            }
        }
        self.affinity.reset_outputs();
        self.hh_affinity.reset_outputs();
        self.threads.write().expect("thread slot lock").clear();
        self.topology = None;
        self.balanced = None;
        self.initialized = false;
    }

    /// Replaces the hardware subset and regenerates every mask. Existing
    /// per-thread slots are dropped; threads must re-bind.
    pub fn set_subset(&mut self, request: SubsetRequest) -> Result<(), AffinityError> {
        self.uninitialize();
        self.subset = Some(request);
        self.initialize()
    }

    // Accessors ----------------------------------------------------------

    /// The canonical topology; `None` before initialization.
    #[must_use]
    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    /// The set of processors the process may currently use.
    #[must_use]
    pub fn full_mask(&self) -> &ProcMask {
        &self.full_mask
    }

    /// The regular-thread configuration and its generated places.
    #[must_use]
    pub fn affinity(&self) -> &AffinityConfig {
        &self.affinity
    }

    /// The hidden-helper configuration and its generated places.
    #[must_use]
    pub fn hh_affinity(&self) -> &AffinityConfig {
        &self.hh_affinity
    }

    /// Upper bound of the OS processor ID space.
    #[must_use]
    pub fn get_affinity_max_proc(&self) -> ProcessorId {
        self.topology
            .as_ref()
            .map_or_else(|| self.binder.full_system_mask().count() as ProcessorId, |topology| topology.max_os_id() + 1)
    }

    fn is_hidden_helper(&self, gtid: ThreadId) -> bool {
        self.num_hidden_helpers > 0 && gtid >= 1 && gtid <= self.num_hidden_helpers
    }

    fn is_hidden_helper_main(&self, gtid: ThreadId) -> bool {
        self.num_hidden_helpers > 0 && gtid == 1
    }

    fn config_for(&self, gtid: ThreadId) -> &AffinityConfig {
        if self.is_hidden_helper(gtid) {
            &self.hh_affinity
        } else {
            &self.affinity
        }
    }

    // Binding ------------------------------------------------------------

    /// Computes and records the initial place and mask of a thread, without
    /// installing it. The root thread and every worker get the full place
    /// partition `[0, num_masks - 1]`.
    pub fn set_init_mask(&self, gtid: ThreadId) -> Result<(), AffinityError> {
        if !self.initialized {
            return Err(AffinityError::NotCapable);
        }

        let is_hidden_helper = self.is_hidden_helper(gtid);
        let config = self.config_for(gtid);
        let num_masks = config.num_masks();

        let all_places = matches!(config.kind, AffinityType::None | AffinityType::Balanced)
            || self.is_hidden_helper_main(gtid);

        let (place, mask) = if all_places {
            (None, self.full_mask.clone())
        } else {
            let adjusted_gtid = if is_hidden_helper {
                // IDs 0 (regular primary) and 1 (helper-team main) are
                // special; worker helpers start counting at 2.
                (gtid - 2).max(0)
            } else {
                gtid
            };
            let offset = config.place_offset as usize;
            let place = (usize::try_from(adjusted_gtid.max(0))
                .expect("adjusted thread IDs are non-negative")
                + offset)
                % num_masks.max(1);
            (Some(place), config.masks()[place].clone())
        };

        let (ids, attrs) = place.map_or((PlaceIds::UNKNOWN, CoreAttrs::UNKNOWN), |place| {
            (config.place_ids()[place], config.place_attrs()[place])
        });

        if config.flags.verbose {
            match place {
                Some(place) => tracing::debug!(gtid, place, "assigning thread to place"),
                None => tracing::debug!(gtid, "assigning thread to all places"),
            }
        }

        let slot = ThreadSlot {
            mask,
            current_place: place,
            first_place: 0,
            last_place: num_masks.saturating_sub(1),
            ids,
            attrs,
        };
        self.threads
            .write()
            .expect("thread slot lock")
            .insert(gtid, slot);
        Ok(())
    }

    /// Installs a thread's recorded mask through the OS binder. With the
    /// `none` policy, OS refusals are ignored; any other policy surfaces
    /// them.
    pub fn bind_init_mask(&self, gtid: ThreadId) -> Result<(), AffinityError> {
        let config = self.config_for(gtid);
        let slot = self.slot(gtid)?;

        if config.flags.verbose {
            tracing::debug!(gtid, mask = %slot.mask, "binding thread");
        }

        let enforce = config.kind != AffinityType::None;
        match self.binder.set_system_affinity(&slot.mask, enforce) {
            Ok(()) => Ok(()),
            Err(_) if config.kind == AffinityType::None => Ok(()),
            Err(error) => Err(AffinityError::Os(error)),
        }
    }

    /// Moves a thread to another place within its partition and installs
    /// the new mask. Hidden helper threads are not affected by places and
    /// pass through.
    pub fn bind_place(&self, gtid: ThreadId, new_place: usize) -> Result<(), AffinityError> {
        if !self.initialized {
            return Err(AffinityError::NotCapable);
        }
        if self.is_hidden_helper(gtid) {
            return Ok(());
        }

        let (first, last) = {
            let slot = self.slot(gtid)?;
            (slot.first_place, slot.last_place)
        };

        let in_partition = if first <= last {
            (first..=last).contains(&new_place)
        } else {
            // A wrapped partition covers both ends of the place list.
            new_place <= last || new_place >= first
        };
        if !in_partition {
            return Err(AffinityError::PlaceOutsidePartition {
                place: new_place,
                first,
                last,
            });
        }

        let config = &self.affinity;
        let mask = config.masks()[new_place].clone();
        let ids = config.place_ids()[new_place];
        let attrs = config.place_attrs()[new_place];

        {
            let mut threads = self.threads.write().expect("thread slot lock");
            let slot = threads
                .get_mut(&gtid)
                .ok_or(AffinityError::UnknownThread(gtid))?;
            slot.mask = mask.clone();
            slot.current_place = Some(new_place);
            slot.ids = ids;
            slot.attrs = attrs;
        }

        if config.flags.verbose {
            tracing::debug!(gtid, place = new_place, mask = %mask, "re-binding thread");
        }
        self.binder
            .set_system_affinity(&mask, true)
            .map_err(AffinityError::Os)
    }

    /// Computes and installs the balanced-policy mask for worker `tid` of a
    /// team of `nthreads`. Hidden helpers pass through.
    pub fn bind_balanced(
        &self,
        gtid: ThreadId,
        tid: usize,
        nthreads: usize,
    ) -> Result<(), AffinityError> {
        if !self.initialized {
            return Err(AffinityError::NotCapable);
        }
        if self.is_hidden_helper(gtid) {
            return Ok(());
        }
        let topology = self.topology.as_ref().ok_or(AffinityError::NotCapable)?;

        let fine_gran = balanced::is_fine_granularity(topology, self.affinity.gran);
        let mask = match &self.balanced {
            Some(assigner) => assigner.mask_for(topology, tid, nthreads, fine_gran),
            None => balanced::uniform_mask(topology, tid, nthreads, fine_gran),
        };

        if self.affinity.flags.verbose {
            tracing::debug!(gtid, tid, mask = %mask, "balanced binding");
        }

        {
            let mut threads = self.threads.write().expect("thread slot lock");
            let slot = threads.entry(gtid).or_insert_with(|| ThreadSlot {
                mask: ProcMask::new(),
                current_place: None,
                first_place: 0,
                last_place: self.affinity.num_masks().saturating_sub(1),
                ids: PlaceIds::UNKNOWN,
                attrs: CoreAttrs::UNKNOWN,
            });
            slot.mask = mask.clone();
        }

        self.binder
            .set_system_affinity(&mask, true)
            .map_err(AffinityError::Os)
    }

    // Aux entry points ---------------------------------------------------

    /// Installs a caller-supplied mask for the thread and resets its place
    /// range. The mask must share at least one processor with the process
    /// mask and must not span processor groups.
    pub fn set_affinity(&self, gtid: ThreadId, mask: &ProcMask) -> Result<(), AffinityError> {
        if !self.initialized {
            return Err(AffinityError::NotCapable);
        }
        if !mask.intersects(&self.full_mask) {
            return Err(AffinityError::MaskOutsideProcess);
        }
        if self.binder.num_proc_groups() > 1 && mask.group_of().is_none() {
            return Err(AffinityError::MaskSpansGroups);
        }

        {
            let mut threads = self.threads.write().expect("thread slot lock");
            let slot = threads.entry(gtid).or_insert_with(|| ThreadSlot {
                mask: ProcMask::new(),
                current_place: None,
                first_place: 0,
                last_place: self.affinity.num_masks().saturating_sub(1),
                ids: PlaceIds::UNKNOWN,
                attrs: CoreAttrs::UNKNOWN,
            });
            slot.mask.copy_from(mask);
            slot.current_place = None;
            slot.first_place = 0;
            slot.last_place = self.affinity.num_masks().saturating_sub(1);
        }

        self.binder
            .set_system_affinity(mask, true)
            .map_err(AffinityError::Os)
    }

    /// Reads the thread's current affinity mask: the live OS mask where the
    /// platform can report it, the cached per-thread mask elsewhere.
    pub fn get_affinity(&self, gtid: ThreadId) -> Result<ProcMask, AffinityError> {
        if !self.initialized {
            return Err(AffinityError::NotCapable);
        }

        #[cfg(any(windows, target_os = "aix"))]
        {
            return Ok(self.slot(gtid)?.mask);
        }

        #[cfg(not(any(windows, target_os = "aix")))]
        {
            let _ = gtid;
            self.binder.get_system_affinity().map_err(AffinityError::Os)
        }
    }

    /// Adds one processor to a caller-owned mask, validating the ID.
    pub fn set_affinity_mask_proc(
        &self,
        proc: ProcessorId,
        mask: &mut ProcMask,
    ) -> Result<(), MaskProcError> {
        self.validate_proc(proc)?;
        mask.set(proc);
        Ok(())
    }

    /// Removes one processor from a caller-owned mask, validating the ID.
    pub fn unset_affinity_mask_proc(
        &self,
        proc: ProcessorId,
        mask: &mut ProcMask,
    ) -> Result<(), MaskProcError> {
        self.validate_proc(proc)?;
        mask.clear(proc);
        Ok(())
    }

    /// Tests one processor in a caller-owned mask, validating the ID.
    pub fn get_affinity_mask_proc(
        &self,
        proc: ProcessorId,
        mask: &ProcMask,
    ) -> Result<bool, MaskProcError> {
        self.validate_proc(proc)?;
        Ok(mask.test(proc))
    }

    fn validate_proc(&self, proc: ProcessorId) -> Result<(), MaskProcError> {
        if proc >= self.get_affinity_max_proc() {
            return Err(MaskProcError::OutOfRange(proc));
        }
        if !self.full_mask.test(proc) {
            return Err(MaskProcError::NotInFullMask(proc));
        }
        Ok(())
    }

    // Per-thread queries -------------------------------------------------

    /// The place a thread is currently on; `None` when the thread floats
    /// over all places.
    pub fn thread_place(&self, gtid: ThreadId) -> Result<Option<usize>, AffinityError> {
        Ok(self.slot(gtid)?.current_place)
    }

    /// The place partition `[first, last]` of a thread.
    pub fn thread_partition(&self, gtid: ThreadId) -> Result<(usize, usize), AffinityError> {
        let slot = self.slot(gtid)?;
        Ok((slot.first_place, slot.last_place))
    }

    /// The recorded mask of a thread.
    pub fn thread_mask(&self, gtid: ThreadId) -> Result<ProcMask, AffinityError> {
        Ok(self.slot(gtid)?.mask)
    }

    /// The topology position of a thread's place (its socket, core, and so
    /// on), answering in O(1) from the per-place summaries.
    pub fn thread_topology_ids(&self, gtid: ThreadId) -> Result<PlaceIds, AffinityError> {
        Ok(self.slot(gtid)?.ids)
    }

    /// The aggregated core attributes of a thread's place.
    pub fn thread_topology_attrs(&self, gtid: ThreadId) -> Result<CoreAttrs, AffinityError> {
        Ok(self.slot(gtid)?.attrs)
    }

    fn slot(&self, gtid: ThreadId) -> Result<ThreadSlot, AffinityError> {
        self.threads
            .read()
            .expect("thread slot lock")
            .get(&gtid)
            .cloned()
            .ok_or(AffinityError::UnknownThread(gtid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use new_zealand::nz;
    use crate::{LayerId, LayerKind};

    fn compact_context(packages: u32, cores: u32, smt: u32) -> AffinityContext {
        let nzv = |value| std::num::NonZero::new(value).expect("test counts are non-zero");
        let mut config = AffinityConfig::with_type(AffinityType::Compact);
        config.gran = Some(LayerKind::Thread);
        let mut context = AffinityContext::for_topology(
            Topology::from_uniform_counts(nzv(packages), nzv(cores), nzv(smt)),
            config,
        );
        context.initialize().unwrap();
        context
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut context = compact_context(1, 2, 2);
        let places_before = context.affinity().num_masks();
        context.initialize().unwrap();
        assert_eq!(context.affinity().num_masks(), places_before);
    }

    #[test]
    fn binds_threads_round_robin() {
        let context = compact_context(1, 4, 1);

        for gtid in 0..6 {
            context.set_init_mask(gtid).unwrap();
            context.bind_init_mask(gtid).unwrap();
        }

        // Four places; threads wrap around modulo the place count.
        assert_eq!(context.thread_place(0).unwrap(), Some(0));
        assert_eq!(context.thread_place(3).unwrap(), Some(3));
        assert_eq!(context.thread_place(4).unwrap(), Some(0));
        assert_eq!(context.thread_place(5).unwrap(), Some(1));

        assert_eq!(context.thread_mask(4).unwrap(), ProcMask::from_ids([0]));
        assert_eq!(context.thread_partition(2).unwrap(), (0, 3));
    }

    #[test]
    fn place_assignment_is_deterministic() {
        let first = compact_context(2, 2, 2);
        let second = compact_context(2, 2, 2);

        for gtid in 0..8 {
            first.set_init_mask(gtid).unwrap();
            second.set_init_mask(gtid).unwrap();
            assert_eq!(
                first.thread_mask(gtid).unwrap(),
                second.thread_mask(gtid).unwrap()
            );
        }
    }

    #[test]
    fn offset_rotates_assignment() {
        let mut config = AffinityConfig::with_type(AffinityType::Compact);
        config.gran = Some(LayerKind::Thread);
        config.offset = 1;
        let mut context =
            AffinityContext::for_topology(Topology::from_uniform_counts(nz!(1), nz!(4), nz!(1)), config);
        context.initialize().unwrap();

        context.set_init_mask(0).unwrap();
        assert_eq!(context.thread_place(0).unwrap(), Some(1));
    }

    #[test]
    fn none_policy_floats_over_all_places() {
        let mut context = AffinityContext::for_topology(
            Topology::from_uniform_counts(nz!(1), nz!(2), nz!(2)),
            AffinityConfig::default(),
        );
        context.initialize().unwrap();

        context.set_init_mask(0).unwrap();
        assert_eq!(context.thread_place(0).unwrap(), None);
        assert_eq!(context.thread_mask(0).unwrap(), *context.full_mask());

        // OS refusals are swallowed for the none policy.
        context.bind_init_mask(0).unwrap();
    }

    #[test]
    fn bind_installs_the_mask_through_the_os() {
        let context = compact_context(1, 2, 1);
        context.set_init_mask(0).unwrap();
        context.bind_init_mask(0).unwrap();

        let calls = context.binder.as_fake().set_affinity_calls();
        assert_eq!(calls.last().unwrap(), &(ProcMask::from_ids([0]), true));
    }

    #[test]
    fn bind_place_validates_partition() {
        let context = compact_context(1, 4, 1);
        context.set_init_mask(0).unwrap();

        context.bind_place(0, 2).unwrap();
        assert_eq!(context.thread_place(0).unwrap(), Some(2));

        let error = context.bind_place(0, 9).unwrap_err();
        assert!(matches!(error, AffinityError::PlaceOutsidePartition { .. }));
    }

    #[test]
    fn hidden_helpers_have_their_own_config() {
        let mut worker_config = AffinityConfig::with_type(AffinityType::Compact);
        worker_config.gran = Some(LayerKind::Thread);
        let mut helper_config = AffinityConfig::with_type(AffinityType::Compact);
        helper_config.gran = Some(LayerKind::Thread);

        let mut context =
            AffinityContext::for_topology(Topology::from_uniform_counts(nz!(1), nz!(4), nz!(1)), worker_config)
                .with_hidden_helpers(2, helper_config);
        context.initialize().unwrap();

        // The helper-team main thread (gtid 1) floats; helper workers bind
        // starting at place 0.
        context.set_init_mask(1).unwrap();
        assert_eq!(context.thread_place(1).unwrap(), None);

        context.set_init_mask(2).unwrap();
        assert_eq!(context.thread_place(2).unwrap(), Some(0));

        // Places never move hidden helpers.
        context.bind_place(2, 3).unwrap();
        assert_eq!(context.thread_place(2).unwrap(), Some(0));
    }

    #[test]
    fn balanced_policy_binds_by_team_position() {
        let mut config = AffinityConfig::with_type(AffinityType::Balanced);
        config.gran = Some(LayerKind::Thread);
        let mut context = AffinityContext::for_topology(
            crate::test_topologies::nonuniform_4_2_2(),
            config,
        );
        context.initialize().unwrap();

        // Initial mask floats; the balanced bind pins to a specific slot.
        context.set_init_mask(0).unwrap();
        assert_eq!(context.thread_place(0).unwrap(), None);

        for (tid, expected) in [(0, 0_u32), (1, 1), (2, 4), (3, 5), (4, 6), (5, 7)] {
            context.bind_balanced(tid, tid as usize, 6).unwrap();
            assert_eq!(
                context.thread_mask(tid).unwrap(),
                ProcMask::from_ids([expected])
            );
        }
    }

    #[test]
    fn set_affinity_validates_and_records() {
        let context = compact_context(1, 4, 1);

        let mask = ProcMask::from_ids([1, 2]);
        context.set_affinity(7, &mask).unwrap();
        assert_eq!(context.thread_mask(7).unwrap(), mask);
        assert_eq!(context.thread_place(7).unwrap(), None);

        let outside = ProcMask::from_ids([99]);
        assert!(matches!(
            context.set_affinity(7, &outside).unwrap_err(),
            AffinityError::MaskOutsideProcess
        ));
    }

    #[test]
    fn mask_proc_entry_points_validate_range() {
        let context = compact_context(1, 4, 1);
        let mut mask = ProcMask::new();

        context.set_affinity_mask_proc(2, &mut mask).unwrap();
        assert!(context.get_affinity_mask_proc(2, &mask).unwrap());

        context.unset_affinity_mask_proc(2, &mut mask).unwrap();
        assert!(!context.get_affinity_mask_proc(2, &mask).unwrap());

        assert_eq!(
            context.set_affinity_mask_proc(64, &mut mask).unwrap_err(),
            MaskProcError::OutOfRange(64)
        );
    }

    #[test]
    fn subset_change_regenerates_masks() {
        let mut context = compact_context(2, 2, 2);
        assert_eq!(context.affinity().num_masks(), 8);

        context
            .set_subset(SubsetRequest::parse("1@1sockets").unwrap())
            .unwrap();

        assert_eq!(context.affinity().num_masks(), 4);
        assert_eq!(
            context.topology().unwrap().counters().num_packages,
            1
        );
        assert_eq!(context.full_mask().count(), 4);
    }

    #[test]
    fn uninitialize_restores_original_mask() {
        let mut context = compact_context(1, 2, 1);
        context.set_init_mask(0).unwrap();
        context.uninitialize();

        assert!(context.topology().is_none());
        assert!(matches!(
            context.set_init_mask(0).unwrap_err(),
            AffinityError::NotCapable
        ));
    }

    #[test]
    fn place_summaries_are_queryable_per_thread() {
        let context = compact_context(2, 2, 1);
        context.set_init_mask(3).unwrap();

        let ids = context.thread_topology_ids(3).unwrap();
        assert_eq!(ids.get(LayerKind::Socket), LayerId::Id(1));
    }

    #[test]
    fn thread_topology_attrs_on_hybrid() {
        let mut config = AffinityConfig::with_type(AffinityType::Compact);
        config.gran = Some(LayerKind::Core);
        let mut context =
            AffinityContext::for_topology(crate::test_topologies::hybrid_1x6p8e(), config);
        context.initialize().unwrap();

        context.set_init_mask(0).unwrap();
        let attrs = context.thread_topology_attrs(0).unwrap();
        assert_eq!(
            attrs.core_type,
            crate::AttrValue::Value(crate::CoreType::Core)
        );
    }

    #[test]
    fn disabled_affinity_refuses_everything() {
        let mut context = AffinityContext::for_topology(
            Topology::from_uniform_counts(nz!(1), nz!(2), nz!(1)),
            AffinityConfig::with_type(AffinityType::Disabled),
        );
        assert!(matches!(
            context.initialize().unwrap_err(),
            AffinityError::NotCapable
        ));
    }
}
