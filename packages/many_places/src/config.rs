//! User-facing affinity configuration and its derived outputs.

use derive_more::derive::Display;

use crate::{CoreAttrs, LayerId, LayerKind, ProcMask};

/// The binding policy of an affinity configuration.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum AffinityType {
    /// A single place covering the whole process mask; binding is a no-op.
    #[default]
    #[display("none")]
    None,

    /// Places come from an explicit proclist or place list.
    #[display("explicit")]
    Explicit,

    /// One place per granularity unit, innermost-first order.
    #[display("logical")]
    Logical,

    /// Like logical, but one level out when SMT is present.
    #[display("physical")]
    Physical,

    /// Spread consecutive threads far apart in the hierarchy.
    #[display("scatter")]
    Scatter,

    /// Keep consecutive threads close in the hierarchy.
    #[display("compact")]
    Compact,

    /// Equalize thread counts across cores, SMT-density aware.
    #[display("balanced")]
    Balanced,

    /// Affinity is unavailable; every operation returns an error.
    #[display("disabled")]
    Disabled,
}

/// How a discovery run chooses its back-end.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum TopologyMethod {
    /// Try every back-end in priority order and take the first success.
    #[default]
    Default,

    /// Pin the hwloc back-end (requires the `hwloc` feature).
    Hwloc,

    /// Pin the CPUID leaf 0x1F / 0xB back-end.
    X2ApicId,

    /// Pin the legacy CPUID leaf 1 + 4 back-end.
    ApicId,

    /// Pin the `/proc/cpuinfo` back-end.
    CpuInfo,

    /// Pin the Windows processor-group back-end.
    ProcGroups,

    /// Pin the AIX SRAD back-end.
    Srad,

    /// Pin the flat one-thread-per-core fallback.
    Flat,
}

/// Diagnostic and behavioral toggles of an affinity configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "a closed set of independent toggles, mirrored from the config surface"
)]
pub struct AffinityFlags {
    /// Log informational messages about the chosen places.
    pub verbose: bool,

    /// Restrict discovery to the processors the process started with
    /// instead of the whole machine.
    pub respect: bool,

    /// Emit configuration warnings.
    pub warnings: bool,

    /// Generate one place per hardware thread instead of one per
    /// granularity-group leader.
    pub dups: bool,

    /// The configuration came from an OMP_PLACES-style source rather than
    /// a proclist.
    pub omp_places: bool,

    /// Group processors by core type instead of topology position.
    pub core_types_gran: bool,

    /// Group processors by core efficiency instead of topology position.
    pub core_effs_gran: bool,

    pub(crate) initialized: bool,
}

impl Default for AffinityFlags {
    fn default() -> Self {
        Self {
            verbose: false,
            respect: true,
            warnings: true,
            dups: false,
            omp_places: false,
            core_types_gran: false,
            core_effs_gran: false,
            initialized: false,
        }
    }
}

/// The per-layer position of one place, for O(1) "which socket am I on"
/// queries after binding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PlaceIds {
    ids: [LayerId; LayerKind::COUNT],
}

impl PlaceIds {
    /// A summary with every layer unknown.
    pub const UNKNOWN: Self = Self {
        ids: [LayerId::Unknown; LayerKind::COUNT],
    };

    /// The place's ID at the given layer kind, [`LayerId::Multiple`] when
    /// the place spans several units of that layer.
    #[must_use]
    pub fn get(&self, kind: LayerKind) -> LayerId {
        self.ids[kind.index()]
    }

    /// Folds another thread's ID into the aggregate for this place.
    pub(crate) fn aggregate(&mut self, kind: LayerKind, id: LayerId) {
        let slot = &mut self.ids[kind.index()];
        *slot = match (*slot, id) {
            (LayerId::Unknown, id) => id,
            (current, id) if current == id => current,
            _ => LayerId::Multiple,
        };
    }
}

impl Default for PlaceIds {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// One affinity policy set and, once initialized, its outputs: the place
/// list and the per-OS-ID granularity masks.
///
/// A process typically carries two of these: one for regular threads and
/// one for hidden helper threads.
#[derive(Clone, Debug, Default)]
pub struct AffinityConfig {
    /// The binding policy.
    pub kind: AffinityType,

    /// Requested granularity layer; `None` requests the default (core,
    /// falling back to thread and then socket).
    pub gran: Option<LayerKind>,

    /// Number of layers strictly inside the resolved granularity layer.
    /// Derived during initialization.
    pub(crate) gran_levels: Option<usize>,

    /// Attribute predicate for granularity (`cores:intel_core` style).
    pub core_attr_gran: CoreAttrs,

    /// Grammar text for [`AffinityType::Explicit`].
    pub proclist: Option<String>,

    /// Rotation applied to place-index assignment.
    pub offset: u32,

    /// Input to the sort bias table for compact/scatter policies.
    pub compact: u32,

    /// Optional cap on the number of places generated.
    pub num_places_cap: Option<u32>,

    /// Behavioral toggles.
    pub flags: AffinityFlags,

    pub(crate) masks: Vec<ProcMask>,
    pub(crate) os_id_masks: Vec<ProcMask>,
    pub(crate) place_ids: Vec<PlaceIds>,
    pub(crate) place_attrs: Vec<CoreAttrs>,
    /// The effective rotation used at binding time; derived from `offset`
    /// during initialization (logical/physical scale it by the SMT width).
    pub(crate) place_offset: u32,
}

impl AffinityConfig {
    /// A configuration with the given policy and everything else default.
    #[must_use]
    pub fn with_type(kind: AffinityType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Whether the configuration has been initialized into places.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.flags.initialized
    }

    /// The generated places, in assignment order.
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    #[must_use]
    pub fn masks(&self) -> &[ProcMask] {
        &self.masks
    }

    /// Number of generated places.
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    #[must_use]
    pub fn num_masks(&self) -> usize {
        self.masks.len()
    }

    /// The per-place topology summaries, parallel to [`Self::masks`].
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    #[must_use]
    pub fn place_ids(&self) -> &[PlaceIds] {
        &self.place_ids
    }

    /// The per-place aggregated core attributes, parallel to
    /// [`Self::masks`].
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    #[must_use]
    pub fn place_attrs(&self) -> &[CoreAttrs] {
        &self.place_attrs
    }

    /// The granularity mask of an OS processor ID: every processor close
    /// enough to it to share a place. `None` for IDs outside the topology.
    #[must_use]
    pub fn os_id_mask(&self, os_id: crate::ProcessorId) -> Option<&ProcMask> {
        self.os_id_masks
            .get(os_id as usize)
            .filter(|mask| !mask.is_empty())
    }

    /// Drops the generated outputs so the configuration can be
    /// re-initialized, for example after a subset change.
    pub(crate) fn reset_outputs(&mut self) {
        self.masks.clear();
        self.os_id_masks.clear();
        self.place_ids.clear();
        self.place_attrs.clear();
        self.place_offset = 0;
        self.gran_levels = None;
        self.flags.initialized = false;
    }
}
