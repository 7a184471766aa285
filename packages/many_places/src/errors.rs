use thiserror::Error;

use crate::{LayerKind, ProcessorId};

/// The closed set of reasons a discovery back-end can fail.
///
/// The default discovery policy treats any of these as a signal to try the
/// next back-end in line; a pinned back-end surfaces them as fatal.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// CPUID leaf 4 is required but not supported by the processor.
    #[error("processor does not support CPUID leaf 4")]
    NoLeaf4Support,

    /// CPUID leaf 11 / 0x1F topology enumeration is absent.
    #[error("processor does not expose topology enumeration leaves")]
    NoLeafBSupport,

    /// The local APIC is not present or not visible.
    #[error("local APIC is not present")]
    ApicNotPresent,

    /// Different processors reported contradictory CPUID topology figures.
    #[error("inconsistent CPUID topology information across processors")]
    InconsistentCpuidInfo,

    /// Two processors reported the same APIC ID.
    #[error("legacy APIC IDs are not unique")]
    LegacyApicIdsNotUnique,

    /// The cpuinfo source contained no processor records.
    #[error("no processor records found in cpuinfo")]
    NoProcRecords,

    /// The cpuinfo source contained more records than the machine has
    /// processors.
    #[error("too many processor records found in cpuinfo")]
    TooManyProcRecords,

    /// A processor record was missing a required field.
    #[error("processor record is missing the '{field}' field")]
    MissingProcField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// A value in a processor record could not be parsed.
    #[error("processor record field '{field}' has an unparsable value")]
    BadProcField {
        /// Name of the malformed field.
        field: &'static str,
    },

    /// A line in the cpuinfo source exceeded the supported length.
    #[error("cpuinfo line too long")]
    LongLineCpuinfo,

    /// The back-end ran but could not make sense of the machine.
    #[error("machine topology could not be determined")]
    UnknownTopology,

    /// The back-end does not apply to this machine or build target.
    #[error("discovery method is not supported on this system")]
    NotSupported,
}

/// Reasons a hardware subset request cannot be applied to the topology.
///
/// These surface as warnings under the default policy (the subset is then
/// ignored) and as fatal errors when the subset was explicitly pinned.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum SubsetError {
    /// The requested layer does not exist in the detected topology.
    #[error("layer '{0}' does not exist in the detected topology")]
    LayerNotDetected(LayerKind),

    /// Two items reference the same layer (directly or through an alias).
    #[error("layers '{first}' and '{second}' are equivalent; only one may be specified")]
    EquivalentLayers {
        /// The kind specified first.
        first: LayerKind,
        /// The equivalent kind specified later.
        second: LayerKind,
    },

    /// `num + offset` exceeds the number of units the layer has.
    #[error("only {available} {layer} unit(s) available, but {requested} requested")]
    TooManyUnits {
        /// The layer in question.
        layer: LayerKind,
        /// Units available within one parent.
        available: u32,
        /// Units requested including the offset.
        requested: u32,
    },

    /// Core attributes were used on a machine that is not hybrid.
    #[error("core attributes require a hybrid machine")]
    AttrsOnNonHybrid,

    /// Core attributes were attached to an item of a non-core layer.
    #[error("core attributes are only valid on core items")]
    AttrsOnNonCoreItem,

    /// Core type and core efficiency attributes were mixed in one item.
    #[error("core_type and efficiency attributes are mutually exclusive")]
    IncompatibleAttrs,

    /// An attribute referenced a value never observed on this machine.
    #[error("attribute value '{value}' was not observed on this machine")]
    AttrNotObserved {
        /// The offending value, in catalog spelling.
        value: String,
    },

    /// The same attribute was specified twice in one item.
    #[error("attribute specified more than once")]
    AttrRepeat,

    /// An attributed and a non-attributed item both target the core layer,
    /// which leaves the request ambiguous.
    #[error("attributed and non-attributed core items are ambiguous together")]
    AmbiguousCoreItem,

    /// Applying the subset would leave no processors at all.
    #[error("hardware subset would filter out every processor")]
    AllFiltered,
}

/// Reasons the per-bit mask entry points reject a request.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum MaskProcError {
    /// The processor ID is outside the machine's ID space.
    #[error("processor {0} is out of range")]
    OutOfRange(ProcessorId),

    /// The processor exists but is not available to the process.
    #[error("processor {0} is not in the process affinity mask")]
    NotInFullMask(ProcessorId),
}

/// Errors surfaced by the public affinity entry points.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AffinityError {
    /// Affinity support is disabled or was never initialized.
    #[error("affinity is not enabled")]
    NotCapable,

    /// A caller-supplied mask shares no processor with the process mask.
    #[error("mask contains no processor available to the process")]
    MaskOutsideProcess,

    /// A caller-supplied mask spans more than one processor group.
    #[error("mask spans multiple processor groups")]
    MaskSpansGroups,

    /// A place index is outside the thread's place partition.
    #[error("place {place} is outside the partition [{first}, {last}]")]
    PlaceOutsidePartition {
        /// The requested place.
        place: usize,
        /// First place of the partition.
        first: usize,
        /// Last place of the partition.
        last: usize,
    },

    /// The thread has no binding state yet.
    #[error("thread {0} has no affinity state; bind it first")]
    UnknownThread(crate::ThreadId),

    /// The operating system rejected the bind call.
    #[error("operating system refused the affinity mask")]
    Os(#[from] std::io::Error),

    /// Discovery failed with a pinned back-end.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// A malformed proclist or placelist was supplied for explicit binding.
    #[error(transparent)]
    Grammar(#[from] placelist::Error),

    /// A malformed or inapplicable hardware subset was pinned.
    #[error(transparent)]
    Subset(#[from] SubsetError),
}
