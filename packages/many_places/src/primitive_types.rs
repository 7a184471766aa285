/// Identifies a specific processor.
///
/// This will match the numeric identifier used by standard tooling of the
/// operating system.
///
/// It is important to highlight that the values used are not guaranteed to be
/// sequential/contiguous or to start from zero (aspects that are also not
/// guaranteed by operating system tooling).
pub type ProcessorId = u32;

/// Identifies a thread participating in affinity binding.
///
/// Thread IDs are assigned by the caller in spawn order, starting from zero.
/// Negative values never occur for ordinary threads; hidden helper threads
/// use a dedicated low range (see [`crate::AffinityContext`]).
pub type ThreadId = i32;

/// Differentiates the microarchitecture class of a core on a hybrid system.
///
/// The two-tier split mirrors how the hardware reports itself: a system either
/// has one core type throughout or mixes performance cores with
/// energy-efficient cores.
// Deliberately exhaustive: mirrors the two-tier structure of the platform
// APIs that report it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CoreType {
    /// An energy-efficient core (Atom microarchitecture on Intel hardware).
    Atom,

    /// A performance core.
    Core,
}

impl CoreType {
    /// The catalog name used in diagnostics and subset expressions.
    #[must_use]
    pub fn catalog(self) -> &'static str {
        match self {
            Self::Atom => "Intel Atom(R) processor",
            Self::Core => "Intel(R) Core(TM) processor",
        }
    }
}

/// The value of a per-core attribute, which may be unobserved or may stand
/// for several distinct values in an aggregated view.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AttrValue<T> {
    /// The attribute was not observed for this core.
    #[default]
    Unknown,

    /// Aggregated views only: the underlying cores disagree on the value.
    Multiple,

    /// A single observed value.
    Value(T),
}

impl<T: Copy + Eq> AttrValue<T> {
    /// Returns the observed value, if there is exactly one.
    #[must_use]
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Unknown | Self::Multiple => None,
        }
    }

    /// Whether a single value was observed.
    #[must_use]
    pub fn is_known(self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Folds another observation into an aggregate: agreeing values stay,
    /// disagreeing values collapse to [`AttrValue::Multiple`].
    pub fn aggregate(&mut self, other: Self) {
        *self = match (*self, other) {
            (Self::Unknown, other) => other,
            (current, Self::Unknown) => current,
            (current, other) if current == other => current,
            _ => Self::Multiple,
        };
    }
}

/// The hybrid attributes of one hardware thread's core.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct CoreAttrs {
    /// Microarchitecture class, when the hardware reports one.
    pub core_type: AttrValue<CoreType>,

    /// Relative efficiency, when the hardware reports one. Higher values
    /// mean faster cores.
    pub core_eff: AttrValue<u8>,
}

impl CoreAttrs {
    /// Attributes with nothing observed.
    pub const UNKNOWN: Self = Self {
        core_type: AttrValue::Unknown,
        core_eff: AttrValue::Unknown,
    };

    /// Whether either attribute carries a single observed value.
    #[must_use]
    pub fn is_known(self) -> bool {
        self.core_type.is_known() || self.core_eff.is_known()
    }

    /// Whether this thread's attributes satisfy a requirement: every known
    /// field of `required` must match the corresponding field here.
    #[must_use]
    pub fn contains(self, required: Self) -> bool {
        if let AttrValue::Value(required_type) = required.core_type {
            if self.core_type != AttrValue::Value(required_type) {
                return false;
            }
        }

        if let AttrValue::Value(required_eff) = required.core_eff {
            if self.core_eff != AttrValue::Value(required_eff) {
                return false;
            }
        }

        true
    }
}

/// A per-layer identifier of one hardware thread.
///
/// The `Ord` implementation places [`LayerId::Unknown`] after every numeric
/// ID, matching the rule that threads with unknown position take last
/// priority in canonical sorts. [`LayerId::Multiple`] appears only in
/// aggregated per-place views and never participates in sorting.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum LayerId {
    /// A hardware-assigned identifier within the enclosing layer.
    Id(u32),

    /// The hardware did not expose an identifier at this layer.
    Unknown,

    /// Aggregated views only: the place spans several identifiers.
    Multiple,
}

impl LayerId {
    /// Returns the numeric identifier, if one is known.
    #[must_use]
    pub fn id(self) -> Option<u32> {
        match self {
            Self::Id(id) => Some(id),
            Self::Unknown | Self::Multiple => None,
        }
    }

    /// Whether a numeric identifier is known.
    #[must_use]
    pub fn is_known(self) -> bool {
        matches!(self, Self::Id(_))
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Unknown => write!(f, "?"),
            Self::Multiple => write!(f, "*"),
        }
    }
}
