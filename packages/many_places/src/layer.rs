//! The closed set of hardware layer kinds and the equivalence relation that
//! collapses redundant ones.

/// A kind of hardware layer that can appear in a machine topology.
///
/// Layers are ordered outermost-first in a topology's type list; the enum
/// itself carries no ordering significance.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum LayerKind {
    /// A physical package.
    Socket,

    /// A Windows processor group (at most 64 processors each).
    ProcGroup,

    /// A NUMA domain.
    Numa,

    /// A die within a socket.
    Die,

    /// A tile within a die.
    Tile,

    /// A module of cores.
    Module,

    /// L3 cache sharing domain.
    L3,

    /// L2 cache sharing domain.
    L2,

    /// L1 cache sharing domain.
    L1,

    /// Last-level cache. Never detected directly; always an alias for
    /// whichever real cache layer is innermost.
    Llc,

    /// A physical core.
    Core,

    /// A hardware thread (one SMT sibling).
    Thread,
}

impl LayerKind {
    /// Number of distinct layer kinds.
    pub const COUNT: usize = 12;

    /// Every layer kind, in a fixed (but semantically arbitrary) order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Socket,
        Self::ProcGroup,
        Self::Numa,
        Self::Die,
        Self::Tile,
        Self::Module,
        Self::L3,
        Self::L2,
        Self::L1,
        Self::Llc,
        Self::Core,
        Self::Thread,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Socket => 0,
            Self::ProcGroup => 1,
            Self::Numa => 2,
            Self::Die => 3,
            Self::Tile => 4,
            Self::Module => 5,
            Self::L3 => 6,
            Self::L2 => 7,
            Self::L1 => 8,
            Self::Llc => 9,
            Self::Core => 10,
            Self::Thread => 11,
        }
    }

    /// The singular catalog name used in diagnostics.
    #[must_use]
    pub fn catalog(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::ProcGroup => "proc_group",
            Self::Numa => "numa_domain",
            Self::Die => "die",
            Self::Tile => "tile",
            Self::Module => "module",
            Self::L3 => "l3_cache",
            Self::L2 => "l2_cache",
            Self::L1 => "l1_cache",
            Self::Llc => "ll_cache",
            Self::Core => "core",
            Self::Thread => "thread",
        }
    }

    /// The plural catalog name used in diagnostics.
    #[must_use]
    pub fn catalog_plural(self) -> &'static str {
        match self {
            Self::Socket => "sockets",
            Self::ProcGroup => "proc_groups",
            Self::Numa => "numa_domains",
            Self::Die => "dice",
            Self::Tile => "tiles",
            Self::Module => "modules",
            Self::L3 => "l3_caches",
            Self::L2 => "l2_caches",
            Self::L1 => "l1_caches",
            Self::Llc => "ll_caches",
            Self::Core => "cores",
            Self::Thread => "threads",
        }
    }

    /// Survival preference when two adjacent layers collapse into one.
    ///
    /// When a radix-1 pair is found, the layer with the lower preference is
    /// removed and aliased to the other.
    pub(crate) fn radix1_preference(self) -> u8 {
        match self {
            Self::Socket => 110,
            Self::ProcGroup => 100,
            Self::Core => 95,
            Self::Thread => 90,
            Self::Numa => 85,
            Self::Die => 80,
            Self::Tile => 75,
            Self::Module => 73,
            Self::L3 => 70,
            Self::L2 => 65,
            Self::L1 => 60,
            Self::Llc => 5,
        }
    }

    /// Whether this is one of the three structural layers that
    /// canonicalization never removes.
    pub(crate) fn is_structural(self) -> bool {
        matches!(self, Self::Socket | Self::Core | Self::Thread)
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.catalog())
    }
}

/// The many-to-one relation collapsing redundant layer kinds onto the layer
/// that actually represents them in a canonical topology.
///
/// A kind that maps to itself is a "real" layer present in the topology; a
/// kind that maps to another is an alias (for example `Die -> Socket` when
/// every socket has exactly one die). A kind with no mapping was never
/// observed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EquivalenceMap {
    map: [Option<LayerKind>; LayerKind::COUNT],
}

impl EquivalenceMap {
    /// An empty relation: nothing observed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The layer kind representing `kind`, or `None` if `kind` was never
    /// observed.
    #[must_use]
    pub fn get(&self, kind: LayerKind) -> Option<LayerKind> {
        self.map[kind.index()]
    }

    /// Declares `kind` to be represented by `representative`.
    pub fn set(&mut self, kind: LayerKind, representative: LayerKind) {
        self.map[kind.index()] = Some(representative);
    }

    /// Declares `kind` to be a real layer (self-representing).
    pub fn set_self(&mut self, kind: LayerKind) {
        self.set(kind, kind);
    }

    /// Removes `kind` from the relation entirely.
    pub fn remove(&mut self, kind: LayerKind) {
        self.map[kind.index()] = None;
    }

    /// Redirects every kind currently represented by `from` to be
    /// represented by `to` instead (including `from` itself).
    pub fn redirect(&mut self, from: LayerKind, to: LayerKind) {
        for slot in &mut self.map {
            if *slot == Some(from) {
                *slot = Some(to);
            }
        }
        self.set(from, to);
    }

    /// Whether `kind` is a real (self-representing) layer.
    #[must_use]
    pub fn is_real(&self, kind: LayerKind) -> bool {
        self.get(kind) == Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_covers_every_kind_once() {
        for (position, kind) in LayerKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), position);
        }
    }

    #[test]
    fn equivalence_basics() {
        let mut map = EquivalenceMap::new();
        assert_eq!(map.get(LayerKind::Socket), None);

        map.set_self(LayerKind::Socket);
        assert!(map.is_real(LayerKind::Socket));

        map.set(LayerKind::Die, LayerKind::Socket);
        assert_eq!(map.get(LayerKind::Die), Some(LayerKind::Socket));
        assert!(!map.is_real(LayerKind::Die));
    }

    #[test]
    fn redirect_is_transitive_free() {
        // After redirecting Socket -> Core, nothing may still point at
        // Socket: the relation must stay idempotent.
        let mut map = EquivalenceMap::new();
        map.set_self(LayerKind::Socket);
        map.set(LayerKind::Die, LayerKind::Socket);
        map.set_self(LayerKind::Core);

        map.redirect(LayerKind::Socket, LayerKind::Core);

        assert_eq!(map.get(LayerKind::Die), Some(LayerKind::Core));
        assert_eq!(map.get(LayerKind::Socket), Some(LayerKind::Core));
        for kind in LayerKind::ALL {
            if let Some(representative) = map.get(kind) {
                assert_eq!(map.get(representative), Some(representative));
            }
        }
    }
}
