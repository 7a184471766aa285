use crate::{CoreAttrs, LayerId, ProcessorId};

/// One hardware thread (logical processor) as discovered on the machine.
///
/// The `ids` vector holds the thread's identifier at every topology layer,
/// outermost first, and always has exactly the topology's depth. The
/// `sub_ids` vector is derived after sorting: within any ancestor, children
/// are numbered `0..k-1` in discovery order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HwThread {
    /// OS-assigned processor number.
    pub os_id: ProcessorId,

    /// Position in discovery order, stable across re-sorts.
    pub original_idx: usize,

    /// Per-layer identifiers, outermost first.
    pub ids: Vec<LayerId>,

    /// Dense per-layer indices, derived during canonicalization.
    pub sub_ids: Vec<u32>,

    /// Hybrid core attributes, when the hardware reports them.
    pub attrs: CoreAttrs,

    /// Whether this is the first thread of its granularity group.
    pub leader: bool,
}

impl HwThread {
    /// Creates a thread record as a discovery back-end would: ids assigned,
    /// derived fields zeroed.
    #[must_use]
    pub fn new(os_id: ProcessorId, original_idx: usize, ids: Vec<LayerId>) -> Self {
        let depth = ids.len();
        Self {
            os_id,
            original_idx,
            ids,
            sub_ids: vec![0; depth],
            attrs: CoreAttrs::UNKNOWN,
            leader: false,
        }
    }

    /// Same as [`HwThread::new`] but with hybrid attributes attached.
    #[must_use]
    pub fn with_attrs(
        os_id: ProcessorId,
        original_idx: usize,
        ids: Vec<LayerId>,
        attrs: CoreAttrs,
    ) -> Self {
        Self {
            attrs,
            ..Self::new(os_id, original_idx, ids)
        }
    }
}

impl std::fmt::Display for HwThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "os {}:", self.os_id)?;
        for id in &self.ids {
            write!(f, " {id}")?;
        }
        if let crate::AttrValue::Value(core_type) = self.attrs.core_type {
            write!(f, " ({})", core_type.catalog())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttrValue, CoreType};

    #[test]
    fn smoke_test() {
        let thread = HwThread::new(3, 0, vec![LayerId::Id(0), LayerId::Id(1), LayerId::Id(1)]);

        assert_eq!(thread.os_id, 3);
        assert_eq!(thread.sub_ids.len(), 3);
        assert!(!thread.leader);

        let displayed = format!("{thread}");
        assert!(displayed.contains("os 3"));

        let hybrid = HwThread::with_attrs(
            4,
            1,
            vec![LayerId::Id(0)],
            CoreAttrs {
                core_type: AttrValue::Value(CoreType::Atom),
                core_eff: AttrValue::Value(0),
            },
        );
        assert!(format!("{hybrid}").contains("Atom"));
    }
}
