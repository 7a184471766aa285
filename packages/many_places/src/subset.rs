//! Application of a parsed hardware subset request to the topology:
//! validation against the detected layers and a single filtering pass over
//! the sorted threads.

use foldhash::HashMap;
use foldhash::HashMapExt;

use placelist::{SubsetAttr, SubsetCount, SubsetItem, SubsetLayer};

use crate::{
    AttrValue, CoreAttrs, CoreType, LayerId, LayerKind, ProcMask, SubsetError, Topology,
};

/// A parsed hardware subset request.
///
/// In relative mode (the default) each item is quantified within the
/// next-outer requested layer; in absolute mode each requested layer is
/// independently quantified over the whole machine. The textual form marks
/// absolute mode with a leading `:`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubsetRequest {
    /// The requested items, in user order.
    pub items: Vec<SubsetItem>,

    /// Whether the request is absolute rather than relative.
    pub absolute: bool,
}

impl SubsetRequest {
    /// Parses a subset expression, honoring the leading-`:` absolute marker.
    pub fn parse(text: &str) -> Result<Self, placelist::Error> {
        let (absolute, body) = match text.trim().strip_prefix(':') {
            Some(body) => (true, body),
            None => (false, text),
        };
        Ok(Self {
            items: placelist::parse_subset(body)?,
            absolute,
        })
    }

    /// The canonical spelling of the request; parsing it back yields an
    /// equal request.
    #[must_use]
    pub fn to_canonical_string(&self) -> String {
        let body = placelist::emit_subset(&self.items);
        if self.absolute {
            format!(":{body}")
        } else {
            body
        }
    }
}

pub(crate) fn layer_kind_of(layer: SubsetLayer) -> LayerKind {
    match layer {
        SubsetLayer::Sockets => LayerKind::Socket,
        SubsetLayer::Dice => LayerKind::Die,
        SubsetLayer::Modules => LayerKind::Module,
        SubsetLayer::Tiles => LayerKind::Tile,
        SubsetLayer::NumaDomains => LayerKind::Numa,
        SubsetLayer::L3Caches => LayerKind::L3,
        SubsetLayer::L2Caches => LayerKind::L2,
        SubsetLayer::L1Caches => LayerKind::L1,
        SubsetLayer::Cores => LayerKind::Core,
        SubsetLayer::Threads => LayerKind::Thread,
        SubsetLayer::ProcGroups => LayerKind::ProcGroup,
    }
}

/// One validated item, resolved against the topology.
struct ResolvedItem {
    level: usize,
    count: Option<u32>,
    offset: u32,
    attrs: Vec<SubsetAttr>,
}

fn attr_as_core_attrs(attr: SubsetAttr) -> CoreAttrs {
    match attr {
        SubsetAttr::IntelCore => CoreAttrs {
            core_type: AttrValue::Value(CoreType::Core),
            core_eff: AttrValue::Unknown,
        },
        SubsetAttr::IntelAtom => CoreAttrs {
            core_type: AttrValue::Value(CoreType::Atom),
            core_eff: AttrValue::Unknown,
        },
        SubsetAttr::Eff(eff) => CoreAttrs {
            core_type: AttrValue::Unknown,
            core_eff: AttrValue::Value(eff),
        },
    }
}

fn thread_matches_attr(attrs: CoreAttrs, wanted: SubsetAttr) -> bool {
    match wanted {
        SubsetAttr::IntelCore => attrs.core_type == AttrValue::Value(CoreType::Core),
        SubsetAttr::IntelAtom => attrs.core_type == AttrValue::Value(CoreType::Atom),
        SubsetAttr::Eff(eff) => attrs.core_eff == AttrValue::Value(eff),
    }
}

/// Validates the request and resolves each item to a topology level.
fn validate(
    topology: &Topology,
    request: &SubsetRequest,
) -> Result<Vec<ResolvedItem>, SubsetError> {
    let mut items: Vec<(LayerKind, &SubsetItem)> = Vec::new();
    for item in &request.items {
        items.push((layer_kind_of(item.layer), item));
    }

    // Process outermost layers first.
    items.sort_by_key(|(kind, _)| topology.level_of(*kind).unwrap_or(usize::MAX));

    let core_level = topology.level_of(LayerKind::Core);
    let mut specified: Vec<(LayerKind, LayerKind)> = Vec::new();
    let mut resolved = Vec::new();

    for (kind, item) in items {
        let Some(real_kind) = topology.equivalent().get(kind) else {
            return Err(SubsetError::LayerNotDetected(kind));
        };
        let level = topology
            .level_of(kind)
            .expect("layers with an equivalence entry resolve to a level");

        if let Some((_, first)) = specified
            .iter()
            .find(|(real, _)| *real == real_kind)
        {
            // Two core items where exactly one is attributed is the
            // classic ambiguous spelling; report it as such.
            if Some(level) == core_level {
                return Err(SubsetError::AmbiguousCoreItem);
            }
            return Err(SubsetError::EquivalentLayers {
                first: *first,
                second: kind,
            });
        }
        specified.push((real_kind, kind));

        let count = match item.count {
            SubsetCount::All => None,
            SubsetCount::Count(count) => Some(count),
        };

        if !request.absolute {
            let max_count = topology.ratio_at(level);
            if let Some(count) = count {
                if count + item.offset > max_count {
                    return Err(SubsetError::TooManyUnits {
                        layer: kind,
                        available: max_count,
                        requested: count + item.offset,
                    });
                }
            }
        }

        let mut attrs = item.attrs.clone();
        if !attrs.is_empty() {
            if Some(level) != core_level {
                return Err(SubsetError::AttrsOnNonCoreItem);
            }
            validate_attrs(topology, kind, &mut attrs, count, item.offset, request)?;
        }

        resolved.push(ResolvedItem {
            level,
            count,
            offset: item.offset,
            attrs,
        });
    }

    Ok(resolved)
}

fn validate_attrs(
    topology: &Topology,
    kind: LayerKind,
    attrs: &mut Vec<SubsetAttr>,
    count: Option<u32>,
    offset: u32,
    request: &SubsetRequest,
) -> Result<(), SubsetError> {
    if !topology.is_hybrid() {
        if attrs.len() == 1 {
            // A single attribute on a non-hybrid machine is dropped with a
            // warning rather than invalidating the whole request.
            tracing::warn!("ignoring core attribute on a non-hybrid machine");
            attrs.clear();
            return Ok(());
        }
        return Err(SubsetError::AttrsOnNonHybrid);
    }

    let using_types = attrs
        .iter()
        .any(|attr| matches!(attr, SubsetAttr::IntelCore | SubsetAttr::IntelAtom));
    let using_effs = attrs.iter().any(|attr| matches!(attr, SubsetAttr::Eff(_)));
    if using_types && using_effs {
        return Err(SubsetError::IncompatibleAttrs);
    }

    for (position, attr) in attrs.iter().enumerate() {
        if attrs[..position].contains(attr) {
            return Err(SubsetError::AttrRepeat);
        }

        match *attr {
            SubsetAttr::Eff(eff) => {
                if u32::from(eff) >= topology.num_core_efficiencies() {
                    return Err(SubsetError::AttrNotObserved {
                        value: format!("eff{eff}"),
                    });
                }
            }
            SubsetAttr::IntelCore | SubsetAttr::IntelAtom => {
                let wanted = attr_as_core_attrs(*attr);
                if topology.ncores_with_attr(wanted, None) == 0 {
                    return Err(SubsetError::AttrNotObserved {
                        value: if *attr == SubsetAttr::IntelCore {
                            "intel_core".to_string()
                        } else {
                            "intel_atom".to_string()
                        },
                    });
                }
            }
        }

        if !request.absolute {
            let core_level = topology
                .level_of(LayerKind::Core)
                .expect("attributes are only validated at the core layer");
            if core_level > 0 {
                let max_count =
                    topology.ncores_with_attr(attr_as_core_attrs(*attr), Some(core_level - 1));
                if let Some(count) = count {
                    if max_count == 0 || count + offset > max_count {
                        return Err(SubsetError::TooManyUnits {
                            layer: kind,
                            available: max_count,
                            requested: count + offset,
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

/// Applies the subset to the topology. On success the topology has been
/// restricted and the returned mask is the surviving processor set; on
/// error the topology is unchanged and the caller decides whether the
/// failure is a warning or fatal.
pub(crate) fn apply(
    topology: &mut Topology,
    request: &SubsetRequest,
) -> Result<ProcMask, SubsetError> {
    let items = validate(topology, request)?;

    let depth = topology.depth();
    let core_level = topology.level_of(LayerKind::Core);
    let using_attrs = items.iter().any(|item| !item.attrs.is_empty());
    let is_absolute = request.absolute;

    let targeted: Vec<bool> = (0..depth)
        .map(|level| !is_absolute || items.iter().any(|item| item.level == level))
        .collect();

    let mut prev_sub_ids = vec![u32::MAX; depth];
    let mut abs_sub_ids = vec![-1_i64; depth];
    let mut type_sub_ids: HashMap<Option<CoreType>, i64> = HashMap::new();
    let mut eff_sub_ids: HashMap<Option<u8>, i64> = HashMap::new();

    let mut filter = topology.full_mask();
    let mut num_filtered = 0_usize;

    for thread in topology.threads() {
        // Maintain the absolute and per-attribute running sub-IDs.
        if is_absolute || using_attrs {
            for level in 0..depth {
                if thread.sub_ids[level] != prev_sub_ids[level] {
                    let mut found_targeted = false;
                    for j in level..depth {
                        if !targeted[j] {
                            continue;
                        }
                        let is_core = Some(j) == core_level;
                        if found_targeted {
                            abs_sub_ids[j] = 0;
                            if is_core {
                                type_sub_ids.insert(thread.attrs.core_type.value(), 0);
                                eff_sub_ids.insert(thread.attrs.core_eff.value(), 0);
                            }
                        } else {
                            found_targeted = true;
                            abs_sub_ids[j] += 1;
                            if is_core {
                                *type_sub_ids
                                    .entry(thread.attrs.core_type.value())
                                    .or_insert(-1) += 1;
                                *eff_sub_ids
                                    .entry(thread.attrs.core_eff.value())
                                    .or_insert(-1) += 1;
                            }
                        }
                    }
                    break;
                }
            }
            prev_sub_ids.copy_from_slice(&thread.sub_ids);
        }

        let mut should_filter = false;
        for item in &items {
            let level = item.level;

            if !item.attrs.is_empty() && Some(level) == core_level {
                let Some(matched) = item
                    .attrs
                    .iter()
                    .find(|attr| thread_matches_attr(thread.attrs, **attr))
                else {
                    // This thread's core attribute was not requested at all.
                    should_filter = true;
                    break;
                };

                let sub_id = match matched {
                    SubsetAttr::IntelCore | SubsetAttr::IntelAtom => *type_sub_ids
                        .get(&thread.attrs.core_type.value())
                        .unwrap_or(&-1),
                    SubsetAttr::Eff(_) => *eff_sub_ids
                        .get(&thread.attrs.core_eff.value())
                        .unwrap_or(&-1),
                };

                if sub_id < i64::from(item.offset)
                    || item.count.is_some_and(|count| {
                        sub_id >= i64::from(item.offset) + i64::from(count)
                    })
                {
                    should_filter = true;
                    break;
                }
            } else {
                let sub_id = if is_absolute {
                    abs_sub_ids[level]
                } else {
                    i64::from(thread.sub_ids[level])
                };

                if thread.ids[level] == LayerId::Unknown
                    || sub_id < i64::from(item.offset)
                    || item.count.is_some_and(|count| {
                        sub_id >= i64::from(item.offset) + i64::from(count)
                    })
                {
                    should_filter = true;
                    break;
                }
            }
        }

        if should_filter {
            filter.clear(thread.os_id);
            num_filtered += 1;
        }
    }

    if num_filtered == topology.num_hw_threads() {
        return Err(SubsetError::AllFiltered);
    }

    topology.restrict_to_mask(&filter);
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use new_zealand::nz;
    use crate::Topology;

    fn subset(text: &str) -> SubsetRequest {
        SubsetRequest::parse(text).unwrap()
    }

    fn hybrid() -> Topology {
        crate::test_topologies::hybrid_1x6p8e()
    }

    #[test]
    fn canonical_string_round_trips() {
        for text in ["2sockets,4cores", ":1sockets,2threads", "*cores:intel_atom"] {
            let request = subset(text);
            let canonical = request.to_canonical_string();
            assert_eq!(SubsetRequest::parse(&canonical).unwrap(), request);
            assert_eq!(
                SubsetRequest::parse(&canonical)
                    .unwrap()
                    .to_canonical_string(),
                canonical
            );
        }
    }

    #[test]
    fn second_socket_first_four_cores() {
        let mut topology = Topology::from_uniform_counts(nz!(2), nz!(8), nz!(2));
        let request = subset("1@1sockets,4cores");

        let mask = apply(&mut topology, &request).unwrap();

        // Socket 1 holds OS IDs 16..=31; its first four cores keep their
        // two SMT threads each.
        assert_eq!(mask, ProcMask::from_ids(16..24));
        assert_eq!(topology.num_hw_threads(), 8);
        assert!(topology.is_uniform());
        assert_eq!(topology.counters().num_packages, 1);
        assert_eq!(topology.ratio_at(1), 4);
    }

    #[test]
    fn use_all_keeps_every_unit() {
        let mut topology = Topology::from_uniform_counts(nz!(2), nz!(4), nz!(2));
        let request = subset("*sockets,2cores");

        apply(&mut topology, &request).unwrap();

        // Two cores of each socket survive.
        assert_eq!(topology.num_hw_threads(), 8);
        assert_eq!(topology.counters().num_packages, 2);
        assert_eq!(topology.counters().cores_per_pkg, 2);
    }

    #[test]
    fn unknown_layer_is_rejected() {
        let mut topology = Topology::from_uniform_counts(nz!(2), nz!(4), nz!(2));
        let error = apply(&mut topology, &subset("2numa_domains")).unwrap_err();
        assert_eq!(error, SubsetError::LayerNotDetected(LayerKind::Numa));
        assert_eq!(topology.num_hw_threads(), 16);
    }

    #[test]
    fn equivalent_layers_are_rejected() {
        // In a socket/core/thread machine the die aliases to the socket.
        let mut threads = Vec::new();
        for package in 0..2_u32 {
            for core in 0..2_u32 {
                let os_id = package * 2 + core;
                threads.push(crate::HwThread::new(
                    os_id,
                    os_id as usize,
                    vec![
                        LayerId::Id(package),
                        LayerId::Id(0),
                        LayerId::Id(core),
                        LayerId::Id(0),
                    ],
                ));
            }
        }
        let mut topology = Topology::build(
            vec![
                LayerKind::Socket,
                LayerKind::Die,
                LayerKind::Core,
                LayerKind::Thread,
            ],
            threads,
        );

        let error = apply(&mut topology, &subset("1sockets,1dice,2cores")).unwrap_err();
        assert!(matches!(error, SubsetError::EquivalentLayers { .. }));
    }

    #[test]
    fn too_many_units_is_rejected() {
        let mut topology = Topology::from_uniform_counts(nz!(2), nz!(4), nz!(2));
        let error = apply(&mut topology, &subset("3sockets")).unwrap_err();
        assert_eq!(
            error,
            SubsetError::TooManyUnits {
                layer: LayerKind::Socket,
                available: 2,
                requested: 3,
            }
        );
    }

    #[test]
    fn all_filtered_is_rejected_and_topology_unchanged() {
        let mut topology = Topology::from_uniform_counts(nz!(1), nz!(4), nz!(1));
        // Offset beyond the machine in absolute mode filters everything.
        let error = apply(&mut topology, &subset(":4@4threads")).unwrap_err();
        assert_eq!(error, SubsetError::AllFiltered);
        assert_eq!(topology.num_hw_threads(), 4);
    }

    #[test]
    fn attrs_on_non_hybrid_single_attr_is_dropped() {
        let mut topology = Topology::from_uniform_counts(nz!(1), nz!(4), nz!(2));
        // The attribute is ignored; the core count still applies.
        apply(&mut topology, &subset("2cores:intel_core")).unwrap();
        assert_eq!(topology.counters().num_cores, 2);
    }

    #[test]
    fn mixed_attr_kinds_are_rejected() {
        let mut topology = hybrid();
        let error = apply(&mut topology, &subset("2cores:intel_core,eff1")).unwrap_err();
        assert_eq!(error, SubsetError::IncompatibleAttrs);
    }

    #[test]
    fn unobserved_attr_value_is_rejected() {
        let mut topology = hybrid();
        let error = apply(&mut topology, &subset("2cores:eff7")).unwrap_err();
        assert_eq!(
            error,
            SubsetError::AttrNotObserved {
                value: "eff7".to_string()
            }
        );
    }

    #[test]
    fn core_type_subset_keeps_only_that_type() {
        let mut topology = hybrid();
        apply(&mut topology, &subset("*cores:intel_atom")).unwrap();

        // Only the eight efficiency cores remain.
        assert_eq!(topology.num_hw_threads(), 8);
        assert_eq!(topology.counters().num_cores, 8);
        assert!(!topology.threads().iter().any(|thread| {
            thread.attrs.core_type == AttrValue::Value(CoreType::Core)
        }));
    }

    #[test]
    fn efficiency_subset_with_count() {
        let mut topology = hybrid();
        // First four of the six high-efficiency cores.
        apply(&mut topology, &subset("4cores:eff1")).unwrap();

        assert_eq!(topology.counters().num_cores, 4);
        assert_eq!(topology.num_hw_threads(), 8);
    }

    #[test]
    fn relabeling_commutes_with_subset() {
        // Applying the same subset to a topology with relabeled (but
        // order-preserving) ids keeps the same OS-ID selection.
        let build = |id_scale: u32| {
            let mut threads = Vec::new();
            for package in 0..2_u32 {
                for core in 0..2_u32 {
                    for smt in 0..2_u32 {
                        let os_id = package * 4 + core * 2 + smt;
                        threads.push(crate::HwThread::new(
                            os_id,
                            os_id as usize,
                            vec![
                                LayerId::Id(package * id_scale),
                                LayerId::Id(core * id_scale),
                                LayerId::Id(smt * id_scale),
                            ],
                        ));
                    }
                }
            }
            Topology::build(
                vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread],
                threads,
            )
        };

        let request = subset("1@1sockets,1cores");

        let mut plain = build(1);
        let mut scaled = build(7);
        let plain_mask = apply(&mut plain, &request).unwrap();
        let scaled_mask = apply(&mut scaled, &request).unwrap();

        assert_eq!(plain_mask, scaled_mask);
    }
}
