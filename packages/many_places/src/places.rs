//! Granularity resolution and place-list construction: turns a canonical
//! topology plus an affinity configuration into the ordered list of places
//! (affinity masks) that threads will be bound to.

use placelist::{Place, PlaceBody, ProcItem, Subplace};

use crate::balanced::BalancedAssigner;
use crate::topology::Closeness;
use crate::{
    AffinityConfig, AffinityError, AffinityType, CoreAttrs, LayerKind, PlaceIds, ProcMask,
    ProcessorId, Topology,
};

/// Resolves the configuration's granularity request against the topology,
/// filling in `gran_levels`.
///
/// Unresolvable layers fall back through core, thread and socket with a
/// warning. When the machine spans several processor groups and the request
/// is coarser than a group, the granularity clamps to the group because
/// threads cannot migrate across groups.
pub(crate) fn set_granularity(topology: &Topology, config: &mut AffinityConfig) {
    if !topology.is_hybrid()
        && (config.core_attr_gran.is_known()
            || config.flags.core_types_gran
            || config.flags.core_effs_gran)
    {
        if config.flags.warnings {
            tracing::warn!("hybrid-attribute granularity on a non-hybrid machine; using cores");
        }
        config.gran = Some(LayerKind::Core);
        config.core_attr_gran = CoreAttrs::UNKNOWN;
        config.flags.core_types_gran = false;
        config.flags.core_effs_gran = false;
    }

    let requested = config.gran;
    let mut gran_kind = requested.and_then(|kind| topology.equivalent().get(kind));

    if gran_kind.is_none() {
        for fallback in [LayerKind::Core, LayerKind::Thread, LayerKind::Socket] {
            if topology.equivalent().get(fallback).is_some() {
                gran_kind = Some(fallback);
                break;
            }
        }
        let resolved = gran_kind.expect("socket or core always exists after canonicalization");
        if requested.is_some() && config.flags.warnings {
            tracing::warn!(
                requested = %requested.expect("checked above"),
                using = %resolved,
                "granularity layer not detected on this machine"
            );
        }
    }

    let mut gran_kind = gran_kind.expect("resolved or defaulted above");

    // Threads cannot span processor groups, so a coarser granularity than
    // the group layer must clamp down to it.
    if let (Some(gran_level), Some(group_level)) = (
        topology.level_of(gran_kind),
        topology.level_of(LayerKind::ProcGroup),
    ) {
        if topology.equivalent().is_real(LayerKind::ProcGroup) && gran_level < group_level {
            if config.flags.warnings {
                tracing::warn!(
                    requested = %gran_kind,
                    "granularity is coarser than a processor group; using proc_group"
                );
            }
            gran_kind = LayerKind::ProcGroup;
        }
    }

    config.gran = Some(gran_kind);
    let gran_level = topology
        .level_of(gran_kind)
        .expect("granularity kind was resolved against this topology");
    config.gran_levels = Some(topology.depth() - 1 - gran_level);
}

fn closeness_of(config: &AffinityConfig) -> Closeness {
    Closeness {
        gran_levels: config.gran_levels.unwrap_or(0),
        by_core_type: config.flags.core_types_gran,
        by_core_eff: config.flags.core_effs_gran,
    }
}

/// Builds the OS-ID mask table: for every OS processor ID, the mask of all
/// processors within the same granularity group. Marks group leaders on the
/// topology and returns the number of distinct groups.
///
/// `find_next` selects which thread indices participate; skipped threads
/// get no mask of their own but may still appear inside other masks.
fn create_os_id_masks(
    topology: &mut Topology,
    config: &mut AffinityConfig,
    find_next: impl Fn(Option<usize>) -> Option<usize>,
) -> usize {
    let Some(first) = find_next(None) else {
        return 0;
    };

    let criteria = closeness_of(config);
    let num_os_id_masks = topology.max_os_id() as usize + 1;
    config.os_id_masks = vec![ProcMask::new(); num_os_id_masks];

    if config.flags.verbose && criteria.gran_levels > 0 {
        tracing::debug!(
            gran_levels = criteria.gran_levels,
            "threads may migrate within their granularity group"
        );
    }
    if criteria.gran_levels >= topology.depth() && config.flags.warnings {
        tracing::warn!("granularity covers the whole machine; threads may migrate anywhere");
    }

    let mut unique = 0_usize;
    let mut group_mask = ProcMask::new();
    let mut leader = first;
    let mut group_members = vec![first];
    group_mask.set(topology.threads()[first].os_id);

    let mut flush = |topology: &mut Topology,
                     config: &mut AffinityConfig,
                     members: &[usize],
                     mask: &ProcMask,
                     leader: usize| {
        for &member in members {
            let os_id = topology.threads()[member].os_id;
            config.os_id_masks[os_id as usize].copy_from(mask);
        }
        set_leader(topology, leader);
    };

    let mut current = find_next(Some(first));
    while let Some(index) = current {
        if topology.is_close(leader, index, criteria) {
            group_mask.set(topology.threads()[index].os_id);
            group_members.push(index);
        } else {
            flush(topology, config, &group_members, &group_mask, leader);
            unique += 1;

            leader = index;
            group_members = vec![index];
            group_mask = ProcMask::new();
            group_mask.set(topology.threads()[index].os_id);
        }
        current = find_next(Some(index));
    }

    flush(topology, config, &group_members, &group_mask, leader);
    unique + 1
}

fn set_leader(topology: &mut Topology, index: usize) {
    topology.threads_mut()[index].leader = true;
}

fn clear_leaders(topology: &mut Topology) {
    for thread in topology.threads_mut() {
        thread.leader = false;
    }
}

/// The three-stage mask-table construction: by granularity attribute, then
/// by granularity level with unknown-ID skipping, then plain incremental.
fn build_os_id_masks(topology: &mut Topology, config: &mut AffinityConfig) -> usize {
    let depth = topology.depth();
    let num_threads = topology.num_hw_threads();
    clear_leaders(topology);

    if config.core_attr_gran.is_known() {
        let wanted = config.core_attr_gran;
        let attrs: Vec<CoreAttrs> = topology.threads().iter().map(|thread| thread.attrs).collect();
        let unique = create_os_id_masks(topology, config, |index| {
            let start = index.map_or(0, |index| index + 1);
            (start..num_threads).find(|&candidate| attrs[candidate].contains(wanted))
        });
        if unique > 0 {
            return unique;
        }
        if config.flags.warnings {
            tracing::warn!("no cores match the granularity attribute; ignoring it");
        }
    }

    let gran_levels = config.gran_levels.unwrap_or(0);
    if gran_levels < depth {
        let gran_level = depth - 1 - gran_levels;
        let known: Vec<bool> = topology
            .threads()
            .iter()
            .map(|thread| thread.ids[gran_level].is_known())
            .collect();
        let unique = create_os_id_masks(topology, config, |index| {
            let start = index.map_or(0, |index| index + 1);
            (start..num_threads).find(|&candidate| known[candidate])
        });
        if unique > 0 {
            return unique;
        }
    }

    create_os_id_masks(topology, config, |index| {
        let start = index.map_or(0, |index| index + 1);
        (start < num_threads).then_some(start)
    })
}

/// A single place covering the whole process mask, for the `none` policy
/// and every degradation path.
pub(crate) fn create_none_places(config: &mut AffinityConfig, full_mask: &ProcMask) {
    config.masks = vec![full_mask.clone()];
    config.place_ids = vec![PlaceIds::UNKNOWN];
    config.place_attrs = vec![CoreAttrs::UNKNOWN];
    config.flags.initialized = true;
}

/// Initializes a configuration against the topology: resolves granularity,
/// builds the OS-ID mask table, generates the place list per the policy and
/// attaches per-place topology summaries.
///
/// Returns the balanced assigner when the balanced policy needs one.
pub(crate) fn initialize_places(
    topology: &mut Topology,
    config: &mut AffinityConfig,
    full_mask: &mut ProcMask,
    is_hidden_helper: bool,
) -> Result<Option<BalancedAssigner>, AffinityError> {
    if matches!(config.kind, AffinityType::None | AffinityType::Disabled) {
        create_none_places(config, full_mask);
        return Ok(None);
    }

    set_granularity(topology, config);
    let num_unique = build_os_id_masks(topology, config);
    let depth = topology.depth();
    let avail_proc = topology.num_hw_threads();

    let mut assigner = None;

    match config.kind {
        AffinityType::Explicit => {
            config.place_offset = config.offset;
            let proclist = config.proclist.clone().unwrap_or_default();
            if config.flags.omp_places && !is_hidden_helper {
                process_placelist(topology, config, full_mask, &proclist)?;
            } else {
                process_proclist(config, &proclist)?;
            }
        }

        AffinityType::Logical
        | AffinityType::Physical
        | AffinityType::Scatter
        | AffinityType::Compact
        | AffinityType::Balanced => {
            let threads_per_core = topology.counters().threads_per_core;
            let compact = match config.kind {
                AffinityType::Logical => 0,
                AffinityType::Physical => {
                    if threads_per_core > 1 && depth > 1 {
                        1
                    } else {
                        0
                    }
                }
                AffinityType::Scatter => {
                    let requested = config.compact as usize;
                    if requested >= depth {
                        0
                    } else {
                        depth - 1 - requested
                    }
                }
                AffinityType::Compact | AffinityType::Balanced => {
                    (config.compact as usize).min(depth - 1)
                }
                _ => unreachable!("outer match covers the sorted policies"),
            };

            config.place_offset = match config.kind {
                AffinityType::Logical | AffinityType::Physical if config.offset > 0 => {
                    threads_per_core * config.offset
                        % u32::try_from(avail_proc).expect("processor counts fit in u32")
                }
                _ => config.offset,
            };

            if config.kind == AffinityType::Balanced {
                if depth <= 1 || is_hidden_helper {
                    if config.flags.warnings {
                        tracing::warn!("balanced affinity is not available here; using none");
                    }
                    config.kind = AffinityType::None;
                    create_none_places(config, full_mask);
                    return Ok(None);
                }
                if !topology.is_uniform() {
                    match BalancedAssigner::for_nonuniform(topology) {
                        Some(built) => assigner = Some(built),
                        None => {
                            if config.flags.warnings {
                                tracing::warn!(
                                    "balanced affinity is not available on this machine; using none"
                                );
                            }
                            config.kind = AffinityType::None;
                            create_none_places(config, full_mask);
                            return Ok(None);
                        }
                    }
                }
            }

            generate_sorted_places(topology, config, num_unique, compact);
        }

        AffinityType::None | AffinityType::Disabled => {
            unreachable!("handled before granularity resolution")
        }
    }

    if config.masks.is_empty() {
        if config.flags.warnings {
            tracing::warn!("no valid processors in the place specification; using none");
        }
        config.kind = AffinityType::None;
        create_none_places(config, full_mask);
        return Ok(None);
    }

    // The places may cover less than the process mask; narrow it so
    // subsequent queries agree with what threads can actually use.
    let mut union = ProcMask::new();
    for mask in &config.masks {
        union.union_with(mask);
    }
    if !full_mask.is_subset_of(&union) {
        full_mask.intersect_with(&union);
        topology.restrict_to_mask(full_mask);
        if config.flags.verbose {
            tracing::debug!(summary = %topology.summary(), "places narrowed the process mask");
        }
    }

    attach_place_summaries(topology, config);
    config.flags.initialized = true;
    Ok(assigner)
}

/// The sorted-policy place generator: sort the threads by the compact bias,
/// emit one place per leader (or per thread with `dups`), then restore the
/// canonical order.
fn generate_sorted_places(
    topology: &mut Topology,
    config: &mut AffinityConfig,
    num_unique: usize,
    compact: usize,
) {
    let mut num_masks = if config.flags.dups {
        topology.num_hw_threads()
    } else {
        num_unique
    };
    if let Some(cap) = config.num_places_cap {
        num_masks = num_masks.min(cap as usize);
    }

    topology.sort_by_compact(compact);

    let mut masks = Vec::with_capacity(num_masks);
    for index in 0..topology.num_hw_threads() {
        let thread = &topology.threads()[index];
        if !config.flags.dups && !thread.leader {
            continue;
        }
        let source = &config.os_id_masks[thread.os_id as usize];
        if source.is_empty() {
            continue;
        }
        debug_assert!(source.test(thread.os_id));
        masks.push(source.clone());
        if masks.len() >= num_masks {
            break;
        }
    }

    topology.sort_by_ids();
    config.masks = masks;
}

/// Interprets an explicit proc list: each ID (or strided-range element)
/// contributes the granularity mask of that processor as one place; a
/// `{...}` set contributes the union of its members as one place.
fn process_proclist(config: &mut AffinityConfig, proclist: &str) -> Result<(), AffinityError> {
    let items = placelist::parse_proclist(proclist)?;
    let mut masks = Vec::new();

    for item in &items {
        match item {
            ProcItem::Single(_) | ProcItem::Range { .. } => {
                for os_id in item.iter_ids() {
                    if let Some(mask) = valid_os_id_mask(config, os_id) {
                        masks.push(mask.clone());
                    } else if config.flags.warnings {
                        tracing::warn!(os_id, "ignoring invalid processor ID in proc list");
                    }
                }
            }
            ProcItem::Set(ids) => {
                let mut union = ProcMask::new();
                let mut set_size = 0;
                for &os_id in ids {
                    if let Some(mask) = valid_os_id_mask(config, os_id) {
                        union.union_with(mask);
                        set_size += 1;
                    } else if config.flags.warnings {
                        tracing::warn!(os_id, "ignoring invalid processor ID in proc list");
                    }
                }
                if set_size > 0 {
                    masks.push(union);
                }
            }
        }
    }

    config.masks = masks;
    Ok(())
}

fn valid_os_id_mask(config: &AffinityConfig, os_id: ProcessorId) -> Option<&ProcMask> {
    config
        .os_id_masks
        .get(os_id as usize)
        .filter(|mask| mask.test(os_id))
}

/// Interprets an OMP_PLACES-style place list against the topology.
fn process_placelist(
    topology: &Topology,
    config: &mut AffinityConfig,
    full_mask: &ProcMask,
    placelist_text: &str,
) -> Result<(), AffinityError> {
    let places = placelist::parse_places(placelist_text)?;
    let max_os_id = config.os_id_masks.len().saturating_sub(1);
    let mut masks: Vec<ProcMask> = Vec::new();

    for place in &places {
        match &place.body {
            PlaceBody::Abstract { layer, count } => {
                expand_abstract_place(topology, config, place, *layer, *count, &mut masks);
            }
            body => {
                let mut base = ProcMask::new();
                let mut set_size = 0_usize;
                build_place_body(config, full_mask, max_os_id, body, &mut base, &mut set_size);

                if place.count.is_none() {
                    if set_size > 0 {
                        masks.push(base);
                    }
                    continue;
                }

                let count = place.count.unwrap_or(1) as usize;
                let stride = i64::from(place.stride.unwrap_or(1));
                generate_shifted_places(
                    config,
                    full_mask,
                    max_os_id,
                    base,
                    set_size,
                    count,
                    stride,
                    &mut masks,
                );
            }
        }
    }

    config.masks = masks;
    Ok(())
}

/// Generates `count` places from a base place, each shifted element-wise by
/// `stride` OS IDs from the previous one. Elements falling outside the
/// process mask are dropped silently, except during the last generated
/// place, where a warning is emitted.
#[expect(
    clippy::too_many_arguments,
    reason = "a direct transcription of the generative clause inputs"
)]
fn generate_shifted_places(
    config: &AffinityConfig,
    full_mask: &ProcMask,
    max_os_id: usize,
    base: ProcMask,
    base_size: usize,
    count: usize,
    stride: i64,
    masks: &mut Vec<ProcMask>,
) {
    let mut current = base;
    let mut set_size = base_size;

    for generation in 0..count {
        if set_size == 0 {
            break;
        }
        masks.push(current.clone());

        let previous = std::mem::take(&mut current);
        set_size = 0;
        for os_id in previous.iter() {
            let target = i64::from(os_id) + stride;
            let valid = target >= 0
                && target <= i64::try_from(max_os_id).unwrap_or(i64::MAX)
                && full_mask.test(os_id)
                && u32::try_from(target)
                    .ok()
                    .and_then(|target| valid_os_id_mask(config, target))
                    .is_some();
            if valid {
                current.set(u32::try_from(target).expect("validated above"));
                set_size += 1;
            } else if generation == count - 1 && config.flags.warnings {
                tracing::warn!(
                    os_id = os_id as i64 + stride,
                    "place stride leaves the processor set"
                );
            }
        }
    }
}

/// Builds the mask of a non-abstract place body.
fn build_place_body(
    config: &AffinityConfig,
    full_mask: &ProcMask,
    max_os_id: usize,
    body: &PlaceBody,
    mask: &mut ProcMask,
    set_size: &mut usize,
) {
    match body {
        PlaceBody::ProcId(os_id) => {
            if let Some(entry) = valid_os_id_mask(config, *os_id) {
                mask.union_with(entry);
                *set_size += 1;
            } else if config.flags.warnings {
                tracing::warn!(os_id, "ignoring invalid processor ID in place list");
            }
        }
        PlaceBody::Set(subplaces) => {
            for subplace in subplaces {
                build_subplace(config, subplace, mask, set_size);
            }
        }
        PlaceBody::Complement(inner) => {
            build_place_body(config, full_mask, max_os_id, inner, mask, set_size);
            mask.complement_up_to(u32::try_from(max_os_id).unwrap_or(u32::MAX));
            mask.intersect_with(full_mask);
            *set_size = mask.count();
        }
        PlaceBody::Abstract { .. } => {
            unreachable!("abstract places are expanded by the caller")
        }
    }
}

fn build_subplace(
    config: &AffinityConfig,
    subplace: &Subplace,
    mask: &mut ProcMask,
    set_size: &mut usize,
) {
    let count = subplace.count.unwrap_or(1);
    let stride = i64::from(subplace.stride.unwrap_or(1));
    let mut current = i64::from(subplace.start);

    for _ in 0..count {
        let valid = u32::try_from(current)
            .ok()
            .and_then(|os_id| valid_os_id_mask(config, os_id));
        if let Some(entry) = valid {
            mask.union_with(entry);
            *set_size += 1;
            current += stride;
        } else {
            if config.flags.warnings {
                tracing::warn!(os_id = current, "ignoring invalid processor ID in place list");
            }
            break;
        }
    }
}

/// Expands an abstract place name: the units of that granularity in
/// canonical order (capped to the first `cap` when given), either all as
/// places or as a base place with stride-shifted copies in unit space.
fn expand_abstract_place(
    topology: &Topology,
    config: &AffinityConfig,
    place: &Place,
    layer: placelist::AbstractPlaces,
    cap: Option<u32>,
    masks: &mut Vec<ProcMask>,
) {
    let kind = match layer {
        placelist::AbstractPlaces::Threads => LayerKind::Thread,
        placelist::AbstractPlaces::Cores => LayerKind::Core,
        placelist::AbstractPlaces::Sockets => LayerKind::Socket,
        placelist::AbstractPlaces::NumaDomains => LayerKind::Numa,
        placelist::AbstractPlaces::LlCaches => LayerKind::Llc,
    };

    let Some(level) = topology.level_of(kind) else {
        if config.flags.warnings {
            tracing::warn!(layer = %kind, "abstract place layer not detected; skipping");
        }
        return;
    };

    // One mask per distinct unit at this level, in canonical thread order.
    let mut units: Vec<ProcMask> = Vec::new();
    let mut previous_prefix: Option<Vec<crate::LayerId>> = None;
    for thread in topology.threads() {
        let prefix: Vec<crate::LayerId> = thread.ids[..=level].to_vec();
        if previous_prefix.as_ref() != Some(&prefix) {
            units.push(ProcMask::new());
            previous_prefix = Some(prefix);
        }
        units
            .last_mut()
            .expect("a unit was pushed for this prefix")
            .set(thread.os_id);
    }

    if let Some(cap) = cap {
        units.truncate(cap as usize);
    }

    let Some(count) = place.count else {
        masks.extend(units);
        return;
    };

    let stride = i64::from(place.stride.unwrap_or(1));
    let mut unit_index = 0_i64;
    for generation in 0..count {
        let valid = usize::try_from(unit_index)
            .ok()
            .is_some_and(|index| index < units.len());
        if valid {
            masks.push(units[usize::try_from(unit_index).expect("validated above")].clone());
        } else if generation == count - 1 && config.flags.warnings {
            tracing::warn!(unit = unit_index, "place stride leaves the machine");
        }
        unit_index += stride;
    }
}

/// Attaches the per-place topology summary (aggregated layer IDs and core
/// attributes) so a bound thread can answer "which socket am I on" in O(1).
fn attach_place_summaries(topology: &Topology, config: &mut AffinityConfig) {
    let os_map = topology.os_id_to_thread_map();
    config.place_ids = Vec::with_capacity(config.masks.len());
    config.place_attrs = Vec::with_capacity(config.masks.len());

    for mask in &config.masks {
        let mut ids = PlaceIds::UNKNOWN;
        let mut attrs = CoreAttrs::UNKNOWN;

        for os_id in mask.iter() {
            let Some(&Some(thread_index)) = os_map.get(os_id as usize) else {
                continue;
            };
            let thread = &topology.threads()[thread_index];
            for (level, kind) in topology.types().iter().enumerate() {
                ids.aggregate(*kind, thread.ids[level]);
            }
            attrs.core_type.aggregate(thread.attrs.core_type);
            attrs.core_eff.aggregate(thread.attrs.core_eff);
        }

        config.place_ids.push(ids);
        config.place_attrs.push(attrs);
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZero;

    use super::*;
    use crate::{AttrValue, LayerId};

    fn uniform(packages: u32, cores: u32, smt: u32) -> Topology {
        let nz = |value| NonZero::new(value).expect("test counts are non-zero");
        Topology::from_uniform_counts(nz(packages), nz(cores), nz(smt))
    }

    fn init(
        topology: &mut Topology,
        config: &mut AffinityConfig,
    ) -> Option<BalancedAssigner> {
        let mut full_mask = topology.full_mask();
        initialize_places(topology, config, &mut full_mask, false).unwrap()
    }

    #[test]
    fn granularity_defaults_to_core() {
        let topology = uniform(2, 4, 2);
        let mut config = AffinityConfig::default();

        set_granularity(&topology, &mut config);
        assert_eq!(config.gran, Some(LayerKind::Core));
        assert_eq!(config.gran_levels, Some(1));
    }

    #[test]
    fn granularity_unknown_layer_falls_back() {
        let topology = uniform(2, 4, 2);
        let mut config = AffinityConfig {
            gran: Some(LayerKind::Numa),
            ..AffinityConfig::default()
        };

        set_granularity(&topology, &mut config);
        assert_eq!(config.gran, Some(LayerKind::Core));
    }

    #[test]
    fn granularity_attribute_on_non_hybrid_resets() {
        let topology = uniform(1, 4, 2);
        let mut config = AffinityConfig {
            gran: Some(LayerKind::Thread),
            ..AffinityConfig::default()
        };
        config.flags.core_types_gran = true;

        set_granularity(&topology, &mut config);
        assert_eq!(config.gran, Some(LayerKind::Core));
        assert!(!config.flags.core_types_gran);
    }

    #[test]
    fn compact_thread_granularity_gives_one_place_per_processor() {
        // Uniform 2x8x2, policy compact, granularity thread.
        let mut topology = uniform(2, 8, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Compact,
            gran: Some(LayerKind::Thread),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);

        assert_eq!(config.num_masks(), 32);
        for (index, mask) in config.masks().iter().enumerate() {
            assert_eq!(
                mask,
                &ProcMask::from_ids([u32::try_from(index).unwrap()]),
                "place {index} should be exactly its own processor"
            );
        }
        assert!(topology.threads().iter().all(|thread| thread.leader));
        assert_eq!(
            topology.summary(),
            "2 sockets x 8 cores/socket x 2 threads/core (16 total cores)"
        );
    }

    #[test]
    fn core_granularity_pairs_smt_siblings() {
        let mut topology = uniform(1, 4, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Compact,
            gran: Some(LayerKind::Core),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);

        assert_eq!(config.num_masks(), 4);
        assert_eq!(config.masks()[0], ProcMask::from_ids([0, 1]));
        assert_eq!(config.masks()[3], ProcMask::from_ids([6, 7]));

        // Every processor's granularity mask is its core pair.
        assert_eq!(config.os_id_mask(3), Some(&ProcMask::from_ids([2, 3])));
    }

    #[test]
    fn scatter_hybrid_orders_performance_cores_first() {
        // Hybrid 6 P-cores (SMT) + 8 E-cores, scatter at core
        // granularity: 14 places, P-cores before E-cores.
        let mut topology = crate::test_topologies::hybrid_1x6p8e();
        let mut config = AffinityConfig {
            kind: AffinityType::Scatter,
            gran: Some(LayerKind::Core),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);

        assert_eq!(config.num_masks(), 14);

        // Scatter on a depth-3 machine alternates over the outer layers,
        // but with one socket the walk degenerates to core order, which on
        // a hybrid machine is highest-efficiency-first.
        let first = &config.masks()[0];
        assert_eq!(first, &ProcMask::from_ids([0, 1]));

        let p_places = config
            .masks()
            .iter()
            .take(6)
            .all(|mask| mask.first().is_some_and(|os_id| os_id < 12));
        assert!(p_places, "performance cores come before efficiency cores");

        for mask in config.masks().iter().skip(6) {
            assert!(mask.first().is_some_and(|os_id| os_id >= 12));
            assert_eq!(mask.count(), 1);
        }

        // SMT siblings stay together within a P-core place.
        for mask in config.masks().iter().take(6) {
            assert_eq!(mask.count(), 2);
        }
    }

    #[test]
    fn scatter_alternates_between_sockets() {
        let mut topology = uniform(2, 2, 1);
        let mut config = AffinityConfig {
            kind: AffinityType::Scatter,
            gran: Some(LayerKind::Thread),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);

        let firsts: Vec<ProcessorId> = config
            .masks()
            .iter()
            .map(|mask| mask.first().unwrap())
            .collect();
        // Sockets are {0,1} and {2,3}; scatter alternates between them.
        assert_eq!(firsts, vec![0, 2, 1, 3]);
    }

    #[test]
    fn explicit_proclist_scenario() {
        // Proclist {0,2,4},{1,3,5},6-11:2 gives five places.
        let mut topology = uniform(1, 6, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Explicit,
            gran: Some(LayerKind::Thread),
            proclist: Some("{0,2,4},{1,3,5},6-11:2".to_string()),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);

        assert_eq!(config.num_masks(), 5);
        assert_eq!(config.masks()[0], ProcMask::from_ids([0, 2, 4]));
        assert_eq!(config.masks()[1], ProcMask::from_ids([1, 3, 5]));
        assert_eq!(config.masks()[2], ProcMask::from_ids([6]));
        assert_eq!(config.masks()[3], ProcMask::from_ids([8]));
        assert_eq!(config.masks()[4], ProcMask::from_ids([10]));
    }

    #[test]
    fn proclist_out_of_range_ids_are_skipped() {
        let mut topology = uniform(1, 2, 1);
        let mut config = AffinityConfig {
            kind: AffinityType::Explicit,
            gran: Some(LayerKind::Thread),
            proclist: Some("0,1,7".to_string()),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);
        assert_eq!(config.num_masks(), 2);
    }

    #[test]
    fn proclist_with_no_valid_ids_degrades_to_none() {
        let mut topology = uniform(1, 2, 1);
        let mut config = AffinityConfig {
            kind: AffinityType::Explicit,
            gran: Some(LayerKind::Thread),
            proclist: Some("9,10".to_string()),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);

        assert_eq!(config.kind, AffinityType::None);
        assert_eq!(config.num_masks(), 1);
        assert_eq!(config.masks()[0], ProcMask::from_ids(0..2));
    }

    #[test]
    fn omp_places_abstract_threads_scenario() {
        // OMP_PLACES=threads(8):4:2 on an ordered thread list.
        let mut topology = uniform(1, 8, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Explicit,
            gran: Some(LayerKind::Thread),
            proclist: Some("threads(8):4:2".to_string()),
            ..AffinityConfig::default()
        };
        config.flags.omp_places = true;

        init(&mut topology, &mut config);

        assert_eq!(config.num_masks(), 4);
        assert_eq!(config.masks()[0], ProcMask::from_ids([0]));
        assert_eq!(config.masks()[1], ProcMask::from_ids([2]));
        assert_eq!(config.masks()[2], ProcMask::from_ids([4]));
        assert_eq!(config.masks()[3], ProcMask::from_ids([6]));
    }

    #[test]
    fn omp_places_explicit_sets() {
        let mut topology = uniform(1, 4, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Explicit,
            gran: Some(LayerKind::Thread),
            proclist: Some("{0:4},{4:4}".to_string()),
            ..AffinityConfig::default()
        };
        config.flags.omp_places = true;

        init(&mut topology, &mut config);

        assert_eq!(config.num_masks(), 2);
        assert_eq!(config.masks()[0], ProcMask::from_ids(0..4));
        assert_eq!(config.masks()[1], ProcMask::from_ids(4..8));
    }

    #[test]
    fn omp_places_generative_clause_drops_out_of_range() {
        let mut topology = uniform(1, 2, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Explicit,
            gran: Some(LayerKind::Thread),
            // Base {2,3}, then shift by +2 twice: the second shift leaves
            // the machine entirely.
            proclist: Some("{2,3}:3:2".to_string()),
            ..AffinityConfig::default()
        };
        config.flags.omp_places = true;

        init(&mut topology, &mut config);
        assert_eq!(config.num_masks(), 1);
        assert_eq!(config.masks()[0], ProcMask::from_ids([2, 3]));
    }

    #[test]
    fn omp_places_complement() {
        let mut topology = uniform(1, 4, 1);
        let mut config = AffinityConfig {
            kind: AffinityType::Explicit,
            gran: Some(LayerKind::Thread),
            proclist: Some("!{0,1}".to_string()),
            ..AffinityConfig::default()
        };
        config.flags.omp_places = true;

        init(&mut topology, &mut config);
        assert_eq!(config.num_masks(), 1);
        assert_eq!(config.masks()[0], ProcMask::from_ids([2, 3]));
    }

    #[test]
    fn logical_offset_rotates_by_smt_width() {
        let mut topology = uniform(1, 4, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Logical,
            gran: Some(LayerKind::Thread),
            offset: 1,
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);
        assert_eq!(config.place_offset, 2);
        assert_eq!(config.num_masks(), 8);
    }

    #[test]
    fn num_places_cap_limits_generation() {
        let mut topology = uniform(2, 4, 1);
        let mut config = AffinityConfig {
            kind: AffinityType::Compact,
            gran: Some(LayerKind::Thread),
            num_places_cap: Some(3),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);
        assert_eq!(config.num_masks(), 3);
    }

    #[test]
    fn dups_generates_one_place_per_thread() {
        let mut topology = uniform(1, 2, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Compact,
            gran: Some(LayerKind::Core),
            ..AffinityConfig::default()
        };
        config.flags.dups = true;

        init(&mut topology, &mut config);

        // Four places (one per thread), each the core-pair mask.
        assert_eq!(config.num_masks(), 4);
        assert_eq!(config.masks()[0], config.masks()[1]);
        assert_ne!(config.masks()[1], config.masks()[2]);
    }

    #[test]
    fn place_summaries_identify_sockets() {
        let mut topology = uniform(2, 2, 1);
        let mut config = AffinityConfig {
            kind: AffinityType::Compact,
            gran: Some(LayerKind::Thread),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);

        assert_eq!(
            config.place_ids()[0].get(LayerKind::Socket),
            LayerId::Id(0)
        );
        assert_eq!(
            config.place_ids()[3].get(LayerKind::Socket),
            LayerId::Id(1)
        );
    }

    #[test]
    fn hybrid_place_summaries_carry_attrs() {
        let mut topology = crate::test_topologies::hybrid_1x6p8e();
        let mut config = AffinityConfig {
            kind: AffinityType::Compact,
            gran: Some(LayerKind::Core),
            ..AffinityConfig::default()
        };

        init(&mut topology, &mut config);

        assert_eq!(
            config.place_attrs()[0].core_type,
            AttrValue::Value(crate::CoreType::Core)
        );
        assert_eq!(
            config.place_attrs()[13].core_type,
            AttrValue::Value(crate::CoreType::Atom)
        );
    }

    #[test]
    fn balanced_on_hidden_helper_degrades_to_none() {
        let mut topology = uniform(1, 4, 2);
        let mut config = AffinityConfig {
            kind: AffinityType::Balanced,
            ..AffinityConfig::default()
        };
        let mut full_mask = topology.full_mask();

        initialize_places(&mut topology, &mut config, &mut full_mask, true).unwrap();
        assert_eq!(config.kind, AffinityType::None);
    }
}
