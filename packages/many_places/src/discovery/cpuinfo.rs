//! The `/proc/cpuinfo` discovery back-end: parses the plaintext processor
//! records, applies `/sys` topology overrides where the kernel provides
//! them, and reconstructs missing package IDs from core-sibling lists.

use foldhash::HashMap;
use foldhash::HashMapExt;

use crate::pal::Filesystem;
use crate::{
    DiscoveryError, HwThread, LayerId, LayerKind, ProcMask, ProcessorId, Topology,
};

/// Longest cpuinfo line accepted before the input is declared malformed.
const MAX_LINE_LEN: usize = 2048;

/// One parsed processor record, before assembly into a topology.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct CpuInfoRecord {
    pub(crate) os_id: Option<ProcessorId>,
    pub(crate) package: Option<u32>,
    pub(crate) core: Option<u32>,
    pub(crate) thread: Option<u32>,
    pub(crate) node: Option<u32>,
}

impl CpuInfoRecord {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parses the text of a cpuinfo file into one record per processor block.
pub(crate) fn parse_records(
    contents: &str,
    max_records: usize,
) -> Result<Vec<CpuInfoRecord>, DiscoveryError> {
    let mut records = Vec::new();
    let mut current = CpuInfoRecord::default();

    for line in contents.lines() {
        if line.len() > MAX_LINE_LEN {
            return Err(DiscoveryError::LongLineCpuinfo);
        }

        if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "processor" | "cpu number" => {
                // A processor line inside a block means a record separator
                // was missing; start a new record.
                if current.os_id.is_some() {
                    records.push(std::mem::take(&mut current));
                }
                current.os_id = Some(parse_field(value, "processor")?);
            }
            "physical id" => current.package = Some(parse_field(value, "physical id")?),
            "core id" => current.core = Some(parse_field(value, "core id")?),
            "thread id" => current.thread = Some(parse_field(value, "thread id")?),
            "node_0 id" => current.node = Some(parse_field(value, "node_0 id")?),
            _ => {}
        }
    }
    if !current.is_empty() {
        records.push(current);
    }

    // A block carrying topology fields without a processor number is
    // malformed. Blocks with no recognized fields at all never became
    // records in the first place.
    if records.iter().any(|record| record.os_id.is_none()) {
        return Err(DiscoveryError::MissingProcField { field: "processor" });
    }

    if records.is_empty() {
        return Err(DiscoveryError::NoProcRecords);
    }
    if records.len() > max_records {
        return Err(DiscoveryError::TooManyProcRecords);
    }

    Ok(records)
}

fn parse_field(value: &str, field: &'static str) -> Result<u32, DiscoveryError> {
    value
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .parse::<u32>()
        .map_err(|_| DiscoveryError::BadProcField { field })
}

/// Applies `/sys/devices/system/cpu/*/topology` overrides to the parsed
/// records: the sysfs package and core IDs win over the text fields, and
/// book/drawer IDs fold into the upper bits of the package ID on machines
/// that stack packages into books and drawers.
fn apply_sys_overrides(records: &mut [CpuInfoRecord], filesystem: &impl Filesystem) {
    for record in records.iter_mut() {
        let Some(os_id) = record.os_id else { continue };

        let sys_field = |field: &str| {
            filesystem
                .get_cpu_topology_field(os_id, field)
                .and_then(|contents| contents.trim().parse::<u32>().ok())
        };

        if let Some(package) = sys_field("physical_package_id") {
            let book = sys_field("book_id").unwrap_or(0);
            let drawer = sys_field("drawer_id").unwrap_or(0);
            record.package = Some(package | (book << 16) | (drawer << 24));
        }
        if let Some(core) = sys_field("core_id") {
            record.core = Some(core);
        }
    }
}

/// Synthesizes package IDs for records that have none, putting every OS
/// processor that shares a core-siblings list into the same package.
fn reconstruct_packages(
    records: &mut [CpuInfoRecord],
    filesystem: &impl Filesystem,
) -> Result<(), DiscoveryError> {
    if records.iter().all(|record| record.package.is_some()) {
        return Ok(());
    }

    let next_package = records
        .iter()
        .filter_map(|record| record.package)
        .max()
        .map_or(0, |max| max + 1);

    let mut siblings_to_package: HashMap<String, u32> = HashMap::new();
    let mut all_missing_siblings = true;

    for record in records.iter_mut() {
        if record.package.is_some() {
            continue;
        }
        let Some(os_id) = record.os_id else { continue };

        if let Some(siblings) =
            filesystem.get_cpu_topology_field(os_id, "core_siblings_list")
        {
            all_missing_siblings = false;
            let known = siblings_to_package.len();
            let package = *siblings_to_package
                .entry(siblings.trim().to_string())
                .or_insert_with(|| {
                    next_package + u32::try_from(known).expect("package count fits in u32")
                });
            record.package = Some(package);
        }
    }

    if records.iter().any(|record| record.package.is_none()) {
        if all_missing_siblings && records.iter().all(|record| record.package.is_none()) {
            // No package information anywhere: a single-package machine.
            for record in records.iter_mut() {
                record.package = Some(0);
            }
        } else {
            return Err(DiscoveryError::MissingProcField {
                field: "physical id",
            });
        }
    }

    Ok(())
}

/// Builds the topology from fully resolved records.
pub(crate) fn assemble(mut records: Vec<CpuInfoRecord>) -> Result<Topology, DiscoveryError> {
    // Core IDs: when the file carries none at all, each processor is its
    // own core; a partial set is malformed.
    if records.iter().all(|record| record.core.is_none()) {
        for record in &mut records {
            record.core = record.os_id;
        }
    } else if records.iter().any(|record| record.core.is_none()) {
        return Err(DiscoveryError::MissingProcField { field: "core id" });
    }

    reassign_duplicate_thread_ids(&mut records);

    let has_nodes = records.iter().any(|record| record.node.is_some());
    let mut types = vec![LayerKind::Socket];
    if has_nodes {
        types.push(LayerKind::Numa);
    }
    types.push(LayerKind::Core);
    types.push(LayerKind::Thread);

    let threads: Vec<HwThread> = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let os_id = record.os_id.expect("records were filtered to have an ID");
            let mut ids = vec![LayerId::Id(
                record.package.expect("packages were reconstructed"),
            )];
            if has_nodes {
                ids.push(record.node.map_or(LayerId::Unknown, LayerId::Id));
            }
            ids.push(LayerId::Id(record.core.expect("cores were defaulted")));
            ids.push(record.thread.map_or(LayerId::Id(0), LayerId::Id));
            HwThread::new(os_id, index, ids)
        })
        .collect();

    let topology = Topology::build(types, threads);
    if !topology.check_ids() {
        return Err(DiscoveryError::UnknownTopology);
    }
    Ok(topology)
}

/// When two processors of one core claim the same thread ID (or none), the
/// IDs are re-assigned densely in record order.
fn reassign_duplicate_thread_ids(records: &mut [CpuInfoRecord]) {
    let mut seen: HashMap<(u32, u32, u32), Vec<usize>> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        let key = (
            record.package.unwrap_or(0),
            record.node.unwrap_or(0),
            record.core.unwrap_or(0),
        );
        seen.entry(key).or_default().push(index);
    }

    for indices in seen.values() {
        let mut threads_seen = Vec::new();
        let mut needs_reassign = false;
        for &index in indices {
            let thread = records[index].thread.unwrap_or(0);
            if threads_seen.contains(&thread) {
                needs_reassign = true;
                break;
            }
            threads_seen.push(thread);
        }
        if indices.len() > 1 && (needs_reassign || indices.iter().any(|&i| records[i].thread.is_none()))
        {
            for (new_thread, &index) in indices.iter().enumerate() {
                records[index].thread =
                    Some(u32::try_from(new_thread).expect("thread count fits in u32"));
            }
        }
    }
}

/// The complete back-end: read, override, reconstruct, filter to the
/// allowed mask, assemble.
pub(crate) fn discover(
    filesystem: &impl Filesystem,
    full_mask: &ProcMask,
) -> Result<Topology, DiscoveryError> {
    let contents = filesystem
        .get_cpuinfo_contents()
        .ok_or(DiscoveryError::NoProcRecords)?;

    let mut records = parse_records(&contents, full_mask.count().max(1024))?;
    apply_sys_overrides(&mut records, filesystem);
    reconstruct_packages(&mut records, filesystem)?;

    records.retain(|record| record.os_id.is_some_and(|os_id| full_mask.test(os_id)));
    if records.is_empty() {
        return Err(DiscoveryError::NoProcRecords);
    }

    assemble(records)
}
