//! Machine-topology discovery and thread affinity binding for
//! many-processor systems.
//!
//! Modern machines are heterogeneous: multiple sockets, dies, shared
//! caches, NUMA domains, SMT siblings and (on hybrid parts) cores of
//! different performance classes, possibly partitioned further by OS-level
//! CPU sets or Windows processor groups. Runtimes that place worker
//! threads deliberately need one canonical, queryable model of all of
//! this, and a deterministic way to turn a placement policy into concrete
//! affinity masks.
//!
//! This package builds that model and performs the binding:
//!
//! 1. **Discovery** - a fixed priority chain of back-ends (CPUID leaf
//!    0x1F/0xB, legacy APIC, `/proc/cpuinfo`, Windows processor groups,
//!    AIX SRADs, optionally hwloc, and a flat fallback that always
//!    succeeds) populates the hardware-thread table.
//! 2. **Canonicalization** - uninformative layers are collapsed into an
//!    equivalence relation, enumeration statistics are gathered and the
//!    threads are brought into a canonical sort order.
//! 3. **Filtering** - an optional hardware subset expression narrows the
//!    machine to the requested sockets, cores, core types and so on.
//! 4. **Place construction** - the configured policy (compact, scatter,
//!    balanced, explicit proc lists or OMP_PLACES-style place lists)
//!    produces the ordered list of places threads will be bound to.
//! 5. **Binding** - each thread is assigned a place index and pinned
//!    through the OS, with per-thread state for later re-binding within
//!    the place partition.
//!
//! # Quick start
//!
//! ```no_run
//! use many_places::{AffinityConfig, AffinityContext, AffinityType, LayerKind};
//!
//! let mut config = AffinityConfig::with_type(AffinityType::Compact);
//! config.gran = Some(LayerKind::Core);
//!
//! let mut context = AffinityContext::for_current_process(config);
//! context.initialize().unwrap();
//!
//! let topology = context.topology().unwrap();
//! println!("{}", topology.summary());
//! println!("{} places", context.affinity().num_masks());
//!
//! // Pin the calling thread (thread 0) to its place.
//! context.set_init_mask(0).unwrap();
//! context.bind_init_mask(0).unwrap();
//! ```
//!
//! # Selecting hardware subsets
//!
//! A subset expression narrows the machine before places are built, for
//! example to the second socket's first four cores:
//!
//! ```no_run
//! use many_places::{AffinityConfig, AffinityContext, AffinityType, SubsetRequest};
//!
//! let mut context = AffinityContext::for_current_process(AffinityConfig::with_type(
//!     AffinityType::Compact,
//! ))
//! .with_subset(SubsetRequest::parse("1@1sockets,4cores").unwrap());
//! context.initialize().unwrap();
//! ```
//!
//! # Testing with synthetic machines
//!
//! Everything above the PAL is pure: with the `test-util` feature, a
//! [`Topology`] built from synthetic thread records can drive the whole
//! pipeline without touching the OS, and multiple independent contexts can
//! coexist in one process.
//!
//! # Concurrency contract
//!
//! Discovery, canonicalization and place construction run single-threaded
//! during initialization and are not re-entrant. After initialization the
//! topology and place lists are immutable; per-thread binding operations
//! mutate only the calling thread's own slot and may run concurrently.

mod balanced;
mod config;
mod context;
mod discovery;
mod errors;
mod hw_thread;
mod layer;
mod mask;
mod places;
mod primitive_types;
mod subset;
mod topology;

#[cfg(test)]
mod test_topologies;

pub use config::*;
pub use context::*;
pub use errors::*;
pub use hw_thread::*;
pub use layer::*;
pub use mask::*;
pub use primitive_types::*;
pub use subset::SubsetRequest;
pub use topology::*;

mod pal;
