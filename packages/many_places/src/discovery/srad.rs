//! The AIX SRAD discovery back-end: enumerates the scheduler resource
//! allocation domains under the system detail level and treats each RAD as
//! a package, deriving cores from the SMT width.

use crate::{DiscoveryError, HwThread, LayerId, LayerKind, ProcMask, Topology};

const RS_EMPTY: libc::c_int = 0;
const RS_ALL: libc::c_int = 2;

/// Opaque resource-set handle.
#[repr(C)]
struct RsetHandle {
    _private: [u8; 0],
}

unsafe extern "C" {
    fn rs_alloc(flags: libc::c_int) -> *mut RsetHandle;
    fn rs_free(rset: *mut RsetHandle);
    fn rs_numrads(rset: *mut RsetHandle, sdl: libc::c_uint, flags: libc::c_uint) -> libc::c_int;
    fn rs_getrad(
        rset: *mut RsetHandle,
        rad: *mut RsetHandle,
        sdl: libc::c_uint,
        index: libc::c_uint,
        flags: libc::c_uint,
    ) -> libc::c_int;
    fn rs_op(
        command: libc::c_uint,
        rset: *mut RsetHandle,
        rad: *mut RsetHandle,
        flags: libc::c_uint,
        id: libc::c_uint,
    ) -> libc::c_int;
}

/// `rs_op` command testing whether a resource (here: a CPU) is in a set.
const RS_TESTRESOURCE: libc::c_uint = 6;

/// Scheduler detail level of the SRADs.
const SRAD_SDL: libc::c_uint = 1;

fn smt_threads_per_core() -> u32 {
    // SAFETY: sysconf is always safe to call.
    let smt = unsafe { libc::sysconf(libc::_SC_SMT_THREADS_PER_CORE) };
    u32::try_from(smt.max(1)).unwrap_or(1)
}

pub(crate) fn discover(full_mask: &ProcMask) -> Result<Topology, DiscoveryError> {
    // SAFETY: rs_alloc returns an owned handle, released below on every path.
    let all = unsafe { rs_alloc(RS_ALL) };
    if all.is_null() {
        return Err(DiscoveryError::UnknownTopology);
    }
    // SAFETY: same ownership contract as above.
    let rad = unsafe { rs_alloc(RS_EMPTY) };
    if rad.is_null() {
        // SAFETY: all was allocated by rs_alloc above.
        unsafe { rs_free(all) };
        return Err(DiscoveryError::UnknownTopology);
    }

    let result = discover_with_handles(all, rad, full_mask);

    // SAFETY: both handles were allocated by rs_alloc above.
    unsafe {
        rs_free(rad);
        rs_free(all);
    }
    result
}

fn discover_with_handles(
    all: *mut RsetHandle,
    rad: *mut RsetHandle,
    full_mask: &ProcMask,
) -> Result<Topology, DiscoveryError> {
    // SAFETY: the handles are valid for the duration of this call.
    let num_rads = unsafe { rs_numrads(all, SRAD_SDL, 0) };
    if num_rads <= 0 {
        return Err(DiscoveryError::UnknownTopology);
    }

    let smt = smt_threads_per_core();
    let mut threads = Vec::new();

    for rad_index in 0..num_rads {
        // SAFETY: rad is a valid empty handle to be filled; the index is in
        // range per rs_numrads.
        let status = unsafe {
            rs_getrad(
                all,
                rad,
                SRAD_SDL,
                libc::c_uint::try_from(rad_index).expect("RAD index is non-negative"),
                0,
            )
        };
        if status != 0 {
            return Err(DiscoveryError::UnknownTopology);
        }

        for os_id in full_mask.iter() {
            // SAFETY: rad holds the RAD's resource set; RS_TESTRESOURCE
            // only reads it.
            let in_rad = unsafe { rs_op(RS_TESTRESOURCE, rad, std::ptr::null_mut(), 0, os_id) };
            if in_rad <= 0 {
                continue;
            }

            let index = threads.len();
            threads.push(HwThread::new(
                os_id,
                index,
                vec![
                    LayerId::Id(u32::try_from(rad_index).expect("RAD index is non-negative")),
                    LayerId::Id(os_id / smt),
                    LayerId::Id(os_id % smt),
                ],
            ));
        }
    }

    if threads.is_empty() {
        return Err(DiscoveryError::NoProcRecords);
    }

    Ok(Topology::build(
        vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread],
        threads,
    ))
}
