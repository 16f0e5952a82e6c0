//! Environmental management for the system MPI library
//!
//! This module links the collectives to an installed MPI library through `mpi-sys`. Processes are
//! started by the launcher (`mpiexec -n 4 ./program`), `initialize()` sets up the library and
//! `Universe::world()` is the communicator of all processes.
//!
//! The MPI library is used with its default error handler, which aborts the job on failure. Error
//! codes that do come back are classified through `MPI_Error_class` and returned as `Error::Mpi`.
//! In-place forms are emulated with a copy of the root's contribution. The MPI bindings have no
//! complex datatypes, so feature `mpi` cannot be combined with feature `complex`.

use std::cmp::Ordering;
use std::os::raw::{c_int, c_void};
use std::ptr;

use conv::ConvUtil;
use log::debug;
use mpi_sys as ffi;
use mpi_sys::{MPI_Comm, MPI_Datatype, MPI_Op};

use crate::collective::SystemOperation;
use crate::datatype::{DynBuffer, DynBufferMut, Partition, SystemDatatype};
use crate::error::{Error, ErrorKind, Result};
use crate::raw::{RawCommunicator, SendBuffer};
use crate::topology::{AsCommunicator, Rank};
use crate::Count;

/// Global context
pub struct Universe(());

impl Universe {
    /// The 'world communicator'
    ///
    /// Contains all processes initially partaking in the computation.
    pub fn world(&self) -> SystemCommunicator {
        SystemCommunicator(unsafe { ffi::RSMPI_COMM_WORLD })
    }

    /// Level of multithreading supported by this MPI universe
    pub fn threading_support(&self) -> Threading {
        let mut res: c_int = 0;
        unsafe {
            ffi::MPI_Query_thread(&mut res);
        }
        res.into()
    }
}

impl Drop for Universe {
    fn drop(&mut self) {
        debug!("finalizing MPI");
        unsafe {
            ffi::MPI_Finalize();
        }
    }
}

/// Describes the various levels of multithreading that can be supported by an MPI library.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Threading {
    /// All processes partaking in the computation are single-threaded.
    Single,
    /// Processes may be multi-threaded, but MPI functions will only ever be called from the main
    /// thread.
    Funneled,
    /// Processes may be multi-threaded, but calls to MPI functions will not be made concurrently.
    /// The user is responsible for serializing the calls.
    Serialized,
    /// Processes may be multi-threaded with no restrictions on the use of MPI functions from the
    /// threads.
    Multiple,
}

impl Threading {
    /// The raw value understood by the MPI C API
    fn as_raw(&self) -> c_int {
        use self::Threading::*;
        unsafe {
            match *self {
                Single => ffi::RSMPI_THREAD_SINGLE,
                Funneled => ffi::RSMPI_THREAD_FUNNELED,
                Serialized => ffi::RSMPI_THREAD_SERIALIZED,
                Multiple => ffi::RSMPI_THREAD_MULTIPLE,
            }
        }
    }
}

impl PartialOrd<Threading> for Threading {
    fn partial_cmp(&self, other: &Threading) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Threading {
    fn cmp(&self, other: &Threading) -> Ordering {
        self.as_raw().cmp(&other.as_raw())
    }
}

impl From<c_int> for Threading {
    fn from(i: c_int) -> Threading {
        use self::Threading::*;
        [Single, Funneled, Serialized, Multiple]
            .into_iter()
            .find(|level| level.as_raw() == i)
            .unwrap_or_else(|| panic!("Unknown threading level: {}", i))
    }
}

/// Whether the MPI library has been initialized
pub fn is_initialized() -> bool {
    let mut res: c_int = 0;
    unsafe {
        ffi::MPI_Initialized(&mut res);
    }
    res != 0
}

/// Initialize MPI.
///
/// If the MPI library has not been initialized so far, initializes and returns a representation
/// of the MPI communication `Universe`. Otherwise returns `None`.
///
/// Equivalent to: `initialize_with_threading(Threading::Single)`
pub fn initialize() -> Option<Universe> {
    initialize_with_threading(Threading::Single).map(|x| x.0)
}

/// Initialize MPI with desired level of multithreading support.
///
/// If the MPI library has not been initialized so far, tries to initialize with the desired level
/// of multithreading support and returns the MPI communication `Universe` as well as the level of
/// multithreading actually supported by the implementation. Otherwise returns `None`.
pub fn initialize_with_threading(threading: Threading) -> Option<(Universe, Threading)> {
    if is_initialized() {
        None
    } else {
        let mut provided: c_int = 0;
        unsafe {
            ffi::MPI_Init_thread(
                ptr::null_mut(),
                ptr::null_mut(),
                threading.as_raw(),
                &mut provided,
            );
        }
        let provided = Threading::from(provided);
        debug!("initialized MPI with threading level {:?}", provided);
        Some((Universe(()), provided))
    }
}

/// Turns an MPI return code into a `Result`.
fn check(code: c_int) -> Result<()> {
    if code == ffi::MPI_SUCCESS as c_int {
        return Ok(());
    }
    let mut class: c_int = 0;
    unsafe {
        ffi::MPI_Error_class(code, &mut class);
    }
    let classes = [
        (ffi::MPI_ERR_BUFFER as c_int, ErrorKind::Buffer),
        (ffi::MPI_ERR_COMM as c_int, ErrorKind::Comm),
        (ffi::MPI_ERR_COUNT as c_int, ErrorKind::Count),
        (ffi::MPI_ERR_INTERN as c_int, ErrorKind::Intern),
        (ffi::MPI_ERR_NOT_SAME as c_int, ErrorKind::NotSame),
        (ffi::MPI_ERR_OP as c_int, ErrorKind::Op),
        (ffi::MPI_ERR_OTHER as c_int, ErrorKind::Other),
        (ffi::MPI_ERR_RANK as c_int, ErrorKind::Rank),
        (ffi::MPI_ERR_ROOT as c_int, ErrorKind::Root),
        (ffi::MPI_ERR_TRUNCATE as c_int, ErrorKind::Truncate),
        (ffi::MPI_ERR_TYPE as c_int, ErrorKind::Type),
    ];
    let kind = classes
        .iter()
        .find(|&&(raw, _)| raw == class)
        .map_or(ErrorKind::Unknown, |&(_, kind)| kind);
    Err(Error::Mpi(kind))
}

fn count(len: usize) -> Result<Count> {
    len.value_as::<Count>()
        .map_err(|_| Error::count(format!("{} elements exceed the range of an MPI count", len)))
}

fn raw_datatype(datatype: SystemDatatype) -> MPI_Datatype {
    use crate::datatype::SystemDatatype::*;
    unsafe {
        match datatype {
            Bool => ffi::RSMPI_C_BOOL,
            I8 => ffi::RSMPI_INT8_T,
            I16 => ffi::RSMPI_INT16_T,
            I32 => ffi::RSMPI_INT32_T,
            I64 => ffi::RSMPI_INT64_T,
            U8 => ffi::RSMPI_UINT8_T,
            U16 => ffi::RSMPI_UINT16_T,
            U32 => ffi::RSMPI_UINT32_T,
            U64 => ffi::RSMPI_UINT64_T,
            F32 => ffi::RSMPI_FLOAT,
            F64 => ffi::RSMPI_DOUBLE,
        }
    }
}

fn raw_operation(op: SystemOperation) -> MPI_Op {
    unsafe {
        match op {
            SystemOperation::Max => ffi::RSMPI_MAX,
            SystemOperation::Min => ffi::RSMPI_MIN,
            SystemOperation::Sum => ffi::RSMPI_SUM,
            SystemOperation::Product => ffi::RSMPI_PROD,
            SystemOperation::LogicalAnd => ffi::RSMPI_LAND,
            SystemOperation::BitwiseAnd => ffi::RSMPI_BAND,
            SystemOperation::LogicalOr => ffi::RSMPI_LOR,
            SystemOperation::BitwiseOr => ffi::RSMPI_BOR,
            SystemOperation::LogicalXor => ffi::RSMPI_LXOR,
            SystemOperation::BitwiseXor => ffi::RSMPI_BXOR,
        }
    }
}

/// A communicator of the system MPI library
#[derive(Copy, Clone, Debug)]
pub struct SystemCommunicator(MPI_Comm);

impl SystemCommunicator {
    /// The raw MPI communicator handle
    pub fn as_raw(&self) -> MPI_Comm {
        self.0
    }

    /// Copies block `index` of `blocks` equal blocks out of an in-place receive buffer.
    fn own_block(recv: &DynBufferMut<'_>, index: usize, blocks: usize) -> Result<Vec<u8>> {
        let whole = recv
            .reborrow()
            .ok_or_else(|| Error::Buffer("in place receive buffer is not initialized".into()))?;
        let block = whole.len() / blocks;
        let start = index * block;
        Ok(whole.elements(start..start + block).to_vec())
    }
}

unsafe impl RawCommunicator for SystemCommunicator {
    fn rank(&self) -> Rank {
        let mut res: Rank = 0;
        unsafe {
            ffi::MPI_Comm_rank(self.0, &mut res);
        }
        res
    }

    fn size(&self) -> Rank {
        let mut res: Rank = 0;
        unsafe {
            ffi::MPI_Comm_size(self.0, &mut res);
        }
        res
    }

    fn raw_barrier(&self) -> Result<()> {
        check(unsafe { ffi::MPI_Barrier(self.0) })
    }

    fn raw_broadcast(&self, mut buffer: DynBufferMut<'_>, root: Rank) -> Result<()> {
        let datatype = raw_datatype(buffer.datatype());
        let len = count(buffer.len())?;
        check(unsafe { ffi::MPI_Bcast(buffer.as_mut_ptr(), len, datatype, root, self.0) })
    }

    fn raw_gather(
        &self,
        send: SendBuffer<'_>,
        recv: Option<DynBufferMut<'_>>,
        root: Rank,
    ) -> Result<()> {
        let own;
        let send = match (send, recv.as_ref()) {
            (SendBuffer::Buffer(send), _) => send,
            (SendBuffer::InPlace, Some(recv)) => {
                own = SystemCommunicator::own_block(recv, root as usize, self.size() as usize)?;
                // SAFETY: `own` is a copy of initialized elements of `recv`
                unsafe { DynBuffer::from_bytes(&own, recv.datatype()) }
                    .ok_or_else(|| {
                        Error::count("in place block is not a whole number of elements")
                    })?
            }
            (SendBuffer::InPlace, None) => {
                return Err(Error::Buffer("in place gather on a rank that is not the root".into()))
            }
        };
        let send_type = raw_datatype(send.datatype());
        let send_count = count(send.len())?;
        match recv {
            Some(mut recv) => {
                let recv_type = raw_datatype(recv.datatype());
                let recv_count = count(recv.len() / self.size() as usize)?;
                check(unsafe {
                    ffi::MPI_Gather(
                        send.as_ptr(),
                        send_count,
                        send_type,
                        recv.as_mut_ptr(),
                        recv_count,
                        recv_type,
                        root,
                        self.0,
                    )
                })
            }
            None => check(unsafe {
                ffi::MPI_Gather(
                    send.as_ptr(),
                    send_count,
                    send_type,
                    ptr::null_mut(),
                    0,
                    send_type,
                    root,
                    self.0,
                )
            }),
        }
    }

    fn raw_gather_varcount(
        &self,
        send: DynBuffer<'_>,
        recv: Option<(DynBufferMut<'_>, &Partition)>,
        root: Rank,
    ) -> Result<()> {
        let send_type = raw_datatype(send.datatype());
        let send_count = count(send.len())?;
        match recv {
            Some((mut recv, partition)) => {
                let recv_type = raw_datatype(recv.datatype());
                check(unsafe {
                    ffi::MPI_Gatherv(
                        send.as_ptr(),
                        send_count,
                        send_type,
                        recv.as_mut_ptr(),
                        partition.counts().as_ptr(),
                        partition.displs().as_ptr(),
                        recv_type,
                        root,
                        self.0,
                    )
                })
            }
            None => check(unsafe {
                ffi::MPI_Gatherv(
                    send.as_ptr(),
                    send_count,
                    send_type,
                    ptr::null_mut(),
                    ptr::null(),
                    ptr::null(),
                    send_type,
                    root,
                    self.0,
                )
            }),
        }
    }

    fn raw_scatter(
        &self,
        send: Option<DynBuffer<'_>>,
        mut recv: DynBufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        let recv_type = raw_datatype(recv.datatype());
        let recv_count = count(recv.len())?;
        let (send_ptr, send_count, send_type) = match send {
            Some(send) => (send.as_ptr(), recv_count, raw_datatype(send.datatype())),
            None => (ptr::null::<c_void>(), 0, recv_type),
        };
        check(unsafe {
            ffi::MPI_Scatter(
                send_ptr,
                send_count,
                send_type,
                recv.as_mut_ptr(),
                recv_count,
                recv_type,
                root,
                self.0,
            )
        })
    }

    fn raw_reduce(
        &self,
        send: SendBuffer<'_>,
        recv: Option<DynBufferMut<'_>>,
        op: SystemOperation,
        root: Rank,
    ) -> Result<()> {
        let own;
        let send = match (send, recv.as_ref()) {
            (SendBuffer::Buffer(send), _) => send,
            (SendBuffer::InPlace, Some(recv)) => {
                own = SystemCommunicator::own_block(recv, 0, 1)?;
                // SAFETY: `own` is a copy of initialized elements of `recv`
                unsafe { DynBuffer::from_bytes(&own, recv.datatype()) }
                    .ok_or_else(|| {
                        Error::count("in place buffer is not a whole number of elements")
                    })?
            }
            (SendBuffer::InPlace, None) => {
                return Err(Error::Buffer("in place reduce on a rank that is not the root".into()))
            }
        };
        let datatype = raw_datatype(send.datatype());
        let len = count(send.len())?;
        let mut recv = recv;
        let recv_ptr = recv.as_mut().map_or(ptr::null_mut(), |recv| recv.as_mut_ptr());
        check(unsafe {
            ffi::MPI_Reduce(send.as_ptr(), recv_ptr, len, datatype, raw_operation(op), root, self.0)
        })
    }

    fn raw_all_reduce(
        &self,
        send: DynBuffer<'_>,
        mut recv: DynBufferMut<'_>,
        op: SystemOperation,
    ) -> Result<()> {
        let datatype = raw_datatype(send.datatype());
        let len = count(send.len())?;
        check(unsafe {
            ffi::MPI_Allreduce(
                send.as_ptr(),
                recv.as_mut_ptr(),
                len,
                datatype,
                raw_operation(op),
                self.0,
            )
        })
    }

    fn raw_scan(
        &self,
        send: DynBuffer<'_>,
        mut recv: DynBufferMut<'_>,
        op: SystemOperation,
    ) -> Result<()> {
        let datatype = raw_datatype(send.datatype());
        let len = count(send.len())?;
        check(unsafe {
            ffi::MPI_Scan(
                send.as_ptr(),
                recv.as_mut_ptr(),
                len,
                datatype,
                raw_operation(op),
                self.0,
            )
        })
    }

    fn raw_all_to_all(&self, send: DynBuffer<'_>, mut recv: DynBufferMut<'_>) -> Result<()> {
        let send_type = raw_datatype(send.datatype());
        let recv_type = raw_datatype(recv.datatype());
        let size = self.size() as usize;
        let send_count = count(send.len() / size)?;
        let recv_count = count(recv.len() / size)?;
        check(unsafe {
            ffi::MPI_Alltoall(
                send.as_ptr(),
                send_count,
                send_type,
                recv.as_mut_ptr(),
                recv_count,
                recv_type,
                self.0,
            )
        })
    }

    fn raw_abort(&self, error: Error) -> Error {
        debug!("rank {}: aborting MPI job: {}", self.rank(), error);
        unsafe {
            ffi::MPI_Abort(self.0, 1);
        }
        error
    }
}

impl AsCommunicator for SystemCommunicator {
    type Out = SystemCommunicator;
    fn as_communicator(&self) -> &Self::Out {
        self
    }
}
