//! Bridge between the typed layer and a runtime
//!
//! A runtime provides communication by implementing `RawCommunicator`, the untyped primitive set
//! of collective operations. Arguments arrive already resolved: buffers are `DynBuffer`s (bytes
//! plus a wire datatype), operations are `SystemOperation` handles and variable layouts are
//! `Partition`s. The typed layer in `collective` only shapes arguments and forwards to these
//! primitives.

use std::fmt;

use crate::collective::SystemOperation;
use crate::datatype::{DynBuffer, DynBufferMut, Partition};
use crate::error::{Error, Result};
use crate::topology::Rank;

/// Rust C bridge traits
pub mod traits {
    pub use super::RawCommunicator;
}

/// The collective patterns of the primitive set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collective {
    /// `raw_barrier()`
    Barrier,
    /// `raw_broadcast()`
    Broadcast,
    /// `raw_gather()`
    Gather,
    /// `raw_gather_varcount()`
    GatherVarcount,
    /// `raw_scatter()`
    Scatter,
    /// `raw_reduce()`
    Reduce,
    /// `raw_all_reduce()`
    AllReduce,
    /// `raw_scan()`
    Scan,
    /// `raw_all_to_all()`
    AllToAll,
}

impl fmt::Display for Collective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The send side of a rooted collective.
#[derive(Debug, Clone, Copy)]
pub enum SendBuffer<'a> {
    /// Contribute the contents of a buffer
    Buffer(DynBuffer<'a>),
    /// The root's contribution already sits in its receive buffer, at the root's own block for
    /// gathers or as the whole buffer for reductions. Only valid on the root.
    InPlace,
}

/// A type that provides the untyped collective primitives of a runtime.
///
/// Every primitive is collective: it must be called by all ranks of the communicator in the same
/// order, with matching datatypes and counts. On failure the error is returned to the caller as
/// is, the typed layer does not retry.
///
/// # Safety
///
/// When a primitive returns `Ok`, it must have written every element of every receive buffer it
/// was handed on this rank, and only with valid values of the buffer's datatype, i.e. bytes
/// contributed by a buffer of the same datatype or produced by `SystemOperation`s on them. Callers
/// rely on this to read results out of uninitialized storage. Send buffers only carry such bytes:
/// `DynBuffer::new` takes typed slices and `DynBuffer::from_bytes` is `unsafe`.
pub unsafe trait RawCommunicator {
    /// The rank of the calling process
    fn rank(&self) -> Rank;

    /// The number of processes
    fn size(&self) -> Rank;

    /// Blocks until all processes have entered the barrier.
    fn raw_barrier(&self) -> Result<()>;

    /// Copies `buffer` on `root` into `buffer` on all other processes.
    fn raw_broadcast(&self, buffer: DynBufferMut<'_>, root: Rank) -> Result<()>;

    /// Concatenates the equally sized send buffers of all processes in rank order into `recv` on
    /// `root`. `recv` is `Some` exactly on the root.
    fn raw_gather(
        &self,
        send: SendBuffer<'_>,
        recv: Option<DynBufferMut<'_>>,
        root: Rank,
    ) -> Result<()>;

    /// Like `raw_gather()`, but process `i` contributes `partition.counts()[i]` elements, placed
    /// at `partition.displs()[i]` in `recv`.
    fn raw_gather_varcount(
        &self,
        send: DynBuffer<'_>,
        recv: Option<(DynBufferMut<'_>, &Partition)>,
        root: Rank,
    ) -> Result<()>;

    /// Splits `send` on `root` into equal blocks in rank order and delivers block `i` into `recv`
    /// on process `i`. `send` is `Some` exactly on the root.
    fn raw_scatter(
        &self,
        send: Option<DynBuffer<'_>>,
        recv: DynBufferMut<'_>,
        root: Rank,
    ) -> Result<()>;

    /// Combines the send buffers of all processes element-wise under `op` into `recv` on `root`.
    /// `recv` is `Some` exactly on the root.
    fn raw_reduce(
        &self,
        send: SendBuffer<'_>,
        recv: Option<DynBufferMut<'_>>,
        op: SystemOperation,
        root: Rank,
    ) -> Result<()>;

    /// Combines the send buffers of all processes element-wise under `op` into `recv` on every
    /// process.
    fn raw_all_reduce(
        &self,
        send: DynBuffer<'_>,
        recv: DynBufferMut<'_>,
        op: SystemOperation,
    ) -> Result<()>;

    /// Inclusive prefix reduction: process `i` receives the combination of the send buffers of
    /// processes `0..=i`.
    fn raw_scan(
        &self,
        send: DynBuffer<'_>,
        recv: DynBufferMut<'_>,
        op: SystemOperation,
    ) -> Result<()>;

    /// Sends block `j` of `send` to process `j` and stores the block received from process `i` as
    /// block `i` of `recv`. Blocks are `len / size` elements on both sides.
    fn raw_all_to_all(&self, send: DynBuffer<'_>, recv: DynBufferMut<'_>) -> Result<()>;

    /// Reports a failure detected on this process that leaves the collective in progress unusable
    /// for the other processes, and returns the error to hand to the caller.
    ///
    /// Runtimes use this to make peers fail instead of waiting forever.
    fn raw_abort(&self, error: Error) -> Error;
}

unsafe impl<'a, C: 'a + RawCommunicator + ?Sized> RawCommunicator for &'a C {
    fn rank(&self) -> Rank {
        (**self).rank()
    }
    fn size(&self) -> Rank {
        (**self).size()
    }
    fn raw_barrier(&self) -> Result<()> {
        (**self).raw_barrier()
    }
    fn raw_broadcast(&self, buffer: DynBufferMut<'_>, root: Rank) -> Result<()> {
        (**self).raw_broadcast(buffer, root)
    }
    fn raw_gather(
        &self,
        send: SendBuffer<'_>,
        recv: Option<DynBufferMut<'_>>,
        root: Rank,
    ) -> Result<()> {
        (**self).raw_gather(send, recv, root)
    }
    fn raw_gather_varcount(
        &self,
        send: DynBuffer<'_>,
        recv: Option<(DynBufferMut<'_>, &Partition)>,
        root: Rank,
    ) -> Result<()> {
        (**self).raw_gather_varcount(send, recv, root)
    }
    fn raw_scatter(
        &self,
        send: Option<DynBuffer<'_>>,
        recv: DynBufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        (**self).raw_scatter(send, recv, root)
    }
    fn raw_reduce(
        &self,
        send: SendBuffer<'_>,
        recv: Option<DynBufferMut<'_>>,
        op: SystemOperation,
        root: Rank,
    ) -> Result<()> {
        (**self).raw_reduce(send, recv, op, root)
    }
    fn raw_all_reduce(
        &self,
        send: DynBuffer<'_>,
        recv: DynBufferMut<'_>,
        op: SystemOperation,
    ) -> Result<()> {
        (**self).raw_all_reduce(send, recv, op)
    }
    fn raw_scan(
        &self,
        send: DynBuffer<'_>,
        recv: DynBufferMut<'_>,
        op: SystemOperation,
    ) -> Result<()> {
        (**self).raw_scan(send, recv, op)
    }
    fn raw_all_to_all(&self, send: DynBuffer<'_>, recv: DynBufferMut<'_>) -> Result<()> {
        (**self).raw_all_to_all(send, recv)
    }
    fn raw_abort(&self, error: Error) -> Error {
        (**self).raw_abort(error)
    }
}
