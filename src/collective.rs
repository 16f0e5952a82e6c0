//! Collective communication
//!
//! Collective operations are called by every process of a communicator. Operations that involve
//! all processes symmetrically (barrier, all-reduce, scan, all-to-all) are methods of
//! `CommunicatorCollectives`, which every `Communicator` implements. Operations with a designated
//! root (broadcast, gather, scatter, reduce) are methods of `Root`, which is implemented by a
//! `Process` naming the root:
//!
//! ```
//! use collectives::traits::*;
//! use collectives::collective::Sum;
//!
//! let totals = collectives::local::run(4, |world| {
//!     let root = world.process_at_rank(0);
//!     let x = world.rank() * 10;
//!     if world.rank() == root.rank() {
//!         root.reduce_root(&x, Sum).map(Some)
//!     } else {
//!         root.reduce_into(&x, Sum).map(|_| None)
//!     }
//! });
//! assert_eq!(totals[0], Ok(Some(60)));
//! ```
//!
//! Where the result of a rooted operation only exists on the root, the operation is split in two:
//! the `_root` variant is called on the root and produces the result, the plain variant is called
//! everywhere else and only sends. Calling a variant on the wrong side panics.
//!
//! Results are returned as values or written into caller supplied buffers (`_into`). Errors come
//! from the runtime and are returned unchanged.

use conv::ConvUtil;
use log::trace;

use crate::datatype::traits::*;
use crate::datatype::{with_uninit_value, with_uninit_vec, Partition};
use crate::error::{Error, Result};
use crate::raw::{RawCommunicator, SendBuffer};
use crate::topology::traits::*;
use crate::topology::{Process, Rank};
use crate::Count;

pub mod operation;

pub use self::operation::{
    reduce_local_into, BitwiseAnd, BitwiseOr, BitwiseXor, LogicalAnd, LogicalOr, LogicalXor, Max,
    Min, Operation, Product, Sum, SystemOperation,
};

/// Collective communication traits
pub mod traits {
    pub use super::{CommunicatorCollectives, Operation, Root};
}

/// Fails the collective on this process and makes the runtime fail it on the others.
fn abort<C: RawCommunicator + ?Sized>(comm: &C, error: Error) -> Error {
    comm.raw_abort(error)
}

fn check_counts<C: RawCommunicator + ?Sized>(comm: &C, send: usize, recv: usize) -> Result<()> {
    if send == recv {
        Ok(())
    } else {
        Err(abort(
            comm,
            Error::count(format!(
                "send buffer holds {} elements, receive buffer {}",
                send, recv
            )),
        ))
    }
}

/// Collective communication patterns defined on `Communicator`s
pub trait CommunicatorCollectives: Communicator {
    /// Barrier synchronization among all processes in a `Communicator`
    ///
    /// Calling processes will enter the barrier and block execution until all processes in the
    /// `Communicator` `&self` have entered the barrier.
    fn barrier(&self) -> Result<()> {
        trace!("rank {}: barrier", self.rank());
        self.raw_barrier()
    }

    /// Performs a global reduction under the operation `op` of the input data in `sendbuf` and
    /// stores the result in `recvbuf` on all processes.
    ///
    /// # Examples
    ///
    /// See `demos/reduce.rs`
    fn all_reduce_into<S: ?Sized, R: ?Sized, O>(
        &self,
        sendbuf: &S,
        recvbuf: &mut R,
        op: O,
    ) -> Result<()>
    where
        S: Buffer,
        R: BufferMut<Item = S::Item>,
        O: Operation<S::Item>,
    {
        check_counts(self, sendbuf.count(), recvbuf.count())?;
        let op = op.system_operation();
        trace!(
            "rank {}: all_reduce {:?} of {} {:?}",
            self.rank(),
            op,
            sendbuf.count(),
            sendbuf.as_datatype()
        );
        self.raw_all_reduce(sendbuf.as_dyn(), recvbuf.as_dyn_mut(), op)
    }

    /// Combines `value` from all processes under `op` and returns the result on all processes.
    ///
    /// With values `[10, 20, 30, 40]` on four processes and `Sum`, every process gets `100`.
    fn all_reduce<T, O>(&self, value: &T, op: O) -> Result<T>
    where
        T: Equivalence,
        O: Operation<T>,
    {
        let op = op.system_operation();
        trace!("rank {}: all_reduce {:?} of {:?}", self.rank(), op, value.as_datatype());
        with_uninit_value(|recv| self.raw_all_reduce(value.as_dyn(), recv, op))
    }

    /// Performs a global inclusive prefix reduction of the data in `sendbuf` into `recvbuf` under
    /// operation `op`.
    ///
    /// # Examples
    ///
    /// See `demos/reduce.rs`
    fn scan_into<S: ?Sized, R: ?Sized, O>(&self, sendbuf: &S, recvbuf: &mut R, op: O) -> Result<()>
    where
        S: Buffer,
        R: BufferMut<Item = S::Item>,
        O: Operation<S::Item>,
    {
        check_counts(self, sendbuf.count(), recvbuf.count())?;
        let op = op.system_operation();
        trace!(
            "rank {}: scan {:?} of {} {:?}",
            self.rank(),
            op,
            sendbuf.count(),
            sendbuf.as_datatype()
        );
        self.raw_scan(sendbuf.as_dyn(), recvbuf.as_dyn_mut(), op)
    }

    /// Returns the combination under `op` of `value` on processes `0..=self.rank()`.
    ///
    /// With values `[10, 20, 30, 40]` on four processes and `Sum`, the processes get
    /// `10, 30, 60, 100`.
    fn scan<T, O>(&self, value: &T, op: O) -> Result<T>
    where
        T: Equivalence,
        O: Operation<T>,
    {
        let op = op.system_operation();
        trace!("rank {}: scan {:?} of {:?}", self.rank(), op, value.as_datatype());
        with_uninit_value(|recv| self.raw_scan(value.as_dyn(), recv, op))
    }

    /// Distribute the send `Buffer`s from all processes to the receive `Buffer`s on all processes.
    ///
    /// Both buffers are divided into `size()` equal blocks. Block `j` of `sendbuf` goes to process
    /// `j`, block `i` of `recvbuf` comes from process `i`.
    ///
    /// # Examples
    ///
    /// See `demos/all_to_all.rs`
    fn all_to_all_into<S: ?Sized, R: ?Sized>(&self, sendbuf: &S, recvbuf: &mut R) -> Result<()>
    where
        S: Buffer,
        R: BufferMut<Item = S::Item>,
    {
        check_counts(self, sendbuf.count(), recvbuf.count())?;
        let size = self.size() as usize;
        if sendbuf.as_items().len() % size != 0 {
            return Err(abort(
                self,
                Error::count(format!(
                    "{} items cannot be split into {} equal blocks",
                    sendbuf.as_items().len(),
                    size
                )),
            ));
        }
        trace!(
            "rank {}: all_to_all of {} {:?}",
            self.rank(),
            sendbuf.count(),
            sendbuf.as_datatype()
        );
        self.raw_all_to_all(sendbuf.as_dyn(), recvbuf.as_dyn_mut())
    }

    /// Sends the `i`-th block of `n` values to process `i` and returns the blocks received from
    /// all processes in rank order.
    ///
    /// `values` must hold exactly `n * size()` values.
    fn all_to_all<T>(&self, values: &[T], n: usize) -> Result<Vec<T>>
    where
        T: Equivalence,
    {
        let size = self.size() as usize;
        if Some(values.len()) != n.checked_mul(size) {
            return Err(abort(
                self,
                Error::count(format!(
                    "{} values do not form {} blocks of {}",
                    values.len(),
                    size,
                    n
                )),
            ));
        }
        trace!("rank {}: all_to_all of {} blocks of {}", self.rank(), size, n);
        with_uninit_vec(values.len(), |recv| self.raw_all_to_all(values.as_dyn(), recv))
    }
}

impl<C: Communicator + ?Sized> CommunicatorCollectives for C {}

/// Something that can take the role of 'root' in a collective operation.
///
/// Many collective operations define a 'root' process that takes a special role in the
/// communication. These collective operations are implemented as default methods of this trait.
pub trait Root: AsCommunicator {
    /// Rank of the root process
    fn root_rank(&self) -> Rank;

    /// Broadcast of the contents of a buffer
    ///
    /// After the call completes, the `Buffer` on all processes in the `Communicator` of the `Root`
    /// `&self` will contain what it contains on the `Root`.
    ///
    /// # Examples
    ///
    /// See `demos/broadcast.rs`
    fn broadcast_into<Buf: ?Sized>(&self, buffer: &mut Buf) -> Result<()>
    where
        Buf: BufferMut,
    {
        let comm = self.as_communicator();
        trace!(
            "rank {}: broadcast of {} {:?} from {}",
            comm.rank(),
            buffer.count(),
            buffer.as_datatype(),
            self.root_rank()
        );
        comm.raw_broadcast(buffer.as_dyn_mut(), self.root_rank())
    }

    /// Gather contents of buffers on `Root`.
    ///
    /// After the call completes, the contents of the `Buffer`s on all ranks will be
    /// concatenated on the `Root`. All send `Buffer`s must have the same count of elements.
    ///
    /// This function must be called on all non-root processes.
    ///
    /// # Examples
    ///
    /// See `demos/broadcast.rs`
    fn gather_into<S: ?Sized>(&self, sendbuf: &S) -> Result<()>
    where
        S: Buffer,
    {
        let comm = self.as_communicator();
        assert_ne!(comm.rank(), self.root_rank());
        trace!(
            "rank {}: gather of {} {:?} to {}",
            comm.rank(),
            sendbuf.count(),
            sendbuf.as_datatype(),
            self.root_rank()
        );
        comm.raw_gather(SendBuffer::Buffer(sendbuf.as_dyn()), None, self.root_rank())
    }

    /// Gather contents of buffers on `Root`.
    ///
    /// Returns the contents of the send `Buffer`s of all processes concatenated in rank order,
    /// i.e. the items contributed by process `i` start at `i * sendbuf.as_items().len()`.
    ///
    /// This function must be called on the root process.
    fn gather_into_root<S: ?Sized>(&self, sendbuf: &S) -> Result<Vec<S::Item>>
    where
        S: Buffer,
    {
        let comm = self.as_communicator();
        assert_eq!(comm.rank(), self.root_rank());
        let len = sendbuf.as_items().len() * comm.size() as usize;
        trace!(
            "rank {}: gather of {} {:?} as root",
            comm.rank(),
            sendbuf.count(),
            sendbuf.as_datatype()
        );
        with_uninit_vec(len, |recv| {
            comm.raw_gather(SendBuffer::Buffer(sendbuf.as_dyn()), Some(recv), self.root_rank())
        })
    }

    /// Gather contents of buffers on `Root`, using the root's own storage as receive buffer.
    ///
    /// `buffer` is divided into `size()` equal blocks. The root's contribution must already be in
    /// its own block, the blocks of the other processes are overwritten with what they send via
    /// `gather_into()`.
    ///
    /// This function must be called on the root process.
    fn gather_in_place_root<Buf: ?Sized>(&self, buffer: &mut Buf) -> Result<()>
    where
        Buf: BufferMut,
    {
        let comm = self.as_communicator();
        assert_eq!(comm.rank(), self.root_rank());
        let size = comm.size() as usize;
        if buffer.as_items().len() % size != 0 {
            return Err(abort(
                comm,
                Error::count(format!(
                    "{} items cannot be split into {} equal blocks",
                    buffer.as_items().len(),
                    size
                )),
            ));
        }
        trace!(
            "rank {}: in place gather of {} {:?} as root",
            comm.rank(),
            buffer.count(),
            buffer.as_datatype()
        );
        comm.raw_gather(SendBuffer::InPlace, Some(buffer.as_dyn_mut()), self.root_rank())
    }

    /// Gather contents of buffers of varying length on `Root`.
    ///
    /// Takes two rounds: the item counts are gathered first, the root lays out its receive buffer
    /// from them and then the items are gathered.
    ///
    /// This function must be called on all non-root processes.
    ///
    /// # Examples
    ///
    /// See `demos/gather_varcount.rs`
    fn gather_varcount_into<S: ?Sized>(&self, sendbuf: &S) -> Result<()>
    where
        S: Buffer,
    {
        let comm = self.as_communicator();
        assert_ne!(comm.rank(), self.root_rank());
        let count: Count = item_count(comm, sendbuf)?;
        self.gather_into(&count)?;
        trace!(
            "rank {}: varcount gather of {} {:?} to {}",
            comm.rank(),
            sendbuf.count(),
            sendbuf.as_datatype(),
            self.root_rank()
        );
        comm.raw_gather_varcount(sendbuf.as_dyn(), None, self.root_rank())
    }

    /// Gather contents of buffers of varying length on `Root`.
    ///
    /// Returns one `Vec` per process in rank order, each holding exactly the items that process
    /// sent.
    ///
    /// This function must be called on the root process.
    fn gather_varcount_into_root<S: ?Sized>(&self, sendbuf: &S) -> Result<Vec<Vec<S::Item>>>
    where
        S: Buffer,
    {
        let comm = self.as_communicator();
        assert_eq!(comm.rank(), self.root_rank());
        let count: Count = item_count(comm, sendbuf)?;
        let counts = self.gather_into_root(&count)?;
        let partition = Partition::from_counts(counts).map_err(|e| abort(comm, e))?;
        let elements = partition
            .scaled(<S::Item as Equivalence>::COUNT)
            .map_err(|e| abort(comm, e))?;
        trace!("rank {}: varcount gather of {:?} items as root", comm.rank(), partition.counts());
        let flat = with_uninit_vec(partition.total(), |recv| {
            comm.raw_gather_varcount(sendbuf.as_dyn(), Some((recv, &elements)), self.root_rank())
        })?;
        Ok(partition.split(flat))
    }

    /// Scatter contents of a buffer on the root to all processes.
    ///
    /// `recvbuf` receives the block of the root's send buffer that belongs to this process.
    ///
    /// This function must be called on all non-root processes.
    fn scatter_into<R: ?Sized>(&self, recvbuf: &mut R) -> Result<()>
    where
        R: BufferMut,
    {
        let comm = self.as_communicator();
        assert_ne!(comm.rank(), self.root_rank());
        trace!(
            "rank {}: scatter of {} {:?} from {}",
            comm.rank(),
            recvbuf.count(),
            recvbuf.as_datatype(),
            self.root_rank()
        );
        comm.raw_scatter(None, recvbuf.as_dyn_mut(), self.root_rank())
    }

    /// Scatter contents of a buffer on the root to all processes.
    ///
    /// `sendbuf` is divided into `size()` equal blocks in rank order; block `i` goes to process
    /// `i`, the root's own block lands in `recvbuf`.
    ///
    /// This function must be called on the root process.
    fn scatter_into_root<S: ?Sized, R: ?Sized>(&self, sendbuf: &S, recvbuf: &mut R) -> Result<()>
    where
        S: Buffer,
        R: BufferMut<Item = S::Item>,
    {
        let comm = self.as_communicator();
        assert_eq!(comm.rank(), self.root_rank());
        check_counts(comm, sendbuf.count(), recvbuf.count() * comm.size() as usize)?;
        trace!(
            "rank {}: scatter of {} {:?} as root",
            comm.rank(),
            sendbuf.count(),
            sendbuf.as_datatype()
        );
        comm.raw_scatter(Some(sendbuf.as_dyn()), recvbuf.as_dyn_mut(), self.root_rank())
    }

    /// Performs a global reduction under the operation `op` of the input data in `sendbuf` and
    /// stores the result on the `Root`.
    ///
    /// This function must be called on all non-root processes.
    ///
    /// # Examples
    ///
    /// See `demos/reduce.rs`
    fn reduce_into<S: ?Sized, O>(&self, sendbuf: &S, op: O) -> Result<()>
    where
        S: Buffer,
        O: Operation<S::Item>,
    {
        let comm = self.as_communicator();
        assert_ne!(comm.rank(), self.root_rank());
        let op = op.system_operation();
        trace!(
            "rank {}: reduce {:?} of {} {:?} to {}",
            comm.rank(),
            op,
            sendbuf.count(),
            sendbuf.as_datatype(),
            self.root_rank()
        );
        comm.raw_reduce(SendBuffer::Buffer(sendbuf.as_dyn()), None, op, self.root_rank())
    }

    /// Performs a global reduction under the operation `op` of the input data in `sendbuf` and
    /// stores the result in `recvbuf` on the `Root`.
    ///
    /// This function must be called on the root process.
    fn reduce_into_root<S: ?Sized, R: ?Sized, O>(
        &self,
        sendbuf: &S,
        recvbuf: &mut R,
        op: O,
    ) -> Result<()>
    where
        S: Buffer,
        R: BufferMut<Item = S::Item>,
        O: Operation<S::Item>,
    {
        let comm = self.as_communicator();
        assert_eq!(comm.rank(), self.root_rank());
        check_counts(comm, sendbuf.count(), recvbuf.count())?;
        let op = op.system_operation();
        trace!(
            "rank {}: reduce {:?} of {} {:?} as root",
            comm.rank(),
            op,
            sendbuf.count(),
            sendbuf.as_datatype()
        );
        comm.raw_reduce(
            SendBuffer::Buffer(sendbuf.as_dyn()),
            Some(recvbuf.as_dyn_mut()),
            op,
            self.root_rank(),
        )
    }

    /// Performs a global reduction under the operation `op`, using the root's contribution in
    /// `buffer` as input and storing the result there.
    ///
    /// The other processes call `reduce_into()`.
    ///
    /// This function must be called on the root process.
    fn reduce_in_place_root<Buf: ?Sized, O>(&self, buffer: &mut Buf, op: O) -> Result<()>
    where
        Buf: BufferMut,
        O: Operation<Buf::Item>,
    {
        let comm = self.as_communicator();
        assert_eq!(comm.rank(), self.root_rank());
        let op = op.system_operation();
        trace!(
            "rank {}: in place reduce {:?} of {} {:?} as root",
            comm.rank(),
            op,
            buffer.count(),
            buffer.as_datatype()
        );
        comm.raw_reduce(SendBuffer::InPlace, Some(buffer.as_dyn_mut()), op, self.root_rank())
    }

    /// Combines `value` from all processes under `op` and returns the result.
    ///
    /// This function must be called on the root process.
    fn reduce_root<T, O>(&self, value: &T, op: O) -> Result<T>
    where
        T: Equivalence,
        O: Operation<T>,
    {
        let comm = self.as_communicator();
        assert_eq!(comm.rank(), self.root_rank());
        let op = op.system_operation();
        trace!("rank {}: reduce {:?} of {:?} as root", comm.rank(), op, value.as_datatype());
        with_uninit_value(|recv| {
            comm.raw_reduce(SendBuffer::Buffer(value.as_dyn()), Some(recv), op, self.root_rank())
        })
    }
}

impl<'a, C: 'a + Communicator> Root for Process<'a, C> {
    fn root_rank(&self) -> Rank {
        self.rank()
    }
}

fn item_count<C: RawCommunicator + ?Sized, S: Buffer + ?Sized>(
    comm: &C,
    sendbuf: &S,
) -> Result<Count> {
    let len = sendbuf.as_items().len();
    len.value_as::<Count>().map_err(|_| {
        abort(
            comm,
            Error::count(format!("{} items exceed the native count range", len)),
        )
    })
}
